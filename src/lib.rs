//! perfvault - versioned benchmark snapshots with drift tracking
//!
//! Raw benchmark artifacts are validated, flattened into one table per source
//! type, joined on the benchmark configuration key and archived as immutable,
//! timestamped versions. Consecutive versions can then be compared field by
//! field to surface value drift and coverage drift.
//!
//! The modules map onto the run's steps:
//! - [`validate`]: reject malformed or empty artifacts
//! - [`flatten`] and [`dataset`]: build the e2e and interactivity tables
//! - [`join`]: merge both tables on [`join::JoinKey`]
//! - [`archive`]: publish versions atomically, apply retention
//! - [`diff`]: pairwise and grouped drift detection
//! - [`pipeline`]: run the steps in order and produce a [`report::RunReport`]

#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::float_cmp, clippy::too_many_lines))]

// Lets the shared test harness mounted into unit tests resolve `perfvault::...`
// the same way integration tests do.
extern crate self as perfvault;

pub mod archive;
pub mod cli;
pub mod collector;
pub mod config;
pub mod dataset;
pub mod diff;
pub mod error;
pub mod flatten;
pub mod join;
pub mod logging;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod validate;

pub use error::{Error, Result};
