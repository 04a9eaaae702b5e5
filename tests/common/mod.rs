//! Common test infrastructure for `perfvault`.
//!
//! - Verbose logging with auto-dump on test failure
//! - Test harness for consistent setup/teardown
//! - Raw artifact fixtures shared by the integration tests

pub mod fixtures;
pub mod harness;
pub mod logging;

#[allow(unused_imports)]
pub use harness::TestHarness;
