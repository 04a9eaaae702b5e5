//! CLI argument parsing using Clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// perfvault - versioned benchmark snapshots with drift tracking
#[derive(Parser, Debug)]
#[command(name = "perfvault")]
#[command(version, about, long_about = None)]
#[command(after_help = "Examples:
  perfvault run                          Collect, join and archive a new version
  perfvault validate raw_data --remove   Check raw artifacts and delete bad ones
  perfvault versions                     List archived versions
  perfvault diff 20250101_120000 20250102_120000
  perfvault drift --last 7 --partitions  Summarize changes over the last week
")]
pub struct Cli {
    /// Settings file (overrides global and project settings)
    #[arg(long, env = "PERFVAULT_CONFIG_PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG still wins)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the pipeline over the raw data directory
    Run,

    /// Validate raw artifacts and print the cleanup report
    Validate {
        /// Directory to scan (defaults to paths.raw_data_dir)
        dir: Option<PathBuf>,
        /// Delete rejected artifacts
        #[arg(long)]
        remove: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List archived versions, newest first
    Versions,

    /// Field-level diff of two versions' merged tables
    Diff {
        /// Older version id (with or without the `version_` prefix)
        v1: String,
        /// Newer version id
        v2: String,
        /// Print the drift report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Grouped change summary over consecutive archived versions
    Drift {
        /// How many of the newest versions to include
        #[arg(long, default_value_t = 5)]
        last: usize,
        /// Also compare the e2e and interactivity partitions
        #[arg(long)]
        partitions: bool,
        /// Print the drift reports as JSON
        #[arg(long)]
        json: bool,
    },
}
