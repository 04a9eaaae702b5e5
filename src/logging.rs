//! Tracing setup.
//!
//! Two outputs: a compact terminal layer on stderr and a JSON-lines file per
//! run at `<log_dir>/pipeline_<run_id>.log.jsonl`.

use crate::error::{Error, Result};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Returned by [`init_logging`]; names the run's log file.
#[derive(Debug, Clone)]
pub struct LogGuard {
    pub log_path: PathBuf,
}

#[derive(Clone)]
struct SharedFileWriter {
    file: Arc<Mutex<File>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedFileWriter {
    type Writer = SharedFileGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SharedFileGuard {
            guard: self.file.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

struct SharedFileGuard<'a> {
    guard: MutexGuard<'a, File>,
}

impl io::Write for SharedFileGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut *self.guard, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut *self.guard)
    }
}

pub fn log_file_path(log_dir: &Path, run_id: &str) -> PathBuf {
    log_dir.join(format!("pipeline_{run_id}.log.jsonl"))
}

fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }))
}

/// Install the global subscriber. `RUST_LOG` overrides the level chosen by
/// `verbose`.
pub fn init_logging(log_dir: &Path, run_id: &str, verbose: bool) -> Result<LogGuard> {
    std::fs::create_dir_all(log_dir)?;
    let log_path = log_file_path(log_dir, run_id);
    let file = File::create(&log_path)?;
    let writer = SharedFileWriter {
        file: Arc::new(Mutex::new(file)),
    };

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(writer)
        .with_target(true);

    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(default_filter(verbose))
        .with(terminal_layer)
        .with(json_layer)
        .try_init()
        .map_err(|e| Error::config(format!("Failed to initialize logging: {e}")))?;

    Ok(LogGuard { log_path })
}

/// Terminal-only logging for commands that do not start a run.
pub fn init_terminal_logging(verbose: bool) {
    let _ = tracing_subscriber::registry()
        .with(default_filter(verbose))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init();
}

/// Safe to call from every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(default_filter(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_test_writer()
                .compact(),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_log_events_are_json_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = log_file_path(temp.path(), "20250101_000000");
        assert!(path.ends_with("pipeline_20250101_000000.log.jsonl"));

        let writer = SharedFileWriter {
            file: Arc::new(Mutex::new(File::create(&path).expect("create"))),
        };
        let subscriber = tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true),
        );
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(step = "joining", records = 3, "Step passed");
        });

        let content = std::fs::read_to_string(&path).expect("read");
        let line = content.lines().next().expect("one event");
        let event: serde_json::Value = serde_json::from_str(line).expect("json");
        assert_eq!(event["level"], "INFO");
        assert_eq!(event["fields"]["step"], "joining");
        assert_eq!(event["fields"]["records"], 3);
    }

    #[test]
    fn test_logging_can_be_initialized_twice() {
        init_test_logging();
        init_test_logging();
    }
}
