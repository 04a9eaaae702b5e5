//! Per-test temp directory plus a [`TestLogger`] that is printed if the test
//! panics. Set `TEST_LOG_PATH` to also keep the failing test's log as JSONL.
//!
//! ```ignore
//! let harness = TestHarness::new("retention_drops_oldest");
//! let raw = harness.create_dir("raw_data");
//! harness.log().info_ctx("run", "pipeline finished", |ctx| {
//!     ctx.push(("raw".into(), raw.display().to_string()));
//! });
//! ```

#![allow(dead_code)]

use super::logging::TestLogger;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct TestHarness {
    name: String,
    temp_dir: TempDir,
    logger: TestLogger,
}

impl TestHarness {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let temp_dir = TempDir::new().expect("create temp dir");
        let logger = TestLogger::new(name.clone());
        logger.info_ctx("harness", "started", |ctx| {
            ctx.push(("temp_dir".into(), temp_dir.path().display().to_string()));
        });
        Self {
            name,
            temp_dir,
            logger,
        }
    }

    pub const fn log(&self) -> &TestLogger {
        &self.logger
    }

    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn temp_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.temp_dir.path().join(path)
    }

    /// Write `content` under the temp dir, creating parents.
    pub fn create_file(&self, name: impl AsRef<Path>, content: impl AsRef<[u8]>) -> PathBuf {
        let path = self.temp_path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        let content = content.as_ref();
        std::fs::write(&path, content).expect("write test file");
        self.logger.info_ctx("harness", "created file", |ctx| {
            ctx.push(("path".into(), path.display().to_string()));
            ctx.push(("bytes".into(), content.len().to_string()));
        });
        path
    }

    pub fn create_dir(&self, name: impl AsRef<Path>) -> PathBuf {
        let path = self.temp_path(name);
        std::fs::create_dir_all(&path).expect("create test dir");
        path
    }

    pub fn read_file(&self, name: impl AsRef<Path>) -> String {
        let path = self.temp_path(name);
        let content = std::fs::read_to_string(&path).expect("read test file");
        self.logger.debug_ctx("harness", "read file", |ctx| {
            ctx.push(("path".into(), path.display().to_string()));
            ctx.push(("bytes".into(), content.len().to_string()));
        });
        content
    }

    pub fn record_artifact(&self, name: impl Into<String>, path: impl AsRef<Path>) {
        self.logger.record_artifact(name, path.as_ref());
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        self.logger.info(
            "harness",
            format!("failed after {:.3}s", self.logger.elapsed_secs()),
        );
        eprintln!("\n=== TEST FAILED: {} ===", self.name);
        eprint!("{}", self.logger.render());
        eprintln!("=== END LOG ===");
        if let Some(path) = std::env::var_os("TEST_LOG_PATH") {
            let path = PathBuf::from(path);
            if let Err(err) = self.logger.write_jsonl(&path) {
                eprintln!("Failed to write test log to {}: {err}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_files_round_trip() {
        let harness = TestHarness::new("nested_files_round_trip");
        let path = harness.create_file("raw_data/deep/artifact.json", "{}");
        assert!(path.exists());
        assert_eq!(harness.read_file("raw_data/deep/artifact.json"), "{}");
        assert_eq!(harness.log().entry_count(), 3);
    }
}
