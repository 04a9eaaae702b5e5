//! In-memory test log, printed when a test fails.
//!
//! Each entry records the time since the harness started, a level, a category
//! (`harness`, `run`, `verify`, ...) and optional key/value context. Files a
//! test wants a reader to inspect are logged as `artifact` entries.

#![allow(dead_code)]

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Schema tag written on every JSONL line.
pub const LOG_SCHEMA: &str = "perfvault.test.log.v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
}

#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    pub t_ms: u64,
    pub level: Level,
    pub category: String,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct JsonLine<'a> {
    schema: &'static str,
    test: &'a str,
    seq: usize,
    #[serde(flatten)]
    entry: &'a Entry,
}

pub struct TestLogger {
    test: String,
    start: Instant,
    entries: Mutex<Vec<Entry>>,
}

impl TestLogger {
    pub fn new(test: impl Into<String>) -> Self {
        Self {
            test: test.into(),
            start: Instant::now(),
            entries: Mutex::new(Vec::new()),
        }
    }

    // Logging continues from `Drop` during a panic, so a poisoned lock is
    // still usable.
    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push<F>(&self, level: Level, category: &str, message: impl Into<String>, f: F)
    where
        F: FnOnce(&mut Vec<(String, String)>),
    {
        let mut context = Vec::new();
        f(&mut context);
        let entry = Entry {
            t_ms: u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX),
            level,
            category: category.to_string(),
            message: message.into(),
            context: context.into_iter().collect(),
        };
        self.entries().push(entry);
    }

    pub fn info(&self, category: &str, message: impl Into<String>) {
        self.push(Level::Info, category, message, |_| {});
    }

    pub fn info_ctx<F>(&self, category: &str, message: impl Into<String>, f: F)
    where
        F: FnOnce(&mut Vec<(String, String)>),
    {
        self.push(Level::Info, category, message, f);
    }

    pub fn debug_ctx<F>(&self, category: &str, message: impl Into<String>, f: F)
    where
        F: FnOnce(&mut Vec<(String, String)>),
    {
        self.push(Level::Debug, category, message, f);
    }

    pub fn record_artifact(&self, name: impl Into<String>, path: &Path) {
        self.push(Level::Info, "artifact", name, |ctx| {
            ctx.push(("path".into(), path.display().to_string()));
        });
    }

    pub fn entry_count(&self) -> usize {
        self.entries().len()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Human-readable dump, one entry per line with indented context.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in self.entries().iter() {
            let level = match entry.level {
                Level::Debug => "DEBUG",
                Level::Info => "INFO ",
            };
            let _ = writeln!(
                out,
                "[{:>5}ms] {level} [{}] {}",
                entry.t_ms, entry.category, entry.message
            );
            for (key, value) in &entry.context {
                let _ = writeln!(out, "            {key} = {value}");
            }
        }
        out
    }

    pub fn to_jsonl(&self) -> String {
        let mut out = String::new();
        for (index, entry) in self.entries().iter().enumerate() {
            let line = JsonLine {
                schema: LOG_SCHEMA,
                test: &self.test,
                seq: index + 1,
                entry,
            };
            if let Ok(json) = serde_json::to_string(&line) {
                out.push_str(&json);
                out.push('\n');
            }
        }
        out
    }

    pub fn write_jsonl(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_jsonl())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonl_lines_carry_schema_and_context() {
        let logger = TestLogger::new("jsonl");
        logger.info_ctx("verify", "versions listed", |ctx| {
            ctx.push(("count".into(), "3".into()));
        });
        logger.record_artifact("drift markdown", Path::new("/tmp/drift.md"));

        let lines: Vec<serde_json::Value> = logger
            .to_jsonl()
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["schema"], LOG_SCHEMA);
        assert_eq!(lines[0]["context"]["count"], "3");
        assert_eq!(lines[1]["category"], "artifact");
        assert_eq!(lines[1]["context"]["path"], "/tmp/drift.md");
        assert_eq!(lines[1]["seq"], 2);
    }

    #[test]
    fn render_indents_context() {
        let logger = TestLogger::new("render");
        logger.debug_ctx("harness", "read file", |ctx| {
            ctx.push(("size".into(), "2 bytes".into()));
        });
        let text = logger.render();
        assert!(text.contains("DEBUG [harness] read file"), "{text}");
        assert!(text.contains("            size = 2 bytes"), "{text}");
    }
}
