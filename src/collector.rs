//! Collector boundary.
//!
//! A collector produces one raw artifact per (model, sequence, source type).
//! How it gets the data is its own business; retries and timeouts live there
//! too. The pipeline treats a failed collection as zero records.

use crate::dataset::SourceType;
use crate::error::{Error, Result};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectRequest {
    pub model: String,
    pub sequence: String,
    pub source: SourceType,
}

impl CollectRequest {
    pub fn new(model: impl Into<String>, sequence: impl Into<String>, source: SourceType) -> Self {
        Self {
            model: model.into(),
            sequence: sequence.into(),
            source,
        }
    }

    /// Every combination of `models`, `sequences` and both source types.
    pub fn matrix(models: &[String], sequences: &[String]) -> Vec<Self> {
        let mut out = Vec::with_capacity(models.len() * sequences.len() * 2);
        for model in models {
            for sequence in sequences {
                for source in SourceType::ALL {
                    out.push(Self::new(model.clone(), sequence.clone(), source));
                }
            }
        }
        out
    }
}

/// A raw artifact as handed over by a collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedArtifact {
    pub label: String,
    /// Backing file, when the artifact lives on disk.
    pub path: Option<PathBuf>,
    pub payload: Vec<u8>,
    pub record_count: usize,
}

impl CollectedArtifact {
    /// Wrap `records` in the standard `{metadata, data}` envelope.
    pub fn from_records(request: &CollectRequest, records: Vec<Value>) -> Result<Self> {
        let record_count = records.len();
        let envelope = json!({
            "metadata": {
                "model": request.model,
                "sequence": request.sequence,
                "data_type": request.source.as_str(),
                "url": format!("collector://{}.json", request.source.as_str()),
                "record_count": record_count,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            },
            "data": records,
        });
        Ok(Self {
            label: artifact_file_name(None, &request.model, &request.sequence, request.source),
            path: None,
            payload: serde_json::to_vec_pretty(&envelope)?,
            record_count,
        })
    }
}

pub trait Collector {
    fn collect(&self, request: &CollectRequest) -> Result<CollectedArtifact>;
}

fn model_safe(model: &str) -> String {
    model.replace([' ', '.'], "_")
}

fn sequence_safe(sequence: &str) -> String {
    sequence.replace(' ', "_").replace('/', "___")
}

/// `{idx:02}_{model}_{sequence}_{source}.json` with filesystem-safe parts.
pub fn artifact_file_name(
    index: Option<usize>,
    model: &str,
    sequence: &str,
    source: SourceType,
) -> String {
    let stem = format!("{}_{}_{}", model_safe(model), sequence_safe(sequence), source.as_str());
    match index {
        Some(index) => format!("{index:02}_{stem}.json"),
        None => format!("{stem}.json"),
    }
}

/// Reads artifacts previously written to a raw data directory.
#[derive(Debug, Clone)]
pub struct DirectoryCollector {
    dir: PathBuf,
}

impl DirectoryCollector {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn find(&self, request: &CollectRequest) -> Result<PathBuf> {
        let wanted = artifact_file_name(None, &request.model, &request.sequence, request.source);
        let mut matches: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| name == wanted || strip_index(name) == Some(wanted.as_str()))
            })
            .collect();
        matches.sort();
        matches.pop().ok_or_else(|| {
            Error::collector(format!(
                "No artifact for {} / {} / {} in {}",
                request.model,
                request.sequence,
                request.source,
                self.dir.display()
            ))
        })
    }
}

/// `"03_rest.json"` -> `"rest.json"`.
fn strip_index(name: &str) -> Option<&str> {
    let (prefix, rest) = name.split_once('_')?;
    (!prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit())).then_some(rest)
}

impl Collector for DirectoryCollector {
    fn collect(&self, request: &CollectRequest) -> Result<CollectedArtifact> {
        let path = self.find(request)?;
        let payload = std::fs::read(&path)?;
        let record_count = serde_json::from_slice::<Value>(&payload)
            .ok()
            .and_then(|v| v.get("data").and_then(Value::as_array).map(Vec::len))
            .unwrap_or(0);
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::debug!(artifact = %label, records = record_count, "Collected artifact from disk");
        Ok(CollectedArtifact {
            label,
            path: Some(path),
            payload,
            record_count,
        })
    }
}
