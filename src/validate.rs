//! Raw artifact validation.
//!
//! [`validate_payload`] is a pure check over the raw bytes of one artifact. It
//! never fails: malformed JSON is reported as [`RejectReason::Decode`]. The
//! directory scan builds a [`CleanupReport`] without touching the files;
//! deleting rejected artifacts is a separate, explicit call.

use crate::error::Result;
use crate::record::ArtifactMetadata;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Fields whose presence marks a data point as a benchmark measurement.
pub const SIGNAL_FIELDS: &[&str] = &["conc", "tpPerGpu", "hwKey", "precision"];

/// Why an artifact was rejected. Variants are listed in check order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    NotAnObject,
    MissingEnvelope { field: String },
    EmptyData,
    NoSignalPoints { total_points: usize },
    TooSmall { bytes: usize, threshold: usize },
    Decode { message: String },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "root is not a JSON object"),
            Self::MissingEnvelope { field } => write!(f, "missing `{field}` field"),
            Self::EmptyData => write!(f, "data field is empty"),
            Self::NoSignalPoints { total_points } => write!(
                f,
                "no valid data points with numeric values ({total_points} points)"
            ),
            Self::TooSmall { bytes, threshold } => {
                write!(f, "payload too small ({bytes} bytes < {threshold})")
            }
            Self::Decode { message } => write!(f, "JSON decode error: {message}"),
        }
    }
}

/// Outcome of validating one artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid {
        bytes: usize,
        total_points: usize,
        valid_points: usize,
        metadata: ArtifactMetadata,
    },
    Rejected(RejectReason),
}

impl Validation {
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    pub const fn reason(&self) -> Option<&RejectReason> {
        match self {
            Self::Valid { .. } => None,
            Self::Rejected(reason) => Some(reason),
        }
    }
}

/// Validate a raw artifact payload.
pub fn validate_payload(payload: &[u8], min_bytes: usize) -> Validation {
    let value: Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(err) => {
            return Validation::Rejected(RejectReason::Decode {
                message: err.to_string(),
            });
        }
    };
    validate_value(&value, payload.len(), min_bytes)
}

/// Validate an already decoded payload of `bytes` serialized length.
pub fn validate_value(value: &Value, bytes: usize, min_bytes: usize) -> Validation {
    let Some(root) = value.as_object() else {
        return Validation::Rejected(RejectReason::NotAnObject);
    };

    for field in ["metadata", "data"] {
        if !root.contains_key(field) {
            return Validation::Rejected(RejectReason::MissingEnvelope {
                field: field.to_string(),
            });
        }
    }

    let data = &root["data"];
    if is_empty_container(data) {
        return Validation::Rejected(RejectReason::EmptyData);
    }

    let points: &[Value] = data.as_array().map_or(&[], Vec::as_slice);
    let valid_points = points.iter().filter(|p| is_signal_point(p)).count();
    if valid_points == 0 {
        return Validation::Rejected(RejectReason::NoSignalPoints {
            total_points: container_len(data),
        });
    }

    if bytes < min_bytes {
        return Validation::Rejected(RejectReason::TooSmall {
            bytes,
            threshold: min_bytes,
        });
    }

    let metadata = root
        .get("metadata")
        .and_then(|m| serde_json::from_value::<ArtifactMetadata>(m.clone()).ok())
        .unwrap_or_default();

    Validation::Valid {
        bytes,
        total_points: points.len(),
        valid_points,
        metadata,
    }
}

fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
    }
}

fn container_len(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        _ => 1,
    }
}

/// A point counts when it names a signal field and carries any strictly
/// positive number.
fn is_signal_point(point: &Value) -> bool {
    let Some(fields) = point.as_object() else {
        return false;
    };
    if !SIGNAL_FIELDS.iter().any(|f| fields.contains_key(*f)) {
        return false;
    }
    fields
        .values()
        .any(|v| v.as_f64().is_some_and(|n| n > 0.0))
}

/// Per-file line of a cleanup report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVerdict {
    pub filename: String,
    pub path: PathBuf,
    pub bytes: usize,
    pub model: Option<String>,
    pub sequence: Option<String>,
    pub valid_points: usize,
    pub reason: Option<RejectReason>,
}

impl FileVerdict {
    pub const fn is_valid(&self) -> bool {
        self.reason.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStats {
    pub files: usize,
    pub bytes: usize,
    pub data_points: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupSummary {
    pub total_files: usize,
    pub valid_files: usize,
    pub invalid_files: usize,
    pub removed_files: usize,
    pub total_bytes: usize,
    pub valid_bytes: usize,
    pub invalid_bytes: usize,
}

/// Result of validating every artifact in a raw data directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub summary: CleanupSummary,
    pub model_stats: BTreeMap<String, ModelStats>,
    pub files: Vec<FileVerdict>,
}

impl CleanupReport {
    pub fn valid(&self) -> impl Iterator<Item = &FileVerdict> {
        self.files.iter().filter(|f| f.is_valid())
    }

    pub fn rejected(&self) -> impl Iterator<Item = &FileVerdict> {
        self.files.iter().filter(|f| !f.is_valid())
    }

    fn push(&mut self, verdict: FileVerdict) {
        let summary = &mut self.summary;
        summary.total_files += 1;
        summary.total_bytes += verdict.bytes;
        if verdict.is_valid() {
            summary.valid_files += 1;
            summary.valid_bytes += verdict.bytes;
            let model = verdict
                .model
                .clone()
                .unwrap_or_else(|| "Unknown".to_string());
            let stats = self.model_stats.entry(model).or_default();
            stats.files += 1;
            stats.bytes += verdict.bytes;
            stats.data_points += verdict.valid_points;
        } else {
            summary.invalid_files += 1;
            summary.invalid_bytes += verdict.bytes;
        }
        self.files.push(verdict);
    }
}

/// Raw artifact files in `dir`, sorted by name. Report and readme files are
/// skipped.
pub fn artifact_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.contains("README") || name.contains("summary") || name.contains("report") {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

/// Validate every artifact in `dir`. Files are only read.
pub fn scan_directory(dir: &Path, min_bytes: usize) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();
    for path in artifact_files(dir)? {
        let payload = std::fs::read(&path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let verdict = match validate_payload(&payload, min_bytes) {
            Validation::Valid {
                bytes,
                valid_points,
                metadata,
                ..
            } => FileVerdict {
                filename,
                path,
                bytes,
                model: metadata.model,
                sequence: metadata.sequence,
                valid_points,
                reason: None,
            },
            Validation::Rejected(reason) => {
                tracing::debug!(file = %filename, %reason, "Rejected raw artifact");
                FileVerdict {
                    filename,
                    path,
                    bytes: payload.len(),
                    model: None,
                    sequence: None,
                    valid_points: 0,
                    reason: Some(reason),
                }
            }
        };
        report.push(verdict);
    }
    tracing::info!(
        dir = %dir.display(),
        total = report.summary.total_files,
        valid = report.summary.valid_files,
        invalid = report.summary.invalid_files,
        "Validated raw artifacts"
    );
    Ok(report)
}

/// Delete the rejected files listed in `report` and record the count.
/// Files that fail to delete are logged and left in place.
pub fn remove_rejected(report: &mut CleanupReport) -> usize {
    let mut removed = 0;
    for verdict in report.files.iter().filter(|f| !f.is_valid()) {
        match std::fs::remove_file(&verdict.path) {
            Ok(()) => {
                removed += 1;
                tracing::info!(file = %verdict.filename, "Removed invalid artifact");
            }
            Err(err) => {
                tracing::warn!(file = %verdict.filename, error = %err, "Failed to remove invalid artifact");
            }
        }
    }
    report.summary.removed_files = removed;
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn padded(mut value: Value, target: usize) -> Vec<u8> {
        // Pad the metadata so the payload crosses the size threshold.
        let base = value.to_string().len();
        if base < target {
            value["metadata"]["padding"] = json!("x".repeat(target - base));
        }
        value.to_string().into_bytes()
    }

    fn good_payload() -> Vec<u8> {
        padded(
            json!({
                "metadata": { "model": "M", "sequence": "1K / 1K" },
                "data": [ { "hwKey": "h100", "conc": 8, "x": 1.5 } ]
            }),
            2048,
        )
    }

    #[test]
    fn accepts_well_formed_payload() {
        let outcome = validate_payload(&good_payload(), 1024);
        let Validation::Valid {
            valid_points,
            total_points,
            metadata,
            ..
        } = outcome
        else {
            panic!("expected valid, got {outcome:?}");
        };
        assert_eq!(valid_points, 1);
        assert_eq!(total_points, 1);
        assert_eq!(metadata.model.as_deref(), Some("M"));
    }

    #[test]
    fn decode_failure_is_a_rejection() {
        let outcome = validate_payload(b"{ truncated", 1024);
        assert!(matches!(
            outcome,
            Validation::Rejected(RejectReason::Decode { .. })
        ));
    }

    #[test]
    fn rejection_reasons_follow_priority_order() {
        let cases = [
            (json!([1, 2]), RejectReason::NotAnObject),
            (
                json!({ "data": [] }),
                RejectReason::MissingEnvelope {
                    field: "metadata".to_string(),
                },
            ),
            (
                json!({ "metadata": {} }),
                RejectReason::MissingEnvelope {
                    field: "data".to_string(),
                },
            ),
            (json!({ "metadata": {}, "data": [] }), RejectReason::EmptyData),
            (
                json!({ "metadata": {}, "data": [ { "conc": 0, "hwKey": "h100" } ] }),
                RejectReason::NoSignalPoints { total_points: 1 },
            ),
            (
                json!({ "metadata": {}, "data": [ { "x": 5.0 } ] }),
                RejectReason::NoSignalPoints { total_points: 1 },
            ),
        ];
        for (value, expected) in cases {
            // Large threshold: size must never win over earlier reasons.
            let outcome = validate_value(&value, 10, 1_000_000);
            assert_eq!(outcome, Validation::Rejected(expected), "input {value}");
        }
    }

    #[test]
    fn small_payload_with_valid_points_is_rejected_last() {
        let payload = json!({
            "metadata": {},
            "data": [ { "conc": 4, "tpPerGpu": 12.5 } ]
        })
        .to_string();
        let outcome = validate_payload(payload.as_bytes(), 1024);
        assert_eq!(
            outcome,
            Validation::Rejected(RejectReason::TooSmall {
                bytes: payload.len(),
                threshold: 1024,
            })
        );
    }

    #[test]
    fn directory_scan_reports_without_deleting() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("01_good.json"), good_payload()).expect("write");
        std::fs::write(temp.path().join("02_bad.json"), b"{}").expect("write");
        std::fs::write(temp.path().join("summary.json"), b"{}").expect("write");
        std::fs::write(temp.path().join("notes.txt"), b"hi").expect("write");

        let mut report = scan_directory(temp.path(), 1024).expect("scan");
        assert_eq!(report.summary.total_files, 2);
        assert_eq!(report.summary.valid_files, 1);
        assert_eq!(report.summary.invalid_files, 1);
        assert_eq!(report.model_stats["M"].files, 1);
        assert!(temp.path().join("02_bad.json").exists());

        assert_eq!(remove_rejected(&mut report), 1);
        assert_eq!(report.summary.removed_files, 1);
        assert!(!temp.path().join("02_bad.json").exists());
        assert!(temp.path().join("01_good.json").exists());
    }
}
