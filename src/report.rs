//! Run and drift report documents.
//!
//! Both are plain serde structs; each renders to JSON and to markdown and is
//! written with a temp-file-and-rename so a reader never sees half a report.

use crate::archive::VersionId;
use crate::diff::{ChangeSummary, DriftRecord, FieldDelta, FieldStats, ModelChanges, PairDiff, PairOutcome, Thresholds};
use crate::error::{Error, Result};
use crate::join::{CompletenessStats, JoinKey, MatchStats};
use crate::pipeline::PipelineState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub step: PipelineState,
    pub status: StepStatus,
    pub duration_ms: u64,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

impl From<&Error> for ErrorInfo {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionSummary {
    pub requested: usize,
    pub collected: usize,
    pub records: usize,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RejectedArtifact {
    pub label: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub valid: usize,
    pub rejected: Vec<RejectedArtifact>,
    pub removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    pub e2e_records: usize,
    pub interactivity_records: usize,
    pub dropped: Vec<String>,
}

/// Everything a run reports about itself, success or failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub state: PipelineState,
    pub failed_step: Option<PipelineState>,
    pub error: Option<ErrorInfo>,
    pub steps: Vec<StepReport>,
    pub models: Vec<String>,
    pub sequences: Vec<String>,
    pub collection: Option<CollectionSummary>,
    pub validation: Option<ValidationSummary>,
    pub datasets: Option<DatasetSummary>,
    pub match_stats: Option<MatchStats>,
    pub completeness: Option<CompletenessStats>,
    pub merged_records: Option<usize>,
    pub version: Option<VersionId>,
    pub retention_removed: Vec<VersionId>,
    pub warnings: Vec<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.state == PipelineState::Done
    }

    pub fn step(&self, step: PipelineState) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.step == step)
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Pipeline run {}\n", self.run_id);
        let _ = writeln!(out, "- **Started**: {}", self.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(out, "- **Finished**: {}", self.finished_at.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(out, "- **Duration**: {} ms", self.duration_ms);
        let _ = writeln!(out, "- **State**: {}", self.state);
        if let (Some(step), Some(error)) = (self.failed_step, &self.error) {
            let _ = writeln!(out, "- **Failed step**: {step} ({}: {})", error.kind, error.message);
        }
        let _ = writeln!(out, "- **Models**: {}", self.models.join(", "));
        let _ = writeln!(out, "- **Sequences**: {}", self.sequences.join(", "));

        out.push_str("\n## Steps\n\n| Step | Status | Duration (ms) | Detail |\n|---|---|---|---|\n");
        for step in &self.steps {
            let status = match step.status {
                StepStatus::Passed => "passed",
                StepStatus::Failed => "FAILED",
                StepStatus::Skipped => "skipped",
            };
            let _ = writeln!(
                out,
                "| {} | {status} | {} | {} |",
                step.step, step.duration_ms, step.detail
            );
        }

        if let Some(stats) = &self.match_stats {
            out.push_str("\n## Join\n\n");
            let _ = writeln!(out, "- Matched keys: {}", stats.matched_keys);
            let _ = writeln!(out, "- E2E-only keys: {}", stats.e2e_only_keys);
            let _ = writeln!(out, "- Interactivity-only keys: {}", stats.inter_only_keys);
            let _ = writeln!(out, "- Total records: {}", stats.total_records);
            let _ = writeln!(out, "- Match rate: {:.1}%", stats.match_rate());
        }
        if let Some(completeness) = &self.completeness {
            out.push_str("\n### Value field completeness\n\n");
            for (field, stats) in &completeness.value_fields {
                let _ = writeln!(
                    out,
                    "- {field}: {}/{} ({:.1}%)",
                    stats.non_empty, stats.total, stats.completeness
                );
            }
        }
        if let Some(version) = &self.version {
            let _ = writeln!(out, "\n## Archive\n\n- Version: `{version}`");
            for removed in &self.retention_removed {
                let _ = writeln!(out, "- Retention removed: `{removed}`");
            }
        }
        if let Some(validation) = &self.validation {
            if !validation.rejected.is_empty() {
                out.push_str("\n## Rejected artifacts\n\n");
                for rejected in &validation.rejected {
                    let _ = writeln!(out, "- {}: {}", rejected.label, rejected.reason);
                }
            }
        }
        if !self.warnings.is_empty() {
            out.push_str("\n## Warnings\n\n");
            for warning in &self.warnings {
                let _ = writeln!(out, "- {warning}");
            }
        }
        out
    }

    /// Write `pipeline_report_<run_id>.{json,md}` into `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<(PathBuf, PathBuf)> {
        let stem = format!("pipeline_report_{}", self.run_id);
        let json_path = dir.join(format!("{stem}.json"));
        let md_path = dir.join(format!("{stem}.md"));
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        write_atomic(&json_path, json.as_bytes())?;
        write_atomic(&md_path, self.to_markdown().as_bytes())?;
        Ok((json_path, md_path))
    }
}

/// Per-pair section of a drift report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftPairReport {
    pub v1: VersionId,
    pub v2: VersionId,
    pub compared: bool,
    pub skipped_reason: Option<String>,
    pub common_keys: usize,
    pub only_v1: Vec<JoinKey>,
    pub only_v2: Vec<JoinKey>,
    pub significant: Vec<DriftRecord>,
    pub field_stats: BTreeMap<String, FieldStats>,
}

impl DriftPairReport {
    pub fn from_diff(pair: &PairDiff, thresholds: Thresholds) -> Self {
        Self {
            v1: pair.v1.clone(),
            v2: pair.v2.clone(),
            compared: true,
            skipped_reason: None,
            common_keys: pair.diff.common_keys,
            only_v1: pair.diff.only_v1.clone(),
            only_v2: pair.diff.only_v2.clone(),
            significant: pair
                .diff
                .significant(thresholds)
                .into_iter()
                .cloned()
                .collect(),
            field_stats: pair.diff.field_stats(thresholds),
        }
    }

    fn skipped(v1: &VersionId, v2: &VersionId, reason: &str) -> Self {
        Self {
            v1: v1.clone(),
            v2: v2.clone(),
            compared: false,
            skipped_reason: Some(reason.to_string()),
            common_keys: 0,
            only_v1: Vec::new(),
            only_v2: Vec::new(),
            significant: Vec::new(),
            field_stats: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftReport {
    pub generated_at: DateTime<Utc>,
    pub target: String,
    pub thresholds: Thresholds,
    pub pairs: Vec<DriftPairReport>,
    pub by_model: BTreeMap<String, ModelChanges>,
}

impl DriftReport {
    pub fn from_pair(pair: &PairDiff, thresholds: Thresholds) -> Self {
        let mut by_model = BTreeMap::new();
        crate::diff::group_by_model(&mut by_model, &pair.diff, thresholds);
        Self {
            generated_at: Utc::now(),
            target: pair.target.label().to_string(),
            thresholds,
            pairs: vec![DriftPairReport::from_diff(pair, thresholds)],
            by_model,
        }
    }

    pub fn from_summary(summary: &ChangeSummary) -> Self {
        let pairs = summary
            .pairs
            .iter()
            .map(|outcome| match outcome {
                PairOutcome::Compared(pair) => DriftPairReport::from_diff(pair, summary.thresholds),
                PairOutcome::Skipped { v1, v2, reason } => DriftPairReport::skipped(v1, v2, reason),
            })
            .collect();
        Self {
            generated_at: Utc::now(),
            target: summary.target.label().to_string(),
            thresholds: summary.thresholds,
            pairs,
            by_model: summary.by_model.clone(),
        }
    }

    pub fn total_significant(&self) -> usize {
        self.pairs.iter().map(|p| p.significant.len()).sum()
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Drift report ({})\n", self.target);
        let _ = writeln!(
            out,
            "Thresholds: abs > {}, pct > {}%\n",
            self.thresholds.abs, self.thresholds.pct
        );
        for pair in &self.pairs {
            let _ = writeln!(out, "## {} -> {}\n", pair.v1, pair.v2);
            if let Some(reason) = &pair.skipped_reason {
                let _ = writeln!(out, "Skipped: {reason}\n");
                continue;
            }
            let _ = writeln!(out, "- Common keys: {}", pair.common_keys);
            let _ = writeln!(out, "- Only in {}: {}", pair.v1, pair.only_v1.len());
            let _ = writeln!(out, "- Only in {}: {}", pair.v2, pair.only_v2.len());
            let _ = writeln!(out, "- Significant changes: {}\n", pair.significant.len());
            for (field, stats) in &pair.field_stats {
                if stats.changed == 0 {
                    continue;
                }
                let _ = writeln!(
                    out,
                    "- {field}: {} changed, max abs {:.4}, mean abs {:.4}, max pct {}, mean pct {:.2}%",
                    stats.changed,
                    stats.max_abs_diff,
                    stats.mean_abs_diff,
                    format_pct(stats.max_pct_diff),
                    stats.mean_pct_diff
                );
            }
            if !pair.significant.is_empty() {
                out.push('\n');
                for record in pair.significant.iter().take(20) {
                    let _ = writeln!(out, "- `{}`: {}", record.key, describe(record));
                }
                if pair.significant.len() > 20 {
                    let _ = writeln!(out, "- ... {} more", pair.significant.len() - 20);
                }
            }
            out.push('\n');
        }
        if !self.by_model.is_empty() {
            out.push_str("## By model\n\n| Model | Changed records | Fields |\n|---|---|---|\n");
            for (model, changes) in &self.by_model {
                let fields: Vec<String> = changes
                    .field_counts
                    .iter()
                    .map(|(field, count)| {
                        let pct = changes.field_pct.get(field).copied().unwrap_or(0.0);
                        format!("{field} {count} ({pct:.1}%)")
                    })
                    .collect();
                let _ = writeln!(
                    out,
                    "| {model} | {} | {} |",
                    changes.changed_records,
                    fields.join(", ")
                );
            }
        }
        out
    }

    pub fn write_to(&self, dir: &Path, stem: &str) -> Result<(PathBuf, PathBuf)> {
        let json_path = dir.join(format!("{stem}.json"));
        let md_path = dir.join(format!("{stem}.md"));
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        write_atomic(&json_path, json.as_bytes())?;
        write_atomic(&md_path, self.to_markdown().as_bytes())?;
        Ok((json_path, md_path))
    }
}

fn format_pct(pct: f64) -> String {
    if pct.is_infinite() {
        "inf".to_string()
    } else {
        format!("{pct:.2}%")
    }
}

fn describe(record: &DriftRecord) -> String {
    let parts: Vec<String> = record
        .fields
        .iter()
        .filter_map(|(field, delta)| match delta {
            FieldDelta::Absent => None,
            FieldDelta::Added { new } => Some(format!("{field} added {new}")),
            FieldDelta::Removed { old } => Some(format!("{field} removed {old}")),
            FieldDelta::Numeric {
                old,
                new,
                abs_diff,
                pct_diff,
            } if *abs_diff > 0.0 => Some(format!(
                "{field} {old} -> {new} ({})",
                format_pct(*pct_diff)
            )),
            FieldDelta::Numeric { .. } => None,
            FieldDelta::Text { old, new } if old != new => {
                Some(format!("{field} {old:?} -> {new:?}"))
            }
            FieldDelta::Text { .. } => None,
        })
        .collect();
    parts.join("; ")
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
    }

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;

    tmp.persist(path).map_err(|err| {
        Error::archive(format!(
            "Failed to persist report to {}: {}",
            path.display(),
            err.error
        ))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Row, Table};
    use crate::diff::{CompareTarget, compare_tables};
    use crate::join::VALUE_FIELDS;

    fn table(e2e_x: &str) -> Table {
        let mut columns: Vec<String> = crate::join::KEY_FIELDS.iter().map(ToString::to_string).collect();
        columns.extend(VALUE_FIELDS.iter().map(ToString::to_string));
        let row: Row = [
            ("model_name", "M"),
            ("sequence_length", "1k-1k"),
            ("conc", "10"),
            ("hwKey", "h100"),
            ("precision", "fp8"),
            ("tp", "1"),
            ("e2e_x", e2e_x),
        ]
        .into_iter()
        .collect();
        Table {
            columns,
            rows: vec![row],
        }
    }

    fn sample_report() -> RunReport {
        let now = Utc::now();
        RunReport {
            run_id: "20250101_000000".to_string(),
            started_at: now,
            finished_at: now,
            duration_ms: 12,
            state: PipelineState::Failed,
            failed_step: Some(PipelineState::Archiving),
            error: Some(ErrorInfo::from(&Error::lock("Timed out waiting for archive lock"))),
            steps: vec![StepReport {
                step: PipelineState::Archiving,
                status: StepStatus::Failed,
                duration_ms: 5,
                detail: "Lock error".to_string(),
            }],
            models: vec!["M".to_string()],
            sequences: vec!["1K / 1K".to_string()],
            collection: None,
            validation: None,
            datasets: None,
            match_stats: Some(MatchStats {
                matched_keys: 1,
                e2e_only_keys: 1,
                inter_only_keys: 0,
                total_records: 2,
            }),
            completeness: None,
            merged_records: Some(2),
            version: None,
            retention_removed: Vec::new(),
            warnings: vec!["Merged table has 2 records, expected at least 1000".to_string()],
        }
    }

    #[test]
    fn run_report_markdown_names_failed_step() {
        let md = sample_report().to_markdown();
        assert!(md.contains("**Failed step**: archiving (lock:"), "{md}");
        assert!(md.contains("Match rate: 50.0%"));
        assert!(md.contains("## Warnings"));
    }

    #[test]
    fn run_report_writes_json_and_markdown() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (json_path, md_path) = sample_report().write_to(temp.path()).expect("write");
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(json_path).expect("read")).expect("parse");
        assert_eq!(json["state"], "failed");
        assert_eq!(json["failed_step"], "archiving");
        assert_eq!(json["error"]["kind"], "lock");
        assert!(md_path.is_file());
    }

    #[test]
    fn drift_report_lists_significant_records() {
        let diff = compare_tables(&table("5.0"), &table("5.01"), &VALUE_FIELDS);
        let pair = PairDiff {
            v1: VersionId::parse("20250101_000000").expect("id"),
            v2: VersionId::parse("20250102_000000").expect("id"),
            target: CompareTarget::Merged,
            diff,
        };
        let report = DriftReport::from_pair(&pair, Thresholds::default());
        assert_eq!(report.total_significant(), 1);
        assert_eq!(report.by_model["M"].changed_records, 1);

        let md = report.to_markdown();
        assert!(md.contains("e2e_x 5 -> 5.01"), "{md}");
        assert!(md.contains("| M | 1 |"));
    }

    #[test]
    fn single_pair_report_carries_field_percentages() {
        let diff = compare_tables(&table("5.0"), &table("6.0"), &VALUE_FIELDS);
        let pair = PairDiff {
            v1: VersionId::parse("20250101_000000").expect("id"),
            v2: VersionId::parse("20250102_000000").expect("id"),
            target: CompareTarget::Merged,
            diff,
        };
        let report = DriftReport::from_pair(&pair, Thresholds::default());
        assert_eq!(report.by_model["M"].field_pct.get("e2e_x"), Some(&100.0));

        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["by_model"]["M"]["field_pct"]["e2e_x"], 100.0);
        let md = report.to_markdown();
        assert!(md.contains("e2e_x 1 (100.0%)"), "{md}");
    }
}
