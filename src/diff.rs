//! Version-to-version drift detection.
//!
//! Two versions are compared key by key. For every key present in both, each
//! value field yields a [`FieldDelta`]; rows sharing a key are paired in
//! order. Keys present on one side only are coverage drift and are reported
//! separately from value drift.

use crate::archive::{Archive, ArtifactKind, VersionId};
use crate::dataset::{SourceType, Table};
use crate::error::{Error, Result};
use crate::join::{JoinKey, VALUE_FIELDS, index_rows};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Strict significance thresholds: a field is significant when
/// `abs_diff > abs` or `pct_diff > pct`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub abs: f64,
    pub pct: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            abs: crate::config::DEFAULT_ABS_THRESHOLD,
            pct: crate::config::DEFAULT_PCT_THRESHOLD,
        }
    }
}

fn serialize_pct<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    if value.is_infinite() {
        serializer.serialize_str(if *value > 0.0 { "inf" } else { "-inf" })
    } else {
        serializer.serialize_f64(*value)
    }
}

/// Percentage change relative to `old`. Zero over zero is 0, anything else
/// over zero is `+inf`.
pub fn pct_diff(old: f64, abs_diff: f64) -> f64 {
    if old == 0.0 {
        if abs_diff == 0.0 { 0.0 } else { f64::INFINITY }
    } else {
        abs_diff / old.abs() * 100.0
    }
}

/// How one value field changed between two versions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FieldDelta {
    /// Empty in both versions.
    Absent,
    Added {
        new: String,
    },
    Removed {
        old: String,
    },
    Numeric {
        old: f64,
        new: f64,
        abs_diff: f64,
        #[serde(serialize_with = "serialize_pct")]
        pct_diff: f64,
    },
    /// At least one side is not a number; compared literally.
    Text {
        old: String,
        new: String,
    },
}

impl FieldDelta {
    pub fn compare(old: Option<&str>, new: Option<&str>) -> Self {
        match (old, new) {
            (None, None) => Self::Absent,
            (None, Some(new)) => Self::Added {
                new: new.to_string(),
            },
            (Some(old), None) => Self::Removed {
                old: old.to_string(),
            },
            (Some(old_text), Some(new_text)) => numeric_delta(old_text, new_text)
                .unwrap_or_else(|| Self::Text {
                    old: old_text.to_string(),
                    new: new_text.to_string(),
                }),
        }
    }

    /// One-sided absence and literal text mismatch always count; numeric
    /// deltas count past either threshold.
    pub fn is_significant(&self, thresholds: Thresholds) -> bool {
        match self {
            Self::Absent => false,
            Self::Added { .. } | Self::Removed { .. } => true,
            Self::Numeric {
                abs_diff, pct_diff, ..
            } => *abs_diff > thresholds.abs || *pct_diff > thresholds.pct,
            Self::Text { old, new } => old != new,
        }
    }

    pub const fn abs_diff(&self) -> Option<f64> {
        match self {
            Self::Numeric { abs_diff, .. } => Some(*abs_diff),
            _ => None,
        }
    }

    pub const fn pct_diff(&self) -> Option<f64> {
        match self {
            Self::Numeric { pct_diff, .. } => Some(*pct_diff),
            _ => None,
        }
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    let text = text.trim();
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

/// Both cells numeric: differences are taken on the decimal text so that
/// `5.001 - 5.0` is exactly `0.001`. Cells outside the decimal range fall
/// back to float arithmetic.
fn numeric_delta(old_text: &str, new_text: &str) -> Option<FieldDelta> {
    let old = parse_number(old_text)?;
    let new = parse_number(new_text)?;
    let (abs_diff, pct) = parse_decimal(old_text)
        .zip(parse_decimal(new_text))
        .and_then(|(a, b)| exact_diff(a, b))
        .unwrap_or_else(|| {
            let abs_diff = (new - old).abs();
            (abs_diff, pct_diff(old, abs_diff))
        });
    Some(FieldDelta::Numeric {
        old,
        new,
        abs_diff,
        pct_diff: pct,
    })
}

fn exact_diff(old: Decimal, new: Decimal) -> Option<(f64, f64)> {
    let abs_diff = new.checked_sub(old)?.abs();
    let pct = if old.is_zero() {
        if abs_diff.is_zero() { 0.0 } else { f64::INFINITY }
    } else {
        abs_diff
            .checked_div(old.abs())?
            .checked_mul(Decimal::ONE_HUNDRED)?
            .normalize()
            .to_f64()?
    };
    Some((abs_diff.normalize().to_f64()?, pct))
}

/// Field-level comparison of one key between two versions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftRecord {
    pub key: JoinKey,
    /// Position among the rows sharing `key`.
    pub pairing: usize,
    pub fields: BTreeMap<String, FieldDelta>,
}

impl DriftRecord {
    pub fn is_significant(&self, thresholds: Thresholds) -> bool {
        self.fields.values().any(|d| d.is_significant(thresholds))
    }

    pub fn field(&self, name: &str) -> Option<&FieldDelta> {
        self.fields.get(name)
    }
}

/// Result of comparing one table across two versions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableDiff {
    pub value_fields: Vec<String>,
    pub common_keys: usize,
    pub only_v1: Vec<JoinKey>,
    pub only_v2: Vec<JoinKey>,
    /// Common keys whose row counts differ; unpaired rows are not compared.
    pub row_count_mismatches: usize,
    pub records: Vec<DriftRecord>,
}

/// Compare `v1` against `v2` on `value_fields`.
pub fn compare_tables(v1: &Table, v2: &Table, value_fields: &[&str]) -> TableDiff {
    let index1 = index_rows(&v1.rows);
    let index2 = index_rows(&v2.rows);

    let mut diff = TableDiff {
        value_fields: value_fields.iter().map(ToString::to_string).collect(),
        ..TableDiff::default()
    };

    for (key, rows1) in &index1 {
        let Some(rows2) = index2.get(key) else {
            diff.only_v1.push(key.clone());
            continue;
        };
        diff.common_keys += 1;
        if rows1.len() != rows2.len() {
            diff.row_count_mismatches += 1;
            tracing::debug!(
                key = %key,
                v1 = rows1.len(),
                v2 = rows2.len(),
                "Row count differs for key"
            );
        }
        for (pairing, (row1, row2)) in rows1.iter().zip(rows2).enumerate() {
            let fields = value_fields
                .iter()
                .map(|field| {
                    (
                        (*field).to_string(),
                        FieldDelta::compare(row1.get(field), row2.get(field)),
                    )
                })
                .collect();
            diff.records.push(DriftRecord {
                key: key.clone(),
                pairing,
                fields,
            });
        }
    }
    diff.only_v2 = index2
        .keys()
        .filter(|key| !index1.contains_key(*key))
        .cloned()
        .collect();
    diff
}

/// Ordering for reports: descending percentage change of `field` (infinite
/// first, non-numeric last), then key.
fn by_pct_desc(field: &str) -> impl Fn(&&DriftRecord, &&DriftRecord) -> Ordering + '_ {
    move |a: &&DriftRecord, b: &&DriftRecord| {
        let pa = a.field(field).and_then(FieldDelta::pct_diff);
        let pb = b.field(field).and_then(FieldDelta::pct_diff);
        match (pa, pb) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| a.key.cmp(&b.key))
        .then_with(|| a.pairing.cmp(&b.pairing))
    }
}

/// Aggregate over the significant records of one field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldStats {
    pub changed: usize,
    pub max_abs_diff: f64,
    pub mean_abs_diff: f64,
    #[serde(serialize_with = "serialize_pct")]
    pub max_pct_diff: f64,
    /// Mean over finite percentages only.
    pub mean_pct_diff: f64,
}

impl TableDiff {
    /// Significant records, ordered by the first value field's percentage change.
    pub fn significant(&self, thresholds: Thresholds) -> Vec<&DriftRecord> {
        let mut out: Vec<&DriftRecord> = self
            .records
            .iter()
            .filter(|r| r.is_significant(thresholds))
            .collect();
        if let Some(primary) = self.value_fields.first() {
            out.sort_by(by_pct_desc(primary));
        }
        out
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn field_stats(&self, thresholds: Thresholds) -> BTreeMap<String, FieldStats> {
        let mut stats = BTreeMap::new();
        for field in &self.value_fields {
            let deltas: Vec<&FieldDelta> = self
                .records
                .iter()
                .filter_map(|r| r.field(field))
                .filter(|d| d.is_significant(thresholds))
                .collect();
            let abs: Vec<f64> = deltas.iter().filter_map(|d| d.abs_diff()).collect();
            let pct: Vec<f64> = deltas.iter().filter_map(|d| d.pct_diff()).collect();
            let finite_pct: Vec<f64> = pct.iter().copied().filter(|p| p.is_finite()).collect();
            let mean = |values: &[f64]| {
                if values.is_empty() {
                    0.0
                } else {
                    values.iter().sum::<f64>() / values.len() as f64
                }
            };
            stats.insert(
                field.clone(),
                FieldStats {
                    changed: deltas.len(),
                    max_abs_diff: abs.iter().copied().fold(0.0, f64::max),
                    mean_abs_diff: mean(&abs),
                    max_pct_diff: pct.iter().copied().fold(0.0, f64::max),
                    mean_pct_diff: mean(&finite_pct),
                },
            );
        }
        stats
    }
}

/// Which table of a version to compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareTarget {
    Merged,
    Partition(SourceType),
}

impl CompareTarget {
    pub const fn artifact(self) -> ArtifactKind {
        match self {
            Self::Merged => ArtifactKind::Merged,
            Self::Partition(SourceType::E2e) => ArtifactKind::E2e,
            Self::Partition(SourceType::Interactivity) => ArtifactKind::Interactivity,
        }
    }

    pub fn value_fields(self) -> &'static [&'static str] {
        match self {
            Self::Merged => &VALUE_FIELDS,
            Self::Partition(_) => &crate::join::SOURCE_VALUE_FIELDS,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Merged => "merged",
            Self::Partition(source) => source.as_str(),
        }
    }
}

/// One version pair compared on one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairDiff {
    pub v1: VersionId,
    pub v2: VersionId,
    pub target: CompareTarget,
    pub diff: TableDiff,
}

/// Load both versions' `target` table and compare them.
pub fn compare_versions(
    archive: &Archive,
    v1: &VersionId,
    v2: &VersionId,
    target: CompareTarget,
) -> Result<PairDiff> {
    if v1 == v2 {
        tracing::debug!(version = %v1, "Comparing a version with itself");
    }
    let kind = target.artifact();
    let t1 = archive.load_table(v1, kind)?;
    let t2 = archive.load_table(v2, kind)?;
    let diff = compare_tables(&t1, &t2, target.value_fields());
    tracing::info!(
        v1 = %v1,
        v2 = %v2,
        table = target.label(),
        common = diff.common_keys,
        only_v1 = diff.only_v1.len(),
        only_v2 = diff.only_v2.len(),
        "Compared versions"
    );
    Ok(PairDiff {
        v1: v1.clone(),
        v2: v2.clone(),
        target,
        diff,
    })
}

/// Significant changes attributed to one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelChanges {
    pub changed_records: usize,
    pub field_counts: BTreeMap<String, usize>,
    /// Share of `changed_records` in which each field changed, in percent.
    pub field_pct: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PairOutcome {
    Compared(PairDiff),
    Skipped {
        v1: VersionId,
        v2: VersionId,
        reason: String,
    },
}

/// Grouped change summary over consecutive version pairs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSummary {
    pub target: CompareTarget,
    pub thresholds: Thresholds,
    pub versions: Vec<VersionId>,
    pub pairs: Vec<PairOutcome>,
    pub by_model: BTreeMap<String, ModelChanges>,
}

impl ChangeSummary {
    pub fn compared(&self) -> impl Iterator<Item = &PairDiff> {
        self.pairs.iter().filter_map(|p| match p {
            PairOutcome::Compared(diff) => Some(diff),
            PairOutcome::Skipped { .. } => None,
        })
    }

    pub fn skipped(&self) -> usize {
        self.pairs
            .iter()
            .filter(|p| matches!(p, PairOutcome::Skipped { .. }))
            .count()
    }
}

/// Fold the significant records of `diff` into per-model counts and
/// recompute each model's field percentages.
pub fn group_by_model(
    by_model: &mut BTreeMap<String, ModelChanges>,
    diff: &TableDiff,
    thresholds: Thresholds,
) {
    for record in diff.records.iter().filter(|r| r.is_significant(thresholds)) {
        let entry = by_model.entry(record.key.model_name.clone()).or_default();
        entry.changed_records += 1;
        for (field, delta) in &record.fields {
            if delta.is_significant(thresholds) {
                *entry.field_counts.entry(field.clone()).or_default() += 1;
            }
        }
    }
    refresh_percentages(by_model);
}

#[allow(clippy::cast_precision_loss)]
fn refresh_percentages(by_model: &mut BTreeMap<String, ModelChanges>) {
    for changes in by_model.values_mut() {
        let total = changes.changed_records;
        changes.field_pct = changes
            .field_counts
            .iter()
            .map(|(field, count)| {
                let pct = if total == 0 {
                    0.0
                } else {
                    *count as f64 / total as f64 * 100.0
                };
                (field.clone(), pct)
            })
            .collect();
    }
}

/// Compare each consecutive pair of `versions` (oldest first).
///
/// A pair whose tables cannot be loaded is logged and skipped.
pub fn summarize_versions(
    archive: &Archive,
    versions: &[VersionId],
    target: CompareTarget,
    thresholds: Thresholds,
) -> Result<ChangeSummary> {
    if versions.len() < 2 {
        return Err(Error::diff(format!(
            "Need at least two versions to compare, found {}",
            versions.len()
        )));
    }

    let mut pairs = Vec::with_capacity(versions.len() - 1);
    let mut by_model = BTreeMap::new();
    for window in versions.windows(2) {
        let (v1, v2) = (&window[0], &window[1]);
        match compare_versions(archive, v1, v2, target) {
            Ok(pair) => {
                group_by_model(&mut by_model, &pair.diff, thresholds);
                pairs.push(PairOutcome::Compared(pair));
            }
            Err(err) => {
                tracing::warn!(v1 = %v1, v2 = %v2, error = %err, "Skipping version pair");
                pairs.push(PairOutcome::Skipped {
                    v1: v1.clone(),
                    v2: v2.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    Ok(ChangeSummary {
        target,
        thresholds,
        versions: versions.to_vec(),
        pairs,
        by_model,
    })
}
