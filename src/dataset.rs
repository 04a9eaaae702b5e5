//! Flat tables and the dataset builder.
//!
//! Artifacts are partitioned by [`SourceType`], each partition is flattened
//! over its own column union, and every row gains `model_name` and
//! `sequence_length` from the artifact envelope.

use crate::error::Result;
use crate::flatten;
use crate::record::{ArtifactMetadata, RawArtifact, Record};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{Read, Write};

pub const MODEL_COLUMN: &str = "model_name";
pub const SEQUENCE_COLUMN: &str = "sequence_length";

/// One flat row: column name to rendered cell. Absent and empty are the same.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(BTreeMap<String, String>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.0.insert(column.into(), value.into());
    }

    /// Non-empty cell value.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0
            .get(column)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Cell value, empty when missing.
    pub fn raw(&self, column: &str) -> &str {
        self.0.get(column).map_or("", String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A column-uniform table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Distinct non-empty values of `column`.
    pub fn distinct(&self, column: &str) -> BTreeSet<&str> {
        self.rows.iter().filter_map(|row| row.get(column)).collect()
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(&self.columns)?;
        for row in &self.rows {
            csv.write_record(self.columns.iter().map(|c| row.raw(c)))?;
        }
        csv.flush()?;
        Ok(())
    }

    pub fn read_csv<R: Read>(reader: R) -> Result<Self> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);
        let columns: Vec<String> = csv.headers()?.iter().map(ToString::to_string).collect();
        let mut rows = Vec::new();
        for record in csv.records() {
            let record = record?;
            rows.push(
                columns
                    .iter()
                    .zip(record.iter())
                    .map(|(c, v)| (c.clone(), v.to_string()))
                    .collect(),
            );
        }
        Ok(Self { columns, rows })
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        Ok(buf)
    }
}

/// Which logical source an artifact belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    E2e,
    Interactivity,
}

impl SourceType {
    pub const ALL: [Self; 2] = [Self::E2e, Self::Interactivity];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::E2e => "e2e",
            Self::Interactivity => "interactivity",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "e2e" => Some(Self::E2e),
            "interactivity" => Some(Self::Interactivity),
            _ => None,
        }
    }

    /// The url marker decides; `data_type` is the fallback.
    pub fn infer(metadata: &ArtifactMetadata) -> Option<Self> {
        if let Some(url) = metadata.url.as_deref() {
            if url.contains("interactivity.json") {
                return Some(Self::Interactivity);
            }
            if url.contains("e2e.json") {
                return Some(Self::E2e);
            }
        }
        metadata.data_type.as_deref().and_then(Self::parse)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical sequence form: `"1K / 8K"` becomes `"1k-8k"`.
pub fn normalize_sequence(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .map(|c| if c == '/' { '-' } else { c })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSummary {
    pub files: usize,
    pub records: usize,
    pub columns: usize,
}

/// The two per-run datasets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Datasets {
    pub e2e: Table,
    pub interactivity: Table,
    pub e2e_summary: PartitionSummary,
    pub interactivity_summary: PartitionSummary,
    /// Labels of artifacts whose source type could not be determined.
    pub dropped: Vec<String>,
}

impl Datasets {
    pub fn table(&self, source: SourceType) -> &Table {
        match source {
            SourceType::E2e => &self.e2e,
            SourceType::Interactivity => &self.interactivity,
        }
    }
}

/// Partition `artifacts` by source type and flatten each partition.
pub fn build_datasets(artifacts: &[RawArtifact]) -> Datasets {
    let mut partitions: BTreeMap<SourceType, Vec<&RawArtifact>> = BTreeMap::new();
    let mut dropped = Vec::new();
    for artifact in artifacts {
        if let Some(source) = SourceType::infer(&artifact.metadata) {
            partitions.entry(source).or_default().push(artifact);
        } else {
            tracing::warn!(artifact = %artifact.label, "Unknown source type; artifact dropped");
            dropped.push(artifact.label.clone());
        }
    }

    let e2e_files = partitions.remove(&SourceType::E2e).unwrap_or_default();
    let inter_files = partitions
        .remove(&SourceType::Interactivity)
        .unwrap_or_default();
    if e2e_files.len() != inter_files.len() {
        tracing::warn!(
            e2e = e2e_files.len(),
            interactivity = inter_files.len(),
            "Partition file counts differ"
        );
    }

    let (e2e, e2e_summary) = build_partition(SourceType::E2e, &e2e_files);
    let (interactivity, interactivity_summary) =
        build_partition(SourceType::Interactivity, &inter_files);

    Datasets {
        e2e,
        interactivity,
        e2e_summary,
        interactivity_summary,
        dropped,
    }
}

fn build_partition(source: SourceType, artifacts: &[&RawArtifact]) -> (Table, PartitionSummary) {
    let records: Vec<&Record> = artifacts.iter().flat_map(|a| &a.records).collect();
    let data_columns = flatten::discover_columns(records.iter().copied());

    let mut columns = vec![MODEL_COLUMN.to_string(), SEQUENCE_COLUMN.to_string()];
    columns.extend(
        data_columns
            .iter()
            .filter(|c| c.as_str() != MODEL_COLUMN && c.as_str() != SEQUENCE_COLUMN)
            .cloned(),
    );

    let mut table = Table::new(columns);
    for artifact in artifacts {
        let model = artifact.metadata.model.as_deref().unwrap_or("Unknown");
        let sequence = normalize_sequence(artifact.metadata.sequence.as_deref().unwrap_or("Unknown"));
        for record in &artifact.records {
            let mut row = flatten::flatten_record(record, &data_columns);
            row.set(MODEL_COLUMN, model);
            row.set(SEQUENCE_COLUMN, sequence.clone());
            table.rows.push(row);
        }
        tracing::debug!(
            source = %source,
            artifact = %artifact.label,
            records = artifact.records.len(),
            "Flattened artifact"
        );
    }

    let summary = PartitionSummary {
        files: artifacts.len(),
        records: table.len(),
        columns: table.columns.len(),
    };
    tracing::info!(
        source = %source,
        files = summary.files,
        records = summary.records,
        columns = summary.columns,
        "Built dataset"
    );
    (table, summary)
}
