//! Composite-key outer join of the e2e and interactivity datasets.
//!
//! Rows are indexed by [`JoinKey`]. A key may map to several rows; duplicates
//! are kept and matched keys produce the full cross product of their rows.

use crate::dataset::{MODEL_COLUMN, Row, SEQUENCE_COLUMN, Table};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Columns that identify one logical measurement, in key order.
pub const KEY_FIELDS: [&str; 6] = [
    MODEL_COLUMN,
    SEQUENCE_COLUMN,
    "conc",
    "hwKey",
    "precision",
    "tp",
];

/// Source value columns, renamed per side in the merged table.
pub const SOURCE_VALUE_FIELDS: [&str; 2] = ["x", "y"];

pub const E2E_X: &str = "e2e_x";
pub const E2E_Y: &str = "e2e_y";
pub const INTER_X: &str = "inter_x";
pub const INTER_Y: &str = "inter_y";

/// The four value columns of a merged row.
pub const VALUE_FIELDS: [&str; 4] = [E2E_X, E2E_Y, INTER_X, INTER_Y];

const KEY_DELIMITER: char = '|';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JoinKey {
    pub model_name: String,
    pub sequence_length: String,
    pub conc: String,
    pub hw_key: String,
    pub precision: String,
    pub tp: String,
}

impl JoinKey {
    /// Missing key columns become empty components.
    pub fn from_row(row: &Row) -> Self {
        Self {
            model_name: row.raw(KEY_FIELDS[0]).to_string(),
            sequence_length: row.raw(KEY_FIELDS[1]).to_string(),
            conc: row.raw(KEY_FIELDS[2]).to_string(),
            hw_key: row.raw(KEY_FIELDS[3]).to_string(),
            precision: row.raw(KEY_FIELDS[4]).to_string(),
            tp: row.raw(KEY_FIELDS[5]).to_string(),
        }
    }

    pub fn parts(&self) -> [&str; 6] {
        [
            &self.model_name,
            &self.sequence_length,
            &self.conc,
            &self.hw_key,
            &self.precision,
            &self.tp,
        ]
    }

    /// Delimited form used in reports.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (i, part) in self.parts().iter().enumerate() {
            if i > 0 {
                out.push(KEY_DELIMITER);
            }
            out.push_str(part);
        }
        out
    }
}

impl fmt::Display for JoinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Index rows by key, preserving duplicates in input order.
pub fn index_rows(rows: &[Row]) -> BTreeMap<JoinKey, Vec<&Row>> {
    let mut index: BTreeMap<JoinKey, Vec<&Row>> = BTreeMap::new();
    for row in rows {
        index.entry(JoinKey::from_row(row)).or_default().push(row);
    }
    index
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinGroup {
    Matched,
    E2eOnly,
    InteractivityOnly,
}

/// One output row of the join. `(key, pairing)` is unique within a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedRecord {
    pub key: JoinKey,
    pub group: JoinGroup,
    pub pairing: usize,
    pub row: Row,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStats {
    pub matched_keys: usize,
    pub e2e_only_keys: usize,
    pub inter_only_keys: usize,
    pub total_records: usize,
}

impl MatchStats {
    /// Fraction of keys present on both sides, in percent. Zero when there are no keys.
    pub fn match_rate(&self) -> f64 {
        let total = self.matched_keys + self.e2e_only_keys + self.inter_only_keys;
        if total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.matched_keys as f64 / total as f64 * 100.0;
        rate
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldCompleteness {
    pub total: usize,
    pub non_empty: usize,
    pub completeness: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletenessStats {
    pub value_fields: BTreeMap<String, FieldCompleteness>,
    pub key_fields: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutput {
    pub columns: Vec<String>,
    pub records: Vec<MergedRecord>,
    pub stats: MatchStats,
}

impl JoinOutput {
    pub fn group(&self, group: JoinGroup) -> impl Iterator<Item = &MergedRecord> {
        self.records.iter().filter(move |r| r.group == group)
    }

    pub fn to_table(&self) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.records.iter().map(|r| r.row.clone()).collect(),
        }
    }
}

/// Column layout of the merged table: e2e base columns, then interactivity
/// columns the e2e side lacks, then the four value columns.
pub fn merged_columns(e2e: &Table, interactivity: &Table) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for column in e2e.columns.iter().chain(&interactivity.columns) {
        if SOURCE_VALUE_FIELDS.contains(&column.as_str())
            || VALUE_FIELDS.contains(&column.as_str())
            || columns.contains(column)
        {
            continue;
        }
        columns.push(column.clone());
    }
    columns.extend(VALUE_FIELDS.iter().map(ToString::to_string));
    columns
}

fn base_fields(source: &Row) -> Row {
    source
        .iter()
        .filter(|(k, _)| !SOURCE_VALUE_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn merge_pair(e2e: Option<&Row>, inter: Option<&Row>) -> Row {
    let mut row = match (e2e, inter) {
        (Some(base), _) | (None, Some(base)) => base_fields(base),
        (None, None) => Row::new(),
    };
    row.set(E2E_X, e2e.map_or("", |r| r.raw("x")));
    row.set(E2E_Y, e2e.map_or("", |r| r.raw("y")));
    row.set(INTER_X, inter.map_or("", |r| r.raw("x")));
    row.set(INTER_Y, inter.map_or("", |r| r.raw("y")));
    row
}

/// Join the two datasets into matched, e2e-only and interactivity-only groups.
pub fn join(e2e: &Table, interactivity: &Table) -> JoinOutput {
    let e2e_index = index_rows(&e2e.rows);
    let inter_index = index_rows(&interactivity.rows);
    tracing::debug!(
        e2e_keys = e2e_index.len(),
        interactivity_keys = inter_index.len(),
        "Indexed join inputs"
    );

    let mut records = Vec::new();
    let mut stats = MatchStats::default();

    for (key, e2e_rows) in &e2e_index {
        if let Some(inter_rows) = inter_index.get(key) {
            let mut pairing = 0;
            for e2e_row in e2e_rows {
                for inter_row in inter_rows {
                    records.push(MergedRecord {
                        key: key.clone(),
                        group: JoinGroup::Matched,
                        pairing,
                        row: merge_pair(Some(e2e_row), Some(inter_row)),
                    });
                    pairing += 1;
                }
            }
            stats.matched_keys += 1;
        } else {
            for (pairing, e2e_row) in e2e_rows.iter().enumerate() {
                records.push(MergedRecord {
                    key: key.clone(),
                    group: JoinGroup::E2eOnly,
                    pairing,
                    row: merge_pair(Some(e2e_row), None),
                });
            }
            stats.e2e_only_keys += 1;
        }
    }

    for (key, inter_rows) in &inter_index {
        if e2e_index.contains_key(key) {
            continue;
        }
        for (pairing, inter_row) in inter_rows.iter().enumerate() {
            records.push(MergedRecord {
                key: key.clone(),
                group: JoinGroup::InteractivityOnly,
                pairing,
                row: merge_pair(None, Some(inter_row)),
            });
        }
        stats.inter_only_keys += 1;
    }

    stats.total_records = records.len();
    tracing::info!(
        matched = stats.matched_keys,
        e2e_only = stats.e2e_only_keys,
        interactivity_only = stats.inter_only_keys,
        records = stats.total_records,
        match_rate = stats.match_rate(),
        "Joined datasets"
    );

    JoinOutput {
        columns: merged_columns(e2e, interactivity),
        records,
        stats,
    }
}

/// Non-empty share of each value and key column of a merged table.
#[allow(clippy::cast_precision_loss)]
pub fn completeness(table: &Table) -> CompletenessStats {
    let total = table.len();
    let share = |non_empty: usize| {
        if total == 0 {
            0.0
        } else {
            non_empty as f64 / total as f64 * 100.0
        }
    };
    let non_empty = |field: &str| {
        table
            .rows
            .iter()
            .filter(|row| !row.raw(field).trim().is_empty())
            .count()
    };

    let value_fields = VALUE_FIELDS
        .iter()
        .map(|field| {
            let count = non_empty(field);
            (
                (*field).to_string(),
                FieldCompleteness {
                    total,
                    non_empty: count,
                    completeness: share(count),
                },
            )
        })
        .collect();
    let key_fields = KEY_FIELDS
        .iter()
        .map(|field| ((*field).to_string(), share(non_empty(field))))
        .collect();

    CompletenessStats {
        value_fields,
        key_fields,
    }
}
