//! Schema discovery and one-level flattening.
//!
//! A nested field `costh: { y: 1.5 }` becomes the column `costh_y`. The parent
//! name itself is not a column unless some record carries it as a scalar.

use crate::dataset::Row;
use crate::record::{FieldValue, Record, Scalar};
use std::collections::{BTreeMap, BTreeSet};

/// Join a parent field and a nested field into a flat column name.
pub fn nested_column(parent: &str, child: &str) -> String {
    format!("{parent}_{child}")
}

/// Sorted union of flat column names across `records`.
///
/// Must see the whole input before any row is flattened: a column missing
/// from one record still appears in every row.
pub fn discover_columns<'a>(records: impl IntoIterator<Item = &'a Record>) -> Vec<String> {
    let mut columns = BTreeSet::new();
    for record in records {
        for (name, value) in record.iter() {
            match value {
                FieldValue::Scalar(_) => {
                    columns.insert(name.clone());
                }
                FieldValue::Nested(children) => {
                    columns.extend(children.keys().map(|child| nested_column(name, child)));
                }
            }
        }
    }
    columns.into_iter().collect()
}

/// All flat cells a record provides, keyed by column name.
///
/// When a top-level scalar and a nested field collapse to the same name, the
/// top-level scalar wins.
pub fn flat_cells(record: &Record) -> BTreeMap<String, String> {
    let mut cells = BTreeMap::new();
    for (name, value) in record.iter() {
        if let FieldValue::Nested(children) = value {
            for (child, scalar) in children {
                cells.insert(nested_column(name, child), scalar.render());
            }
        }
    }
    for (name, value) in record.iter() {
        if let FieldValue::Scalar(scalar) = value {
            cells.insert(name.clone(), scalar.render());
        }
    }
    cells
}

/// Project one record onto `columns`. Missing fields become empty cells.
pub fn flatten_record(record: &Record, columns: &[String]) -> Row {
    let mut cells = flat_cells(record);
    let mut row = Row::new();
    for column in columns {
        let value = cells.remove(column).unwrap_or_default();
        row.set(column.clone(), value);
    }
    row
}

/// Discover the column set of `records` and flatten each of them.
pub fn flatten_all(records: &[Record]) -> (Vec<String>, Vec<Row>) {
    let columns = discover_columns(records);
    let rows = records
        .iter()
        .map(|record| flatten_record(record, &columns))
        .collect();
    (columns, rows)
}

/// Lift a flat row back into a record of text scalars.
pub fn row_to_record(row: &Row) -> Record {
    let mut record = Record::new();
    for (name, value) in row.iter() {
        record.insert(name.clone(), FieldValue::Scalar(Scalar::Text(value.clone())));
    }
    record
}
