//! Raw artifact fixtures.

#![allow(dead_code)]

use perfvault::collector::artifact_file_name;
use perfvault::config::{Config, MonitoringSettings, PathSettings, TargetSettings, ValidationSettings};
use perfvault::dataset::SourceType;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

pub const MODEL: &str = "M";
pub const SEQUENCE: &str = "1K / 1K";

/// One benchmark data point on the `h100 / fp8 / tp=1` configuration.
pub fn point(conc: u32, x: f64, y: f64) -> Value {
    json!({
        "conc": conc,
        "hwKey": "h100",
        "precision": "fp8",
        "tp": 1,
        "x": x,
        "y": y,
    })
}

pub fn envelope(model: &str, sequence: &str, source: SourceType, points: &[Value]) -> Vec<u8> {
    let value = json!({
        "metadata": {
            "model": model,
            "sequence": sequence,
            "url": format!("https://example.test/data/{}.json", source.as_str()),
            "data_type": source.as_str(),
            "record_count": points.len(),
        },
        "data": points,
    });
    serde_json::to_vec_pretty(&value).expect("encode envelope")
}

/// Write an artifact under its indexed file name and return the path.
pub fn write_artifact(
    dir: &Path,
    index: usize,
    model: &str,
    sequence: &str,
    source: SourceType,
    points: &[Value],
) -> PathBuf {
    std::fs::create_dir_all(dir).expect("create raw dir");
    let path = dir.join(artifact_file_name(Some(index), model, sequence, source));
    std::fs::write(&path, envelope(model, sequence, source, points)).expect("write artifact");
    path
}

/// Config rooted at `base` covering a single model and sequence, with size
/// checks relaxed so small fixtures validate.
pub fn config(base: &Path) -> Config {
    Config {
        paths: Some(PathSettings {
            base_dir: Some(base.to_path_buf()),
            ..PathSettings::default()
        }),
        targets: Some(TargetSettings {
            models: Some(vec![MODEL.to_string()]),
            sequences: Some(vec![SEQUENCE.to_string()]),
        }),
        validation: Some(ValidationSettings {
            min_payload_bytes: Some(0),
            remove_invalid: None,
        }),
        monitoring: Some(MonitoringSettings {
            expected_min_records: Some(1),
            min_artifacts: Some(1),
        }),
        ..Config::default()
    }
}
