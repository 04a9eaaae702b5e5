//! End-to-end pipeline runs over raw artifacts on disk.

mod common;

use chrono::{DateTime, TimeZone, Utc};
use common::TestHarness;
use common::fixtures::{self, MODEL, SEQUENCE, point};
use perfvault::archive::{Archive, ArtifactKind};
use perfvault::collector::{DirectoryCollector, artifact_file_name};
use perfvault::dataset::SourceType;
use perfvault::diff::{CompareTarget, FieldDelta, compare_versions};
use perfvault::pipeline::{Pipeline, PipelineState};
use perfvault::report::{RunReport, StepStatus};
use pretty_assertions::assert_eq;
use regex::Regex;
use serde_json::Value;

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, day, 12, 0, 0)
        .single()
        .expect("valid time")
}

fn run_once(harness: &TestHarness, day: u32, e2e: &[Value], inter: &[Value]) -> RunReport {
    let raw = harness.temp_path("raw_data");
    fixtures::write_artifact(&raw, 1, MODEL, SEQUENCE, SourceType::E2e, e2e);
    fixtures::write_artifact(&raw, 2, MODEL, SEQUENCE, SourceType::Interactivity, inter);

    let config = fixtures::config(harness.temp_dir());
    let collector = DirectoryCollector::new(config.raw_data_dir());
    let report = Pipeline::new(&config, &collector)
        .with_started_at(at(day))
        .run();

    harness.log().info_ctx("run", "pipeline finished", |ctx| {
        ctx.push(("run_id".into(), report.run_id.clone()));
        ctx.push(("state".into(), report.state.to_string()));
    });
    report
}

#[test]
fn matching_key_produces_one_merged_row() {
    let harness = TestHarness::new("matching_key_produces_one_merged_row");
    let report = run_once(
        &harness,
        1,
        &[point(10, 5.0, 100.0)],
        &[point(10, 2.0, 50.0)],
    );

    assert_eq!(report.state, PipelineState::Done, "{:?}", report.error);
    let stats = report.match_stats.expect("match stats");
    assert_eq!(
        (stats.matched_keys, stats.e2e_only_keys, stats.inter_only_keys),
        (1, 0, 0)
    );

    let archive = Archive::open(harness.temp_path("archive")).expect("open");
    let version = report.version.expect("version");
    let merged = archive
        .load_table(&version, ArtifactKind::Merged)
        .expect("merged table");
    assert_eq!(merged.len(), 1);
    let row = &merged.rows[0];
    assert_eq!(row.get("model_name"), Some("M"));
    assert_eq!(row.get("sequence_length"), Some("1k-1k"));
    assert_eq!(row.get("e2e_x"), Some("5.0"));
    assert_eq!(row.get("e2e_y"), Some("100.0"));
    assert_eq!(row.get("inter_x"), Some("2.0"));
    assert_eq!(row.get("inter_y"), Some("50.0"));

    let metadata = archive.load_metadata(&version).expect("metadata");
    assert_eq!(metadata.pipeline_id, report.run_id);
    assert_eq!(metadata.source.models, vec![MODEL.to_string()]);
}

#[test]
fn concurrency_mismatch_splits_into_two_rows() {
    let harness = TestHarness::new("concurrency_mismatch_splits_into_two_rows");
    let report = run_once(
        &harness,
        1,
        &[point(10, 5.0, 100.0)],
        &[point(20, 2.0, 50.0)],
    );

    let stats = report.match_stats.expect("match stats");
    assert_eq!(
        (stats.matched_keys, stats.e2e_only_keys, stats.inter_only_keys),
        (0, 1, 1)
    );
    assert_eq!(report.merged_records, Some(2));

    let archive = Archive::open(harness.temp_path("archive")).expect("open");
    let merged = archive
        .load_table(&report.version.expect("version"), ArtifactKind::Merged)
        .expect("merged table");
    let e2e_only = merged
        .rows
        .iter()
        .find(|r| r.get("conc") == Some("10"))
        .expect("e2e-only row");
    assert_eq!(e2e_only.get("e2e_x"), Some("5.0"));
    assert_eq!(e2e_only.get("inter_x"), None);
    let inter_only = merged
        .rows
        .iter()
        .find(|r| r.get("conc") == Some("20"))
        .expect("interactivity-only row");
    assert_eq!(inter_only.get("e2e_x"), None);
    assert_eq!(inter_only.get("inter_y"), Some("50.0"));
}

#[test]
fn drift_threshold_is_strict() {
    let harness = TestHarness::new("drift_threshold_is_strict");
    let inter = [point(10, 2.0, 50.0)];
    let a = run_once(&harness, 1, &[point(10, 5.0, 100.0)], &inter);
    let b = run_once(&harness, 2, &[point(10, 5.001, 100.0)], &inter);
    let c = run_once(&harness, 3, &[point(10, 5.01, 100.0)], &inter);
    let (a, b, c) = (
        a.version.expect("a"),
        b.version.expect("b"),
        c.version.expect("c"),
    );

    let archive = Archive::open(harness.temp_path("archive")).expect("open");
    let thresholds = fixtures::config(harness.temp_dir()).drift_thresholds();

    let small = compare_versions(&archive, &a, &b, CompareTarget::Merged).expect("a vs b");
    assert_eq!(small.diff.common_keys, 1);
    let record = &small.diff.records[0];
    match record.field("e2e_x").expect("e2e_x delta") {
        FieldDelta::Numeric { abs_diff, .. } => assert!((abs_diff - 0.001).abs() < 1e-9),
        other => panic!("unexpected delta {other:?}"),
    }
    assert!(small.diff.significant(thresholds).is_empty());

    let large = compare_versions(&archive, &a, &c, CompareTarget::Merged).expect("a vs c");
    assert_eq!(large.diff.significant(thresholds).len(), 1);
}

#[test]
fn every_run_writes_a_report() {
    let harness = TestHarness::new("every_run_writes_a_report");
    harness.create_dir("raw_data");
    let config = fixtures::config(harness.temp_dir());
    let collector = DirectoryCollector::new(config.raw_data_dir());

    let report = Pipeline::new(&config, &collector)
        .with_started_at(at(4))
        .run();
    assert_eq!(report.state, PipelineState::Failed);
    assert_eq!(report.failed_step, Some(PipelineState::Collecting));
    assert_eq!(
        report.step(PipelineState::Collecting).map(|s| s.status),
        Some(StepStatus::Failed)
    );

    let name = Regex::new(r"^pipeline_report_\d{8}_\d{6}\.(json|md)$").expect("regex");
    let mut written: Vec<String> = std::fs::read_dir(config.report_dir())
        .expect("report dir")
        .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    written.sort();
    assert_eq!(written.len(), 2);
    assert!(written.iter().all(|n| name.is_match(n)), "{written:?}");

    let json: Value = serde_json::from_str(&harness.read_file(format!(
        "reports/pipeline_report_{}.json",
        report.run_id
    )))
    .expect("report json");
    assert_eq!(json["state"], "failed");
    assert_eq!(json["error"]["kind"], "collector");
    assert!(!harness.temp_path("archive").exists());
}

#[test]
fn rejected_artifacts_are_removed_when_configured() {
    let harness = TestHarness::new("rejected_artifacts_are_removed_when_configured");
    let raw = harness.temp_path("raw_data");
    fixtures::write_artifact(&raw, 1, MODEL, SEQUENCE, SourceType::E2e, &[point(10, 5.0, 100.0)]);
    let bad = harness.create_file(
        format!(
            "raw_data/{}",
            artifact_file_name(Some(2), MODEL, SEQUENCE, SourceType::Interactivity)
        ),
        r#"{"metadata":{},"data":[]}"#,
    );

    let mut config = fixtures::config(harness.temp_dir());
    if let Some(validation) = config.validation.as_mut() {
        validation.remove_invalid = Some(true);
    }
    let collector = DirectoryCollector::new(config.raw_data_dir());
    let report = Pipeline::new(&config, &collector)
        .with_started_at(at(5))
        .run();

    assert!(report.succeeded(), "{:?}", report.error);
    let validation = report.validation.expect("validation summary");
    assert_eq!(validation.valid, 1);
    assert_eq!(validation.removed, 1);
    assert!(validation.rejected[0].reason.contains("empty"));
    assert!(!bad.exists());
}
