//! Pipeline orchestration.
//!
//! A run walks `Collecting -> Validating -> Building -> Joining -> Archiving`
//! and ends in `Done` or `Failed`. Each step hands its output to the next
//! through [`RunContext`]; the first error moves the run to `Failed` and the
//! remaining steps are not attempted. A run report is written either way.

use crate::archive::{
    Archive, DEFAULT_LOCK_TIMEOUT, Snapshot, SourceConfig, VERSION_TIME_FORMAT, VersionId,
    VersionRequest,
};
use crate::collector::{CollectRequest, CollectedArtifact, Collector};
use crate::config::Config;
use crate::dataset::{Datasets, Table, build_datasets};
use crate::error::{Error, Result};
use crate::join::{self, JoinOutput};
use crate::record::RawArtifact;
use crate::report::{
    CollectionSummary, DatasetSummary, ErrorInfo, RejectedArtifact, RunReport, StepReport,
    StepStatus, ValidationSummary,
};
use crate::validate::{Validation, validate_payload};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Collecting,
    Validating,
    Building,
    Joining,
    Archiving,
    Done,
    Failed,
}

impl PipelineState {
    /// Working states in execution order.
    pub const STEPS: [Self; 5] = [
        Self::Collecting,
        Self::Validating,
        Self::Building,
        Self::Joining,
        Self::Archiving,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Collecting => "collecting",
            Self::Validating => "validating",
            Self::Building => "building",
            Self::Joining => "joining",
            Self::Archiving => "archiving",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requests cancellation of a run.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    inner: Arc<AtomicBool>,
}

/// Observed by the run; set through the paired [`AbortHandle`].
#[derive(Debug, Clone)]
pub struct AbortSignal {
    inner: Arc<AtomicBool>,
}

impl AbortHandle {
    #[must_use]
    pub fn new() -> (Self, AbortSignal) {
        let inner = Arc::new(AtomicBool::new(false));
        (
            Self {
                inner: Arc::clone(&inner),
            },
            AbortSignal { inner },
        )
    }

    pub fn abort(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

/// Step outputs threaded through one run.
#[derive(Default)]
struct RunContext {
    collected: Vec<CollectedArtifact>,
    valid: Vec<CollectedArtifact>,
    datasets: Option<Datasets>,
    joined: Option<JoinOutput>,
    merged: Option<Table>,
}

enum StepOutcome {
    Passed(String),
    Skipped(String),
}

pub struct Pipeline<'a, C: Collector + ?Sized> {
    config: &'a Config,
    collector: &'a C,
    signal: Option<AbortSignal>,
    started_at: Option<DateTime<Utc>>,
    lock_timeout: Duration,
    write_report: bool,
}

impl<'a, C: Collector + ?Sized> Pipeline<'a, C> {
    pub fn new(config: &'a Config, collector: &'a C) -> Self {
        Self {
            config,
            collector,
            signal: None,
            started_at: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            write_report: true,
        }
    }

    #[must_use]
    pub fn with_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Pin the run start time. The run id and version id derive from it.
    #[must_use]
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Skip writing report files to `paths.report_dir`.
    #[must_use]
    pub fn without_report_files(mut self) -> Self {
        self.write_report = false;
        self
    }

    fn aborted(&self) -> bool {
        self.signal.as_ref().is_some_and(AbortSignal::is_aborted)
    }

    /// Execute one run. Never returns an error: failures are recorded in the
    /// report's `state`, `failed_step` and `error`.
    pub fn run(self) -> RunReport {
        let started_at = self.started_at.unwrap_or_else(Utc::now);
        let run_id = started_at.format(VERSION_TIME_FORMAT).to_string();
        let clock = Instant::now();
        tracing::info!(run_id = %run_id, "Pipeline run started");

        let mut report = RunReport {
            run_id,
            started_at,
            finished_at: started_at,
            duration_ms: 0,
            state: PipelineState::Collecting,
            failed_step: None,
            error: None,
            steps: Vec::with_capacity(PipelineState::STEPS.len()),
            models: self.config.models(),
            sequences: self.config.sequences(),
            collection: None,
            validation: None,
            datasets: None,
            match_stats: None,
            completeness: None,
            merged_records: None,
            version: None,
            retention_removed: Vec::new(),
            warnings: Vec::new(),
        };
        let mut ctx = RunContext::default();

        for step in PipelineState::STEPS {
            report.state = step;
            let step_clock = Instant::now();
            tracing::info!(step = %step, "Entering step");

            let outcome = if self.aborted() {
                Err(Error::Aborted)
            } else {
                match step {
                    PipelineState::Collecting => self.collect(&mut ctx, &mut report),
                    PipelineState::Validating => self.validate(&mut ctx, &mut report),
                    PipelineState::Building => Self::build(&mut ctx, &mut report),
                    PipelineState::Joining => self.join(&mut ctx, &mut report),
                    PipelineState::Archiving => self.archive(&ctx, &mut report),
                    PipelineState::Done | PipelineState::Failed => {
                        Ok(StepOutcome::Skipped("terminal state".to_string()))
                    }
                }
            };
            let duration_ms = elapsed_ms(step_clock);

            match outcome {
                Ok(StepOutcome::Passed(detail)) => {
                    tracing::info!(step = %step, duration_ms, detail = %detail, "Step passed");
                    report.steps.push(StepReport {
                        step,
                        status: StepStatus::Passed,
                        duration_ms,
                        detail,
                    });
                }
                Ok(StepOutcome::Skipped(detail)) => {
                    tracing::info!(step = %step, detail = %detail, "Step skipped");
                    report.steps.push(StepReport {
                        step,
                        status: StepStatus::Skipped,
                        duration_ms,
                        detail,
                    });
                }
                Err(err) => {
                    tracing::error!(step = %step, kind = err.kind(), error = %err, "Step failed");
                    report.steps.push(StepReport {
                        step,
                        status: StepStatus::Failed,
                        duration_ms,
                        detail: err.to_string(),
                    });
                    report.failed_step = Some(step);
                    report.error = Some(ErrorInfo::from(&err));
                    report.state = PipelineState::Failed;
                    break;
                }
            }
        }

        if report.state != PipelineState::Failed {
            report.state = PipelineState::Done;
        }
        report.finished_at = Utc::now();
        report.duration_ms = elapsed_ms(clock);

        tracing::info!(
            run_id = %report.run_id,
            state = %report.state,
            duration_ms = report.duration_ms,
            "Pipeline run finished"
        );

        if self.write_report {
            match report.write_to(&self.config.report_dir()) {
                Ok((json, md)) => {
                    tracing::info!(json = %json.display(), markdown = %md.display(), "Wrote run report");
                }
                Err(err) => {
                    tracing::error!(error = %err, "Failed to write run report");
                }
            }
        }
        report
    }

    fn collect(&self, ctx: &mut RunContext, report: &mut RunReport) -> Result<StepOutcome> {
        let requests = CollectRequest::matrix(&report.models, &report.sequences);
        let mut summary = CollectionSummary {
            requested: requests.len(),
            ..CollectionSummary::default()
        };

        for request in &requests {
            match self.collector.collect(request) {
                Ok(artifact) => {
                    summary.records += artifact.record_count;
                    ctx.collected.push(artifact);
                }
                Err(err) => {
                    tracing::warn!(
                        model = %request.model,
                        sequence = %request.sequence,
                        source = %request.source,
                        error = %err,
                        "Collection failed; counting zero records"
                    );
                    summary.failures.push(format!(
                        "{} / {} / {}: {err}",
                        request.model, request.sequence, request.source
                    ));
                }
            }
        }
        summary.collected = ctx.collected.len();
        let detail = format!(
            "{}/{} artifacts, {} records",
            summary.collected, summary.requested, summary.records
        );
        report.collection = Some(summary);

        let min = self.config.min_artifacts();
        if ctx.collected.len() < min {
            return Err(Error::collector(format!(
                "Collected {} artifacts, need at least {min}",
                ctx.collected.len()
            )));
        }
        Ok(StepOutcome::Passed(detail))
    }

    fn validate(&self, ctx: &mut RunContext, report: &mut RunReport) -> Result<StepOutcome> {
        let min_bytes = self.config.min_payload_bytes();
        let remove = self.config.remove_invalid();
        let mut summary = ValidationSummary::default();

        for artifact in std::mem::take(&mut ctx.collected) {
            match validate_payload(&artifact.payload, min_bytes) {
                Validation::Valid { valid_points, .. } => {
                    tracing::debug!(artifact = %artifact.label, valid_points, "Artifact valid");
                    ctx.valid.push(artifact);
                }
                Validation::Rejected(reason) => {
                    tracing::warn!(artifact = %artifact.label, %reason, "Artifact rejected");
                    if remove {
                        if let Some(path) = &artifact.path {
                            match std::fs::remove_file(path) {
                                Ok(()) => summary.removed += 1,
                                Err(err) => tracing::warn!(
                                    file = %path.display(),
                                    error = %err,
                                    "Failed to remove invalid artifact"
                                ),
                            }
                        }
                    }
                    summary.rejected.push(RejectedArtifact {
                        label: artifact.label,
                        reason: reason.to_string(),
                    });
                }
            }
        }
        summary.valid = ctx.valid.len();
        let detail = format!(
            "{} valid, {} rejected, {} removed",
            summary.valid,
            summary.rejected.len(),
            summary.removed
        );
        report.validation = Some(summary);

        if ctx.valid.is_empty() {
            return Err(Error::validation("No valid artifacts to build datasets from"));
        }
        Ok(StepOutcome::Passed(detail))
    }

    fn build(ctx: &mut RunContext, report: &mut RunReport) -> Result<StepOutcome> {
        let raw = ctx
            .valid
            .iter()
            .map(|artifact| RawArtifact::decode(artifact.label.clone(), &artifact.payload))
            .collect::<Result<Vec<_>>>()?;
        let datasets = build_datasets(&raw);

        report.datasets = Some(DatasetSummary {
            e2e_records: datasets.e2e.len(),
            interactivity_records: datasets.interactivity.len(),
            dropped: datasets.dropped.clone(),
        });
        if datasets.e2e.is_empty() && datasets.interactivity.is_empty() {
            return Err(Error::dataset("Both datasets are empty"));
        }
        for label in &datasets.dropped {
            report
                .warnings
                .push(format!("{label}: unknown source type, artifact dropped"));
        }

        let detail = format!(
            "e2e {} records, interactivity {} records",
            datasets.e2e.len(),
            datasets.interactivity.len()
        );
        ctx.datasets = Some(datasets);
        Ok(StepOutcome::Passed(detail))
    }

    fn join(&self, ctx: &mut RunContext, report: &mut RunReport) -> Result<StepOutcome> {
        let datasets = ctx
            .datasets
            .as_ref()
            .ok_or_else(|| Error::dataset("Datasets were not built"))?;
        let joined = join::join(&datasets.e2e, &datasets.interactivity);
        let merged = joined.to_table();
        let completeness = join::completeness(&merged);

        let expected = self.config.expected_min_records();
        if merged.len() < expected {
            tracing::warn!(
                records = merged.len(),
                expected,
                "Merged table is smaller than expected"
            );
            report.warnings.push(format!(
                "Merged table has {} records, expected at least {expected}",
                merged.len()
            ));
        }

        let stats = joined.stats;
        report.match_stats = Some(stats);
        report.completeness = Some(completeness);
        report.merged_records = Some(merged.len());
        ctx.joined = Some(joined);
        ctx.merged = Some(merged);

        Ok(StepOutcome::Passed(format!(
            "{} records, match rate {:.1}%",
            stats.total_records,
            stats.match_rate()
        )))
    }

    fn archive(&self, ctx: &RunContext, report: &mut RunReport) -> Result<StepOutcome> {
        if !self.config.versioning_enabled() {
            return Ok(StepOutcome::Skipped("versioning disabled".to_string()));
        }
        let (Some(datasets), Some(merged)) = (&ctx.datasets, &ctx.merged) else {
            return Err(Error::archive("Nothing to archive"));
        };

        let archive = Archive::open(self.config.archive_dir())?;
        let _lock = archive.lock(self.lock_timeout)?;
        archive.sweep_staging()?;

        let request = VersionRequest {
            pipeline_id: report.run_id.clone(),
            created_at: report.started_at,
            source: SourceConfig {
                models: report.models.clone(),
                sequences: report.sequences.clone(),
            },
            match_stats: ctx.joined.as_ref().map(|j| j.stats),
            compression: self.config.compression(),
        };
        let metadata = archive.create_version(
            Snapshot {
                e2e: &datasets.e2e,
                interactivity: &datasets.interactivity,
                merged,
            },
            &request,
        )?;
        report.version = Some(metadata.version_id.clone());

        settle_retention(report, archive.apply_retention(self.config.max_versions()));
        Ok(StepOutcome::Passed(format!(
            "{} archived, {} removed by retention",
            metadata.version_id,
            report.retention_removed.len()
        )))
    }
}

/// Record the retention outcome once a version is published. A published
/// version is never rolled back, so a retention error only becomes a warning.
fn settle_retention(report: &mut RunReport, outcome: Result<Vec<VersionId>>) {
    match outcome {
        Ok(removed) => report.retention_removed = removed,
        Err(err) => {
            tracing::warn!(error = %err, "Retention failed after publishing version");
            report
                .warnings
                .push(format!("Retention skipped after publishing: {err}"));
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
