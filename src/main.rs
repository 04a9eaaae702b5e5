//! perfvault - versioned benchmark snapshots with drift tracking

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use perfvault::archive::{Archive, VERSION_TIME_FORMAT, VersionId};
use perfvault::cli::{self, Commands};
use perfvault::collector::DirectoryCollector;
use perfvault::config::Config;
use perfvault::dataset::SourceType;
use perfvault::diff::{CompareTarget, compare_versions, summarize_versions};
use perfvault::logging;
use perfvault::pipeline::Pipeline;
use perfvault::report::DriftReport;
use perfvault::validate::{remove_rejected, scan_directory};

fn main() -> ExitCode {
    match main_impl() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn main_impl() -> Result<ExitCode> {
    let cli = cli::Cli::parse();
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let config = Config::load_with_roots(cli.config.as_deref(), &Config::global_dir(), &cwd)?;

    match cli.command {
        Commands::Run => run(&config, cli.verbose),
        Commands::Validate { dir, remove, json } => {
            init_terminal(&config, cli.verbose);
            validate(&config, dir.as_deref(), remove, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Versions => {
            init_terminal(&config, cli.verbose);
            list_versions(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Diff { v1, v2, json } => {
            init_terminal(&config, cli.verbose);
            diff(&config, &v1, &v2, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Drift {
            last,
            partitions,
            json,
        } => {
            init_terminal(&config, cli.verbose);
            drift(&config, last, partitions, json)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Config warnings are only visible once a subscriber is installed.
fn init_terminal(config: &Config, verbose: bool) {
    logging::init_terminal_logging(verbose);
    config.emit_diagnostics();
}

fn run(config: &Config, verbose: bool) -> Result<ExitCode> {
    let started_at = Utc::now();
    let run_id = started_at.format(VERSION_TIME_FORMAT).to_string();
    let guard = logging::init_logging(&config.log_dir(), &run_id, verbose)?;
    config.emit_diagnostics();

    let collector = DirectoryCollector::new(config.raw_data_dir());
    let report = Pipeline::new(config, &collector)
        .with_started_at(started_at)
        .run();

    println!("Run {}: {}", report.run_id, report.state);
    if let Some(version) = &report.version {
        println!("  version: {version}");
    }
    if let Some(stats) = &report.match_stats {
        println!(
            "  merged records: {} (match rate {:.1}%)",
            stats.total_records,
            stats.match_rate()
        );
    }
    if let (Some(step), Some(error)) = (report.failed_step, &report.error) {
        println!("  failed in {step}: {}", error.message);
    }
    println!("  log: {}", guard.log_path.display());

    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn validate(config: &Config, dir: Option<&Path>, remove: bool, json: bool) -> Result<()> {
    let dir = dir.map_or_else(|| config.raw_data_dir(), Path::to_path_buf);
    let mut report = scan_directory(&dir, config.min_payload_bytes())
        .with_context(|| format!("scanning {}", dir.display()))?;
    if remove || config.remove_invalid() {
        remove_rejected(&mut report);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let summary = &report.summary;
    println!("Validated {} ({} files)", dir.display(), summary.total_files);
    println!(
        "  valid: {} ({} bytes)",
        summary.valid_files, summary.valid_bytes
    );
    println!(
        "  invalid: {} ({} bytes), removed: {}",
        summary.invalid_files, summary.invalid_bytes, summary.removed_files
    );
    for (model, stats) in &report.model_stats {
        println!(
            "  {model}: {} files, {} valid data points",
            stats.files, stats.data_points
        );
    }
    for verdict in report.rejected() {
        if let Some(reason) = &verdict.reason {
            println!("  rejected {}: {reason}", verdict.filename);
        }
    }
    Ok(())
}

fn list_versions(config: &Config) -> Result<()> {
    let archive = Archive::open(config.archive_dir())?;
    let versions = archive.list_versions()?;
    if versions.is_empty() {
        println!("No versions in {}", archive.root().display());
        return Ok(());
    }
    for id in versions {
        match archive.summarize(&id) {
            Ok(summary) => {
                println!(
                    "{id}  {}  e2e={} interactivity={} merged={} keys={}",
                    summary.created_at.format("%Y-%m-%d %H:%M:%S"),
                    summary.e2e.records,
                    summary.interactivity.records,
                    summary.merged.records,
                    summary.merged.unique_keys,
                );
                println!(
                    "    models: {}  hardware: {}  precisions: {}",
                    summary.merged.models.join(", "),
                    summary.merged.hw_keys.join(", "),
                    summary.merged.precisions.join(", "),
                );
            }
            Err(err) => println!("{id}  unreadable: {err}"),
        }
    }
    Ok(())
}

fn parse_version(raw: &str) -> Result<VersionId> {
    match VersionId::parse(raw) {
        Some(id) => Ok(id),
        None => bail!("Invalid version id: {raw} (expected YYYYmmdd_HHMMSS)"),
    }
}

fn diff(config: &Config, v1: &str, v2: &str, json: bool) -> Result<()> {
    let archive = Archive::open(config.archive_dir())?;
    let (v1, v2) = (parse_version(v1)?, parse_version(v2)?);
    let pair = compare_versions(&archive, &v1, &v2, CompareTarget::Merged)?;
    let report = DriftReport::from_pair(&pair, config.drift_thresholds());
    print_drift(&report, json)
}

fn drift(config: &Config, last: usize, partitions: bool, json: bool) -> Result<()> {
    let archive = Archive::open(config.archive_dir())?;
    let mut versions: Vec<VersionId> = archive.list_versions()?.into_iter().take(last).collect();
    versions.reverse();

    let mut targets = vec![CompareTarget::Merged];
    if partitions {
        targets.extend(SourceType::ALL.map(CompareTarget::Partition));
    }

    let stamp = Utc::now().format(VERSION_TIME_FORMAT).to_string();
    for target in targets {
        let summary = summarize_versions(&archive, &versions, target, config.drift_thresholds())?;
        let report = DriftReport::from_summary(&summary);
        let stem = format!("drift_report_{}_{stamp}", target.label());
        let (json_path, _) = report.write_to(&config.report_dir(), &stem)?;
        tracing::info!(table = target.label(), path = %json_path.display(), "Wrote drift report");
        print_drift(&report, json)?;
    }
    Ok(())
}

fn print_drift(report: &DriftReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report.to_markdown());
    }
    Ok(())
}
