//! Configuration loading and management.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: Option<PathSettings>,
    pub targets: Option<TargetSettings>,
    pub versioning: Option<VersioningSettings>,
    pub validation: Option<ValidationSettings>,
    pub monitoring: Option<MonitoringSettings>,
    pub drift: Option<DriftSettings>,
}

/// Filesystem layout.
///
/// Relative directories are resolved against `base_dir`, which itself
/// defaults to the working directory.
///
/// # Example (settings.json)
///
/// ```json
/// {
///   "paths": {
///     "baseDir": "/srv/perf",
///     "archiveDir": "archive"
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    #[serde(alias = "baseDir")]
    pub base_dir: Option<PathBuf>,
    #[serde(alias = "rawDataDir")]
    pub raw_data_dir: Option<PathBuf>,
    #[serde(alias = "archiveDir")]
    pub archive_dir: Option<PathBuf>,
    #[serde(alias = "reportDir")]
    pub report_dir: Option<PathBuf>,
    #[serde(alias = "logDir")]
    pub log_dir: Option<PathBuf>,
}

/// Which models and sequence configurations a run covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSettings {
    pub models: Option<Vec<String>>,
    pub sequences: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersioningSettings {
    pub enabled: Option<bool>,
    #[serde(alias = "maxVersions")]
    pub max_versions: Option<usize>,
    pub compression: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    #[serde(alias = "minPayloadBytes")]
    pub min_payload_bytes: Option<usize>,
    #[serde(alias = "removeInvalid")]
    pub remove_invalid: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    #[serde(alias = "expectedMinRecords")]
    pub expected_min_records: Option<usize>,
    #[serde(alias = "minArtifacts")]
    pub min_artifacts: Option<usize>,
}

/// Significance thresholds for drift detection. Both comparisons are strict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftSettings {
    #[serde(alias = "absThreshold")]
    pub abs_threshold: Option<f64>,
    #[serde(alias = "pctThreshold")]
    pub pct_threshold: Option<f64>,
}

pub const DEFAULT_MAX_VERSIONS: usize = 30;
pub const DEFAULT_MIN_PAYLOAD_BYTES: usize = 1024;
pub const DEFAULT_EXPECTED_MIN_RECORDS: usize = 1000;
pub const DEFAULT_ABS_THRESHOLD: f64 = 0.001;
pub const DEFAULT_PCT_THRESHOLD: f64 = 0.1;

const DEFAULT_MODELS: &[&str] = &[
    "Llama 3.3 70B Instruct",
    "DeepSeek R1 0528",
    "gpt-oss 120B",
];
const DEFAULT_SEQUENCES: &[&str] = &["1K / 1K", "1K / 8K", "8K / 1K"];

impl Config {
    /// Load configuration from the environment, global and project settings.
    pub fn load() -> Result<Self> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let config_path = std::env::var_os("PERFVAULT_CONFIG_PATH").map(PathBuf::from);
        Self::load_with_roots(config_path.as_deref(), &Self::global_dir(), &cwd)
    }

    /// Get the global configuration directory.
    pub fn global_dir() -> PathBuf {
        global_dir_from_env(env_lookup)
    }

    /// Get the project configuration directory.
    pub fn project_dir() -> PathBuf {
        PathBuf::from(".perfvault")
    }

    /// Load settings from a specific path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            Error::config(format!(
                "Failed to parse settings file {}: {e}",
                path.display()
            ))
        })?;
        Ok(config)
    }

    /// An explicit path wins outright; otherwise project settings are merged
    /// over global settings.
    pub fn load_with_roots(
        config_path: Option<&Path>,
        global_dir: &Path,
        cwd: &Path,
    ) -> Result<Self> {
        if let Some(path) = config_path {
            if !path.exists() {
                return Err(Error::config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            return Self::load_from_path(path);
        }

        let global = Self::load_from_path(&global_dir.join("settings.json"))?;
        let project = Self::load_from_path(&cwd.join(Self::project_dir()).join("settings.json"))?;
        Ok(Self::merge(global, project))
    }

    /// Merge two configurations, with `other` taking precedence.
    pub fn merge(base: Self, other: Self) -> Self {
        Self {
            paths: merge_paths(base.paths, other.paths),
            targets: merge_targets(base.targets, other.targets),
            versioning: merge_versioning(base.versioning, other.versioning),
            validation: merge_validation(base.validation, other.validation),
            monitoring: merge_monitoring(base.monitoring, other.monitoring),
            drift: merge_drift(base.drift, other.drift),
        }
    }

    // Paths

    pub fn base_dir(&self) -> PathBuf {
        self.paths
            .as_ref()
            .and_then(|p| p.base_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn resolve_dir(&self, pick: impl Fn(&PathSettings) -> Option<&PathBuf>, default: &str) -> PathBuf {
        let base = self.base_dir();
        match self.paths.as_ref().and_then(pick) {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base.join(dir),
            None => base.join(default),
        }
    }

    pub fn raw_data_dir(&self) -> PathBuf {
        self.resolve_dir(|p| p.raw_data_dir.as_ref(), "raw_data")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.resolve_dir(|p| p.archive_dir.as_ref(), "archive")
    }

    pub fn report_dir(&self) -> PathBuf {
        self.resolve_dir(|p| p.report_dir.as_ref(), "reports")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.resolve_dir(|p| p.log_dir.as_ref(), "logs")
    }

    // Targets

    pub fn models(&self) -> Vec<String> {
        self.targets
            .as_ref()
            .and_then(|t| t.models.clone())
            .unwrap_or_else(|| DEFAULT_MODELS.iter().map(ToString::to_string).collect())
    }

    pub fn sequences(&self) -> Vec<String> {
        self.targets
            .as_ref()
            .and_then(|t| t.sequences.clone())
            .unwrap_or_else(|| DEFAULT_SEQUENCES.iter().map(ToString::to_string).collect())
    }

    // Versioning

    pub fn versioning_enabled(&self) -> bool {
        self.versioning
            .as_ref()
            .and_then(|v| v.enabled)
            .unwrap_or(true)
    }

    pub fn max_versions(&self) -> usize {
        self.versioning
            .as_ref()
            .and_then(|v| v.max_versions)
            .unwrap_or(DEFAULT_MAX_VERSIONS)
    }

    pub fn compression(&self) -> bool {
        self.versioning
            .as_ref()
            .and_then(|v| v.compression)
            .unwrap_or(false)
    }

    // Validation

    pub fn min_payload_bytes(&self) -> usize {
        self.validation
            .as_ref()
            .and_then(|v| v.min_payload_bytes)
            .unwrap_or(DEFAULT_MIN_PAYLOAD_BYTES)
    }

    pub fn remove_invalid(&self) -> bool {
        self.validation
            .as_ref()
            .and_then(|v| v.remove_invalid)
            .unwrap_or(false)
    }

    // Monitoring

    pub fn expected_min_records(&self) -> usize {
        self.monitoring
            .as_ref()
            .and_then(|m| m.expected_min_records)
            .unwrap_or(DEFAULT_EXPECTED_MIN_RECORDS)
    }

    pub fn min_artifacts(&self) -> usize {
        self.monitoring
            .as_ref()
            .and_then(|m| m.min_artifacts)
            .unwrap_or(1)
    }

    // Drift

    pub fn drift_thresholds(&self) -> crate::diff::Thresholds {
        let drift = self.drift.as_ref();
        crate::diff::Thresholds {
            abs: drift
                .and_then(|d| d.abs_threshold)
                .unwrap_or(DEFAULT_ABS_THRESHOLD),
            pct: drift
                .and_then(|d| d.pct_threshold)
                .unwrap_or(DEFAULT_PCT_THRESHOLD),
        }
    }

    /// Settings that load fine but are likely mistakes.
    pub fn diagnostics(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.versioning_enabled() && self.max_versions() == 0 {
            out.push(
                "versioning.max_versions is 0; retention will remove every version including the new one"
                    .to_string(),
            );
        }
        let thresholds = self.drift_thresholds();
        if thresholds.abs < 0.0 || thresholds.pct < 0.0 {
            out.push(format!(
                "Negative drift threshold (abs {}, pct {}); every compared field will be significant",
                thresholds.abs, thresholds.pct
            ));
        }
        out
    }

    /// Log [`Config::diagnostics`]. Call once a subscriber is installed.
    pub fn emit_diagnostics(&self) {
        for message in self.diagnostics() {
            tracing::warn!("{message}");
        }
    }
}

fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

fn global_dir_from_env<F>(get_env: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    get_env("PERFVAULT_HOME").map_or_else(
        || {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".perfvault")
        },
        PathBuf::from,
    )
}

fn merge_paths(base: Option<PathSettings>, other: Option<PathSettings>) -> Option<PathSettings> {
    match (base, other) {
        (Some(base), Some(other)) => Some(PathSettings {
            base_dir: other.base_dir.or(base.base_dir),
            raw_data_dir: other.raw_data_dir.or(base.raw_data_dir),
            archive_dir: other.archive_dir.or(base.archive_dir),
            report_dir: other.report_dir.or(base.report_dir),
            log_dir: other.log_dir.or(base.log_dir),
        }),
        (None, Some(other)) => Some(other),
        (Some(base), None) => Some(base),
        (None, None) => None,
    }
}

fn merge_targets(
    base: Option<TargetSettings>,
    other: Option<TargetSettings>,
) -> Option<TargetSettings> {
    match (base, other) {
        (Some(base), Some(other)) => Some(TargetSettings {
            models: other.models.or(base.models),
            sequences: other.sequences.or(base.sequences),
        }),
        (None, Some(other)) => Some(other),
        (Some(base), None) => Some(base),
        (None, None) => None,
    }
}

fn merge_versioning(
    base: Option<VersioningSettings>,
    other: Option<VersioningSettings>,
) -> Option<VersioningSettings> {
    match (base, other) {
        (Some(base), Some(other)) => Some(VersioningSettings {
            enabled: other.enabled.or(base.enabled),
            max_versions: other.max_versions.or(base.max_versions),
            compression: other.compression.or(base.compression),
        }),
        (None, Some(other)) => Some(other),
        (Some(base), None) => Some(base),
        (None, None) => None,
    }
}

fn merge_validation(
    base: Option<ValidationSettings>,
    other: Option<ValidationSettings>,
) -> Option<ValidationSettings> {
    match (base, other) {
        (Some(base), Some(other)) => Some(ValidationSettings {
            min_payload_bytes: other.min_payload_bytes.or(base.min_payload_bytes),
            remove_invalid: other.remove_invalid.or(base.remove_invalid),
        }),
        (None, Some(other)) => Some(other),
        (Some(base), None) => Some(base),
        (None, None) => None,
    }
}

fn merge_monitoring(
    base: Option<MonitoringSettings>,
    other: Option<MonitoringSettings>,
) -> Option<MonitoringSettings> {
    match (base, other) {
        (Some(base), Some(other)) => Some(MonitoringSettings {
            expected_min_records: other.expected_min_records.or(base.expected_min_records),
            min_artifacts: other.min_artifacts.or(base.min_artifacts),
        }),
        (None, Some(other)) => Some(other),
        (Some(base), None) => Some(base),
        (None, None) => None,
    }
}

fn merge_drift(base: Option<DriftSettings>, other: Option<DriftSettings>) -> Option<DriftSettings> {
    match (base, other) {
        (Some(base), Some(other)) => Some(DriftSettings {
            abs_threshold: other.abs_threshold.or(base.abs_threshold),
            pct_threshold: other.pct_threshold.or(base.pct_threshold),
        }),
        (None, Some(other)) => Some(other),
        (Some(base), None) => Some(base),
        (None, None) => None,
    }
}
