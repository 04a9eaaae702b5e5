//! Versioned, retention-bounded snapshot archive.
//!
//! Layout under the archive root:
//!
//! ```text
//! archive.lock
//! version_20250101_120000/
//!     e2e.csv            (or e2e.csv.zst when compressed)
//!     interactivity.csv
//!     merged.csv
//!     metadata.json      (written last; digests of every table)
//! .staging-XXXXXX/       (in-flight version, never listed)
//! ```
//!
//! A version is built inside a staging directory and published with a single
//! rename. A directory without `metadata.json` is not a version.

use crate::dataset::{MODEL_COLUMN, SEQUENCE_COLUMN, Table};
use crate::error::{Error, Result};
use crate::join::{KEY_FIELDS, MatchStats, index_rows};
use chrono::{DateTime, NaiveDateTime, Utc};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const VERSION_PREFIX: &str = "version_";
pub const VERSION_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";
pub const METADATA_FILE: &str = "metadata.json";
pub const LOCK_FILE: &str = "archive.lock";
const STAGING_PREFIX: &str = ".staging-";
const METADATA_FORMAT: u32 = 1;
const ZSTD_LEVEL: i32 = 3;
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Sortable version identifier, `version_YYYYmmdd_HHMMSS`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
    pub fn from_time(at: DateTime<Utc>) -> Self {
        Self(format!("{VERSION_PREFIX}{}", at.format(VERSION_TIME_FORMAT)))
    }

    /// Accepts either the full directory name or just the timestamp part.
    pub fn parse(value: &str) -> Option<Self> {
        let stamp = value.strip_prefix(VERSION_PREFIX).unwrap_or(value);
        NaiveDateTime::parse_from_str(stamp, VERSION_TIME_FORMAT).ok()?;
        Some(Self(format!("{VERSION_PREFIX}{stamp}")))
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let stamp = self.0.strip_prefix(VERSION_PREFIX)?;
        NaiveDateTime::parse_from_str(stamp, VERSION_TIME_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    E2e,
    Interactivity,
    Merged,
}

impl ArtifactKind {
    pub const ALL: [Self; 3] = [Self::E2e, Self::Interactivity, Self::Merged];

    pub const fn stem(self) -> &'static str {
        match self {
            Self::E2e => "e2e",
            Self::Interactivity => "interactivity",
            Self::Merged => "merged",
        }
    }

    fn file_name(self, compressed: bool) -> String {
        if compressed {
            format!("{}.csv.zst", self.stem())
        } else {
            format!("{}.csv", self.stem())
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stem())
    }
}

/// Manifest entry for one stored table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub kind: ArtifactKind,
    pub file: String,
    pub records: usize,
    pub bytes: u64,
    pub sha256: String,
    pub compressed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub models: Vec<String>,
    pub sequences: Vec<String>,
}

/// Contents of `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub format: u32,
    pub version_id: VersionId,
    pub pipeline_id: String,
    pub created_at: DateTime<Utc>,
    pub source: SourceConfig,
    pub artifacts: Vec<ArtifactEntry>,
    #[serde(default)]
    pub match_stats: Option<MatchStats>,
}

impl VersionMetadata {
    pub fn artifact(&self, kind: ArtifactKind) -> Option<&ArtifactEntry> {
        self.artifacts.iter().find(|a| a.kind == kind)
    }

    pub fn records(&self, kind: ArtifactKind) -> usize {
        self.artifact(kind).map_or(0, |a| a.records)
    }
}

/// Tables of one run, ready to be archived.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    pub e2e: &'a Table,
    pub interactivity: &'a Table,
    pub merged: &'a Table,
}

impl<'a> Snapshot<'a> {
    fn table(&self, kind: ArtifactKind) -> &'a Table {
        match kind {
            ArtifactKind::E2e => self.e2e,
            ArtifactKind::Interactivity => self.interactivity,
            ArtifactKind::Merged => self.merged,
        }
    }
}

/// Everything besides the tables that goes into a version.
#[derive(Debug, Clone)]
pub struct VersionRequest {
    pub pipeline_id: String,
    pub created_at: DateTime<Utc>,
    pub source: SourceConfig,
    pub match_stats: Option<MatchStats>,
    pub compression: bool,
}

/// A fully loaded and verified version.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedVersion {
    pub metadata: VersionMetadata,
    pub e2e: Table,
    pub interactivity: Table,
    pub merged: Table,
}

impl LoadedVersion {
    pub fn table(&self, kind: ArtifactKind) -> &Table {
        match kind {
            ArtifactKind::E2e => &self.e2e,
            ArtifactKind::Interactivity => &self.interactivity,
            ArtifactKind::Merged => &self.merged,
        }
    }
}

/// Distinct-value profile of one archived table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableProfile {
    pub records: usize,
    pub columns: usize,
    pub models: Vec<String>,
    pub sequences: Vec<String>,
    pub hw_keys: Vec<String>,
    pub precisions: Vec<String>,
    pub unique_keys: usize,
}

impl TableProfile {
    pub fn of(table: &Table) -> Self {
        let collect = |column: &str| -> Vec<String> {
            table
                .distinct(column)
                .into_iter()
                .map(ToString::to_string)
                .collect()
        };
        let has_keys = KEY_FIELDS.iter().all(|f| table.has_column(f));
        Self {
            records: table.len(),
            columns: table.columns.len(),
            models: collect(MODEL_COLUMN),
            sequences: collect(SEQUENCE_COLUMN),
            hw_keys: collect("hwKey"),
            precisions: collect("precision"),
            unique_keys: if has_keys {
                index_rows(&table.rows).len()
            } else {
                0
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionSummary {
    pub version_id: VersionId,
    pub created_at: DateTime<Utc>,
    pub e2e: TableProfile,
    pub interactivity: TableProfile,
    pub merged: TableProfile,
}

/// Exclusive hold on the archive. Released on drop.
#[derive(Debug)]
pub struct ArchiveLock {
    file: File,
}

impl Drop for ArchiveLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn lock_file(file: File, timeout: Duration) -> Result<ArchiveLock> {
    let start = Instant::now();
    loop {
        if matches!(FileExt::try_lock_exclusive(&file), Ok(true)) {
            return Ok(ArchiveLock { file });
        }

        if start.elapsed() >= timeout {
            return Err(Error::lock("Timed out waiting for archive lock"));
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Archive {
    root: PathBuf,
}

impl Archive {
    /// Open (and create if needed) an archive rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version_dir(&self, id: &VersionId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Take the single-writer lock.
    pub fn lock(&self, timeout: Duration) -> Result<ArchiveLock> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.root.join(LOCK_FILE))?;
        lock_file(file, timeout)
    }

    /// Remove staging directories left behind by interrupted runs.
    pub fn sweep_staging(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(STAGING_PREFIX) || !entry.path().is_dir() {
                continue;
            }
            match fs::remove_dir_all(entry.path()) {
                Ok(()) => {
                    removed += 1;
                    tracing::info!(dir = %name.to_string_lossy(), "Removed stale staging directory");
                }
                Err(err) => {
                    tracing::warn!(dir = %name.to_string_lossy(), error = %err, "Failed to remove staging directory");
                }
            }
        }
        Ok(removed)
    }

    /// Write a new version. Either every table and the metadata land under
    /// the version directory, or nothing does.
    ///
    /// Callers are expected to hold [`Archive::lock`].
    pub fn create_version(
        &self,
        snapshot: Snapshot<'_>,
        request: &VersionRequest,
    ) -> Result<VersionMetadata> {
        let id = VersionId::from_time(request.created_at);
        let target = self.version_dir(&id);
        if target.exists() {
            return Err(Error::archive(format!("Version {id} already exists")));
        }

        // Dropping the staging dir on any early return removes partial output.
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.root)?;

        let mut artifacts = Vec::with_capacity(ArtifactKind::ALL.len());
        for kind in ArtifactKind::ALL {
            let table = snapshot.table(kind);
            let csv = table.to_csv_bytes()?;
            let stored = if request.compression {
                zstd::encode_all(csv.as_slice(), ZSTD_LEVEL)?
            } else {
                csv
            };
            let file = kind.file_name(request.compression);
            write_synced(&staging.path().join(&file), &stored)?;
            artifacts.push(ArtifactEntry {
                kind,
                file,
                records: table.len(),
                bytes: stored.len() as u64,
                sha256: sha256_hex(&stored),
                compressed: request.compression,
            });
            tracing::debug!(version = %id, artifact = %kind, records = table.len(), "Staged artifact");
        }

        let metadata = VersionMetadata {
            format: METADATA_FORMAT,
            version_id: id.clone(),
            pipeline_id: request.pipeline_id.clone(),
            created_at: request.created_at,
            source: request.source.clone(),
            artifacts,
            match_stats: request.match_stats,
        };
        let encoded = serde_json::to_vec_pretty(&metadata)?;
        write_synced(&staging.path().join(METADATA_FILE), &encoded)?;

        fs::rename(staging.path(), &target).map_err(|e| {
            Error::archive(format!("Failed to publish version {id}: {e}"))
        })?;
        // The staging path no longer exists, so its cleanup on drop is a no-op.
        drop(staging);

        tracing::info!(
            version = %id,
            dir = %target.display(),
            merged = metadata.records(ArtifactKind::Merged),
            "Archived version"
        );
        Ok(metadata)
    }

    /// Committed versions, newest first.
    pub fn list_versions(&self) -> Result<Vec<VersionId>> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(id) = name
                .to_str()
                .filter(|n| n.starts_with(VERSION_PREFIX))
                .and_then(VersionId::parse)
            else {
                continue;
            };
            if !path.join(METADATA_FILE).is_file() {
                tracing::warn!(dir = %path.display(), "Ignoring version directory without metadata");
                continue;
            }
            versions.push(id);
        }
        versions.sort_by(|a, b| b.cmp(a));
        Ok(versions)
    }

    /// Keep the newest `max_versions` versions and delete the rest.
    ///
    /// Returns the removed ids. A version that fails to delete is logged and
    /// skipped.
    pub fn apply_retention(&self, max_versions: usize) -> Result<Vec<VersionId>> {
        let versions = self.list_versions()?;
        let mut removed = Vec::new();
        for id in versions.into_iter().skip(max_versions) {
            match fs::remove_dir_all(self.version_dir(&id)) {
                Ok(()) => {
                    tracing::info!(version = %id, "Removed old version");
                    removed.push(id);
                }
                Err(err) => {
                    tracing::warn!(version = %id, error = %err, "Failed to remove old version");
                }
            }
        }
        Ok(removed)
    }

    pub fn load_metadata(&self, id: &VersionId) -> Result<VersionMetadata> {
        let path = self.version_dir(id).join(METADATA_FILE);
        if !path.is_file() {
            return Err(Error::VersionNotFound { id: id.to_string() });
        }
        let bytes = fs::read(&path)?;
        let metadata: VersionMetadata = serde_json::from_slice(&bytes).map_err(|e| {
            Error::archive(format!("Malformed metadata for {id}: {e}"))
        })?;
        Ok(metadata)
    }

    fn read_table(&self, id: &VersionId, entry: &ArtifactEntry) -> Result<Table> {
        let path = self.version_dir(id).join(&entry.file);
        let stored = fs::read(&path)?;
        let actual = sha256_hex(&stored);
        if actual != entry.sha256 {
            return Err(Error::Integrity {
                path: path.display().to_string(),
                expected: entry.sha256.clone(),
                actual,
            });
        }
        let csv = if entry.compressed || entry.file.ends_with(".zst") {
            zstd::decode_all(stored.as_slice())?
        } else {
            stored
        };
        Table::read_csv(csv.as_slice())
    }

    /// Load and verify one table of a version.
    pub fn load_table(&self, id: &VersionId, kind: ArtifactKind) -> Result<Table> {
        let metadata = self.load_metadata(id)?;
        let entry = metadata
            .artifact(kind)
            .ok_or_else(|| Error::archive(format!("Version {id} has no {kind} table")))?;
        self.read_table(id, entry)
    }

    /// Load and verify every table of a version.
    pub fn load_version(&self, id: &VersionId) -> Result<LoadedVersion> {
        let metadata = self.load_metadata(id)?;
        let load = |kind: ArtifactKind| -> Result<Table> {
            let entry = metadata
                .artifact(kind)
                .ok_or_else(|| Error::archive(format!("Version {id} has no {kind} table")))?;
            self.read_table(id, entry)
        };
        let e2e = load(ArtifactKind::E2e)?;
        let interactivity = load(ArtifactKind::Interactivity)?;
        let merged = load(ArtifactKind::Merged)?;
        Ok(LoadedVersion {
            metadata,
            e2e,
            interactivity,
            merged,
        })
    }

    pub fn summarize(&self, id: &VersionId) -> Result<VersionSummary> {
        let loaded = self.load_version(id)?;
        Ok(VersionSummary {
            version_id: id.clone(),
            created_at: loaded.metadata.created_at,
            e2e: TableProfile::of(&loaded.e2e),
            interactivity: TableProfile::of(&loaded.interactivity),
            merged: TableProfile::of(&loaded.merged),
        })
    }
}

#[cfg(test)]
#[path = "../tests/common/mod.rs"]
mod test_common;
