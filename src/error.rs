//! Error types for perfvault.

use thiserror::Error;

/// Result type alias using our error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for perfvault.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Raw artifact validation errors (fatal to a step, not per-artifact rejections)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Dataset construction errors
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Archive read/write errors
    #[error("Archive error: {0}")]
    Archive(String),

    /// Requested version does not exist in the archive
    #[error("Version not found: {id}")]
    VersionNotFound { id: String },

    /// Archived artifact does not match its recorded digest
    #[error("Integrity error: {path}: expected sha256 {expected}, found {actual}")]
    Integrity {
        path: String,
        expected: String,
        actual: String,
    },

    /// Archive lock could not be acquired
    #[error("Lock error: {0}")]
    Lock(String),

    /// Version comparison errors
    #[error("Diff error: {0}")]
    Diff(String),

    /// Collector boundary errors
    #[error("Collector error: {0}")]
    Collector(String),

    /// Run aborted by the caller
    #[error("Operation aborted")]
    Aborted,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] Box<std::io::Error>),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] Box<serde_json::Error>),

    /// CSV errors
    #[error("CSV error: {0}")]
    Csv(#[from] Box<csv::Error>),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a dataset error.
    pub fn dataset(message: impl Into<String>) -> Self {
        Self::Dataset(message.into())
    }

    /// Create an archive error.
    pub fn archive(message: impl Into<String>) -> Self {
        Self::Archive(message.into())
    }

    /// Create a lock error.
    pub fn lock(message: impl Into<String>) -> Self {
        Self::Lock(message.into())
    }

    /// Create a diff error.
    pub fn diff(message: impl Into<String>) -> Self {
        Self::Diff(message.into())
    }

    /// Create a collector error.
    pub fn collector(message: impl Into<String>) -> Self {
        Self::Collector(message.into())
    }

    /// Short machine-friendly label used in run reports.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
            Self::Dataset(_) => "dataset",
            Self::Archive(_) => "archive",
            Self::VersionNotFound { .. } => "version_not_found",
            Self::Integrity { .. } => "integrity",
            Self::Lock(_) => "lock",
            Self::Diff(_) => "diff",
            Self::Collector(_) => "collector",
            Self::Aborted => "aborted",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Csv(_) => "csv",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Box::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(Box::new(value))
    }
}

impl From<csv::Error> for Error {
    fn from(value: csv::Error) -> Self {
        Self::Csv(Box::new(value))
    }
}
