//! Guardian error types with stable numeric codes.
//!
//! [`GuardianError`] is the central error type for every engine. Per-table
//! failures never surface here: they are collected into the per-table slots
//! of artifacts, rollback logs and sync jobs. Only failures that stop a whole
//! operation are returned as a `GuardianError`.

use std::path::{Path, PathBuf};

use crate::store::StoreError;

/// Top-level error enum with numeric error codes.
///
/// # Error Code Ranges
///
/// | Range     | Category                  |
/// |-----------|---------------------------|
/// | 1000–1999 | Configuration / validation |
/// | 2000–2999 | Not found / conflict      |
/// | 3000–3999 | Store / I/O / internal    |
/// | 4000–4999 | Refused operations        |
#[derive(Debug, thiserror::Error)]
pub enum GuardianError {
    /// Required configuration is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A backup artifact failed structural validation.
    #[error("invalid backup artifact: {0}")]
    InvalidArtifact(String),

    /// A command argument could not be interpreted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested backup artifact does not exist.
    #[error("backup artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    /// The requested schema version has never been captured.
    #[error("schema version not found: {0}")]
    SchemaVersionNotFound(String),

    /// A schema version with the same label is already stored.
    #[error("schema version already exists: {0}")]
    SchemaVersionExists(String),

    /// The named environment is not configured.
    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),

    /// Error propagated from the live data store.
    #[error("data store error: {0}")]
    Store(#[from] StoreError),

    /// Filesystem failure in the snapshot store.
    #[error("i/o error at {}: {source}", path.display())]
    Io {
        /// Path involved in the failed operation.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Writing to a production environment without an explicit override.
    #[error("refusing to write to production environment `{0}` without force override")]
    ProductionWriteRefused(String),

    /// The operation was cancelled at a step boundary.
    #[error("operation cancelled")]
    Cancelled,

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GuardianError {
    /// Builds an [`GuardianError::Io`] for the given path.
    #[must_use]
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Config(_) => 1001,
            Self::InvalidArtifact(_) => 1002,
            Self::InvalidArgument(_) => 1003,
            Self::ArtifactNotFound(_) => 2001,
            Self::SchemaVersionNotFound(_) => 2002,
            Self::UnknownEnvironment(_) => 2003,
            Self::SchemaVersionExists(_) => 2004,
            Self::Internal(_) => 3000,
            Self::Store(_) => 3001,
            Self::Io { .. } => 3002,
            Self::Serialization(_) => 3003,
            Self::ProductionWriteRefused(_) => 4001,
            Self::Cancelled => 4002,
        }
    }

    /// Returns `true` for failures caused by a bad artifact or argument
    /// rather than by the environment.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidArtifact(_) | Self::InvalidArgument(_) | Self::ArtifactNotFound(_)
        )
    }
}
