//! Error types for collsync-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{EntityKey, EntityKind};

/// All errors that can arise from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Underlying I/O failure while reading or writing a snapshot.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (snapshot save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the snapshot path.
    #[error("failed to parse registry snapshot at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The snapshot file did not exist at the expected path.
    #[error("registry snapshot not found at {path}")]
    SnapshotNotFound { path: PathBuf },

    /// An entity addressed by key does not exist.
    #[error("{kind} {key} not found")]
    NotFound { kind: EntityKind, key: EntityKey },

    /// The registry refused the request (validation, conflict, permissions).
    #[error("registry rejected {action}: {message}")]
    Rejected { action: String, message: String },

    /// A paginated listing failed part-way; no partial result is returned.
    #[error("listing {kind}s failed at offset {offset}: {message}")]
    Listing {
        kind: EntityKind,
        offset: u64,
        message: String,
    },
}

/// Errors from loading the YAML run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found at {path}")]
    NotFound { path: PathBuf },

    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors from reading an external source export. Always fatal for a run.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed export {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("source not configured: {0}")]
    NotConfigured(String),
}

/// Convenience constructor for [`RegistryError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RegistryError {
    RegistryError::Io {
        path: path.into(),
        source,
    }
}
