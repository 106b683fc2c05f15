//! Error types for collsync-sync.

use thiserror::Error;

use collsync_core::{RegistryError, SourceError};

/// Fatal errors of a sync run. Per-record failures never surface here; they
/// are recorded as failed actions in the report.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Bulk load from the registry failed.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The external source could not be read.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// A blocking load or reconcile task panicked or was cancelled.
    #[error("{task} task join error: {message}")]
    Task { task: &'static str, message: String },
}

/// A registry call failed inside a strategy. The failure is already recorded
/// by the executor; the strategy abandons the rest of the record.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("registry step failed")]
pub struct StepFailed;

/// Notification delivery failure. Logged and recorded, never fatal.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("I/O error delivering notification to {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render notification: {0}")]
    Render(String),
}
