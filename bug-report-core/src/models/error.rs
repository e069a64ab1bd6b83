use std::path::PathBuf;

use thiserror::Error;

use super::state::FailureReason;

/// Errors raised by the recording session controller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordingError {
    #[error("a recording session is already active")]
    SessionAlreadyActive,

    #[error("encoder launch failed: {0}")]
    LaunchFailure(String),

    #[error("encoder crashed (exit code {code:?}): {stderr}")]
    EncoderCrashed {
        code: Option<i32>,
        stderr: String,
        partial_clip: Option<PathBuf>,
    },

    #[error("finalize failed: {0}")]
    FinalizeFailure(String),

    #[error("unknown recording session: {0}")]
    UnknownSession(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

/// Errors raised while assembling or reopening a report bundle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BundleError {
    #[error("missing artifact: {0}")]
    MissingArtifact(String),

    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

/// Outcome of a single failed exchange with the collection endpoint.
///
/// `Transient` failures are retried with backoff; `Rejected` ones stop the
/// upload immediately.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Transient(String),

    #[error("rejected by server (HTTP {status}): {reason}")]
    Rejected { status: u16, reason: String },
}

impl TransportError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Errors surfaced by the upload manager API (not by the upload itself,
/// whose failures are reported through `UploadStatus`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("unknown upload task: {0}")]
    UnknownTask(String),

    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

/// Errors surfaced to the UI layer by the report lifecycle.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReportError {
    #[error("cannot {action} while {state}")]
    InvalidTransition { state: String, action: &'static str },

    #[error("report failed: {0}")]
    Failed(FailureReason),

    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
