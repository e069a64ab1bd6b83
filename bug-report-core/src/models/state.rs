use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a report ended in `ReportState::Failed`.
///
/// Every terminal failure carries one of these so the UI can show a
/// human-readable reason and telemetry can key off `code()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    LaunchFailure(String),
    EncoderCrashed(String),
    FinalizeFailure(String),
    MissingArtifact(String),
    NetworkError(String),
    RejectedByServer(String),
    CancelledByUser,
    StorageError(String),
}

impl FailureReason {
    /// Stable machine-readable identifier.
    pub fn code(&self) -> &'static str {
        match self {
            Self::LaunchFailure(_) => "launch_failure",
            Self::EncoderCrashed(_) => "encoder_crashed",
            Self::FinalizeFailure(_) => "finalize_failure",
            Self::MissingArtifact(_) => "missing_artifact",
            Self::NetworkError(_) => "network_error",
            Self::RejectedByServer(_) => "rejected_by_server",
            Self::CancelledByUser => "cancelled_by_user",
            Self::StorageError(_) => "storage_error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::LaunchFailure(m)
            | Self::EncoderCrashed(m)
            | Self::FinalizeFailure(m)
            | Self::MissingArtifact(m)
            | Self::NetworkError(m)
            | Self::RejectedByServer(m)
            | Self::StorageError(m) => m,
            Self::CancelledByUser => "cancelled by user",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

/// Report lifecycle state machine.
///
/// State transitions:
/// ```text
/// idle → recording → finalizing → bundling → uploading → completed
///   └──────┴────────────┴────────────┴───────────┴──→ failed
/// completed / failed → idle   (explicit reset before a new cycle)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportState {
    Idle,
    Recording,
    Finalizing,
    Bundling,
    Uploading { bytes_sent: u64, total_bytes: u64 },
    Completed { confirmation_id: String },
    Failed(FailureReason),
}

impl ReportState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Finalizing => "finalizing",
            Self::Bundling => "bundling",
            Self::Uploading { .. } => "uploading",
            Self::Completed { .. } => "completed",
            Self::Failed(_) => "failed",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Stages are never skipped. `Uploading → Uploading` is allowed so
    /// progress updates can flow through the same path.
    pub fn permits(&self, next: &ReportState) -> bool {
        use ReportState::*;
        match (self, next) {
            (Idle, Recording) => true,
            (Recording, Finalizing) => true,
            (Finalizing, Bundling) => true,
            (Bundling, Uploading { .. }) => true,
            (Uploading { .. }, Uploading { .. }) => true,
            (Uploading { .. }, Completed { .. }) => true,
            (Completed { .. } | Failed(_), Idle) => true,
            (current, Failed(_)) => !current.is_terminal(),
            _ => false,
        }
    }

    /// Upload progress in percent (0–100) for display.
    pub fn progress_percent(&self) -> f32 {
        match self {
            Self::Uploading {
                bytes_sent,
                total_bytes,
            } => {
                if *total_bytes == 0 {
                    0.0
                } else {
                    (*bytes_sent as f64 / *total_bytes as f64 * 100.0) as f32
                }
            }
            Self::Completed { .. } => 100.0,
            _ => 0.0,
        }
    }
}

impl fmt::Display for ReportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed ({reason})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Health of the external encoder process behind an active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionHealth {
    Running,
    Stopping,
    Crashed { code: Option<i32>, stderr: String },
}

impl SessionHealth {
    pub fn is_crashed(&self) -> bool {
        matches!(self, Self::Crashed { .. })
    }
}
