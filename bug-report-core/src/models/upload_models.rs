use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::FailureReason;

/// Handle returned by `UploadManager::submit`; one per bundle id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadTaskHandle {
    bundle_id: String,
}

impl UploadTaskHandle {
    /// Handle for a bundle id, e.g. one read back from the upload store.
    pub fn new(bundle_id: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
        }
    }

    pub fn bundle_id(&self) -> &str {
        &self.bundle_id
    }
}

/// Phase recorded in a persisted upload task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Pending,
    InProgress,
    Failed,
    Cancelled,
}

/// Durable record of one bundle upload.
///
/// Written after every acknowledged chunk so a restarted process can pick
/// the transfer up where it stopped. Deleted once the server confirms the
/// report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTask {
    pub bundle_id: String,
    pub bundle_directory: PathBuf,
    pub destination: String,

    /// Server-side upload id, assigned when the upload is opened.
    pub upload_id: Option<String>,

    bytes_sent: u64,
    pub total_bytes: u64,
    pub retry_count: u32,
    pub last_error: Option<String>,

    /// Terminal failure, kept so a restarted process can still report it.
    #[serde(default)]
    pub failure: Option<FailureReason>,

    pub phase: TaskPhase,
    pub updated_at: DateTime<Utc>,
}

impl UploadTask {
    pub fn new(
        bundle_id: impl Into<String>,
        bundle_directory: PathBuf,
        destination: impl Into<String>,
        total_bytes: u64,
    ) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            bundle_directory,
            destination: destination.into(),
            upload_id: None,
            bytes_sent: 0,
            total_bytes,
            retry_count: 0,
            last_error: None,
            failure: None,
            phase: TaskPhase::Pending,
            updated_at: Utc::now(),
        }
    }

    /// Progress cursor: bytes the server has acknowledged.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Moves the cursor to `acknowledged`.
    ///
    /// The cursor never moves backwards; a smaller value is ignored. A value
    /// past `total_bytes` is rejected.
    pub fn advance_to(&mut self, acknowledged: u64) -> Result<(), String> {
        if acknowledged > self.total_bytes {
            return Err(format!(
                "acknowledged offset {} exceeds bundle size {}",
                acknowledged, self.total_bytes
            ));
        }
        if acknowledged > self.bytes_sent {
            self.bytes_sent = acknowledged;
            self.updated_at = Utc::now();
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_sent == self.total_bytes
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
    }

    pub fn set_phase(&mut self, phase: TaskPhase) {
        self.phase = phase;
        self.updated_at = Utc::now();
    }
}

/// Status of an upload as seen by callers of the upload manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    Pending,
    InProgress { bytes_sent: u64, total_bytes: u64 },
    Succeeded { confirmation_id: String },
    Failed { reason: FailureReason },
    Cancelled,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }

    pub fn progress_percent(&self) -> f32 {
        match self {
            Self::InProgress {
                bytes_sent,
                total_bytes,
            } if *total_bytes > 0 => (*bytes_sent as f64 / *total_bytes as f64 * 100.0) as f32,
            Self::Succeeded { .. } => 100.0,
            _ => 0.0,
        }
    }
}
