use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use super::frame::{FrameSample, PixelFormat};
use crate::upload::retry::RetryPolicy;

/// Configuration for one recording session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Frame width in pixels (default: 1280). Must be even.
    pub width: u32,

    /// Frame height in pixels (default: 720). Must be even.
    pub height: u32,

    /// Capture cadence in frames per second (default: 30).
    pub fps: u32,

    pub pixel_format: PixelFormat,

    /// Length of the rolling window in seconds (default: 60).
    pub rolling_window_secs: u32,

    /// Length of one encoder output segment in seconds (default: 10).
    pub segment_secs: u32,

    /// Optional hard cap on bytes retained on disk by the rolling buffer.
    pub max_buffer_bytes: Option<u64>,

    /// Frames that may wait for the encoder pipe before new ones are dropped.
    pub frame_queue_capacity: usize,

    /// How long a graceful stop may take before the encoder is killed.
    pub stop_timeout_ms: u64,

    /// Interval between encoder health checks.
    pub health_poll_interval_ms: u64,

    /// Interval between rolling-window pruning passes.
    pub prune_interval_ms: u64,

    /// Parent directory for per-session scratch directories.
    pub work_directory: PathBuf,
}

impl RecordingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.fps == 0 {
            return Err("fps must be positive".into());
        }
        if self.width == 0 || self.height == 0 {
            return Err(format!("invalid frame size {}x{}", self.width, self.height));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(format!(
                "frame size {}x{} must have even dimensions",
                self.width, self.height
            ));
        }
        if self.segment_secs == 0 {
            return Err("segment length must be positive".into());
        }
        if self.rolling_window_secs < self.segment_secs {
            return Err(format!(
                "rolling window ({}s) is shorter than one segment ({}s)",
                self.rolling_window_secs, self.segment_secs
            ));
        }
        if self.frame_queue_capacity == 0 {
            return Err("frame queue capacity must be positive".into());
        }
        if self.max_buffer_bytes == Some(0) {
            return Err("max buffer bytes must be positive when set".into());
        }
        Ok(())
    }

    /// Number of complete segments that make up one exported clip.
    pub fn segments_in_clip(&self) -> usize {
        self.rolling_window_secs.div_ceil(self.segment_secs) as usize
    }

    /// Number of segments kept on disk: the clip plus the one being written.
    pub fn segments_to_keep(&self) -> usize {
        self.segments_in_clip() + 1
    }

    pub fn frame_len(&self) -> usize {
        FrameSample::expected_len(self.width, self.height, self.pixel_format)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_interval_ms.max(1))
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            pixel_format: PixelFormat::Bgra,
            rolling_window_secs: 60,
            segment_secs: 10,
            max_buffer_bytes: None,
            frame_queue_capacity: 8,
            stop_timeout_ms: 5_000,
            health_poll_interval_ms: 100,
            prune_interval_ms: 1_000,
            work_directory: std::env::temp_dir().join("bug-report").join("sessions"),
        }
    }
}

/// Configuration for the upload manager and its HTTP transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Base URL of the collection service, e.g. `https://reports.example.com/api`.
    pub endpoint: String,

    pub project_id: String,

    /// Bearer token; anonymous submission when `None`.
    pub api_token: Option<String>,

    /// Bytes per chunk request (default: 1 MiB).
    pub chunk_size: usize,

    pub retry: RetryPolicy,

    /// Directory holding the persisted upload task records.
    pub state_directory: PathBuf,

    /// Delete the local bundle once the server has confirmed it.
    pub purge_after_upload: bool,

    pub request_timeout_ms: u64,
}

impl UploadConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.endpoint.starts_with("https://") || self.endpoint.starts_with("http://")) {
            return Err(format!("endpoint must be an http(s) URL, got {:?}", self.endpoint));
        }
        if self.project_id.trim().is_empty() {
            return Err("project id is required".into());
        }
        if self.chunk_size == 0 {
            return Err("chunk size must be positive".into());
        }
        self.retry.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://localhost/api".into(),
            project_id: String::new(),
            api_token: None,
            chunk_size: 1024 * 1024,
            retry: RetryPolicy::default(),
            state_directory: std::env::temp_dir().join("bug-report").join("uploads"),
            purge_after_upload: true,
            request_timeout_ms: 30_000,
        }
    }
}

/// Top-level reporter configuration, loadable from a JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfiguration {
    pub recording: RecordingConfig,
    pub upload: UploadConfig,

    /// Directory where finalized bundles are kept until uploaded.
    pub bundle_directory: PathBuf,

    /// Engine/host version recorded in every report's metadata.
    pub engine_version: Option<String>,

    /// Number of recent log lines kept for reports.
    pub log_capture_lines: usize,

    /// Release label for reports that name neither a release id nor a label.
    pub release_label: Option<String>,
}

impl ReporterConfiguration {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config: Self =
            serde_json::from_str(&json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.recording
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("recording: {}", e)))?;
        self.upload
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("upload: {}", e)))?;
        Ok(())
    }
}

impl Default for ReporterConfiguration {
    fn default() -> Self {
        Self {
            recording: RecordingConfig::default(),
            upload: UploadConfig::default(),
            bundle_directory: std::env::temp_dir().join("bug-report").join("bundles"),
            engine_version: None,
            log_capture_lines: 2_000,
            release_label: None,
        }
    }
}
