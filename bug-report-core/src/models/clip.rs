use std::path::PathBuf;
use std::time::Duration;

/// Result returned when a recording session is stopped and its clip finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipOutcome {
    pub session_id: String,

    /// Merged clip, inside the session scratch directory.
    pub path: PathBuf,

    /// Session scratch directory; safe to delete once the clip is bundled.
    pub session_directory: PathBuf,

    /// The encoder had to be killed or exited non-zero, so the clip may be
    /// truncated.
    pub best_effort: bool,

    pub segment_count: usize,
    pub size_bytes: u64,
    pub frames_written: u64,
    pub frames_dropped: u64,
    pub session_duration: Duration,
}

/// Snapshot of the encoder bridge counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BridgeStats {
    pub accepted_frames: u64,
    pub dropped_frames: u64,
    pub written_frames: u64,
}

impl BridgeStats {
    /// Fraction of offered frames that were dropped (0.0–1.0).
    pub fn drop_rate(&self) -> f64 {
        let offered = self.accepted_frames + self.dropped_frames;
        if offered == 0 {
            0.0
        } else {
            self.dropped_frames as f64 / offered as f64
        }
    }
}
