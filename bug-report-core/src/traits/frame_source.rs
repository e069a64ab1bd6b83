use std::time::Duration;

use crate::models::frame::FrameSample;

/// Producer side of the capture path: the host renderer.
pub trait FrameSource: Send {
    /// Reads the current frame, or `None` when no frame is available
    /// (e.g. the viewport is minimized).
    fn capture(&mut self, timestamp: Duration) -> Option<FrameSample>;
}

/// Consumer side of the capture path.
///
/// `push_frame` must return promptly: it accepts or drops, never waits on
/// the encoder.
pub trait FrameSink: Send + Sync {
    /// Returns `true` when the frame was accepted, `false` when dropped.
    fn push_frame(&self, sample: FrameSample) -> bool;
}
