use std::time::Duration;

use crate::models::frame::{FrameSample, PixelFormat};
use crate::traits::frame_source::{FrameSink, FrameSource};

/// Fixed-interval gate driven by the host's frame clock.
///
/// The host may tick faster than the capture rate (e.g. 144 Hz rendering
/// with 30 fps capture); only ticks at or past the next due time pass.
#[derive(Debug, Clone)]
pub struct FrameCadence {
    interval: Duration,
    next_due: Option<Duration>,
}

impl FrameCadence {
    pub fn new(fps: u32) -> Self {
        Self {
            interval: Duration::from_secs(1) / fps.max(1),
            next_due: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `true` when a frame should be captured at `now`.
    pub fn is_due(&mut self, now: Duration) -> bool {
        let base = match self.next_due {
            Some(due) if now < due => return false,
            // Schedule from the due time so the rate does not drift, unless we
            // fell more than one interval behind.
            Some(due) if now - due < self.interval => due,
            _ => now,
        };
        self.next_due = Some(base + self.interval);
        true
    }

    pub fn reset(&mut self) {
        self.next_due = None;
    }
}

/// What one `poll` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    NotDue,
    NoFrame,
    Accepted,
    Dropped,
}

/// Pulls frames from the host at a fixed cadence and hands them to a sink.
///
/// Holds no frames itself.
pub struct FrameSourceAdapter<S: FrameSource> {
    source: S,
    cadence: FrameCadence,
    pad_odd_dimensions: bool,
}

impl<S: FrameSource> FrameSourceAdapter<S> {
    pub fn new(source: S, fps: u32) -> Self {
        Self {
            source,
            cadence: FrameCadence::new(fps),
            pad_odd_dimensions: false,
        }
    }

    /// Pad odd-sized frames to even dimensions before handing them over.
    pub fn with_padding(mut self, enabled: bool) -> Self {
        self.pad_odd_dimensions = enabled;
        self
    }

    /// Call once per rendered frame.
    pub fn poll(&mut self, now: Duration, sink: &dyn FrameSink) -> PollOutcome {
        if !self.cadence.is_due(now) {
            return PollOutcome::NotDue;
        }
        let Some(mut frame) = self.source.capture(now) else {
            return PollOutcome::NoFrame;
        };
        if self.pad_odd_dimensions {
            frame = frame.pad_to_even();
        }
        if sink.push_frame(frame) {
            PollOutcome::Accepted
        } else {
            PollOutcome::Dropped
        }
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

/// Generates a moving gradient, for demos and soak tests without a renderer.
#[derive(Debug, Clone)]
pub struct SyntheticFrameSource {
    width: u32,
    height: u32,
    format: PixelFormat,
    frame_number: u64,
}

impl SyntheticFrameSource {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            frame_number: 0,
        }
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_number
    }
}

impl FrameSource for SyntheticFrameSource {
    fn capture(&mut self, timestamp: Duration) -> Option<FrameSample> {
        let shift = (self.frame_number % 256) as u8;
        let mut pixels = Vec::with_capacity(FrameSample::expected_len(self.width, self.height, self.format));
        for y in 0..self.height {
            for x in 0..self.width {
                let r = (x as u8).wrapping_add(shift);
                let g = (y as u8).wrapping_add(shift);
                let b = shift;
                match self.format {
                    PixelFormat::Bgra => pixels.extend_from_slice(&[b, g, r, 255]),
                    PixelFormat::Rgba => pixels.extend_from_slice(&[r, g, b, 255]),
                }
            }
        }
        self.frame_number += 1;
        FrameSample::new(pixels, self.width, self.height, self.format, timestamp).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<FrameSample>>,
        reject: bool,
    }

    impl FrameSink for RecordingSink {
        fn push_frame(&self, sample: FrameSample) -> bool {
            if self.reject {
                return false;
            }
            self.frames.lock().push(sample);
            true
        }
    }

    struct Blank;

    impl FrameSource for Blank {
        fn capture(&mut self, _timestamp: Duration) -> Option<FrameSample> {
            None
        }
    }

    #[test]
    fn cadence_limits_fast_host_to_target_rate() {
        let mut cadence = FrameCadence::new(30);
        let due = (0..100u64)
            .filter(|tick| cadence.is_due(Duration::from_millis(*tick * 10)))
            .count();
        assert!((29..=31).contains(&due), "{} frames due in one second", due);
    }

    #[test]
    fn cadence_does_not_burst_after_stall() {
        let mut cadence = FrameCadence::new(10);
        assert!(cadence.is_due(Duration::ZERO));
        assert!(cadence.is_due(Duration::from_secs(5)));
        assert!(!cadence.is_due(Duration::from_millis(5_010)));
    }

    #[test]
    fn adapter_forwards_frames_when_due() {
        let sink = RecordingSink::default();
        let mut adapter = FrameSourceAdapter::new(SyntheticFrameSource::new(4, 2, PixelFormat::Bgra), 10);

        assert_eq!(adapter.poll(Duration::ZERO, &sink), PollOutcome::Accepted);
        assert_eq!(adapter.poll(Duration::from_millis(50), &sink), PollOutcome::NotDue);
        assert_eq!(adapter.poll(Duration::from_millis(100), &sink), PollOutcome::Accepted);

        let frames = sink.frames.lock();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].timestamp, Duration::from_millis(100));
        assert_ne!(frames[0].pixels, frames[1].pixels);
    }

    #[test]
    fn adapter_reports_drops_and_missing_frames() {
        let rejecting = RecordingSink {
            reject: true,
            ..Default::default()
        };
        let mut adapter = FrameSourceAdapter::new(SyntheticFrameSource::new(2, 2, PixelFormat::Rgba), 30);
        assert_eq!(adapter.poll(Duration::ZERO, &rejecting), PollOutcome::Dropped);

        let mut blank = FrameSourceAdapter::new(Blank, 30);
        assert_eq!(blank.poll(Duration::ZERO, &rejecting), PollOutcome::NoFrame);
    }

    #[test]
    fn adapter_pads_odd_frames() {
        let sink = RecordingSink::default();
        let mut adapter =
            FrameSourceAdapter::new(SyntheticFrameSource::new(3, 3, PixelFormat::Bgra), 30).with_padding(true);
        adapter.poll(Duration::ZERO, &sink);

        let frames = sink.frames.lock();
        assert_eq!((frames[0].width, frames[0].height), (4, 4));
    }
}
