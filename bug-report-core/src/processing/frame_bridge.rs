use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::models::clip::BridgeStats;
use crate::models::error::RecordingError;
use crate::models::frame::{FrameSample, PixelFormat};
use crate::processing::frame_queue::{FrameQueue, PushOutcome};
use crate::traits::frame_source::FrameSink;

/// How the writer thread ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterExit {
    pub frames_written: u64,
    /// Set when the encoder input pipe failed (typically: the encoder died).
    pub error: Option<String>,
}

struct BridgeInner {
    queue: FrameQueue,
    width: u32,
    height: u32,
    format: PixelFormat,
    accepted: AtomicU64,
    dropped: AtomicU64,
    written: AtomicU64,
    last_written: Mutex<Option<FrameSample>>,
}

/// Feeds raw frames into the encoder's input pipe.
///
/// ```text
/// [capture thread] → push_frame → [FrameQueue] → [writer thread] → encoder stdin
/// ```
///
/// `push_frame` never blocks on the pipe: when the queue is saturated the
/// frame is dropped and counted. Frames reach the pipe in arrival order.
#[derive(Clone)]
pub struct FrameBridge {
    inner: Arc<BridgeInner>,
}

impl FrameBridge {
    pub fn new(width: u32, height: u32, format: PixelFormat, capacity: usize) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                queue: FrameQueue::new(capacity),
                width,
                height,
                format,
                accepted: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                written: AtomicU64::new(0),
                last_written: Mutex::new(None),
            }),
        }
    }

    pub fn push_frame(&self, sample: FrameSample) -> bool {
        let inner = &self.inner;
        if sample.width != inner.width || sample.height != inner.height || sample.format != inner.format {
            log::debug!(
                "dropping {}x{} {:?} frame, session expects {}x{} {:?}",
                sample.width,
                sample.height,
                sample.format,
                inner.width,
                inner.height,
                inner.format
            );
            inner.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        match inner.queue.try_push(sample) {
            PushOutcome::Accepted => {
                inner.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            PushOutcome::Full | PushOutcome::Closed => {
                inner.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Starts the writer thread that drains the queue into `input`.
    ///
    /// `input` is dropped (closing the pipe) when the thread ends.
    pub fn spawn_writer(
        &self,
        input: Box<dyn Write + Send>,
    ) -> Result<thread::JoinHandle<WriterExit>, RecordingError> {
        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name("frame-bridge-writer".into())
            .spawn(move || {
                let mut input = input;
                let mut frames_written = 0u64;
                while let Some(frame) = inner.queue.pop_blocking() {
                    if let Err(e) = input.write_all(&frame.pixels) {
                        let discarded = inner.queue.abort();
                        inner.dropped.fetch_add(discarded as u64, Ordering::Relaxed);
                        log::warn!("encoder input failed after {} frames: {}", frames_written, e);
                        return WriterExit {
                            frames_written,
                            error: Some(e.to_string()),
                        };
                    }
                    frames_written += 1;
                    inner.written.fetch_add(1, Ordering::Relaxed);
                    *inner.last_written.lock() = Some(frame);
                }

                let error = input.flush().err().map(|e| e.to_string());
                log::debug!("frame writer drained, {} frames written", frames_written);
                WriterExit {
                    frames_written,
                    error,
                }
            })
            .map_err(|e| RecordingError::LaunchFailure(format!("failed to spawn frame writer: {}", e)))
    }

    /// Stops accepting frames. The writer delivers what is queued, then
    /// closes the encoder input.
    pub fn finish(&self) {
        self.inner.queue.close();
    }

    /// Stops accepting frames and discards what is queued.
    pub fn abort(&self) {
        let discarded = self.inner.queue.abort();
        self.inner.dropped.fetch_add(discarded as u64, Ordering::Relaxed);
    }

    pub fn accepted_frames(&self) -> u64 {
        self.inner.accepted.load(Ordering::Relaxed)
    }

    pub fn dropped_frames(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn written_frames(&self) -> u64 {
        self.inner.written.load(Ordering::Relaxed)
    }

    /// Most recent frame delivered to the encoder, used as the report
    /// screenshot.
    pub fn last_written_frame(&self) -> Option<FrameSample> {
        self.inner.last_written.lock().clone()
    }

    pub fn pending_frames(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            accepted_frames: self.accepted_frames(),
            dropped_frames: self.dropped_frames(),
            written_frames: self.written_frames(),
        }
    }

    pub fn drop_rate(&self) -> f64 {
        self.stats().drop_rate()
    }
}

impl FrameSink for FrameBridge {
    fn push_frame(&self, sample: FrameSample) -> bool {
        FrameBridge::push_frame(self, sample)
    }
}
