//! In-process stand-ins for the encoder binary and the collection server.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use bug_report_core::models::error::{RecordingError, TransportError};
use bug_report_core::models::frame::{FrameSample, PixelFormat};
use bug_report_core::models::report::ReportBundle;
use bug_report_core::processing::segment_window::segment_file_name;
use bug_report_core::traits::encoder::{EncoderBackend, EncoderInvocation, EncoderProcess, ProcessExit};
use bug_report_core::traits::transport::UploadTransport;
use bug_report_core::{RecordingConfig, RetryPolicy, UploadConfig};

pub const SEGMENT_EXTENSION: &str = "seg";

/// How the fake encoder behaves once launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderBehavior {
    /// Encodes until end of input, then exits 0.
    Normal,
    /// `launch` itself fails.
    FailLaunch,
    /// Starts, then exits with code 1 before reading anything.
    ExitOnLaunch,
    /// Exits with code 1 after this many frames.
    CrashAfterFrames(u64),
    /// Keeps running after end of input until killed.
    IgnoreEof,
    /// Never reads its input; writes into the pipe block until killed.
    Stalled,
}

/// Encoder backend whose "encoder" is a thread writing one marker byte per
/// frame into numbered segment files.
pub struct FakeEncoderBackend {
    behavior: EncoderBehavior,
    launches: AtomicU64,
    launch_delay: Duration,
}

impl FakeEncoderBackend {
    pub fn new(behavior: EncoderBehavior) -> Self {
        Self {
            behavior,
            launches: AtomicU64::new(0),
            launch_delay: Duration::ZERO,
        }
    }

    /// Makes every `launch` take at least `delay`, like a slow binary start.
    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    pub fn launches(&self) -> u64 {
        self.launches.load(Ordering::SeqCst)
    }
}

impl EncoderBackend for FakeEncoderBackend {
    fn launch(&self, invocation: &EncoderInvocation) -> Result<Box<dyn EncoderProcess>, RecordingError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.launch_delay);
        if self.behavior == EncoderBehavior::FailLaunch {
            return Err(RecordingError::LaunchFailure("fake encoder refused to start".into()));
        }
        Ok(Box::new(FakeEncoderProcess::spawn(self.behavior, invocation)))
    }

    fn segment_extension(&self) -> &str {
        SEGMENT_EXTENSION
    }

    fn merge_segments(&self, segments: &[PathBuf], output: &Path) -> Result<(), RecordingError> {
        let mut merged = Vec::new();
        for segment in segments {
            let bytes = fs::read(segment).map_err(|e| RecordingError::FinalizeFailure(e.to_string()))?;
            merged.extend_from_slice(&bytes);
        }
        fs::write(output, merged).map_err(|e| RecordingError::FinalizeFailure(e.to_string()))
    }
}

struct Shared {
    exit: Mutex<Option<ProcessExit>>,
    killed: AtomicBool,
    diagnostics: Mutex<String>,
}

pub struct FakeEncoderProcess {
    input: Option<PipeWriter>,
    shared: Arc<Shared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl FakeEncoderProcess {
    fn spawn(behavior: EncoderBehavior, invocation: &EncoderInvocation) -> Self {
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(if behavior == EncoderBehavior::Stalled { 0 } else { 256 });
        // Exits before the caller can look, like a binary rejecting its arguments.
        let exited_on_launch = behavior == EncoderBehavior::ExitOnLaunch;
        let shared = Arc::new(Shared {
            exit: Mutex::new(exited_on_launch.then_some(ProcessExit { code: Some(1) })),
            killed: AtomicBool::new(false),
            diagnostics: Mutex::new(if exited_on_launch {
                "fake encoder: invalid arguments".into()
            } else {
                String::new()
            }),
        });

        let frame_len = FrameSample::expected_len(invocation.width, invocation.height, invocation.pixel_format);
        let frames_per_segment = u64::from(invocation.fps * invocation.segment_secs).max(1);
        let directory = invocation.segment_directory.clone();
        let worker_shared = Arc::clone(&shared);

        let worker = thread::spawn(move || {
            let shared = worker_shared;
            let finish = |code: Option<i32>, message: &str| {
                *shared.diagnostics.lock() = message.to_string();
                shared.exit.lock().get_or_insert(ProcessExit { code });
            };

            if exited_on_launch {
                return;
            }

            let mut pending = 0usize;
            let mut frames = 0u64;
            loop {
                if shared.killed.load(Ordering::SeqCst) {
                    return;
                }
                if behavior == EncoderBehavior::Stalled {
                    thread::sleep(Duration::from_millis(5));
                    continue;
                }
                match receiver.recv_timeout(Duration::from_millis(5)) {
                    Ok(bytes) => {
                        pending += bytes.len();
                        while pending >= frame_len {
                            pending -= frame_len;
                            let segment = directory.join(segment_file_name(frames / frames_per_segment, SEGMENT_EXTENSION));
                            let written = OpenOptions::new()
                                .create(true)
                                .append(true)
                                .open(&segment)
                                .and_then(|mut file| file.write_all(&[b'F']));
                            if let Err(e) = written {
                                finish(Some(2), &format!("fake encoder: {}", e));
                                return;
                            }
                            frames += 1;
                            if let EncoderBehavior::CrashAfterFrames(limit) = behavior {
                                if frames >= limit {
                                    finish(Some(1), "fake encoder: simulated crash");
                                    return;
                                }
                            }
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        if behavior == EncoderBehavior::IgnoreEof {
                            while !shared.killed.load(Ordering::SeqCst) {
                                thread::sleep(Duration::from_millis(5));
                            }
                            return;
                        }
                        finish(Some(0), "");
                        return;
                    }
                }
            }
        });

        Self {
            input: Some(PipeWriter { sender }),
            shared,
            worker: Some(worker),
        }
    }
}

impl EncoderProcess for FakeEncoderProcess {
    fn take_input(&mut self) -> Option<Box<dyn Write + Send>> {
        self.input.take().map(|pipe| Box::new(pipe) as Box<dyn Write + Send>)
    }

    fn try_exit(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(*self.shared.exit.lock())
    }

    fn kill(&mut self) -> io::Result<()> {
        self.shared.killed.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.shared.exit.lock().get_or_insert(ProcessExit { code: None });
        Ok(())
    }

    fn diagnostics(&self) -> String {
        self.shared.diagnostics.lock().clone()
    }
}

impl Drop for FakeEncoderProcess {
    fn drop(&mut self) {
        let _ = self.kill();
    }
}

/// Write end of the fake encoder's stdin.
struct PipeWriter {
    sender: SyncSender<Vec<u8>>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sender
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "encoder closed its input"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Small, fast recording configuration: 4x4 frames, 30 fps, 1 s segments.
pub fn recording_config(work_directory: &Path, rolling_window_secs: u32) -> RecordingConfig {
    RecordingConfig {
        width: 4,
        height: 4,
        fps: 30,
        pixel_format: PixelFormat::Bgra,
        rolling_window_secs,
        segment_secs: 1,
        max_buffer_bytes: None,
        frame_queue_capacity: 8,
        stop_timeout_ms: 2_000,
        health_poll_interval_ms: 10,
        prune_interval_ms: 20,
        work_directory: work_directory.to_path_buf(),
    }
}

pub fn frame(config: &RecordingConfig, index: u64) -> FrameSample {
    FrameSample::new(
        vec![(index % 251) as u8; config.frame_len()],
        config.width,
        config.height,
        config.pixel_format,
        Duration::from_secs(1) / config.fps * index as u32,
    )
    .unwrap()
}

/// Pushes `count` frames, retrying each until the bridge accepts it.
pub fn push_frames(push: impl Fn(FrameSample) -> bool, config: &RecordingConfig, count: u64) {
    for index in 0..count {
        let sample = frame(config, index);
        while !push(sample.clone()) {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

pub fn upload_config(state_directory: &Path, chunk_size: usize, max_retries: u32) -> UploadConfig {
    UploadConfig {
        endpoint: "https://reports.test/api".into(),
        project_id: "test-project".into(),
        api_token: None,
        chunk_size,
        retry: RetryPolicy {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 5,
        },
        state_directory: state_directory.to_path_buf(),
        purge_after_upload: false,
        request_timeout_ms: 1_000,
    }
}

/// One chunk as the fake server received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedChunk {
    pub upload_id: String,
    pub offset: u64,
    pub total: u64,
    pub data: Vec<u8>,
}

/// Collection server fake. Each call consumes the next scripted error for
/// its step, if any; otherwise it succeeds.
#[derive(Default)]
pub struct ScriptedTransport {
    open_errors: Mutex<VecDeque<TransportError>>,
    chunk_errors: Mutex<VecDeque<TransportError>>,
    confirm_errors: Mutex<VecDeque<TransportError>>,
    chunk_delay: Mutex<Duration>,
    pub opens: AtomicU64,
    pub chunk_attempts: AtomicU64,
    pub confirms: AtomicU64,
    pub received: Mutex<Vec<ReceivedChunk>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_open(&self, error: TransportError, times: usize) {
        self.open_errors.lock().extend(std::iter::repeat_n(error, times));
    }

    pub fn fail_chunks(&self, error: TransportError, times: usize) {
        self.chunk_errors.lock().extend(std::iter::repeat_n(error, times));
    }

    pub fn fail_confirm(&self, error: TransportError, times: usize) {
        self.confirm_errors.lock().extend(std::iter::repeat_n(error, times));
    }

    /// Makes every chunk request take `delay`.
    pub fn slow_chunks(&self, delay: Duration) {
        *self.chunk_delay.lock() = delay;
    }

    pub fn received_bytes(&self) -> Vec<u8> {
        self.received.lock().iter().flat_map(|c| c.data.clone()).collect()
    }

    pub fn offsets(&self) -> Vec<u64> {
        self.received.lock().iter().map(|c| c.offset).collect()
    }
}

impl UploadTransport for ScriptedTransport {
    fn destination(&self) -> String {
        "https://reports.test/api".into()
    }

    fn open(&self, bundle: &ReportBundle) -> Result<String, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.open_errors.lock().pop_front() {
            return Err(error);
        }
        Ok(format!("upload-{}", bundle.id()))
    }

    fn send_chunk(&self, upload_id: &str, offset: u64, total: u64, data: &[u8]) -> Result<u64, TransportError> {
        self.chunk_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.chunk_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if let Some(error) = self.chunk_errors.lock().pop_front() {
            return Err(error);
        }
        self.received.lock().push(ReceivedChunk {
            upload_id: upload_id.to_string(),
            offset,
            total,
            data: data.to_vec(),
        });
        Ok(offset + data.len() as u64)
    }

    fn confirm(&self, upload_id: &str) -> Result<String, TransportError> {
        self.confirms.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.confirm_errors.lock().pop_front() {
            return Err(error);
        }
        Ok(format!("confirmed-{}", upload_id))
    }
}

pub fn transient() -> TransportError {
    TransportError::Transient("connection reset".into())
}

pub fn rejected() -> TransportError {
    TransportError::Rejected {
        status: 422,
        reason: "bundle invalid".into(),
    }
}
