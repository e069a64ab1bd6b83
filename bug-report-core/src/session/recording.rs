use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::models::clip::{BridgeStats, ClipOutcome};
use crate::models::config::RecordingConfig;
use crate::models::error::RecordingError;
use crate::models::frame::FrameSample;
use crate::models::state::SessionHealth;
use crate::processing::frame_bridge::{FrameBridge, WriterExit};
use crate::processing::segment_window::{self, PruneReport, RetentionPolicy};
use crate::traits::encoder::{EncoderBackend, EncoderInvocation, EncoderProcess};
use crate::traits::frame_source::FrameSink;

const SESSION_DIR_PREFIX: &str = "session_";
const MAX_LAUNCH_GRACE: Duration = Duration::from_millis(200);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Caller's handle to the active recording session.
///
/// Cloneable so the render thread can push frames while another thread
/// stops the session. Pushing after the session ended drops the frame.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    bridge: FrameBridge,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn push_frame(&self, sample: FrameSample) -> bool {
        self.bridge.push_frame(sample)
    }

    pub fn stats(&self) -> BridgeStats {
        self.bridge.stats()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.bridge.dropped_frames()
    }

    pub fn drop_rate(&self) -> f64 {
        self.bridge.drop_rate()
    }

    /// Last frame the encoder received in this session.
    pub fn last_frame(&self) -> Option<FrameSample> {
        self.bridge.last_written_frame()
    }
}

impl FrameSink for SessionHandle {
    fn push_frame(&self, sample: FrameSample) -> bool {
        self.bridge.push_frame(sample)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}

/// Descriptive snapshot of the active session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub rolling_window: Duration,
    pub directory: PathBuf,
    pub clip_path: PathBuf,
}

struct ActiveSession {
    id: String,
    config: RecordingConfig,
    started_at: DateTime<Utc>,
    started: Instant,
    directory: PathBuf,
    extension: String,
    retention: RetentionPolicy,
    bridge: FrameBridge,
    process: Arc<Mutex<Box<dyn EncoderProcess>>>,
    health: Arc<Mutex<SessionHealth>>,
    writer: Option<thread::JoinHandle<WriterExit>>,
    monitor_running: Arc<AtomicBool>,
    monitor: Option<thread::JoinHandle<()>>,
    finished: bool,
}

impl ActiveSession {
    fn clip_path(&self) -> PathBuf {
        self.directory.join(format!("clip.{}", self.extension))
    }

    fn stop_monitor(&mut self) {
        self.monitor_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.monitor.take() {
            // A crash listener stopping the session runs on the monitor itself.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::warn!("recording monitor for session {} panicked", self.id);
            }
        }
    }

    fn join_writer(&mut self) -> WriterExit {
        match self.writer.take().map(|h| h.join()) {
            Some(Ok(exit)) => exit,
            Some(Err(_)) => WriterExit {
                frames_written: self.bridge.written_frames(),
                error: Some("frame writer panicked".into()),
            },
            None => WriterExit {
                frames_written: self.bridge.written_frames(),
                error: None,
            },
        }
    }

    /// Kills the encoder and stops both threads. Idempotent.
    fn terminate(&mut self) {
        self.stop_monitor();
        self.bridge.abort();
        if let Err(e) = self.process.lock().kill() {
            log::warn!("failed to kill encoder for session {}: {}", self.id, e);
        }
        self.join_writer();
        self.finished = true;
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        if !self.finished {
            log::warn!("recording session {} dropped while active, terminating encoder", self.id);
            self.terminate();
        }
    }
}

/// Owns the lifecycle of the external encoder and the rolling window.
///
/// At most one session is active per controller. The encoder writes
/// fixed-length segments into a session-scoped directory; a monitor thread
/// prunes segments outside the window and watches for unexpected exits.
///
/// ```text
/// [render thread] → SessionHandle::push_frame → [FrameBridge] → encoder stdin
///                                                                   │
/// [recording-monitor] ── try_exit / prune ── session_<id>/segment_%06d.<ext>
/// ```
pub struct RecordingController<B: EncoderBackend> {
    backend: Arc<B>,
    active: Mutex<Option<ActiveSession>>,
    /// Set while a start is launching the encoder outside the `active` lock.
    launching: AtomicBool,
    crash_listener: Mutex<Option<CrashListener>>,
}

/// Called from the monitor thread when a session's encoder exits
/// unexpectedly, with the session id and its `Crashed` health.
///
/// The listener may stop the crashed session itself.
pub type CrashListener = Arc<dyn Fn(&str, &SessionHealth) + Send + Sync>;

/// Holds the launch slot; releases it on drop unless the session was
/// published.
struct LaunchSlot<'a>(&'a AtomicBool);

impl Drop for LaunchSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<B: EncoderBackend> RecordingController<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            active: Mutex::new(None),
            launching: AtomicBool::new(false),
            crash_listener: Mutex::new(None),
        }
    }

    /// Registers the listener told about encoder crashes of sessions started
    /// after this call.
    pub fn set_crash_listener(&self, listener: Option<CrashListener>) {
        *self.crash_listener.lock() = listener;
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Launches the encoder and starts accepting frames.
    ///
    /// Fails immediately with `SessionAlreadyActive` if a session is running;
    /// the running session is not affected.
    pub fn start_recording(&self, config: &RecordingConfig) -> Result<SessionHandle, RecordingError> {
        config.validate().map_err(RecordingError::ConfigurationFailed)?;

        let _slot = self.reserve_launch()?;

        let id = uuid::Uuid::new_v4().to_string();
        let work_directory = std::path::absolute(&config.work_directory)
            .map_err(|e| RecordingError::StorageError(format!("invalid work directory: {}", e)))?;
        let directory = work_directory.join(format!("{}{}", SESSION_DIR_PREFIX, id));
        fs::create_dir_all(&directory)
            .map_err(|e| RecordingError::StorageError(format!("failed to create session directory: {}", e)))?;

        let extension = self.backend.segment_extension().to_string();
        let invocation = EncoderInvocation {
            width: config.width,
            height: config.height,
            fps: config.fps,
            pixel_format: config.pixel_format,
            segment_secs: config.segment_secs,
            segment_directory: directory.clone(),
        };

        let mut process = match self.backend.launch(&invocation) {
            Ok(process) => process,
            Err(e) => {
                remove_directory(&directory);
                return Err(e);
            }
        };

        // An encoder rejecting its arguments exits right away.
        thread::sleep(config.health_poll_interval().min(MAX_LAUNCH_GRACE));
        let early_exit = match process.try_exit() {
            Ok(Some(exit)) => Some(format!(
                "encoder exited during startup (code {:?}): {}",
                exit.code,
                process.diagnostics()
            )),
            Ok(None) => None,
            Err(e) => Some(format!("failed to poll encoder: {}", e)),
        };
        if let Some(reason) = early_exit {
            discard_launch(process.as_mut(), &directory);
            log::error!("{}", reason);
            return Err(RecordingError::LaunchFailure(reason));
        }

        let Some(input) = process.take_input() else {
            discard_launch(process.as_mut(), &directory);
            return Err(RecordingError::LaunchFailure("encoder input pipe unavailable".into()));
        };

        let bridge = FrameBridge::new(
            config.width,
            config.height,
            config.pixel_format,
            config.frame_queue_capacity,
        );
        let writer = match bridge.spawn_writer(input) {
            Ok(writer) => writer,
            Err(e) => {
                discard_launch(process.as_mut(), &directory);
                return Err(e);
            }
        };

        let mut session = ActiveSession {
            id: id.clone(),
            config: config.clone(),
            started_at: Utc::now(),
            started: Instant::now(),
            directory,
            extension,
            retention: RetentionPolicy::from_config(config),
            bridge: bridge.clone(),
            process: Arc::new(Mutex::new(process)),
            health: Arc::new(Mutex::new(SessionHealth::Running)),
            writer: Some(writer),
            monitor_running: Arc::new(AtomicBool::new(true)),
            monitor: None,
            finished: false,
        };
        let listener = self.crash_listener.lock().clone();
        session.monitor = Some(spawn_monitor(&session, listener)?);

        log::info!(
            "recording session {} started ({}x{} @ {} fps, {}s window in {}s segments)",
            id,
            config.width,
            config.height,
            config.fps,
            config.rolling_window_secs,
            config.segment_secs
        );
        *self.active.lock() = Some(session);

        Ok(SessionHandle { id, bridge })
    }

    /// Claims the single session slot without holding the `active` lock
    /// through the encoder launch.
    fn reserve_launch(&self) -> Result<LaunchSlot<'_>, RecordingError> {
        let active = self.active.lock();
        if active.is_some()
            || self
                .launching
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            return Err(RecordingError::SessionAlreadyActive);
        }
        Ok(LaunchSlot(&self.launching))
    }

    /// Ends the session and returns the merged clip of the last window.
    ///
    /// Input is closed and the encoder gets `stop_timeout` to flush. If it
    /// does not exit in time it is killed and the clip is marked best-effort.
    /// A session whose encoder crashed fails with `EncoderCrashed`, carrying
    /// whatever partial clip could be salvaged.
    pub fn stop_recording(&self, handle: SessionHandle) -> Result<ClipOutcome, RecordingError> {
        let mut session = self.take_session(&handle)?;
        session.stop_monitor();

        let health = session.health.lock().clone();
        if let SessionHealth::Crashed { code, stderr } = health {
            session.join_writer();
            session.finished = true;
            let partial_clip = self.salvage_partial(&session);
            return Err(RecordingError::EncoderCrashed {
                code,
                stderr,
                partial_clip,
            });
        }

        *session.health.lock() = SessionHealth::Stopping;
        session.bridge.finish();

        let timeout = session.config.stop_timeout();
        let deadline = Instant::now() + timeout;
        let mut best_effort = false;
        let exit = loop {
            let polled = session.process.lock().try_exit();
            match polled {
                Ok(Some(exit)) => break Some(exit),
                Ok(None) => {}
                Err(e) => log::warn!("failed to poll encoder: {}", e),
            }
            if Instant::now() >= deadline {
                log::warn!(
                    "encoder for session {} did not exit within {:?}, terminating",
                    session.id,
                    timeout
                );
                best_effort = true;
                session.bridge.abort();
                if let Err(e) = session.process.lock().kill() {
                    log::warn!("failed to kill encoder: {}", e);
                }
                break None;
            }
            thread::sleep(STOP_POLL_INTERVAL);
        };

        if let Some(exit) = exit {
            if !exit.success() {
                log::warn!(
                    "encoder exited with code {:?} while stopping: {}",
                    exit.code,
                    session.process.lock().diagnostics()
                );
                best_effort = true;
            }
        }

        let writer_exit = session.join_writer();
        if let Some(error) = &writer_exit.error {
            log::warn!("frame writer ended with error: {}", error);
            best_effort = true;
        }
        session.finished = true;

        match self.finalize(&session, best_effort, writer_exit.frames_written) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                remove_directory(&session.directory);
                Err(e)
            }
        }
    }

    /// Offers a frame to the session's encoder bridge. Never blocks for
    /// longer than the queue's lock budget; returns `false` if the frame was
    /// dropped or the handle belongs to a finished session.
    pub fn push_frame(&self, handle: &SessionHandle, sample: FrameSample) -> bool {
        handle.push_frame(sample)
    }

    /// Terminates the encoder and discards everything the session wrote.
    pub fn abort_recording(&self, handle: SessionHandle) -> Result<(), RecordingError> {
        let mut session = self.take_session(&handle)?;
        session.terminate();
        remove_directory(&session.directory);
        log::info!("recording session {} aborted", session.id);
        Ok(())
    }

    pub fn health(&self, handle: &SessionHandle) -> Result<SessionHealth, RecordingError> {
        self.with_session(handle, |session| session.health.lock().clone())
    }

    /// Runs one pruning pass immediately (the monitor also runs them
    /// periodically).
    pub fn enforce_retention(&self, handle: &SessionHandle) -> Result<PruneReport, RecordingError> {
        let (retention, directory, extension) = self.with_session(handle, |session| {
            (session.retention, session.directory.clone(), session.extension.clone())
        })?;
        retention
            .enforce(&directory, &extension)
            .map_err(|e| RecordingError::StorageError(format!("failed to prune segments: {}", e)))
    }

    pub fn session_info(&self, handle: &SessionHandle) -> Result<SessionInfo, RecordingError> {
        self.with_session(handle, |session| SessionInfo {
            id: session.id.clone(),
            started_at: session.started_at,
            rolling_window: Duration::from_secs(u64::from(session.config.rolling_window_secs)),
            directory: session.directory.clone(),
            clip_path: session.clip_path(),
        })
    }

    /// True while a session is running or being launched.
    pub fn is_active(&self) -> bool {
        self.launching.load(Ordering::SeqCst) || self.active.lock().is_some()
    }

    /// Removes session directories left behind by a previous process.
    /// Must not be called while any controller records into `work_directory`.
    pub fn cleanup_stale_sessions(work_directory: &Path) -> usize {
        let Ok(entries) = fs::read_dir(work_directory) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.filter_map(Result::ok) {
            let is_session = entry.file_name().to_string_lossy().starts_with(SESSION_DIR_PREFIX);
            if is_session && entry.path().is_dir() {
                match fs::remove_dir_all(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => log::warn!("failed to remove stale session {}: {}", entry.path().display(), e),
                }
            }
        }
        if removed > 0 {
            log::info!("removed {} stale session directories", removed);
        }
        removed
    }

    fn take_session(&self, handle: &SessionHandle) -> Result<ActiveSession, RecordingError> {
        let mut active = self.active.lock();
        match active.as_ref() {
            Some(session) if session.id == handle.id => active
                .take()
                .ok_or_else(|| RecordingError::UnknownSession(handle.id.clone())),
            _ => Err(RecordingError::UnknownSession(handle.id.clone())),
        }
    }

    fn with_session<T>(
        &self,
        handle: &SessionHandle,
        f: impl FnOnce(&ActiveSession) -> T,
    ) -> Result<T, RecordingError> {
        match self.active.lock().as_ref() {
            Some(session) if session.id == handle.id => Ok(f(session)),
            _ => Err(RecordingError::UnknownSession(handle.id.clone())),
        }
    }

    fn finalize(
        &self,
        session: &ActiveSession,
        best_effort: bool,
        frames_written: u64,
    ) -> Result<ClipOutcome, RecordingError> {
        if let Err(e) = session.retention.enforce(&session.directory, &session.extension) {
            log::warn!("final prune failed: {}", e);
        }
        let segments = segment_window::list_segments(&session.directory, &session.extension)
            .map_err(|e| RecordingError::FinalizeFailure(format!("failed to list segments: {}", e)))?;
        let chosen = segment_window::select_for_clip(&segments, session.config.segments_in_clip());
        if chosen.is_empty() {
            return Err(RecordingError::FinalizeFailure(format!(
                "encoder produced no output ({} frames written)",
                frames_written
            )));
        }

        let clip_path = session.clip_path();
        self.backend.merge_segments(&chosen, &clip_path)?;
        let size_bytes = fs::metadata(&clip_path)
            .map_err(|e| RecordingError::FinalizeFailure(format!("clip missing after merge: {}", e)))?
            .len();
        if size_bytes == 0 {
            return Err(RecordingError::FinalizeFailure("merged clip is empty".into()));
        }
        if let Err(e) = segment_window::remove_all(&session.directory, &session.extension) {
            log::warn!("failed to remove merged segments: {}", e);
        }

        let stats = session.bridge.stats();
        log::info!(
            "recording session {} finalized: {} segment(s), {} bytes, {} frames written, {} dropped{}",
            session.id,
            chosen.len(),
            size_bytes,
            frames_written,
            stats.dropped_frames,
            if best_effort { " (best effort)" } else { "" }
        );

        Ok(ClipOutcome {
            session_id: session.id.clone(),
            path: clip_path,
            session_directory: session.directory.clone(),
            best_effort,
            segment_count: chosen.len(),
            size_bytes,
            frames_written,
            frames_dropped: stats.dropped_frames,
            session_duration: session.started.elapsed(),
        })
    }

    fn salvage_partial(&self, session: &ActiveSession) -> Option<PathBuf> {
        let segments = segment_window::list_segments(&session.directory, &session.extension).ok()?;
        let chosen = segment_window::select_for_clip(&segments, session.config.segments_in_clip());
        if chosen.is_empty() {
            return None;
        }
        let clip_path = session.clip_path();
        match self.backend.merge_segments(&chosen, &clip_path) {
            Ok(()) => Some(clip_path),
            Err(e) => {
                log::warn!("could not salvage partial clip: {}", e);
                None
            }
        }
    }
}

fn spawn_monitor(
    session: &ActiveSession,
    listener: Option<CrashListener>,
) -> Result<thread::JoinHandle<()>, RecordingError> {
    let running = Arc::clone(&session.monitor_running);
    let process = Arc::clone(&session.process);
    let health = Arc::clone(&session.health);
    let bridge = session.bridge.clone();
    let retention = session.retention;
    let directory = session.directory.clone();
    let extension = session.extension.clone();
    let poll_interval = session.config.health_poll_interval();
    let prune_interval = session.config.prune_interval();
    let session_id = session.id.clone();

    thread::Builder::new()
        .name("recording-monitor".into())
        .spawn(move || {
            let mut last_prune = Instant::now();
            while running.load(Ordering::SeqCst) {
                thread::sleep(poll_interval);
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let polled = process.lock().try_exit();
                match polled {
                    Ok(Some(exit)) => {
                        let stderr = process.lock().diagnostics();
                        log::error!(
                            "encoder for session {} exited unexpectedly (code {:?}): {}",
                            session_id,
                            exit.code,
                            stderr
                        );
                        // Stop accepting frames before anyone can observe the crash.
                        bridge.abort();
                        let crashed = SessionHealth::Crashed {
                            code: exit.code,
                            stderr,
                        };
                        *health.lock() = crashed.clone();
                        if let Some(listener) = &listener {
                            listener(&session_id, &crashed);
                        }
                        break;
                    }
                    Ok(None) => {}
                    Err(e) => log::warn!("failed to poll encoder: {}", e),
                }

                if last_prune.elapsed() >= prune_interval {
                    if let Err(e) = retention.enforce(&directory, &extension) {
                        log::warn!("failed to prune segments: {}", e);
                    }
                    last_prune = Instant::now();
                }
            }
        })
        .map_err(|e| RecordingError::LaunchFailure(format!("failed to spawn recording monitor: {}", e)))
}

fn discard_launch(process: &mut dyn EncoderProcess, directory: &Path) {
    if let Err(e) = process.kill() {
        log::warn!("failed to kill encoder: {}", e);
    }
    remove_directory(directory);
}

fn remove_directory(directory: &Path) {
    if let Err(e) = fs::remove_dir_all(directory) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("failed to remove {}: {}", directory.display(), e);
        }
    }
}
