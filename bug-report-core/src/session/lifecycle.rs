use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::config::{RecordingConfig, ReporterConfiguration};
use crate::models::error::{BundleError, RecordingError, ReportError};
use crate::models::frame::FrameSample;
use crate::models::report::{ReleaseTarget, ReportOutcome};
use crate::models::state::{FailureReason, ReportState, SessionHealth};
use crate::models::upload_models::{UploadStatus, UploadTaskHandle};
use crate::processing::log_capture::LogBuffer;
use crate::session::recording::{CrashListener, RecordingController, SessionHandle};
use crate::storage::bundle::{BundleAssembler, BundleInput};
use crate::storage::system_info::{self, HostInfo};
use crate::traits::encoder::EncoderBackend;
use crate::traits::frame_source::FrameSink;
use crate::traits::report_delegate::ReportDelegate;
use crate::traits::transport::UploadTransport;
use crate::upload::manager::UploadManager;

const UPLOAD_STATUS_POLL: Duration = Duration::from_millis(250);

/// User-supplied part of a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSubmission {
    pub description: String,
    pub steps_to_reproduce: Option<String>,

    /// Log lines to attach. Falls back to the captured log buffer.
    pub logs: Option<Vec<String>>,

    pub include_video: bool,
    pub include_logs: bool,
    /// Attach the last recorded frame as a JPEG.
    pub include_screenshot: bool,

    /// Existing release to file the report against; wins over the label.
    pub release_id: Option<String>,
    /// Release label; defaults to the configured one.
    pub release_label: Option<String>,
}

impl ReportSubmission {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }
}

impl Default for ReportSubmission {
    fn default() -> Self {
        Self {
            description: String::new(),
            steps_to_reproduce: None,
            logs: None,
            include_video: true,
            include_logs: true,
            include_screenshot: true,
            release_id: None,
            release_label: None,
        }
    }
}

struct LifecycleState {
    state: ReportState,
    session: Option<SessionHandle>,
    upload: Option<UploadTaskHandle>,
}

/// Drives one report at a time through
/// idle → recording → finalizing → bundling → uploading → completed/failed.
///
/// This is the object the UI talks to. Commands are `start_recording`,
/// `stop_and_submit` and `cancel`; `state()` and `progress_percent()` are
/// for display. `stop_and_submit` blocks the calling thread until the report
/// is confirmed or fails, so call it off the render thread.
///
/// An encoder crash during recording moves the report to `Failed` from the
/// recorder's monitor thread; the delegate hears about it without polling.
pub struct ReportLifecycle<B: EncoderBackend> {
    recorder: Arc<RecordingController<B>>,
    assembler: BundleAssembler,
    uploads: UploadManager,
    config: RecordingConfig,
    host: HostInfo,
    logs: Option<LogBuffer>,
    release_label: Option<String>,
    delegate: Option<Arc<dyn ReportDelegate>>,
    inner: Arc<Mutex<LifecycleState>>,
}

impl<B: EncoderBackend> ReportLifecycle<B> {
    pub fn new(
        recorder: RecordingController<B>,
        assembler: BundleAssembler,
        uploads: UploadManager,
        config: RecordingConfig,
    ) -> Self {
        Self {
            recorder: Arc::new(recorder),
            assembler,
            uploads,
            config,
            host: HostInfo::default(),
            logs: None,
            release_label: None,
            delegate: None,
            inner: Arc::new(Mutex::new(LifecycleState {
                state: ReportState::Idle,
                session: None,
                upload: None,
            })),
        }
    }

    /// Builds the whole pipeline from a validated configuration and removes
    /// session directories left behind by a previous run.
    pub fn from_configuration(
        backend: B,
        transport: Arc<dyn UploadTransport>,
        config: &ReporterConfiguration,
    ) -> Result<Self, ReportError> {
        config.validate()?;
        RecordingController::<B>::cleanup_stale_sessions(&config.recording.work_directory);

        let uploads = UploadManager::new(transport, &config.upload)?;
        let mut lifecycle = Self::new(
            RecordingController::new(backend),
            BundleAssembler::new(&config.bundle_directory),
            uploads,
            config.recording.clone(),
        );
        lifecycle.host.engine_version = config.engine_version.clone();
        lifecycle.release_label = config.release_label.clone();
        Ok(lifecycle)
    }

    pub fn with_host_info(mut self, host: HostInfo) -> Self {
        self.host = host;
        self
    }

    pub fn with_log_buffer(mut self, logs: LogBuffer) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn with_release_label(mut self, label: impl Into<String>) -> Self {
        self.release_label = Some(label.into());
        self
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn ReportDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn recorder(&self) -> &RecordingController<B> {
        &self.recorder
    }

    pub fn uploads(&self) -> &UploadManager {
        &self.uploads
    }

    pub fn state(&self) -> ReportState {
        self.inner.lock().state.clone()
    }

    pub fn progress_percent(&self) -> f32 {
        self.state().progress_percent()
    }

    /// Handle for pushing frames directly from the render thread.
    pub fn session_handle(&self) -> Option<SessionHandle> {
        self.inner.lock().session.clone()
    }

    pub fn push_frame(&self, sample: FrameSample) -> bool {
        let session = self.inner.lock().session.clone();
        session.is_some_and(|s| s.push_frame(sample))
    }

    /// Idle → Recording. A completed or failed previous report is reset
    /// first. Fails with `SessionAlreadyActive` while recording.
    pub fn start_recording(&self) -> Result<(), ReportError> {
        {
            let mut inner = self.inner.lock();
            if inner.state.is_recording() {
                return Err(RecordingError::SessionAlreadyActive.into());
            }
            if inner.state.is_terminal() {
                self.apply(&mut inner, ReportState::Idle)?;
            }
            if !inner.state.is_idle() {
                return Err(invalid(&inner.state, "start recording"));
            }
        }

        let crashes = Arc::new(self.crash_handler());
        let handler = Arc::clone(&crashes);
        let listener: CrashListener =
            Arc::new(move |session_id: &str, health: &SessionHealth| handler.handle(session_id, health));
        self.recorder.set_crash_listener(Some(listener));

        let handle = match self.recorder.start_recording(&self.config) {
            Ok(handle) => handle,
            // A concurrent start won; its session is unaffected.
            Err(RecordingError::SessionAlreadyActive) => return Err(RecordingError::SessionAlreadyActive.into()),
            Err(e) => {
                let reason = recording_failure(&e);
                return Err(self.fail(reason, e.into()));
            }
        };

        let mut inner = self.inner.lock();
        if !inner.state.is_idle() {
            // Cancelled while the encoder was starting.
            let state = inner.state.clone();
            drop(inner);
            if let Err(e) = self.recorder.abort_recording(handle) {
                log::warn!("failed to abort recording started during cancel: {}", e);
            }
            return Err(match state {
                ReportState::Failed(reason) => ReportError::Failed(reason),
                other => invalid(&other, "start recording"),
            });
        }
        inner.session = Some(handle.clone());
        inner.upload = None;
        self.apply(&mut inner, ReportState::Recording)?;
        drop(inner);

        // The encoder may have died before the session was published here.
        if let Ok(health) = self.recorder.health(&handle) {
            crashes.handle(handle.id(), &health);
        }
        Ok(())
    }

    /// Recording → Finalizing → Bundling → Uploading → Completed.
    ///
    /// Blocks until the server confirms the report. Any failure moves the
    /// report to `Failed` with a reason and is returned as an error.
    pub fn stop_and_submit(&self, submission: ReportSubmission) -> Result<ReportOutcome, ReportError> {
        let session = {
            let mut inner = self.inner.lock();
            if !inner.state.is_recording() {
                return Err(invalid(&inner.state, "stop and submit"));
            }
            let Some(session) = inner.session.take() else {
                return Err(invalid(&inner.state, "stop and submit"));
            };
            self.apply(&mut inner, ReportState::Finalizing)?;
            session
        };

        let frames = session.clone();
        let recorded = if submission.include_video {
            match self.recorder.stop_recording(session) {
                Ok(clip) => {
                    if clip.best_effort {
                        log::warn!("clip {} is best effort and may be truncated", clip.path.display());
                    }
                    Recorded {
                        duration: clip.session_duration,
                        best_effort: clip.best_effort,
                        session_directory: Some(clip.session_directory),
                        clip_path: Some(clip.path),
                    }
                }
                Err(e) => {
                    let reason = recording_failure(&e);
                    return Err(self.fail(reason, e.into()));
                }
            }
        } else {
            let duration = self
                .recorder
                .session_info(&session)
                .ok()
                .and_then(|info| (chrono::Utc::now() - info.started_at).to_std().ok())
                .unwrap_or_default();
            if let Err(e) = self.recorder.abort_recording(session) {
                log::warn!("failed to stop recording without video: {}", e);
            }
            Recorded {
                duration,
                best_effort: false,
                session_directory: None,
                clip_path: None,
            }
        };

        if let Err(e) = self.advance(ReportState::Bundling) {
            if let Some(directory) = &recorded.session_directory {
                discard_directory(directory);
            }
            return Err(e);
        }

        let screenshot = if submission.include_screenshot {
            let frame = frames.last_frame();
            if frame.is_none() {
                log::warn!("no frame was recorded, screenshot skipped");
            }
            frame
        } else {
            None
        };
        let logs = submission.include_logs.then(|| {
            submission
                .logs
                .or_else(|| self.logs.as_ref().map(LogBuffer::snapshot))
                .unwrap_or_default()
        });
        let release = ReleaseTarget::resolve(
            submission.release_id.as_deref(),
            submission.release_label.as_deref().or(self.release_label.as_deref()),
        );

        let assembled = self.assembler.assemble_report(BundleInput {
            clip_path: recorded.clip_path,
            clip_best_effort: recorded.best_effort,
            screenshot,
            logs,
            metadata: system_info::collect(&self.host, recorded.duration),
            description: submission.description,
            steps_to_reproduce: submission.steps_to_reproduce,
            release,
        });
        if let Some(directory) = &recorded.session_directory {
            discard_directory(directory);
        }
        let bundle = match assembled {
            Ok(bundle) => bundle,
            Err(e) => {
                let reason = bundle_failure(&e);
                return Err(self.fail(reason, e.into()));
            }
        };

        if let Err(e) = self.advance(ReportState::Uploading {
            bytes_sent: 0,
            total_bytes: bundle.payload_size(),
        }) {
            // Cancelled while bundling: no upload record will ever point here.
            discard_directory(bundle.directory());
            return Err(e);
        }

        let upload = match self.uploads.submit(&bundle) {
            Ok(upload) => upload,
            Err(e) => {
                let reason = FailureReason::StorageError(e.to_string());
                return Err(self.fail(reason, e.into()));
            }
        };
        {
            let mut inner = self.inner.lock();
            if let ReportState::Failed(reason) = &inner.state {
                let reason = reason.clone();
                drop(inner);
                if let Err(e) = self.uploads.cancel(&upload) {
                    log::warn!("failed to cancel upload started during cancel: {}", e);
                }
                return Err(ReportError::Failed(reason));
            }
            inner.upload = Some(upload.clone());
        }

        let mut status = UploadStatus::Pending;
        loop {
            let next = match self.uploads.wait_for_change(&upload, &status, UPLOAD_STATUS_POLL) {
                Ok(next) => next,
                Err(e) => {
                    let reason = FailureReason::StorageError(e.to_string());
                    return Err(self.fail(reason, e.into()));
                }
            };
            if next == status {
                if let ReportState::Failed(reason) = self.inner.lock().state.clone() {
                    return Err(ReportError::Failed(reason));
                }
                continue;
            }
            status = next;
            match &status {
                UploadStatus::Pending => {}
                UploadStatus::InProgress {
                    bytes_sent,
                    total_bytes,
                } => {
                    self.advance(ReportState::Uploading {
                        bytes_sent: *bytes_sent,
                        total_bytes: *total_bytes,
                    })?;
                    if let Some(delegate) = &self.delegate {
                        delegate.on_upload_progress(*bytes_sent, *total_bytes);
                    }
                }
                UploadStatus::Succeeded { confirmation_id } => {
                    self.advance(ReportState::Completed {
                        confirmation_id: confirmation_id.clone(),
                    })?;
                    let outcome = ReportOutcome {
                        report_id: bundle.id().to_string(),
                        confirmation_id: confirmation_id.clone(),
                        clip_best_effort: recorded.best_effort,
                    };
                    if let Some(delegate) = &self.delegate {
                        delegate.on_report_submitted(&outcome);
                    }
                    return Ok(outcome);
                }
                UploadStatus::Failed { reason } => {
                    return Err(self.fail(reason.clone(), ReportError::Failed(reason.clone())));
                }
                UploadStatus::Cancelled => {
                    let reason = FailureReason::CancelledByUser;
                    return Err(self.fail(reason.clone(), ReportError::Failed(reason)));
                }
            }
        }
    }

    /// Any non-terminal state → Failed(CancelledByUser).
    ///
    /// An active recording is aborted and its output discarded; an upload in
    /// flight is halted but its bundle is kept for a later resubmission.
    pub fn cancel(&self) -> Result<(), ReportError> {
        let (session, upload) = {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                return Err(invalid(&inner.state, "cancel"));
            }
            self.apply(&mut inner, ReportState::Failed(FailureReason::CancelledByUser))?;
            (inner.session.take(), inner.upload.clone())
        };
        self.notify_failure(&FailureReason::CancelledByUser);

        if let Some(session) = session {
            if let Err(e) = self.recorder.abort_recording(session) {
                log::warn!("failed to abort recording: {}", e);
            }
        }
        if let Some(upload) = upload {
            if let Err(e) = self.uploads.cancel(&upload) {
                log::warn!("failed to cancel upload: {}", e);
            }
        }
        log::info!("report cancelled by user");
        Ok(())
    }

    /// Completed/Failed → Idle.
    pub fn reset(&self) -> Result<(), ReportError> {
        let mut inner = self.inner.lock();
        if !inner.state.is_terminal() {
            return Err(invalid(&inner.state, "reset"));
        }
        inner.upload = None;
        self.apply(&mut inner, ReportState::Idle)
    }

    /// Restarts uploads interrupted by a previous process exit.
    pub fn resume_uploads(&self) -> Result<Vec<UploadTaskHandle>, ReportError> {
        Ok(self.uploads.resume_pending()?)
    }

    // --- Internal helpers ---

    fn apply(&self, inner: &mut LifecycleState, next: ReportState) -> Result<(), ReportError> {
        transition(self.delegate.as_ref(), inner, next)
    }

    fn crash_handler(&self) -> CrashHandler<B> {
        CrashHandler {
            inner: Arc::clone(&self.inner),
            recorder: Arc::downgrade(&self.recorder),
            delegate: self.delegate.clone(),
        }
    }

    /// Forward transition driven by a component signal. If the report was
    /// cancelled meanwhile, returns that failure instead.
    fn advance(&self, next: ReportState) -> Result<(), ReportError> {
        let mut inner = self.inner.lock();
        if let ReportState::Failed(reason) = &inner.state {
            return Err(ReportError::Failed(reason.clone()));
        }
        self.apply(&mut inner, next)
    }

    /// Moves to `Failed(reason)` unless already terminal. Returns the error
    /// to surface: the earlier failure if there was one, else `error`.
    fn fail(&self, reason: FailureReason, error: ReportError) -> ReportError {
        let mut inner = self.inner.lock();
        if let ReportState::Failed(existing) = &inner.state {
            return ReportError::Failed(existing.clone());
        }
        if self.apply(&mut inner, ReportState::Failed(reason.clone())).is_err() {
            return error;
        }
        inner.session = None;
        drop(inner);
        log::error!("report failed: {}", reason);
        self.notify_failure(&reason);
        error
    }

    fn notify_failure(&self, reason: &FailureReason) {
        if let Some(delegate) = &self.delegate {
            delegate.on_error(reason);
        }
    }
}

/// What stopping the recording left for the bundle.
struct Recorded {
    duration: Duration,
    best_effort: bool,
    session_directory: Option<PathBuf>,
    clip_path: Option<PathBuf>,
}

/// Moves a recording report to `Failed(EncoderCrashed)` when its encoder
/// dies, then releases the crashed session.
struct CrashHandler<B: EncoderBackend> {
    inner: Arc<Mutex<LifecycleState>>,
    recorder: Weak<RecordingController<B>>,
    delegate: Option<Arc<dyn ReportDelegate>>,
}

impl<B: EncoderBackend> CrashHandler<B> {
    fn handle(&self, session_id: &str, health: &SessionHealth) {
        let SessionHealth::Crashed { stderr, .. } = health else {
            return;
        };
        let reason = FailureReason::EncoderCrashed(stderr.clone());
        let session = {
            let mut inner = self.inner.lock();
            let current = inner.state.is_recording()
                && inner.session.as_ref().is_some_and(|s| s.id() == session_id);
            let failed = ReportState::Failed(reason.clone());
            if !current || transition(self.delegate.as_ref(), &mut inner, failed).is_err() {
                return;
            }
            inner.session.take()
        };
        log::error!("report failed: {}", reason);
        if let Some(delegate) = &self.delegate {
            delegate.on_error(&reason);
        }

        let (Some(session), Some(recorder)) = (session, self.recorder.upgrade()) else {
            return;
        };
        match recorder.stop_recording(session) {
            Err(RecordingError::EncoderCrashed {
                partial_clip: Some(path),
                ..
            }) => log::warn!("partial clip kept at {}", path.display()),
            Err(e) => log::warn!("encoder crash cleanup: {}", e),
            Ok(_) => {}
        }
    }
}

impl<B: EncoderBackend> FrameSink for ReportLifecycle<B> {
    fn push_frame(&self, sample: FrameSample) -> bool {
        ReportLifecycle::push_frame(self, sample)
    }
}

/// Applies a transition under the caller's lock and tells the delegate.
fn transition(
    delegate: Option<&Arc<dyn ReportDelegate>>,
    inner: &mut LifecycleState,
    next: ReportState,
) -> Result<(), ReportError> {
    if !inner.state.permits(&next) {
        return Err(invalid(&inner.state, transition_action(&next)));
    }
    let progress_only = matches!(
        (&inner.state, &next),
        (ReportState::Uploading { .. }, ReportState::Uploading { .. })
    );
    inner.state = next.clone();
    if !progress_only {
        log::info!("report state: {}", next);
    }
    if let Some(delegate) = delegate {
        delegate.on_state_changed(&next);
    }
    Ok(())
}

fn invalid(state: &ReportState, action: &'static str) -> ReportError {
    ReportError::InvalidTransition {
        state: state.name().to_string(),
        action,
    }
}

fn transition_action(next: &ReportState) -> &'static str {
    match next {
        ReportState::Idle => "reset",
        ReportState::Recording => "start recording",
        ReportState::Finalizing => "finalize",
        ReportState::Bundling => "bundle",
        ReportState::Uploading { .. } => "upload",
        ReportState::Completed { .. } => "complete",
        ReportState::Failed(_) => "fail",
    }
}

fn recording_failure(error: &RecordingError) -> FailureReason {
    match error {
        RecordingError::EncoderCrashed { stderr, .. } => FailureReason::EncoderCrashed(stderr.clone()),
        RecordingError::FinalizeFailure(m) => FailureReason::FinalizeFailure(m.clone()),
        RecordingError::StorageError(m) => FailureReason::StorageError(m.clone()),
        other => FailureReason::LaunchFailure(other.to_string()),
    }
}

fn bundle_failure(error: &BundleError) -> FailureReason {
    match error {
        BundleError::MissingArtifact(m) | BundleError::InvalidBundle(m) => {
            FailureReason::MissingArtifact(m.clone())
        }
        BundleError::StorageError(m) => FailureReason::StorageError(m.clone()),
    }
}

fn discard_directory(directory: &Path) {
    if let Err(e) = fs::remove_dir_all(directory) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("failed to remove {}: {}", directory.display(), e);
        }
    }
}
