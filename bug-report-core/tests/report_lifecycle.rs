mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use bug_report_core::models::report::ReleaseTarget;
use bug_report_core::models::upload_models::TaskPhase;
use bug_report_core::{
    BundleAssembler, FailureReason, HostInfo, LogBuffer, MetadataField, RecordingController, RecordingError,
    ReportBundle, ReportDelegate, ReportError, ReportLifecycle, ReportOutcome, ReportState, ReportSubmission,
    UploadManager,
};

use common::{push_frames, recording_config, rejected, upload_config, EncoderBehavior, FakeEncoderBackend, ScriptedTransport};

#[derive(Default)]
struct RecordingDelegate {
    states: Mutex<Vec<String>>,
    progress: Mutex<Vec<(u64, u64)>>,
    errors: Mutex<Vec<FailureReason>>,
    submitted: Mutex<Vec<ReportOutcome>>,
}

impl ReportDelegate for RecordingDelegate {
    fn on_state_changed(&self, state: &ReportState) {
        let mut states = self.states.lock();
        if states.last().map(String::as_str) != Some(state.name()) {
            states.push(state.name().to_string());
        }
    }

    fn on_upload_progress(&self, bytes_sent: u64, total_bytes: u64) {
        self.progress.lock().push((bytes_sent, total_bytes));
    }

    fn on_error(&self, reason: &FailureReason) {
        self.errors.lock().push(reason.clone());
    }

    fn on_report_submitted(&self, outcome: &ReportOutcome) {
        self.submitted.lock().push(outcome.clone());
    }
}

struct Harness {
    dir: tempfile::TempDir,
    transport: Arc<ScriptedTransport>,
    delegate: Arc<RecordingDelegate>,
    lifecycle: ReportLifecycle<FakeEncoderBackend>,
}

fn lifecycle_in(
    dir: &Path,
    transport: Arc<ScriptedTransport>,
    behavior: EncoderBehavior,
) -> ReportLifecycle<FakeEncoderBackend> {
    let uploads = UploadManager::new(transport, &upload_config(&dir.join("state"), 64, 2)).unwrap();
    let logs = LogBuffer::new(16);
    logs.push("INFO game: level loaded".into());
    logs.push("WARN physics: body fell through floor".into());

    ReportLifecycle::new(
        RecordingController::new(FakeEncoderBackend::new(behavior)),
        BundleAssembler::new(dir.join("bundles")),
        uploads,
        recording_config(&dir.join("sessions"), 5),
    )
    .with_host_info(HostInfo {
        engine_version: Some("5.4.1".into()),
        gpu_model: None,
    })
    .with_log_buffer(logs)
}

fn harness(behavior: EncoderBehavior) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new();
    let delegate = Arc::new(RecordingDelegate::default());

    let mut lifecycle = lifecycle_in(dir.path(), transport.clone(), behavior);
    lifecycle.set_delegate(delegate.clone());

    Harness {
        dir,
        transport,
        delegate,
        lifecycle,
    }
}

fn submission() -> ReportSubmission {
    ReportSubmission {
        steps_to_reproduce: Some("Jump off the bridge".into()),
        ..ReportSubmission::new("Fell through the floor near the bridge")
    }
}

#[test]
fn end_to_end_report_is_recorded_bundled_and_uploaded() {
    let h = harness(EncoderBehavior::Normal);
    let config = recording_config(&h.dir.path().join("sessions"), 5);

    h.lifecycle.start_recording().unwrap();
    assert_eq!(h.lifecycle.state(), ReportState::Recording);
    push_frames(|f| h.lifecycle.push_frame(f), &config, 300);

    let outcome = h.lifecycle.stop_and_submit(submission()).unwrap();
    assert!(!outcome.clip_best_effort);
    assert_eq!(outcome.confirmation_id, format!("confirmed-upload-{}", outcome.report_id));
    assert_eq!(
        h.lifecycle.state(),
        ReportState::Completed {
            confirmation_id: outcome.confirmation_id.clone()
        }
    );
    assert_eq!(h.lifecycle.progress_percent(), 100.0);

    // Only the last five seconds (150 frames, one byte each) were uploaded.
    assert_eq!(h.transport.received_bytes().len(), 150);

    let bundle = ReportBundle::open(&h.dir.path().join("bundles").join(&outcome.report_id)).unwrap();
    assert_eq!(bundle.description(), "Fell through the floor near the bridge");
    assert_eq!(bundle.document().steps_to_reproduce.as_deref(), Some("Jump off the bridge"));
    assert_eq!(bundle.logs().len(), 2);
    assert_eq!(bundle.metadata().get(MetadataField::EngineVersion).as_str(), Some("5.4.1"));
    assert_eq!(bundle.metadata().get(MetadataField::GpuModel).as_str(), None);
    assert!(bundle.screenshot_path().unwrap().exists());
    assert_eq!(bundle.payload_path(), bundle.clip_path());

    // Session scratch space is gone once the clip is bundled.
    assert_eq!(fs::read_dir(h.dir.path().join("sessions")).unwrap().count(), 0);

    assert_eq!(
        *h.delegate.states.lock(),
        vec!["recording", "finalizing", "bundling", "uploading", "completed"]
    );
    let progress = h.delegate.progress.lock().clone();
    assert!(progress.windows(2).all(|w| w[0].0 <= w[1].0), "{progress:?}");
    assert!(progress.iter().all(|(_, total)| *total == 150));
    assert_eq!(h.delegate.submitted.lock().len(), 1);
    assert!(h.delegate.errors.lock().is_empty());
}

fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() > deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    true
}

#[test]
fn start_while_recording_is_rejected() {
    let h = harness(EncoderBehavior::Normal);
    h.lifecycle.start_recording().unwrap();

    let err = h.lifecycle.start_recording().unwrap_err();
    assert_eq!(err, ReportError::Recording(RecordingError::SessionAlreadyActive));
    assert_eq!(h.lifecycle.state(), ReportState::Recording);
    assert_eq!(h.lifecycle.recorder().backend().launches(), 1);
    h.lifecycle.cancel().unwrap();
}

#[test]
fn stop_without_recording_is_an_invalid_transition() {
    let h = harness(EncoderBehavior::Normal);
    let err = h.lifecycle.stop_and_submit(submission()).unwrap_err();
    assert!(matches!(err, ReportError::InvalidTransition { .. }), "{err:?}");
    assert_eq!(h.lifecycle.state(), ReportState::Idle);
    assert!(h.lifecycle.reset().is_err());
}

#[test]
fn cancel_during_recording_discards_output() {
    let h = harness(EncoderBehavior::Normal);
    let config = recording_config(&h.dir.path().join("sessions"), 5);
    h.lifecycle.start_recording().unwrap();
    push_frames(|f| h.lifecycle.push_frame(f), &config, 30);

    h.lifecycle.cancel().unwrap();
    assert_eq!(h.lifecycle.state(), ReportState::Failed(FailureReason::CancelledByUser));
    assert!(!h.lifecycle.recorder().is_active());
    assert!(!h.lifecycle.push_frame(common::frame(&config, 0)));
    assert_eq!(fs::read_dir(h.dir.path().join("sessions")).unwrap().count(), 0);
    assert_eq!(*h.delegate.errors.lock(), vec![FailureReason::CancelledByUser]);

    // Terminal states cannot be cancelled again, but a new cycle may start.
    assert!(matches!(h.lifecycle.cancel(), Err(ReportError::InvalidTransition { .. })));
    h.lifecycle.start_recording().unwrap();
    assert_eq!(h.lifecycle.state(), ReportState::Recording);
    h.lifecycle.cancel().unwrap();
}

#[test]
fn launch_failure_fails_the_report() {
    let h = harness(EncoderBehavior::FailLaunch);
    let err = h.lifecycle.start_recording().unwrap_err();
    assert!(matches!(err, ReportError::Recording(RecordingError::LaunchFailure(_))));

    match h.lifecycle.state() {
        ReportState::Failed(FailureReason::LaunchFailure(_)) => {}
        other => panic!("expected launch failure, got {other}"),
    }
    assert_eq!(h.delegate.errors.lock().len(), 1);
}

#[test]
fn encoder_crash_moves_report_to_failed() {
    let h = harness(EncoderBehavior::CrashAfterFrames(20));
    let config = recording_config(&h.dir.path().join("sessions"), 5);
    h.lifecycle.start_recording().unwrap();
    for index in 0..20 {
        let sample = common::frame(&config, index);
        while !h.lifecycle.push_frame(sample.clone()) {
            thread::sleep(Duration::from_millis(1));
        }
    }

    // Nothing polls the lifecycle: the crash has to reach the delegate on its own.
    assert!(wait_until(|| !h.delegate.errors.lock().is_empty()));
    assert!(wait_until(|| !h.lifecycle.recorder().is_active()));

    match h.delegate.errors.lock().as_slice() {
        [FailureReason::EncoderCrashed(stderr)] => assert!(stderr.contains("simulated crash")),
        other => panic!("expected one encoder crash, got {other:?}"),
    }
    assert_eq!(*h.delegate.states.lock(), vec!["recording", "failed"]);
    match h.lifecycle.state() {
        ReportState::Failed(FailureReason::EncoderCrashed(_)) => {}
        other => panic!("expected encoder crash, got {other}"),
    }
    assert!(matches!(
        h.lifecycle.stop_and_submit(submission()),
        Err(ReportError::InvalidTransition { .. })
    ));
    assert_eq!(h.delegate.errors.lock().len(), 1);
}

#[test]
fn server_rejection_fails_the_report_with_reason() {
    let h = harness(EncoderBehavior::Normal);
    h.transport.fail_chunks(rejected(), 1);
    let config = recording_config(&h.dir.path().join("sessions"), 5);

    h.lifecycle.start_recording().unwrap();
    push_frames(|f| h.lifecycle.push_frame(f), &config, 60);

    let err = h.lifecycle.stop_and_submit(submission()).unwrap_err();
    match err {
        ReportError::Failed(FailureReason::RejectedByServer(message)) => {
            assert!(message.contains("bundle invalid"), "{message}")
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(h.lifecycle.state().name(), "failed");
    assert_eq!(h.transport.chunk_attempts.load(std::sync::atomic::Ordering::SeqCst), 1);

    // The bundle stays on disk for a later resubmission.
    let bundles = fs::read_dir(h.dir.path().join("bundles")).unwrap().count();
    assert_eq!(bundles, 1);
}

#[test]
fn submission_logs_override_captured_buffer() {
    let h = harness(EncoderBehavior::Normal);
    let config = recording_config(&h.dir.path().join("sessions"), 5);
    h.lifecycle.start_recording().unwrap();
    push_frames(|f| h.lifecycle.push_frame(f), &config, 30);

    let mut submission = ReportSubmission::new("texture flicker");
    submission.logs = Some(vec!["first\nsecond".into(), "third".into()]);
    let outcome = h.lifecycle.stop_and_submit(submission).unwrap();

    let bundle = ReportBundle::open(&h.dir.path().join("bundles").join(&outcome.report_id)).unwrap();
    assert_eq!(bundle.logs(), ["first", "second", "third"]);
    assert_eq!(bundle.document().steps_to_reproduce, None);
}

#[test]
fn report_without_video_uploads_the_screenshot() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new();
    let lifecycle = lifecycle_in(dir.path(), transport.clone(), EncoderBehavior::Normal).with_release_label("v1.4.0");
    let config = recording_config(&dir.path().join("sessions"), 5);

    lifecycle.start_recording().unwrap();
    push_frames(|f| lifecycle.push_frame(f), &config, 30);

    let submission = ReportSubmission {
        include_video: false,
        include_logs: false,
        ..ReportSubmission::new("HUD freezes after alt-tab")
    };
    let outcome = lifecycle.stop_and_submit(submission).unwrap();

    let bundle = ReportBundle::open(&dir.path().join("bundles").join(&outcome.report_id)).unwrap();
    assert_eq!(bundle.clip_path(), None);
    assert_eq!(bundle.document().log_file, None);
    assert!(bundle.logs().is_empty());
    assert_eq!(bundle.document().release, Some(ReleaseTarget::Label("v1.4.0".into())));

    let screenshot = fs::read(bundle.screenshot_path().unwrap()).unwrap();
    assert_eq!(&screenshot[..2], &[0xFF, 0xD8]);
    assert_eq!(transport.received_bytes(), screenshot);
    assert_eq!(fs::read_dir(dir.path().join("sessions")).unwrap().count(), 0);
}

#[test]
fn release_id_in_submission_overrides_configured_label() {
    let dir = tempfile::tempdir().unwrap();
    let lifecycle =
        lifecycle_in(dir.path(), ScriptedTransport::new(), EncoderBehavior::Normal).with_release_label("v1.4.0");
    let config = recording_config(&dir.path().join("sessions"), 5);

    lifecycle.start_recording().unwrap();
    push_frames(|f| lifecycle.push_frame(f), &config, 30);
    let submission = ReportSubmission {
        include_screenshot: false,
        release_id: Some("rel_981".into()),
        ..ReportSubmission::new("door clips through wall")
    };
    let outcome = lifecycle.stop_and_submit(submission).unwrap();

    let bundle = ReportBundle::open(&dir.path().join("bundles").join(&outcome.report_id)).unwrap();
    assert_eq!(bundle.document().release, Some(ReleaseTarget::Id("rel_981".into())));
    assert_eq!(bundle.screenshot_path(), None);
    assert_eq!(bundle.logs().len(), 2);
}

/// Cancels the report from another thread as soon as bundling starts.
#[derive(Default)]
struct CancelOnBundling {
    lifecycle: Mutex<Option<Arc<ReportLifecycle<FakeEncoderBackend>>>>,
    canceller: Mutex<Option<thread::JoinHandle<Result<(), ReportError>>>>,
}

impl ReportDelegate for CancelOnBundling {
    fn on_state_changed(&self, state: &ReportState) {
        if *state != ReportState::Bundling {
            return;
        }
        if let Some(lifecycle) = self.lifecycle.lock().clone() {
            *self.canceller.lock() = Some(thread::spawn(move || lifecycle.cancel()));
        }
    }

    fn on_upload_progress(&self, _bytes_sent: u64, _total_bytes: u64) {}

    fn on_error(&self, _reason: &FailureReason) {}

    fn on_report_submitted(&self, _outcome: &ReportOutcome) {}
}

#[test]
fn cancel_while_bundling_leaves_no_orphaned_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new();
    transport.slow_chunks(Duration::from_millis(50));
    let delegate = Arc::new(CancelOnBundling::default());

    let mut lifecycle = lifecycle_in(dir.path(), transport, EncoderBehavior::Normal);
    lifecycle.set_delegate(delegate.clone());
    let lifecycle = Arc::new(lifecycle);
    *delegate.lifecycle.lock() = Some(Arc::clone(&lifecycle));

    let config = recording_config(&dir.path().join("sessions"), 5);
    lifecycle.start_recording().unwrap();
    push_frames(|f| lifecycle.push_frame(f), &config, 60);

    let err = lifecycle.stop_and_submit(ReportSubmission::new("cancelled report")).unwrap_err();
    assert_eq!(err, ReportError::Failed(FailureReason::CancelledByUser));
    let canceller = delegate.canceller.lock().take().unwrap();
    canceller.join().unwrap().unwrap();
    *delegate.lifecycle.lock() = None;

    // Whatever bundle survived must be resumable through its upload record.
    let bundles = dir.path().join("bundles");
    if bundles.exists() {
        for entry in fs::read_dir(&bundles).unwrap().filter_map(Result::ok) {
            let id = entry.file_name().to_string_lossy().into_owned();
            let cancelled = || {
                let record = lifecycle.uploads().store().load(&id).unwrap();
                record.is_some_and(|r| r.phase == TaskPhase::Cancelled)
            };
            assert!(wait_until(cancelled), "orphaned bundle {id}");
        }
    }
    assert_eq!(lifecycle.state(), ReportState::Failed(FailureReason::CancelledByUser));
}
