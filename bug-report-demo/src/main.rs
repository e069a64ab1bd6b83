//! Demo host: records a few seconds of synthetic frames and submits them
//! as a bug report.
//!
//! ```text
//! bug-report-demo [config.json] [seconds]
//! ```

use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bug_report_core::processing::frame_source_adapter::PollOutcome;
use bug_report_core::{
    FailureReason, FrameSourceAdapter, HttpTransport, LogCapture, ReportDelegate, ReportLifecycle,
    ReportOutcome, ReportState, ReportSubmission, ReporterConfiguration, SyntheticFrameSource,
};
use bug_report_ffmpeg::FfmpegBackend;

const DEFAULT_CONFIG: &str = "bug-report.json";
const DEFAULT_RECORD_SECS: u64 = 15;

struct ConsoleDelegate;

impl ReportDelegate for ConsoleDelegate {
    fn on_state_changed(&self, state: &ReportState) {
        if !matches!(state, ReportState::Uploading { .. }) {
            println!("state: {}", state);
        }
    }

    fn on_upload_progress(&self, bytes_sent: u64, total_bytes: u64) {
        println!("uploaded {}/{} bytes", bytes_sent, total_bytes);
    }

    fn on_error(&self, reason: &FailureReason) {
        eprintln!("report failed [{}]: {}", reason.code(), reason.message());
    }

    fn on_report_submitted(&self, outcome: &ReportOutcome) {
        println!("report {} submitted, confirmation {}", outcome.report_id, outcome.confirmation_id);
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut args = env::args().skip(1);
    let config_path = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let record_secs = match args.next() {
        Some(secs) => secs.parse()?,
        None => DEFAULT_RECORD_SECS,
    };

    let config = if config_path.exists() {
        ReporterConfiguration::from_json_file(&config_path)?
    } else {
        ReporterConfiguration::default()
    };

    let console = env_logger::Builder::from_default_env().build();
    let max_level = console.filter();
    let logs = LogCapture::new(config.log_capture_lines)
        .with_inner(Box::new(console))
        .with_level(max_level.max(log::LevelFilter::Info))
        .install()?;

    let backend = FfmpegBackend::locate(&[env::current_dir()?])?;
    let transport = Arc::new(HttpTransport::new(&config.upload)?);
    let mut lifecycle = ReportLifecycle::from_configuration(backend, transport, &config)?.with_log_buffer(logs);
    lifecycle.set_delegate(Arc::new(ConsoleDelegate));

    let resumed = lifecycle.resume_uploads()?;
    if !resumed.is_empty() {
        log::info!("resumed {} interrupted uploads", resumed.len());
    }

    let recording = &config.recording;
    let mut adapter = FrameSourceAdapter::new(
        SyntheticFrameSource::new(recording.width, recording.height, recording.pixel_format),
        recording.fps,
    );

    lifecycle.start_recording()?;
    log::info!("recording synthetic frames for {}s", record_secs);

    let started = Instant::now();
    let tick = Duration::from_secs(1) / (recording.fps.max(1) * 4);
    let mut dropped = 0u64;
    while started.elapsed() < Duration::from_secs(record_secs) {
        if adapter.poll(started.elapsed(), &lifecycle) == PollOutcome::Dropped {
            dropped += 1;
        }
        if lifecycle.state().is_terminal() {
            break;
        }
        thread::sleep(tick);
    }
    if dropped > 0 {
        log::warn!("{} frames dropped by the encoder bridge", dropped);
    }

    if let ReportState::Failed(reason) = lifecycle.state() {
        return Err(reason.to_string().into());
    }

    let mut submission = ReportSubmission::new("Synthetic capture from bug-report-demo");
    submission.steps_to_reproduce = Some(format!("Run bug-report-demo for {}s", record_secs));
    let outcome = lifecycle.stop_and_submit(submission)?;
    if outcome.clip_best_effort {
        log::warn!("clip was finalized best effort");
    }
    Ok(())
}
