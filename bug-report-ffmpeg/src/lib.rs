//! # bug-report-ffmpeg
//!
//! FFmpeg encoder backend for bug-report-core.
//!
//! Provides:
//! - `FfmpegBackend`: runs ffmpeg as a supervised child process that reads
//!   raw frames from stdin and writes fixed-length segments
//! - `locate_ffmpeg`: finds a bundled or system ffmpeg binary
//!
//! ## Usage
//! ```ignore
//! use bug_report_core::RecordingController;
//! use bug_report_ffmpeg::FfmpegBackend;
//!
//! let backend = FfmpegBackend::locate(&[std::env::current_dir()?])?;
//! let recorder = RecordingController::new(backend);
//! ```

pub mod backend;
pub mod locate;

pub use backend::FfmpegBackend;
pub use locate::locate_ffmpeg;
