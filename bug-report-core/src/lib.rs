//! # bug-report-core
//!
//! Platform-agnostic core of the in-game bug reporter.
//!
//! Keeps a rolling window of recent gameplay video by streaming raw frames
//! into an external encoder process, turns the window into a clip on demand,
//! packages it with a screenshot, logs and system metadata into a report bundle, and
//! uploads the bundle with chunked, resumable transfers.
//!
//! Encoder backends (e.g. FFmpeg) implement the `EncoderBackend` trait and
//! plug into the generic `RecordingController`.
//!
//! ## Architecture
//!
//! ```text
//! bug-report-core (this crate)
//! ├── traits/       ← EncoderBackend, FrameSource, UploadTransport, ReportDelegate
//! ├── models/       ← errors, ReportState, configuration, frames, bundles, upload tasks
//! ├── processing/   ← FrameQueue, FrameBridge, segment window, RingBuffer, log capture
//! ├── session/      ← RecordingController, encoder child process, ReportLifecycle
//! ├── storage/      ← BundleAssembler, screenshots, upload task store, system metadata
//! └── upload/       ← UploadManager, retry policy, HTTP transport
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;
pub mod upload;

// Re-export key types at crate root for convenience.
pub use models::clip::{BridgeStats, ClipOutcome};
pub use models::config::{RecordingConfig, ReporterConfiguration, UploadConfig};
pub use models::error::{BundleError, ConfigError, RecordingError, ReportError, TransportError, UploadError};
pub use models::frame::{FrameSample, PixelFormat};
pub use models::report::{
    AttachmentDescriptor, FieldValue, MetadataField, ReleaseTarget, ReportBundle, ReportOutcome, SystemMetadata,
};
pub use models::state::{FailureReason, ReportState, SessionHealth};
pub use models::upload_models::{UploadStatus, UploadTask, UploadTaskHandle};
pub use processing::frame_bridge::FrameBridge;
pub use processing::frame_source_adapter::{FrameSourceAdapter, SyntheticFrameSource};
pub use processing::log_capture::{LogBuffer, LogCapture};
pub use processing::ring_buffer::RingBuffer;
pub use session::lifecycle::{ReportLifecycle, ReportSubmission};
pub use session::process::ChildProcess;
pub use session::recording::{CrashListener, RecordingController, SessionHandle};
pub use storage::bundle::BundleAssembler;
pub use storage::system_info::HostInfo;
pub use traits::encoder::{EncoderBackend, EncoderInvocation, EncoderProcess, ProcessExit};
pub use traits::frame_source::{FrameSink, FrameSource};
pub use traits::report_delegate::ReportDelegate;
pub use traits::transport::UploadTransport;
pub use upload::http::HttpTransport;
pub use upload::manager::UploadManager;
pub use upload::retry::RetryPolicy;
