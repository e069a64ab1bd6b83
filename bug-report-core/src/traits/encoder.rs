use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::models::error::RecordingError;
use crate::models::frame::PixelFormat;

/// File name prefix of every segment the encoder writes.
pub const SEGMENT_PREFIX: &str = "segment_";

/// Parameters for one encoder launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInvocation {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub pixel_format: PixelFormat,
    pub segment_secs: u32,

    /// Directory the encoder writes `segment_%06d.<ext>` files into.
    pub segment_directory: PathBuf,
}

/// Exit status of an encoder process. `code` is `None` when killed by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A running encoder process, supervised by the recording controller.
pub trait EncoderProcess: Send {
    /// Takes the raw frame input pipe. Returns `None` on the second call.
    /// Dropping the returned writer signals end-of-input.
    fn take_input(&mut self) -> Option<Box<dyn Write + Send>>;

    /// Non-blocking exit check.
    fn try_exit(&mut self) -> io::Result<Option<ProcessExit>>;

    /// Forcefully terminates the process and reaps it.
    fn kill(&mut self) -> io::Result<()>;

    /// Recent diagnostic output (stderr tail) for error reports.
    fn diagnostics(&self) -> String;
}

/// Launches encoder processes and post-processes their output.
///
/// Implemented by `bug-report-ffmpeg` for the real encoder and by in-process
/// fakes in tests.
pub trait EncoderBackend: Send + Sync + 'static {
    fn launch(&self, invocation: &EncoderInvocation) -> Result<Box<dyn EncoderProcess>, RecordingError>;

    /// Extension of segment and clip files, without the dot.
    fn segment_extension(&self) -> &str;

    /// Joins `segments` (in order) into a single clip at `output`.
    fn merge_segments(&self, segments: &[PathBuf], output: &Path) -> Result<(), RecordingError>;
}
