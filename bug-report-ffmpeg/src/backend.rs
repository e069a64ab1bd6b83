use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use bug_report_core::models::error::RecordingError;
use bug_report_core::session::process::ChildProcess;
use bug_report_core::traits::encoder::{EncoderBackend, EncoderInvocation, EncoderProcess, SEGMENT_PREFIX};

use crate::locate::locate_ffmpeg;

const CONCAT_LIST_FILE: &str = "concat.txt";
const MERGE_STDERR_LINES: usize = 20;

/// Encoder backend that runs ffmpeg with the segment muxer.
///
/// Raw frames arrive on stdin as `rawvideo`; output is cut into
/// `segment_%06d.<ext>` files of `segment_secs` each, which the recording
/// controller prunes and later joins with [`FfmpegBackend::merge_segments`].
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    binary: PathBuf,
    codec_options: Vec<String>,
    container_extension: String,
}

impl FfmpegBackend {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            codec_options: ["-c:v", "libx264", "-preset", "veryfast", "-tune", "zerolatency"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            container_extension: "mp4".into(),
        }
    }

    /// Finds ffmpeg via [`locate_ffmpeg`] and builds a backend for it.
    pub fn locate(search_roots: &[PathBuf]) -> Result<Self, RecordingError> {
        locate_ffmpeg(search_roots)
            .map(Self::new)
            .ok_or_else(|| RecordingError::LaunchFailure("ffmpeg binary not found".into()))
    }

    /// Replaces the codec arguments, e.g. with a hardware encoder.
    pub fn with_codec_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.codec_options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_container_extension(mut self, extension: impl Into<String>) -> Self {
        self.container_extension = extension.into();
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Arguments for a segmenting rawvideo encode reading from stdin.
    ///
    /// Keyframes are forced at every segment boundary so each segment
    /// starts cleanly and stream-copy concatenation works.
    pub fn encoder_arguments(&self, invocation: &EncoderInvocation) -> Vec<OsString> {
        let segment_secs = invocation.segment_secs.to_string();
        let mut args: Vec<OsString> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-y",
            "-f",
            "rawvideo",
            "-pix_fmt",
            invocation.pixel_format.encoder_name(),
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push("-s".into());
        args.push(format!("{}x{}", invocation.width, invocation.height).into());
        args.push("-r".into());
        args.push(invocation.fps.to_string().into());
        args.push("-i".into());
        args.push("-".into());

        args.extend(self.codec_options.iter().map(OsString::from));
        args.push("-force_key_frames".into());
        args.push(format!("expr:gte(t,n_forced*{})", segment_secs).into());

        for arg in ["-pix_fmt", "yuv420p", "-f", "segment", "-segment_time"] {
            args.push(arg.into());
        }
        args.push(segment_secs.into());
        args.push("-reset_timestamps".into());
        args.push("1".into());

        let pattern = format!("{}%06d.{}", SEGMENT_PREFIX, self.container_extension);
        args.push(invocation.segment_directory.join(pattern).into_os_string());
        args
    }

    /// Arguments for joining the segments listed in `list` into `output`
    /// without re-encoding.
    pub fn merge_arguments(list: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-y", "-f", "concat", "-safe", "0", "-i"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push(list.as_os_str().to_owned());
        args.push("-c".into());
        args.push("copy".into());
        args.push(output.as_os_str().to_owned());
        args
    }
}

/// Concat demuxer list for `segments`, one `file '<path>'` line each.
pub fn concat_list(segments: &[PathBuf]) -> String {
    segments
        .iter()
        .map(|path| {
            // The concat demuxer resolves relative entries against the list's own directory.
            let path = std::path::absolute(path).unwrap_or_else(|_| path.clone());
            let path = path.to_string_lossy().replace('\\', "/").replace('\'', r"'\''");
            format!("file '{}'\n", path)
        })
        .collect()
}

impl EncoderBackend for FfmpegBackend {
    fn launch(&self, invocation: &EncoderInvocation) -> Result<Box<dyn EncoderProcess>, RecordingError> {
        let mut command = Command::new(&self.binary);
        command.args(self.encoder_arguments(invocation));
        log::debug!("launching {:?}", command);

        let process = ChildProcess::spawn(command).map_err(|e| {
            RecordingError::LaunchFailure(format!("failed to spawn {}: {}", self.binary.display(), e))
        })?;
        log::info!("ffmpeg started (pid {})", process.id());
        Ok(Box::new(process))
    }

    fn segment_extension(&self) -> &str {
        &self.container_extension
    }

    fn merge_segments(&self, segments: &[PathBuf], output: &Path) -> Result<(), RecordingError> {
        match segments {
            [] => Err(RecordingError::FinalizeFailure("no segments to merge".into())),
            [single] => fs::copy(single, output).map(|_| ()).map_err(|e| {
                RecordingError::FinalizeFailure(format!("failed to copy {}: {}", single.display(), e))
            }),
            _ => {
                let list = output.with_file_name(CONCAT_LIST_FILE);
                fs::write(&list, concat_list(segments))
                    .map_err(|e| RecordingError::StorageError(format!("failed to write concat list: {}", e)))?;

                let result = Command::new(&self.binary)
                    .args(Self::merge_arguments(&list, output))
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::piped())
                    .output();
                let _ = fs::remove_file(&list);

                let merged = result
                    .map_err(|e| RecordingError::FinalizeFailure(format!("failed to run ffmpeg merge: {}", e)))?;
                if !merged.status.success() {
                    let stderr = String::from_utf8_lossy(&merged.stderr);
                    let tail: Vec<&str> = stderr.lines().rev().take(MERGE_STDERR_LINES).collect();
                    let tail: Vec<&str> = tail.into_iter().rev().collect();
                    return Err(RecordingError::FinalizeFailure(format!(
                        "ffmpeg merge exited with {}: {}",
                        merged.status,
                        tail.join("\n")
                    )));
                }
                log::info!("merged {} segments into {}", segments.len(), output.display());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bug_report_core::models::frame::PixelFormat;

    fn invocation(dir: &Path) -> EncoderInvocation {
        EncoderInvocation {
            width: 1280,
            height: 720,
            fps: 30,
            pixel_format: PixelFormat::Bgra,
            segment_secs: 10,
            segment_directory: dir.to_path_buf(),
        }
    }

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    fn value_after(args: &[String], flag: &str) -> Option<String> {
        args.iter().position(|a| a == flag).map(|i| args[i + 1].clone())
    }

    #[test]
    fn encoder_arguments_describe_raw_input() {
        let backend = FfmpegBackend::new("ffmpeg");
        let args = strings(&backend.encoder_arguments(&invocation(Path::new("/tmp/s"))));

        assert_eq!(value_after(&args, "-f"), Some("rawvideo".into()));
        assert_eq!(value_after(&args, "-pix_fmt"), Some("bgra".into()));
        assert_eq!(value_after(&args, "-s"), Some("1280x720".into()));
        assert_eq!(value_after(&args, "-r"), Some("30".into()));
        assert_eq!(value_after(&args, "-i"), Some("-".into()));
    }

    #[test]
    fn encoder_arguments_segment_output() {
        let backend = FfmpegBackend::new("ffmpeg");
        let args = strings(&backend.encoder_arguments(&invocation(Path::new("/tmp/s"))));

        assert_eq!(value_after(&args, "-segment_time"), Some("10".into()));
        assert_eq!(value_after(&args, "-reset_timestamps"), Some("1".into()));
        assert_eq!(value_after(&args, "-force_key_frames"), Some("expr:gte(t,n_forced*10)".into()));
        assert!(args.windows(2).any(|w| w[0] == "-pix_fmt" && w[1] == "yuv420p"));
        let output = args.last().unwrap();
        assert!(output.ends_with("segment_%06d.mp4"), "{output}");
    }

    #[test]
    fn codec_options_sit_between_input_and_output() {
        let backend = FfmpegBackend::new("ffmpeg").with_codec_options(["-c:v", "h264_nvenc"]);
        let args = strings(&backend.encoder_arguments(&invocation(Path::new("/tmp/s"))));

        let input = args.iter().position(|a| a == "-i").unwrap();
        let codec = args.iter().position(|a| a == "h264_nvenc").unwrap();
        let segment = args.iter().position(|a| a == "segment").unwrap();
        assert!(input < codec && codec < segment);
        assert!(!args.iter().any(|a| a == "libx264"));
    }

    #[test]
    fn merge_arguments_stream_copy() {
        let args = strings(&FfmpegBackend::merge_arguments(Path::new("list.txt"), Path::new("clip.mp4")));
        assert_eq!(value_after(&args, "-f"), Some("concat".into()));
        assert_eq!(value_after(&args, "-safe"), Some("0".into()));
        assert_eq!(value_after(&args, "-c"), Some("copy".into()));
        assert_eq!(args.last().map(String::as_str), Some("clip.mp4"));
    }

    #[test]
    fn concat_list_escapes_quotes() {
        let list = concat_list(&[PathBuf::from("/a/segment_000001.mp4"), PathBuf::from("/it's/x.mp4")]);
        assert_eq!(list, "file '/a/segment_000001.mp4'\nfile '/it'\\''s/x.mp4'\n");
    }

    #[test]
    fn concat_list_anchors_relative_segments() {
        let list = concat_list(&[PathBuf::from("sessions/session_x/segment_000000.mp4")]);
        let expected = std::env::current_dir()
            .unwrap()
            .join("sessions/session_x/segment_000000.mp4")
            .to_string_lossy()
            .replace('\\', "/");
        assert_eq!(list, format!("file '{}'\n", expected));
    }

    #[test]
    fn single_segment_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        let segment = dir.path().join("segment_000000.mp4");
        fs::write(&segment, b"video").unwrap();
        let output = dir.path().join("clip.mp4");

        // The binary is never run for a single segment.
        let backend = FfmpegBackend::new(dir.path().join("missing-ffmpeg"));
        backend.merge_segments(&[segment], &output).unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"video");
    }

    #[test]
    fn merging_nothing_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FfmpegBackend::new("ffmpeg");
        let err = backend.merge_segments(&[], &dir.path().join("clip.mp4")).unwrap_err();
        assert!(matches!(err, RecordingError::FinalizeFailure(_)));
    }

    #[test]
    fn missing_binary_is_a_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FfmpegBackend::new(dir.path().join("missing-ffmpeg"));
        let err = backend.launch(&invocation(dir.path())).err().unwrap();
        assert!(matches!(err, RecordingError::LaunchFailure(_)));
    }

    #[test]
    fn failed_merge_removes_concat_list() {
        let dir = tempfile::tempdir().unwrap();
        let segments: Vec<PathBuf> = (0..2)
            .map(|i| {
                let path = dir.path().join(format!("segment_{:06}.mp4", i));
                fs::write(&path, b"x").unwrap();
                path
            })
            .collect();
        let backend = FfmpegBackend::new(dir.path().join("missing-ffmpeg"));
        let output = dir.path().join("clip.mp4");

        assert!(backend.merge_segments(&segments, &output).is_err());
        assert!(!dir.path().join(CONCAT_LIST_FILE).exists());
    }
}
