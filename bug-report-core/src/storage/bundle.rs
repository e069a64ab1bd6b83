use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::error::BundleError;
use crate::models::frame::FrameSample;
use crate::models::report::{AttachmentDescriptor, ReleaseTarget, ReportBundle, ReportDocument, SystemMetadata};
use crate::storage::metadata::{self, LOG_FILE};
use crate::storage::screenshot::{self, SCREENSHOT_FILE};

/// Everything that goes into one report.
#[derive(Debug, Clone)]
pub struct BundleInput {
    /// Finalized clip; `None` leaves the video out of the report.
    pub clip_path: Option<PathBuf>,
    pub clip_best_effort: bool,
    /// Frame saved as the report screenshot.
    pub screenshot: Option<FrameSample>,
    /// Log excerpt; `None` leaves the log file out.
    pub logs: Option<Vec<String>>,
    pub metadata: SystemMetadata,
    pub description: String,
    pub steps_to_reproduce: Option<String>,
    pub release: Option<ReleaseTarget>,
}

/// Packages a finalized clip, logs, and metadata into a bundle directory.
///
/// Layout of `<root>/<report_id>/`:
/// ```text
/// clip.<ext>       copy of the finalized clip (if included)
/// screenshot.jpg   last recorded frame (if included)
/// logs.txt         log excerpt, one line per entry (if included)
/// metadata.json    ReportDocument
/// ```
/// The directory is built under `.<report_id>.tmp` and renamed into place,
/// so a bundle directory either is complete or does not exist.
#[derive(Debug, Clone)]
pub struct BundleAssembler {
    root: PathBuf,
}

impl BundleAssembler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn assemble(
        &self,
        clip_path: &Path,
        logs: &[String],
        metadata: &SystemMetadata,
        description: &str,
    ) -> Result<ReportBundle, BundleError> {
        self.assemble_report(BundleInput {
            clip_path: Some(clip_path.to_path_buf()),
            clip_best_effort: false,
            screenshot: None,
            logs: Some(logs.to_vec()),
            metadata: metadata.clone(),
            description: description.to_string(),
            steps_to_reproduce: None,
            release: None,
        })
    }

    /// Fails with `MissingArtifact` when an included clip is absent or
    /// empty; nothing is written in that case.
    pub fn assemble_report(&self, input: BundleInput) -> Result<ReportBundle, BundleError> {
        let clip_size = input.clip_path.as_deref().map(validate_clip).transpose()?;

        let report_id = uuid::Uuid::new_v4().to_string();
        let staging = self.root.join(format!(".{}.tmp", report_id));
        let final_dir = self.root.join(&report_id);

        if staging.exists() {
            fs::remove_dir_all(&staging)
                .map_err(|e| BundleError::StorageError(format!("failed to clear staging directory: {}", e)))?;
        }
        fs::create_dir_all(&staging)
            .map_err(|e| BundleError::StorageError(format!("failed to create bundle directory: {}", e)))?;

        let built = self.write_contents(&staging, &report_id, clip_size, input);
        let (document, logs) = match built {
            Ok(parts) => parts,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&staging, &final_dir) {
            let _ = fs::remove_dir_all(&staging);
            return Err(BundleError::StorageError(format!(
                "failed to move bundle into place: {}",
                e
            )));
        }

        let bundle = ReportBundle::from_parts(final_dir, document, logs);
        log::info!(
            "assembled report bundle {} ({} byte payload, screenshot: {}, {} log lines)",
            report_id,
            bundle.payload_size(),
            bundle.document().screenshot.is_some(),
            bundle.logs().len()
        );
        Ok(bundle)
    }

    fn write_contents(
        &self,
        staging: &Path,
        report_id: &str,
        clip_size: Option<u64>,
        input: BundleInput,
    ) -> Result<(ReportDocument, Vec<String>), BundleError> {
        let clip = match (&input.clip_path, clip_size) {
            (Some(source), Some(size)) => Some(copy_clip(source, size, staging, input.clip_best_effort)?),
            _ => None,
        };

        let screenshot = match &input.screenshot {
            Some(frame) => {
                let path = staging.join(SCREENSHOT_FILE);
                let byte_size = screenshot::write_jpeg(frame, &path)?;
                Some(AttachmentDescriptor {
                    file_name: SCREENSHOT_FILE.to_string(),
                    byte_size,
                    sha256: checksum(&path)?,
                    content_type: "image/jpeg".to_string(),
                    best_effort: false,
                })
            }
            None => None,
        };

        // One entry per line so the file reads back identically.
        let (log_file, logs) = match &input.logs {
            Some(entries) => {
                let lines: Vec<String> = entries
                    .iter()
                    .flat_map(|entry| entry.lines())
                    .map(str::to_owned)
                    .collect();
                metadata::write_logs(&lines, staging)?;
                (Some(LOG_FILE.to_string()), lines)
            }
            None => (None, Vec::new()),
        };

        let document = ReportDocument {
            report_id: report_id.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            description: input.description,
            steps_to_reproduce: input.steps_to_reproduce,
            metadata: input.metadata,
            clip,
            screenshot,
            log_file,
            log_line_count: logs.len(),
            release: input.release,
        };
        metadata::write_document(&document, staging)?;

        Ok((document, logs))
    }
}

impl ReportBundle {
    /// Reopens a bundle written by `BundleAssembler`, e.g. to resume its
    /// upload after a restart.
    pub fn open(directory: &Path) -> Result<ReportBundle, BundleError> {
        let document = metadata::read_document(directory)?;
        for attachment in document.clip.iter().chain(document.screenshot.iter()) {
            let path = directory.join(&attachment.file_name);
            let size = fs::metadata(&path)
                .map_err(|e| BundleError::MissingArtifact(format!("{}: {}", path.display(), e)))?
                .len();
            if size != attachment.byte_size {
                return Err(BundleError::InvalidBundle(format!(
                    "{} is {} bytes, metadata records {}",
                    attachment.file_name, size, attachment.byte_size
                )));
            }
        }
        let logs = match &document.log_file {
            Some(file_name) => metadata::read_logs(directory, file_name)?,
            None => Vec::new(),
        };
        Ok(ReportBundle::from_parts(directory.to_path_buf(), document, logs))
    }
}

fn copy_clip(
    source: &Path,
    expected_size: u64,
    staging: &Path,
    best_effort: bool,
) -> Result<AttachmentDescriptor, BundleError> {
    let extension = source
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp4")
        .to_ascii_lowercase();
    let file_name = format!("clip.{}", extension);
    let dest = staging.join(&file_name);

    let copied = fs::copy(source, &dest)
        .map_err(|e| BundleError::StorageError(format!("failed to copy clip: {}", e)))?;
    if copied != expected_size {
        return Err(BundleError::StorageError(format!(
            "clip changed while copying ({} of {} bytes)",
            copied, expected_size
        )));
    }
    Ok(AttachmentDescriptor {
        content_type: content_type(&extension).to_string(),
        sha256: checksum(&dest)?,
        file_name,
        byte_size: copied,
        best_effort,
    })
}

fn checksum(path: &Path) -> Result<String, BundleError> {
    sha256_file(path).map_err(|e| {
        BundleError::StorageError(format!("failed to checksum {}: {}", path.display(), e))
    })
}

fn validate_clip(path: &Path) -> Result<u64, BundleError> {
    let meta = fs::metadata(path)
        .map_err(|e| BundleError::MissingArtifact(format!("clip {} not found: {}", path.display(), e)))?;
    if !meta.is_file() {
        return Err(BundleError::MissingArtifact(format!(
            "clip {} is not a file",
            path.display()
        )));
    }
    if meta.len() == 0 {
        return Err(BundleError::MissingArtifact(format!("clip {} is empty", path.display())));
    }
    Ok(meta.len())
}

fn content_type(extension: &str) -> &'static str {
    match extension {
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

/// Streaming SHA-256 hex digest of a file.
fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
