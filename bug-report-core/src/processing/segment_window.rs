use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::models::config::RecordingConfig;
use crate::traits::encoder::SEGMENT_PREFIX;

/// One closed or in-progress encoder output segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFile {
    pub index: u64,
    pub path: PathBuf,
    pub size_bytes: u64,
}

pub fn segment_file_name(index: u64, extension: &str) -> String {
    format!("{}{:06}.{}", SEGMENT_PREFIX, index, extension)
}

/// Lists `segment_NNNNNN.<extension>` files in `directory`, oldest first.
///
/// Ordering is by sequence number, not modification time. A missing
/// directory yields an empty list.
pub fn list_segments(directory: &Path, extension: &str) -> io::Result<Vec<SegmentFile>> {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let suffix = format!(".{}", extension);
    let mut segments = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(index) = name
            .strip_prefix(SEGMENT_PREFIX)
            .and_then(|rest| rest.strip_suffix(suffix.as_str()))
            .and_then(|digits| digits.parse::<u64>().ok())
        else {
            continue;
        };
        // The encoder may still be creating the file.
        let size_bytes = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        segments.push(SegmentFile {
            index,
            path: entry.path(),
            size_bytes,
        });
    }
    segments.sort_by_key(|s| s.index);
    Ok(segments)
}

/// Outcome of one pruning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: Vec<PathBuf>,
    pub retained: usize,
    pub retained_bytes: u64,
}

/// Rolling-window limits applied to a session's segment directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Newest segments kept, including the one being written.
    pub keep_segments: usize,

    /// Optional byte cap over the kept segments. The newest segment is never
    /// removed to satisfy it.
    pub max_bytes: Option<u64>,
}

impl RetentionPolicy {
    pub fn from_config(config: &RecordingConfig) -> Self {
        Self {
            keep_segments: config.segments_to_keep().max(1),
            max_bytes: config.max_buffer_bytes,
        }
    }

    /// Deletes segments that fall outside the window.
    pub fn enforce(&self, directory: &Path, extension: &str) -> io::Result<PruneReport> {
        let mut segments = list_segments(directory, extension)?;
        let mut removed = Vec::new();

        let excess = segments.len().saturating_sub(self.keep_segments);
        for segment in segments.drain(..excess) {
            remove_segment(&segment, &mut removed)?;
        }

        let mut retained_bytes: u64 = segments.iter().map(|s| s.size_bytes).sum();
        if let Some(cap) = self.max_bytes {
            while retained_bytes > cap && segments.len() > 1 {
                let oldest = segments.remove(0);
                retained_bytes -= oldest.size_bytes;
                remove_segment(&oldest, &mut removed)?;
            }
        }

        if !removed.is_empty() {
            log::debug!(
                "pruned {} segment(s) in {}, {} retained ({} bytes)",
                removed.len(),
                directory.display(),
                segments.len(),
                retained_bytes
            );
        }

        Ok(PruneReport {
            removed,
            retained: segments.len(),
            retained_bytes,
        })
    }
}

fn remove_segment(segment: &SegmentFile, removed: &mut Vec<PathBuf>) -> io::Result<()> {
    match fs::remove_file(&segment.path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    removed.push(segment.path.clone());
    Ok(())
}

/// Picks the newest `count` non-empty segments, oldest first.
pub fn select_for_clip(segments: &[SegmentFile], count: usize) -> Vec<PathBuf> {
    let usable: Vec<&SegmentFile> = segments.iter().filter(|s| s.size_bytes > 0).collect();
    let skip = usable.len().saturating_sub(count);
    usable[skip..].iter().map(|s| s.path.clone()).collect()
}

/// Deletes every segment in `directory`, e.g. once they are merged into a clip.
pub fn remove_all(directory: &Path, extension: &str) -> io::Result<usize> {
    let segments = list_segments(directory, extension)?;
    let mut removed = Vec::new();
    for segment in &segments {
        remove_segment(segment, &mut removed)?;
    }
    Ok(removed.len())
}
