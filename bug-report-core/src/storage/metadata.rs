use std::fs;
use std::path::Path;

use crate::models::error::BundleError;
use crate::models::report::ReportDocument;
use crate::storage::atomic_file::write_file_sync;

/// Metadata document inside every bundle directory.
pub const DOCUMENT_FILE: &str = "metadata.json";

/// Log excerpt inside every bundle directory, one line per entry.
pub const LOG_FILE: &str = "logs.txt";

/// Write the report document as `metadata.json` in `bundle_dir`.
pub fn write_document(document: &ReportDocument, bundle_dir: &Path) -> Result<(), BundleError> {
    let json = serde_json::to_string_pretty(document)
        .map_err(|e| BundleError::StorageError(format!("failed to serialize metadata: {}", e)))?;
    write_file_sync(&bundle_dir.join(DOCUMENT_FILE), json.as_bytes())
        .map_err(|e| BundleError::StorageError(format!("failed to write metadata: {}", e)))
}

/// Read the report document from `bundle_dir`.
pub fn read_document(bundle_dir: &Path) -> Result<ReportDocument, BundleError> {
    let path = bundle_dir.join(DOCUMENT_FILE);
    let json = fs::read_to_string(&path)
        .map_err(|e| BundleError::InvalidBundle(format!("failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&json)
        .map_err(|e| BundleError::InvalidBundle(format!("failed to parse {}: {}", path.display(), e)))
}

pub fn write_logs(lines: &[String], bundle_dir: &Path) -> Result<(), BundleError> {
    let mut text = lines.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    write_file_sync(&bundle_dir.join(LOG_FILE), text.as_bytes())
        .map_err(|e| BundleError::StorageError(format!("failed to write logs: {}", e)))
}

pub fn read_logs(bundle_dir: &Path, file_name: &str) -> Result<Vec<String>, BundleError> {
    let path = bundle_dir.join(file_name);
    let text = fs::read_to_string(&path)
        .map_err(|e| BundleError::InvalidBundle(format!("failed to read {}: {}", path.display(), e)))?;
    Ok(text.lines().map(str::to_owned).collect())
}
