use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::models::error::UploadError;
use crate::models::upload_models::UploadTask;
use crate::storage::atomic_file::write_atomic;

const RECORD_SUFFIX: &str = ".upload.json";

/// Durable upload task records, one JSON file per bundle.
///
/// Every write is an atomic replace, so a crash mid-write leaves the
/// previous checkpoint intact.
#[derive(Debug, Clone)]
pub struct UploadTaskStore {
    directory: PathBuf,
}

impl UploadTaskStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn record_path(&self, bundle_id: &str) -> PathBuf {
        self.directory.join(format!("{}{}", bundle_id, RECORD_SUFFIX))
    }

    pub fn save(&self, task: &UploadTask) -> Result<(), UploadError> {
        fs::create_dir_all(&self.directory)
            .map_err(|e| UploadError::StorageError(format!("failed to create upload state directory: {}", e)))?;
        let json = serde_json::to_vec_pretty(task)
            .map_err(|e| UploadError::StorageError(format!("failed to serialize upload task: {}", e)))?;
        write_atomic(&self.record_path(&task.bundle_id), &json)
            .map_err(|e| UploadError::StorageError(format!("failed to persist upload task: {}", e)))
    }

    pub fn load(&self, bundle_id: &str) -> Result<Option<UploadTask>, UploadError> {
        let path = self.record_path(bundle_id);
        let json = match fs::read(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(UploadError::StorageError(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        serde_json::from_slice(&json)
            .map(Some)
            .map_err(|e| UploadError::StorageError(format!("corrupt upload record {}: {}", path.display(), e)))
    }

    /// Every readable record. Unreadable ones are logged and skipped.
    pub fn load_all(&self) -> Result<Vec<UploadTask>, UploadError> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(UploadError::StorageError(format!("failed to list upload records: {}", e))),
        };

        let mut tasks = Vec::new();
        for entry in entries.filter_map(Result::ok) {
            let name = entry.file_name();
            let Some(bundle_id) = name.to_str().and_then(|n| n.strip_suffix(RECORD_SUFFIX)) else {
                continue;
            };
            if bundle_id.starts_with('.') {
                continue;
            }
            match self.load(bundle_id) {
                Ok(Some(task)) => tasks.push(task),
                Ok(None) => {}
                Err(e) => log::warn!("skipping upload record: {}", e),
            }
        }
        tasks.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(tasks)
    }

    pub fn remove(&self, bundle_id: &str) -> Result<(), UploadError> {
        match fs::remove_file(self.record_path(bundle_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UploadError::StorageError(format!("failed to remove upload record: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::upload_models::TaskPhase;

    fn task(id: &str) -> UploadTask {
        UploadTask::new(id, PathBuf::from("/bundles").join(id), "https://example.com/api", 1000)
    }

    #[test]
    fn save_and_load_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadTaskStore::new(dir.path().join("uploads"));

        let mut record = task("r-1");
        record.advance_to(300).unwrap();
        store.save(&record).unwrap();
        record.advance_to(600).unwrap();
        store.save(&record).unwrap();

        let loaded = store.load("r-1").unwrap().unwrap();
        assert_eq!(loaded.bytes_sent(), 600);
        assert_eq!(loaded.phase, TaskPhase::Pending);
    }

    #[test]
    fn load_missing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadTaskStore::new(dir.path());
        assert!(store.load("ghost").unwrap().is_none());
    }

    #[test]
    fn load_all_skips_corrupt_and_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadTaskStore::new(dir.path());
        store.save(&task("a")).unwrap();
        store.save(&task("b")).unwrap();
        fs::write(dir.path().join("c.upload.json"), b"{ truncated").unwrap();
        fs::write(dir.path().join(".d.upload.json.tmp"), b"{}").unwrap();

        let mut ids: Vec<String> = store.load_all().unwrap().into_iter().map(|t| t.bundle_id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadTaskStore::new(dir.path());
        store.save(&task("a")).unwrap();
        store.remove("a").unwrap();
        store.remove("a").unwrap();
        assert!(store.load("a").unwrap().is_none());
    }
}
