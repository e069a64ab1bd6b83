use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Writes `data` to `path` and fsyncs it.
pub fn write_file_sync(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

/// Replaces `path` with `data` atomically: write a sibling temp file, fsync,
/// then rename over the target. Readers see the old or the new contents,
/// never a torn write.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp = temp_path_for(path)?;
    if let Err(e) = write_file_sync(&tmp, data) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// `dir/.name.tmp` for `dir/name`.
pub fn temp_path_for(path: &Path) -> io::Result<PathBuf> {
    let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a file path: {}", path.display()),
        )
    })?;
    Ok(path.with_file_name(format!(".{}.tmp", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_existing_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.json");
        write_atomic(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert!(!temp_path_for(&path).unwrap().exists());
    }

    #[test]
    fn failed_write_leaves_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("task.json");
        assert!(write_atomic(&path, b"data").is_err());
        assert!(!path.exists());
    }
}
