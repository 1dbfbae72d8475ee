use chrono::{DateTime, Utc};
use shared::ImageEntry;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const MAX_FILENAME_BYTES: usize = 255;

/// Raw uploads and processed artifacts, each kept in one flat directory and
/// keyed by the caller's filename.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    raw_dir: PathBuf,
    processed_dir: PathBuf,
    max_upload_bytes: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid filename: {0:?}")]
    InvalidFilename(String),
    #[error("File too large: {size} bytes exceeds limit of {limit}")]
    FileTooLarge { size: usize, limit: usize },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Area {
    Raw,
    Processed,
}

fn is_temp_name(name: &str) -> bool {
    name.strip_prefix('.')
        .and_then(|rest| rest.strip_suffix(".part"))
        .is_some_and(|id| id.len() == 32 && id.bytes().all(|b| b.is_ascii_hexdigit()))
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl LocalStorage {
    pub fn new(
        raw_dir: impl Into<PathBuf>,
        processed_dir: impl Into<PathBuf>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            processed_dir: processed_dir.into(),
            max_upload_bytes,
        }
    }

    /// Creates both directories if they are missing.
    pub fn ensure_dirs(&self) -> Result<(), StorageError> {
        for dir in [&self.raw_dir, &self.processed_dir] {
            fs::create_dir_all(dir).map_err(io_error(dir))?;
            log::info!("Storage directory ready: {}", dir.display());
        }
        Ok(())
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Accepts any name that stays inside its directory: no separators, no
    /// NUL, not `.` or `..`, and at most 255 bytes.
    pub fn validate_filename(filename: &str) -> Result<(), StorageError> {
        let invalid = filename.is_empty()
            || filename == "."
            || filename == ".."
            || filename.len() > MAX_FILENAME_BYTES
            || filename.contains(['/', '\\', '\0']);
        if invalid {
            return Err(StorageError::InvalidFilename(filename.to_string()));
        }
        Ok(())
    }

    pub fn validate_image_size(&self, size: usize) -> Result<(), StorageError> {
        if size > self.max_upload_bytes {
            return Err(StorageError::FileTooLarge {
                size,
                limit: self.max_upload_bytes,
            });
        }
        Ok(())
    }

    fn dir(&self, area: Area) -> &Path {
        match area {
            Area::Raw => &self.raw_dir,
            Area::Processed => &self.processed_dir,
        }
    }

    pub fn path_for(&self, area: Area, filename: &str) -> Result<PathBuf, StorageError> {
        Self::validate_filename(filename)?;
        Ok(self.dir(area).join(filename))
    }

    pub fn write_raw(&self, filename: &str, data: &[u8]) -> Result<PathBuf, StorageError> {
        self.validate_image_size(data.len())?;
        self.write(Area::Raw, filename, data)
    }

    pub fn write_processed(&self, filename: &str, data: &[u8]) -> Result<PathBuf, StorageError> {
        self.write(Area::Processed, filename, data)
    }

    /// Writes through a uniquely named temp file and renames it into place, so
    /// a concurrent writer of the same name replaces the file whole.
    fn write(&self, area: Area, filename: &str, data: &[u8]) -> Result<PathBuf, StorageError> {
        let target = self.path_for(area, filename)?;
        let tmp = self
            .dir(area)
            .join(format!(".{}.part", Uuid::new_v4().simple()));

        let result = fs::File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(data)?;
                file.sync_all()
            })
            .and_then(|_| fs::rename(&tmp, &target));

        if let Err(source) = result {
            let _ = fs::remove_file(&tmp);
            return Err(StorageError::Io {
                path: target,
                source,
            });
        }

        log::debug!("Wrote {} bytes to {}", data.len(), target.display());
        Ok(target)
    }

    #[cfg(test)]
    pub fn exists(&self, area: Area, filename: &str) -> bool {
        self.path_for(area, filename)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Files in one area sorted by name. In-flight temp files are skipped.
    pub fn list(&self, area: Area) -> Result<Vec<ImageEntry>, StorageError> {
        let dir = self.dir(area);
        let mut entries = Vec::new();

        for entry in fs::read_dir(dir).map_err(io_error(dir))? {
            let entry = entry.map_err(io_error(dir))?;
            let filename = entry.file_name().to_string_lossy().into_owned();
            if is_temp_name(&filename) {
                continue;
            }
            let metadata = entry.metadata().map_err(io_error(&entry.path()))?;
            if !metadata.is_file() {
                continue;
            }
            entries.push(ImageEntry {
                filename,
                size_bytes: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        entries.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn storage(root: &Path) -> LocalStorage {
        let storage = LocalStorage::new(root.join("raw"), root.join("processed"), 1024);
        storage.ensure_dirs().unwrap();
        storage
    }

    #[test]
    fn ensure_dirs_creates_both_directories() {
        let root = tempfile::tempdir().unwrap();
        storage(root.path());
        assert!(root.path().join("raw").is_dir());
        assert!(root.path().join("processed").is_dir());
    }

    #[test]
    fn rejects_traversal_and_separators() {
        for name in ["", ".", "..", "../etc/passwd", "a/b.png", "a\\b.png", "nul\0.png"] {
            assert!(
                matches!(
                    LocalStorage::validate_filename(name),
                    Err(StorageError::InvalidFilename(_))
                ),
                "{name:?} should be rejected"
            );
        }
        assert!(LocalStorage::validate_filename(&"x".repeat(256)).is_err());
        assert!(LocalStorage::validate_filename("cat photo (1).png").is_ok());
        assert!(LocalStorage::validate_filename("..hidden.png").is_ok());
    }

    #[test]
    fn raw_write_enforces_size_limit() {
        let root = tempfile::tempdir().unwrap();
        let storage = storage(root.path());
        let err = storage.write_raw("big.png", &vec![0u8; 2048]).unwrap_err();
        assert!(matches!(
            err,
            StorageError::FileTooLarge {
                size: 2048,
                limit: 1024
            }
        ));
        assert!(!storage.exists(Area::Raw, "big.png"));
    }

    #[test]
    fn last_write_wins() {
        let root = tempfile::tempdir().unwrap();
        let storage = storage(root.path());
        storage.write_raw("a.png", b"first").unwrap();
        let path = storage.write_raw("a.png", b"second").unwrap();
        assert_eq!(fs::read(path).unwrap(), b"second");
    }

    #[test]
    fn list_skips_temp_files_and_sorts() {
        let root = tempfile::tempdir().unwrap();
        let storage = storage(root.path());
        storage.write_raw("b.png", b"bb").unwrap();
        storage.write_raw("a.png", b"a").unwrap();
        fs::write(
            root.path().join("raw/.0123456789abcdef0123456789abcdef.part"),
            b"partial",
        )
        .unwrap();
        fs::create_dir(root.path().join("raw/subdir")).unwrap();

        let listed = storage.list(Area::Raw).unwrap();
        let names: Vec<_> = listed.iter().map(|e| e.filename.as_str()).collect();
        assert_eq!(names, ["a.png", "b.png"]);
        assert_eq!(listed[1].size_bytes, 2);
        assert!(listed[0].modified.is_some());
        assert!(storage.list(Area::Processed).unwrap().is_empty());
    }

    #[test]
    fn concurrent_same_name_writes_leave_one_whole_file() {
        let root = tempfile::tempdir().unwrap();
        let storage = Arc::new(storage(root.path()));
        let first = vec![b'a'; 1000];
        let second = vec![b'b'; 1000];
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [first.clone(), second.clone()]
            .into_iter()
            .map(|data| {
                let storage = storage.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    storage.write_raw("same.png", &data).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stored = fs::read(root.path().join("raw/same.png")).unwrap();
        assert!(stored == first || stored == second);
        assert_eq!(storage.list(Area::Raw).unwrap().len(), 1);
    }
}
