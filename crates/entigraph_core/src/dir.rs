//! Store directory layout and locking.
//!
//! ```text
//! <store>/
//! ├─ MANIFEST       # format version, type ids, id high-water mark
//! ├─ LOCK           # advisory lock held while the store is open
//! ├─ wal.log        # write-ahead log
//! └─ segments.dat   # committed entity versions
//! ```

use crate::error::{CoreError, CoreResult};
use crate::manifest::Manifest;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TEMP: &str = "MANIFEST.tmp";
const LOCK_FILE: &str = "LOCK";
const WAL_FILE: &str = "wal.log";
const SEGMENT_FILE: &str = "segments.dat";

/// An opened store directory holding the exclusive lock.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct DatabaseDir {
    path: PathBuf,
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens (and optionally creates) the directory and takes the lock.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Io`] with `NotFound` if the directory is missing and
    ///   `create_if_missing` is false
    /// - [`CoreError::DatabaseLocked`] if another handle holds the lock
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if !create_if_missing {
                return Err(CoreError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("store directory does not exist: {}", path.display()),
                )));
            }
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Root of the store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the write-ahead log.
    #[must_use]
    pub fn wal_path(&self) -> PathBuf {
        self.path.join(WAL_FILE)
    }

    /// Path of the segment file.
    #[must_use]
    pub fn segment_path(&self) -> PathBuf {
        self.path.join(SEGMENT_FILE)
    }

    fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    /// Whether no store has been created here yet.
    #[must_use]
    pub fn is_new_database(&self) -> bool {
        !self.manifest_path().exists() && !self.wal_path().exists()
    }

    /// Loads the manifest, or `None` for a fresh directory.
    pub fn load_manifest(&self) -> CoreResult<Option<Manifest>> {
        match fs::read(self.manifest_path()) {
            Ok(data) if data.is_empty() => Ok(None),
            Ok(data) => Manifest::decode(&data).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces the manifest atomically: write a temp file, sync it, rename
    /// it over the old one, then sync the directory entry.
    pub fn save_manifest(&self, manifest: &Manifest) -> CoreResult<()> {
        let temp = self.path.join(MANIFEST_TEMP);
        let mut file = File::create(&temp)?;
        file.write_all(&manifest.encode()?)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, self.manifest_path())?;
        self.sync_directory()
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_directory_and_lock() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bookstore");

        let dir = DatabaseDir::open(&path, true).unwrap();
        assert!(path.join(LOCK_FILE).exists());
        assert!(dir.is_new_database());
        assert_eq!(dir.wal_path(), path.join("wal.log"));
        assert_eq!(dir.segment_path(), path.join("segments.dat"));
    }

    #[test]
    fn missing_directory_is_io_error() {
        let temp = tempdir().unwrap();
        let err = DatabaseDir::open(&temp.path().join("absent"), false).unwrap_err();
        assert!(matches!(err, CoreError::Io(ref e) if e.kind() == io::ErrorKind::NotFound));
    }

    #[test]
    fn second_open_is_locked_out() {
        let temp = tempdir().unwrap();
        let _first = DatabaseDir::open(temp.path(), true).unwrap();
        assert!(matches!(
            DatabaseDir::open(temp.path(), true),
            Err(CoreError::DatabaseLocked)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        drop(DatabaseDir::open(temp.path(), true).unwrap());
        assert!(DatabaseDir::open(temp.path(), true).is_ok());
    }

    #[test]
    fn manifest_save_load() {
        let temp = tempdir().unwrap();
        let dir = DatabaseDir::open(temp.path(), true).unwrap();
        assert!(dir.load_manifest().unwrap().is_none());

        let mut manifest = Manifest::default();
        manifest.type_id_for("Author");
        dir.save_manifest(&manifest).unwrap();

        assert_eq!(dir.load_manifest().unwrap(), Some(manifest));
        assert!(!dir.is_new_database());
        assert!(!temp.path().join(MANIFEST_TEMP).exists());
    }
}
