//! File-backed storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

struct FileState {
    file: File,
    len: u64,
}

/// A backend stored in one OS file.
///
/// `flush` hands buffered bytes to the OS; `sync` calls `File::sync_all`.
/// A single mutex serialises seeks so reads and appends never interleave.
///
/// ```no_run
/// use entigraph_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("segments.dat")).unwrap();
/// backend.append(b"record").unwrap();
/// backend.sync().unwrap();
/// ```
pub struct FileBackend {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl FileBackend {
    /// Opens `path`, creating an empty file if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its size read.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(FileState { file, len }),
        })
    }

    /// Like [`FileBackend::open`], creating missing parent directories first.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut state = self.state.lock();
        let end = offset.saturating_add(len as u64);
        if end > state.len {
            return Err(StorageError::OutOfBounds {
                offset,
                len,
                size: state.len,
            });
        }

        let mut buffer = vec![0u8; len];
        if len > 0 {
            state.file.seek(SeekFrom::Start(offset))?;
            state.file.read_exact(&mut buffer)?;
        }
        Ok(buffer)
    }

    fn append(&self, data: &[u8]) -> StorageResult<u64> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let offset = state.len;
        if data.is_empty() {
            return Ok(offset);
        }

        // write at the tracked length so returned offsets always match
        let written = state
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| state.file.write_all(data));
        if let Err(err) = written {
            // drop a partial write; if that fails too, trust the file size
            if state.file.set_len(offset).is_err() {
                if let Ok(meta) = state.file.metadata() {
                    state.len = meta.len();
                }
            }
            return Err(err.into());
        }
        state.len += data.len() as u64;
        Ok(offset)
    }

    fn flush(&self) -> StorageResult<()> {
        self.state.lock().file.flush()?;
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        self.state.lock().file.sync_all()?;
        Ok(())
    }

    fn len(&self) -> StorageResult<u64> {
        Ok(self.state.lock().len)
    }

    fn truncate(&self, new_len: u64) -> StorageResult<()> {
        let mut state = self.state.lock();
        if new_len > state.len {
            return Err(StorageError::InvalidTruncate {
                requested: new_len,
                size: state.len,
            });
        }
        state.file.set_len(new_len)?;
        state.file.sync_all()?;
        state.len = new_len;
        Ok(())
    }
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path)
            .field("len", &self.state.lock().len)
            .finish()
    }
}
