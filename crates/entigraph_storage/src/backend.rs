//! The backend trait shared by every byte store.

use crate::error::StorageResult;

/// An append-only byte store with random-access reads.
///
/// Implementations synchronise internally, so every method takes `&self`
/// and a backend can be shared between the WAL writer and readers.
///
/// # Invariants
///
/// - `append` returns the offset the bytes were written at, which equals
///   `len()` observed immediately before the call
/// - `read_at` returns exactly the bytes previously appended at that offset
/// - after `sync` returns, all appended bytes survive process termination
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::OutOfBounds`] if the range extends past
    /// the end of the store.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    fn append(&self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    fn flush(&self) -> StorageResult<()>;

    /// Forces data and metadata to durable media.
    fn sync(&self) -> StorageResult<()>;

    /// Returns the number of bytes currently stored.
    fn len(&self) -> StorageResult<u64>;

    /// Discards every byte at or after `new_len`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::InvalidTruncate`] if `new_len` is larger
    /// than the current size.
    fn truncate(&self, new_len: u64) -> StorageResult<()>;

    /// Returns `true` when nothing has been appended.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Reads the whole store into memory.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let len = self.len()?;
        let len = usize::try_from(len).map_err(|_| crate::StorageError::OutOfBounds {
            offset: 0,
            len: usize::MAX,
            size: len,
        })?;
        self.read_at(0, len)
    }
}
