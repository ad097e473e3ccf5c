//! In-memory storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// A backend that keeps its bytes in a shared `Vec<u8>`.
///
/// Clones share the same buffer. Tests use this to "restart" a store: drop
/// it, then open a new one over clones of the same backends.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-filled with `bytes`.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(bytes)),
        }
    }

    /// Returns a copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);
        if end > size {
            return Err(StorageError::OutOfBounds { offset, len, size });
        }
        // end <= size <= usize::MAX, so both casts are lossless
        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        Ok(())
    }

    fn len(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&self, new_len: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_len > size {
            return Err(StorageError::InvalidTruncate {
                requested: new_len,
                size,
            });
        }
        data.truncate(new_len as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn starts_empty() {
        let backend = InMemoryBackend::new();
        assert!(backend.is_empty().unwrap());
        assert!(backend.read_all().unwrap().is_empty());
    }

    #[test]
    fn clones_share_contents() {
        let backend = InMemoryBackend::new();
        let other = backend.clone();

        backend.append(b"Tolkien").unwrap();
        assert_eq!(other.read_all().unwrap(), b"Tolkien");
    }

    #[test]
    fn from_bytes_and_snapshot() {
        let backend = InMemoryBackend::from_bytes(b"1816".to_vec());
        assert_eq!(backend.append(b"-1855").unwrap(), 4);
        assert_eq!(backend.snapshot(), b"1816-1855");
    }

    #[test]
    fn out_of_bounds_read() {
        let backend = InMemoryBackend::from_bytes(vec![1, 2, 3]);
        assert!(matches!(
            backend.read_at(3, 1),
            Err(StorageError::OutOfBounds { offset: 3, .. })
        ));
        assert!(backend.read_at(3, 0).unwrap().is_empty());
    }

    #[test]
    fn truncate_to_zero() {
        let backend = InMemoryBackend::from_bytes(vec![9; 16]);
        backend.truncate(0).unwrap();
        assert!(backend.is_empty().unwrap());
    }

    proptest! {
        #[test]
        fn appends_read_back_at_their_offsets(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..16)) {
            let backend = InMemoryBackend::new();
            let offsets: Vec<u64> = chunks.iter().map(|c| backend.append(c).unwrap()).collect();
            for (chunk, offset) in chunks.iter().zip(offsets) {
                prop_assert_eq!(&backend.read_at(offset, chunk.len()).unwrap(), chunk);
            }
        }
    }
}
