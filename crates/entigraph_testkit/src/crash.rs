//! Fault injection for commit and recovery tests.
//!
//! [`FaultyBackend`] wraps an [`InMemoryBackend`] and fails appends or
//! truncates on demand. Clones share the fault switches, so a test keeps one
//! handle and gives a clone to the store.
//!
//! ```rust
//! use entigraph_storage::{InMemoryBackend, StorageBackend};
//! use entigraph_testkit::crash::FaultyBackend;
//!
//! let backend = FaultyBackend::new(InMemoryBackend::new());
//! backend.fail_after(1);
//! assert!(backend.append(b"ok").is_ok());
//! assert!(backend.append(b"lost").is_err());
//! backend.heal();
//! assert!(backend.append(b"ok again").is_ok());
//! ```

use entigraph_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Faults {
    /// Appends that still succeed; `usize::MAX` never fails.
    appends_left: AtomicUsize,
    fail_truncate: AtomicBool,
}

/// A storage backend that fails writes when told to.
#[derive(Debug, Clone)]
pub struct FaultyBackend {
    inner: InMemoryBackend,
    faults: Arc<Faults>,
}

impl FaultyBackend {
    /// Wraps `inner` with every fault switched off.
    pub fn new(inner: InMemoryBackend) -> Self {
        Self {
            inner,
            faults: Arc::new(Faults {
                appends_left: AtomicUsize::new(usize::MAX),
                fail_truncate: AtomicBool::new(false),
            }),
        }
    }

    /// Lets `appends` more appends succeed, then fails every later one.
    pub fn fail_after(&self, appends: usize) {
        self.faults.appends_left.store(appends, Ordering::SeqCst);
    }

    /// Sets whether truncate fails.
    pub fn set_fail_truncate(&self, fail: bool) {
        self.faults.fail_truncate.store(fail, Ordering::SeqCst);
    }

    /// Switches every fault off.
    pub fn heal(&self) {
        self.faults.appends_left.store(usize::MAX, Ordering::SeqCst);
        self.faults.fail_truncate.store(false, Ordering::SeqCst);
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &InMemoryBackend {
        &self.inner
    }
}

fn simulated(what: &str) -> StorageError {
    StorageError::Io(io::Error::other(format!("simulated failure: {what}")))
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&self, data: &[u8]) -> StorageResult<u64> {
        let left = self.faults.appends_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(simulated("disk full"));
        }
        if left != usize::MAX {
            self.faults.appends_left.store(left - 1, Ordering::SeqCst);
        }
        self.inner.append(data)
    }

    fn flush(&self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn sync(&self) -> StorageResult<()> {
        self.inner.sync()
    }

    fn len(&self) -> StorageResult<u64> {
        self.inner.len()
    }

    fn truncate(&self, new_len: u64) -> StorageResult<()> {
        if self.faults.fail_truncate.load(Ordering::SeqCst) {
            return Err(simulated("truncate"));
        }
        self.inner.truncate(new_len)
    }
}
