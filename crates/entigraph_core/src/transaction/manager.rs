//! Transaction manager.

use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use crate::segment::{SegmentManager, SegmentRecord};
use crate::types::{EntityTypeId, SequenceNumber, TransactionId};
use crate::wal::{WalManager, WalRecord};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// One entity write produced by a commit.
#[derive(Debug, Clone)]
pub(crate) struct PendingWrite {
    pub type_id: EntityTypeId,
    pub entity_id: EntityId,
    /// Encoded record, or `None` for a delete.
    pub payload: Option<Vec<u8>>,
}

/// Counters restored by recovery.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecoveredState {
    pub next_txid: u64,
    pub committed_seq: SequenceNumber,
    pub next_entity_id: u64,
}

/// Coordinates the WAL, the segment store and the single writer.
///
/// Readers take a snapshot of `committed_seq` and never block. Writers
/// serialize on `write_lock`, which a write transaction holds from `begin`
/// until it commits or aborts.
pub struct TransactionManager {
    wal: WalManager,
    segments: SegmentManager,
    next_txid: AtomicU64,
    committed_seq: AtomicU64,
    /// Sequence numbers are burned by failed commits, never reused.
    next_sequence: AtomicU64,
    next_entity_id: AtomicU64,
    /// Set when a failed commit left bytes that could not be removed.
    needs_recovery: AtomicBool,
    write_lock: Mutex<()>,
    active_txns: RwLock<Vec<TransactionId>>,
    writer_wait_timeout: Option<Duration>,
}

impl TransactionManager {
    /// Creates a manager over empty storage.
    #[cfg(test)]
    pub fn new(wal: WalManager, segments: SegmentManager) -> Self {
        Self::with_state(
            wal,
            segments,
            RecoveredState {
                next_txid: 1,
                committed_seq: SequenceNumber::new(0),
                next_entity_id: 1,
            },
            None,
        )
    }

    pub(crate) fn with_state(
        wal: WalManager,
        segments: SegmentManager,
        state: RecoveredState,
        writer_wait_timeout: Option<Duration>,
    ) -> Self {
        Self {
            wal,
            segments,
            next_txid: AtomicU64::new(state.next_txid),
            committed_seq: AtomicU64::new(state.committed_seq.as_u64()),
            next_sequence: AtomicU64::new(state.committed_seq.next().as_u64()),
            next_entity_id: AtomicU64::new(state.next_entity_id.max(1)),
            needs_recovery: AtomicBool::new(false),
            write_lock: Mutex::new(()),
            active_txns: RwLock::new(Vec::new()),
            writer_wait_timeout,
        }
    }

    /// Registers a reader and returns its id and snapshot.
    pub fn begin_read(&self) -> (TransactionId, SequenceNumber) {
        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        self.active_txns.write().push(txid);
        (txid, self.committed_seq())
    }

    /// Acquires the writer lock, logs `Begin` and returns the lock guard.
    ///
    /// Blocks while another writer is active, or fails with `Conflict`
    /// once the configured wait timeout expires.
    pub fn begin_write(&self) -> CoreResult<(TransactionId, SequenceNumber, MutexGuard<'_, ()>)> {
        let guard = match self.writer_wait_timeout {
            Some(timeout) => self.write_lock.try_lock_for(timeout).ok_or_else(|| {
                CoreError::conflict(format!(
                    "another write transaction is active (waited {timeout:?})"
                ))
            })?,
            None => self.write_lock.lock(),
        };
        self.ensure_consistent()?;

        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        // taken under the lock so the writer starts from the latest commit
        let snapshot = self.committed_seq();
        self.wal.append(&WalRecord::Begin { txid })?;
        self.active_txns.write().push(txid);
        Ok((txid, snapshot, guard))
    }

    /// Hands out the next entity id. Ids are never reused within a run.
    pub fn allocate_entity_id(&self) -> EntityId {
        EntityId::new(self.next_entity_id.fetch_add(1, Ordering::SeqCst))
    }

    /// The id the next allocation would return.
    pub fn next_entity_id(&self) -> u64 {
        self.next_entity_id.load(Ordering::SeqCst)
    }

    /// Makes a validated change-set durable and visible.
    ///
    /// The caller must hold the writer lock. On failure the WAL and the
    /// segment file are cut back to their lengths before the call and the
    /// sequence number is not handed out again.
    pub(crate) fn publish(
        &self,
        txid: TransactionId,
        writes: &[PendingWrite],
    ) -> CoreResult<SequenceNumber> {
        self.ensure_consistent()?;
        let sequence = SequenceNumber::new(self.next_sequence.fetch_add(1, Ordering::SeqCst));
        let wal_len = self.wal.size()?;
        let segment_len = self.segments.size()?;

        if let Err(err) = self.write_commit(txid, sequence, writes) {
            self.undo_commit(wal_len, segment_len, sequence);
            return Err(err);
        }

        self.committed_seq.store(sequence.as_u64(), Ordering::SeqCst);
        debug!(%txid, %sequence, writes = writes.len(), "published commit");
        Ok(sequence)
    }

    fn write_commit(
        &self,
        txid: TransactionId,
        sequence: SequenceNumber,
        writes: &[PendingWrite],
    ) -> CoreResult<()> {
        for write in writes {
            let record = match &write.payload {
                Some(payload) => WalRecord::Put {
                    txid,
                    type_id: write.type_id,
                    entity_id: write.entity_id,
                    payload: payload.clone(),
                },
                None => WalRecord::Delete {
                    txid,
                    type_id: write.type_id,
                    entity_id: write.entity_id,
                },
            };
            self.wal.append(&record)?;
        }
        self.wal.append(&WalRecord::Commit { txid, sequence })?;
        self.wal.flush()?;

        for write in writes {
            let record = match &write.payload {
                Some(payload) => {
                    SegmentRecord::put(write.type_id, write.entity_id, payload.clone(), sequence)
                }
                None => SegmentRecord::tombstone(write.type_id, write.entity_id, sequence),
            };
            self.segments.append(&record)?;
        }
        self.segments.flush()
    }

    /// Removes every trace of a commit that failed part way.
    ///
    /// Segments go first so readers never see versions at `sequence`; the
    /// WAL goes last so a restart cannot replay the commit.
    fn undo_commit(&self, wal_len: u64, segment_len: u64, sequence: SequenceNumber) {
        let undone = self
            .segments
            .discard(segment_len, sequence)
            .and_then(|()| self.wal.truncate(wal_len));
        match undone {
            Ok(()) => debug!(%sequence, "undid failed commit"),
            Err(err) => {
                self.needs_recovery.store(true, Ordering::SeqCst);
                warn!(%sequence, error = %err, "failed to undo commit; writes disabled until reopen");
            }
        }
    }

    fn ensure_consistent(&self) -> CoreResult<()> {
        if self.needs_recovery.load(Ordering::SeqCst) {
            return Err(CoreError::NeedsRecovery {
                message: "a failed commit could not be rolled back".to_string(),
            });
        }
        Ok(())
    }

    /// Logs an abort for a write transaction.
    pub fn abort(&self, txid: TransactionId) -> CoreResult<()> {
        self.wal.append(&WalRecord::Abort { txid })?;
        Ok(())
    }

    /// Forgets a finished transaction.
    pub fn finish(&self, txid: TransactionId) {
        self.active_txns.write().retain(|&id| id != txid);
    }

    /// Returns the current committed sequence number.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        SequenceNumber::new(self.committed_seq.load(Ordering::SeqCst))
    }

    /// Returns the number of active transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active_txns.read().len()
    }

    /// Syncs segments, then empties the WAL.
    ///
    /// Waits for the writer lock, so calling it while holding a write
    /// transaction on the same thread deadlocks.
    pub fn checkpoint(&self) -> CoreResult<SequenceNumber> {
        let _writer = self.write_lock.lock();
        self.segments.sync()?;

        let sequence = self.committed_seq();
        self.wal.append(&WalRecord::Checkpoint { sequence })?;
        self.wal.flush()?;
        self.wal.clear()?;
        Ok(sequence)
    }

    /// Flushes both logs.
    pub fn flush(&self) -> CoreResult<()> {
        self.wal.flush()?;
        self.segments.sync()
    }

    pub(crate) fn segments(&self) -> &SegmentManager {
        &self.segments
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("committed_seq", &self.committed_seq())
            .field("active_count", &self.active_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entigraph_storage::InMemoryBackend;

    fn create_manager() -> TransactionManager {
        let wal = WalManager::new(Box::new(InMemoryBackend::new()), false);
        let segments = SegmentManager::new(Box::new(InMemoryBackend::new()));
        TransactionManager::new(wal, segments)
    }

    fn put(id: u64) -> PendingWrite {
        PendingWrite {
            type_id: EntityTypeId::new(1),
            entity_id: EntityId::new(id),
            payload: Some(vec![1, 2, 3]),
        }
    }

    #[test]
    fn readers_are_tracked() {
        let tm = create_manager();
        let (txid, snapshot) = tm.begin_read();
        assert_eq!(snapshot, SequenceNumber::new(0));
        assert_eq!(tm.active_count(), 1);
        tm.finish(txid);
        assert_eq!(tm.active_count(), 0);
    }

    #[test]
    fn publish_advances_sequence() {
        let tm = create_manager();
        let (txid, _, guard) = tm.begin_write().unwrap();
        let seq = tm.publish(txid, &[put(1)]).unwrap();
        drop(guard);
        tm.finish(txid);

        assert_eq!(seq, SequenceNumber::new(1));
        assert_eq!(tm.committed_seq(), seq);
        assert!(tm.segments().get_at(EntityId::new(1), seq).unwrap().is_some());
        assert!(tm
            .segments()
            .get_at(EntityId::new(1), SequenceNumber::new(0))
            .unwrap()
            .is_none());
    }

    #[test]
    fn writer_timeout_reports_conflict() {
        let wal = WalManager::new(Box::new(InMemoryBackend::new()), false);
        let segments = SegmentManager::new(Box::new(InMemoryBackend::new()));
        let tm = TransactionManager::with_state(
            wal,
            segments,
            RecoveredState {
                next_txid: 1,
                committed_seq: SequenceNumber::new(0),
                next_entity_id: 1,
            },
            Some(Duration::from_millis(10)),
        );
        let _first = tm.begin_write().unwrap();
        assert!(matches!(tm.begin_write(), Err(CoreError::Conflict { .. })));
    }

    #[test]
    fn entity_ids_are_monotonic() {
        let tm = create_manager();
        let a = tm.allocate_entity_id();
        let b = tm.allocate_entity_id();
        assert!(a < b);
        assert_eq!(tm.next_entity_id(), b.as_u64() + 1);
    }

    #[test]
    fn checkpoint_clears_wal() {
        let tm = create_manager();
        let (txid, _, guard) = tm.begin_write().unwrap();
        tm.publish(txid, &[put(1)]).unwrap();
        drop(guard);

        assert_eq!(tm.checkpoint().unwrap(), SequenceNumber::new(1));
        assert_eq!(tm.wal.size().unwrap(), 0);
    }
}
