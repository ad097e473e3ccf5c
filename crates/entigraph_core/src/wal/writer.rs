//! WAL appends and recovery scans.

use crate::checksum::crc32;
use crate::error::{CoreError, CoreResult};
use crate::wal::record::{WalRecord, WalRecordType, WAL_MAGIC, WAL_VERSION};
use entigraph_storage::StorageBackend;
use parking_lot::Mutex;

/// magic (4) + version (2) + type (1) + length (4)
const HEADER_SIZE: usize = 11;
const CRC_SIZE: usize = 4;

/// The outcome of reading the whole log.
#[derive(Debug, Default)]
pub struct WalScan {
    /// Decoded records with their offsets.
    pub records: Vec<(u64, WalRecord)>,
    /// Length of the prefix made of complete records.
    pub valid_len: u64,
    /// Whether an incomplete record followed the valid prefix.
    pub torn_tail: bool,
}

/// Appends framed records to the log backend.
pub struct WalManager {
    backend: Box<dyn StorageBackend>,
    /// Serialises appends so a record's bytes are never interleaved.
    append_lock: Mutex<()>,
    sync_on_write: bool,
}

impl WalManager {
    /// Creates a WAL over `backend`.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend,
            append_lock: Mutex::new(()),
            sync_on_write,
        }
    }

    /// Frames and appends `record`, returning its offset.
    pub fn append(&self, record: &WalRecord) -> CoreResult<u64> {
        let payload = record.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("WAL record payload too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&WAL_MAGIC);
        data.extend_from_slice(&WAL_VERSION.to_le_bytes());
        data.push(record.record_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);
        let crc = crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());

        let _guard = self.append_lock.lock();
        let offset = self.backend.append(&data)?;
        if self.sync_on_write {
            self.backend.flush()?;
        }
        Ok(offset)
    }

    /// Flushes appended records.
    pub fn flush(&self) -> CoreResult<()> {
        self.backend.flush()?;
        Ok(())
    }

    /// Current log size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.len()?)
    }

    /// Reads every complete record.
    ///
    /// A record cut short at the end of the log is reported through
    /// [`WalScan::torn_tail`] rather than as an error: it can only be the
    /// last append of a crashed process, which never reached its commit.
    ///
    /// # Errors
    ///
    /// Bad magic, unknown versions or types, and checksum mismatches in a
    /// complete record are corruption.
    pub fn read_all(&self) -> CoreResult<WalScan> {
        let data = self.backend.read_all()?;
        let mut scan = WalScan::default();
        let mut at = 0usize;

        while at < data.len() {
            let rest = &data[at..];
            if rest.len() < HEADER_SIZE {
                scan.torn_tail = true;
                break;
            }
            if rest[..4] != WAL_MAGIC {
                return Err(CoreError::wal_corruption(format!("bad magic at offset {at}")));
            }
            let version = u16::from_le_bytes([rest[4], rest[5]]);
            if version > WAL_VERSION {
                return Err(CoreError::wal_corruption(format!(
                    "unsupported WAL version {version} at offset {at}"
                )));
            }
            let kind = WalRecordType::from_byte(rest[6]).ok_or_else(|| {
                CoreError::wal_corruption(format!("unknown record type {} at offset {at}", rest[6]))
            })?;
            let len = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]) as usize;
            let total = HEADER_SIZE + len + CRC_SIZE;
            if rest.len() < total {
                scan.torn_tail = true;
                break;
            }

            let body = &rest[..HEADER_SIZE + len];
            let crc = &rest[HEADER_SIZE + len..total];
            let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
            let actual = crc32(body);
            if stored != actual {
                return Err(CoreError::ChecksumMismatch {
                    expected: stored,
                    actual,
                });
            }

            let record = WalRecord::decode_payload(kind, &body[HEADER_SIZE..])?;
            scan.records.push((at as u64, record));
            at += total;
        }

        scan.valid_len = at as u64;
        Ok(scan)
    }

    /// Drops everything after `len` bytes.
    pub fn truncate(&self, len: u64) -> CoreResult<()> {
        let _guard = self.append_lock.lock();
        self.backend.truncate(len)?;
        Ok(())
    }

    /// Empties the log once its contents are covered by a checkpoint.
    pub fn clear(&self) -> CoreResult<()> {
        self.truncate(0)
    }
}

impl std::fmt::Debug for WalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalManager")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}
