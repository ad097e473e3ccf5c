//! WAL record types and payload encoding.

use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use crate::types::{EntityTypeId, SequenceNumber, TransactionId};

/// Magic bytes opening every WAL record.
pub const WAL_MAGIC: [u8; 4] = *b"EGWL";

/// Current WAL format version.
pub const WAL_VERSION: u16 = 1;

/// Discriminant byte of a WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    /// A write transaction started.
    Begin = 1,
    /// An entity version was written.
    Put = 2,
    /// An entity was deleted.
    Delete = 3,
    /// The transaction committed.
    Commit = 4,
    /// The transaction rolled back.
    Abort = 5,
    /// Everything up to the sequence is in the segment file.
    Checkpoint = 6,
}

impl WalRecordType {
    /// Parses the discriminant byte.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            1 => Self::Begin,
            2 => Self::Put,
            3 => Self::Delete,
            4 => Self::Commit,
            5 => Self::Abort,
            6 => Self::Checkpoint,
            _ => return None,
        })
    }

    /// The discriminant byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A logged operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// A write transaction started.
    Begin {
        /// Transaction ID.
        txid: TransactionId,
    },
    /// An entity version was written.
    Put {
        /// Transaction ID.
        txid: TransactionId,
        /// Type of the entity.
        type_id: EntityTypeId,
        /// The entity.
        entity_id: EntityId,
        /// Encoded entity record.
        payload: Vec<u8>,
    },
    /// An entity was deleted.
    Delete {
        /// Transaction ID.
        txid: TransactionId,
        /// Type of the entity.
        type_id: EntityTypeId,
        /// The entity.
        entity_id: EntityId,
    },
    /// The transaction committed with this sequence.
    Commit {
        /// Transaction ID.
        txid: TransactionId,
        /// Commit sequence.
        sequence: SequenceNumber,
    },
    /// The transaction rolled back.
    Abort {
        /// Transaction ID.
        txid: TransactionId,
    },
    /// Segment data is durable up to `sequence`.
    Checkpoint {
        /// Last sequence covered.
        sequence: SequenceNumber,
    },
}

/// Forward-only reader over a payload.
struct Cursor<'a> {
    data: &'a [u8],
    at: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, at: 0 }
    }

    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .at
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| CoreError::wal_corruption("unexpected end of payload"))?;
        let bytes = &self.data[self.at..end];
        self.at = end;
        Ok(bytes)
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn finish(self, kind: WalRecordType) -> CoreResult<()> {
        if self.at == self.data.len() {
            Ok(())
        } else {
            Err(CoreError::wal_corruption(format!(
                "{} trailing bytes in {kind:?} record",
                self.data.len() - self.at
            )))
        }
    }
}

impl WalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            Self::Begin { .. } => WalRecordType::Begin,
            Self::Put { .. } => WalRecordType::Put,
            Self::Delete { .. } => WalRecordType::Delete,
            Self::Commit { .. } => WalRecordType::Commit,
            Self::Abort { .. } => WalRecordType::Abort,
            Self::Checkpoint { .. } => WalRecordType::Checkpoint,
        }
    }

    /// Returns the owning transaction, if any.
    #[must_use]
    pub fn txid(&self) -> Option<TransactionId> {
        match self {
            Self::Begin { txid }
            | Self::Put { txid, .. }
            | Self::Delete { txid, .. }
            | Self::Commit { txid, .. }
            | Self::Abort { txid } => Some(*txid),
            Self::Checkpoint { .. } => None,
        }
    }

    /// Encodes the payload (without envelope).
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Begin { txid } | Self::Abort { txid } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
            }
            Self::Put {
                txid,
                type_id,
                entity_id,
                payload,
            } => {
                let len = u32::try_from(payload.len())
                    .map_err(|_| CoreError::invalid_operation("entity payload exceeds 4 GiB"))?;
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&type_id.as_u32().to_le_bytes());
                buf.extend_from_slice(&entity_id.as_u64().to_le_bytes());
                buf.extend_from_slice(&len.to_le_bytes());
                buf.extend_from_slice(payload);
            }
            Self::Delete {
                txid,
                type_id,
                entity_id,
            } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&type_id.as_u32().to_le_bytes());
                buf.extend_from_slice(&entity_id.as_u64().to_le_bytes());
            }
            Self::Commit { txid, sequence } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
            }
            Self::Checkpoint { sequence } => {
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
            }
        }
        Ok(buf)
    }

    /// Decodes a payload of the given type.
    pub fn decode_payload(kind: WalRecordType, payload: &[u8]) -> CoreResult<Self> {
        let mut cur = Cursor::new(payload);
        let record = match kind {
            WalRecordType::Begin => Self::Begin {
                txid: TransactionId::new(cur.u64()?),
            },
            WalRecordType::Abort => Self::Abort {
                txid: TransactionId::new(cur.u64()?),
            },
            WalRecordType::Put => {
                let txid = TransactionId::new(cur.u64()?);
                let type_id = EntityTypeId::new(cur.u32()?);
                let entity_id = EntityId::new(cur.u64()?);
                let len = cur.u32()? as usize;
                let payload = cur.take(len)?.to_vec();
                Self::Put {
                    txid,
                    type_id,
                    entity_id,
                    payload,
                }
            }
            WalRecordType::Delete => Self::Delete {
                txid: TransactionId::new(cur.u64()?),
                type_id: EntityTypeId::new(cur.u32()?),
                entity_id: EntityId::new(cur.u64()?),
            },
            WalRecordType::Commit => Self::Commit {
                txid: TransactionId::new(cur.u64()?),
                sequence: SequenceNumber::new(cur.u64()?),
            },
            WalRecordType::Checkpoint => Self::Checkpoint {
                sequence: SequenceNumber::new(cur.u64()?),
            },
        };
        cur.finish(kind)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(record: WalRecord) {
        let payload = record.encode_payload().unwrap();
        let decoded = WalRecord::decode_payload(record.record_type(), &payload).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn record_type_bytes() {
        for byte in 1..=6u8 {
            assert_eq!(WalRecordType::from_byte(byte).unwrap().as_byte(), byte);
        }
        assert_eq!(WalRecordType::from_byte(0), None);
        assert_eq!(WalRecordType::from_byte(7), None);
    }

    #[test]
    fn put_and_commit_roundtrip() {
        let txid = TransactionId::new(3);
        roundtrip(WalRecord::Put {
            txid,
            type_id: EntityTypeId::new(2),
            entity_id: EntityId::new(11),
            payload: vec![0xA2, 0x01],
        });
        roundtrip(WalRecord::Delete {
            txid,
            type_id: EntityTypeId::new(2),
            entity_id: EntityId::new(11),
        });
        roundtrip(WalRecord::Commit {
            txid,
            sequence: SequenceNumber::new(8),
        });
    }

    #[test]
    fn txid_is_absent_only_for_checkpoints() {
        let checkpoint = WalRecord::Checkpoint {
            sequence: SequenceNumber::new(1),
        };
        assert_eq!(checkpoint.txid(), None);
        assert_eq!(
            WalRecord::Abort { txid: TransactionId::new(5) }.txid(),
            Some(TransactionId::new(5))
        );
    }

    #[test]
    fn trailing_bytes_are_corruption() {
        let mut payload = WalRecord::Begin { txid: TransactionId::new(1) }
            .encode_payload()
            .unwrap();
        payload.push(0);
        assert!(matches!(
            WalRecord::decode_payload(WalRecordType::Begin, &payload),
            Err(CoreError::WalCorruption { .. })
        ));
    }

    #[test]
    fn short_put_is_corruption() {
        let payload = WalRecord::Put {
            txid: TransactionId::new(1),
            type_id: EntityTypeId::new(1),
            entity_id: EntityId::new(1),
            payload: vec![1, 2, 3],
        }
        .encode_payload()
        .unwrap();
        assert!(WalRecord::decode_payload(WalRecordType::Put, &payload[..payload.len() - 1]).is_err());
    }
}
