//! Segment record framing.

use crate::checksum::crc32;
use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use crate::types::{EntityTypeId, SequenceNumber};

/// Flags stored with each segment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentRecordFlags(u8);

impl SegmentRecordFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// The entity was deleted at this sequence.
    pub const TOMBSTONE: Self = Self(0x01);

    /// Creates flags from the raw byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Self {
        Self(b)
    }

    /// Returns the raw byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Checks the tombstone bit.
    #[must_use]
    pub const fn is_tombstone(self) -> bool {
        self.0 & Self::TOMBSTONE.0 != 0
    }
}

/// One committed version of an entity.
///
/// Layout (little endian):
///
/// ```text
/// len u32 | type_id u32 | entity_id u64 | flags u8 | sequence u64 | payload | crc32
/// ```
///
/// `len` covers the whole record including itself and the checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRecord {
    /// Type of the entity.
    pub type_id: EntityTypeId,
    /// The entity.
    pub entity_id: EntityId,
    /// Record flags.
    pub flags: SegmentRecordFlags,
    /// Encoded [`crate::EntityRecord`], empty for tombstones.
    pub payload: Vec<u8>,
    /// Sequence of the commit that wrote this version.
    pub sequence: SequenceNumber,
}

impl SegmentRecord {
    /// Bytes before the payload.
    pub const HEADER_SIZE: usize = 4 + 4 + 8 + 1 + 8;
    /// Trailing checksum size.
    pub const CRC_SIZE: usize = 4;

    /// A live version.
    #[must_use]
    pub fn put(
        type_id: EntityTypeId,
        entity_id: EntityId,
        payload: Vec<u8>,
        sequence: SequenceNumber,
    ) -> Self {
        Self {
            type_id,
            entity_id,
            flags: SegmentRecordFlags::NONE,
            payload,
            sequence,
        }
    }

    /// A deletion marker.
    #[must_use]
    pub fn tombstone(type_id: EntityTypeId, entity_id: EntityId, sequence: SequenceNumber) -> Self {
        Self {
            type_id,
            entity_id,
            flags: SegmentRecordFlags::TOMBSTONE,
            payload: Vec::new(),
            sequence,
        }
    }

    /// Whether this version deletes the entity.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.flags.is_tombstone()
    }

    /// Encodes the record.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let total = Self::HEADER_SIZE + self.payload.len() + Self::CRC_SIZE;
        let len = u32::try_from(total)
            .map_err(|_| CoreError::invalid_operation("entity payload too large for a segment record"))?;

        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&self.type_id.as_u32().to_le_bytes());
        buf.extend_from_slice(&self.entity_id.as_u64().to_le_bytes());
        buf.push(self.flags.as_byte());
        buf.extend_from_slice(&self.sequence.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.payload);
        let crc = crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Reads the total length from the first four bytes of a record.
    pub fn peek_len(prefix: &[u8]) -> CoreResult<usize> {
        let bytes: [u8; 4] = prefix
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| CoreError::segment_corruption("truncated length prefix"))?;
        let len = u32::from_le_bytes(bytes) as usize;
        if len < Self::HEADER_SIZE + Self::CRC_SIZE {
            return Err(CoreError::segment_corruption(format!(
                "record length {len} is shorter than the header"
            )));
        }
        Ok(len)
    }

    /// Decodes one complete record.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let len = Self::peek_len(data)?;
        if data.len() != len {
            return Err(CoreError::segment_corruption(format!(
                "record length {len} does not match {} available bytes",
                data.len()
            )));
        }

        let (body, crc) = data.split_at(len - Self::CRC_SIZE);
        let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
        let actual = crc32(body);
        if stored != actual {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual,
            });
        }

        let u32_at = |at: usize| u32::from_le_bytes([body[at], body[at + 1], body[at + 2], body[at + 3]]);
        let u64_at = |at: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&body[at..at + 8]);
            u64::from_le_bytes(bytes)
        };

        Ok(Self {
            type_id: EntityTypeId::new(u32_at(4)),
            entity_id: EntityId::new(u64_at(8)),
            flags: SegmentRecordFlags::from_byte(body[16]),
            sequence: SequenceNumber::new(u64_at(17)),
            payload: body[Self::HEADER_SIZE..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_roundtrip() {
        let record = SegmentRecord::put(
            EntityTypeId::new(2),
            EntityId::new(41),
            vec![0xA1, 0x02],
            SequenceNumber::new(7),
        );
        let bytes = record.encode().unwrap();
        assert_eq!(bytes.len(), SegmentRecord::HEADER_SIZE + 2 + SegmentRecord::CRC_SIZE);
        assert_eq!(SegmentRecord::peek_len(&bytes).unwrap(), bytes.len());
        assert_eq!(SegmentRecord::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn tombstone_has_no_payload() {
        let record = SegmentRecord::tombstone(EntityTypeId::new(1), EntityId::new(3), SequenceNumber::new(9));
        let decoded = SegmentRecord::decode(&record.encode().unwrap()).unwrap();
        assert!(decoded.is_tombstone());
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let record = SegmentRecord::put(EntityTypeId::new(1), EntityId::new(1), b"x".to_vec(), SequenceNumber::new(1));
        let mut bytes = record.encode().unwrap();
        bytes[SegmentRecord::HEADER_SIZE] ^= 0xFF;
        assert!(matches!(
            SegmentRecord::decode(&bytes),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn short_length_prefix_is_corruption() {
        assert!(matches!(
            SegmentRecord::peek_len(&[3, 0, 0, 0]),
            Err(CoreError::SegmentCorruption { .. })
        ));
        assert!(SegmentRecord::peek_len(&[1, 0]).is_err());
    }
}
