//! Versioned segment index.

use crate::entity::EntityId;
use crate::error::CoreResult;
use crate::segment::record::SegmentRecord;
use crate::types::{EntityTypeId, SequenceNumber};
use entigraph_storage::StorageBackend;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

#[derive(Debug, Clone, Copy)]
struct Version {
    sequence: SequenceNumber,
    offset: u64,
    tombstone: bool,
}

#[derive(Debug, Default)]
struct SegmentIndex {
    /// Versions per entity, ascending by sequence.
    versions: HashMap<EntityId, Vec<Version>>,
    /// Every entity ever written, per type, in id order.
    by_type: HashMap<EntityTypeId, BTreeSet<EntityId>>,
    max_sequence: SequenceNumber,
    max_entity_id: Option<EntityId>,
}

impl SegmentIndex {
    fn insert(&mut self, record: &SegmentRecord, offset: u64) {
        let versions = self.versions.entry(record.entity_id).or_default();
        let version = Version {
            sequence: record.sequence,
            offset,
            tombstone: record.is_tombstone(),
        };
        // replayed WAL records can arrive out of order after a crash
        let at = versions.partition_point(|v| v.sequence <= record.sequence);
        versions.insert(at, version);

        self.by_type
            .entry(record.type_id)
            .or_default()
            .insert(record.entity_id);
        self.max_sequence = self.max_sequence.max(record.sequence);
        self.max_entity_id = self.max_entity_id.max(Some(record.entity_id));
    }

    /// Forgets every version written at `sequence`.
    fn remove_sequence(&mut self, sequence: SequenceNumber) {
        let Self {
            versions,
            by_type,
            max_sequence,
            max_entity_id,
        } = self;
        versions.retain(|_, list| {
            list.retain(|v| v.sequence != sequence);
            !list.is_empty()
        });
        for ids in by_type.values_mut() {
            ids.retain(|id| versions.contains_key(id));
        }
        by_type.retain(|_, ids| !ids.is_empty());
        *max_sequence = versions
            .values()
            .flatten()
            .map(|v| v.sequence)
            .max()
            .unwrap_or_default();
        *max_entity_id = versions.keys().copied().max();
    }

    fn visible(&self, entity_id: EntityId, snapshot: SequenceNumber) -> Option<Version> {
        self.versions
            .get(&entity_id)?
            .iter()
            .rev()
            .find(|v| v.sequence <= snapshot)
            .copied()
    }
}

/// Appends entity versions to the segment file and resolves reads at a
/// snapshot.
pub struct SegmentManager {
    backend: Box<dyn StorageBackend>,
    index: RwLock<SegmentIndex>,
}

impl SegmentManager {
    /// Creates a manager over `backend` with an empty index.
    ///
    /// Call [`SegmentManager::rebuild_index`] before reading existing data.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend,
            index: RwLock::new(SegmentIndex::default()),
        }
    }

    /// Appends a record and indexes it. Returns its offset.
    pub fn append(&self, record: &SegmentRecord) -> CoreResult<u64> {
        let encoded = record.encode()?;
        let mut index = self.index.write();
        let offset = self.backend.append(&encoded)?;
        index.insert(record, offset);
        Ok(offset)
    }

    /// Undoes a partly written commit: drops the versions at `sequence`
    /// from the index, then cuts the file back to `len` bytes.
    pub fn discard(&self, len: u64, sequence: SequenceNumber) -> CoreResult<()> {
        let mut index = self.index.write();
        index.remove_sequence(sequence);
        if self.backend.len()? > len {
            self.backend.truncate(len)?;
        }
        Ok(())
    }

    /// Returns the type and payload of `entity_id` as of `snapshot`, or
    /// `None` if it did not exist or was deleted at that point.
    pub fn get_at(
        &self,
        entity_id: EntityId,
        snapshot: SequenceNumber,
    ) -> CoreResult<Option<(EntityTypeId, Vec<u8>)>> {
        let version = self.index.read().visible(entity_id, snapshot);
        match version {
            Some(v) if !v.tombstone => {
                let record = self.read_at(v.offset)?;
                Ok(Some((record.type_id, record.payload)))
            }
            _ => Ok(None),
        }
    }

    /// Ids of entities of `type_id` that are live at `snapshot`, ascending.
    pub fn ids_at(&self, type_id: EntityTypeId, snapshot: SequenceNumber) -> Vec<EntityId> {
        let index = self.index.read();
        let Some(ids) = index.by_type.get(&type_id) else {
            return Vec::new();
        };
        ids.iter()
            .copied()
            .filter(|&id| index.visible(id, snapshot).is_some_and(|v| !v.tombstone))
            .collect()
    }

    /// Number of entities live at `snapshot`.
    pub fn live_count_at(&self, snapshot: SequenceNumber) -> usize {
        let index = self.index.read();
        index
            .versions
            .keys()
            .filter(|&&id| index.visible(id, snapshot).is_some_and(|v| !v.tombstone))
            .count()
    }

    /// Reads and verifies the record at `offset`.
    pub fn read_at(&self, offset: u64) -> CoreResult<SegmentRecord> {
        let prefix = self.backend.read_at(offset, 4)?;
        let len = SegmentRecord::peek_len(&prefix)?;
        let data = self.backend.read_at(offset, len)?;
        SegmentRecord::decode(&data)
    }

    /// Rebuilds the index by scanning the whole segment file.
    ///
    /// A record cut short by a crash ends the scan and is truncated away;
    /// a complete record with a bad checksum is an error.
    pub fn rebuild_index(&self) -> CoreResult<()> {
        let data = self.backend.read_all()?;
        let mut index = SegmentIndex::default();
        let mut offset = 0usize;

        while offset < data.len() {
            let rest = &data[offset..];
            let len = if rest.len() < 4 { None } else { Some(SegmentRecord::peek_len(rest)?) };
            let Some(len) = len.filter(|&len| len <= rest.len()) else {
                warn!(offset, "discarding torn segment tail");
                self.backend.truncate(offset as u64)?;
                break;
            };
            let record = SegmentRecord::decode(&rest[..len])?;
            index.insert(&record, offset as u64);
            offset += len;
        }

        *self.index.write() = index;
        Ok(())
    }

    /// Highest sequence number present in the segment.
    pub fn max_sequence(&self) -> SequenceNumber {
        self.index.read().max_sequence
    }

    /// Highest entity id ever written.
    pub fn max_entity_id(&self) -> Option<EntityId> {
        self.index.read().max_entity_id
    }

    /// Flushes pending writes.
    pub fn flush(&self) -> CoreResult<()> {
        self.backend.flush()?;
        Ok(())
    }

    /// Forces segment data to durable media.
    pub fn sync(&self) -> CoreResult<()> {
        self.backend.sync()?;
        Ok(())
    }

    /// Current size of the segment file.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.len()?)
    }
}

impl std::fmt::Debug for SegmentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.index.read();
        f.debug_struct("SegmentManager")
            .field("entities", &index.versions.len())
            .field("max_sequence", &index.max_sequence)
            .finish_non_exhaustive()
    }
}
