//! Transaction state and the staged change-set.

use crate::entity::{EntityId, EntityRecord};
use crate::error::{CoreError, CoreResult};
use crate::segment::SegmentManager;
use crate::types::{EntityTypeId, SequenceNumber};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Access mode requested at `begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Reads only; any number may run concurrently.
    ReadOnly,
    /// Reads and writes; at most one at a time per store.
    ReadWrite,
}

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Operations are allowed.
    Active,
    /// The change-set was published.
    Committed,
    /// The change-set was discarded.
    Aborted,
}

/// Committed state as of one sequence number.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Snapshot<'s> {
    pub segments: &'s SegmentManager,
    pub seq: SequenceNumber,
}

impl Snapshot<'_> {
    pub fn load(&self, id: EntityId) -> CoreResult<Option<EntityRecord>> {
        self.segments
            .get_at(id, self.seq)?
            .map(|(_, payload)| EntityRecord::decode(&payload))
            .transpose()
    }

    pub fn ids(&self, type_id: EntityTypeId) -> Vec<EntityId> {
        self.segments.ids_at(type_id, self.seq)
    }
}

/// A staged entity state.
#[derive(Debug, Clone)]
pub(crate) enum Staged {
    Live(EntityRecord),
    Deleted(EntityTypeId),
}

/// A reference a delete left in place because no policy allowed dropping it.
/// It fails the commit unless the caller removes it first.
#[derive(Debug, Clone)]
pub(crate) struct HeldReference {
    pub referrer: EntityId,
    pub link: String,
    pub target: EntityId,
}

/// Everything a write transaction has changed, layered over its snapshot.
#[derive(Debug, Default)]
pub(crate) struct ChangeSet {
    /// Ordered by id so WAL and segment output is deterministic.
    pub staged: BTreeMap<EntityId, Staged>,
    /// Properties written per entity since `begin`.
    pub changed: HashMap<EntityId, BTreeSet<String>>,
    /// Entities created by this transaction.
    pub created: BTreeSet<EntityId>,
    pub held: Vec<HeldReference>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// The entity as this transaction sees it.
    pub fn load<'a>(
        &'a self,
        snapshot: &Snapshot<'_>,
        id: EntityId,
    ) -> CoreResult<Option<Cow<'a, EntityRecord>>> {
        match self.staged.get(&id) {
            Some(Staged::Live(record)) => Ok(Some(Cow::Borrowed(record))),
            Some(Staged::Deleted(_)) => Ok(None),
            None => Ok(snapshot.load(id)?.map(Cow::Owned)),
        }
    }

    /// Like [`ChangeSet::load`], failing with `EntityNotFound`.
    pub fn require<'a>(
        &'a self,
        snapshot: &Snapshot<'_>,
        id: EntityId,
    ) -> CoreResult<Cow<'a, EntityRecord>> {
        self.load(snapshot, id)?
            .ok_or_else(|| CoreError::not_found(id))
    }

    pub fn is_live(&self, snapshot: &Snapshot<'_>, id: EntityId) -> CoreResult<bool> {
        Ok(self.load(snapshot, id)?.is_some())
    }

    /// Stages the entity (copying it from the snapshot on first touch) and
    /// returns it for mutation.
    pub fn record_mut(
        &mut self,
        snapshot: &Snapshot<'_>,
        id: EntityId,
    ) -> CoreResult<&mut EntityRecord> {
        if !self.staged.contains_key(&id) {
            let record = snapshot.load(id)?.ok_or_else(|| CoreError::not_found(id))?;
            self.staged.insert(id, Staged::Live(record));
        }
        match self.staged.get_mut(&id) {
            Some(Staged::Live(record)) => Ok(record),
            _ => Err(CoreError::not_found(id)),
        }
    }

    /// Type of an entity deleted by this transaction.
    pub fn deleted_type(&self, id: EntityId) -> Option<EntityTypeId> {
        match self.staged.get(&id) {
            Some(Staged::Deleted(type_id)) => Some(*type_id),
            _ => None,
        }
    }

    /// Live ids of a type in this transaction's view, ascending.
    pub fn ids_of_type(&self, snapshot: &Snapshot<'_>, type_id: EntityTypeId) -> Vec<EntityId> {
        let mut ids: BTreeSet<EntityId> = snapshot
            .ids(type_id)
            .into_iter()
            .filter(|id| !matches!(self.staged.get(id), Some(Staged::Deleted(_))))
            .collect();
        ids.extend(self.staged.iter().filter_map(|(&id, staged)| match staged {
            Staged::Live(record) if record.type_id == type_id => Some(id),
            _ => None,
        }));
        ids.into_iter().collect()
    }

    pub fn mark_changed(&mut self, id: EntityId, property: &str) {
        self.changed
            .entry(id)
            .or_default()
            .insert(property.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentRecord;
    use entigraph_storage::InMemoryBackend;

    const BOOK: EntityTypeId = EntityTypeId::new(2);

    fn committed_book(segments: &SegmentManager, id: u64, title: &str) {
        let mut record = EntityRecord::new(BOOK);
        record.properties.insert("title".into(), title.into());
        segments
            .append(&SegmentRecord::put(
                BOOK,
                EntityId::new(id),
                record.encode().unwrap(),
                SequenceNumber::new(1),
            ))
            .unwrap();
    }

    #[test]
    fn staged_writes_shadow_snapshot() {
        let segments = SegmentManager::new(Box::new(InMemoryBackend::new()));
        committed_book(&segments, 1, "Jane Eyre");
        committed_book(&segments, 2, "The Hobbit");
        let snapshot = Snapshot { segments: &segments, seq: SequenceNumber::new(1) };

        let mut changes = ChangeSet::default();
        changes
            .record_mut(&snapshot, EntityId::new(1))
            .unwrap()
            .properties
            .insert("year".into(), 1847.into());
        changes.staged.insert(EntityId::new(2), Staged::Deleted(BOOK));
        changes.staged.insert(EntityId::new(3), Staged::Live(EntityRecord::new(BOOK)));

        let first = changes.require(&snapshot, EntityId::new(1)).unwrap();
        assert!(first.properties.contains_key("year"));
        assert!(!changes.is_live(&snapshot, EntityId::new(2)).unwrap());
        assert_eq!(changes.deleted_type(EntityId::new(2)), Some(BOOK));
        assert_eq!(
            changes.ids_of_type(&snapshot, BOOK),
            vec![EntityId::new(1), EntityId::new(3)]
        );
        // the snapshot itself is untouched
        assert!(!snapshot.load(EntityId::new(1)).unwrap().unwrap().properties.contains_key("year"));
    }

    #[test]
    fn record_mut_on_missing_entity() {
        let segments = SegmentManager::new(Box::new(InMemoryBackend::new()));
        let snapshot = Snapshot { segments: &segments, seq: SequenceNumber::new(0) };
        let mut changes = ChangeSet::default();
        assert!(matches!(
            changes.record_mut(&snapshot, EntityId::new(9)),
            Err(CoreError::EntityNotFound { .. })
        ));
        assert!(changes.is_empty());
    }
}
