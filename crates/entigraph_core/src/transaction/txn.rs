//! The caller-facing transaction.

use super::manager::PendingWrite;
use super::state::{ChangeSet, Snapshot, Staged, TransactionState, TxMode};
use crate::constraint::Validator;
use crate::entity::{EntityId, EntityRecord, Value};
use crate::error::{CoreError, CoreResult};
use crate::handle::{EntityMut, EntityView};
use crate::link::LinkManager;
use crate::query::Query;
use crate::schema::{EnumMember, SchemaRegistry, TypeInfo};
use crate::store::Store;
use crate::types::{SequenceNumber, TransactionId};
use parking_lot::MutexGuard;
use tracing::{debug, warn};

/// A unit of work against one snapshot of a [`Store`].
///
/// Read-only transactions see the snapshot current at `begin` for their
/// whole lifetime. A read-write transaction additionally sees its own staged
/// writes, holds the store's writer slot until it finishes, and publishes
/// everything atomically at [`Transaction::commit`]. Dropping an active
/// transaction rolls it back.
pub struct Transaction<'s> {
    store: &'s Store,
    id: TransactionId,
    mode: TxMode,
    state: TransactionState,
    snapshot: Snapshot<'s>,
    changes: ChangeSet,
    /// Set for the transaction that seeds enum members during `open`.
    system: bool,
    writer: Option<MutexGuard<'s, ()>>,
}

impl<'s> Transaction<'s> {
    pub(crate) fn begin(store: &'s Store, mode: TxMode, system: bool) -> CoreResult<Self> {
        let txns = store.txns();
        let (id, seq, writer) = match mode {
            TxMode::ReadOnly => {
                let (id, seq) = txns.begin_read();
                (id, seq, None)
            }
            TxMode::ReadWrite => {
                let (id, seq, guard) = txns.begin_write()?;
                (id, seq, Some(guard))
            }
        };
        debug!(txid = %id, ?mode, snapshot = %seq, "transaction started");
        Ok(Self {
            store,
            id,
            mode,
            state: TransactionState::Active,
            snapshot: Snapshot {
                segments: txns.segments(),
                seq,
            },
            changes: ChangeSet::default(),
            system,
            writer,
        })
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the access mode.
    #[must_use]
    pub fn mode(&self) -> TxMode {
        self.mode
    }

    /// Returns the sequence number of the snapshot this transaction reads.
    #[must_use]
    pub fn snapshot_seq(&self) -> SequenceNumber {
        self.snapshot.seq
    }

    /// Returns `true` until commit or rollback.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// The schema of the owning store.
    #[must_use]
    pub fn schema(&self) -> &'s SchemaRegistry {
        self.store.schema()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Reads an entity of `type_name`, or `None` if no live entity of that
    /// type has this id in the transaction's view.
    pub fn read(&self, type_name: &str, id: EntityId) -> CoreResult<Option<EntityView<'s>>> {
        self.ensure_active()?;
        let info = self.schema().info(type_name)?;
        match self.changes.load(&self.snapshot, id)? {
            Some(record) if record.type_id == info.id => {
                Ok(Some(EntityView::new(id, &info.def, record.into_owned())))
            }
            _ => Ok(None),
        }
    }

    /// Reads an entity of any type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EntityNotFound`] if the id is not live.
    pub fn entity(&self, id: EntityId) -> CoreResult<EntityView<'s>> {
        self.ensure_active()?;
        let record = self.changes.require(&self.snapshot, id)?.into_owned();
        let info = self.schema().info_by_id(record.type_id)?;
        Ok(EntityView::new(id, &info.def, record))
    }

    /// Returns `true` if `id` is live in this transaction's view.
    pub fn exists(&self, id: EntityId) -> CoreResult<bool> {
        self.ensure_active()?;
        self.changes.is_live(&self.snapshot, id)
    }

    /// Targets of `id.link`, ascending.
    pub fn links(&self, id: EntityId, link: &str) -> CoreResult<Vec<EntityId>> {
        let view = self.entity(id)?;
        if view.entity_type().link_def(link).is_none() {
            return Err(CoreError::unknown_field(view.type_name(), link));
        }
        Ok(view.links(link).collect())
    }

    /// Ids of every live entity of `type_name`, in creation order.
    pub fn scan(&self, type_name: &str) -> CoreResult<impl Iterator<Item = EntityId>> {
        self.ensure_active()?;
        let info = self.schema().info(type_name)?;
        Ok(self.changes.ids_of_type(&self.snapshot, info.id).into_iter())
    }

    /// Starts a query over every live entity of `type_name`.
    pub fn query(&self, type_name: &str) -> CoreResult<Query<'_, 's>> {
        Query::all(self, type_name)
    }

    /// Starts a query over the targets of `id.link`.
    pub fn follow(&self, id: EntityId, link: &str) -> CoreResult<Query<'_, 's>> {
        let targets = self.links(id, link)?;
        Query::from_ids(self, targets)
    }

    /// Looks up an enum member by key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownEnumMember`] if the type declares no such
    /// member, or [`CoreError::InvalidOperation`] if it is not an enum.
    pub fn enum_member(&self, type_name: &str, key: &str) -> CoreResult<EntityId> {
        self.ensure_active()?;
        let info = self.schema().info(type_name)?;
        if !info.def.is_enum() {
            return Err(CoreError::invalid_operation(format!(
                "{type_name} is not an enum type"
            )));
        }
        self.store
            .enum_member_id(info.id, key)
            .ok_or_else(|| CoreError::UnknownEnumMember {
                entity_type: type_name.to_string(),
                key: key.to_string(),
            })
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Creates an entity with the given initial property values.
    ///
    /// Rules and required properties are checked at commit.
    pub fn create<'v>(
        &mut self,
        type_name: &str,
        values: impl IntoIterator<Item = (&'v str, Value)>,
    ) -> CoreResult<EntityId> {
        self.ensure_writable()?;
        let info = self.schema().info(type_name)?;
        if info.def.is_enum() {
            return Err(CoreError::invalid_operation(format!(
                "{type_name} members are fixed by the schema"
            )));
        }
        let id = self.stage_new(EntityRecord::new(info.id));
        for (property, value) in values {
            self.set(id, property, value)?;
        }
        Ok(id)
    }

    /// Returns a mutable handle for fluent updates.
    pub fn entity_mut(&mut self, id: EntityId) -> CoreResult<EntityMut<'_, 's>> {
        self.ensure_writable()?;
        self.changes.require(&self.snapshot, id)?;
        Ok(EntityMut::new(self, id))
    }

    /// Applies property changes; `None` clears a property.
    pub fn update<'v>(
        &mut self,
        id: EntityId,
        changes: impl IntoIterator<Item = (&'v str, Option<Value>)>,
    ) -> CoreResult<()> {
        self.ensure_writable()?;
        for (property, value) in changes {
            match value {
                Some(value) => self.set(id, property, value)?,
                None => self.unset(id, property)?,
            }
        }
        Ok(())
    }

    /// Sets one property.
    pub fn set(&mut self, id: EntityId, property: &str, value: impl Into<Value>) -> CoreResult<()> {
        self.ensure_writable()?;
        self.writable_property(id, property)?;
        self.changes
            .record_mut(&self.snapshot, id)?
            .properties
            .insert(property.to_string(), value.into());
        self.changes.mark_changed(id, property);
        Ok(())
    }

    /// Clears one property.
    pub fn unset(&mut self, id: EntityId, property: &str) -> CoreResult<()> {
        self.ensure_writable()?;
        self.writable_property(id, property)?;
        self.changes
            .record_mut(&self.snapshot, id)?
            .properties
            .remove(property);
        self.changes.mark_changed(id, property);
        Ok(())
    }

    /// Links `source.link` to `target`, updating the inverse link too.
    pub fn add_link(&mut self, source: EntityId, link: &str, target: EntityId) -> CoreResult<()> {
        self.ensure_writable()?;
        LinkManager::new(self.schema()).add(&self.snapshot, &mut self.changes, source, link, target)
    }

    /// Unlinks `target` from `source.link`, updating the inverse link too.
    ///
    /// A 1..N link may be left empty here; the floor is checked at commit.
    pub fn remove_link(
        &mut self,
        source: EntityId,
        link: &str,
        target: EntityId,
    ) -> CoreResult<()> {
        self.ensure_writable()?;
        LinkManager::new(self.schema()).remove(
            &self.snapshot,
            &mut self.changes,
            source,
            link,
            target,
        )
    }

    /// Deletes an entity and applies the delete policy of every link that
    /// references it. Returns every deleted id, `id` first.
    pub fn delete(&mut self, id: EntityId) -> CoreResult<Vec<EntityId>> {
        self.ensure_writable()?;
        let deleted = LinkManager::new(self.schema()).delete(
            &self.snapshot,
            &mut self.changes,
            id,
            self.system,
        )?;
        debug!(txid = %self.id, entity = %id, total = deleted.len(), "staged delete");
        Ok(deleted)
    }

    pub(crate) fn create_enum_member(
        &mut self,
        info: &TypeInfo,
        member: &EnumMember,
    ) -> CoreResult<EntityId> {
        self.ensure_writable()?;
        let mut record = EntityRecord::new(info.id);
        record.enum_key = Some(member.key.clone());
        record
            .properties
            .extend(member.properties.iter().cloned());
        Ok(self.stage_new(record))
    }

    fn stage_new(&mut self, record: EntityRecord) -> EntityId {
        let id = self.store.txns().allocate_entity_id();
        self.changes.staged.insert(id, Staged::Live(record));
        self.changes.created.insert(id);
        id
    }

    fn writable_property(&self, id: EntityId, property: &str) -> CoreResult<()> {
        let record = self.changes.require(&self.snapshot, id)?;
        let info = self.schema().info_by_id(record.type_id)?;
        if info.def.property_def(property).is_none() {
            return Err(CoreError::unknown_field(info.def.name(), property));
        }
        if record.enum_key.is_some() && !self.system {
            return Err(CoreError::invalid_operation(format!(
                "properties of {} member {} are fixed by the schema",
                info.def.name(),
                id
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    /// Validates and publishes the change-set.
    ///
    /// Property rules run first, then link floors and references. Any
    /// failure aborts the transaction and nothing becomes visible. A
    /// read-only or empty transaction returns its snapshot sequence.
    pub fn commit(mut self) -> CoreResult<SequenceNumber> {
        self.ensure_active()?;
        if self.mode == TxMode::ReadOnly || self.changes.is_empty() {
            self.finish(TransactionState::Committed);
            return Ok(self.snapshot.seq);
        }

        match self.validate().and_then(|writes| self.publish(&writes)) {
            Ok(sequence) => {
                self.finish(TransactionState::Committed);
                debug!(txid = %self.id, %sequence, "transaction committed");
                Ok(sequence)
            }
            Err(err) => {
                debug!(txid = %self.id, error = %err, "commit rejected");
                if let Err(log_err) = self.abort() {
                    warn!(txid = %self.id, error = %log_err, "failed to log abort");
                }
                Err(err)
            }
        }
    }

    /// Discards the change-set and releases the writer slot.
    pub fn rollback(mut self) -> CoreResult<()> {
        self.ensure_active()?;
        self.abort()
    }

    fn validate(&self) -> CoreResult<Vec<PendingWrite>> {
        let schema = self.schema();
        let validator = Validator::new(schema);
        let mut writes = Vec::with_capacity(self.changes.staged.len());

        for (&id, staged) in &self.changes.staged {
            match staged {
                Staged::Live(record) => {
                    let info = schema.info_by_id(record.type_id)?;
                    let changed = if self.changes.created.contains(&id) {
                        None
                    } else {
                        Some(self.changes.changed.get(&id).cloned().unwrap_or_default())
                    };
                    validator.check_entity(info, id, record, changed.as_ref())?;
                    writes.push(PendingWrite {
                        type_id: record.type_id,
                        entity_id: id,
                        payload: Some(record.encode()?),
                    });
                }
                // created and deleted in the same transaction: nothing to persist
                Staged::Deleted(_) if self.changes.created.contains(&id) => {}
                Staged::Deleted(type_id) => writes.push(PendingWrite {
                    type_id: *type_id,
                    entity_id: id,
                    payload: None,
                }),
            }
        }

        LinkManager::new(schema).verify(&self.snapshot, &self.changes)?;
        Ok(writes)
    }

    fn publish(&self, writes: &[PendingWrite]) -> CoreResult<SequenceNumber> {
        self.store.ensure_open()?;
        self.store.txns().publish(self.id, writes)
    }

    fn abort(&mut self) -> CoreResult<()> {
        let logged = if self.mode == TxMode::ReadWrite {
            self.store.txns().abort(self.id)
        } else {
            Ok(())
        };
        self.finish(TransactionState::Aborted);
        debug!(txid = %self.id, "transaction aborted");
        logged
    }

    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        self.changes = ChangeSet::default();
        self.store.txns().finish(self.id);
        self.writer = None;
    }

    fn ensure_active(&self) -> CoreResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "transaction {} is no longer active",
                self.id
            )))
        }
    }

    fn ensure_writable(&self) -> CoreResult<()> {
        self.ensure_active()?;
        match self.mode {
            TxMode::ReadWrite => Ok(()),
            TxMode::ReadOnly => Err(CoreError::ReadOnly),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.is_active() {
            if self.mode == TxMode::ReadWrite {
                warn!(txid = %self.id, "write transaction dropped without commit; rolling back");
            }
            if let Err(err) = self.abort() {
                warn!(txid = %self.id, error = %err, "failed to log rollback");
            }
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("snapshot_seq", &self.snapshot.seq)
            .field("staged", &self.changes.staged.len())
            .finish_non_exhaustive()
    }
}
