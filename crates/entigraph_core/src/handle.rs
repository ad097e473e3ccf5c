//! Typed handles over entities inside a transaction.

use crate::entity::{EntityId, EntityRecord, Value};
use crate::error::{CoreError, CoreResult};
use crate::query::Query;
use crate::schema::EntityType;
use crate::transaction::Transaction;
use std::fmt;

/// A read-only copy of an entity as one transaction sees it.
///
/// Views are detached from the store: later writes in the same transaction
/// are not reflected. Re-read to observe them.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityView<'s> {
    id: EntityId,
    ty: &'s EntityType,
    record: EntityRecord,
}

impl<'s> EntityView<'s> {
    pub(crate) fn new(id: EntityId, ty: &'s EntityType, record: EntityRecord) -> Self {
        Self { id, ty, record }
    }

    /// The entity id.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// The entity's type name.
    #[must_use]
    pub fn type_name(&self) -> &'s str {
        self.ty.name()
    }

    /// The entity's type definition.
    #[must_use]
    pub fn entity_type(&self) -> &'s EntityType {
        self.ty
    }

    /// The member key, for enum members.
    #[must_use]
    pub fn enum_key(&self) -> Option<&str> {
        self.record.enum_key.as_deref()
    }

    /// A property value, or `None` if unset.
    #[must_use]
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.record.properties.get(property)
    }

    /// A text property.
    #[must_use]
    pub fn string(&self, property: &str) -> Option<&str> {
        self.get(property).and_then(Value::as_text)
    }

    /// An integer property.
    #[must_use]
    pub fn integer(&self, property: &str) -> Option<i64> {
        self.get(property).and_then(Value::as_integer)
    }

    /// Targets of a link, ascending.
    pub fn links(&self, link: &str) -> impl Iterator<Item = EntityId> + '_ {
        self.record.targets(link)
    }

    /// Number of targets of a link.
    #[must_use]
    pub fn link_count(&self, link: &str) -> usize {
        self.record.target_count(link)
    }

    /// Whether `link` contains `target`.
    #[must_use]
    pub fn has_link(&self, link: &str, target: EntityId) -> bool {
        self.record.targets(link).any(|t| t == target)
    }

    /// Loads the targets of `link` through `txn`.
    pub fn linked<'t>(&self, txn: &'t Transaction<'s>, link: &str) -> CoreResult<Query<'t, 's>> {
        if self.ty.link_def(link).is_none() {
            return Err(CoreError::unknown_field(self.type_name(), link));
        }
        Query::from_ids(txn, self.links(link).collect())
    }

    /// The underlying record.
    #[must_use]
    pub fn record(&self) -> &EntityRecord {
        &self.record
    }
}

impl fmt::Display for EntityView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.type_name(), self.id)?;
        if let Some(key) = self.enum_key() {
            write!(f, " {key}")?;
        }
        f.write_str(" {")?;
        for (i, (name, value)) in self.record.properties.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        f.write_str("}")
    }
}

/// A mutable handle for chained updates of one entity.
///
/// ```no_run
/// # use entigraph_core::{CoreResult, EntityId, Transaction};
/// # fn demo(txn: &mut Transaction<'_>, book: EntityId, author: EntityId) -> CoreResult<()> {
/// txn.entity_mut(book)?
///     .set("year", 1847)?
///     .add_link("authors", author)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct EntityMut<'t, 's> {
    txn: &'t mut Transaction<'s>,
    id: EntityId,
}

impl<'t, 's> EntityMut<'t, 's> {
    pub(crate) fn new(txn: &'t mut Transaction<'s>, id: EntityId) -> Self {
        Self { txn, id }
    }

    /// The entity id.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Sets a property.
    pub fn set(&mut self, property: &str, value: impl Into<Value>) -> CoreResult<&mut Self> {
        self.txn.set(self.id, property, value)?;
        Ok(self)
    }

    /// Clears a property.
    pub fn unset(&mut self, property: &str) -> CoreResult<&mut Self> {
        self.txn.unset(self.id, property)?;
        Ok(self)
    }

    /// Adds a link target.
    pub fn add_link(&mut self, link: &str, target: EntityId) -> CoreResult<&mut Self> {
        self.txn.add_link(self.id, link, target)?;
        Ok(self)
    }

    /// Removes a link target.
    pub fn remove_link(&mut self, link: &str, target: EntityId) -> CoreResult<&mut Self> {
        self.txn.remove_link(self.id, link, target)?;
        Ok(self)
    }

    /// The entity's current state, including staged writes.
    pub fn view(&self) -> CoreResult<EntityView<'s>> {
        self.txn.entity(self.id)
    }

    /// Deletes the entity, consuming the handle.
    pub fn delete(self) -> CoreResult<Vec<EntityId>> {
        self.txn.delete(self.id)
    }
}
