//! The stored form of an entity.

use crate::entity::{EntityId, Value};
use crate::error::CoreResult;
use crate::types::EntityTypeId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// An entity as persisted in the WAL and segments.
///
/// Link sets are ordered by target id, which is creation order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Registered type of the entity.
    pub type_id: EntityTypeId,
    /// Symbolic key for enum members.
    pub enum_key: Option<String>,
    /// Property name to value.
    pub properties: BTreeMap<String, Value>,
    /// Link name to target ids.
    pub links: BTreeMap<String, BTreeSet<EntityId>>,
}

impl EntityRecord {
    /// Creates an empty record of the given type.
    #[must_use]
    pub fn new(type_id: EntityTypeId) -> Self {
        Self {
            type_id,
            ..Self::default()
        }
    }

    /// Returns the targets of `link`, empty if none were ever added.
    pub fn targets(&self, link: &str) -> impl Iterator<Item = EntityId> + '_ {
        self.links.get(link).into_iter().flatten().copied()
    }

    /// Number of targets held by `link`.
    #[must_use]
    pub fn target_count(&self, link: &str) -> usize {
        self.links.get(link).map_or(0, BTreeSet::len)
    }

    /// Adds `target` to `link`; returns `false` if it was already present.
    pub fn insert_target(&mut self, link: &str, target: EntityId) -> bool {
        self.links.entry(link.to_string()).or_default().insert(target)
    }

    /// Removes `target` from `link`; returns `false` if it was absent.
    pub fn remove_target(&mut self, link: &str, target: EntityId) -> bool {
        self.links
            .get_mut(link)
            .is_some_and(|targets| targets.remove(&target))
    }

    /// Encodes the record as CBOR.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)?;
        Ok(buf)
    }

    /// Decodes a record from CBOR.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        Ok(ciborium::from_reader(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_helpers() {
        let mut record = EntityRecord::new(EntityTypeId::new(1));
        assert_eq!(record.target_count("books"), 0);

        assert!(record.insert_target("books", EntityId::new(7)));
        assert!(!record.insert_target("books", EntityId::new(7)));
        assert!(record.insert_target("books", EntityId::new(3)));
        assert_eq!(
            record.targets("books").collect::<Vec<_>>(),
            vec![EntityId::new(3), EntityId::new(7)]
        );

        assert!(record.remove_target("books", EntityId::new(3)));
        assert!(!record.remove_target("genres", EntityId::new(3)));
        assert_eq!(record.target_count("books"), 1);
    }

    #[test]
    fn cbor_preserves_properties_and_links() {
        let mut record = EntityRecord::new(EntityTypeId::new(2));
        record.properties.insert("title".into(), Value::from("The Hobbit"));
        record.properties.insert("year".into(), Value::from(1937));
        record.insert_target("authors", EntityId::new(1));

        let decoded = EntityRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let err = EntityRecord::decode(&[0xFF, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, crate::CoreError::Codec { .. }));
    }
}
