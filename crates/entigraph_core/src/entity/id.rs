//! Entity identifier.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an entity.
///
/// Ids are allocated from a store-wide counter, so they are:
/// - unique within a store
/// - immutable once assigned
/// - never reused, even after the entity is deleted
/// - ordered by creation, which gives scans their insertion order
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    /// Creates an entity ID from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ent:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_allocation() {
        assert!(EntityId::new(1) < EntityId::new(2));
    }

    #[test]
    fn formatting() {
        let id = EntityId::new(17);
        assert_eq!(id.to_string(), "ent:17");
        assert_eq!(format!("{id:?}"), "EntityId(17)");
        assert_eq!(id.as_u64(), 17);
    }
}
