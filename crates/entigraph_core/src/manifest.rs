//! Store manifest.
//!
//! The manifest is a small CBOR document behind a fixed header:
//!
//! ```text
//! magic "EGMF" | manifest version u16 | CBOR body
//! ```

use crate::error::{CoreError, CoreResult};
use crate::types::{EntityTypeId, SequenceNumber};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Magic bytes of the manifest file.
pub const MANIFEST_MAGIC: [u8; 4] = *b"EGMF";

/// Current manifest layout version.
pub const MANIFEST_VERSION: u16 = 1;

/// Persistent store metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Format version (major, minor).
    pub format_version: (u16, u16),
    /// Entity type name to stable id.
    pub entity_types: BTreeMap<String, u32>,
    /// Next type id to hand out.
    pub next_type_id: u32,
    /// Lower bound for the next entity id.
    pub next_entity_id: u64,
    /// Sequence covered by the last checkpoint.
    pub last_checkpoint: Option<u64>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new((1, 0))
    }
}

impl Manifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new(format_version: (u16, u16)) -> Self {
        Self {
            format_version,
            entity_types: BTreeMap::new(),
            next_type_id: 1,
            next_entity_id: 1,
            last_checkpoint: None,
        }
    }

    /// Returns the id of `name`, assigning the next free one if it is new.
    pub fn type_id_for(&mut self, name: &str) -> EntityTypeId {
        if let Some(&id) = self.entity_types.get(name) {
            return EntityTypeId::new(id);
        }
        let id = self.next_type_id;
        self.next_type_id += 1;
        self.entity_types.insert(name.to_string(), id);
        EntityTypeId::new(id)
    }

    /// Sequence of the last checkpoint.
    #[must_use]
    pub fn last_checkpoint(&self) -> Option<SequenceNumber> {
        self.last_checkpoint.map(SequenceNumber::new)
    }

    /// Encodes the manifest.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MANIFEST_MAGIC);
        buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
        ciborium::into_writer(self, &mut buf)?;
        Ok(buf)
    }

    /// Decodes a manifest.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < 6 || data[..4] != MANIFEST_MAGIC {
            return Err(CoreError::invalid_format("invalid manifest magic"));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > MANIFEST_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported manifest version: {version}"
            )));
        }
        ciborium::from_reader(&data[6..])
            .map_err(|e| CoreError::invalid_format(format!("unreadable manifest: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_ids_are_stable() {
        let mut manifest = Manifest::default();
        let author = manifest.type_id_for("Author");
        let book = manifest.type_id_for("Book");
        assert_ne!(author, book);
        assert_eq!(manifest.type_id_for("Author"), author);
        assert_eq!(manifest.next_type_id, 3);
    }

    #[test]
    fn encode_decode() {
        let mut manifest = Manifest::new((1, 2));
        manifest.type_id_for("Genre");
        manifest.next_entity_id = 42;
        manifest.last_checkpoint = Some(7);

        let decoded = Manifest::decode(&manifest.encode().unwrap()).unwrap();
        assert_eq!(decoded, manifest);
        assert_eq!(decoded.last_checkpoint(), Some(SequenceNumber::new(7)));
    }

    #[test]
    fn rejects_bad_header() {
        assert!(Manifest::decode(b"NOPE\x01\x00").is_err());
        let mut bytes = Manifest::default().encode().unwrap();
        bytes[4] = 9;
        assert!(matches!(
            Manifest::decode(&bytes),
            Err(CoreError::InvalidFormat { .. })
        ));
    }
}
