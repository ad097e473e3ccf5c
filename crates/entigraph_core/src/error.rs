//! Error types for the entity store.

use crate::entity::EntityId;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the entity store.
///
/// Validation errors always name the offending entity and property so a
/// failed commit can be reported without re-reading the transaction.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] entigraph_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An entity record could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The schema handed to `open` is inconsistent.
    #[error("schema error: {message}")]
    Schema {
        /// Description of the problem.
        message: String,
    },

    /// A property value broke one of its declared rules.
    #[error("{entity_type} {entity_id}: property '{property}' violates {rule} (value: {value})")]
    ConstraintViolation {
        /// Type of the offending entity.
        entity_type: String,
        /// The offending entity.
        entity_id: EntityId,
        /// Property name.
        property: String,
        /// The rule that failed, e.g. `length(3..=56)`.
        rule: String,
        /// Rendered offending value.
        value: String,
    },

    /// A required property is absent, or a 1..N link holds no targets.
    #[error("{entity_type} {entity_id}: required field '{field}' is missing")]
    RequiredField {
        /// Type of the offending entity.
        entity_type: String,
        /// The offending entity.
        entity_id: EntityId,
        /// Property or link name.
        field: String,
    },

    /// An entity still references one that is being deleted.
    #[error("{entity_type} {entity_id} is still referenced by {referenced_by} through '{link}'")]
    DanglingReference {
        /// Type of the deleted entity.
        entity_type: String,
        /// The deleted entity.
        entity_id: EntityId,
        /// The entity holding the reference.
        referenced_by: EntityId,
        /// Link on the referencing entity.
        link: String,
    },

    /// No live entity has this id in the transaction's view.
    #[error("entity not found: {entity_id}")]
    EntityNotFound {
        /// The missing entity.
        entity_id: EntityId,
    },

    /// A mutation was attempted in a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// Concurrent writer conflict; the caller may retry.
    #[error("transaction conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// The type name is not registered.
    #[error("unknown entity type: {name}")]
    UnknownType {
        /// The requested type name.
        name: String,
    },

    /// The property or link is not declared on the type.
    #[error("{entity_type} has no field named '{field}'")]
    UnknownField {
        /// Type that was searched.
        entity_type: String,
        /// The requested field.
        field: String,
    },

    /// The enum type has no member with this key.
    #[error("{entity_type} has no member '{key}'")]
    UnknownEnumMember {
        /// The enum type.
        entity_type: String,
        /// The requested key.
        key: String,
    },

    /// WAL is corrupted or invalid.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Segment is corrupted or invalid.
    #[error("segment corruption: {message}")]
    SegmentCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Stored checksum.
        expected: u32,
        /// Recomputed checksum.
        actual: u32,
    },

    /// Invalid store format or version.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Another process holds the store lock.
    #[error("store locked: another process has exclusive access")]
    DatabaseLocked,

    /// The store has been closed.
    #[error("store is closed")]
    DatabaseClosed,

    /// A failed commit could not be undone; the store must be reopened.
    #[error("store needs recovery: {message}")]
    NeedsRecovery {
        /// What could not be undone.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation was refused.
        message: String,
    },
}

impl CoreError {
    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates a segment corruption error.
    pub fn segment_corruption(message: impl Into<String>) -> Self {
        Self::SegmentCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an unknown type error.
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownType { name: name.into() }
    }

    /// Creates an unknown field error.
    pub fn unknown_field(entity_type: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            entity_type: entity_type.into(),
            field: field.into(),
        }
    }

    /// Creates an entity-not-found error.
    pub fn not_found(entity_id: EntityId) -> Self {
        Self::EntityNotFound { entity_id }
    }

    /// Returns `true` if the error only affects the failed transaction.
    ///
    /// Schema, I/O and corruption errors are fatal for the operation that
    /// raised them; everything else leaves the store fully usable.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConstraintViolation { .. }
                | Self::RequiredField { .. }
                | Self::DanglingReference { .. }
                | Self::EntityNotFound { .. }
                | Self::ReadOnly
                | Self::Conflict { .. }
                | Self::UnknownType { .. }
                | Self::UnknownField { .. }
                | Self::UnknownEnumMember { .. }
                | Self::InvalidOperation { .. }
        )
    }
}

impl<T: std::fmt::Debug> From<ciborium::ser::Error<T>> for CoreError {
    fn from(err: ciborium::ser::Error<T>) -> Self {
        Self::codec(err.to_string())
    }
}

impl<T: std::fmt::Debug> From<ciborium::de::Error<T>> for CoreError {
    fn from(err: ciborium::de::Error<T>) -> Self {
        Self::codec(err.to_string())
    }
}
