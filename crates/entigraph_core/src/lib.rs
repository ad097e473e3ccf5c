//! # entigraph core
//!
//! An embedded, transactional entity store with a declared schema.
//!
//! Entities have typed properties checked by declarative rules and links to
//! other entities. Bidirectional links keep both ends in step, and each link
//! declares what happens to it when its target is deleted. All access goes
//! through snapshot-isolated transactions: any number of readers, one
//! writer, validation at commit.
//!
//! This crate provides:
//! - [`schema`]: entity type definitions and their registry
//! - [`Validator`]: per-property rule evaluation
//! - [`Transaction`]: staged writes, link maintenance, commit and rollback
//! - [`Query`]: filter, sort and flat-map over one snapshot
//! - [`Store`]: open, recover, checkpoint and close
//!
//! Durability comes from a checksummed write-ahead log whose committed
//! transactions are applied to an append-only segment file.
//!
//! ```rust
//! use entigraph_core::schema::{
//!     Constraint, EntityType, EnumMember, LinkDefinition, PropertyDefinition,
//! };
//! use entigraph_core::Store;
//!
//! let store = Store::open_in_memory(vec![
//!     EntityType::enumeration("Genre", [EnumMember::new("ROMANCE")]),
//!     EntityType::new("Book")
//!         .property(PropertyDefinition::string("title").required())
//!         .property(PropertyDefinition::integer("year").constraint(Constraint::max(2019)))
//!         .link(LinkDefinition::one_to_many("genres", "Genre")),
//! ])
//! .unwrap();
//!
//! store
//!     .write(|txn| {
//!         let romance = txn.enum_member("Genre", "ROMANCE")?;
//!         let book = txn.create("Book", [("title", "Jane Eyre".into()), ("year", 1847.into())])?;
//!         txn.add_link(book, "genres", romance)
//!     })
//!     .unwrap();
//!
//! let titles = store
//!     .read(|txn| {
//!         Ok(txn
//!             .query("Book")?
//!             .filter(|b| b.integer("year").is_some_and(|y| (1800..1900).contains(&y)))
//!             .ids())
//!     })
//!     .unwrap();
//! assert_eq!(titles.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checksum;
mod config;
mod constraint;
mod dir;
mod entity;
mod error;
mod handle;
mod link;
mod manifest;
mod query;
pub mod schema;
mod segment;
mod store;
mod transaction;
mod types;
mod wal;

pub use config::Config;
pub use constraint::Validator;
pub use entity::{EntityId, EntityRecord, Value};
pub use error::{CoreError, CoreResult};
pub use handle::{EntityMut, EntityView};
pub use query::Query;
pub use schema::{
    Cardinality, Constraint, DeletePolicy, EntityType, EnumMember, LinkDefinition,
    PropertyDefinition, PropertyKind, SchemaRegistry,
};
pub use store::Store;
pub use transaction::{Transaction, TransactionState, TxMode};
pub use types::{EntityTypeId, SequenceNumber, TransactionId};
