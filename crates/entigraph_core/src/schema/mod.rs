//! Entity type definitions and the registry that validates them.
//!
//! A schema is a list of [`EntityType`]s built with plain constructors and
//! handed to the store once at `open`. [`SchemaRegistry::register`] checks
//! that links, inverses and constraints are consistent and freezes the
//! result; nothing can be added or changed afterwards.
//!
//! ```rust
//! use entigraph_core::schema::{
//!     Constraint, EntityType, LinkDefinition, PropertyDefinition, SchemaRegistry,
//! };
//!
//! let types = vec![
//!     EntityType::new("Author")
//!         .property(PropertyDefinition::string("name").required())
//!         .property(PropertyDefinition::integer("yearOfBirth").required().constraint(Constraint::max(2019)))
//!         .link(LinkDefinition::zero_to_many("books", "Book").inverse("authors")),
//!     EntityType::new("Book")
//!         .property(PropertyDefinition::string("title").required())
//!         .link(LinkDefinition::one_to_many("authors", "Author").inverse("books")),
//! ];
//!
//! let registry = SchemaRegistry::register(types).unwrap();
//! assert!(registry.describe("Book").unwrap().link_def("authors").is_some());
//! ```

mod definition;
mod registry;

pub use definition::{
    Cardinality, Constraint, DeletePolicy, EntityType, EnumMember, LinkDefinition,
    PropertyDefinition, PropertyKind,
};
pub use registry::SchemaRegistry;
pub(crate) use registry::TypeInfo;
