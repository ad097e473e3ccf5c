//! Entity identifiers, property values and stored records.

mod id;
mod record;
mod value;

pub use id::EntityId;
pub use record::EntityRecord;
pub use value::Value;
