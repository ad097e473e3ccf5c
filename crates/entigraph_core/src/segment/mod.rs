//! Segment storage.
//!
//! Committed entity versions are appended to a single segment file as
//! self-framing records. An in-memory index keeps, per entity, every
//! committed version with its sequence number, which is what lets readers
//! resolve an entity as of their snapshot while writers keep appending.

mod record;
mod store;

pub use record::SegmentRecord;
pub use store::SegmentManager;
