//! Write-ahead log.
//!
//! Every write transaction appends its puts and deletes followed by a
//! commit record, and the log is flushed before the change-set reaches the
//! segment file. On open, committed transactions that never made it into
//! the segment are replayed; everything else is ignored.
//!
//! ## Record envelope
//!
//! ```text
//! magic "EGWL" | version u16 | type u8 | len u32 | payload (len bytes) | crc32
//! ```
//!
//! The checksum covers everything before it.

mod record;
mod writer;

pub use record::{WalRecord, WalRecordType, WAL_MAGIC, WAL_VERSION};
pub use writer::{WalManager, WalScan};
