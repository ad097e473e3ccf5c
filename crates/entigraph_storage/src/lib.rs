//! # entigraph storage
//!
//! Byte-store backends used by the entigraph engine for its write-ahead log
//! and segment file.
//!
//! Backends are opaque: they append, read back and truncate raw bytes and
//! never interpret record framing, checksums or entity payloads. All format
//! knowledge lives in `entigraph_core`.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - a single OS file, durable across restarts
//! - [`InMemoryBackend`] - a shared in-memory buffer for tests and scratch stores
//!
//! ## Example
//!
//! ```rust
//! use entigraph_storage::{InMemoryBackend, StorageBackend};
//!
//! let backend = InMemoryBackend::new();
//! let offset = backend.append(b"author").unwrap();
//! assert_eq!(backend.read_at(offset, 6).unwrap(), b"author");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
