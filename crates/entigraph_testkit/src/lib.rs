//! # entigraph testkit
//!
//! Test utilities for entigraph.
//!
//! This crate provides:
//! - The bookstore schema and sample catalog used across the test suites
//! - Temporary in-memory and on-disk stores
//! - Restartable in-memory storage and fault injection for recovery tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use entigraph_testkit::prelude::*;
//!
//! with_temp_store(|store| {
//!     let catalog = seed_bookstore(store).unwrap();
//!     let titles = store
//!         .read(|txn| Ok(txn.follow(catalog.tolkien, "books")?.size()))
//!         .unwrap();
//!     assert_eq!(titles, 2);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::FaultyBackend;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
