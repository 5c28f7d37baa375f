//! Blob storage for stow.
//!
//! This crate defines the storage contract shared by every backend, a
//! batched composition engine built on top of it, and an in-memory backend
//! that serves as the reference implementation.
//!
//! # Storage Contract
//!
//! All backends implement the [`CommonStorage`] trait. Objects are addressed
//! by bucket name and path; absent objects read as `Ok(None)`.
//!
//! - [`InMemoryStorage`] -- caller-owned sorted maps, for tests and embedding
//! - [`StorageBucket`] -- one bucket bound to a backend, with text/JSON and
//!   bulk helpers
//!
//! # Composition
//!
//! Native compose accepts at most [`BATCH_SIZE`] sources.
//! [`CommonStorage::combine_files`] lifts that limit by composing in levels
//! (see [`compose`]) and removes every input and intermediate afterwards.
//!
//! # Design Rules
//!
//! 1. Backend failures are propagated unchanged; nothing retries.
//! 2. Preconditions are checked before any object is touched.
//! 3. Listings and streams share one normalization routine.
//! 4. Bulk operations run at bounded concurrency ([`StorageConfig`]).

pub mod bucket;
pub mod compose;
pub mod config;
pub mod error;
pub mod memory;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use bucket::StorageBucket;
pub use compose::{ComposeOptions, BATCH_SIZE, MAX_RECURSION_DEPTH};
pub use config::{SignedUrlConfig, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryStorage;
pub use traits::{check_folder_prefixes, ByteReader, ByteWriter, CommonStorage};
