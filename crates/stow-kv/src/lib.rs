//! Key-value database over stow blob storage.
//!
//! This crate maps a two-part key `(table, id)` onto a [`CommonStorage`]
//! backend: every table is a folder, every item a file named by its id whose
//! content is the raw value.
//!
//! # Modules
//!
//! - [`error`] -- Error types for key-value operations
//! - [`table`] -- Table name resolution: [`TableLocation`], [`resolve_table`]
//! - [`traits`] -- The [`KeyValueDb`] trait
//! - [`adapter`] -- [`StorageKeyValueDb`], the storage-backed implementation
//!
//! [`CommonStorage`]: stow_store::CommonStorage

pub mod adapter;
pub mod error;
pub mod table;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod traits;

pub use adapter::{KeyValueDbConfig, StorageKeyValueDb, DEFAULT_KV_CONCURRENCY};
pub use error::{KvError, KvResult};
pub use table::{resolve_table, TableLocation};
pub use traits::{KeyValueDb, KeyValueTuple};
