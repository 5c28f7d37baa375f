//! Foundation types for stow.
//!
//! This crate provides the plain data types shared by every stow crate. It
//! performs no I/O.
//!
//! # Key Types
//!
//! - [`FileEntry`] -- a path within a bucket together with its content
//! - [`ListOptions`] -- prefix / full-path / limit options for listings
//! - [`SignedUrlExpiry`] -- a time value resolvable to an absolute instant
//!
//! # Paths
//!
//! A path is a key within a bucket. It never starts with `/`. A path ending
//! in `/` is a virtual folder marker: it is filtered out of every listing and
//! stream. Both the batch and the streaming listings go through
//! [`ListOptions::normalize`], so the two access modes always agree.

pub mod entry;
pub mod error;
pub mod expiry;
pub mod listing;

pub use entry::FileEntry;
pub use error::TypeError;
pub use expiry::{SignedUrlExpiry, MAX_SIGNED_URL_HORIZON_SECS};
pub use listing::{
    is_folder_marker, normalize_file_name, select_file_names, substring_after_last, validate_path,
    ListOptions,
};
