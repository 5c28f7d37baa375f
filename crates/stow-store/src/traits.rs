use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use stow_types::{FileEntry, ListOptions, SignedUrlExpiry};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::compose::{self, ComposeOptions};
use crate::error::{StorageError, StorageResult};

/// Raw byte stream for reading one object without buffering it whole.
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Raw byte sink for writing one object. The object is complete once the
/// writer has been shut down.
pub type ByteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Common denominator interface for blob storage, modelled after cloud
/// object storage.
///
/// Objects are addressed by a bucket name and a path within the bucket.
/// Paths never start with `/`; paths ending in `/` are folder markers and are
/// never returned by listings.
///
/// All implementations must satisfy these invariants:
/// - An absent object is reported as `Ok(None)` / `Ok(false)`, never as an error.
/// - Listings and streams filter with plain `starts_with` on the prefix and
///   normalize names with [`ListOptions::normalize`].
/// - [`compose`](Self::compose) concatenates at most a backend-defined number
///   of sources and does not delete them. Unbounded merging lives in
///   [`combine_files`](Self::combine_files).
/// - Backend failures are propagated unchanged. Nothing here retries.
#[async_trait]
pub trait CommonStorage: Send + Sync {
    /// Check that the backend is reachable. Idempotent.
    ///
    /// Pass `bucket_name` when credentials only cover that bucket.
    async fn ping(&self, bucket_name: Option<&str>) -> StorageResult<()>;

    async fn file_exists(&self, bucket_name: &str, file_path: &str) -> StorageResult<bool>;

    /// Read a whole object. Returns `Ok(None)` if it does not exist.
    async fn get_file(&self, bucket_name: &str, file_path: &str) -> StorageResult<Option<Bytes>>;

    /// Write a whole object, replacing any previous content.
    async fn save_file(
        &self,
        bucket_name: &str,
        file_path: &str,
        content: Bytes,
    ) -> StorageResult<()>;

    /// Delete every object whose path starts with `prefix`.
    async fn delete_path(&self, bucket_name: &str, prefix: &str) -> StorageResult<()> {
        self.delete_paths(bucket_name, &[prefix.to_string()]).await
    }

    /// Delete every object whose path starts with any of `prefixes`.
    ///
    /// Keeps going when individual deletions fail.
    async fn delete_paths(&self, bucket_name: &str, prefixes: &[String]) -> StorageResult<()>;

    /// Delete objects by exact path. Missing paths are ignored.
    async fn delete_files(&self, bucket_name: &str, file_paths: &[String]) -> StorageResult<()>;

    async fn get_file_names(
        &self,
        bucket_name: &str,
        opts: &ListOptions,
    ) -> StorageResult<Vec<String>>;

    /// Lazy, single-pass counterpart of [`get_file_names`](Self::get_file_names).
    fn get_file_names_stream<'a>(
        &'a self,
        bucket_name: &'a str,
        opts: ListOptions,
    ) -> BoxStream<'a, StorageResult<String>>;

    /// Lazy, single-pass stream of matching files with their content.
    fn get_files_stream<'a>(
        &'a self,
        bucket_name: &'a str,
        opts: ListOptions,
    ) -> BoxStream<'a, StorageResult<FileEntry>>;

    /// Open an object for streaming reads. Returns `Ok(None)` if it does not exist.
    async fn get_file_read_stream(
        &self,
        bucket_name: &str,
        file_path: &str,
    ) -> StorageResult<Option<ByteReader>>;

    async fn get_file_write_stream(
        &self,
        bucket_name: &str,
        file_path: &str,
    ) -> StorageResult<ByteWriter>;

    /// Upload a local file into the bucket.
    async fn upload_file(
        &self,
        local_file_path: &Path,
        bucket_name: &str,
        bucket_file_path: &str,
    ) -> StorageResult<()> {
        let content = tokio::fs::read(local_file_path).await?;
        self.save_file(bucket_name, bucket_file_path, Bytes::from(content))
            .await
    }

    async fn set_file_visibility(
        &self,
        bucket_name: &str,
        file_path: &str,
        is_public: bool,
    ) -> StorageResult<()>;

    async fn get_file_visibility(&self, bucket_name: &str, file_path: &str) -> StorageResult<bool>;

    /// Copy one object. `to_bucket` defaults to `from_bucket`.
    async fn copy_file(
        &self,
        from_bucket: &str,
        from_path: &str,
        to_path: &str,
        to_bucket: Option<&str>,
    ) -> StorageResult<()>;

    /// Move one object. `to_bucket` defaults to `from_bucket`.
    async fn move_file(
        &self,
        from_bucket: &str,
        from_path: &str,
        to_path: &str,
        to_bucket: Option<&str>,
    ) -> StorageResult<()>;

    /// Move every object under `from_prefix` to `to_prefix`, keeping the
    /// part of the path after the prefix.
    ///
    /// Both prefixes must end with `/` (see [`check_folder_prefixes`]).
    async fn move_path(
        &self,
        from_bucket: &str,
        from_prefix: &str,
        to_prefix: &str,
        to_bucket: Option<&str>,
    ) -> StorageResult<()>;

    /// A URL granting read access to one object until `expires`.
    async fn get_signed_url(
        &self,
        bucket_name: &str,
        file_path: &str,
        expires: SignedUrlExpiry,
    ) -> StorageResult<String>;

    /// Backend-native compose: concatenate `file_paths` (in order) into
    /// `to_path` in `to_bucket` (defaults to `bucket_name`).
    ///
    /// Accepts a bounded number of sources and leaves them in place.
    async fn compose(
        &self,
        bucket_name: &str,
        file_paths: &[String],
        to_path: &str,
        to_bucket: Option<&str>,
    ) -> StorageResult<()>;

    /// Limits used by [`combine_files`](Self::combine_files).
    fn compose_options(&self) -> ComposeOptions {
        ComposeOptions::default()
    }

    /// Combine any number of files into `to_path`, then delete the inputs.
    async fn combine_files(
        &self,
        bucket_name: &str,
        file_paths: &[String],
        to_path: &str,
        to_bucket: Option<&str>,
    ) -> StorageResult<()> {
        let opts = self.compose_options();
        compose::combine_files(self, bucket_name, file_paths, to_path, to_bucket, &opts).await
    }

    /// Like [`combine_files`](Self::combine_files), for all files under `prefix`.
    async fn combine(
        &self,
        bucket_name: &str,
        prefix: &str,
        to_path: &str,
        to_bucket: Option<&str>,
    ) -> StorageResult<()> {
        let opts = self.compose_options();
        compose::combine(self, bucket_name, prefix, to_path, to_bucket, &opts).await
    }
}

/// Precondition for [`CommonStorage::move_path`]: both prefixes end with `/`,
/// otherwise a sibling folder sharing the prefix would be moved too.
pub fn check_folder_prefixes(from_prefix: &str, to_prefix: &str) -> StorageResult<()> {
    if !from_prefix.ends_with('/') {
        return Err(StorageError::Precondition(format!(
            "from_prefix should end with '/': {from_prefix:?}"
        )));
    }
    if !to_prefix.ends_with('/') {
        return Err(StorageError::Precondition(format!(
            "to_prefix should end with '/': {to_prefix:?}"
        )));
    }
    Ok(())
}
