use std::fmt;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use stow_types::{FileEntry, ListOptions, SignedUrlExpiry};
use tracing::debug;

use crate::config::{StorageConfig, DEFAULT_READ_CONCURRENCY, DEFAULT_WRITE_CONCURRENCY};
use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteReader, ByteWriter, CommonStorage};

/// A [`CommonStorage`] bound to one bucket, with text/JSON and bulk helpers.
#[derive(Clone)]
pub struct StorageBucket {
    storage: Arc<dyn CommonStorage>,
    bucket_name: String,
    read_concurrency: usize,
    write_concurrency: usize,
}

impl StorageBucket {
    pub fn new(storage: Arc<dyn CommonStorage>, bucket_name: impl Into<String>) -> Self {
        Self {
            storage,
            bucket_name: bucket_name.into(),
            read_concurrency: DEFAULT_READ_CONCURRENCY,
            write_concurrency: DEFAULT_WRITE_CONCURRENCY,
        }
    }

    /// Take bulk concurrency limits from `config`.
    pub fn from_config(
        storage: Arc<dyn CommonStorage>,
        bucket_name: impl Into<String>,
        config: &StorageConfig,
    ) -> Self {
        Self::new(storage, bucket_name)
            .with_concurrency(config.read_concurrency, config.write_concurrency)
    }

    /// Limits are clamped to at least 1.
    pub fn with_concurrency(mut self, read: usize, write: usize) -> Self {
        self.read_concurrency = read.max(1);
        self.write_concurrency = write.max(1);
        self
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    pub fn storage(&self) -> &Arc<dyn CommonStorage> {
        &self.storage
    }

    // -----------------------------------------------------------------------
    // Passthroughs
    // -----------------------------------------------------------------------

    pub async fn ping(&self) -> StorageResult<()> {
        self.storage.ping(Some(&self.bucket_name)).await
    }

    pub async fn file_exists(&self, file_path: &str) -> StorageResult<bool> {
        self.storage.file_exists(&self.bucket_name, file_path).await
    }

    pub async fn get_file(&self, file_path: &str) -> StorageResult<Option<Bytes>> {
        self.storage.get_file(&self.bucket_name, file_path).await
    }

    pub async fn save_file(&self, file_path: &str, content: impl Into<Bytes>) -> StorageResult<()> {
        self.storage
            .save_file(&self.bucket_name, file_path, content.into())
            .await
    }

    pub async fn delete_path(&self, prefix: &str) -> StorageResult<()> {
        self.storage.delete_path(&self.bucket_name, prefix).await
    }

    pub async fn delete_paths(&self, prefixes: &[String]) -> StorageResult<()> {
        self.storage.delete_paths(&self.bucket_name, prefixes).await
    }

    pub async fn delete_files(&self, file_paths: &[String]) -> StorageResult<()> {
        self.storage.delete_files(&self.bucket_name, file_paths).await
    }

    pub async fn get_file_names(&self, opts: &ListOptions) -> StorageResult<Vec<String>> {
        self.storage.get_file_names(&self.bucket_name, opts).await
    }

    pub fn get_file_names_stream(&self, opts: ListOptions) -> BoxStream<'_, StorageResult<String>> {
        self.storage.get_file_names_stream(&self.bucket_name, opts)
    }

    pub fn get_files_stream(&self, opts: ListOptions) -> BoxStream<'_, StorageResult<FileEntry>> {
        self.storage.get_files_stream(&self.bucket_name, opts)
    }

    pub async fn get_file_read_stream(&self, file_path: &str) -> StorageResult<Option<ByteReader>> {
        self.storage
            .get_file_read_stream(&self.bucket_name, file_path)
            .await
    }

    pub async fn get_file_write_stream(&self, file_path: &str) -> StorageResult<ByteWriter> {
        self.storage
            .get_file_write_stream(&self.bucket_name, file_path)
            .await
    }

    pub async fn upload_file(
        &self,
        local_file_path: &Path,
        bucket_file_path: &str,
    ) -> StorageResult<()> {
        self.storage
            .upload_file(local_file_path, &self.bucket_name, bucket_file_path)
            .await
    }

    pub async fn set_file_visibility(&self, file_path: &str, is_public: bool) -> StorageResult<()> {
        self.storage
            .set_file_visibility(&self.bucket_name, file_path, is_public)
            .await
    }

    pub async fn get_file_visibility(&self, file_path: &str) -> StorageResult<bool> {
        self.storage
            .get_file_visibility(&self.bucket_name, file_path)
            .await
    }

    /// Copy within this bucket, or into `to_bucket` when given.
    pub async fn copy_file(
        &self,
        from_path: &str,
        to_path: &str,
        to_bucket: Option<&str>,
    ) -> StorageResult<()> {
        self.storage
            .copy_file(&self.bucket_name, from_path, to_path, to_bucket)
            .await
    }

    /// Move within this bucket, or into `to_bucket` when given.
    pub async fn move_file(
        &self,
        from_path: &str,
        to_path: &str,
        to_bucket: Option<&str>,
    ) -> StorageResult<()> {
        self.storage
            .move_file(&self.bucket_name, from_path, to_path, to_bucket)
            .await
    }

    pub async fn move_path(&self, from_prefix: &str, to_prefix: &str) -> StorageResult<()> {
        self.storage
            .move_path(&self.bucket_name, from_prefix, to_prefix, None)
            .await
    }

    pub async fn get_signed_url(
        &self,
        file_path: &str,
        expires: impl Into<SignedUrlExpiry>,
    ) -> StorageResult<String> {
        self.storage
            .get_signed_url(&self.bucket_name, file_path, expires.into())
            .await
    }

    pub async fn compose(&self, file_paths: &[String], to_path: &str) -> StorageResult<()> {
        self.storage
            .compose(&self.bucket_name, file_paths, to_path, None)
            .await
    }

    pub async fn combine_files(&self, file_paths: &[String], to_path: &str) -> StorageResult<()> {
        self.storage
            .combine_files(&self.bucket_name, file_paths, to_path, None)
            .await
    }

    pub async fn combine(&self, prefix: &str, to_path: &str) -> StorageResult<()> {
        self.storage
            .combine(&self.bucket_name, prefix, to_path, None)
            .await
    }

    // -----------------------------------------------------------------------
    // Typed reads
    // -----------------------------------------------------------------------

    /// Read an object as UTF-8 text. An empty object yields `Some("")`.
    pub async fn get_file_as_string(&self, file_path: &str) -> StorageResult<Option<String>> {
        match self.get_file(file_path).await? {
            Some(content) => Ok(Some(String::from_utf8(content.to_vec())?)),
            None => Ok(None),
        }
    }

    pub async fn get_file_as_json<T: DeserializeOwned>(
        &self,
        file_path: &str,
    ) -> StorageResult<Option<T>> {
        match self.get_file(file_path).await? {
            Some(content) => Ok(Some(serde_json::from_slice(&content)?)),
            None => Ok(None),
        }
    }

    /// Like [`get_file`](Self::get_file), but a missing object is an error.
    pub async fn require_file(&self, file_path: &str) -> StorageResult<Bytes> {
        self.get_file(file_path)
            .await?
            .ok_or_else(|| StorageError::file_required(&self.bucket_name, file_path))
    }

    pub async fn require_file_as_string(&self, file_path: &str) -> StorageResult<String> {
        self.get_file_as_string(file_path)
            .await?
            .ok_or_else(|| StorageError::file_required(&self.bucket_name, file_path))
    }

    pub async fn require_file_as_json<T: DeserializeOwned>(
        &self,
        file_path: &str,
    ) -> StorageResult<T> {
        self.get_file_as_json(file_path)
            .await?
            .ok_or_else(|| StorageError::file_required(&self.bucket_name, file_path))
    }

    pub async fn save_file_as_json<T: Serialize + ?Sized>(
        &self,
        file_path: &str,
        value: &T,
    ) -> StorageResult<()> {
        let content = serde_json::to_vec(value)?;
        self.save_file(file_path, content).await
    }

    // -----------------------------------------------------------------------
    // Bulk helpers
    // -----------------------------------------------------------------------

    /// Download several objects, keeping input order and dropping absent ones.
    pub async fn get_file_entries(&self, file_paths: &[String]) -> StorageResult<Vec<FileEntry>> {
        let reads: Vec<_> = file_paths
            .iter()
            .map(|path| async move {
                let content = self.get_file(path).await?;
                Ok::<_, StorageError>(content.map(|c| FileEntry::new(path.as_str(), c)))
            })
            .collect();
        let found: Vec<Option<FileEntry>> = stream::iter(reads)
            .buffered(self.read_concurrency)
            .try_collect()
            .await?;
        let entries: Vec<FileEntry> = found.into_iter().flatten().collect();
        debug!(
            bucket = %self.bucket_name,
            requested = file_paths.len(),
            found = entries.len(),
            "fetched file entries"
        );
        Ok(entries)
    }

    /// Contents of several objects in input order; absent ones are dropped.
    pub async fn get_file_contents(&self, file_paths: &[String]) -> StorageResult<Vec<Bytes>> {
        let entries = self.get_file_entries(file_paths).await?;
        Ok(entries.into_iter().map(|e| e.content).collect())
    }

    pub async fn get_file_contents_as_json<T: DeserializeOwned>(
        &self,
        file_paths: &[String],
    ) -> StorageResult<Vec<T>> {
        self.get_file_contents(file_paths)
            .await?
            .iter()
            .map(|content| serde_json::from_slice(content).map_err(StorageError::from))
            .collect()
    }

    /// Entries with their content parsed as JSON, as `(path, value)` pairs.
    pub async fn get_file_entries_as_json<T: DeserializeOwned>(
        &self,
        file_paths: &[String],
    ) -> StorageResult<Vec<(String, T)>> {
        self.get_file_entries(file_paths)
            .await?
            .into_iter()
            .map(|entry| -> StorageResult<(String, T)> {
                let value = serde_json::from_slice(&entry.content)?;
                Ok((entry.file_path, value))
            })
            .collect()
    }

    /// Upload several objects concurrently. Stops at the first failure;
    /// objects already written stay written.
    pub async fn save_files(&self, entries: Vec<FileEntry>) -> StorageResult<()> {
        let count = entries.len();
        let writes: Vec<_> = entries
            .into_iter()
            .map(|entry| async move {
                let (path, content) = entry.into_parts();
                self.save_file(&path, content).await
            })
            .collect();
        stream::iter(writes)
            .buffer_unordered(self.write_concurrency)
            .try_collect::<Vec<()>>()
            .await?;
        debug!(bucket = %self.bucket_name, count, "saved files");
        Ok(())
    }
}

impl fmt::Debug for StorageBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageBucket")
            .field("bucket_name", &self.bucket_name)
            .field("read_concurrency", &self.read_concurrency)
            .field("write_concurrency", &self.write_concurrency)
            .finish()
    }
}
