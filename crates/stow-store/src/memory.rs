//! In-memory reference backend for tests and as a semantics oracle.
//!
//! [`InMemoryStorage`] keeps every bucket in a nested sorted map plus a
//! parallel visibility map. State lives exactly as long as the instance;
//! there is no process-wide store.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use stow_types::{select_file_names, validate_path, FileEntry, ListOptions, SignedUrlExpiry};
use tokio::io::AsyncWrite;
use tracing::debug;

use crate::compose::{ComposeOptions, BATCH_SIZE};
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::traits::{check_folder_prefixes, ByteReader, ByteWriter, CommonStorage};

/// `data[bucket][path] = content`
type BucketMap = BTreeMap<String, BTreeMap<String, Bytes>>;

/// `public[bucket][path] = is_public`
type VisibilityMap = HashMap<String, HashMap<String, bool>>;

fn read_lock<T>(lock: &RwLock<T>) -> StorageResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|e| StorageError::Backend(format!("lock poisoned: {e}")))
}

fn write_lock<T>(lock: &RwLock<T>) -> StorageResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|e| StorageError::Backend(format!("lock poisoned: {e}")))
}

/// Set or clear (`None`) the flag of one path.
fn set_flag(public: &mut VisibilityMap, bucket_name: &str, file_path: &str, flag: Option<bool>) {
    match flag {
        Some(is_public) => {
            public
                .entry(bucket_name.to_string())
                .or_default()
                .insert(file_path.to_string(), is_public);
        }
        None => {
            if let Some(files) = public.get_mut(bucket_name) {
                files.remove(file_path);
            }
        }
    }
}

/// In-memory implementation of [`CommonStorage`].
///
/// Native [`compose`](CommonStorage::compose) enforces the same fan-in limit
/// as cloud backends ([`BATCH_SIZE`] by default), so composition code tested
/// here behaves the same against a real bucket.
pub struct InMemoryStorage {
    data: Arc<RwLock<BucketMap>>,
    public: RwLock<VisibilityMap>,
    config: StorageConfig,
    compose_limit: usize,
}

impl InMemoryStorage {
    /// Create an empty store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StorageConfig::default())
    }

    pub fn with_config(config: StorageConfig) -> Self {
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            public: RwLock::new(HashMap::new()),
            config,
            compose_limit: BATCH_SIZE,
        }
    }

    /// Override the maximum number of sources accepted by native compose.
    pub fn with_compose_limit(mut self, limit: usize) -> Self {
        self.compose_limit = limit;
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Names of all buckets that have been written to, sorted.
    pub fn bucket_names(&self) -> StorageResult<Vec<String>> {
        Ok(read_lock(&self.data)?.keys().cloned().collect())
    }

    pub fn bucket_names_stream(&self) -> BoxStream<'static, StorageResult<String>> {
        match self.bucket_names() {
            Ok(names) => stream::iter(names.into_iter().map(Ok)).boxed(),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }

    /// Number of objects in `bucket_name` (folder markers included).
    pub fn file_count(&self, bucket_name: &str) -> StorageResult<usize> {
        Ok(read_lock(&self.data)?
            .get(bucket_name)
            .map_or(0, BTreeMap::len))
    }

    /// Remove every bucket, object and visibility flag.
    pub fn clear(&self) -> StorageResult<()> {
        write_lock(&self.data)?.clear();
        write_lock(&self.public)?.clear();
        Ok(())
    }

    /// Visibility flags follow their object: deleted objects lose them.
    fn forget_visibility(&self, bucket_name: &str, file_paths: &[String]) -> StorageResult<()> {
        let mut public = write_lock(&self.public)?;
        for path in file_paths {
            set_flag(&mut public, bucket_name, path, None);
        }
        Ok(())
    }

    /// Relocate flags from `from_bucket` to `to_bucket` for `(from, to)` moves.
    fn carry_visibility(
        &self,
        from_bucket: &str,
        to_bucket: &str,
        moves: &[(String, String)],
    ) -> StorageResult<()> {
        let mut public = write_lock(&self.public)?;
        // Take every flag before setting any, so overlapping renames such as
        // `a/` to `a/b/` cannot clobber each other.
        let flags: Vec<Option<bool>> = moves
            .iter()
            .map(|(from_path, _)| {
                public
                    .get_mut(from_bucket)
                    .and_then(|files| files.remove(from_path))
            })
            .collect();
        for ((_, to_path), flag) in moves.iter().zip(flags) {
            set_flag(&mut public, to_bucket, to_path, flag);
        }
        Ok(())
    }

    fn snapshot_entries(
        &self,
        bucket_name: &str,
        opts: &ListOptions,
    ) -> StorageResult<Vec<FileEntry>> {
        let data = read_lock(&self.data)?;
        let limit = opts.effective_limit().unwrap_or(usize::MAX);
        Ok(data
            .get(bucket_name)
            .map(|files| {
                files
                    .iter()
                    .filter_map(|(path, content)| {
                        opts.normalize(path)
                            .map(|name| FileEntry::new(name, content.clone()))
                    })
                    .take(limit)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn transfer(
        &self,
        from_bucket: &str,
        from_path: &str,
        to_path: &str,
        to_bucket: Option<&str>,
        remove_source: bool,
    ) -> StorageResult<()> {
        validate_path(to_path)?;
        let to_bucket = to_bucket.unwrap_or(from_bucket);
        let mut data = write_lock(&self.data)?;
        let content = data
            .get(from_bucket)
            .and_then(|files| files.get(from_path))
            .cloned()
            .ok_or_else(|| StorageError::not_found(from_bucket, from_path))?;
        if remove_source {
            if let Some(files) = data.get_mut(from_bucket) {
                files.remove(from_path);
            }
        }
        data.entry(to_bucket.to_string())
            .or_default()
            .insert(to_path.to_string(), content);
        drop(data);

        if remove_source {
            self.carry_visibility(
                from_bucket,
                to_bucket,
                &[(from_path.to_string(), to_path.to_string())],
            )
        } else if (to_bucket, to_path) != (from_bucket, from_path) {
            // A copy is a new object and starts out private.
            self.forget_visibility(to_bucket, &[to_path.to_string()])
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buckets = self.data.read().map(|d| d.len()).unwrap_or_default();
        f.debug_struct("InMemoryStorage")
            .field("bucket_count", &buckets)
            .field("compose_limit", &self.compose_limit)
            .finish()
    }
}

#[async_trait]
impl CommonStorage for InMemoryStorage {
    async fn ping(&self, _bucket_name: Option<&str>) -> StorageResult<()> {
        Ok(())
    }

    async fn file_exists(&self, bucket_name: &str, file_path: &str) -> StorageResult<bool> {
        let data = read_lock(&self.data)?;
        Ok(data
            .get(bucket_name)
            .is_some_and(|files| files.contains_key(file_path)))
    }

    async fn get_file(&self, bucket_name: &str, file_path: &str) -> StorageResult<Option<Bytes>> {
        let data = read_lock(&self.data)?;
        Ok(data
            .get(bucket_name)
            .and_then(|files| files.get(file_path))
            .cloned())
    }

    async fn save_file(
        &self,
        bucket_name: &str,
        file_path: &str,
        content: Bytes,
    ) -> StorageResult<()> {
        validate_path(file_path)?;
        write_lock(&self.data)?
            .entry(bucket_name.to_string())
            .or_default()
            .insert(file_path.to_string(), content);
        Ok(())
    }

    async fn delete_paths(&self, bucket_name: &str, prefixes: &[String]) -> StorageResult<()> {
        let mut data = write_lock(&self.data)?;
        let Some(files) = data.get_mut(bucket_name) else {
            return Ok(());
        };
        let removed: Vec<String> = files
            .keys()
            .filter(|path| prefixes.iter().any(|prefix| path.starts_with(prefix.as_str())))
            .cloned()
            .collect();
        for path in &removed {
            files.remove(path);
        }
        drop(data);
        debug!(
            bucket = bucket_name,
            prefixes = prefixes.len(),
            deleted = removed.len(),
            "deleted paths"
        );
        self.forget_visibility(bucket_name, &removed)
    }

    async fn delete_files(&self, bucket_name: &str, file_paths: &[String]) -> StorageResult<()> {
        {
            let mut data = write_lock(&self.data)?;
            if let Some(files) = data.get_mut(bucket_name) {
                for path in file_paths {
                    files.remove(path);
                }
            }
        }
        self.forget_visibility(bucket_name, file_paths)
    }

    async fn get_file_names(
        &self,
        bucket_name: &str,
        opts: &ListOptions,
    ) -> StorageResult<Vec<String>> {
        let data = read_lock(&self.data)?;
        Ok(data
            .get(bucket_name)
            .map(|files| select_file_names(files.keys(), opts))
            .unwrap_or_default())
    }

    fn get_file_names_stream<'a>(
        &'a self,
        bucket_name: &'a str,
        opts: ListOptions,
    ) -> BoxStream<'a, StorageResult<String>> {
        let names = read_lock(&self.data).map(|data| {
            data.get(bucket_name)
                .map(|files| select_file_names(files.keys(), &opts))
                .unwrap_or_default()
        });
        match names {
            Ok(names) => stream::iter(names.into_iter().map(Ok)).boxed(),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }

    fn get_files_stream<'a>(
        &'a self,
        bucket_name: &'a str,
        opts: ListOptions,
    ) -> BoxStream<'a, StorageResult<FileEntry>> {
        match self.snapshot_entries(bucket_name, &opts) {
            Ok(entries) => stream::iter(entries.into_iter().map(Ok)).boxed(),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }

    async fn get_file_read_stream(
        &self,
        bucket_name: &str,
        file_path: &str,
    ) -> StorageResult<Option<ByteReader>> {
        let content = self.get_file(bucket_name, file_path).await?;
        Ok(content.map(|c| Box::new(io::Cursor::new(c)) as ByteReader))
    }

    async fn get_file_write_stream(
        &self,
        bucket_name: &str,
        file_path: &str,
    ) -> StorageResult<ByteWriter> {
        validate_path(file_path)?;
        Ok(Box::new(MemoryFileWriter {
            data: Arc::clone(&self.data),
            bucket_name: bucket_name.to_string(),
            file_path: file_path.to_string(),
            buf: Vec::new(),
            committed: false,
        }))
    }

    async fn set_file_visibility(
        &self,
        bucket_name: &str,
        file_path: &str,
        is_public: bool,
    ) -> StorageResult<()> {
        write_lock(&self.public)?
            .entry(bucket_name.to_string())
            .or_default()
            .insert(file_path.to_string(), is_public);
        Ok(())
    }

    async fn get_file_visibility(&self, bucket_name: &str, file_path: &str) -> StorageResult<bool> {
        let public = read_lock(&self.public)?;
        Ok(public
            .get(bucket_name)
            .and_then(|files| files.get(file_path))
            .copied()
            .unwrap_or(false))
    }

    async fn copy_file(
        &self,
        from_bucket: &str,
        from_path: &str,
        to_path: &str,
        to_bucket: Option<&str>,
    ) -> StorageResult<()> {
        self.transfer(from_bucket, from_path, to_path, to_bucket, false)
    }

    async fn move_file(
        &self,
        from_bucket: &str,
        from_path: &str,
        to_path: &str,
        to_bucket: Option<&str>,
    ) -> StorageResult<()> {
        self.transfer(from_bucket, from_path, to_path, to_bucket, true)
    }

    async fn move_path(
        &self,
        from_bucket: &str,
        from_prefix: &str,
        to_prefix: &str,
        to_bucket: Option<&str>,
    ) -> StorageResult<()> {
        check_folder_prefixes(from_prefix, to_prefix)?;
        let to_bucket = to_bucket.unwrap_or(from_bucket);
        let mut data = write_lock(&self.data)?;
        let Some(files) = data.get_mut(from_bucket) else {
            return Ok(());
        };
        let moving: Vec<String> = files
            .keys()
            .filter(|path| path.starts_with(from_prefix))
            .cloned()
            .collect();
        let mut moved = Vec::with_capacity(moving.len());
        let mut renames = Vec::with_capacity(moving.len());
        for path in moving {
            if let Some(content) = files.remove(&path) {
                let target = format!("{to_prefix}{}", &path[from_prefix.len()..]);
                moved.push((target.clone(), content));
                renames.push((path, target));
            }
        }
        debug!(
            from_bucket,
            from_prefix,
            to_bucket,
            to_prefix,
            count = moved.len(),
            "moved path"
        );
        data.entry(to_bucket.to_string()).or_default().extend(moved);
        drop(data);
        self.carry_visibility(from_bucket, to_bucket, &renames)
    }

    async fn get_signed_url(
        &self,
        bucket_name: &str,
        file_path: &str,
        expires: SignedUrlExpiry,
    ) -> StorageResult<String> {
        let content = self
            .get_file(bucket_name, file_path)
            .await?
            .ok_or_else(|| StorageError::not_found(bucket_name, file_path))?;
        let expires = expires.resolve(Utc::now(), self.config.signed_url.max_horizon_secs)?;
        let signature = hex::encode(blake3::hash(&content).as_bytes());
        Ok(format!(
            "https://{}/{}/{}?expires={}&signature={}",
            self.config.signed_url.host,
            bucket_name,
            file_path,
            expires.timestamp(),
            signature
        ))
    }

    async fn compose(
        &self,
        bucket_name: &str,
        file_paths: &[String],
        to_path: &str,
        to_bucket: Option<&str>,
    ) -> StorageResult<()> {
        if file_paths.len() > self.compose_limit {
            return Err(StorageError::ComposeLimitExceeded {
                count: file_paths.len(),
                max: self.compose_limit,
            });
        }
        validate_path(to_path)?;
        let to_bucket = to_bucket.unwrap_or(bucket_name);
        let mut data = write_lock(&self.data)?;
        let mut combined = Vec::new();
        {
            let files = data.get(bucket_name);
            for path in file_paths {
                let content = files
                    .and_then(|f| f.get(path))
                    .ok_or_else(|| StorageError::not_found(bucket_name, path))?;
                combined.extend_from_slice(content);
            }
        }
        data.entry(to_bucket.to_string())
            .or_default()
            .insert(to_path.to_string(), Bytes::from(combined));
        Ok(())
    }

    /// The configured options, with the batch size capped at the native
    /// compose limit.
    fn compose_options(&self) -> ComposeOptions {
        ComposeOptions {
            batch_size: self.config.compose.batch_size.min(self.compose_limit),
            ..self.config.compose.clone()
        }
    }
}

/// Buffers written bytes and stores them as one object on shutdown.
struct MemoryFileWriter {
    data: Arc<RwLock<BucketMap>>,
    bucket_name: String,
    file_path: String,
    buf: Vec<u8>,
    committed: bool,
}

impl MemoryFileWriter {
    fn commit(&mut self) -> io::Result<()> {
        let content = Bytes::from(std::mem::take(&mut self.buf));
        let mut data = self
            .data
            .write()
            .map_err(|e| io::Error::other(format!("lock poisoned: {e}")))?;
        data.entry(self.bucket_name.clone())
            .or_default()
            .insert(self.file_path.clone(), content);
        self.committed = true;
        Ok(())
    }
}

impl AsyncWrite for MemoryFileWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.committed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write stream already shut down",
            )));
        }
        self.buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.committed {
            return Poll::Ready(Ok(()));
        }
        Poll::Ready(self.commit())
    }
}
