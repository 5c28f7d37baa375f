//! Batched hierarchical composition.
//!
//! Backends can only concatenate a bounded number of objects per native
//! compose call ([`BATCH_SIZE`]). [`combine_files`] lifts that limit: inputs
//! are split into consecutive chunks, every chunk is composed into an
//! intermediate object, and the intermediates are combined again one level
//! up, until a single native compose can produce the destination.
//!
//! With a batch size `B` and maximum depth `D`, at most `B^(D+1)` objects can
//! be combined. Inputs needing more levels are rejected before any object is
//! touched.
//!
//! Every input is deleted once it has been composed, and every intermediate
//! is deleted once the next level has consumed it. A failure aborts the whole
//! operation without restoring what was already deleted.

use std::time::Instant;

use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use stow_types::ListOptions;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::traits::CommonStorage;

/// Maximum number of sources per native compose call.
pub const BATCH_SIZE: usize = 32;

/// Maximum recursion depth of [`combine_files`].
pub const MAX_RECURSION_DEPTH: usize = 10;

/// Chunks composed concurrently within one level.
pub const DEFAULT_COMPOSE_CONCURRENCY: usize = 8;

/// Reserved path prefix for intermediate objects.
pub const INTERMEDIATE_PREFIX: &str = "__stow_compose/";

/// Limits for [`combine_files`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeOptions {
    /// Sources per native compose call. Must not exceed the backend limit.
    pub batch_size: usize,
    pub max_depth: usize,
    /// Chunks composed concurrently within one level.
    pub concurrency: usize,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            batch_size: BATCH_SIZE,
            max_depth: MAX_RECURSION_DEPTH,
            concurrency: DEFAULT_COMPOSE_CONCURRENCY,
        }
    }
}

impl ComposeOptions {
    pub fn validate(&self) -> StorageResult<()> {
        if self.batch_size < 2 {
            return Err(StorageError::Config(format!(
                "compose batch_size must be at least 2, got {}",
                self.batch_size
            )));
        }
        if self.concurrency == 0 {
            return Err(StorageError::Config(
                "compose concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Number of recursion levels above the first needed to combine `count`
/// objects with `batch_size` sources per compose.
///
/// `0` means a single native compose suffices.
pub fn required_depth(count: usize, batch_size: usize) -> usize {
    let batch_size = batch_size.max(2);
    let mut capacity = batch_size;
    let mut depth = 0;
    while count > capacity {
        capacity = capacity.saturating_mul(batch_size);
        depth += 1;
    }
    depth
}

/// Name of the intermediate object for chunk `index` at `depth` of a
/// composition into `to_path`.
pub fn intermediate_path(to_path: &str, depth: usize, index: usize) -> String {
    format!("{INTERMEDIATE_PREFIX}{to_path}/temp_{depth}_{index}")
}

fn is_intermediate(path: &str) -> bool {
    path.starts_with(INTERMEDIATE_PREFIX)
}

/// Combine `file_paths` (in order) into `to_path` in `to_bucket` (defaults to
/// `bucket_name`), then delete them.
///
/// An empty input is a no-op. Intermediate objects live in the destination
/// bucket.
pub async fn combine_files<S>(
    storage: &S,
    bucket_name: &str,
    file_paths: &[String],
    to_path: &str,
    to_bucket: Option<&str>,
    opts: &ComposeOptions,
) -> StorageResult<()>
where
    S: CommonStorage + ?Sized,
{
    opts.validate()?;
    if file_paths.is_empty() {
        debug!(bucket = bucket_name, to_path, "nothing to compose");
        return Ok(());
    }
    if is_intermediate(to_path) {
        return Err(StorageError::Precondition(format!(
            "destination {to_path:?} uses the reserved prefix {INTERMEDIATE_PREFIX:?}"
        )));
    }
    if let Some(path) = file_paths.iter().find(|p| is_intermediate(p)) {
        return Err(StorageError::Precondition(format!(
            "source {path:?} uses the reserved prefix {INTERMEDIATE_PREFIX:?}"
        )));
    }
    let needed = required_depth(file_paths.len(), opts.batch_size);
    if needed > opts.max_depth {
        return Err(StorageError::RecursionLimitExceeded {
            depth: needed,
            max_depth: opts.max_depth,
        });
    }

    let dest_bucket = to_bucket.unwrap_or(bucket_name);
    let mut source_bucket = bucket_name;
    let mut paths: Vec<String> = file_paths.to_vec();
    let mut depth = 0;

    loop {
        if depth > opts.max_depth {
            return Err(StorageError::RecursionLimitExceeded {
                depth,
                max_depth: opts.max_depth,
            });
        }
        debug!(
            depth,
            inputs = paths.len(),
            batch_size = opts.batch_size,
            "composing"
        );

        if paths.len() <= opts.batch_size {
            storage
                .compose(source_bucket, &paths, to_path, Some(dest_bucket))
                .await?;
            // The destination may have been one of the inputs.
            let consumed: Vec<String> = if source_bucket == dest_bucket {
                paths.into_iter().filter(|p| p != to_path).collect()
            } else {
                paths
            };
            storage.delete_files(source_bucket, &consumed).await?;
            info!(
                bucket = dest_bucket,
                to_path,
                sources = file_paths.len(),
                depth,
                "composed"
            );
            return Ok(());
        }

        let started = Instant::now();
        let chunks: Vec<&[String]> = paths.chunks(opts.batch_size).collect();
        // Names are fixed up front so the next level sees chunk order, not
        // completion order.
        let intermediates: Vec<String> = (0..chunks.len())
            .map(|index| intermediate_path(to_path, depth, index))
            .collect();

        // Collected up front: a borrowing `map` closure is not provably `Send`.
        let tasks: Vec<_> = chunks
            .iter()
            .zip(&intermediates)
            .enumerate()
            .map(|(index, (chunk, intermediate))| async move {
                storage
                    .compose(source_bucket, chunk, intermediate, Some(dest_bucket))
                    .await?;
                storage.delete_files(source_bucket, chunk).await?;
                debug!(depth, chunk = index, sources = chunk.len(), "chunk composed");
                Ok::<(), StorageError>(())
            })
            .collect();

        futures::stream::iter(tasks)
            .buffer_unordered(opts.concurrency)
            .try_collect::<Vec<()>>()
            .await?;

        debug!(
            depth,
            intermediates = intermediates.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "level composed"
        );

        paths = intermediates;
        source_bucket = dest_bucket;
        depth += 1;
    }
}

/// List every file under `prefix` and [`combine_files`] them.
///
/// Leftover intermediates of an aborted run are not part of the listing, so
/// a failed combine can be retried as is.
pub async fn combine<S>(
    storage: &S,
    bucket_name: &str,
    prefix: &str,
    to_path: &str,
    to_bucket: Option<&str>,
    opts: &ComposeOptions,
) -> StorageResult<()>
where
    S: CommonStorage + ?Sized,
{
    let file_paths: Vec<String> = storage
        .get_file_names(bucket_name, &ListOptions::prefix(prefix))
        .await?
        .into_iter()
        .filter(|p| !is_intermediate(p))
        .collect();
    combine_files(storage, bucket_name, &file_paths, to_path, to_bucket, opts).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStorage;
    use crate::traits::{ByteReader, ByteWriter};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream::BoxStream;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use stow_types::{FileEntry, SignedUrlExpiry};

    const BUCKET: &str = "TEST_BUCKET";

    async fn seed(storage: &InMemoryStorage, bucket: &str, count: usize) -> (Vec<String>, Vec<u8>) {
        let mut paths = Vec::with_capacity(count);
        let mut expected = Vec::new();
        for i in 0..count {
            let path = format!("parts/part_{i:04}");
            let content = format!("<{i}>");
            expected.extend_from_slice(content.as_bytes());
            storage
                .save_file(bucket, &path, Bytes::from(content))
                .await
                .unwrap();
            paths.push(path);
        }
        (paths, expected)
    }

    // -----------------------------------------------------------------------
    // Depth math
    // -----------------------------------------------------------------------

    #[test]
    fn required_depth_boundaries() {
        assert_eq!(required_depth(0, 32), 0);
        assert_eq!(required_depth(32, 32), 0);
        assert_eq!(required_depth(33, 32), 1);
        assert_eq!(required_depth(1024, 32), 1);
        assert_eq!(required_depth(1025, 32), 2);
        assert_eq!(required_depth(5, 2), 2);
    }

    #[test]
    fn intermediate_names_are_distinct_per_level_and_chunk() {
        let a = intermediate_path("out.bin", 0, 1);
        let b = intermediate_path("out.bin", 1, 0);
        assert_ne!(a, b);
        assert!(a.starts_with(INTERMEDIATE_PREFIX));
        assert_eq!(intermediate_path("out.bin", 2, 3), intermediate_path("out.bin", 2, 3));
    }

    #[test]
    fn options_reject_degenerate_batches() {
        let opts = ComposeOptions {
            batch_size: 1,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
        assert!(ComposeOptions::default().validate().is_ok());
    }

    proptest! {
        #[test]
        fn required_depth_capacity_covers_count(count in 0usize..100_000, batch in 2usize..64) {
            let depth = required_depth(count, batch);
            let capacity = (batch as u128).pow(depth as u32 + 1);
            prop_assert!(count as u128 <= capacity);
            if depth > 0 {
                prop_assert!(count as u128 > (batch as u128).pow(depth as u32));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Combining
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn empty_input_is_noop() {
        let storage = InMemoryStorage::new();
        combine_files(&storage, BUCKET, &[], "out", None, &ComposeOptions::default())
            .await
            .unwrap();
        assert!(!storage.file_exists(BUCKET, "out").await.unwrap());
    }

    #[tokio::test]
    async fn single_batch_concatenates_and_cleans_up() {
        let storage = InMemoryStorage::new();
        let (paths, expected) = seed(&storage, BUCKET, 3).await;

        storage.combine_files(BUCKET, &paths, "out", None).await.unwrap();

        let out = storage.get_file(BUCKET, "out").await.unwrap().unwrap();
        assert_eq!(out.as_ref(), expected.as_slice());
        for p in &paths {
            assert!(!storage.file_exists(BUCKET, p).await.unwrap());
        }
        assert_eq!(storage.file_count(BUCKET).unwrap(), 1);
    }

    #[tokio::test]
    async fn hundred_files_exceed_native_limit_transparently() {
        // The in-memory native compose rejects more than 32 sources.
        let storage = InMemoryStorage::new();
        let (paths, expected) = seed(&storage, BUCKET, 100).await;

        storage
            .combine_files(BUCKET, &paths, "merged/all.txt", None)
            .await
            .unwrap();

        let out = storage
            .get_file(BUCKET, "merged/all.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.as_ref(), expected.as_slice());
        // Sources and intermediates are gone.
        assert_eq!(
            storage.get_file_names(BUCKET, &ListOptions::default()).await.unwrap(),
            vec!["merged/all.txt".to_string()]
        );
    }

    #[tokio::test]
    async fn multi_level_preserves_order() {
        let storage = InMemoryStorage::new();
        let (paths, expected) = seed(&storage, BUCKET, 27).await;
        let opts = ComposeOptions {
            batch_size: 3,
            max_depth: 2,
            concurrency: 4,
        };

        combine_files(&storage, BUCKET, &paths, "out", None, &opts)
            .await
            .unwrap();

        let out = storage.get_file(BUCKET, "out").await.unwrap().unwrap();
        assert_eq!(out.as_ref(), expected.as_slice());
        assert_eq!(storage.file_count(BUCKET).unwrap(), 1);
    }

    #[tokio::test]
    async fn depth_limit_fails_before_any_write() {
        let storage = InMemoryStorage::new();
        let (paths, _) = seed(&storage, BUCKET, 5).await;
        let opts = ComposeOptions {
            batch_size: 2,
            max_depth: 1,
            concurrency: 2,
        };

        let err = combine_files(&storage, BUCKET, &paths, "out", None, &opts)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::RecursionLimitExceeded { depth: 2, max_depth: 1 }
        ));
        assert!(!storage.file_exists(BUCKET, "out").await.unwrap());
        for p in &paths {
            assert!(storage.file_exists(BUCKET, p).await.unwrap());
        }
    }

    #[tokio::test]
    async fn into_other_bucket() {
        let storage = InMemoryStorage::new();
        let (paths, expected) = seed(&storage, BUCKET, 40).await;

        storage
            .combine_files(BUCKET, &paths, "out", Some("OTHER"))
            .await
            .unwrap();

        let out = storage.get_file("OTHER", "out").await.unwrap().unwrap();
        assert_eq!(out.as_ref(), expected.as_slice());
        assert_eq!(storage.file_count(BUCKET).unwrap(), 0);
        assert_eq!(storage.file_count("OTHER").unwrap(), 1);
    }

    #[tokio::test]
    async fn destination_among_sources_survives() {
        let storage = InMemoryStorage::new();
        storage.save_file(BUCKET, "log", Bytes::from_static(b"a")).await.unwrap();
        storage.save_file(BUCKET, "log.1", Bytes::from_static(b"b")).await.unwrap();

        storage
            .combine_files(BUCKET, &["log".to_string(), "log.1".to_string()], "log", None)
            .await
            .unwrap();

        let out = storage.get_file(BUCKET, "log").await.unwrap().unwrap();
        assert_eq!(out.as_ref(), b"ab");
        assert!(!storage.file_exists(BUCKET, "log.1").await.unwrap());
    }

    #[tokio::test]
    async fn missing_source_aborts() {
        let storage = InMemoryStorage::new();
        let (mut paths, _) = seed(&storage, BUCKET, 2).await;
        paths.push("parts/missing".to_string());

        let err = storage
            .combine_files(BUCKET, &paths, "out", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
        assert!(!storage.file_exists(BUCKET, "out").await.unwrap());
    }

    #[tokio::test]
    async fn reserved_prefix_rejected() {
        let storage = InMemoryStorage::new();
        let err = storage
            .combine_files(BUCKET, &[format!("{INTERMEDIATE_PREFIX}x")], "out", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Precondition(_)));
    }

    #[tokio::test]
    async fn combine_by_prefix() {
        let storage = InMemoryStorage::new();
        let (_, expected) = seed(&storage, BUCKET, 50).await;
        storage
            .save_file(BUCKET, "other/keep", Bytes::from_static(b"keep"))
            .await
            .unwrap();

        storage.combine(BUCKET, "parts/", "out", None).await.unwrap();

        let out = storage.get_file(BUCKET, "out").await.unwrap().unwrap();
        assert_eq!(out.as_ref(), expected.as_slice());
        assert!(storage.file_exists(BUCKET, "other/keep").await.unwrap());
        assert_eq!(storage.file_count(BUCKET).unwrap(), 2);
    }

    // -----------------------------------------------------------------------
    // Out-of-order completion
    // -----------------------------------------------------------------------

    /// Delays each native compose less than the previous one, so chunks
    /// started first finish last.
    struct SlowFirstStorage {
        inner: InMemoryStorage,
        calls: AtomicUsize,
        completed: Mutex<Vec<String>>,
    }

    impl SlowFirstStorage {
        fn new() -> Self {
            Self {
                inner: InMemoryStorage::new(),
                calls: AtomicUsize::new(0),
                completed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommonStorage for SlowFirstStorage {
        async fn ping(&self, bucket_name: Option<&str>) -> StorageResult<()> {
            self.inner.ping(bucket_name).await
        }

        async fn file_exists(&self, bucket_name: &str, file_path: &str) -> StorageResult<bool> {
            self.inner.file_exists(bucket_name, file_path).await
        }

        async fn get_file(
            &self,
            bucket_name: &str,
            file_path: &str,
        ) -> StorageResult<Option<Bytes>> {
            self.inner.get_file(bucket_name, file_path).await
        }

        async fn save_file(
            &self,
            bucket_name: &str,
            file_path: &str,
            content: Bytes,
        ) -> StorageResult<()> {
            self.inner.save_file(bucket_name, file_path, content).await
        }

        async fn delete_paths(&self, bucket_name: &str, prefixes: &[String]) -> StorageResult<()> {
            self.inner.delete_paths(bucket_name, prefixes).await
        }

        async fn delete_files(
            &self,
            bucket_name: &str,
            file_paths: &[String],
        ) -> StorageResult<()> {
            self.inner.delete_files(bucket_name, file_paths).await
        }

        async fn get_file_names(
            &self,
            bucket_name: &str,
            opts: &ListOptions,
        ) -> StorageResult<Vec<String>> {
            self.inner.get_file_names(bucket_name, opts).await
        }

        fn get_file_names_stream<'a>(
            &'a self,
            bucket_name: &'a str,
            opts: ListOptions,
        ) -> BoxStream<'a, StorageResult<String>> {
            self.inner.get_file_names_stream(bucket_name, opts)
        }

        fn get_files_stream<'a>(
            &'a self,
            bucket_name: &'a str,
            opts: ListOptions,
        ) -> BoxStream<'a, StorageResult<FileEntry>> {
            self.inner.get_files_stream(bucket_name, opts)
        }

        async fn get_file_read_stream(
            &self,
            bucket_name: &str,
            file_path: &str,
        ) -> StorageResult<Option<ByteReader>> {
            self.inner.get_file_read_stream(bucket_name, file_path).await
        }

        async fn get_file_write_stream(
            &self,
            bucket_name: &str,
            file_path: &str,
        ) -> StorageResult<ByteWriter> {
            self.inner.get_file_write_stream(bucket_name, file_path).await
        }

        async fn set_file_visibility(
            &self,
            bucket_name: &str,
            file_path: &str,
            is_public: bool,
        ) -> StorageResult<()> {
            self.inner
                .set_file_visibility(bucket_name, file_path, is_public)
                .await
        }

        async fn get_file_visibility(
            &self,
            bucket_name: &str,
            file_path: &str,
        ) -> StorageResult<bool> {
            self.inner.get_file_visibility(bucket_name, file_path).await
        }

        async fn copy_file(
            &self,
            from_bucket: &str,
            from_path: &str,
            to_path: &str,
            to_bucket: Option<&str>,
        ) -> StorageResult<()> {
            self.inner
                .copy_file(from_bucket, from_path, to_path, to_bucket)
                .await
        }

        async fn move_file(
            &self,
            from_bucket: &str,
            from_path: &str,
            to_path: &str,
            to_bucket: Option<&str>,
        ) -> StorageResult<()> {
            self.inner
                .move_file(from_bucket, from_path, to_path, to_bucket)
                .await
        }

        async fn move_path(
            &self,
            from_bucket: &str,
            from_prefix: &str,
            to_prefix: &str,
            to_bucket: Option<&str>,
        ) -> StorageResult<()> {
            self.inner
                .move_path(from_bucket, from_prefix, to_prefix, to_bucket)
                .await
        }

        async fn get_signed_url(
            &self,
            bucket_name: &str,
            file_path: &str,
            expires: SignedUrlExpiry,
        ) -> StorageResult<String> {
            self.inner.get_signed_url(bucket_name, file_path, expires).await
        }

        async fn compose(
            &self,
            bucket_name: &str,
            file_paths: &[String],
            to_path: &str,
            to_bucket: Option<&str>,
        ) -> StorageResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let delay_ms = 15 * 8usize.saturating_sub(call) as u64;
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            self.inner
                .compose(bucket_name, file_paths, to_path, to_bucket)
                .await?;
            self.completed.lock().unwrap().push(to_path.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn order_follows_input_not_completion() {
        let storage = SlowFirstStorage::new();
        let (paths, expected) = seed(&storage.inner, BUCKET, 100).await;

        storage.combine_files(BUCKET, &paths, "out", None).await.unwrap();

        let completed = storage.completed.lock().unwrap().clone();
        let first_level: Vec<String> = (0..4)
            .rev()
            .map(|i| intermediate_path("out", 0, i))
            .collect();
        assert_eq!(completed[..4], first_level[..], "chunks should finish in reverse order");
        assert_eq!(completed[4], "out");

        let out = storage.inner.get_file(BUCKET, "out").await.unwrap().unwrap();
        assert_eq!(out.as_ref(), expected.as_slice());
        assert_eq!(storage.inner.file_count(BUCKET).unwrap(), 1);
    }

    #[tokio::test]
    async fn combine_skips_leftover_intermediates() {
        let storage = InMemoryStorage::new();
        let (_, expected) = seed(&storage, BUCKET, 3).await;
        let leftover = intermediate_path("out", 0, 0);
        storage
            .save_file(BUCKET, &leftover, Bytes::from_static(b"stale"))
            .await
            .unwrap();

        storage.combine(BUCKET, "", "out", None).await.unwrap();

        let out = storage.get_file(BUCKET, "out").await.unwrap().unwrap();
        assert_eq!(out.as_ref(), expected.as_slice());
        assert!(storage.file_exists(BUCKET, &leftover).await.unwrap());
    }
}
