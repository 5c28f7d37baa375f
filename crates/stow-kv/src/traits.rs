//! The [`KeyValueDb`] trait: a minimal key-value database interface.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::KvResult;

/// One stored item: `(id, value)`.
pub type KeyValueTuple = (String, Bytes);

/// A key-value database organised in tables.
///
/// Reads of absent ids are silently dropped, never errors. Streams are lazy
/// and single-pass; `limit` of `None` or `Some(0)` means unlimited.
#[async_trait]
pub trait KeyValueDb: Send + Sync {
    async fn ping(&self) -> KvResult<()>;

    /// Prepare `table` for use. Backends without schemas treat this as a no-op.
    async fn create_table(&self, table: &str) -> KvResult<()>;

    /// Values for `ids`, in input order. Absent ids are omitted.
    async fn get_by_ids(&self, table: &str, ids: &[String]) -> KvResult<Vec<KeyValueTuple>>;

    /// Write every entry, replacing existing values.
    async fn save_batch(&self, table: &str, entries: Vec<KeyValueTuple>) -> KvResult<()>;

    /// Delete `ids`. Missing ids are ignored.
    async fn delete_by_ids(&self, table: &str, ids: &[String]) -> KvResult<()>;

    fn stream_ids<'a>(
        &'a self,
        table: &'a str,
        limit: Option<usize>,
    ) -> BoxStream<'a, KvResult<String>>;

    fn stream_values<'a>(
        &'a self,
        table: &'a str,
        limit: Option<usize>,
    ) -> BoxStream<'a, KvResult<Bytes>>;

    fn stream_entries<'a>(
        &'a self,
        table: &'a str,
        limit: Option<usize>,
    ) -> BoxStream<'a, KvResult<KeyValueTuple>>;

    /// Number of items in `table`.
    async fn count(&self, table: &str) -> KvResult<usize>;

    /// Atomically add `by` to a numeric value and return the result.
    async fn increment(&self, table: &str, id: &str, by: i64) -> KvResult<i64>;
}
