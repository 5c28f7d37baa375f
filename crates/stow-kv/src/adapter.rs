use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use stow_store::CommonStorage;
use stow_types::ListOptions;
use tracing::debug;

use crate::error::{KvError, KvResult};
use crate::table::{resolve_table, TableLocation};
use crate::traits::{KeyValueDb, KeyValueTuple};

/// Concurrent storage requests per batch operation.
pub const DEFAULT_KV_CONCURRENCY: usize = 16;

fn default_concurrency() -> usize {
    DEFAULT_KV_CONCURRENCY
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueDbConfig {
    /// Bucket used by tables without a `bucket.` override.
    pub bucket_name: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl KeyValueDbConfig {
    pub fn new(bucket_name: impl Into<String>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            concurrency: DEFAULT_KV_CONCURRENCY,
        }
    }
}

/// [`KeyValueDb`] backed by a [`CommonStorage`].
///
/// Each table is a folder and each item a file named by its id, holding the
/// raw value.
pub struct StorageKeyValueDb {
    storage: Arc<dyn CommonStorage>,
    config: KeyValueDbConfig,
}

impl StorageKeyValueDb {
    pub fn new(storage: Arc<dyn CommonStorage>, config: KeyValueDbConfig) -> Self {
        Self { storage, config }
    }

    pub fn config(&self) -> &KeyValueDbConfig {
        &self.config
    }

    fn location<'a>(&'a self, table: &'a str) -> KvResult<TableLocation<'a>> {
        resolve_table(table, &self.config.bucket_name)
    }

    fn concurrency(&self) -> usize {
        self.config.concurrency.max(1)
    }

    fn list_options(location: &TableLocation<'_>, limit: Option<usize>) -> ListOptions {
        ListOptions {
            limit,
            ..ListOptions::prefix(location.folder())
        }
    }

    /// Full-path file stream of a table, with paths rewritten to ids.
    fn table_entries<'a>(
        &'a self,
        table: &'a str,
        limit: Option<usize>,
    ) -> BoxStream<'a, KvResult<KeyValueTuple>> {
        let location = match self.location(table) {
            Ok(location) => location,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };
        self.storage
            .get_files_stream(location.bucket_name, Self::list_options(&location, limit))
            .map_err(KvError::from)
            .try_filter_map(move |entry| async move {
                let (path, content) = entry.into_parts();
                Ok::<_, KvError>(location.id_of(&path).map(|id| (id.to_string(), content)))
            })
            .boxed()
    }
}

impl fmt::Debug for StorageKeyValueDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageKeyValueDb")
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl KeyValueDb for StorageKeyValueDb {
    async fn ping(&self) -> KvResult<()> {
        self.storage.ping(Some(&self.config.bucket_name)).await?;
        Ok(())
    }

    async fn create_table(&self, table: &str) -> KvResult<()> {
        self.location(table)?;
        Ok(())
    }

    async fn get_by_ids(&self, table: &str, ids: &[String]) -> KvResult<Vec<KeyValueTuple>> {
        let location = self.location(table)?;
        let reads: Vec<_> = ids
            .iter()
            .map(|id| async move {
                let content = self
                    .storage
                    .get_file(location.bucket_name, &location.path_for(id))
                    .await?;
                Ok::<_, KvError>(content.map(|c| (id.clone(), c)))
            })
            .collect();
        let found: Vec<Option<KeyValueTuple>> = stream::iter(reads)
            .buffered(self.concurrency())
            .try_collect()
            .await?;
        Ok(found.into_iter().flatten().collect())
    }

    async fn save_batch(&self, table: &str, entries: Vec<KeyValueTuple>) -> KvResult<()> {
        let location = self.location(table)?;
        let count = entries.len();
        let writes: Vec<_> = entries
            .into_iter()
            .map(|(id, content)| async move {
                self.storage
                    .save_file(location.bucket_name, &location.path_for(&id), content)
                    .await
            })
            .collect();
        stream::iter(writes)
            .buffer_unordered(self.concurrency())
            .try_collect::<Vec<()>>()
            .await?;
        debug!(
            bucket = location.bucket_name,
            table = location.prefix,
            count,
            "saved batch"
        );
        Ok(())
    }

    async fn delete_by_ids(&self, table: &str, ids: &[String]) -> KvResult<()> {
        let location = self.location(table)?;
        let paths: Vec<String> = ids.iter().map(|id| location.path_for(id)).collect();
        self.storage
            .delete_files(location.bucket_name, &paths)
            .await?;
        debug!(
            bucket = location.bucket_name,
            table = location.prefix,
            count = ids.len(),
            "deleted ids"
        );
        Ok(())
    }

    fn stream_ids<'a>(
        &'a self,
        table: &'a str,
        limit: Option<usize>,
    ) -> BoxStream<'a, KvResult<String>> {
        let location = match self.location(table) {
            Ok(location) => location,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };
        self.storage
            .get_file_names_stream(location.bucket_name, Self::list_options(&location, limit))
            .map_err(KvError::from)
            .try_filter_map(move |path| async move {
                Ok::<_, KvError>(location.id_of(&path).map(str::to_string))
            })
            .boxed()
    }

    fn stream_values<'a>(
        &'a self,
        table: &'a str,
        limit: Option<usize>,
    ) -> BoxStream<'a, KvResult<Bytes>> {
        self.table_entries(table, limit)
            .map_ok(|(_, content)| content)
            .boxed()
    }

    fn stream_entries<'a>(
        &'a self,
        table: &'a str,
        limit: Option<usize>,
    ) -> BoxStream<'a, KvResult<KeyValueTuple>> {
        self.table_entries(table, limit)
    }

    async fn count(&self, table: &str) -> KvResult<usize> {
        let location = self.location(table)?;
        let names = self
            .storage
            .get_file_names(location.bucket_name, &Self::list_options(&location, None))
            .await?;
        Ok(names.len())
    }

    async fn increment(&self, _table: &str, _id: &str, _by: i64) -> KvResult<i64> {
        Err(KvError::Unsupported {
            operation: "increment",
        })
    }
}
