//! Reusable conformance suite for [`KeyValueDb`] implementations.
//!
//! Failures panic, so call it from a test.

use bytes::Bytes;
use futures::TryStreamExt;

use crate::traits::{KeyValueDb, KeyValueTuple};

/// Exercise the basic contract against `table`, which must start out empty.
/// Leaves the table empty again.
pub async fn run_key_value_db_test(db: &dyn KeyValueDb, table: &str) {
    db.ping().await.expect("ping");
    db.create_table(table).await.expect("create_table");
    assert_eq!(db.count(table).await.expect("count"), 0, "table {table} should start empty");

    let entries: Vec<KeyValueTuple> = (1..=3)
        .map(|i| (format!("id{i}"), Bytes::from(format!("value{i}"))))
        .collect();
    let ids: Vec<String> = entries.iter().map(|(id, _)| id.clone()).collect();

    db.save_batch(table, entries.clone()).await.expect("save_batch");
    assert_eq!(db.count(table).await.expect("count"), 3);

    let mut requested = ids.clone();
    requested.push("absent".to_string());
    let got = db.get_by_ids(table, &requested).await.expect("get_by_ids");
    assert_eq!(got, entries);

    let streamed_ids: Vec<String> = db
        .stream_ids(table, None)
        .try_collect()
        .await
        .expect("stream_ids");
    assert_eq!(streamed_ids, ids);

    let values: Vec<Bytes> = db
        .stream_values(table, None)
        .try_collect()
        .await
        .expect("stream_values");
    let expected_values: Vec<Bytes> = entries.iter().map(|(_, v)| v.clone()).collect();
    assert_eq!(values, expected_values);

    let streamed: Vec<KeyValueTuple> = db
        .stream_entries(table, Some(2))
        .try_collect()
        .await
        .expect("stream_entries");
    assert_eq!(streamed, entries[..2]);

    db.delete_by_ids(table, &ids[..1]).await.expect("delete_by_ids");
    assert_eq!(db.count(table).await.expect("count"), 2);
    db.delete_by_ids(table, &ids).await.expect("delete_by_ids");
    assert_eq!(db.count(table).await.expect("count"), 0);
}
