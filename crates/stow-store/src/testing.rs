//! Reusable conformance suite for [`CommonStorage`] backends.
//!
//! Enabled in-crate for tests and for downstream crates through the
//! `testing` feature. Failures panic, so call it from a test.

use bytes::Bytes;
use futures::TryStreamExt;
use stow_types::{FileEntry, ListOptions};

use crate::traits::CommonStorage;

const SCENARIO_PREFIX: &str = "test/subdir";

/// Exercise the basic contract against `bucket_name`, which must start out
/// empty. Leaves the bucket empty again.
pub async fn run_common_storage_test(storage: &dyn CommonStorage, bucket_name: &str) {
    storage.ping(Some(bucket_name)).await.expect("ping");

    let all = storage
        .get_file_names(bucket_name, &ListOptions::default())
        .await
        .expect("initial listing");
    assert!(all.is_empty(), "bucket {bucket_name} should start empty, found {all:?}");

    let paths: Vec<String> = (1..=3)
        .map(|i| format!("{SCENARIO_PREFIX}/file_{i}.json"))
        .collect();
    for (i, path) in paths.iter().enumerate() {
        let content = Bytes::from(format!("{{\"n\":{}}}", i + 1));
        storage
            .save_file(bucket_name, path, content)
            .await
            .expect("save_file");
    }
    // Folder markers are never listed.
    storage
        .save_file(bucket_name, &format!("{SCENARIO_PREFIX}/"), Bytes::new())
        .await
        .expect("save folder marker");

    let opts = ListOptions::prefix(SCENARIO_PREFIX);
    let listed = storage
        .get_file_names(bucket_name, &opts)
        .await
        .expect("get_file_names");
    assert_eq!(listed, paths);

    let streamed: Vec<String> = storage
        .get_file_names_stream(bucket_name, opts.clone())
        .try_collect()
        .await
        .expect("get_file_names_stream");
    assert_eq!(streamed, paths);

    let short: Vec<FileEntry> = storage
        .get_files_stream(bucket_name, opts.clone().file_names_only())
        .try_collect()
        .await
        .expect("get_files_stream");
    let short_names: Vec<&str> = short.iter().map(|e| e.file_path.as_str()).collect();
    assert_eq!(short_names, ["file_1.json", "file_2.json", "file_3.json"]);
    assert_eq!(short[0].content.as_ref(), b"{\"n\":1}");

    let limited = storage
        .get_file_names(bucket_name, &opts.clone().with_limit(2))
        .await
        .expect("limited listing");
    assert_eq!(limited, paths[..2]);

    for path in &paths {
        assert!(storage.file_exists(bucket_name, path).await.expect("file_exists"));
        let content = storage.get_file(bucket_name, path).await.expect("get_file");
        assert!(content.is_some(), "{path} should be readable");
    }
    let missing = format!("{SCENARIO_PREFIX}/missing.json");
    assert!(!storage.file_exists(bucket_name, &missing).await.expect("file_exists"));
    assert_eq!(storage.get_file(bucket_name, &missing).await.expect("get_file"), None);

    storage
        .delete_path(bucket_name, "test/")
        .await
        .expect("delete_path");
    let after = storage
        .get_file_names(bucket_name, &ListOptions::default())
        .await
        .expect("final listing");
    assert!(after.is_empty(), "bucket {bucket_name} should be empty, found {after:?}");
}
