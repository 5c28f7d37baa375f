//! Mapping of `(table, id)` keys onto bucket paths.
//!
//! A table is a folder and an item is a file named by its id:
//! `bucket/{prefix}/{id}`. A table written as `bucket.prefix` overrides the
//! configured bucket. Ids are not escaped, so an id containing `/` lands in
//! a nested folder of the table.

use crate::error::{KvError, KvResult};

/// Where a table lives in blob storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableLocation<'a> {
    pub bucket_name: &'a str,
    pub prefix: &'a str,
}

impl<'a> TableLocation<'a> {
    /// The table folder, with trailing `/`. Listing with this prefix never
    /// matches a sibling table sharing a name prefix.
    pub fn folder(&self) -> String {
        format!("{}/", self.prefix)
    }

    pub fn path_for(&self, id: &str) -> String {
        format!("{}/{}", self.prefix, id)
    }

    /// Inverse of [`path_for`](Self::path_for).
    pub fn id_of<'p>(&self, path: &'p str) -> Option<&'p str> {
        path.strip_prefix(self.prefix)?.strip_prefix('/')
    }
}

/// Resolve `table` against `default_bucket`.
///
/// Exactly two non-empty parts separated by `.` select `bucket.prefix`.
/// Anything else is used as the prefix in `default_bucket`, dots included.
pub fn resolve_table<'a>(table: &'a str, default_bucket: &'a str) -> KvResult<TableLocation<'a>> {
    if table.is_empty() {
        return Err(KvError::InvalidTable {
            table: table.to_string(),
            reason: "table name is empty".into(),
        });
    }
    if table.starts_with('/') || table.ends_with('/') {
        return Err(KvError::InvalidTable {
            table: table.to_string(),
            reason: "table name must not start or end with '/'".into(),
        });
    }
    let location = match table.split_once('.') {
        Some((bucket, prefix))
            if !bucket.is_empty() && !prefix.is_empty() && !prefix.contains('.') =>
        {
            TableLocation {
                bucket_name: bucket,
                prefix,
            }
        }
        _ => TableLocation {
            bucket_name: default_bucket,
            prefix: table,
        },
    };
    Ok(location)
}
