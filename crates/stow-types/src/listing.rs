use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Options for listing and streaming the files of a bucket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListOptions {
    /// Only files whose path starts with this prefix (plain `starts_with`,
    /// so `foo` also matches `foobar`).
    pub prefix: Option<String>,
    /// When `false`, everything up to and including the last `/` is stripped
    /// and only the file name is returned. Defaults to `true`.
    pub full_paths: bool,
    /// Maximum number of results. `0` is treated as unlimited.
    pub limit: Option<usize>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            prefix: None,
            full_paths: true,
            limit: None,
        }
    }
}

impl ListOptions {
    /// Options listing everything under `prefix` with full paths.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Return bare file names instead of full paths.
    pub fn file_names_only(mut self) -> Self {
        self.full_paths = false;
        self
    }

    /// The limit with `0` folded into "unlimited".
    pub fn effective_limit(&self) -> Option<usize> {
        self.limit.filter(|&n| n > 0)
    }

    pub fn prefix_str(&self) -> &str {
        self.prefix.as_deref().unwrap_or("")
    }

    /// Apply the prefix filter and name normalization to one stored path.
    ///
    /// Returns `None` when the path does not match the prefix or is a folder
    /// marker. This is the single routine behind every listing and stream.
    pub fn normalize<'a>(&self, path: &'a str) -> Option<&'a str> {
        if !path.starts_with(self.prefix_str()) {
            return None;
        }
        normalize_file_name(path, self.full_paths)
    }
}

/// Returns `true` for virtual folder markers (paths ending in `/`).
pub fn is_folder_marker(path: &str) -> bool {
    path.ends_with('/')
}

/// Everything after the last occurrence of `delimiter`, or the whole string
/// when it does not occur.
pub fn substring_after_last(s: &str, delimiter: char) -> &str {
    match s.rfind(delimiter) {
        Some(idx) => &s[idx + delimiter.len_utf8()..],
        None => s,
    }
}

/// Normalize a stored path for output.
///
/// Folder markers yield `None`. With `full_paths == false` the folder part is
/// stripped, and a path that would become empty also yields `None`.
pub fn normalize_file_name(path: &str, full_paths: bool) -> Option<&str> {
    if full_paths {
        if is_folder_marker(path) {
            return None;
        }
        return Some(path);
    }
    let name = substring_after_last(path, '/');
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Run `paths` through [`ListOptions::normalize`] and apply the limit.
pub fn select_file_names<I, S>(paths: I, opts: &ListOptions) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let limit = opts.effective_limit().unwrap_or(usize::MAX);
    paths
        .into_iter()
        .filter_map(|p| opts.normalize(p.as_ref()).map(str::to_string))
        .take(limit)
        .collect()
}

/// Check that `path` is usable as an object path.
pub fn validate_path(path: &str) -> Result<(), TypeError> {
    if path.is_empty() {
        return Err(TypeError::InvalidPath {
            path: path.to_string(),
            reason: "path is empty".into(),
        });
    }
    if path.starts_with('/') {
        return Err(TypeError::InvalidPath {
            path: path.to_string(),
            reason: "path must not start with '/'".into(),
        });
    }
    Ok(())
}
