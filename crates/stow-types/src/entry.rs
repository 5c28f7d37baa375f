use bytes::Bytes;

/// A single file and its content: the unit of bulk transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    /// Path within the bucket (or bare file name when listed without full paths).
    pub file_path: String,
    pub content: Bytes,
}

impl FileEntry {
    pub fn new(file_path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            file_path: file_path.into(),
            content: content.into(),
        }
    }

    /// Content length in bytes.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Split into `(path, content)`.
    pub fn into_parts(self) -> (String, Bytes) {
        (self.file_path, self.content)
    }
}

impl<P: Into<String>, C: Into<Bytes>> From<(P, C)> for FileEntry {
    fn from((file_path, content): (P, C)) -> Self {
        Self::new(file_path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_and_parts() {
        let entry = FileEntry::new("a/b.json", b"{}".to_vec());
        assert_eq!(entry.len(), 2);
        assert!(!entry.is_empty());
        let (path, content) = entry.into_parts();
        assert_eq!(path, "a/b.json");
        assert_eq!(content, Bytes::from_static(b"{}"));
    }

    #[test]
    fn from_tuple() {
        let entry: FileEntry = ("x", Bytes::from_static(b"1")).into();
        assert_eq!(entry.file_path, "x");
    }
}
