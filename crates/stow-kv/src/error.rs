//! Error types for key-value operations.

use stow_store::StorageError;
use thiserror::Error;

/// Errors that can occur during key-value operations.
#[derive(Debug, Error)]
pub enum KvError {
    /// The underlying storage failed; propagated unchanged.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The operation is not supported by this database.
    #[error("unsupported operation: {operation}")]
    Unsupported { operation: &'static str },

    /// The table name cannot be mapped onto a bucket folder.
    #[error("invalid table name {table:?}: {reason}")]
    InvalidTable { table: String, reason: String },
}

impl KvError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Storage(e) => e.code(),
            Self::Unsupported { .. } => "UNSUPPORTED_OPERATION",
            Self::InvalidTable { .. } => "INVALID_TABLE",
        }
    }
}

/// Convenience type alias for key-value operations.
pub type KvResult<T> = std::result::Result<T, KvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_keep_their_code() {
        let err = KvError::from(StorageError::not_found("b", "p"));
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(err.to_string(), "object not found: b/p");
    }

    #[test]
    fn unsupported_message() {
        let err = KvError::Unsupported { operation: "increment" };
        assert_eq!(err.code(), "UNSUPPORTED_OPERATION");
        assert_eq!(err.to_string(), "unsupported operation: increment");
    }
}
