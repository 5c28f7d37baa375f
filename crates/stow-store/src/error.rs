use stow_types::TypeError;
use thiserror::Error;

/// Errors from storage operations.
///
/// An absent object is not an error: single-object reads return `Ok(None)`.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A backend operation needed an object that does not exist
    /// (copy/move source, signed-url target, compose input).
    #[error("object not found: {bucket}/{path}")]
    NotFound { bucket: String, path: String },

    /// A caller required an object that was absent.
    #[error("file required, but not found: {bucket}/{path}")]
    FileRequired { bucket: String, path: String },

    /// Composition needs more levels than allowed.
    #[error("combine_files reached max recursion depth of {max_depth} (depth {depth})")]
    RecursionLimitExceeded { depth: usize, max_depth: usize },

    /// Native compose was given more inputs than the backend accepts.
    #[error("native compose accepts at most {max} sources, got {count}")]
    ComposeLimitExceeded { count: usize, max: usize },

    /// A precondition on the arguments was violated; nothing was touched.
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("invalid argument: {0}")]
    Type(#[from] TypeError),

    #[error("content is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend failure (network, permission, quota).
    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn file_required(bucket: &str, path: &str) -> Self {
        Self::FileRequired {
            bucket: bucket.to_string(),
            path: path.to_string(),
        }
    }

    pub fn not_found(bucket: &str, path: &str) -> Self {
        Self::NotFound {
            bucket: bucket.to_string(),
            path: path.to_string(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::FileRequired { .. } => "FILE_REQUIRED",
            Self::RecursionLimitExceeded { .. } => "RECURSION_LIMIT_EXCEEDED",
            Self::ComposeLimitExceeded { .. } => "COMPOSE_LIMIT_EXCEEDED",
            Self::Precondition(_) => "PRECONDITION_FAILED",
            Self::Type(_) => "INVALID_ARGUMENT",
            Self::Utf8(_) => "INVALID_UTF8",
            Self::Json(_) => "INVALID_JSON",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Backend(_) => "BACKEND_ERROR",
        }
    }

    /// Only transport-level failures are worth retrying, and never by this crate.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Backend(_))
    }
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
