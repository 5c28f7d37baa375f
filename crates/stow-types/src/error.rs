use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("signed url expiry {0} is not in the future")]
    ExpiryInPast(String),

    #[error("signed url expiry {expires} is beyond the {horizon_secs}s horizon")]
    ExpiryTooFar { expires: String, horizon_secs: i64 },

    #[error("invalid unix timestamp: {0}")]
    InvalidTimestamp(i64),
}
