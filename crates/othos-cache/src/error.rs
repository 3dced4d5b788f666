//! Cache-related error types

use thiserror::Error;

/// Cache operation errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// The storage medium is full. Distinguished from other storage errors
    /// because the remedial action differs (shed expired entries, fall back).
    #[error("storage quota exceeded in {store} store")]
    QuotaExceeded { store: String },

    /// Another handle holds the store open and prevents this one.
    #[error("storage blocked: {message}")]
    Blocked { message: String },

    /// Layout migration during store open failed, or the on-disk layout is
    /// newer than this build understands.
    #[error("storage upgrade failed: {message}")]
    Upgrade { message: String },

    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("deserialization error: {message}")]
    Deserialization { message: String },

    #[error("compression error: {message}")]
    Compression { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Re-export commonly used Result type
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// True for quota-exhaustion failures, regardless of which store raised them.
    pub fn is_quota(&self) -> bool {
        matches!(self, CacheError::QuotaExceeded { .. })
    }

    /// Classify an IO error from a storage backend, promoting full-medium
    /// conditions to the typed quota variant.
    pub(crate) fn from_io(store: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::StorageFull | std::io::ErrorKind::QuotaExceeded => {
                CacheError::QuotaExceeded {
                    store: store.to_string(),
                }
            }
            _ => CacheError::Io(err),
        }
    }
}
