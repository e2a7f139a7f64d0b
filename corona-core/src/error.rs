//! Error types for corona-core

use thiserror::Error;

/// Main error type for the corona-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error (SQLite-backed store)
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Durable storage is unavailable
    #[error("storage error: {0}")]
    Storage(String),

    /// A write would exceed the store's quota
    #[error("storage quota exceeded writing {key}: {needed} bytes, quota {quota}")]
    QuotaExceeded {
        key: String,
        needed: usize,
        quota: usize,
    },

    /// Request could not be delivered
    #[error("transport error: {0}")]
    Transport(String),

    /// Sink answered with a non-success status
    #[error("sink rejected batch: HTTP {0}")]
    Status(u16),
}

/// Result type alias for corona-core
pub type Result<T> = std::result::Result<T, Error>;
