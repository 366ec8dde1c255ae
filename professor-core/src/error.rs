//! Error types for professor-core

use crate::types::OpKind;
use thiserror::Error;

/// Main error type for the professor-core library
#[derive(Error, Debug)]
pub enum Error {
    /// A value outside the recognized document type set was found
    #[error("unknown document type <{0}>")]
    UnsupportedType(String),

    /// Document nesting exceeded the recursion limit
    #[error("document nested deeper than {limit} levels")]
    NestingTooDeep { limit: usize },

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored document could not be decoded
    #[error("codec error: {0}")]
    Codec(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Source not found
    #[error("source not found: {0}")]
    SourceNotFound(String),

    /// Source already registered
    #[error("source already registered: {hostname}/{dbname}")]
    SourceExists { hostname: String, dbname: String },

    /// A sync for this source is already running
    #[error("sync already in progress for source {0}")]
    SyncInProgress(String),

    /// No handler registered for the operation kind
    #[error("no handler registered for operation kind: {0}")]
    NoHandler(OpKind),
}

/// Result type alias for professor-core
pub type Result<T> = std::result::Result<T, Error>;
