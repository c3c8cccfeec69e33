//! Store error types.

use thiserror::Error;

/// Document store errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Document (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The document is not a JSON object or carries an unusable id.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// A document with the same primary key already exists.
    #[error("duplicate primary key `{id}` in table `{table}`")]
    DuplicateKey { table: String, id: String },

    /// The change feed query cannot be opened.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;
