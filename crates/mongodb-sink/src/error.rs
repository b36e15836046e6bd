//! Error types for the delivery engine.

use thiserror::Error;

/// The target database could not be reached.
///
/// Covers connection-string parse errors, network failures, authentication
/// failures and the bounded connect timeout.
#[derive(Debug, Error)]
#[error("Failed to connect to MongoDB database '{database}'")]
pub struct ConnectionError {
    pub database: String,
    #[source]
    pub source: anyhow::Error,
}

/// A record could not be turned into an upsert operation.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The record does not carry the stream's primary-key field.
    #[error("Record is missing primary key field '{field}'")]
    MissingKey { field: String },

    /// The key value cannot be coerced into the store's native identifier.
    #[error("Primary key '{field}' value {value} is not a valid ObjectId: {reason}")]
    InvalidKeyFormat {
        field: String,
        value: String,
        reason: String,
    },

    /// A non-key field holds a value BSON cannot represent exactly.
    #[error("Field '{field}' cannot be stored: {reason}")]
    UnsupportedValue { field: String, reason: String },
}

/// A batch could not be committed. The batch is left untouched so the host
/// can retry it as a unit.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("Stream '{stream}' has no primary key property")]
    NoPrimaryKey { stream: String },

    #[error("Stream '{stream}' maps to an unusable collection name '{collection}': {reason}")]
    InvalidCollection {
        stream: String,
        collection: String,
        reason: String,
    },

    #[error("Batch for collection '{collection}' aborted before any write")]
    Connection {
        collection: String,
        #[source]
        source: ConnectionError,
    },

    #[error("Record {index} of stream '{stream}' was rejected")]
    InvalidRecord {
        stream: String,
        index: usize,
        #[source]
        source: KeyError,
    },

    #[error("Upsert of record {index} into collection '{collection}' failed")]
    Write {
        collection: String,
        index: usize,
        #[source]
        source: anyhow::Error,
    },
}

/// Result type for commit operations.
pub type Result<T> = std::result::Result<T, CommitError>;
