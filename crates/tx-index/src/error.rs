//! Error types for indexing and search operations.

use thiserror::Error;

use cinder_storage::StoreError;

/// Errors that can occur while indexing or searching transactions.
#[derive(Debug, Error)]
pub enum TxIndexError {
    /// A lookup was attempted with an empty hash.
    #[error("transaction hash cannot be empty")]
    EmptyHash,

    /// The hash operand of a query could not be decoded.
    #[error("invalid transaction hash: {0}")]
    InvalidHash(String),

    /// The query string could not be parsed.
    #[error("failed to parse query: {0}")]
    Query(String),

    /// Unexpected failure of the underlying store.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A stored transaction result could not be serialized.
    #[error("failed to serialize tx result: {0}")]
    Encode(String),

    /// A persisted payload could not be decoded.
    #[error("error reading tx result: {0}")]
    Decode(String),

    /// A hash surviving the filter stage could not be materialized.
    #[error("failed to get tx {hash}: {reason}")]
    TxLookup { hash: String, reason: String },
}

/// Result type for indexing and search operations.
pub type TxIndexResult<T> = Result<T, TxIndexError>;
