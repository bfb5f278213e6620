use crate::options::Operation;

/// Errors from storage operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// An insert collided with an existing identifier.
    #[error("duplicate key {id} in collection {collection}")]
    DuplicateKey { collection: String, id: String },

    /// The document handed to the store is malformed.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// The backend rejected the operation.
    #[error("{operation} failed on collection {collection}: {reason}")]
    OperationFailed {
        operation: Operation,
        collection: String,
        reason: String,
    },

    /// The backend cannot be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
