//! Error types for the unit of work and hydration.

use odm_mapping::MappingError;
use odm_store::{Operation, StoreError};

/// Errors surfaced by the persistence core.
///
/// None of these are recovered from internally; every one reaches the caller.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// An argument cannot be used for the requested operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested type has no mapping.
    #[error("no mapping found for type {0}")]
    MappingNotFound(String),

    /// No hydrator is available for a type, or generating one failed.
    #[error("hydrator setup failed for {type_name}: {reason}")]
    HydrationSetup { type_name: String, reason: String },

    /// The stored version no longer matches the expected one.
    #[error("concurrent modification of {type_name}#{id}: {reason}")]
    ConcurrentModification {
        type_name: String,
        id: String,
        reason: String,
    },

    /// The operation is not allowed in the current state (e.g. closed manager).
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The storage engine reported an error.
    #[error("{operation} of {type_name}#{} failed: {source}", .identifier.as_deref().unwrap_or("<new>"))]
    StorageFailure {
        operation: Operation,
        type_name: String,
        identifier: Option<String>,
        #[source]
        source: StoreError,
    },

    /// Storage no longer holds a document the caller expected to exist.
    #[error("document {type_name}#{id} not found")]
    DocumentNotFound { type_name: String, id: String },

    /// A raw stored value cannot be cast to its mapped field type.
    #[error("invalid data for {type_name}.{field}: {reason}")]
    InvalidData {
        type_name: String,
        field: String,
        reason: String,
    },

    /// Any other mapping problem (invalid mapping, missing collection).
    #[error(transparent)]
    Mapping(MappingError),
}

impl From<MappingError> for CoreError {
    fn from(err: MappingError) -> Self {
        match err {
            MappingError::MappingNotFound(name) => Self::MappingNotFound(name),
            other => Self::Mapping(other),
        }
    }
}

impl CoreError {
    pub(crate) fn poisoned(what: &str) -> Self {
        Self::IllegalState(format!("{what} lock poisoned"))
    }
}

/// Convenience alias for core results.
pub type CoreResult<T> = Result<T, CoreError>;
