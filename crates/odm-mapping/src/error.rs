//! Error types for mapping metadata.

/// Errors that can occur while resolving or validating metadata.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    /// No metadata is registered for the type.
    #[error("no mapping found for type {0}")]
    MappingNotFound(String),

    /// A collection was requested for a type that names none.
    #[error("type {0} is not mapped to a collection")]
    NoCollection(String),

    /// The metadata is internally inconsistent.
    #[error("invalid mapping for {type_name}: {reason}")]
    InvalidMapping {
        /// The offending type.
        type_name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A mapping file could not be parsed.
    #[error("mapping parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A mapping file could not be read.
    #[error("mapping I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for mapping results.
pub type MappingResult<T> = Result<T, MappingError>;
