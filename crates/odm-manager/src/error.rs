//! Error types for the document manager.

use odm_core::CoreError;
use odm_mapping::MappingError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    /// Raised by the unit of work, hydration, or storage.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A type names a custom repository that has no registered factory.
    #[error("repository {name} for {type_name} is not registered")]
    RepositoryNotRegistered { type_name: String, name: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot read configuration {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<MappingError> for ManagerError {
    fn from(err: MappingError) -> Self {
        Self::Core(CoreError::from(err))
    }
}

impl ManagerError {
    pub(crate) fn closed() -> Self {
        Self::Core(CoreError::IllegalState("the document manager is closed".into()))
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        Self::Core(CoreError::IllegalState(format!("{what} lock poisoned")))
    }
}

pub type ManagerResult<T> = Result<T, ManagerError>;
