use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("cannot cast {value} to {expected}")]
    InvalidCast { value: String, expected: String },

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("unknown lock mode code: {0}")]
    UnknownLockMode(i64),
}
