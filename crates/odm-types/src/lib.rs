//! Foundation types for the document mapper.
//!
//! This crate provides the identity, scalar-typing, and locking vocabulary
//! shared by every other crate in the workspace. It knows nothing about
//! in-memory object graphs; those live in `odm-core`.
//!
//! # Key Types
//!
//! - [`DocumentId`] — Identifier of a stored document (UUID, integer, or string)
//! - [`FieldType`] — Scalar type a mapped field is cast to during hydration
//! - [`IdGenerator`] — Who assigns identifiers for a document type
//! - [`LockMode`] — Optimistic / pessimistic locking modes
//! - [`RawDocument`] — Field map as held by the storage engine

pub mod error;
pub mod field_type;
pub mod id;
pub mod lock;
pub mod raw;

pub use error::TypeError;
pub use field_type::FieldType;
pub use id::{DocumentId, IdGenerator};
pub use lock::LockMode;
pub use raw::{normalize_type_name, RawDocument, ID_KEY};
