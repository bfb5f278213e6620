//! Mapping metadata for the document mapper.
//!
//! Metadata describes how a document type is laid out in storage: which
//! field holds the identifier, which collection the type lives in, how each
//! field maps to a storage key, and whether a field holds a scalar, an
//! embedded document, or a reference to another root document.
//!
//! How metadata is authored is outside this crate's concern. It is built in
//! code with [`ClassMetadataBuilder`] or read from a JSON mapping file by
//! [`MetadataRegistry::from_json_str`].
//!
//! # Key Types
//!
//! - [`ClassMetadata`] — Mapping of one document type
//! - [`FieldMapping`] — Mapping of one field, classified by [`FieldKind`]
//! - [`Cascade`] — Which unit-of-work operations propagate along a reference
//! - [`AlsoLoad`] — Alternate storage keys feeding a named handler on load
//! - [`MetadataProvider`] — Resolves a type name to its metadata
//! - [`MetadataRegistry`] — In-memory provider
//!
//! # Design Rules
//!
//! 1. Type names are normalized (leading `\` / `::` stripped) before lookup.
//! 2. The identifier is always stored under `_id`; it is not a regular field.
//! 3. Metadata is immutable once registered and shared as `Arc<ClassMetadata>`.

pub mod error;
pub mod metadata;
pub mod provider;

pub use error::{MappingError, MappingResult};
pub use metadata::{AlsoLoad, Cascade, ClassMetadata, ClassMetadataBuilder, FieldKind, FieldMapping};
pub use provider::{MappingFile, MetadataProvider, MetadataRegistry};
