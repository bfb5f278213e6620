use std::sync::Arc;

use odm_types::RawDocument;
use serde_json::Value;

use crate::error::StoreResult;
use crate::options::{ReadOptions, UpdateCommand, WriteOptions};

/// Entry point to a storage engine.
pub trait Connection: Send + Sync {
    /// Select (or lazily create) a database by name.
    fn select_database(&self, name: &str) -> StoreResult<Arc<dyn Database>>;
}

/// A named database on a [`Connection`].
pub trait Database: Send + Sync {
    /// Name of this database.
    fn name(&self) -> &str;

    /// Select (or lazily create) a document collection.
    fn select_collection(&self, name: &str) -> StoreResult<Arc<dyn Collection>>;

    /// Select (or lazily create) a file store for file-backed document types.
    ///
    /// File stores expose the same document-level interface as collections.
    fn select_file_store(&self, name: &str) -> StoreResult<Arc<dyn Collection>>;
}

/// A collection of raw documents keyed by identifier.
///
/// All implementations must satisfy these invariants:
/// - Identifiers live under the `_id` storage key and are unique.
/// - `insert` assigns an identifier when the document carries none and
///   returns the identifier actually stored.
/// - `update` applies only when the identifier and every criterion match.
pub trait Collection: Send + Sync {
    /// Name of this collection.
    fn name(&self) -> &str;

    /// Insert a document and return its stored identifier.
    fn insert(&self, document: &RawDocument, options: &WriteOptions) -> StoreResult<Value>;

    /// Apply an update. Returns the number of matched documents (0 or 1).
    fn update(&self, command: &UpdateCommand, options: &WriteOptions) -> StoreResult<u64>;

    /// Remove a document by identifier. Returns `true` if it existed.
    fn remove(&self, id: &Value, options: &WriteOptions) -> StoreResult<bool>;

    /// Read a document by identifier.
    ///
    /// Returns `Ok(None)` if the document does not exist.
    fn find_by_id(&self, id: &Value, options: &ReadOptions) -> StoreResult<Option<RawDocument>>;

    /// Allow reads to be served by secondaries.
    fn set_slave_okay(&self, ok: bool);

    /// Whether reads may be served by secondaries.
    fn slave_okay(&self) -> bool;

    /// Whether this handle is a file store rather than a plain collection.
    fn is_file_store(&self) -> bool {
        false
    }
}
