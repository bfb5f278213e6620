//! Storage-connection boundary for the document mapper.
//!
//! The mapper never talks to a storage engine directly; it goes through the
//! three traits defined here, mirroring how a document database client is
//! layered:
//!
//! - [`Connection`] — selects databases by name
//! - [`Database`] — selects collections (or file stores) by name
//! - [`Collection`] — `insert` / `update` / `remove` / `find_by_id`
//!
//! # Storage Backends
//!
//! - [`InMemoryConnection`] — `BTreeMap`-backed store for tests and embedding,
//!   with per-operation counters, an operation journal, and failure injection.
//!
//! # Design Rules
//!
//! 1. Calls are synchronous from the caller's perspective.
//! 2. Handles are cheap to clone (`Arc`) and safe to share across threads.
//! 3. The store never interprets field values beyond equality for criteria.
//! 4. All errors are propagated, never silently ignored.

pub mod error;
pub mod memory;
pub mod options;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryCollection, InMemoryConnection, InMemoryDatabase, JournalEntry};
pub use options::{Operation, ReadOptions, UpdateCommand, WriteConcern, WriteOptions};
pub use traits::{Collection, Connection, Database};
