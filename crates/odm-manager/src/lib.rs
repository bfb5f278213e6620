//! Application-facing document manager.
//!
//! Wires a storage connection, a metadata provider, and a configuration into
//! one [`DocumentManager`] that owns a unit of work and its hydrators.
//!
//! # Key Types
//!
//! - [`DocumentManager`] — persist, find, flush, and close
//! - [`Configuration`] — default database, hydrator directory, write flags
//! - [`Repository`] — per-type lookup, overridable through factories
//! - [`ManagerError`] — all failures surfaced to the application
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use odm_manager::{Configuration, DocumentManager};
//! use odm_mapping::{ClassMetadata, FieldMapping, MetadataRegistry};
//! use odm_store::InMemoryConnection;
//! use odm_types::{FieldType, LockMode};
//!
//! let registry = MetadataRegistry::new();
//! registry
//!     .register(
//!         ClassMetadata::builder("User")
//!             .collection("users")
//!             .field(FieldMapping::scalar("name", FieldType::String))
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! let dm = DocumentManager::new(
//!     Arc::new(InMemoryConnection::new()),
//!     Arc::new(registry),
//!     Configuration::default(),
//! );
//! let user = dm.create_document("User").unwrap().with("name", "Ada");
//! dm.persist(&user).unwrap();
//! dm.flush(None, None).unwrap();
//!
//! let id = user.id().unwrap();
//! let found = dm.find("User", id, LockMode::None, None).unwrap().unwrap();
//! assert!(found.same_instance(&user));
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod repository;

pub use config::Configuration;
pub use error::{ManagerError, ManagerResult};
pub use manager::DocumentManager;
pub use repository::{DocumentRepository, Repository, RepositoryFactory};
