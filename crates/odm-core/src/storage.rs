//! Per-manager database and collection handles.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use odm_mapping::ClassMetadata;
use odm_store::{Collection, Connection, Database, Operation, StoreError};
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Database used when neither the mapping nor the configuration names one.
pub const FALLBACK_DATABASE: &str = "doctrine";

/// Resolves and memoizes the storage handles of each document type.
///
/// Handles are looked up once per type and kept for the lifetime of this
/// value; nothing else about the connection is cached.
pub struct StorageHandles {
    connection: Arc<dyn Connection>,
    default_database: Option<String>,
    databases: RwLock<HashMap<String, Arc<dyn Database>>>,
    collections: RwLock<HashMap<String, Arc<dyn Collection>>>,
}

impl StorageHandles {
    pub fn new(connection: Arc<dyn Connection>, default_database: Option<String>) -> Self {
        Self {
            connection,
            default_database,
            databases: RwLock::new(HashMap::new()),
            collections: RwLock::new(HashMap::new()),
        }
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Database name for a type: its mapping, then the configured default,
    /// then [`FALLBACK_DATABASE`].
    pub fn database_name<'a>(&'a self, metadata: &'a ClassMetadata) -> &'a str {
        metadata
            .database
            .as_deref()
            .or(self.default_database.as_deref())
            .unwrap_or(FALLBACK_DATABASE)
    }

    pub fn database_for(&self, metadata: &ClassMetadata) -> CoreResult<Arc<dyn Database>> {
        let type_name = metadata.type_name();
        if let Some(db) = self
            .databases
            .read()
            .map_err(|_| CoreError::poisoned("database cache"))?
            .get(type_name)
        {
            return Ok(Arc::clone(db));
        }

        let name = self.database_name(metadata);
        let db = self
            .connection
            .select_database(name)
            .map_err(|e| select_failure(metadata, e))?;
        debug!(type_name, database = name, "selected database");

        let mut cache = self
            .databases
            .write()
            .map_err(|_| CoreError::poisoned("database cache"))?;
        Ok(Arc::clone(cache.entry(type_name.to_string()).or_insert(db)))
    }

    /// Collection handle for a type; a file store for file-backed types.
    ///
    /// The type's `slave_okay` setting, when present, is applied on every call.
    pub fn collection_for(&self, metadata: &ClassMetadata) -> CoreResult<Arc<dyn Collection>> {
        let type_name = metadata.type_name();
        let cached = self
            .collections
            .read()
            .map_err(|_| CoreError::poisoned("collection cache"))?
            .get(type_name)
            .cloned();

        let collection = match cached {
            Some(c) => c,
            None => {
                let name = metadata.collection_name()?;
                let db = self.database_for(metadata)?;
                let collection = if metadata.is_file {
                    db.select_file_store(name)
                } else {
                    db.select_collection(name)
                }
                .map_err(|e| select_failure(metadata, e))?;
                debug!(type_name, collection = name, file = metadata.is_file, "selected collection");

                let mut cache = self
                    .collections
                    .write()
                    .map_err(|_| CoreError::poisoned("collection cache"))?;
                Arc::clone(cache.entry(type_name.to_string()).or_insert(collection))
            }
        };

        if let Some(ok) = metadata.slave_okay {
            collection.set_slave_okay(ok);
        }
        Ok(collection)
    }

    /// Number of memoized collection handles.
    pub fn cached_collections(&self) -> usize {
        self.collections.read().map(|c| c.len()).unwrap_or(0)
    }
}

fn select_failure(metadata: &ClassMetadata, source: StoreError) -> CoreError {
    CoreError::StorageFailure {
        operation: Operation::Find,
        type_name: metadata.type_name().to_string(),
        identifier: None,
        source,
    }
}

impl std::fmt::Debug for StorageHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandles")
            .field("default_database", &self.default_database)
            .field("collections", &self.cached_collections())
            .finish()
    }
}
