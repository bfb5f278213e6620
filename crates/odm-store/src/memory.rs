use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock};

use odm_types::{DocumentId, LockMode, RawDocument, ID_KEY};
use serde_json::Value;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::options::{Operation, ReadOptions, UpdateCommand, WriteOptions};
use crate::traits::{Collection, Connection, Database};

/// One successful operation recorded by the in-memory backend.
#[derive(Clone, Debug, PartialEq)]
pub struct JournalEntry {
    pub operation: Operation,
    pub database: String,
    pub collection: String,
    pub id: Value,
    /// Storage-level lock requested with the operation, if any.
    pub lock: Option<LockMode>,
    /// Write flags, for write operations.
    pub write_options: Option<WriteOptions>,
}

type Journal = Arc<Mutex<Vec<JournalEntry>>>;

/// In-memory, `BTreeMap`-based storage connection.
///
/// Intended for tests and embedding. Every database and collection handle
/// shares one operation journal so tests can assert cross-collection ordering.
pub struct InMemoryConnection {
    databases: RwLock<HashMap<String, Arc<InMemoryDatabase>>>,
    journal: Journal,
}

impl InMemoryConnection {
    /// Create a new empty connection.
    pub fn new() -> Self {
        Self {
            databases: RwLock::new(HashMap::new()),
            journal: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Concrete handle to a database, created on first use.
    pub fn database(&self, name: &str) -> Arc<InMemoryDatabase> {
        let mut map = self.databases.write().expect("lock poisoned");
        Arc::clone(map.entry(name.to_string()).or_insert_with(|| {
            Arc::new(InMemoryDatabase::new(name, Arc::clone(&self.journal)))
        }))
    }

    /// All operations performed so far, in order.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.journal.lock().expect("lock poisoned").clone()
    }

    /// Forget the recorded operations.
    pub fn clear_journal(&self) {
        self.journal.lock().expect("lock poisoned").clear();
    }

    /// Names of the databases selected so far, sorted.
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .databases
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl Default for InMemoryConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for InMemoryConnection {
    fn select_database(&self, name: &str) -> StoreResult<Arc<dyn Database>> {
        Ok(self.database(name))
    }
}

impl std::fmt::Debug for InMemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryConnection")
            .field("databases", &self.database_names())
            .finish()
    }
}

/// In-memory database: a set of named collections and file stores.
pub struct InMemoryDatabase {
    name: String,
    collections: RwLock<HashMap<String, Arc<InMemoryCollection>>>,
    file_stores: RwLock<HashMap<String, Arc<InMemoryCollection>>>,
    journal: Journal,
}

impl InMemoryDatabase {
    fn new(name: &str, journal: Journal) -> Self {
        Self {
            name: name.to_string(),
            collections: RwLock::new(HashMap::new()),
            file_stores: RwLock::new(HashMap::new()),
            journal,
        }
    }

    /// Concrete handle to a collection, created on first use.
    pub fn collection(&self, name: &str) -> Arc<InMemoryCollection> {
        self.handle(&self.collections, name, false)
    }

    /// Concrete handle to a file store, created on first use.
    pub fn file_store(&self, name: &str) -> Arc<InMemoryCollection> {
        self.handle(&self.file_stores, name, true)
    }

    fn handle(
        &self,
        map: &RwLock<HashMap<String, Arc<InMemoryCollection>>>,
        name: &str,
        file_store: bool,
    ) -> Arc<InMemoryCollection> {
        let mut map = map.write().expect("lock poisoned");
        Arc::clone(map.entry(name.to_string()).or_insert_with(|| {
            Arc::new(InMemoryCollection::new(
                &self.name,
                name,
                file_store,
                Arc::clone(&self.journal),
            ))
        }))
    }
}

impl Database for InMemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn select_collection(&self, name: &str) -> StoreResult<Arc<dyn Collection>> {
        Ok(self.collection(name))
    }

    fn select_file_store(&self, name: &str) -> StoreResult<Arc<dyn Collection>> {
        Ok(self.file_store(name))
    }
}

/// In-memory collection.
///
/// Documents are keyed by the canonical JSON text of their identifier, so
/// `"5"` and `5` are distinct identities. Successful operations are counted
/// and journaled; [`InMemoryCollection::fail_next`] makes the next operation
/// of a kind fail.
pub struct InMemoryCollection {
    database: String,
    name: String,
    file_store: bool,
    documents: RwLock<BTreeMap<String, RawDocument>>,
    slave_okay: AtomicBool,
    finds: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    removes: AtomicU64,
    pending_failures: Mutex<Vec<Operation>>,
    journal: Journal,
}

impl InMemoryCollection {
    fn new(database: &str, name: &str, file_store: bool, journal: Journal) -> Self {
        Self {
            database: database.to_string(),
            name: name.to_string(),
            file_store,
            documents: RwLock::new(BTreeMap::new()),
            slave_okay: AtomicBool::new(false),
            finds: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            updates: AtomicU64::new(0),
            removes: AtomicU64::new(0),
            pending_failures: Mutex::new(Vec::new()),
            journal,
        }
    }

    /// Number of documents currently stored.
    pub fn len(&self) -> usize {
        self.documents.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.documents.read().expect("lock poisoned").is_empty()
    }

    /// Raw copy of a stored document, bypassing counters and the journal.
    pub fn peek(&self, id: &Value) -> Option<RawDocument> {
        self.documents
            .read()
            .expect("lock poisoned")
            .get(&key_of(id))
            .cloned()
    }

    /// Store a document directly, bypassing counters and the journal.
    pub fn seed(&self, document: RawDocument) {
        let id = document.get(ID_KEY).cloned().unwrap_or(Value::Null);
        self.documents
            .write()
            .expect("lock poisoned")
            .insert(key_of(&id), document);
    }

    /// Number of successful `find_by_id` calls.
    pub fn find_count(&self) -> u64 {
        self.finds.load(AtomicOrdering::SeqCst)
    }

    /// Number of successful inserts.
    pub fn insert_count(&self) -> u64 {
        self.inserts.load(AtomicOrdering::SeqCst)
    }

    /// Number of successful updates (matched or not).
    pub fn update_count(&self) -> u64 {
        self.updates.load(AtomicOrdering::SeqCst)
    }

    /// Number of successful removes.
    pub fn remove_count(&self) -> u64 {
        self.removes.load(AtomicOrdering::SeqCst)
    }

    /// Make the next operation of the given kind fail.
    pub fn fail_next(&self, operation: Operation) {
        self.pending_failures
            .lock()
            .expect("lock poisoned")
            .push(operation);
    }

    fn check_failure(&self, operation: Operation) -> StoreResult<()> {
        let mut pending = self.pending_failures.lock().expect("lock poisoned");
        if let Some(pos) = pending.iter().position(|op| *op == operation) {
            pending.remove(pos);
            return Err(StoreError::OperationFailed {
                operation,
                collection: self.name.clone(),
                reason: "injected failure".into(),
            });
        }
        Ok(())
    }

    fn record(
        &self,
        operation: Operation,
        id: &Value,
        lock: Option<LockMode>,
        write_options: Option<&WriteOptions>,
    ) {
        self.journal
            .lock()
            .expect("lock poisoned")
            .push(JournalEntry {
                operation,
                database: self.database.clone(),
                collection: self.name.clone(),
                id: id.clone(),
                lock,
                write_options: write_options.cloned(),
            });
    }
}

impl Collection for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn insert(&self, document: &RawDocument, options: &WriteOptions) -> StoreResult<Value> {
        self.check_failure(Operation::Insert)?;

        let mut stored = document.clone();
        let id = match stored.get(ID_KEY) {
            Some(Value::Null) | None => {
                let generated = DocumentId::generate().to_json();
                stored.insert(ID_KEY.to_string(), generated.clone());
                generated
            }
            Some(id) => id.clone(),
        };

        {
            let mut map = self.documents.write().expect("lock poisoned");
            let key = key_of(&id);
            if map.contains_key(&key) {
                return Err(StoreError::DuplicateKey {
                    collection: self.name.clone(),
                    id: key,
                });
            }
            map.insert(key, stored);
        }

        self.inserts.fetch_add(1, AtomicOrdering::SeqCst);
        self.record(Operation::Insert, &id, options.lock, Some(options));
        debug!(collection = %self.name, id = %id, "inserted document");
        Ok(id)
    }

    fn update(&self, command: &UpdateCommand, options: &WriteOptions) -> StoreResult<u64> {
        self.check_failure(Operation::Update)?;

        let matched = {
            let mut map = self.documents.write().expect("lock poisoned");
            match map.get_mut(&key_of(&command.id)) {
                Some(doc)
                    if command
                        .criteria
                        .iter()
                        .all(|(k, v)| doc.get(k).unwrap_or(&Value::Null) == v) =>
                {
                    for (key, value) in &command.set {
                        doc.insert(key.clone(), value.clone());
                    }
                    for key in &command.unset {
                        doc.remove(key);
                    }
                    1
                }
                _ => 0,
            }
        };

        self.updates.fetch_add(1, AtomicOrdering::SeqCst);
        self.record(Operation::Update, &command.id, options.lock, Some(options));
        Ok(matched)
    }

    fn remove(&self, id: &Value, options: &WriteOptions) -> StoreResult<bool> {
        self.check_failure(Operation::Remove)?;

        let existed = self
            .documents
            .write()
            .expect("lock poisoned")
            .remove(&key_of(id))
            .is_some();

        self.removes.fetch_add(1, AtomicOrdering::SeqCst);
        self.record(Operation::Remove, id, options.lock, Some(options));
        Ok(existed)
    }

    fn find_by_id(&self, id: &Value, options: &ReadOptions) -> StoreResult<Option<RawDocument>> {
        self.check_failure(Operation::Find)?;

        let found = self
            .documents
            .read()
            .expect("lock poisoned")
            .get(&key_of(id))
            .cloned();

        self.finds.fetch_add(1, AtomicOrdering::SeqCst);
        self.record(Operation::Find, id, options.lock, None);
        Ok(found)
    }

    fn set_slave_okay(&self, ok: bool) {
        self.slave_okay.store(ok, AtomicOrdering::SeqCst);
    }

    fn slave_okay(&self) -> bool {
        self.slave_okay.load(AtomicOrdering::SeqCst)
    }

    fn is_file_store(&self) -> bool {
        self.file_store
    }
}

impl std::fmt::Debug for InMemoryCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCollection")
            .field("name", &self.name)
            .field("document_count", &self.len())
            .finish()
    }
}

fn key_of(id: &Value) -> String {
    id.to_string()
}
