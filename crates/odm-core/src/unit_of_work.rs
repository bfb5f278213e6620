//! The unit of work: identity map, schedules, and the flush algorithm.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use odm_mapping::{Cascade, ClassMetadata, MetadataProvider};
use odm_store::{Operation, ReadOptions, StoreError, UpdateCommand, WriteOptions};
use odm_types::{DocumentId, FieldType, IdGenerator, LockMode, RawDocument, ID_KEY};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::change_set::{compute_change_set, ChangeSet, Snapshot};
use crate::commit_order::{plan_inserts, CommitNode};
use crate::document::{Document, ObjectHash};
use crate::error::{CoreError, CoreResult};
use crate::events::EventSink;
use crate::hydrator::{HydrationContext, HydrationHints, HydrationPlan, HydratorFactory};
use crate::identity_map::IdentityMap;
use crate::persister;
use crate::proxy::{ProxyFactory, ProxyLoader};
use crate::storage::StorageHandles;
use crate::value::{EmbeddedValue, FieldValue};

/// Lifecycle state of a document relative to one unit of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Not known to the unit of work.
    New,
    /// Tracked and identity-mapped.
    Managed,
    /// Tracked and scheduled for deletion.
    Removed,
    /// Was tracked, no longer is.
    Detached,
}

struct Entry {
    doc: Document,
    metadata: Arc<ClassMetadata>,
    state: LifecycleState,
    original: Snapshot,
    lock: LockMode,
    change_set: Option<ChangeSet>,
    /// Inserted with some references left out; a follow-up update writes them.
    deferred_refs: bool,
}

impl Entry {
    fn managed(doc: Document, metadata: Arc<ClassMetadata>, original: Snapshot) -> Self {
        Self {
            doc,
            metadata,
            state: LifecycleState::Managed,
            original,
            lock: LockMode::None,
            change_set: None,
            deferred_refs: false,
        }
    }
}

/// Ordered set of scheduled documents, ordered by scheduling sequence.
#[derive(Default)]
struct ScheduleQueue {
    by_seq: BTreeMap<u64, ObjectHash>,
    seq_of: HashMap<ObjectHash, u64>,
}

impl ScheduleQueue {
    fn push(&mut self, key: ObjectHash, seq: u64) -> bool {
        if self.seq_of.contains_key(&key) {
            return false;
        }
        self.seq_of.insert(key, seq);
        self.by_seq.insert(seq, key);
        true
    }

    fn remove(&mut self, key: ObjectHash) -> bool {
        match self.seq_of.remove(&key) {
            Some(seq) => {
                self.by_seq.remove(&seq);
                true
            }
            None => false,
        }
    }

    fn contains(&self, key: ObjectHash) -> bool {
        self.seq_of.contains_key(&key)
    }

    fn seq(&self, key: ObjectHash) -> Option<u64> {
        self.seq_of.get(&key).copied()
    }

    fn keys(&self) -> Vec<ObjectHash> {
        self.by_seq.values().copied().collect()
    }

    fn is_empty(&self) -> bool {
        self.by_seq.is_empty()
    }
}

#[derive(Default)]
struct UowState {
    entries: HashMap<ObjectHash, Entry>,
    identity_map: IdentityMap,
    inserts: ScheduleQueue,
    updates: ScheduleQueue,
    deletes: ScheduleQueue,
    next_seq: u64,
}

impl UowState {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Stop tracking a document: drop its entry, schedules, and mapping.
    fn forget(&mut self, key: ObjectHash) -> Option<Entry> {
        self.inserts.remove(key);
        self.updates.remove(key);
        self.deletes.remove(key);
        let entry = self.entries.remove(&key)?;
        if let Some(id) = entry.doc.id() {
            self.identity_map.remove(entry.doc.type_name(), &id, &entry.doc);
        }
        Some(entry)
    }

    fn docs(&self, queue: &ScheduleQueue) -> Vec<Document> {
        queue
            .keys()
            .iter()
            .filter_map(|k| self.entries.get(k))
            .map(|e| e.doc.clone())
            .collect()
    }
}

static NEXT_UOW_ID: AtomicU64 = AtomicU64::new(1);

/// Tracks managed documents and turns application intent into storage
/// operations.
///
/// All bookkeeping sits behind one coarse lock. The lock is never held while
/// storage, hydrators, or the event sink run, so sinks and lazy references may
/// call back in. Two commits never interleave; a sink must not commit from
/// inside a commit notification.
pub struct UnitOfWork {
    id: u64,
    metadata: Arc<dyn MetadataProvider>,
    storage: Arc<StorageHandles>,
    hydrators: Arc<HydratorFactory>,
    proxies: ProxyFactory,
    sink: Arc<dyn EventSink>,
    state: Mutex<UowState>,
    commit_lock: Mutex<()>,
    closed: AtomicBool,
}

impl UnitOfWork {
    /// Create a unit of work. Lazy references it hands out hold a weak
    /// handle back to it.
    pub fn new(
        metadata: Arc<dyn MetadataProvider>,
        storage: Arc<StorageHandles>,
        hydrators: Arc<HydratorFactory>,
        sink: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<UnitOfWork>| {
            let loader: Weak<dyn ProxyLoader> = this.clone();
            Self {
                id: NEXT_UOW_ID.fetch_add(1, Ordering::Relaxed),
                metadata,
                storage,
                hydrators,
                proxies: ProxyFactory::new(loader),
                sink,
                state: Mutex::new(UowState::default()),
                commit_lock: Mutex::new(()),
                closed: AtomicBool::new(false),
            }
        })
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataProvider> {
        &self.metadata
    }

    pub fn storage(&self) -> &Arc<StorageHandles> {
        &self.storage
    }

    pub fn hydrators(&self) -> &Arc<HydratorFactory> {
        &self.hydrators
    }

    pub fn proxies(&self) -> &ProxyFactory {
        &self.proxies
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn document_state(&self, doc: &Document) -> LifecycleState {
        let state = self.read_state();
        match state.entries.get(&doc.hash()) {
            Some(entry) => entry.state,
            None if doc.is_detached_from(self.id) => LifecycleState::Detached,
            None => LifecycleState::New,
        }
    }

    pub fn is_in_identity_map(&self, doc: &Document) -> bool {
        self.read_state().identity_map.contains(doc)
    }

    pub fn is_scheduled_for_insert(&self, doc: &Document) -> bool {
        self.read_state().inserts.contains(doc.hash())
    }

    pub fn is_scheduled_for_update(&self, doc: &Document) -> bool {
        self.read_state().updates.contains(doc.hash())
    }

    pub fn is_scheduled_for_delete(&self, doc: &Document) -> bool {
        self.read_state().deletes.contains(doc.hash())
    }

    /// Field values as loaded or as last flushed.
    pub fn original_document_data(&self, doc: &Document) -> Option<Snapshot> {
        self.read_state()
            .entries
            .get(&doc.hash())
            .map(|e| e.original.clone())
    }

    /// Change set computed by the last commit that has not been written yet.
    pub fn document_change_set(&self, doc: &Document) -> Option<ChangeSet> {
        self.read_state()
            .entries
            .get(&doc.hash())
            .and_then(|e| e.change_set.clone())
    }

    pub fn lock_mode(&self, doc: &Document) -> LockMode {
        self.read_state()
            .entries
            .get(&doc.hash())
            .map(|e| e.lock)
            .unwrap_or_default()
    }

    /// Number of identity-mapped documents.
    pub fn size(&self) -> usize {
        self.read_state().identity_map.len()
    }

    pub fn scheduled_inserts(&self) -> Vec<Document> {
        let state = self.read_state();
        state.docs(&state.inserts)
    }

    pub fn scheduled_updates(&self) -> Vec<Document> {
        let state = self.read_state();
        state.docs(&state.updates)
    }

    pub fn scheduled_deletes(&self) -> Vec<Document> {
        let state = self.read_state();
        state.docs(&state.deletes)
    }

    /// The identity-mapped instance for `id`, if any. Never loads.
    pub fn try_get_by_id(&self, id: &DocumentId, metadata: &ClassMetadata) -> Option<Document> {
        self.read_state()
            .identity_map
            .get(metadata.type_name(), id)
            .cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Refuse all further work. Outstanding lazy references fail to load.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // Persist / remove
    // ------------------------------------------------------------------

    /// Make `doc` managed and schedule its insert, cascading to references
    /// configured for cascade-persist.
    ///
    /// Embedded-only types are never scheduled on their own. Persisting a
    /// document scheduled for deletion cancels the deletion.
    pub fn persist(&self, doc: &Document) -> CoreResult<()> {
        self.check_open()?;
        let mut visited = HashSet::new();
        self.do_persist(doc, &mut visited)
    }

    fn do_persist(&self, doc: &Document, visited: &mut HashSet<ObjectHash>) -> CoreResult<()> {
        if !visited.insert(doc.hash()) {
            return Ok(());
        }
        let metadata = self.metadata.metadata_for(doc.type_name())?;
        if metadata.is_embedded {
            return Ok(());
        }

        match self.document_state(doc) {
            LifecycleState::Managed => {}
            LifecycleState::New => self.persist_new(doc, &metadata)?,
            LifecycleState::Removed => {
                let mut guard = self.lock_state()?;
                let state = &mut *guard;
                state.deletes.remove(doc.hash());
                if let Some(entry) = state.entries.get_mut(&doc.hash()) {
                    entry.state = LifecycleState::Managed;
                }
                debug!(type_name = %metadata.type_name(), hash = doc.hash(), "deletion cancelled");
            }
            LifecycleState::Detached => {
                return Err(CoreError::InvalidArgument(format!(
                    "cannot persist detached document {doc:?}; merge it instead"
                )));
            }
        }

        for target in self.cascade_targets(&metadata, doc, |c| c.persist)? {
            self.do_persist(&target, visited)?;
        }
        Ok(())
    }

    fn persist_new(&self, doc: &Document, metadata: &Arc<ClassMetadata>) -> CoreResult<()> {
        self.sink.pre_persist(doc, self);

        let (id, generated) = match doc.id() {
            Some(id) => (Some(id), false),
            None => match metadata.id_generator {
                IdGenerator::Auto => (Some(generate_id(metadata)?), true),
                IdGenerator::Assigned => {
                    return Err(CoreError::InvalidArgument(format!(
                        "{doc:?} has no identifier and {} uses assigned identifiers",
                        metadata.type_name()
                    )));
                }
                IdGenerator::Store => (None, false),
            },
        };

        let mut guard = self.lock_state()?;
        let state = &mut *guard;
        if let Some(id) = &id {
            if let Some(existing) = state.identity_map.get(metadata.type_name(), id) {
                if !existing.same_instance(doc) {
                    return Err(CoreError::InvalidArgument(format!(
                        "another instance of {}#{id} is already managed",
                        metadata.type_name()
                    )));
                }
            }
            if generated {
                doc.set_id(id.clone())?;
            }
            state.identity_map.insert(metadata.type_name(), id.clone(), doc);
        }

        let seq = state.next_seq();
        doc.clear_detached();
        state.entries.insert(
            doc.hash(),
            Entry::managed(doc.clone(), Arc::clone(metadata), Snapshot::new()),
        );
        state.inserts.push(doc.hash(), seq);
        debug!(
            type_name = %metadata.type_name(),
            id = %id.as_ref().map(ToString::to_string).unwrap_or_default(),
            seq,
            "scheduled insert"
        );
        Ok(())
    }

    /// Schedule a managed document for deletion, cascading to references
    /// configured for cascade-remove.
    ///
    /// Removing a document that is only scheduled for insert cancels the
    /// insert. Unknown documents are ignored.
    pub fn remove(&self, doc: &Document) -> CoreResult<()> {
        self.check_open()?;
        let mut visited = HashSet::new();
        self.do_remove(doc, &mut visited)
    }

    fn do_remove(&self, doc: &Document, visited: &mut HashSet<ObjectHash>) -> CoreResult<()> {
        if !visited.insert(doc.hash()) {
            return Ok(());
        }
        let metadata = self.root_metadata(doc, "remove")?;

        if metadata.references().any(|f| f.cascade.remove) {
            doc.initialize()?;
        }
        for target in self.cascade_targets(&metadata, doc, |c| c.remove)? {
            self.do_remove(&target, visited)?;
        }

        match self.document_state(doc) {
            LifecycleState::New | LifecycleState::Removed => Ok(()),
            LifecycleState::Detached => {
                warn!(type_name = %metadata.type_name(), hash = doc.hash(), "ignoring removal of detached document");
                Ok(())
            }
            LifecycleState::Managed => {
                self.sink.pre_remove(doc, self);
                let mut guard = self.lock_state()?;
                let state = &mut *guard;
                if state.inserts.contains(doc.hash()) {
                    state.forget(doc.hash());
                    debug!(type_name = %metadata.type_name(), hash = doc.hash(), "insert cancelled");
                    return Ok(());
                }
                state.updates.remove(doc.hash());
                let seq = state.next_seq();
                state.deletes.push(doc.hash(), seq);
                if let Some(entry) = state.entries.get_mut(&doc.hash()) {
                    entry.state = LifecycleState::Removed;
                    entry.change_set = None;
                }
                debug!(type_name = %metadata.type_name(), hash = doc.hash(), seq, "scheduled delete");
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Refresh / detach / merge
    // ------------------------------------------------------------------

    /// Overwrite `doc` with its stored state, discarding unflushed changes to
    /// it. Cascades per cascade-refresh.
    pub fn refresh(&self, doc: &Document) -> CoreResult<()> {
        self.check_open()?;
        let mut visited = HashSet::new();
        self.do_refresh(doc, &mut visited)
    }

    fn do_refresh(&self, doc: &Document, visited: &mut HashSet<ObjectHash>) -> CoreResult<()> {
        if !visited.insert(doc.hash()) {
            return Ok(());
        }
        let metadata = self.root_metadata(doc, "refresh")?;
        let (id, lock) = self.managed_identity(doc, &metadata)?;

        let data = self
            .fetch(&metadata, &id, lock)?
            .ok_or_else(|| not_found(&metadata, &id))?;
        self.load_into(doc, &metadata, data, HydrationHints::refresh())?;
        self.lock_state()?.updates.remove(doc.hash());
        debug!(type_name = %metadata.type_name(), id = %id, "refreshed");

        for target in self.cascade_targets(&metadata, doc, |c| c.refresh)? {
            self.do_refresh(&target, visited)?;
        }
        Ok(())
    }

    /// Stop tracking `doc`. Its pending operations are dropped; other
    /// documents referencing it keep their references.
    pub fn detach(&self, doc: &Document) -> CoreResult<()> {
        let mut visited = HashSet::new();
        self.do_detach(doc, &mut visited)
    }

    fn do_detach(&self, doc: &Document, visited: &mut HashSet<ObjectHash>) -> CoreResult<()> {
        if !visited.insert(doc.hash()) {
            return Ok(());
        }
        let metadata = self.metadata.metadata_for(doc.type_name())?;
        for target in self.cascade_targets(&metadata, doc, |c| c.detach)? {
            self.do_detach(&target, visited)?;
        }

        let mut state = self.lock_state()?;
        if state.forget(doc.hash()).is_some() {
            doc.mark_detached_from(self.id);
            debug!(type_name = %metadata.type_name(), hash = doc.hash(), "detached");
        }
        Ok(())
    }

    /// The managed instance for the identity of `doc`, with the field values
    /// of `doc` copied onto it. `doc` itself never becomes managed.
    ///
    /// A document without an identifier is copied and persisted. A versioned
    /// document whose version differs from the managed one is rejected.
    pub fn merge(&self, doc: &Document) -> CoreResult<Document> {
        self.check_open()?;
        let mut visited = HashMap::new();
        self.do_merge(doc, &mut visited)
    }

    fn do_merge(
        &self,
        doc: &Document,
        visited: &mut HashMap<ObjectHash, Document>,
    ) -> CoreResult<Document> {
        if let Some(merged) = visited.get(&doc.hash()) {
            return Ok(merged.clone());
        }
        let metadata = self.root_metadata(doc, "merge")?;

        match self.document_state(doc) {
            LifecycleState::Managed => {
                visited.insert(doc.hash(), doc.clone());
                for target in self.cascade_targets(&metadata, doc, |c| c.merge)? {
                    self.do_merge(&target, visited)?;
                }
                return Ok(doc.clone());
            }
            LifecycleState::Removed => {
                return Err(CoreError::InvalidArgument(format!(
                    "cannot merge {doc:?}: it is scheduled for deletion"
                )));
            }
            LifecycleState::New | LifecycleState::Detached => {}
        }

        let mut persist_copy = false;
        let managed = match doc.id() {
            None => {
                persist_copy = true;
                Document::new(metadata.type_name())
            }
            Some(id) => match self.try_get_by_id(&id, &metadata) {
                Some(existing) => {
                    existing.initialize()?;
                    existing
                }
                None => match self.load(metadata.type_name(), &id, LockMode::None)? {
                    Some(loaded) => loaded,
                    None => {
                        persist_copy = true;
                        Document::with_id(metadata.type_name(), id)
                    }
                },
            },
        };

        if let Some(version_field) = metadata.version_field.as_deref() {
            let theirs = doc.peek(version_field).unwrap_or(FieldValue::Null);
            let ours = managed.peek(version_field).unwrap_or(FieldValue::Null);
            if !persist_copy && !theirs.is_null() && theirs != ours {
                return Err(CoreError::ConcurrentModification {
                    type_name: metadata.type_name().to_string(),
                    id: managed.id().map(|id| id.to_string()).unwrap_or_default(),
                    reason: format!("merged version {theirs:?} does not match managed version {ours:?}"),
                });
            }
        }
        visited.insert(doc.hash(), managed.clone());

        for mapping in &metadata.fields {
            if metadata.version_field.as_deref() == Some(mapping.name.as_str()) && !persist_copy {
                continue;
            }
            let Some(value) = doc.peek(&mapping.name) else {
                continue;
            };
            let value = if mapping.is_reference() {
                self.merge_reference(&value, mapping.cascade.merge, visited)?
            } else {
                value
            };
            managed.put(mapping.name.clone(), value);
        }

        if persist_copy {
            self.do_persist(&managed, &mut HashSet::new())?;
        }
        debug!(type_name = %metadata.type_name(), hash = managed.hash(), "merged");
        Ok(managed)
    }

    fn merge_reference(
        &self,
        value: &FieldValue,
        cascade: bool,
        visited: &mut HashMap<ObjectHash, Document>,
    ) -> CoreResult<FieldValue> {
        match value {
            FieldValue::Reference(target) => {
                if self.document_state(target) == LifecycleState::Managed {
                    return Ok(value.clone());
                }
                if cascade {
                    return Ok(FieldValue::Reference(self.do_merge(target, visited)?));
                }
                match target.id() {
                    Some(id) => Ok(FieldValue::Reference(self.get_reference(target.type_name(), id)?)),
                    None => Ok(value.clone()),
                }
            }
            FieldValue::Array(items) => Ok(FieldValue::Array(
                items
                    .iter()
                    .map(|item| self.merge_reference(item, cascade, visited))
                    .collect::<CoreResult<_>>()?,
            )),
            other => Ok(other.clone()),
        }
    }

    // ------------------------------------------------------------------
    // Locking
    // ------------------------------------------------------------------

    /// Lock a managed document.
    ///
    /// Optimistic locking requires a versioned type; when `version` is given
    /// it must equal the document's current version. Pessimistic modes are
    /// applied to every later read and write of the document and, when the
    /// type maps a lock field, written to storage immediately.
    pub fn lock(&self, doc: &Document, mode: LockMode, version: Option<i64>) -> CoreResult<()> {
        self.check_open()?;
        let metadata = self.root_metadata(doc, "lock")?;
        let (id, _) = self.managed_identity(doc, &metadata)?;

        match mode {
            LockMode::Optimistic => {
                let version_field = metadata.version_field.as_deref().ok_or_else(|| {
                    CoreError::InvalidArgument(format!(
                        "{} is not versioned and cannot be locked optimistically",
                        metadata.type_name()
                    ))
                })?;
                if let Some(expected) = version {
                    let current = doc.get(version_field)?.as_i64();
                    if current != Some(expected) {
                        return Err(CoreError::ConcurrentModification {
                            type_name: metadata.type_name().to_string(),
                            id: id.to_string(),
                            reason: format!(
                                "expected version {expected}, found {}",
                                current.map(|v| v.to_string()).unwrap_or_else(|| "none".into())
                            ),
                        });
                    }
                }
            }
            LockMode::PessimisticRead | LockMode::PessimisticWrite => {
                if let Some(lock_field) = metadata.lock_field.as_deref() {
                    let key = storage_key(&metadata, lock_field);
                    let command = UpdateCommand::new(id.to_json()).set(key, json!(mode.code()));
                    self.write_lock_field(&metadata, &id, &command, mode)?;
                    self.record_field(doc, lock_field, FieldValue::Int(mode.code()))?;
                }
            }
            LockMode::None => {}
        }

        if let Some(entry) = self.lock_state()?.entries.get_mut(&doc.hash()) {
            entry.lock = mode;
        }
        debug!(type_name = %metadata.type_name(), id = %id, mode = %mode, "locked");
        Ok(())
    }

    /// Release a lock taken with [`UnitOfWork::lock`].
    pub fn unlock(&self, doc: &Document) -> CoreResult<()> {
        self.check_open()?;
        let metadata = self.root_metadata(doc, "unlock")?;
        let (id, lock) = self.managed_identity(doc, &metadata)?;

        if let Some(lock_field) = metadata.lock_field.as_deref() {
            let command = UpdateCommand::new(id.to_json()).unset(storage_key(&metadata, lock_field));
            self.write_lock_field(&metadata, &id, &command, lock)?;
            self.record_field(doc, lock_field, FieldValue::Null)?;
        }
        if let Some(entry) = self.lock_state()?.entries.get_mut(&doc.hash()) {
            entry.lock = LockMode::None;
        }
        debug!(type_name = %metadata.type_name(), id = %id, "unlocked");
        Ok(())
    }

    fn write_lock_field(
        &self,
        metadata: &ClassMetadata,
        id: &DocumentId,
        command: &UpdateCommand,
        lock: LockMode,
    ) -> CoreResult<()> {
        let collection = self.storage.collection_for(metadata)?;
        let options = write_options(&WriteOptions::default(), lock);
        collection
            .update(command, &options)
            .map_err(|e| storage_failure(Operation::Update, metadata, Some(id), e))?;
        Ok(())
    }

    /// Set a field on the document and in its snapshot, so the change is
    /// not flushed again.
    fn record_field(&self, doc: &Document, field: &str, value: FieldValue) -> CoreResult<()> {
        doc.put(field, value.clone());
        if let Some(entry) = self.lock_state()?.entries.get_mut(&doc.hash()) {
            entry.original.insert(field.to_string(), value);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------

    /// Flush scheduled work to storage.
    ///
    /// With `doc`, only that document and the documents reachable from it
    /// through cascade-persist are flushed. Inserts run in dependency order,
    /// then updates, then deletes. Each successful operation is dequeued and
    /// its snapshot advanced at once; on failure the failed operation and
    /// everything after it stay scheduled and the error is returned.
    pub fn commit(&self, doc: Option<&Document>, options: &WriteOptions) -> CoreResult<()> {
        let _commit = self.commit_lock.lock().map_err(|_| CoreError::poisoned("commit"))?;
        self.check_open()?;
        if let Some(doc) = doc {
            if !matches!(
                self.document_state(doc),
                LifecycleState::Managed | LifecycleState::Removed
            ) {
                return Err(CoreError::InvalidArgument(format!(
                    "cannot flush {doc:?}: it is not managed"
                )));
            }
        }

        self.sink.pre_flush(self);
        self.cascade_managed_persists()?;
        let scope = doc.map(|d| self.commit_scope(d)).transpose()?;
        self.compute_change_sets(scope.as_ref())?;

        if self.nothing_scheduled(scope.as_ref())? {
            debug!("nothing to flush");
            return Ok(());
        }
        self.sink.on_flush(self);

        let inserted = self.execute_inserts(scope.as_ref(), options)?;
        let updated = self.execute_updates(scope.as_ref(), options)?;
        let removed = self.execute_deletes(scope.as_ref(), options)?;
        info!(inserted, updated, removed, "flush complete");

        self.sink.post_flush(self);
        Ok(())
    }

    /// Pick up documents newly attached to managed ones via cascade-persist.
    fn cascade_managed_persists(&self) -> CoreResult<()> {
        let roots: Vec<Document> = {
            let state = self.lock_state()?;
            state
                .entries
                .values()
                .filter(|e| e.state == LifecycleState::Managed)
                .map(|e| e.doc.clone())
                .collect()
        };
        let mut visited = HashSet::new();
        for root in roots {
            self.do_persist(&root, &mut visited)?;
        }
        Ok(())
    }

    fn commit_scope(&self, doc: &Document) -> CoreResult<HashSet<ObjectHash>> {
        let mut scope = HashSet::new();
        let mut stack = vec![doc.clone()];
        while let Some(next) = stack.pop() {
            if !scope.insert(next.hash()) {
                continue;
            }
            let metadata = self.metadata.metadata_for(next.type_name())?;
            stack.extend(self.cascade_targets(&metadata, &next, |c| c.persist)?);
        }
        Ok(scope)
    }

    fn compute_change_sets(&self, scope: Option<&HashSet<ObjectHash>>) -> CoreResult<()> {
        let candidates: Vec<(ObjectHash, Document, Arc<ClassMetadata>, Snapshot)> = {
            let state = self.lock_state()?;
            state
                .entries
                .iter()
                .filter(|(key, e)| {
                    e.state == LifecycleState::Managed
                        && in_scope(scope, **key)
                        && !state.inserts.contains(**key)
                        && !state.deletes.contains(**key)
                        && e.doc.is_initialized()
                })
                .map(|(key, e)| (*key, e.doc.clone(), Arc::clone(&e.metadata), e.original.clone()))
                .collect()
        };

        let computed: Vec<(ObjectHash, ChangeSet)> = candidates
            .into_iter()
            .map(|(key, doc, metadata, original)| {
                (key, compute_change_set(&original, &mapped_fields(&metadata, &doc)))
            })
            .collect();

        let mut guard = self.lock_state()?;
        let state = &mut *guard;
        for (key, changes) in computed {
            if changes.is_empty() {
                state.updates.remove(key);
                if let Some(entry) = state.entries.get_mut(&key) {
                    entry.change_set = None;
                }
                continue;
            }
            if !state.updates.contains(key) {
                let seq = state.next_seq();
                state.updates.push(key, seq);
            }
            if let Some(entry) = state.entries.get_mut(&key) {
                debug!(type_name = %entry.metadata.type_name(), changed = changes.len(), "scheduled update");
                entry.change_set = Some(changes);
            }
        }
        Ok(())
    }

    fn nothing_scheduled(&self, scope: Option<&HashSet<ObjectHash>>) -> CoreResult<bool> {
        let state = self.lock_state()?;
        let empty = |queue: &ScheduleQueue| {
            queue.is_empty() || !queue.keys().into_iter().any(|k| in_scope(scope, k))
        };
        Ok(empty(&state.inserts) && empty(&state.updates) && empty(&state.deletes))
    }

    fn execute_inserts(
        &self,
        scope: Option<&HashSet<ObjectHash>>,
        options: &WriteOptions,
    ) -> CoreResult<usize> {
        let nodes: Vec<CommitNode> = {
            let state = self.lock_state()?;
            state
                .inserts
                .keys()
                .into_iter()
                .filter(|k| in_scope(scope, *k))
                .filter_map(|key| {
                    let entry = state.entries.get(&key)?;
                    let depends_on = mapped_fields(&entry.metadata, &entry.doc)
                        .values()
                        .flat_map(FieldValue::references)
                        .map(|d| d.hash())
                        .filter(|h| state.inserts.contains(*h))
                        .collect();
                    Some(CommitNode {
                        key,
                        seq: state.inserts.seq(key)?,
                        depends_on,
                    })
                })
                .collect()
        };
        let plan = plan_inserts(&nodes);
        if !plan.deferred.is_empty() {
            debug!(deferred = plan.deferred.len(), "reference cycle among inserts");
        }

        let mut count = 0;
        for key in plan.order {
            let Some((doc, metadata, lock)) = self.entry_parts(key)? else {
                continue;
            };
            if let Some(version_field) = metadata.version_field.as_deref() {
                if doc.peek(version_field).map_or(true, |v| v.is_null()) {
                    doc.put(version_field, 1);
                }
            }

            let fields = mapped_fields(&metadata, &doc);
            let omit: HashSet<String> = match plan.deferred.get(&key) {
                Some(deferred) => fields
                    .iter()
                    .filter(|(_, v)| v.references().iter().any(|r| deferred.contains(&r.hash())))
                    .map(|(name, _)| name.clone())
                    .collect(),
                None => HashSet::new(),
            };

            let id = doc.id();
            let raw = persister::to_raw(&*self.metadata, &metadata, id.as_ref(), &fields, &omit)?;
            let collection = self.storage.collection_for(&metadata)?;
            let stored_id = collection
                .insert(&raw, &write_options(options, lock))
                .map_err(|e| storage_failure(Operation::Insert, &metadata, id.as_ref(), e))?;

            let id = match id {
                Some(id) => id,
                None => {
                    let id = DocumentId::cast(&stored_id, metadata.id_type).map_err(|e| {
                        CoreError::InvalidData {
                            type_name: metadata.type_name().to_string(),
                            field: metadata.identifier.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                    doc.set_id(id.clone())?;
                    id
                }
            };
            debug!(type_name = %metadata.type_name(), id = %id, omitted = omit.len(), "inserted");

            {
                let mut guard = self.lock_state()?;
                let state = &mut *guard;
                state.identity_map.insert(metadata.type_name(), id, &doc);
                state.inserts.remove(key);
                let mut snapshot = fields;
                snapshot.retain(|name, _| !omit.contains(name));
                if !omit.is_empty() {
                    let seq = state.next_seq();
                    state.updates.push(key, seq);
                }
                if let Some(entry) = state.entries.get_mut(&key) {
                    entry.original = snapshot;
                    entry.change_set = None;
                    entry.deferred_refs = !omit.is_empty();
                }
            }
            count += 1;
            self.sink.post_persist(&doc, self);
        }
        Ok(count)
    }

    fn execute_updates(
        &self,
        scope: Option<&HashSet<ObjectHash>>,
        options: &WriteOptions,
    ) -> CoreResult<usize> {
        let keys: Vec<ObjectHash> = {
            let state = self.lock_state()?;
            let (deferred, rest): (Vec<ObjectHash>, Vec<ObjectHash>) = state
                .updates
                .keys()
                .into_iter()
                .filter(|k| in_scope(scope, *k))
                .partition(|k| state.entries.get(k).is_some_and(|e| e.deferred_refs));
            deferred.into_iter().chain(rest).collect()
        };

        let mut count = 0;
        for key in keys {
            let Some((doc, metadata, lock)) = self.entry_parts(key)? else {
                continue;
            };
            let Some(original) = self.original_document_data(&doc) else {
                continue;
            };

            let changes = compute_change_set(&original, &mapped_fields(&metadata, &doc));
            if !changes.is_empty() {
                self.sink.pre_update(&doc, &changes, self);
            }
            let current = mapped_fields(&metadata, &doc);
            let changes = compute_change_set(&original, &current);
            if changes.is_empty() {
                self.lock_state()?.updates.remove(key);
                continue;
            }

            let id = doc.id().ok_or_else(|| {
                CoreError::IllegalState(format!("{doc:?} is scheduled for update without an identifier"))
            })?;
            let mut command = persister::update_command(&*self.metadata, &metadata, &id, &changes)?;
            let mut next_version = None;
            if let Some(version_field) = metadata.version_field.as_deref() {
                let key = storage_key(&metadata, version_field);
                let expected = original.get(version_field).and_then(FieldValue::as_i64);
                if let Some(v) = expected {
                    command = command.expect(key.clone(), json!(v));
                }
                let next = expected.map_or(1, |v| v + 1);
                command = command.set(key, json!(next));
                next_version = Some(next);
            }

            let collection = self.storage.collection_for(&metadata)?;
            let matched = collection
                .update(&command, &write_options(options, lock))
                .map_err(|e| storage_failure(Operation::Update, &metadata, Some(&id), e))?;
            if matched == 0 {
                if metadata.is_versioned() {
                    return Err(CoreError::ConcurrentModification {
                        type_name: metadata.type_name().to_string(),
                        id: id.to_string(),
                        reason: "stored version no longer matches".into(),
                    });
                }
                warn!(type_name = %metadata.type_name(), id = %id, "update matched no document");
            }
            debug!(type_name = %metadata.type_name(), id = %id, changed = changes.len(), "updated");

            let mut snapshot = current;
            if let (Some(field), Some(next)) = (metadata.version_field.as_deref(), next_version) {
                doc.put(field, next);
                snapshot.insert(field.to_string(), FieldValue::Int(next));
            }
            {
                let mut guard = self.lock_state()?;
                let state = &mut *guard;
                state.updates.remove(key);
                if let Some(entry) = state.entries.get_mut(&key) {
                    entry.original = snapshot;
                    entry.change_set = None;
                    entry.deferred_refs = false;
                }
            }
            count += 1;
            self.sink.post_update(&doc, self);
        }
        Ok(count)
    }

    fn execute_deletes(
        &self,
        scope: Option<&HashSet<ObjectHash>>,
        options: &WriteOptions,
    ) -> CoreResult<usize> {
        let keys: Vec<ObjectHash> = {
            let state = self.lock_state()?;
            state.deletes.keys().into_iter().filter(|k| in_scope(scope, *k)).collect()
        };

        let mut count = 0;
        for key in keys {
            let Some((doc, metadata, lock)) = self.entry_parts(key)? else {
                continue;
            };
            let id = doc.id().ok_or_else(|| {
                CoreError::IllegalState(format!("{doc:?} is scheduled for delete without an identifier"))
            })?;
            let collection = self.storage.collection_for(&metadata)?;
            collection
                .remove(&id.to_json(), &write_options(options, lock))
                .map_err(|e| storage_failure(Operation::Remove, &metadata, Some(&id), e))?;
            debug!(type_name = %metadata.type_name(), id = %id, "removed");

            self.lock_state()?.forget(key);
            count += 1;
            self.sink.post_remove(&doc, self);
        }
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Clear
    // ------------------------------------------------------------------

    /// Detach every tracked document, or only those of `type_name`, and drop
    /// their scheduled operations.
    pub fn clear(&self, type_name: Option<&str>) -> CoreResult<()> {
        let type_name = type_name.map(odm_types::normalize_type_name);
        let cleared = {
            let mut state = self.lock_state()?;
            let keys: Vec<ObjectHash> = state
                .entries
                .iter()
                .filter(|(_, e)| type_name.map_or(true, |t| e.doc.type_name() == t))
                .map(|(k, _)| *k)
                .collect();
            for key in &keys {
                if let Some(entry) = state.forget(*key) {
                    entry.doc.mark_detached_from(self.id);
                }
            }
            state.identity_map.clear(type_name);
            keys.len()
        };
        debug!(type_name = type_name.unwrap_or("*"), cleared, "cleared unit of work");
        self.sink.on_clear(type_name, self);
        Ok(())
    }

    // ------------------------------------------------------------------
    // References and loading
    // ------------------------------------------------------------------

    /// Track `doc` as managed under `id` without scheduling anything; its
    /// snapshot becomes `data`.
    pub fn register_managed(&self, doc: &Document, id: DocumentId, data: Snapshot) -> CoreResult<()> {
        let metadata = self.root_metadata(doc, "register")?;
        if let Some(existing) = self.try_get_by_id(&id, &metadata) {
            if !existing.same_instance(doc) {
                return Err(CoreError::InvalidArgument(format!(
                    "another instance of {}#{id} is already managed",
                    metadata.type_name()
                )));
            }
        }
        doc.set_id(id.clone())?;
        let adopted = self.adopt(doc, id.clone(), &metadata, data)?;
        if !adopted.same_instance(doc) {
            return Err(CoreError::InvalidArgument(format!(
                "another instance of {}#{id} is already managed",
                metadata.type_name()
            )));
        }
        Ok(())
    }

    /// Map `doc` under `id` unless another instance already is; returns the
    /// instance that ends up mapped.
    fn adopt(
        &self,
        doc: &Document,
        id: DocumentId,
        metadata: &Arc<ClassMetadata>,
        data: Snapshot,
    ) -> CoreResult<Document> {
        let mut guard = self.lock_state()?;
        let state = &mut *guard;
        if let Some(existing) = state.identity_map.insert(metadata.type_name(), id.clone(), doc) {
            if !existing.same_instance(doc) {
                return Ok(existing);
            }
        }
        doc.clear_detached();
        match state.entries.get_mut(&doc.hash()) {
            Some(entry) => {
                entry.original = data;
                entry.state = LifecycleState::Managed;
            }
            None => {
                state.entries.insert(
                    doc.hash(),
                    Entry::managed(doc.clone(), Arc::clone(metadata), data),
                );
            }
        }
        debug!(type_name = %metadata.type_name(), id = %id, "registered managed document");
        Ok(doc.clone())
    }

    /// The managed instance for `(type_name, id)` if there is one, otherwise
    /// a new lazy reference, registered as managed.
    pub fn get_reference(&self, type_name: &str, id: impl Into<DocumentId>) -> CoreResult<Document> {
        let id = id.into();
        let metadata = self.metadata.metadata_for(type_name)?;
        if let Some(doc) = self.try_get_by_id(&id, &metadata) {
            return Ok(doc);
        }
        let proxy = self.proxies.get_proxy(metadata.type_name(), id.clone());
        self.adopt(&proxy, id, &metadata, Snapshot::new())
    }

    /// Like [`UnitOfWork::get_reference`], but the placeholder never loads:
    /// fields other than the identifier read as null.
    pub fn get_partial_reference(
        &self,
        type_name: &str,
        id: impl Into<DocumentId>,
    ) -> CoreResult<Document> {
        let id = id.into();
        let metadata = self.metadata.metadata_for(type_name)?;
        if let Some(doc) = self.try_get_by_id(&id, &metadata) {
            return Ok(doc);
        }
        let partial = self.proxies.get_partial(metadata.type_name(), id.clone());
        self.adopt(&partial, id, &metadata, Snapshot::new())
    }

    /// Load a lazy reference now; no-op for anything else.
    pub fn initialize_object(&self, doc: &Document) -> CoreResult<()> {
        doc.initialize()
    }

    /// Load every lazy reference held by `value`.
    pub fn initialize_value(&self, value: &FieldValue) -> CoreResult<()> {
        for doc in value.references() {
            doc.initialize()?;
        }
        Ok(())
    }

    /// The managed instance for raw stored data.
    ///
    /// An already mapped, initialized instance is returned untouched unless
    /// the refresh hint is set. Otherwise the instance is registered before it
    /// is hydrated, so references back to it resolve to the same instance.
    pub fn get_or_create_document(
        &self,
        type_name: &str,
        data: RawDocument,
        hints: HydrationHints,
    ) -> CoreResult<Document> {
        let metadata = self.metadata.metadata_for(type_name)?;
        let raw_id = data.get(ID_KEY).ok_or_else(|| CoreError::InvalidData {
            type_name: metadata.type_name().to_string(),
            field: ID_KEY.to_string(),
            reason: "missing identifier".into(),
        })?;
        let id = cast_id(&metadata, raw_id)?;

        if let Some(existing) = self.try_get_by_id(&id, &metadata) {
            if existing.is_initialized() && !hints.refresh {
                return Ok(existing);
            }
            self.load_into(&existing, &metadata, data, hints)?;
            return Ok(existing);
        }

        let fresh = Document::with_id(metadata.type_name(), id.clone());
        let doc = self.adopt(&fresh, id, &metadata, Snapshot::new())?;
        if !doc.same_instance(&fresh) && doc.is_initialized() && !hints.refresh {
            return Ok(doc);
        }
        self.load_into(&doc, &metadata, data, hints)?;
        Ok(doc)
    }

    /// Read `(type_name, id)` from storage into its managed instance.
    /// Returns `None` when storage does not hold it.
    pub fn load(&self, type_name: &str, id: &DocumentId, lock: LockMode) -> CoreResult<Option<Document>> {
        self.check_open()?;
        let metadata = self.metadata.metadata_for(type_name)?;
        let Some(data) = self.fetch(&metadata, id, lock)? else {
            return Ok(None);
        };
        let doc = self.get_or_create_document(metadata.type_name(), data, HydrationHints::default())?;
        if lock.is_pessimistic() {
            if let Some(entry) = self.lock_state()?.entries.get_mut(&doc.hash()) {
                entry.lock = lock;
            }
        }
        Ok(Some(doc))
    }

    /// Hydrate `doc` from `data` with this unit of work as context.
    pub fn hydrate(&self, doc: &Document, data: &RawDocument, hints: HydrationHints) -> CoreResult<Vec<String>> {
        self.hydrators.hydrate(doc, data, self, &hints)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn fetch(
        &self,
        metadata: &ClassMetadata,
        id: &DocumentId,
        lock: LockMode,
    ) -> CoreResult<Option<RawDocument>> {
        let collection = self.storage.collection_for(metadata)?;
        let options = ReadOptions {
            lock: lock.is_pessimistic().then_some(lock),
        };
        collection
            .find_by_id(&id.to_json(), &options)
            .map_err(|e| storage_failure(Operation::Find, metadata, Some(id), e))
    }

    /// Hydrate a tracked document and make the result its snapshot.
    fn load_into(
        &self,
        doc: &Document,
        metadata: &ClassMetadata,
        data: RawDocument,
        hints: HydrationHints,
    ) -> CoreResult<()> {
        self.sink.pre_load(doc, &data, self);
        self.hydrators.hydrate(doc, &data, self, &hints)?;
        let snapshot = mapped_fields(metadata, doc);
        if let Some(entry) = self.lock_state()?.entries.get_mut(&doc.hash()) {
            entry.original = snapshot;
            entry.change_set = None;
        }
        self.sink.post_load(doc, self);
        Ok(())
    }

    fn entry_parts(&self, key: ObjectHash) -> CoreResult<Option<(Document, Arc<ClassMetadata>, LockMode)>> {
        Ok(self
            .lock_state()?
            .entries
            .get(&key)
            .map(|e| (e.doc.clone(), Arc::clone(&e.metadata), e.lock)))
    }

    /// Metadata of `doc`, which must be of a root (non-embedded) type.
    fn root_metadata(&self, doc: &Document, operation: &str) -> CoreResult<Arc<ClassMetadata>> {
        let metadata = self.metadata.metadata_for(doc.type_name())?;
        if metadata.is_embedded {
            return Err(CoreError::InvalidArgument(format!(
                "cannot {operation} {doc:?}: {} is an embedded type",
                metadata.type_name()
            )));
        }
        Ok(metadata)
    }

    /// Identifier and lock of a managed document.
    fn managed_identity(&self, doc: &Document, metadata: &ClassMetadata) -> CoreResult<(DocumentId, LockMode)> {
        let lock = {
            let state = self.read_state();
            match state.entries.get(&doc.hash()) {
                Some(entry) if entry.state == LifecycleState::Managed => entry.lock,
                _ => {
                    return Err(CoreError::InvalidArgument(format!(
                        "{doc:?} is not managed by this unit of work"
                    )));
                }
            }
        };
        let id = doc.id().ok_or_else(|| {
            CoreError::InvalidArgument(format!(
                "{doc:?} of {} has no identifier yet",
                metadata.type_name()
            ))
        })?;
        Ok((id, lock))
    }

    fn cascade_targets(
        &self,
        metadata: &ClassMetadata,
        doc: &Document,
        pick: fn(&Cascade) -> bool,
    ) -> CoreResult<Vec<Document>> {
        let mut out = Vec::new();
        self.collect_cascaded(metadata, &doc.peek_fields(), pick, &mut out)?;
        Ok(out)
    }

    fn collect_cascaded(
        &self,
        metadata: &ClassMetadata,
        fields: &BTreeMap<String, FieldValue>,
        pick: fn(&Cascade) -> bool,
        out: &mut Vec<Document>,
    ) -> CoreResult<()> {
        for mapping in &metadata.fields {
            let Some(value) = fields.get(&mapping.name) else {
                continue;
            };
            if mapping.is_reference() {
                if pick(&mapping.cascade) {
                    out.extend(value.references());
                }
            } else if mapping.is_embedded() {
                for embedded in embedded_values(value) {
                    let inner = self.metadata.metadata_for(&embedded.type_name)?;
                    self.collect_cascaded(&inner, &embedded.fields, pick, out)?;
                }
            }
        }
        Ok(())
    }

    fn check_open(&self) -> CoreResult<()> {
        if self.is_closed() {
            return Err(CoreError::IllegalState("the unit of work is closed".into()));
        }
        Ok(())
    }

    fn lock_state(&self) -> CoreResult<MutexGuard<'_, UowState>> {
        self.state.lock().map_err(|_| CoreError::poisoned("unit of work"))
    }

    // Queries only read, so a poisoned lock is still good enough for them.
    fn read_state(&self) -> MutexGuard<'_, UowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProxyLoader for UnitOfWork {
    fn load_proxy(&self, doc: &Document) -> CoreResult<()> {
        self.check_open()?;
        let metadata = self.metadata.metadata_for(doc.type_name())?;
        let id = doc
            .id()
            .ok_or_else(|| CoreError::IllegalState(format!("lazy reference {doc:?} has no identifier")))?;
        let (lock, removed) = {
            let state = self.read_state();
            let lock = state.entries.get(&doc.hash()).map(|e| e.lock).unwrap_or_default();
            (lock, state.deletes.contains(doc.hash()))
        };
        if removed {
            warn!(type_name = %metadata.type_name(), id = %id, "loading lazy reference scheduled for deletion");
        }

        let data = self
            .fetch(&metadata, &id, lock)?
            .ok_or_else(|| not_found(&metadata, &id))?;
        self.load_into(doc, &metadata, data, HydrationHints::default())
    }
}

impl HydrationContext for UnitOfWork {
    fn reference(&self, type_name: &str, raw_id: &Value) -> CoreResult<Document> {
        let metadata = self.metadata.metadata_for(type_name)?;
        let id = cast_id(&metadata, raw_id)?;
        self.get_reference(metadata.type_name(), id)
    }

    fn embedded_plan(&self, type_name: &str) -> CoreResult<Arc<HydrationPlan>> {
        self.hydrators.plan_for(type_name)
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read_state();
        f.debug_struct("UnitOfWork")
            .field("managed", &state.entries.len())
            .field("inserts", &state.inserts.by_seq.len())
            .field("updates", &state.updates.by_seq.len())
            .field("deletes", &state.deletes.by_seq.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn in_scope(scope: Option<&HashSet<ObjectHash>>, key: ObjectHash) -> bool {
    scope.map_or(true, |s| s.contains(&key))
}

/// Current values of the mapped fields of `doc`. Never loads.
fn mapped_fields(metadata: &ClassMetadata, doc: &Document) -> Snapshot {
    let mut fields = doc.peek_fields();
    fields.retain(|name, _| metadata.field(name).is_some());
    fields
}

fn embedded_values(value: &FieldValue) -> Vec<&EmbeddedValue> {
    match value {
        FieldValue::Embedded(embedded) => vec![embedded],
        FieldValue::Array(items) => items.iter().flat_map(embedded_values).collect(),
        _ => Vec::new(),
    }
}

fn storage_key(metadata: &ClassMetadata, field: &str) -> String {
    metadata
        .field(field)
        .map(|f| f.storage_key.clone())
        .unwrap_or_else(|| field.to_string())
}

fn write_options(options: &WriteOptions, lock: LockMode) -> WriteOptions {
    if lock.is_pessimistic() {
        options.with_lock(Some(lock))
    } else {
        options.clone()
    }
}

fn generate_id(metadata: &ClassMetadata) -> CoreResult<DocumentId> {
    match metadata.id_type {
        FieldType::String => Ok(DocumentId::String(DocumentId::generate().to_string())),
        FieldType::Id | FieldType::Uuid => Ok(DocumentId::generate()),
        other => Err(CoreError::InvalidArgument(format!(
            "cannot generate {other} identifiers for {}",
            metadata.type_name()
        ))),
    }
}

fn cast_id(metadata: &ClassMetadata, raw: &Value) -> CoreResult<DocumentId> {
    DocumentId::cast(raw, metadata.id_type).map_err(|e| CoreError::InvalidData {
        type_name: metadata.type_name().to_string(),
        field: metadata.identifier.clone(),
        reason: e.to_string(),
    })
}

fn not_found(metadata: &ClassMetadata, id: &DocumentId) -> CoreError {
    CoreError::DocumentNotFound {
        type_name: metadata.type_name().to_string(),
        id: id.to_string(),
    }
}

fn storage_failure(
    operation: Operation,
    metadata: &ClassMetadata,
    id: Option<&DocumentId>,
    source: StoreError,
) -> CoreError {
    CoreError::StorageFailure {
        operation,
        type_name: metadata.type_name().to_string(),
        identifier: id.map(ToString::to_string),
        source,
    }
}
