//! In-memory document handles.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use odm_types::{normalize_type_name, DocumentId};
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::proxy::ProxyLoader;
use crate::value::FieldValue;

/// Process-unique key of one in-memory instance, used for out-of-band
/// bookkeeping by the unit of work.
pub type ObjectHash = u64;

static NEXT_HASH: AtomicU64 = AtomicU64::new(1);

/// Load state of an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyState {
    /// A regular instance, or a proxy that has been materialized.
    Loaded,
    /// A lazy reference whose data has not been loaded yet.
    Uninitialized,
    /// A partial reference: only the identifier is meaningful.
    Partial,
}

/// Handle to one in-memory document instance.
///
/// Cloning the handle does not copy the document: all clones address the same
/// instance, as [`Document::same_instance`] reports. Reading or writing a field
/// through [`Document::get`] / [`Document::set`] on an uninitialized lazy
/// reference loads it first; the identifier never triggers a load.
#[derive(Clone)]
pub struct Document {
    cell: Arc<DocumentCell>,
}

struct DocumentCell {
    hash: ObjectHash,
    type_name: String,
    data: RwLock<DocumentData>,
    loader: Option<Weak<dyn ProxyLoader>>,
    /// Unit of work this instance was last detached from; 0 when none.
    detached_from: AtomicU64,
}

struct DocumentData {
    id: Option<DocumentId>,
    fields: BTreeMap<String, FieldValue>,
    proxy: ProxyState,
}

impl Document {
    /// A new, unmanaged instance of `type_name`.
    pub fn new(type_name: impl AsRef<str>) -> Self {
        Self::build(type_name.as_ref(), None, ProxyState::Loaded, None)
    }

    /// A new, unmanaged instance with its identifier already assigned.
    pub fn with_id(type_name: impl AsRef<str>, id: impl Into<DocumentId>) -> Self {
        Self::build(type_name.as_ref(), Some(id.into()), ProxyState::Loaded, None)
    }

    pub(crate) fn proxy(type_name: &str, id: DocumentId, loader: Weak<dyn ProxyLoader>) -> Self {
        Self::build(type_name, Some(id), ProxyState::Uninitialized, Some(loader))
    }

    pub(crate) fn partial(type_name: &str, id: DocumentId) -> Self {
        Self::build(type_name, Some(id), ProxyState::Partial, None)
    }

    fn build(
        type_name: &str,
        id: Option<DocumentId>,
        proxy: ProxyState,
        loader: Option<Weak<dyn ProxyLoader>>,
    ) -> Self {
        Self {
            cell: Arc::new(DocumentCell {
                hash: NEXT_HASH.fetch_add(1, Ordering::Relaxed),
                type_name: normalize_type_name(type_name).to_string(),
                data: RwLock::new(DocumentData {
                    id,
                    fields: BTreeMap::new(),
                    proxy,
                }),
                loader,
                detached_from: AtomicU64::new(0),
            }),
        }
    }

    /// Set a field while building a new instance.
    pub fn with(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.put(field, value);
        self
    }

    pub fn hash(&self) -> ObjectHash {
        self.cell.hash
    }

    pub(crate) fn mark_detached_from(&self, owner: u64) {
        self.cell.detached_from.store(owner, Ordering::Relaxed);
    }

    pub(crate) fn clear_detached(&self) {
        self.cell.detached_from.store(0, Ordering::Relaxed);
    }

    pub(crate) fn is_detached_from(&self, owner: u64) -> bool {
        self.cell.detached_from.load(Ordering::Relaxed) == owner
    }

    /// Normalized type name.
    pub fn type_name(&self) -> &str {
        &self.cell.type_name
    }

    /// Whether both handles address the same instance.
    pub fn same_instance(&self, other: &Document) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// The identifier, if assigned. Never triggers a load.
    pub fn id(&self) -> Option<DocumentId> {
        self.read().id.clone()
    }

    /// Assign the identifier. Fails if a different one is already assigned.
    pub fn set_id(&self, id: impl Into<DocumentId>) -> CoreResult<()> {
        let id = id.into();
        let mut data = self.write();
        match &data.id {
            Some(existing) if *existing != id => Err(CoreError::InvalidArgument(format!(
                "{}#{existing} cannot be re-identified as {id}",
                self.cell.type_name
            ))),
            _ => {
                data.id = Some(id);
                Ok(())
            }
        }
    }

    /// Read a field, loading a lazy reference first. Unset fields read as
    /// [`FieldValue::Null`].
    pub fn get(&self, field: &str) -> CoreResult<FieldValue> {
        self.initialize()?;
        Ok(self.peek(field).unwrap_or(FieldValue::Null))
    }

    /// Write a field, loading a lazy reference first.
    pub fn set(&self, field: impl Into<String>, value: impl Into<FieldValue>) -> CoreResult<()> {
        self.initialize()?;
        self.put(field, value);
        Ok(())
    }

    /// All fields, loading a lazy reference first.
    pub fn fields(&self) -> CoreResult<BTreeMap<String, FieldValue>> {
        self.initialize()?;
        Ok(self.peek_fields())
    }

    /// Write a field without triggering a load. Used by hydrators.
    pub fn put(&self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.write().fields.insert(field.into(), value.into());
    }

    /// Read a field without triggering a load.
    pub fn peek(&self, field: &str) -> Option<FieldValue> {
        self.read().fields.get(field).cloned()
    }

    /// Copy of all fields, without triggering a load.
    pub fn peek_fields(&self) -> BTreeMap<String, FieldValue> {
        self.read().fields.clone()
    }

    pub fn proxy_state(&self) -> ProxyState {
        self.read().proxy
    }

    /// Whether this instance is a load-triggering lazy reference (initialized or not).
    pub fn is_proxy(&self) -> bool {
        self.cell.loader.is_some()
    }

    /// `false` only for lazy references that have not been loaded yet.
    pub fn is_initialized(&self) -> bool {
        self.proxy_state() != ProxyState::Uninitialized
    }

    pub fn is_partial(&self) -> bool {
        self.proxy_state() == ProxyState::Partial
    }

    pub(crate) fn mark_initialized(&self) {
        let mut data = self.write();
        if data.proxy == ProxyState::Uninitialized {
            data.proxy = ProxyState::Loaded;
        }
    }

    /// Load an uninitialized lazy reference now; no-op otherwise.
    ///
    /// No lock on the instance is held while the loader runs, so the loader is
    /// free to hydrate this very instance.
    pub fn initialize(&self) -> CoreResult<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let loader = self
            .cell
            .loader
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| {
                CoreError::IllegalState(format!(
                    "lazy reference {self:?} outlived its unit of work"
                ))
            })?;
        debug!(type_name = %self.cell.type_name, hash = self.cell.hash, "materializing lazy reference");
        loader.load_proxy(self)?;
        if !self.is_initialized() {
            return Err(CoreError::IllegalState(format!(
                "loader left {self:?} uninitialized"
            )));
        }
        Ok(())
    }

    // Field writes are single map operations, so a poisoned lock still guards
    // a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, DocumentData> {
        self.cell.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DocumentData> {
        self.cell.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id() {
            Some(id) => write!(f, "{}#{} ({})", self.cell.type_name, id, self.cell.hash),
            None => write!(f, "{}#<new> ({})", self.cell.type_name, self.cell.hash),
        }
    }
}
