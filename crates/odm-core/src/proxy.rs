//! Lazy references.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

use odm_types::DocumentId;
use tracing::debug;

use crate::document::Document;
use crate::error::CoreResult;

/// Loads the stored data of an uninitialized lazy reference into it.
///
/// The loader must hydrate the given instance in place and leave it
/// initialized; [`crate::HydratorFactory::hydrate`] does the latter.
pub trait ProxyLoader: Send + Sync {
    fn load_proxy(&self, doc: &Document) -> CoreResult<()>;
}

/// Builds placeholders for documents that have not been loaded.
pub struct ProxyFactory {
    loader: Weak<dyn ProxyLoader>,
    created: AtomicU64,
}

impl ProxyFactory {
    pub fn new(loader: Weak<dyn ProxyLoader>) -> Self {
        Self {
            loader,
            created: AtomicU64::new(0),
        }
    }

    /// A load-triggering placeholder carrying only `id`.
    pub fn get_proxy(&self, type_name: &str, id: DocumentId) -> Document {
        self.created.fetch_add(1, Ordering::Relaxed);
        debug!(type_name, id = %id, "created lazy reference");
        Document::proxy(type_name, id, self.loader.clone())
    }

    /// A plain instance with only `id` set. Reading other fields does not
    /// load anything; they read as null.
    pub fn get_partial(&self, type_name: &str, id: DocumentId) -> Document {
        Document::partial(type_name, id)
    }

    /// Number of lazy references created so far.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ProxyFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyFactory")
            .field("created", &self.created())
            .finish()
    }
}
