//! Per-type repositories.

use std::any::Any;
use std::sync::Arc;

use odm_core::{CoreError, Document, UnitOfWork};
use odm_mapping::ClassMetadata;
use odm_types::{DocumentId, LockMode};
use tracing::debug;

use crate::error::ManagerResult;

/// Entry point for loading documents of one type.
///
/// Custom repositories usually wrap a [`DocumentRepository`] and add
/// domain-specific finders; [`Repository::as_any`] lets callers reach them.
pub trait Repository: Send + Sync {
    fn type_name(&self) -> &str;

    /// The document with `id`, or `None` if storage does not hold it.
    ///
    /// With a lock mode other than [`LockMode::None`] the document is locked
    /// after loading; `lock_version` is the expected version for optimistic
    /// locks.
    fn find(
        &self,
        id: &DocumentId,
        lock_mode: LockMode,
        lock_version: Option<i64>,
    ) -> ManagerResult<Option<Document>>;

    fn as_any(&self) -> &dyn Any;
}

/// Builds a custom repository around the default one.
pub type RepositoryFactory = Arc<dyn Fn(DocumentRepository) -> Arc<dyn Repository> + Send + Sync>;

/// The repository used for types that name no custom one.
#[derive(Clone)]
pub struct DocumentRepository {
    metadata: Arc<ClassMetadata>,
    uow: Arc<UnitOfWork>,
}

impl DocumentRepository {
    pub fn new(metadata: Arc<ClassMetadata>, uow: Arc<UnitOfWork>) -> Self {
        Self { metadata, uow }
    }

    pub fn metadata(&self) -> &Arc<ClassMetadata> {
        &self.metadata
    }

    pub fn unit_of_work(&self) -> &Arc<UnitOfWork> {
        &self.uow
    }
}

impl Repository for DocumentRepository {
    fn type_name(&self) -> &str {
        self.metadata.type_name()
    }

    fn find(
        &self,
        id: &DocumentId,
        lock_mode: LockMode,
        lock_version: Option<i64>,
    ) -> ManagerResult<Option<Document>> {
        let doc = match self.uow.try_get_by_id(id, &self.metadata) {
            Some(doc) => match doc.initialize() {
                Ok(()) => doc,
                Err(CoreError::DocumentNotFound { .. }) => return Ok(None),
                Err(e) => return Err(e.into()),
            },
            None => match self.uow.load(self.metadata.type_name(), id, lock_mode)? {
                Some(doc) => doc,
                None => {
                    debug!(type_name = %self.metadata.type_name(), id = %id, "document not found");
                    return Ok(None);
                }
            },
        };

        if lock_mode != LockMode::None {
            self.uow.lock(&doc, lock_mode, lock_version)?;
        }
        Ok(Some(doc))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for DocumentRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentRepository")
            .field("type_name", &self.metadata.type_name())
            .finish()
    }
}
