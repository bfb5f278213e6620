//! The application-facing document manager.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use odm_core::{
    CoreError, Document, EventSink, FieldValue, HydratorFactory, NoopEventSink, StorageHandles,
    UnitOfWork,
};
use odm_mapping::{ClassMetadata, MetadataProvider};
use odm_store::{Collection, Connection, Database, WriteOptions};
use odm_types::{normalize_type_name, DocumentId, LockMode};
use tracing::{debug, info};

use crate::config::Configuration;
use crate::error::{ManagerError, ManagerResult};
use crate::repository::{DocumentRepository, Repository, RepositoryFactory};

/// Façade over one unit of work, its hydrators, and its storage handles.
///
/// Every operation fails with [`CoreError::IllegalState`] once the manager
/// is closed.
pub struct DocumentManager {
    config: Configuration,
    metadata: Arc<dyn MetadataProvider>,
    storage: Arc<StorageHandles>,
    hydrators: Arc<HydratorFactory>,
    uow: Arc<UnitOfWork>,
    repositories: RwLock<HashMap<String, Arc<dyn Repository>>>,
    repository_factories: RwLock<HashMap<String, RepositoryFactory>>,
}

impl DocumentManager {
    pub fn new(
        connection: Arc<dyn Connection>,
        metadata: Arc<dyn MetadataProvider>,
        config: Configuration,
    ) -> Self {
        Self::with_event_sink(connection, metadata, config, Arc::new(NoopEventSink))
    }

    pub fn with_event_sink(
        connection: Arc<dyn Connection>,
        metadata: Arc<dyn MetadataProvider>,
        config: Configuration,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let storage = Arc::new(StorageHandles::new(connection, config.default_database.clone()));
        let hydrators = Arc::new(HydratorFactory::new(
            Arc::clone(&metadata),
            config.hydrator_settings(),
        ));
        let uow = UnitOfWork::new(
            Arc::clone(&metadata),
            Arc::clone(&storage),
            Arc::clone(&hydrators),
            sink,
        );
        info!(
            types = metadata.all_metadata().len(),
            default_database = config.default_database.as_deref().unwrap_or(odm_core::FALLBACK_DATABASE),
            "document manager opened"
        );
        Self {
            config,
            metadata,
            storage,
            hydrators,
            uow,
            repositories: RwLock::new(HashMap::new()),
            repository_factories: RwLock::new(HashMap::new()),
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    pub fn unit_of_work(&self) -> &Arc<UnitOfWork> {
        &self.uow
    }

    pub fn hydrator_factory(&self) -> &Arc<HydratorFactory> {
        &self.hydrators
    }

    pub fn metadata_provider(&self) -> &Arc<dyn MetadataProvider> {
        &self.metadata
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        self.storage.connection()
    }

    // ---- Lifecycle operations ----

    pub fn persist(&self, doc: &Document) -> ManagerResult<()> {
        self.check_open()?;
        Ok(self.uow.persist(doc)?)
    }

    pub fn remove(&self, doc: &Document) -> ManagerResult<()> {
        self.check_open()?;
        Ok(self.uow.remove(doc)?)
    }

    pub fn refresh(&self, doc: &Document) -> ManagerResult<()> {
        self.check_open()?;
        Ok(self.uow.refresh(doc)?)
    }

    pub fn detach(&self, doc: &Document) -> ManagerResult<()> {
        self.check_open()?;
        Ok(self.uow.detach(doc)?)
    }

    /// The managed copy of `doc`; see [`UnitOfWork::merge`].
    pub fn merge(&self, doc: &Document) -> ManagerResult<Document> {
        self.check_open()?;
        Ok(self.uow.merge(doc)?)
    }

    pub fn lock(&self, doc: &Document, mode: LockMode, version: Option<i64>) -> ManagerResult<()> {
        self.check_open()?;
        Ok(self.uow.lock(doc, mode, version)?)
    }

    pub fn unlock(&self, doc: &Document) -> ManagerResult<()> {
        self.check_open()?;
        Ok(self.uow.unlock(doc)?)
    }

    /// Write pending changes; all of them, or only those of `doc` and its
    /// cascade-persist graph. Uses the configured write options when
    /// `options` is `None`.
    pub fn flush(&self, doc: Option<&Document>, options: Option<&WriteOptions>) -> ManagerResult<()> {
        self.check_open()?;
        let options = options.unwrap_or(&self.config.default_write_options);
        Ok(self.uow.commit(doc, options)?)
    }

    /// [`DocumentManager::flush`] for a field value that must hold a
    /// reference.
    pub fn flush_value(&self, value: &FieldValue, options: Option<&WriteOptions>) -> ManagerResult<()> {
        let doc = as_reference(value, "flush")?;
        self.flush(Some(doc), options)
    }

    pub fn clear(&self, type_name: Option<&str>) -> ManagerResult<()> {
        self.check_open()?;
        Ok(self.uow.clear(type_name)?)
    }

    /// Clear the unit of work and refuse all further work.
    pub fn close(&self) -> ManagerResult<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.uow.clear(None)?;
        self.uow.close();
        info!("document manager closed");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        !self.uow.is_closed()
    }

    // ---- Lookup ----

    /// Load a document by identifier through its repository.
    pub fn find(
        &self,
        type_name: &str,
        id: impl Into<DocumentId>,
        lock_mode: LockMode,
        lock_version: Option<i64>,
    ) -> ManagerResult<Option<Document>> {
        self.check_open()?;
        let id = id.into();
        self.get_repository(type_name)?.find(&id, lock_mode, lock_version)
    }

    /// A reference to `(type_name, id)` that loads on first field access.
    pub fn get_reference(&self, type_name: &str, id: impl Into<DocumentId>) -> ManagerResult<Document> {
        self.check_open()?;
        Ok(self.uow.get_reference(type_name, id)?)
    }

    /// A reference to `(type_name, id)` that never loads. Only its
    /// identifier is meaningful.
    pub fn get_partial_reference(
        &self,
        type_name: &str,
        id: impl Into<DocumentId>,
    ) -> ManagerResult<Document> {
        self.check_open()?;
        Ok(self.uow.get_partial_reference(type_name, id)?)
    }

    /// Whether `doc` is scheduled for insert, or managed and not scheduled
    /// for delete.
    pub fn contains(&self, doc: &Document) -> ManagerResult<bool> {
        self.check_open()?;
        Ok(self.uow.is_scheduled_for_insert(doc)
            || (self.uow.is_in_identity_map(doc) && !self.uow.is_scheduled_for_delete(doc)))
    }

    /// [`DocumentManager::contains`] for a field value that must hold a
    /// reference.
    pub fn contains_value(&self, value: &FieldValue) -> ManagerResult<bool> {
        self.contains(as_reference(value, "check")?)
    }

    pub fn initialize_object(&self, doc: &Document) -> ManagerResult<()> {
        self.check_open()?;
        Ok(self.uow.initialize_object(doc)?)
    }

    // ---- Metadata and storage ----

    pub fn get_class_metadata(&self, type_name: &str) -> ManagerResult<Arc<ClassMetadata>> {
        Ok(self.metadata.metadata_for(type_name)?)
    }

    /// A new, unmanaged instance of a mapped type.
    pub fn create_document(&self, type_name: &str) -> ManagerResult<Document> {
        let metadata = self.get_class_metadata(type_name)?;
        Ok(Document::new(metadata.type_name()))
    }

    pub fn get_document_database(&self, type_name: &str) -> ManagerResult<Arc<dyn Database>> {
        let metadata = self.get_class_metadata(type_name)?;
        Ok(self.storage.database_for(&metadata)?)
    }

    pub fn get_document_collection(&self, type_name: &str) -> ManagerResult<Arc<dyn Collection>> {
        let metadata = self.get_class_metadata(type_name)?;
        Ok(self.storage.collection_for(&metadata)?)
    }

    // ---- Repositories ----

    /// Register the factory for types whose mapping names `name` as their
    /// custom repository.
    pub fn register_repository_factory<F>(&self, name: &str, factory: F) -> ManagerResult<()>
    where
        F: Fn(DocumentRepository) -> Arc<dyn Repository> + Send + Sync + 'static,
    {
        self.repository_factories
            .write()
            .map_err(|_| ManagerError::poisoned("repository factories"))?
            .insert(name.to_string(), Arc::new(factory));
        Ok(())
    }

    /// The repository of a type, built on first request and cached.
    pub fn get_repository(&self, type_name: &str) -> ManagerResult<Arc<dyn Repository>> {
        let key = normalize_type_name(type_name);
        if let Some(repo) = self
            .repositories
            .read()
            .map_err(|_| ManagerError::poisoned("repository cache"))?
            .get(key)
        {
            return Ok(Arc::clone(repo));
        }

        let metadata = self.get_class_metadata(key)?;
        let default = DocumentRepository::new(Arc::clone(&metadata), Arc::clone(&self.uow));
        let repo: Arc<dyn Repository> = match metadata.custom_repository.as_deref() {
            Some(name) => {
                let factory = self
                    .repository_factories
                    .read()
                    .map_err(|_| ManagerError::poisoned("repository factories"))?
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ManagerError::RepositoryNotRegistered {
                        type_name: metadata.type_name().to_string(),
                        name: name.to_string(),
                    })?;
                factory(default)
            }
            None => Arc::new(default),
        };
        debug!(type_name = %metadata.type_name(), custom = metadata.custom_repository.is_some(), "created repository");

        let mut cache = self
            .repositories
            .write()
            .map_err(|_| ManagerError::poisoned("repository cache"))?;
        Ok(Arc::clone(cache.entry(metadata.type_name().to_string()).or_insert(repo)))
    }

    fn check_open(&self) -> ManagerResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ManagerError::closed())
        }
    }
}

fn as_reference<'a>(value: &'a FieldValue, operation: &str) -> ManagerResult<&'a Document> {
    value.as_document().ok_or_else(|| {
        CoreError::InvalidArgument(format!("cannot {operation} {value:?}: not a document reference"))
            .into()
    })
}

impl std::fmt::Debug for DocumentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentManager")
            .field("open", &self.is_open())
            .field("unit_of_work", &self.uow)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odm_mapping::{FieldMapping, MetadataRegistry};
    use odm_store::{InMemoryConnection, Operation};
    use odm_types::{FieldType, RawDocument};
    use serde_json::{json, Value};
    use std::any::Any;

    fn registry() -> Arc<MetadataRegistry> {
        let registry = MetadataRegistry::new();
        let types = [
            ClassMetadata::builder("App\\User")
                .collection("users")
                .field(FieldMapping::scalar("name", FieldType::String))
                .custom_repository("UserRepository")
                .build()
                .unwrap(),
            ClassMetadata::builder("Note")
                .database("notes_db")
                .collection("notes")
                .field(FieldMapping::scalar("body", FieldType::String))
                .version_field("version")
                .build()
                .unwrap(),
            ClassMetadata::builder("Image")
                .collection("images")
                .file()
                .build()
                .unwrap(),
        ];
        for metadata in types {
            registry.register(metadata).unwrap();
        }
        Arc::new(registry)
    }

    fn manager_on(conn: Arc<InMemoryConnection>, config: Configuration) -> DocumentManager {
        DocumentManager::new(conn, registry(), config)
    }

    fn manager() -> (Arc<InMemoryConnection>, DocumentManager) {
        let conn = Arc::new(InMemoryConnection::new());
        let dm = manager_on(conn.clone(), Configuration::default().with_default_database("app"));
        (conn, dm)
    }

    fn raw(value: Value) -> RawDocument {
        serde_json::from_value(value).unwrap()
    }

    struct UserRepository {
        inner: DocumentRepository,
    }

    impl UserRepository {
        fn find_named(&self, id: &str) -> ManagerResult<Option<String>> {
            Ok(self
                .inner
                .find(&DocumentId::from(id), LockMode::None, None)?
                .and_then(|doc| doc.peek("name"))
                .and_then(|name| name.as_str().map(String::from)))
        }
    }

    impl Repository for UserRepository {
        fn type_name(&self) -> &str {
            self.inner.type_name()
        }

        fn find(
            &self,
            id: &DocumentId,
            lock_mode: LockMode,
            lock_version: Option<i64>,
        ) -> ManagerResult<Option<Document>> {
            self.inner.find(id, lock_mode, lock_version)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn register_user_repository(dm: &DocumentManager) {
        dm.register_repository_factory("UserRepository", |inner| {
            Arc::new(UserRepository { inner }) as Arc<dyn Repository>
        })
        .unwrap();
    }

    // -----------------------------------------------------------------------
    // Persistence round trips
    // -----------------------------------------------------------------------

    #[test]
    fn persist_flush_find() {
        let (conn, dm) = manager();
        register_user_repository(&dm);

        let user = dm.create_document("\\App\\User").unwrap().with("name", "x");
        dm.persist(&user).unwrap();
        assert!(dm.contains(&user).unwrap());
        dm.flush(None, None).unwrap();

        let id = user.id().unwrap();
        let found = dm.find("App\\User", id.clone(), LockMode::None, None).unwrap().unwrap();
        assert!(found.same_instance(&user));
        assert!(conn
            .database("app")
            .collection("users")
            .peek(&id.to_json())
            .is_some());
    }

    #[test]
    fn find_loads_unknown_identities_and_misses_cleanly() {
        let (conn, dm) = manager();
        conn.database("notes_db")
            .collection("notes")
            .seed(raw(json!({"_id": 7, "body": "hi", "version": 1})));

        let note = dm.find("Note", 7, LockMode::None, None).unwrap().unwrap();
        assert_eq!(note.get("body").unwrap(), FieldValue::from("hi"));
        assert!(dm.find("Note", 8, LockMode::None, None).unwrap().is_none());
        assert!(dm.contains(&note).unwrap());
    }

    #[test]
    fn find_with_stale_version_fails() {
        let conn = Arc::new(InMemoryConnection::new());
        conn.database("notes_db")
            .collection("notes")
            .seed(raw(json!({"_id": 1, "body": "v1", "version": 1})));
        let one = manager_on(conn.clone(), Configuration::default());
        let two = manager_on(conn.clone(), Configuration::default());

        let mine = one.find("Note", 1, LockMode::None, None).unwrap().unwrap();
        let theirs = two.find("Note", 1, LockMode::Optimistic, Some(1)).unwrap().unwrap();

        mine.set("body", "v2").unwrap();
        one.flush(None, None).unwrap();

        theirs.set("body", "conflict").unwrap();
        assert!(matches!(
            two.flush(None, None),
            Err(ManagerError::Core(CoreError::ConcurrentModification { .. }))
        ));

        let fresh = manager_on(conn, Configuration::default());
        assert!(matches!(
            fresh.find("Note", 1, LockMode::Optimistic, Some(1)),
            Err(ManagerError::Core(CoreError::ConcurrentModification { .. }))
        ));
    }

    #[test]
    fn flush_uses_configured_write_options() {
        let conn = Arc::new(InMemoryConnection::new());
        let mut config = Configuration::default();
        config.default_write_options.fsync = true;
        let dm = manager_on(conn.clone(), config);

        let note = dm.create_document("Note").unwrap().with("body", "b");
        dm.persist(&note).unwrap();
        dm.flush(None, None).unwrap();

        let entry = conn.journal().into_iter().find(|e| e.operation == Operation::Insert).unwrap();
        assert!(entry.write_options.unwrap().fsync);
    }

    // -----------------------------------------------------------------------
    // contains / references
    // -----------------------------------------------------------------------

    #[test]
    fn contains_follows_schedules() {
        let (conn, dm) = manager();
        conn.database("notes_db")
            .collection("notes")
            .seed(raw(json!({"_id": 1, "body": "b", "version": 1})));

        let loose = dm.create_document("Note").unwrap();
        assert!(!dm.contains(&loose).unwrap());

        let note = dm.find("Note", 1, LockMode::None, None).unwrap().unwrap();
        assert!(dm.contains(&note).unwrap());
        dm.remove(&note).unwrap();
        assert!(!dm.contains(&note).unwrap());

        assert!(dm.contains_value(&FieldValue::from(&loose)).is_ok());
        assert!(matches!(
            dm.contains_value(&FieldValue::from("not a document")),
            Err(ManagerError::Core(CoreError::InvalidArgument(_)))
        ));
        assert!(matches!(
            dm.flush_value(&FieldValue::Int(1), None),
            Err(ManagerError::Core(CoreError::InvalidArgument(_)))
        ));
    }

    #[test]
    fn references_resolve_through_identity_map() {
        let (conn, dm) = manager();
        conn.database("notes_db")
            .collection("notes")
            .seed(raw(json!({"_id": 3, "body": "lazy", "version": 1})));

        let reference = dm.get_reference("Note", 3).unwrap();
        assert!(!reference.is_initialized());
        dm.initialize_object(&reference).unwrap();
        assert!(reference.is_initialized());

        let found = dm.find("Note", 3, LockMode::None, None).unwrap().unwrap();
        assert!(found.same_instance(&reference));
        let partial = dm.get_partial_reference("Note", 3).unwrap();
        assert!(partial.same_instance(&reference));
    }

    // -----------------------------------------------------------------------
    // Repositories, metadata, storage handles
    // -----------------------------------------------------------------------

    #[test]
    fn custom_repository_is_built_once() {
        let (conn, dm) = manager();
        register_user_repository(&dm);
        conn.database("app")
            .collection("users")
            .seed(raw(json!({"_id": "u1", "name": "Ada"})));

        let repo = dm.get_repository("App\\User").unwrap();
        assert!(Arc::ptr_eq(&repo, &dm.get_repository("\\App\\User").unwrap()));
        let users = repo.as_any().downcast_ref::<UserRepository>().unwrap();
        assert_eq!(users.find_named("u1").unwrap().as_deref(), Some("Ada"));
    }

    #[test]
    fn unregistered_custom_repository_fails() {
        let (_, dm) = manager();
        assert!(matches!(
            dm.get_repository("App\\User"),
            Err(ManagerError::RepositoryNotRegistered { .. })
        ));
        assert!(dm.get_repository("Note").unwrap().as_any().is::<DocumentRepository>());
    }

    #[test]
    fn unmapped_types_are_reported() {
        let (_, dm) = manager();
        assert!(matches!(
            dm.create_document("Ghost"),
            Err(ManagerError::Core(CoreError::MappingNotFound(_)))
        ));
        assert!(matches!(
            dm.get_class_metadata("Ghost"),
            Err(ManagerError::Core(CoreError::MappingNotFound(_)))
        ));
    }

    #[test]
    fn storage_handles_follow_mapping() {
        let (_, dm) = manager();
        assert_eq!(dm.get_document_database("App\\User").unwrap().name(), "app");
        assert_eq!(dm.get_document_database("Note").unwrap().name(), "notes_db");
        assert_eq!(dm.get_document_collection("Note").unwrap().name(), "notes");
        assert!(dm.get_document_collection("Image").unwrap().is_file_store());
    }

    #[test]
    fn hydrator_plans_are_written_to_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Arc::new(InMemoryConnection::new());
        conn.database("notes_db")
            .collection("notes")
            .seed(raw(json!({"_id": 1, "body": "b", "version": 1})));
        let dm = manager_on(conn, Configuration::default().with_hydrator_dir(dir.path()));

        dm.find("Note", 1, LockMode::None, None).unwrap().unwrap();
        assert!(dir.path().join("NoteHydrator.json").exists());
    }

    #[test]
    fn missing_hydrator_without_generation_fails() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Arc::new(InMemoryConnection::new());
        conn.database("notes_db")
            .collection("notes")
            .seed(raw(json!({"_id": 1, "body": "b", "version": 1})));
        let config = Configuration::default()
            .with_hydrator_dir(dir.path())
            .with_auto_generate_hydrators(false);
        let dm = manager_on(conn, config);

        assert!(matches!(
            dm.find("Note", 1, LockMode::None, None),
            Err(ManagerError::Core(CoreError::HydrationSetup { .. }))
        ));
    }

    // -----------------------------------------------------------------------
    // Close
    // -----------------------------------------------------------------------

    #[test]
    fn closed_manager_refuses_work() {
        let (_, dm) = manager();
        let note = dm.create_document("Note").unwrap();
        dm.persist(&note).unwrap();

        dm.close().unwrap();
        assert!(!dm.is_open());
        assert!(!dm.unit_of_work().is_scheduled_for_insert(&note));
        assert!(matches!(dm.persist(&note), Err(ManagerError::Core(CoreError::IllegalState(_)))));
        assert!(matches!(dm.flush(None, None), Err(ManagerError::Core(CoreError::IllegalState(_)))));
        assert!(matches!(
            dm.find("Note", 1, LockMode::None, None),
            Err(ManagerError::Core(CoreError::IllegalState(_)))
        ));
        assert!(dm.close().is_ok());
    }
}
