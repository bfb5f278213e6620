//! Lifecycle notifications.

use odm_types::RawDocument;

use crate::change_set::ChangeSet;
use crate::document::Document;
use crate::unit_of_work::UnitOfWork;

/// Receives lifecycle notifications from a unit of work.
///
/// Every method has an empty default body, so a sink overrides only the
/// points it cares about. Sinks are called without any unit-of-work lock held
/// and may call back into the unit of work.
pub trait EventSink: Send + Sync {
    fn pre_flush(&self, _uow: &UnitOfWork) {}

    /// After change sets are computed, before any write.
    fn on_flush(&self, _uow: &UnitOfWork) {}

    fn post_flush(&self, _uow: &UnitOfWork) {}

    fn pre_persist(&self, _doc: &Document, _uow: &UnitOfWork) {}

    /// After the insert reached storage.
    fn post_persist(&self, _doc: &Document, _uow: &UnitOfWork) {}

    fn pre_remove(&self, _doc: &Document, _uow: &UnitOfWork) {}

    /// After the delete reached storage.
    fn post_remove(&self, _doc: &Document, _uow: &UnitOfWork) {}

    /// Before an update is written. Field changes made here are included.
    fn pre_update(&self, _doc: &Document, _changes: &ChangeSet, _uow: &UnitOfWork) {}

    fn post_update(&self, _doc: &Document, _uow: &UnitOfWork) {}

    /// Before raw data is hydrated into `doc`.
    fn pre_load(&self, _doc: &Document, _data: &RawDocument, _uow: &UnitOfWork) {}

    fn post_load(&self, _doc: &Document, _uow: &UnitOfWork) {}

    /// After the identity map was cleared, entirely or for one type.
    fn on_clear(&self, _type_name: Option<&str>, _uow: &UnitOfWork) {}
}

/// Sink that ignores every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {}
