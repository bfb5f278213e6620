//! Persistence core of the document mapper.
//!
//! Keeps in-memory documents consistent with stored records: one instance
//! per stored identity, minimal change sets on flush, hydration of raw field
//! maps into document graphs, and lazy references that load on first use.
//!
//! # Key Types
//!
//! - [`Document`] — Shared handle to one in-memory document instance
//! - [`FieldValue`] — Value of one field, with type-aware equality
//! - [`UnitOfWork`] — Identity map, scheduled operations, and commit
//! - [`HydratorFactory`] — Resolves, generates, and caches hydrators
//! - [`ProxyFactory`] — Builds lazy and partial references
//! - [`EventSink`] — Receives lifecycle notifications
//! - [`StorageHandles`] — Memoized database and collection handles per type
//!
//! # Design Rules
//!
//! 1. At most one instance per `(type, id)` is handed out by a unit of work.
//! 2. Commits run inserts, then updates, then deletes; inserts in dependency order.
//! 3. A successful storage operation is dequeued at once; failures propagate.
//! 4. No unit-of-work lock is held while storage, hydrators, or sinks run.

pub mod change_set;
pub mod commit_order;
pub mod document;
pub mod error;
pub mod events;
pub mod hydrator;
pub mod identity_map;
mod persister;
pub mod proxy;
pub mod storage;
pub mod unit_of_work;
pub mod value;

pub use change_set::{compute_change_set, ChangeSet, FieldChange, Snapshot};
pub use commit_order::{plan_inserts, CommitNode, CommitPlan};
pub use document::{Document, ObjectHash, ProxyState};
pub use error::{CoreError, CoreResult};
pub use events::{EventSink, NoopEventSink};
pub use hydrator::{
    hydrator_name, AlsoLoadHandler, Conversion, FieldPlan, HydrationContext, HydrationHints,
    HydrationPlan, Hydrator, HydratorFactory, HydratorSettings, PlanHydrator,
};
pub use identity_map::IdentityMap;
pub use proxy::{ProxyFactory, ProxyLoader};
pub use storage::{StorageHandles, FALLBACK_DATABASE};
pub use unit_of_work::{LifecycleState, UnitOfWork};
pub use value::{EmbeddedValue, FieldValue};
