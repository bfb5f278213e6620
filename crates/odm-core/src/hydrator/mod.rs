//! Hydration: raw stored field maps into in-memory documents.
//!
//! Every mapped type has one [`Hydrator`], resolved and cached by the
//! [`HydratorFactory`]. Unless a hand-written hydrator is registered for a
//! type, the factory builds a [`PlanHydrator`] from a [`HydrationPlan`]
//! derived from the type's metadata, optionally persisted as a JSON artifact
//! in the configured hydrator directory.

mod factory;
mod plan;

pub use factory::{hydrator_name, AlsoLoadHandler, HydratorFactory, HydratorSettings};
pub use plan::{Conversion, FieldPlan, HydrationPlan, PlanHydrator};

use std::sync::Arc;

use odm_types::RawDocument;
use serde_json::Value;

use crate::document::Document;
use crate::error::CoreResult;

/// Options for one hydration call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HydrationHints {
    /// Mapped fields absent from the raw data are reset to null instead of
    /// being left alone.
    pub refresh: bool,
}

impl HydrationHints {
    pub fn refresh() -> Self {
        Self { refresh: true }
    }
}

/// What a hydrator needs from its surroundings while converting values.
pub trait HydrationContext {
    /// The instance to use for a reference to `type_name` with raw
    /// identifier `raw_id`: the managed one if mapped, otherwise a lazy
    /// reference.
    fn reference(&self, type_name: &str, raw_id: &Value) -> CoreResult<Document>;

    /// Plan used to hydrate embedded values of `type_name`.
    fn embedded_plan(&self, type_name: &str) -> CoreResult<Arc<HydrationPlan>>;
}

/// Converts a raw field map into field values on an instance of one type.
pub trait Hydrator: Send + Sync {
    /// Populate `doc` from `data`. Returns the names of the fields set.
    ///
    /// Must write through [`Document::put`] and be idempotent: hydrating the
    /// same instance twice with the same data leaves the same field state.
    fn hydrate(
        &self,
        doc: &Document,
        data: &RawDocument,
        ctx: &dyn HydrationContext,
        hints: &HydrationHints,
    ) -> CoreResult<Vec<String>>;
}
