use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use odm_mapping::{ClassMetadata, FieldKind};
use odm_types::{DocumentId, FieldType, RawDocument, ID_KEY};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{HydrationContext, HydrationHints, Hydrator};
use crate::document::Document;
use crate::error::{CoreError, CoreResult};
use crate::value::{EmbeddedValue, FieldValue};

/// How one stored value becomes a field value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Conversion {
    Scalar { field_type: FieldType },
    EmbedOne { target: String },
    EmbedMany { target: String },
    ReferenceOne { target: String },
    ReferenceMany { target: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPlan {
    pub field: String,
    pub storage_key: String,
    pub conversion: Conversion,
}

/// Serializable hydration program for one type.
///
/// This is the artifact the hydrator factory generates ahead of time or on
/// demand; [`PlanHydrator`] executes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HydrationPlan {
    /// Deterministic name derived from the type name.
    pub hydrator: String,
    pub namespace: String,
    pub type_name: String,
    pub identifier: String,
    pub id_type: FieldType,
    pub fields: Vec<FieldPlan>,
}

impl HydrationPlan {
    pub fn from_metadata(metadata: &ClassMetadata, namespace: &str) -> Self {
        let fields = metadata
            .fields
            .iter()
            .map(|f| {
                let target = f.target_type().unwrap_or_default().to_string();
                let conversion = match (f.kind, f.many) {
                    (FieldKind::Scalar, _) => Conversion::Scalar {
                        field_type: f.field_type,
                    },
                    (FieldKind::Embedded, false) => Conversion::EmbedOne { target },
                    (FieldKind::Embedded, true) => Conversion::EmbedMany { target },
                    (FieldKind::Reference, false) => Conversion::ReferenceOne { target },
                    (FieldKind::Reference, true) => Conversion::ReferenceMany { target },
                };
                FieldPlan {
                    field: f.name.clone(),
                    storage_key: f.storage_key.clone(),
                    conversion,
                }
            })
            .collect();

        Self {
            hydrator: super::hydrator_name(metadata.type_name()),
            namespace: namespace.to_string(),
            type_name: metadata.type_name().to_string(),
            identifier: metadata.identifier.clone(),
            id_type: metadata.id_type,
            fields,
        }
    }

    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| self.setup_error(e.to_string()))
    }

    pub fn from_json(type_name: &str, json: &str) -> CoreResult<Self> {
        serde_json::from_str(json).map_err(|e| CoreError::HydrationSetup {
            type_name: type_name.to_string(),
            reason: format!("unreadable hydration plan: {e}"),
        })
    }

    /// Convert every mapped key present in `data`. Absent keys are skipped.
    pub fn convert_fields(
        &self,
        data: &RawDocument,
        ctx: &dyn HydrationContext,
    ) -> CoreResult<Vec<(String, FieldValue)>> {
        let mut out = Vec::with_capacity(self.fields.len());
        for plan in &self.fields {
            let Some(raw) = data.get(&plan.storage_key) else {
                continue;
            };
            let value = self.convert(plan, raw, ctx)?;
            out.push((plan.field.clone(), value));
        }
        Ok(out)
    }

    fn convert(
        &self,
        plan: &FieldPlan,
        raw: &Value,
        ctx: &dyn HydrationContext,
    ) -> CoreResult<FieldValue> {
        if raw.is_null() {
            return Ok(FieldValue::Null);
        }
        match &plan.conversion {
            Conversion::Scalar { field_type } => self.convert_scalar(plan, raw, *field_type),
            Conversion::EmbedOne { target } => self.convert_embedded(plan, raw, target, ctx),
            Conversion::EmbedMany { target } => self
                .items(plan, raw)?
                .iter()
                .map(|item| self.convert_embedded(plan, item, target, ctx))
                .collect::<CoreResult<Vec<_>>>()
                .map(FieldValue::Array),
            Conversion::ReferenceOne { target } => {
                ctx.reference(target, reference_id(raw)).map(FieldValue::Reference)
            }
            Conversion::ReferenceMany { target } => self
                .items(plan, raw)?
                .iter()
                .map(|item| ctx.reference(target, reference_id(item)).map(FieldValue::Reference))
                .collect::<CoreResult<Vec<_>>>()
                .map(FieldValue::Array),
        }
    }

    fn convert_scalar(&self, plan: &FieldPlan, raw: &Value, ty: FieldType) -> CoreResult<FieldValue> {
        let invalid = || self.invalid(plan, format!("cannot cast {raw} to {ty}"));
        let value = match (ty, raw) {
            (FieldType::String, Value::String(s)) => FieldValue::String(s.clone()),
            (FieldType::String, Value::Number(n)) => FieldValue::String(n.to_string()),
            (FieldType::String, Value::Bool(b)) => FieldValue::String(b.to_string()),
            (FieldType::Int, Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(FieldValue::Int)
                .ok_or_else(invalid)?,
            (FieldType::Int, Value::String(s)) => {
                s.trim().parse().map(FieldValue::Int).map_err(|_| invalid())?
            }
            (FieldType::Int, Value::Bool(b)) => FieldValue::Int(i64::from(*b)),
            (FieldType::Float, Value::Number(n)) => {
                n.as_f64().map(FieldValue::Float).ok_or_else(invalid)?
            }
            (FieldType::Float, Value::String(s)) => {
                s.trim().parse().map(FieldValue::Float).map_err(|_| invalid())?
            }
            (FieldType::Bool, Value::Bool(b)) => FieldValue::Bool(*b),
            (FieldType::Bool, Value::Number(n)) => FieldValue::Bool(n.as_f64() != Some(0.0)),
            (FieldType::Date, Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|d| FieldValue::Date(d.with_timezone(&Utc)))
                .map_err(|_| invalid())?,
            (FieldType::Date, Value::Number(n)) => n
                .as_i64()
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
                .map(FieldValue::Date)
                .ok_or_else(invalid)?,
            (FieldType::Id | FieldType::Uuid, _) => DocumentId::cast(raw, ty)
                .map(FieldValue::Id)
                .map_err(|e| self.invalid(plan, e.to_string()))?,
            (t, v) if t.is_opaque() => FieldValue::Raw(v.clone()),
            _ => return Err(invalid()),
        };
        Ok(value)
    }

    fn convert_embedded(
        &self,
        plan: &FieldPlan,
        raw: &Value,
        target: &str,
        ctx: &dyn HydrationContext,
    ) -> CoreResult<FieldValue> {
        let Value::Object(map) = raw else {
            return Err(self.invalid(plan, format!("expected an embedded document, found {raw}")));
        };
        let data: RawDocument = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let embedded_plan = ctx.embedded_plan(target)?;
        let fields: BTreeMap<String, FieldValue> =
            embedded_plan.convert_fields(&data, ctx)?.into_iter().collect();
        Ok(FieldValue::Embedded(EmbeddedValue {
            type_name: embedded_plan.type_name.clone(),
            fields,
        }))
    }

    fn items<'a>(&self, plan: &FieldPlan, raw: &'a Value) -> CoreResult<&'a Vec<Value>> {
        raw.as_array()
            .ok_or_else(|| self.invalid(plan, format!("expected an array, found {raw}")))
    }

    fn invalid(&self, plan: &FieldPlan, reason: String) -> CoreError {
        CoreError::InvalidData {
            type_name: self.type_name.clone(),
            field: plan.field.clone(),
            reason,
        }
    }

    fn setup_error(&self, reason: String) -> CoreError {
        CoreError::HydrationSetup {
            type_name: self.type_name.clone(),
            reason,
        }
    }
}

/// References are stored as `{"$ref": .., "$id": ..}` or as the bare identifier.
fn reference_id(raw: &Value) -> &Value {
    raw.get("$id").unwrap_or(raw)
}

/// Hydrator executing a [`HydrationPlan`].
#[derive(Clone, Debug)]
pub struct PlanHydrator {
    plan: Arc<HydrationPlan>,
}

impl PlanHydrator {
    pub fn new(plan: Arc<HydrationPlan>) -> Self {
        Self { plan }
    }

    pub fn plan(&self) -> &Arc<HydrationPlan> {
        &self.plan
    }
}

impl Hydrator for PlanHydrator {
    fn hydrate(
        &self,
        doc: &Document,
        data: &RawDocument,
        ctx: &dyn HydrationContext,
        hints: &HydrationHints,
    ) -> CoreResult<Vec<String>> {
        let mut populated = Vec::new();

        if let Some(raw_id) = data.get(ID_KEY).filter(|v| !v.is_null()) {
            let id = DocumentId::cast(raw_id, self.plan.id_type).map_err(|e| {
                CoreError::InvalidData {
                    type_name: self.plan.type_name.clone(),
                    field: self.plan.identifier.clone(),
                    reason: e.to_string(),
                }
            })?;
            doc.set_id(id)?;
            populated.push(self.plan.identifier.clone());
        }

        for (field, value) in self.plan.convert_fields(data, ctx)? {
            doc.put(field.clone(), value);
            populated.push(field);
        }

        if hints.refresh {
            for plan in &self.plan.fields {
                if !data.contains_key(&plan.storage_key) {
                    doc.put(plan.field.clone(), FieldValue::Null);
                }
            }
        }

        Ok(populated)
    }
}
