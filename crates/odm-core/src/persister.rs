//! Documents into raw stored form.

use std::collections::HashSet;

use odm_mapping::{ClassMetadata, MetadataProvider};
use odm_store::UpdateCommand;
use odm_types::{DocumentId, RawDocument, ID_KEY};
use serde_json::{json, Map, Number, Value};

use crate::change_set::{ChangeSet, Snapshot};
use crate::error::{CoreError, CoreResult};
use crate::value::{EmbeddedValue, FieldValue};

/// Raw form of a document for insertion.
///
/// Only mapped fields are written, under their storage keys; fields named in
/// `omit` are left out. The identifier goes under `_id` when known.
pub fn to_raw(
    provider: &dyn MetadataProvider,
    metadata: &ClassMetadata,
    id: Option<&DocumentId>,
    fields: &Snapshot,
    omit: &HashSet<String>,
) -> CoreResult<RawDocument> {
    let mut raw = RawDocument::new();
    if let Some(id) = id {
        raw.insert(ID_KEY.to_string(), id.to_json());
    }
    for mapping in &metadata.fields {
        if omit.contains(&mapping.name) {
            continue;
        }
        let Some(value) = fields.get(&mapping.name) else {
            continue;
        };
        raw.insert(
            mapping.storage_key.clone(),
            to_json(provider, metadata, &mapping.name, value)?,
        );
    }
    Ok(raw)
}

/// Update command setting every changed field of a document.
pub fn update_command(
    provider: &dyn MetadataProvider,
    metadata: &ClassMetadata,
    id: &DocumentId,
    changes: &ChangeSet,
) -> CoreResult<UpdateCommand> {
    let mut command = UpdateCommand::new(id.to_json());
    for (field, change) in changes.iter() {
        let Some(mapping) = metadata.field(field) else {
            continue;
        };
        command = command.set(
            mapping.storage_key.clone(),
            to_json(provider, metadata, field, &change.new)?,
        );
    }
    Ok(command)
}

/// Stored form of one field value.
///
/// References become `{"$ref": <collection>, "$id": <id>}` and must point at
/// documents that already have an identifier.
pub fn to_json(
    provider: &dyn MetadataProvider,
    owner: &ClassMetadata,
    field: &str,
    value: &FieldValue,
) -> CoreResult<Value> {
    let json = match value {
        FieldValue::Null => Value::Null,
        FieldValue::Bool(b) => Value::Bool(*b),
        FieldValue::Int(i) => Value::from(*i),
        FieldValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        FieldValue::String(s) => Value::String(s.clone()),
        FieldValue::Id(id) => id.to_json(),
        FieldValue::Date(d) => Value::String(d.to_rfc3339()),
        FieldValue::Raw(v) => v.clone(),
        FieldValue::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| to_json(provider, owner, field, item))
                .collect::<CoreResult<_>>()?,
        ),
        FieldValue::Embedded(embedded) => embedded_to_json(provider, embedded)?,
        FieldValue::Reference(doc) => {
            let target = provider.metadata_for(doc.type_name())?;
            let id = doc.id().ok_or_else(|| {
                CoreError::InvalidArgument(format!(
                    "{}.{field} references {doc:?}, which has no identifier yet",
                    owner.type_name()
                ))
            })?;
            json!({
                "$ref": target.collection.as_deref().unwrap_or(target.type_name()),
                "$id": id.to_json(),
            })
        }
    };
    Ok(json)
}

fn embedded_to_json(provider: &dyn MetadataProvider, embedded: &EmbeddedValue) -> CoreResult<Value> {
    let metadata = provider.metadata_for(&embedded.type_name)?;
    let mut map = Map::new();
    for mapping in &metadata.fields {
        if let Some(value) = embedded.fields.get(&mapping.name) {
            map.insert(
                mapping.storage_key.clone(),
                to_json(provider, &metadata, &mapping.name, value)?,
            );
        }
    }
    Ok(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_set::compute_change_set;
    use crate::document::Document;
    use chrono::{TimeZone, Utc};
    use odm_mapping::{FieldMapping, MetadataRegistry};
    use odm_types::FieldType;

    fn registry() -> MetadataRegistry {
        let registry = MetadataRegistry::new();
        registry
            .register(
                ClassMetadata::builder("User")
                    .collection("users")
                    .field(FieldMapping::scalar("name", FieldType::String).with_storage_key("n"))
                    .field(FieldMapping::scalar("joined", FieldType::Date))
                    .field(FieldMapping::embed_one("address", "Address"))
                    .field(FieldMapping::reference_many("friends", "User"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                ClassMetadata::builder("Address")
                    .embedded()
                    .field(FieldMapping::scalar("city", FieldType::String).with_storage_key("c"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
    }

    fn snap(pairs: Vec<(&str, FieldValue)>) -> Snapshot {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn raw_uses_storage_keys_and_skips_unmapped() {
        let registry = registry();
        let meta = registry.metadata_for("User").unwrap();
        let joined = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let fields = snap(vec![
            ("name", "Ada".into()),
            ("joined", joined.into()),
            ("address", EmbeddedValue::new("Address").with("city", "Oslo").into()),
            ("scratch", 1.into()),
        ]);

        let raw = to_raw(&registry, &meta, Some(&DocumentId::Int(9)), &fields, &HashSet::new()).unwrap();
        assert_eq!(raw.get("_id"), Some(&json!(9)));
        assert_eq!(raw.get("n"), Some(&json!("Ada")));
        assert_eq!(raw.get("joined"), Some(&json!("2024-01-02T03:04:05+00:00")));
        assert_eq!(raw.get("address"), Some(&json!({"c": "Oslo"})));
        assert!(!raw.contains_key("scratch"));
    }

    #[test]
    fn references_are_stored_as_ref_objects() {
        let registry = registry();
        let meta = registry.metadata_for("User").unwrap();
        let friend = Document::with_id("User", "u2");
        let fields = snap(vec![("friends", FieldValue::Array(vec![(&friend).into()]))]);

        let raw = to_raw(&registry, &meta, None, &fields, &HashSet::new()).unwrap();
        assert_eq!(raw.get("friends"), Some(&json!([{"$ref": "users", "$id": "u2"}])));
        assert!(!raw.contains_key("_id"));
    }

    #[test]
    fn reference_without_identifier_is_rejected() {
        let registry = registry();
        let meta = registry.metadata_for("User").unwrap();
        let fields = snap(vec![("friends", FieldValue::Array(vec![Document::new("User").into()]))]);
        let err = to_raw(&registry, &meta, None, &fields, &HashSet::new()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn omitted_fields_are_left_out() {
        let registry = registry();
        let meta = registry.metadata_for("User").unwrap();
        let fields = snap(vec![("name", "x".into()), ("friends", FieldValue::Array(vec![]))]);
        let omit: HashSet<String> = ["friends".to_string()].into();
        let raw = to_raw(&registry, &meta, None, &fields, &omit).unwrap();
        assert!(raw.contains_key("n"));
        assert!(!raw.contains_key("friends"));
    }

    #[test]
    fn update_sets_changed_storage_keys() {
        let registry = registry();
        let meta = registry.metadata_for("User").unwrap();
        let changes = compute_change_set(
            &snap(vec![("name", "old".into())]),
            &snap(vec![("name", "new".into())]),
        );
        let cmd = update_command(&registry, &meta, &DocumentId::Int(1), &changes).unwrap();
        assert_eq!(cmd.id, json!(1));
        assert_eq!(cmd.set.get("n"), Some(&json!("new")));
        assert_eq!(cmd.set.len(), 1);
    }
}
