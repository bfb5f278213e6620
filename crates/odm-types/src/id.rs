use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::TypeError;
use crate::field_type::FieldType;

/// Identifier of a stored document.
///
/// Identifiers are unique within a collection and immutable once assigned.
/// The variant in use is dictated by the identifier field's [`FieldType`];
/// raw identifiers read back from storage are cast with [`DocumentId::cast`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentId {
    Uuid(Uuid),
    Int(i64),
    String(String),
}

impl DocumentId {
    /// Generate a fresh, time-ordered identifier (UUID v7).
    pub fn generate() -> Self {
        Self::Uuid(Uuid::now_v7())
    }

    /// Convert to the JSON representation handed to the storage engine.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Uuid(u) => Value::String(u.to_string()),
            Self::Int(i) => Value::from(*i),
            Self::String(s) => Value::String(s.clone()),
        }
    }

    /// Cast a raw stored identifier according to the identifier field type.
    ///
    /// `FieldType::Id` accepts any representation: UUID-shaped strings become
    /// [`DocumentId::Uuid`], other strings stay strings, integers stay integers.
    pub fn cast(value: &Value, field_type: FieldType) -> Result<Self, TypeError> {
        let invalid = || TypeError::InvalidCast {
            value: value.to_string(),
            expected: format!("{field_type} identifier"),
        };
        match (field_type, value) {
            (FieldType::Uuid, Value::String(s)) => {
                Uuid::parse_str(s).map(Self::Uuid).map_err(|_| invalid())
            }
            (FieldType::Int, Value::Number(n)) => n.as_i64().map(Self::Int).ok_or_else(invalid),
            (FieldType::Int, Value::String(s)) => s.parse().map(Self::Int).map_err(|_| invalid()),
            (FieldType::String, Value::String(s)) => Ok(Self::String(s.clone())),
            (FieldType::String, Value::Number(n)) => Ok(Self::String(n.to_string())),
            (FieldType::Id, Value::String(s)) => Ok(Uuid::parse_str(s)
                .map(Self::Uuid)
                .unwrap_or_else(|_| Self::String(s.clone()))),
            (FieldType::Id, Value::Number(n)) => n.as_i64().map(Self::Int).ok_or_else(invalid),
            _ => Err(invalid()),
        }
    }

    /// Short representation for log lines.
    pub fn short(&self) -> String {
        match self {
            Self::Uuid(u) => u.simple().to_string()[..8].to_string(),
            Self::Int(i) => i.to_string(),
            Self::String(s) => s.clone(),
        }
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({self})")
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<Uuid> for DocumentId {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl From<i64> for DocumentId {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for DocumentId {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// Strategy assigning identifiers to new documents of a type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdGenerator {
    /// Generated client-side (UUID v7) when the document is persisted.
    #[default]
    Auto,
    /// Set by the application before persisting.
    Assigned,
    /// Deferred to the store; written back after the insert succeeds.
    Store,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(DocumentId::generate(), DocumentId::generate());
    }

    #[test]
    fn cast_uuid_from_string() {
        let id = DocumentId::generate();
        let cast = DocumentId::cast(&id.to_json(), FieldType::Uuid).unwrap();
        assert_eq!(cast, id);
    }

    #[test]
    fn cast_rejects_malformed_uuid() {
        let err = DocumentId::cast(&json!("not-a-uuid"), FieldType::Uuid).unwrap_err();
        assert!(matches!(err, TypeError::InvalidCast { .. }));
    }

    #[test]
    fn cast_int_accepts_numeric_strings() {
        assert_eq!(
            DocumentId::cast(&json!("42"), FieldType::Int).unwrap(),
            DocumentId::Int(42)
        );
        assert_eq!(
            DocumentId::cast(&json!(42), FieldType::Int).unwrap(),
            DocumentId::Int(42)
        );
    }

    #[test]
    fn generic_id_type_sniffs_representation() {
        let uuid = Uuid::now_v7();
        assert_eq!(
            DocumentId::cast(&json!(uuid.to_string()), FieldType::Id).unwrap(),
            DocumentId::Uuid(uuid)
        );
        assert_eq!(
            DocumentId::cast(&json!("user-7"), FieldType::Id).unwrap(),
            DocumentId::String("user-7".into())
        );
        assert_eq!(
            DocumentId::cast(&json!(7), FieldType::Id).unwrap(),
            DocumentId::Int(7)
        );
    }

    #[test]
    fn cast_rejects_objects() {
        assert!(DocumentId::cast(&json!({"a": 1}), FieldType::Id).is_err());
    }

    #[test]
    fn display_is_plain_value() {
        assert_eq!(DocumentId::Int(5).to_string(), "5");
        assert_eq!(DocumentId::from("abc").to_string(), "abc");
    }

    #[test]
    fn short_uuid_is_8_chars() {
        assert_eq!(DocumentId::generate().short().len(), 8);
    }

    #[test]
    fn id_generator_defaults_to_auto() {
        assert_eq!(IdGenerator::default(), IdGenerator::Auto);
        let json = serde_json::to_string(&IdGenerator::Store).unwrap();
        assert_eq!(json, "\"store\"");
    }
}
