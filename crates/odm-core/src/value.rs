//! In-memory field values.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use odm_types::DocumentId;
use serde_json::Value;

use crate::document::Document;

/// Value of one field on an in-memory document.
///
/// Equality is type-aware: arrays and embedded values compare structurally,
/// references compare by instance identity, never by content.
#[derive(Clone, Debug)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Id(DocumentId),
    Date(DateTime<Utc>),
    Array(Vec<FieldValue>),
    Embedded(EmbeddedValue),
    Reference(Document),
    /// Opaque JSON for hash/collection/raw typed fields.
    Raw(Value),
}

/// A nested document owned by its parent.
#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddedValue {
    pub type_name: String,
    pub fields: BTreeMap<String, FieldValue>,
}

impl EmbeddedValue {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Reference(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_embedded(&self) -> Option<&EmbeddedValue> {
        match self {
            Self::Embedded(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[FieldValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Every document referenced by this value, walking arrays and embedded
    /// values. Order follows the value's structure.
    pub fn references(&self) -> Vec<Document> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut Vec<Document>) {
        match self {
            Self::Reference(doc) => out.push(doc.clone()),
            Self::Array(items) => items.iter().for_each(|v| v.collect_references(out)),
            Self::Embedded(e) => e.fields.values().for_each(|v| v.collect_references(out)),
            _ => {}
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            // Bitwise so that NaN never shows up as a change.
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits() || a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Id(a), Self::Id(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Embedded(a), Self::Embedded(b)) => a == b,
            (Self::Reference(a), Self::Reference(b)) => a.same_instance(b),
            (Self::Raw(a), Self::Raw(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for FieldValue {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<DocumentId> for FieldValue {
    fn from(id: DocumentId) -> Self {
        Self::Id(id)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(d: DateTime<Utc>) -> Self {
        Self::Date(d)
    }
}

impl From<EmbeddedValue> for FieldValue {
    fn from(e: EmbeddedValue) -> Self {
        Self::Embedded(e)
    }
}

impl From<Document> for FieldValue {
    fn from(doc: Document) -> Self {
        Self::Reference(doc)
    }
}

impl From<&Document> for FieldValue {
    fn from(doc: &Document) -> Self {
        Self::Reference(doc.clone())
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(items: Vec<FieldValue>) -> Self {
        Self::Array(items)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Self::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_compare_by_identity() {
        let a = Document::new("User");
        let b = Document::new("User");
        assert_eq!(FieldValue::from(&a), FieldValue::from(a.clone()));
        assert_ne!(FieldValue::from(&a), FieldValue::from(&b));
    }

    #[test]
    fn embedded_compare_structurally() {
        let x = EmbeddedValue::new("Address").with("city", "Oslo");
        let y = EmbeddedValue::new("Address").with("city", "Oslo");
        let z = EmbeddedValue::new("Address").with("city", "Bergen");
        assert_eq!(FieldValue::from(x.clone()), FieldValue::from(y));
        assert_ne!(FieldValue::from(x), FieldValue::from(z));
    }

    #[test]
    fn nan_equals_itself() {
        assert_eq!(FieldValue::Float(f64::NAN), FieldValue::Float(f64::NAN));
    }

    #[test]
    fn variants_never_cross_compare() {
        assert_ne!(FieldValue::Int(1), FieldValue::Float(1.0));
        assert_ne!(FieldValue::String("1".into()), FieldValue::Int(1));
        assert_ne!(FieldValue::Null, FieldValue::Raw(Value::Null));
    }

    #[test]
    fn references_walk_nested_values() {
        let a = Document::new("User");
        let b = Document::new("User");
        let value = FieldValue::Array(vec![
            FieldValue::from(&a),
            FieldValue::Embedded(EmbeddedValue::new("Box").with("inner", &b)),
            FieldValue::Int(3),
        ]);
        let refs = value.references();
        assert_eq!(refs.len(), 2);
        assert!(refs[0].same_instance(&a));
        assert!(refs[1].same_instance(&b));
    }

    #[test]
    fn option_conversion() {
        assert!(FieldValue::from(None::<i64>).is_null());
        assert_eq!(FieldValue::from(Some("x")), FieldValue::String("x".into()));
    }
}
