//! Class and field metadata.

use std::collections::HashSet;

use odm_types::{normalize_type_name, FieldType, IdGenerator, ID_KEY};
use serde::{Deserialize, Serialize};

use crate::error::{MappingError, MappingResult};

/// How a field relates to the document that holds it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// A plain value cast to the field's [`FieldType`].
    #[default]
    Scalar,
    /// A nested document owned by its parent and stored inline.
    Embedded,
    /// A pointer to another root document, stored as `{"$ref", "$id"}`.
    Reference,
}

/// Unit-of-work operations that propagate along a relation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Cascade {
    pub persist: bool,
    pub remove: bool,
    pub detach: bool,
    pub merge: bool,
    pub refresh: bool,
}

impl Cascade {
    /// Cascade nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Cascade every operation.
    pub fn all() -> Self {
        Self {
            persist: true,
            remove: true,
            detach: true,
            merge: true,
            refresh: true,
        }
    }

    /// Cascade only `persist`.
    pub fn persist() -> Self {
        Self {
            persist: true,
            ..Self::default()
        }
    }
}

/// Mapping of one field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Field name on the in-memory document.
    pub name: String,
    /// Key under which the value is stored. Defaults to the field name.
    #[serde(default)]
    pub storage_key: String,
    #[serde(default)]
    pub kind: FieldKind,
    /// Scalar cast applied on load. Ignored for embedded and reference fields.
    #[serde(default)]
    pub field_type: FieldType,
    /// Target document type for embedded and reference fields.
    #[serde(default)]
    pub target: Option<String>,
    /// Holds a list of embedded documents or references rather than one.
    #[serde(default)]
    pub many: bool,
    #[serde(default)]
    pub cascade: Cascade,
}

impl FieldMapping {
    fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            storage_key: name.clone(),
            name,
            kind,
            field_type: FieldType::Raw,
            target: None,
            many: false,
            cascade: Cascade::none(),
        }
    }

    /// A scalar field.
    pub fn scalar(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            field_type,
            ..Self::new(name, FieldKind::Scalar)
        }
    }

    /// A single embedded document.
    pub fn embed_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::new(name, FieldKind::Embedded)
        }
    }

    /// A list of embedded documents.
    pub fn embed_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            many: true,
            ..Self::embed_one(name, target)
        }
    }

    /// A single reference.
    pub fn reference_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::new(name, FieldKind::Reference)
        }
    }

    /// A list of references.
    pub fn reference_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            many: true,
            ..Self::reference_one(name, target)
        }
    }

    /// Store the field under a different key.
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    /// Set the cascade configuration.
    pub fn with_cascade(mut self, cascade: Cascade) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn is_reference(&self) -> bool {
        self.kind == FieldKind::Reference
    }

    pub fn is_embedded(&self) -> bool {
        self.kind == FieldKind::Embedded
    }

    /// Target type name, normalized.
    pub fn target_type(&self) -> Option<&str> {
        self.target.as_deref().map(normalize_type_name)
    }
}

/// Alternate storage keys whose first present value is handed to a named
/// handler when a document is loaded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlsoLoad {
    /// Handler name, resolved through the hydrator factory's registry.
    pub method: String,
    /// Candidate storage keys, in priority order.
    pub keys: Vec<String>,
}

/// Mapping of one document type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMetadata {
    /// Fully-qualified type name.
    pub name: String,
    /// Name of the identifier field. Stored under `_id`.
    #[serde(default = "default_identifier")]
    pub identifier: String,
    #[serde(default = "default_id_type")]
    pub id_type: FieldType,
    #[serde(default)]
    pub id_generator: IdGenerator,
    /// Database name; the manager's default applies when absent.
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
    /// Name of a custom repository factory.
    #[serde(default)]
    pub custom_repository: Option<String>,
    /// Integer field incremented on every update.
    #[serde(default)]
    pub version_field: Option<String>,
    /// Integer field holding the pessimistic lock code.
    #[serde(default)]
    pub lock_field: Option<String>,
    /// Stored in a file store rather than a plain collection.
    #[serde(default)]
    pub is_file: bool,
    /// Only ever stored inside another document.
    #[serde(default)]
    pub is_embedded: bool,
    #[serde(default)]
    pub also_load: Vec<AlsoLoad>,
    /// Whether reads may be served by secondaries. `None` leaves the handle alone.
    #[serde(default)]
    pub slave_okay: Option<bool>,
}

fn default_identifier() -> String {
    "id".to_string()
}

fn default_id_type() -> FieldType {
    FieldType::Id
}

impl ClassMetadata {
    /// Start building metadata for a root document type.
    pub fn builder(name: impl Into<String>) -> ClassMetadataBuilder {
        ClassMetadataBuilder::new(name)
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldMapping> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a field by storage key.
    pub fn field_by_storage_key(&self, key: &str) -> Option<&FieldMapping> {
        self.fields.iter().find(|f| f.storage_key == key)
    }

    /// Reference fields, in declaration order.
    pub fn references(&self) -> impl Iterator<Item = &FieldMapping> {
        self.fields.iter().filter(|f| f.is_reference())
    }

    /// Relation fields (embedded or referenced), in declaration order.
    pub fn relations(&self) -> impl Iterator<Item = &FieldMapping> {
        self.fields.iter().filter(|f| f.kind != FieldKind::Scalar)
    }

    /// Whether `name` is the identifier field.
    pub fn is_identifier(&self, name: &str) -> bool {
        self.identifier == name
    }

    pub fn is_versioned(&self) -> bool {
        self.version_field.is_some()
    }

    /// Normalized type name.
    pub fn type_name(&self) -> &str {
        normalize_type_name(&self.name)
    }

    /// Name of the collection, or [`MappingError::NoCollection`].
    pub fn collection_name(&self) -> MappingResult<&str> {
        self.collection
            .as_deref()
            .ok_or_else(|| MappingError::NoCollection(self.type_name().to_string()))
    }

    /// Fill in defaults that serde cannot derive: storage keys default to the
    /// field name.
    pub fn fill_defaults(&mut self) {
        for field in &mut self.fields {
            if field.storage_key.is_empty() {
                field.storage_key = field.name.clone();
            }
        }
    }

    /// Check internal consistency.
    pub fn validate(&self) -> MappingResult<()> {
        let invalid = |reason: String| MappingError::InvalidMapping {
            type_name: self.name.clone(),
            reason,
        };

        if self.type_name().is_empty() {
            return Err(invalid("empty type name".into()));
        }
        if !self.is_embedded && self.identifier.is_empty() {
            return Err(invalid("root types need an identifier field".into()));
        }

        let mut names = HashSet::new();
        let mut keys = HashSet::new();
        for field in &self.fields {
            if field.name == self.identifier {
                return Err(invalid(format!(
                    "field {} shadows the identifier",
                    field.name
                )));
            }
            if !names.insert(field.name.as_str()) {
                return Err(invalid(format!("duplicate field {}", field.name)));
            }
            if field.storage_key == ID_KEY || !keys.insert(field.storage_key.as_str()) {
                return Err(invalid(format!(
                    "storage key {} of field {} is already taken",
                    field.storage_key, field.name
                )));
            }
            if field.kind != FieldKind::Scalar && field.target.is_none() {
                return Err(invalid(format!("relation {} has no target type", field.name)));
            }
        }

        for (role, name) in [("version", &self.version_field), ("lock", &self.lock_field)] {
            let Some(name) = name else { continue };
            match self.field(name) {
                Some(f) if f.kind == FieldKind::Scalar && f.field_type == FieldType::Int => {}
                Some(_) => return Err(invalid(format!("{role} field {name} must be an int"))),
                None => return Err(invalid(format!("{role} field {name} is not mapped"))),
            }
        }

        for group in &self.also_load {
            if group.method.is_empty() || group.keys.is_empty() {
                return Err(invalid("also-load groups need a method and keys".into()));
            }
        }
        Ok(())
    }
}

/// Builder for [`ClassMetadata`].
#[derive(Clone, Debug)]
pub struct ClassMetadataBuilder {
    metadata: ClassMetadata,
}

impl ClassMetadataBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: ClassMetadata {
                name: name.into(),
                identifier: default_identifier(),
                id_type: default_id_type(),
                id_generator: IdGenerator::Auto,
                database: None,
                collection: None,
                fields: Vec::new(),
                custom_repository: None,
                version_field: None,
                lock_field: None,
                is_file: false,
                is_embedded: false,
                also_load: Vec::new(),
                slave_okay: None,
            },
        }
    }

    pub fn identifier(mut self, name: impl Into<String>, id_type: FieldType) -> Self {
        self.metadata.identifier = name.into();
        self.metadata.id_type = id_type;
        self
    }

    pub fn id_generator(mut self, generator: IdGenerator) -> Self {
        self.metadata.id_generator = generator;
        self
    }

    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.metadata.database = Some(name.into());
        self
    }

    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.metadata.collection = Some(name.into());
        self
    }

    pub fn field(mut self, field: FieldMapping) -> Self {
        self.metadata.fields.push(field);
        self
    }

    pub fn custom_repository(mut self, name: impl Into<String>) -> Self {
        self.metadata.custom_repository = Some(name.into());
        self
    }

    /// Map an int field and use it as the version.
    pub fn version_field(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.metadata
            .fields
            .push(FieldMapping::scalar(name.clone(), FieldType::Int));
        self.metadata.version_field = Some(name);
        self
    }

    /// Map an int field and use it to record pessimistic locks.
    pub fn lock_field(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.metadata
            .fields
            .push(FieldMapping::scalar(name.clone(), FieldType::Int));
        self.metadata.lock_field = Some(name);
        self
    }

    pub fn file(mut self) -> Self {
        self.metadata.is_file = true;
        self
    }

    /// Mark the type as embedded-only.
    pub fn embedded(mut self) -> Self {
        self.metadata.is_embedded = true;
        self
    }

    pub fn also_load<I, S>(mut self, method: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.also_load.push(AlsoLoad {
            method: method.into(),
            keys: keys.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn slave_okay(mut self, ok: bool) -> Self {
        self.metadata.slave_okay = Some(ok);
        self
    }

    /// Validate and return the metadata.
    pub fn build(self) -> MappingResult<ClassMetadata> {
        self.metadata.validate()?;
        Ok(self.metadata)
    }
}
