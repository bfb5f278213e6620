//! Metadata providers.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use odm_types::normalize_type_name;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MappingError, MappingResult};
use crate::metadata::ClassMetadata;

/// Resolves document type names to their metadata.
///
/// Implementations must be thread-safe and must accept both normalized and
/// un-normalized type names.
pub trait MetadataProvider: Send + Sync {
    /// Metadata for `type_name`, or [`MappingError::MappingNotFound`].
    fn metadata_for(&self, type_name: &str) -> MappingResult<Arc<ClassMetadata>>;

    /// Every registered type, sorted by name.
    fn all_metadata(&self) -> Vec<Arc<ClassMetadata>>;

    /// Whether `type_name` is mapped.
    fn has_metadata(&self, type_name: &str) -> bool {
        self.metadata_for(type_name).is_ok()
    }
}

/// On-disk layout of a JSON mapping file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MappingFile {
    #[serde(default)]
    pub types: Vec<ClassMetadata>,
}

/// In-memory metadata provider.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    types: RwLock<BTreeMap<String, Arc<ClassMetadata>>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register metadata, replacing any previous entry.
    pub fn register(&self, mut metadata: ClassMetadata) -> MappingResult<Arc<ClassMetadata>> {
        metadata.fill_defaults();
        metadata.validate()?;
        let name = metadata.type_name().to_string();
        let metadata = Arc::new(metadata);
        debug!(type_name = %name, fields = metadata.fields.len(), "registered mapping");
        self.types
            .write()
            .map_err(|_| MappingError::InvalidMapping {
                type_name: name.clone(),
                reason: "registry lock poisoned".into(),
            })?
            .insert(name, Arc::clone(&metadata));
        Ok(metadata)
    }

    /// Parse a JSON mapping file.
    pub fn from_json_str(json: &str) -> MappingResult<Self> {
        let file: MappingFile = serde_json::from_str(json)?;
        let registry = Self::new();
        for metadata in file.types {
            registry.register(metadata)?;
        }
        Ok(registry)
    }

    /// Read and parse a JSON mapping file from disk.
    pub fn load(path: impl AsRef<Path>) -> MappingResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serialize every registered type back into the mapping-file layout.
    pub fn to_json_string(&self) -> MappingResult<String> {
        let file = MappingFile {
            types: self
                .all_metadata()
                .iter()
                .map(|m| m.as_ref().clone())
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    pub fn len(&self) -> usize {
        self.types.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetadataProvider for MetadataRegistry {
    fn metadata_for(&self, type_name: &str) -> MappingResult<Arc<ClassMetadata>> {
        let name = normalize_type_name(type_name);
        self.types
            .read()
            .ok()
            .and_then(|types| types.get(name).cloned())
            .ok_or_else(|| MappingError::MappingNotFound(name.to_string()))
    }

    fn all_metadata(&self) -> Vec<Arc<ClassMetadata>> {
        self.types
            .read()
            .map(|types| types.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FieldMapping;
    use odm_types::FieldType;

    const MAPPING: &str = r#"{
        "types": [
            {
                "name": "\\App\\User",
                "collection": "users",
                "fields": [
                    {"name": "name", "field_type": "string"},
                    {"name": "email", "storage_key": "e", "field_type": "string"}
                ]
            },
            {
                "name": "App\\Address",
                "is_embedded": true,
                "fields": [{"name": "city", "field_type": "string"}]
            }
        ]
    }"#;

    #[test]
    fn lookup_normalizes_names() {
        let registry = MetadataRegistry::new();
        registry
            .register(ClassMetadata::builder("App\\User").build().unwrap())
            .unwrap();
        assert!(registry.metadata_for("\\App\\User").is_ok());
        assert!(registry.metadata_for("App\\User").is_ok());
        assert!(registry.has_metadata("\\App\\User"));
    }

    #[test]
    fn unknown_type_is_mapping_not_found() {
        let registry = MetadataRegistry::new();
        let err = registry.metadata_for("\\Nope").unwrap_err();
        assert!(matches!(err, MappingError::MappingNotFound(name) if name == "Nope"));
    }

    #[test]
    fn register_replaces() {
        let registry = MetadataRegistry::new();
        registry
            .register(ClassMetadata::builder("A").collection("a1").build().unwrap())
            .unwrap();
        registry
            .register(ClassMetadata::builder("A").collection("a2").build().unwrap())
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.metadata_for("A").unwrap().collection.as_deref(),
            Some("a2")
        );
    }

    #[test]
    fn register_rejects_invalid_metadata() {
        let registry = MetadataRegistry::new();
        let mut meta = ClassMetadata::builder("A")
            .field(FieldMapping::scalar("x", FieldType::String))
            .build()
            .unwrap();
        meta.fields.push(FieldMapping::scalar("x", FieldType::Int));
        assert!(registry.register(meta).is_err());
        assert!(registry.is_empty());
    }

    // -----------------------------------------------------------------------
    // JSON mapping files
    // -----------------------------------------------------------------------

    #[test]
    fn parse_mapping_file() {
        let registry = MetadataRegistry::from_json_str(MAPPING).unwrap();
        assert_eq!(registry.len(), 2);

        let user = registry.metadata_for("App\\User").unwrap();
        assert_eq!(user.field("name").unwrap().storage_key, "name");
        assert_eq!(user.field("email").unwrap().storage_key, "e");

        let address = registry.metadata_for("App\\Address").unwrap();
        assert!(address.is_embedded);
    }

    #[test]
    fn all_metadata_is_sorted() {
        let registry = MetadataRegistry::from_json_str(MAPPING).unwrap();
        let names: Vec<_> = registry
            .all_metadata()
            .iter()
            .map(|m| m.type_name().to_string())
            .collect();
        assert_eq!(names, vec!["App\\Address", "App\\User"]);
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = MetadataRegistry::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, MappingError::Parse(_)));
    }

    #[test]
    fn load_and_write_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.json");
        std::fs::write(&path, MAPPING).unwrap();

        let registry = MetadataRegistry::load(&path).unwrap();
        let json = registry.to_json_string().unwrap();
        let reparsed = MetadataRegistry::from_json_str(&json).unwrap();
        assert_eq!(
            reparsed.metadata_for("App\\User").unwrap(),
            registry.metadata_for("App\\User").unwrap()
        );
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = MetadataRegistry::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, MappingError::Io(_)));
    }
}
