use std::path::{Path, PathBuf};

use odm_core::HydratorSettings;
use odm_store::WriteOptions;
use serde::{Deserialize, Serialize};

use crate::error::{ManagerError, ManagerResult};

/// Configuration of a document manager.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Database for types whose mapping names none. Falls back to
    /// [`odm_core::FALLBACK_DATABASE`] when unset.
    pub default_database: Option<String>,
    /// Where generated hydrator plans are written and looked up. Plans are
    /// kept in memory only when unset.
    pub hydrator_dir: Option<PathBuf>,
    /// Namespace recorded in generated hydrator plans.
    pub hydrator_namespace: String,
    /// Generate hydrator plans for types that have none yet.
    pub auto_generate_hydrators: bool,
    /// Write flags used by `flush` when the caller passes none.
    pub default_write_options: WriteOptions,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            default_database: None,
            hydrator_dir: None,
            hydrator_namespace: "Hydrators".to_string(),
            auto_generate_hydrators: true,
            default_write_options: WriteOptions::default(),
        }
    }
}

impl Configuration {
    /// Parse a TOML configuration. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> ManagerResult<Self> {
        toml::from_str(text).map_err(|e| ManagerError::Config(e.to_string()))
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> ManagerResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ManagerError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn with_default_database(mut self, name: impl Into<String>) -> Self {
        self.default_database = Some(name.into());
        self
    }

    pub fn with_hydrator_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.hydrator_dir = Some(dir.into());
        self
    }

    pub fn with_auto_generate_hydrators(mut self, enabled: bool) -> Self {
        self.auto_generate_hydrators = enabled;
        self
    }

    /// The subset of this configuration the hydrator factory needs.
    pub fn hydrator_settings(&self) -> HydratorSettings {
        HydratorSettings {
            dir: self.hydrator_dir.clone(),
            namespace: self.hydrator_namespace.clone(),
            auto_generate: self.auto_generate_hydrators,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odm_store::WriteConcern;

    #[test]
    fn defaults() {
        let config = Configuration::default();
        assert!(config.auto_generate_hydrators);
        assert_eq!(config.hydrator_namespace, "Hydrators");
        assert!(config.default_database.is_none());
        assert_eq!(config.hydrator_settings(), HydratorSettings::default());
    }

    #[test]
    fn parse_partial_toml() {
        let config = Configuration::from_toml_str(
            r#"
            default_database = "app"
            hydrator_dir = "/tmp/hydrators"

            [default_write_options]
            write_concern = "majority"
            fsync = true
            "#,
        )
        .unwrap();

        assert_eq!(config.default_database.as_deref(), Some("app"));
        assert_eq!(config.hydrator_dir, Some(PathBuf::from("/tmp/hydrators")));
        assert!(config.auto_generate_hydrators);
        assert_eq!(
            config.default_write_options.write_concern,
            Some(WriteConcern::Majority)
        );
        assert!(config.default_write_options.fsync);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = Configuration::from_toml_str("auto_generate_hydrators = \"yes\"").unwrap_err();
        assert!(matches!(err, ManagerError::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odm.toml");
        std::fs::write(&path, "auto_generate_hydrators = false\n").unwrap();

        let config = Configuration::load(&path).unwrap();
        assert!(!config.auto_generate_hydrators);
        assert!(!config.hydrator_settings().auto_generate);

        let missing = Configuration::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, ManagerError::ConfigIo { .. }));
    }
}
