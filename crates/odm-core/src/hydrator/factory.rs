use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use odm_mapping::{ClassMetadata, MetadataProvider};
use odm_types::{normalize_type_name, RawDocument};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{HydrationContext, HydrationHints, HydrationPlan, Hydrator, PlanHydrator};
use crate::document::Document;
use crate::error::{CoreError, CoreResult};

/// Handler invoked with the first present value of an also-load group.
///
/// Handlers receive the instance being hydrated and must write through
/// [`Document::put`]; going through [`Document::set`] on a lazy reference
/// would load it again.
pub type AlsoLoadHandler = Arc<dyn Fn(&Document, &Value) -> CoreResult<()> + Send + Sync>;

/// Hydrator resolution settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HydratorSettings {
    /// Where generated plans are written and looked up.
    pub dir: Option<PathBuf>,
    /// Namespace recorded in generated plans.
    pub namespace: String,
    /// Generate plans for types that have none yet.
    pub auto_generate: bool,
}

impl Default for HydratorSettings {
    fn default() -> Self {
        Self {
            dir: None,
            namespace: "Hydrators".to_string(),
            auto_generate: true,
        }
    }
}

/// Deterministic hydrator name for a type: the normalized type name with
/// namespace separators removed, suffixed with `Hydrator`.
pub fn hydrator_name(type_name: &str) -> String {
    let mut name: String = normalize_type_name(type_name)
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    name.push_str("Hydrator");
    name
}

/// Resolves, generates, and caches one hydrator per type.
pub struct HydratorFactory {
    metadata: Arc<dyn MetadataProvider>,
    settings: HydratorSettings,
    hydrators: RwLock<HashMap<String, Arc<dyn Hydrator>>>,
    registered: RwLock<HashMap<String, Arc<dyn Hydrator>>>,
    plans: RwLock<HashMap<String, Arc<HydrationPlan>>>,
    handlers: RwLock<HashMap<(String, String), AlsoLoadHandler>>,
}

impl HydratorFactory {
    pub fn new(metadata: Arc<dyn MetadataProvider>, settings: HydratorSettings) -> Self {
        Self {
            metadata,
            settings,
            hydrators: RwLock::new(HashMap::new()),
            registered: RwLock::new(HashMap::new()),
            plans: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &HydratorSettings {
        &self.settings
    }

    /// Use a hand-written hydrator for `type_name`. Takes precedence over
    /// generated plans.
    pub fn register_hydrator(&self, type_name: &str, hydrator: Arc<dyn Hydrator>) -> CoreResult<()> {
        let name = normalize_type_name(type_name).to_string();
        self.hydrators
            .write()
            .map_err(|_| CoreError::poisoned("hydrator cache"))?
            .remove(&name);
        self.registered
            .write()
            .map_err(|_| CoreError::poisoned("hydrator registry"))?
            .insert(name, hydrator);
        Ok(())
    }

    /// Register the handler named `method` by also-load groups of `type_name`.
    pub fn register_also_load<F>(&self, type_name: &str, method: &str, handler: F) -> CoreResult<()>
    where
        F: Fn(&Document, &Value) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .map_err(|_| CoreError::poisoned("also-load registry"))?
            .insert(
                (normalize_type_name(type_name).to_string(), method.to_string()),
                Arc::new(handler),
            );
        Ok(())
    }

    /// Whether a hydrator for `type_name` is already cached.
    pub fn is_cached(&self, type_name: &str) -> bool {
        self.hydrators
            .read()
            .map(|h| h.contains_key(normalize_type_name(type_name)))
            .unwrap_or(false)
    }

    /// The hydrator for `type_name`, resolving and caching it on first use.
    pub fn get_hydrator_for(&self, type_name: &str) -> CoreResult<Arc<dyn Hydrator>> {
        let name = normalize_type_name(type_name);
        if let Some(hydrator) = self
            .hydrators
            .read()
            .map_err(|_| CoreError::poisoned("hydrator cache"))?
            .get(name)
        {
            return Ok(Arc::clone(hydrator));
        }

        let registered = self
            .registered
            .read()
            .map_err(|_| CoreError::poisoned("hydrator registry"))?
            .get(name)
            .cloned();
        let hydrator: Arc<dyn Hydrator> = match registered {
            Some(h) => h,
            None => Arc::new(PlanHydrator::new(self.plan_for(name)?)),
        };

        let mut cache = self
            .hydrators
            .write()
            .map_err(|_| CoreError::poisoned("hydrator cache"))?;
        Ok(Arc::clone(
            cache.entry(name.to_string()).or_insert(hydrator),
        ))
    }

    /// The hydration plan for `type_name`, loading or generating it on first use.
    pub fn plan_for(&self, type_name: &str) -> CoreResult<Arc<HydrationPlan>> {
        let name = normalize_type_name(type_name);
        if let Some(plan) = self
            .plans
            .read()
            .map_err(|_| CoreError::poisoned("plan cache"))?
            .get(name)
        {
            return Ok(Arc::clone(plan));
        }

        let metadata = self.metadata.metadata_for(name)?;
        let plan = Arc::new(self.resolve_plan(&metadata)?);
        let mut plans = self
            .plans
            .write()
            .map_err(|_| CoreError::poisoned("plan cache"))?;
        Ok(Arc::clone(plans.entry(name.to_string()).or_insert(plan)))
    }

    fn resolve_plan(&self, metadata: &ClassMetadata) -> CoreResult<HydrationPlan> {
        let type_name = metadata.type_name();
        let setup = |reason: String| CoreError::HydrationSetup {
            type_name: type_name.to_string(),
            reason,
        };

        match (&self.settings.dir, self.settings.auto_generate) {
            (None, true) => Ok(HydrationPlan::from_metadata(metadata, &self.settings.namespace)),
            (None, false) => Err(setup(
                "auto-generation is disabled and no hydrator directory is configured".into(),
            )),
            (Some(dir), auto_generate) => {
                let path = plan_path(dir, type_name);
                if !path.exists() {
                    if !auto_generate {
                        return Err(setup(format!(
                            "no generated hydrator at {} and auto-generation is disabled",
                            path.display()
                        )));
                    }
                    self.write_plan(metadata, dir)?;
                }
                let json = fs::read_to_string(&path)
                    .map_err(|e| setup(format!("cannot read {}: {e}", path.display())))?;
                let plan = HydrationPlan::from_json(type_name, &json)?;
                if plan.type_name != type_name {
                    return Err(setup(format!(
                        "{} holds the hydrator for {}",
                        path.display(),
                        plan.type_name
                    )));
                }
                debug!(type_name, path = %path.display(), "loaded hydrator");
                Ok(plan)
            }
        }
    }

    /// Generate plans for `types` into `target_dir`, or the configured
    /// directory. Returns the written paths.
    pub fn generate_hydrator_classes(
        &self,
        types: &[Arc<ClassMetadata>],
        target_dir: Option<&Path>,
    ) -> CoreResult<Vec<PathBuf>> {
        let dir = target_dir
            .or(self.settings.dir.as_deref())
            .ok_or_else(|| CoreError::HydrationSetup {
                type_name: types
                    .first()
                    .map(|m| m.type_name().to_string())
                    .unwrap_or_default(),
                reason: "no hydrator directory given or configured".into(),
            })?;
        types.iter().map(|m| self.write_plan(m, dir)).collect()
    }

    fn write_plan(&self, metadata: &ClassMetadata, dir: &Path) -> CoreResult<PathBuf> {
        let setup = |reason: String| CoreError::HydrationSetup {
            type_name: metadata.type_name().to_string(),
            reason,
        };
        let plan = HydrationPlan::from_metadata(metadata, &self.settings.namespace);
        let path = plan_path(dir, metadata.type_name());
        fs::create_dir_all(dir)
            .map_err(|e| setup(format!("cannot create {}: {e}", dir.display())))?;
        fs::write(&path, plan.to_json()?)
            .map_err(|e| setup(format!("cannot write {}: {e}", path.display())))?;
        info!(type_name = %plan.type_name, hydrator = %plan.hydrator, "generated hydrator");
        Ok(path)
    }

    /// Hydrate `doc` from `data`.
    ///
    /// Also-load groups run first: for each group, the first candidate key
    /// present in `data` is handed to the group's handler and the rest of the
    /// group is skipped. Then the type's hydrator runs. A lazy reference is
    /// marked initialized only after both succeeded.
    pub fn hydrate(
        &self,
        doc: &Document,
        data: &RawDocument,
        ctx: &dyn HydrationContext,
        hints: &HydrationHints,
    ) -> CoreResult<Vec<String>> {
        let metadata = self.metadata.metadata_for(doc.type_name())?;

        for group in &metadata.also_load {
            let Some(value) = group.keys.iter().find_map(|key| data.get(key)) else {
                continue;
            };
            let handler = self.also_load_handler(metadata.type_name(), &group.method)?;
            handler(doc, value)?;
        }

        let hydrator = self.get_hydrator_for(doc.type_name())?;
        let populated = hydrator.hydrate(doc, data, ctx, hints)?;
        doc.mark_initialized();
        Ok(populated)
    }

    fn also_load_handler(&self, type_name: &str, method: &str) -> CoreResult<AlsoLoadHandler> {
        self.handlers
            .read()
            .map_err(|_| CoreError::poisoned("also-load registry"))?
            .get(&(type_name.to_string(), method.to_string()))
            .cloned()
            .ok_or_else(|| CoreError::HydrationSetup {
                type_name: type_name.to_string(),
                reason: format!("no also-load handler named {method}"),
            })
    }
}

fn plan_path(dir: &Path, type_name: &str) -> PathBuf {
    dir.join(format!("{}.json", hydrator_name(type_name)))
}

impl std::fmt::Debug for HydratorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HydratorFactory")
            .field("settings", &self.settings)
            .finish()
    }
}
