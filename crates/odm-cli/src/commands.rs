use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use odm_core::{hydrator_name, HydratorFactory};
use odm_manager::Configuration;
use odm_mapping::{ClassMetadata, FieldKind, MetadataProvider, MetadataRegistry};
use tracing::debug;

use crate::cli::*;

const DEFAULT_HYDRATOR_DIR: &str = "hydrators";

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Configuration::load(path)?,
        None => Configuration::default(),
    };
    match cli.command {
        Command::GenerateHydrators(args) => cmd_generate(args, &config, cli.format),
        Command::Inspect(args) => cmd_inspect(args, cli.format),
    }
}

fn load_mapping(path: &Path) -> anyhow::Result<Arc<MetadataRegistry>> {
    let registry = MetadataRegistry::load(path)
        .with_context(|| format!("loading mapping {}", path.display()))?;
    debug!(path = %path.display(), types = registry.len(), "loaded mapping");
    Ok(Arc::new(registry))
}

fn cmd_generate(args: GenerateArgs, config: &Configuration, format: OutputFormat) -> anyhow::Result<()> {
    let registry = load_mapping(&args.mapping)?;
    let out = args
        .out
        .or_else(|| config.hydrator_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_HYDRATOR_DIR));
    let written = generate(registry, config, &out)?;

    match format {
        OutputFormat::Json => {
            let paths: Vec<String> = written.iter().map(|p| p.display().to_string()).collect();
            println!("{}", serde_json::to_string_pretty(&paths)?);
        }
        OutputFormat::Text => {
            for path in &written {
                println!("  {} {}", "generated:".green(), path.display());
            }
            println!(
                "{} {} hydrator(s) in {}",
                "✓".green().bold(),
                written.len(),
                out.display().to_string().bold()
            );
        }
    }
    Ok(())
}

/// Write plans for every mapped type that is not a file type.
fn generate(
    registry: Arc<MetadataRegistry>,
    config: &Configuration,
    out: &Path,
) -> anyhow::Result<Vec<PathBuf>> {
    let types: Vec<Arc<ClassMetadata>> = registry
        .all_metadata()
        .into_iter()
        .filter(|m| !m.is_file)
        .collect();
    let factory = HydratorFactory::new(registry, config.hydrator_settings());
    let written = factory
        .generate_hydrator_classes(&types, Some(out))
        .with_context(|| format!("generating hydrators into {}", out.display()))?;
    Ok(written)
}

fn cmd_inspect(args: InspectArgs, format: OutputFormat) -> anyhow::Result<()> {
    let registry = load_mapping(&args.mapping)?;
    let types = select(&registry, args.type_name.as_deref())?;

    match format {
        OutputFormat::Json => println!("{}", render_json(&types)?),
        OutputFormat::Text => {
            for metadata in &types {
                print!("{}", render(metadata));
            }
        }
    }
    Ok(())
}

fn select(registry: &MetadataRegistry, type_name: Option<&str>) -> anyhow::Result<Vec<Arc<ClassMetadata>>> {
    match type_name {
        Some(name) => Ok(vec![registry.metadata_for(name)?]),
        None => Ok(registry.all_metadata()),
    }
}

fn render_json(types: &[Arc<ClassMetadata>]) -> anyhow::Result<String> {
    let views: Vec<&ClassMetadata> = types.iter().map(|m| &**m).collect();
    Ok(serde_json::to_string_pretty(&views)?)
}

fn render(metadata: &ClassMetadata) -> String {
    let mut out = String::new();
    let kind = if metadata.is_embedded {
        " (embedded)"
    } else if metadata.is_file {
        " (file)"
    } else {
        ""
    };
    let _ = writeln!(out, "{}{}", metadata.type_name().yellow().bold(), kind);
    if !metadata.is_embedded {
        let _ = writeln!(
            out,
            "  storage:    {}.{}",
            metadata.database.as_deref().unwrap_or("(default)"),
            metadata.collection.as_deref().unwrap_or("(none)")
        );
        let _ = writeln!(
            out,
            "  identifier: {} ({}, {:?})",
            metadata.identifier, metadata.id_type, metadata.id_generator
        );
    }
    let _ = writeln!(out, "  hydrator:   {}", hydrator_name(metadata.type_name()).cyan());
    if let Some(repo) = &metadata.custom_repository {
        let _ = writeln!(out, "  repository: {repo}");
    }
    if let Some(field) = &metadata.version_field {
        let _ = writeln!(out, "  version:    {field}");
    }
    if let Some(field) = &metadata.lock_field {
        let _ = writeln!(out, "  lock:       {field}");
    }

    for field in &metadata.fields {
        let relation = match (field.kind, field.target.as_deref()) {
            (FieldKind::Scalar, _) => field.field_type.to_string(),
            (FieldKind::Embedded, target) => {
                format!("embed {}{}", if field.many { "many " } else { "" }, target.unwrap_or("?"))
            }
            (FieldKind::Reference, target) => {
                format!("reference {}{}", if field.many { "many " } else { "" }, target.unwrap_or("?"))
            }
        };
        let key = if field.storage_key == field.name {
            String::new()
        } else {
            format!(" as {}", field.storage_key)
        };
        let _ = writeln!(out, "    {}{}: {}", field.name.bold(), key, relation);
    }
    for group in &metadata.also_load {
        let _ = writeln!(out, "    also load {} <- {}", group.method, group.keys.join(", "));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use odm_mapping::FieldMapping;
    use odm_types::FieldType;

    fn registry() -> Arc<MetadataRegistry> {
        let registry = MetadataRegistry::new();
        registry
            .register(
                ClassMetadata::builder("App\\User")
                    .collection("users")
                    .field(FieldMapping::scalar("name", FieldType::String).with_storage_key("n"))
                    .field(FieldMapping::reference_many("posts", "Post"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                ClassMetadata::builder("Post")
                    .collection("posts")
                    .field(FieldMapping::scalar("title", FieldType::String))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(ClassMetadata::builder("Avatar").collection("avatars").file().build().unwrap())
            .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn generate_skips_file_types() {
        colored::control::set_override(false);
        let dir = tempfile::tempdir().unwrap();
        let written = generate(registry(), &Configuration::default(), dir.path()).unwrap();

        assert_eq!(written.len(), 2);
        assert!(dir.path().join("AppUserHydrator.json").exists());
        assert!(dir.path().join("PostHydrator.json").exists());
        assert!(!dir.path().join("AvatarHydrator.json").exists());
    }

    #[test]
    fn select_one_or_all() {
        let registry = registry();
        assert_eq!(select(&registry, None).unwrap().len(), 3);
        let one = select(&registry, Some("\\App\\User")).unwrap();
        assert_eq!(one[0].type_name(), "App\\User");
        assert!(select(&registry, Some("Ghost")).is_err());
    }

    #[test]
    fn render_lists_fields_and_relations() {
        colored::control::set_override(false);
        let registry = registry();
        let text = render(&registry.metadata_for("App\\User").unwrap());

        assert!(text.starts_with("App\\User\n"));
        assert!(text.contains("storage:    (default).users"));
        assert!(text.contains("hydrator:   AppUserHydrator"));
        assert!(text.contains("name as n: string"));
        assert!(text.contains("posts: reference many Post"));
    }

    #[test]
    fn render_json_emits_one_object_per_type() {
        let registry = registry();
        let types = select(&registry, None).unwrap();
        let json: serde_json::Value = serde_json::from_str(&render_json(&types).unwrap()).unwrap();

        let entries = json.as_array().unwrap();
        assert_eq!(entries.len(), 3);
        let user = select(&registry, Some("App\\User")).unwrap();
        let user: serde_json::Value = serde_json::from_str(&render_json(&user).unwrap()).unwrap();
        assert_eq!(user[0]["name"], "App\\User");
        assert_eq!(user[0]["collection"], "users");
        let text = user.to_string();
        assert!(text.contains("\"n\""));
        assert!(text.contains("Post"));
    }
}
