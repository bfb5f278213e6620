use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "odm",
    about = "Document mapper tooling: hydrator generation and mapping inspection",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Manager configuration (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write hydrator plans for every mapped document type
    GenerateHydrators(GenerateArgs),
    /// Print the resolved mapping of one or all types
    Inspect(InspectArgs),
}

#[derive(Args)]
pub struct GenerateArgs {
    /// Mapping file (JSON)
    #[arg(short, long)]
    pub mapping: PathBuf,
    /// Output directory; defaults to the configured hydrator directory
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Args)]
pub struct InspectArgs {
    /// Mapping file (JSON)
    #[arg(short, long)]
    pub mapping: PathBuf,
    /// Only this type
    #[arg(short = 't', long = "type")]
    pub type_name: Option<String>,
}
