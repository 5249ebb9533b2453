//! CLI argument definitions using clap derive

use crate::artifact::{ArtifactKey, TransferPolicy};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// Depot - local artifact cache with lazy mirroring
///
/// Keeps build artifacts in a local store and fetches missing ones from
/// remote repositories the first time they are needed.
#[derive(Parser, Debug)]
#[command(name = "depot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "DEPOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Local store directory (overrides store.root)
    #[arg(long, global = true, env = "DEPOT_STORE")]
    pub store: Option<PathBuf>,

    /// Never contact remote repositories
    #[arg(long, global = true)]
    pub offline: bool,

    /// Log output format (overrides general.log_format)
    #[arg(long, global = true, value_enum, env = "DEPOT_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Make artifacts available locally, mirroring them if needed
    Fetch(FetchArgs),

    /// Write an artifact's bytes to a file or stdout
    Get(GetArgs),

    /// Store a local file as an artifact
    Add(AddArgs),

    /// List stored artifacts
    List(ListArgs),

    /// Print the file backing a stored artifact
    Path(PathArgs),

    /// Remove stored artifacts
    Remove(RemoveArgs),

    /// Check the index against the files on disk
    Verify(VerifyArgs),

    /// Show or edit configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Arguments for the fetch command
#[derive(Parser, Debug)]
pub struct FetchArgs {
    /// Artifact keys as type:id:version
    #[arg(required = true, value_parser = parse_key)]
    pub keys: Vec<ArtifactKey>,

    /// Which formats to transfer (overrides mirror.policy)
    #[arg(long, value_enum)]
    pub policy: Option<PolicyArg>,

    /// Extra remote to consult after the configured ones (URL or directory)
    #[arg(short, long = "remote")]
    pub remotes: Vec<String>,

    /// Concurrent mirror attempts (overrides mirror.parallel_fetches)
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

/// Arguments for the get command
#[derive(Parser, Debug)]
pub struct GetArgs {
    /// Artifact key as type:id:version
    #[arg(value_parser = parse_key)]
    pub key: ArtifactKey,

    /// Exact format to read instead of the canonical one (e.g. packed)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Extra remote to consult after the configured ones (URL or directory)
    #[arg(short, long = "remote")]
    pub remotes: Vec<String>,
}

/// Arguments for the add command
#[derive(Parser, Debug)]
pub struct AddArgs {
    /// Artifact key as type:id:version
    #[arg(value_parser = parse_key)]
    pub key: ArtifactKey,

    /// File holding the artifact bytes
    pub file: PathBuf,

    /// Format of the bytes (defaults to canonical)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Classifier for the on-disk file name
    #[arg(long)]
    pub classifier: Option<String>,

    /// File extension instead of the type's default
    #[arg(long)]
    pub extension: Option<String>,
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the path command
#[derive(Parser, Debug)]
pub struct PathArgs {
    /// Artifact key as type:id:version
    #[arg(value_parser = parse_key)]
    pub key: ArtifactKey,

    /// Format whose file to print (defaults to canonical)
    #[arg(short, long)]
    pub format: Option<String>,
}

/// Arguments for the remove command
#[derive(Parser, Debug)]
pub struct RemoveArgs {
    /// Artifact key as type:id:version
    #[arg(value_parser = parse_key, required_unless_present = "all", conflicts_with = "all")]
    pub key: Option<ArtifactKey>,

    /// Remove only this format instead of every format of the key
    #[arg(short, long)]
    pub format: Option<String>,

    /// Remove every artifact in the store
    #[arg(long)]
    pub all: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the verify command
#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Drop index entries without files and delete unindexed files
    #[arg(long)]
    pub repair: bool,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., mirror.policy)
        key: String,

        /// Value to set
        value: String,
    },
}

/// Arguments for the completions command
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Output format for list commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// JSON output
    Json,
    /// Plain text, one artifact per line
    Plain,
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Transfer policy as spelled on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    /// Fetch a packed copy first when the remote has one
    PreferDerived,
    /// Only fetch canonical bytes
    RequireCanonical,
}

impl From<PolicyArg> for TransferPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::PreferDerived => TransferPolicy::PreferDerived,
            PolicyArg::RequireCanonical => TransferPolicy::RequireCanonical,
        }
    }
}

fn parse_key(s: &str) -> Result<ArtifactKey, String> {
    ArtifactKey::parse(s).map_err(|e| e.to_string())
}
