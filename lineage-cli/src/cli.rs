//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Lineage CLI - Keep migration lineages consistent across environments
#[derive(Parser, Debug)]
#[command(name = "lineage")]
#[command(version)]
#[command(about = "Lineage CLI - Keep migration lineages consistent across environments", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "LINEAGE_CONFIG", default_value = "lineage.toml")]
    pub config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize a new Lineage project
    Init(InitArgs),

    /// Report heads, environment state and schema drift without changing anything
    Check(CheckArgs),

    /// Merge heads, apply missing revisions and generate drift revisions
    Fix(FixArgs),

    /// Bring one environment up to another's lineage
    Sync(SyncArgs),

    /// Generate a revision from the difference between live and target schema
    Autogen(AutogenArgs),

    /// Show revision heads and applied state per environment
    Status(StatusArgs),
}

// =============================================================================
// Init Command
// =============================================================================

/// Arguments for the `init` command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Path to initialize the project (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// SQL dialect
    #[arg(short, long, default_value = "sqlite")]
    pub dialect: DialectArg,

    /// Overwrite an existing configuration
    #[arg(short, long)]
    pub yes: bool,
}

/// Supported dialects
#[derive(ValueEnum, Debug, Clone, Copy, Default)]
pub enum DialectArg {
    #[default]
    Sqlite,
    Postgres,
    Mysql,
}

impl From<DialectArg> for lineage_migrate::Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Sqlite => lineage_migrate::Dialect::Sqlite,
            DialectArg::Postgres => lineage_migrate::Dialect::Postgres,
            DialectArg::Mysql => lineage_migrate::Dialect::Mysql,
        }
    }
}

// =============================================================================
// Check / Status
// =============================================================================

/// Arguments for the `check` command
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Environment to check (defaults to the primary environment)
    #[arg(short, long)]
    pub env: Option<String>,

    /// Environments to compare against (defaults to all others)
    #[arg(long = "check-env", value_delimiter = ',')]
    pub check_envs: Vec<String>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `status` command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Print the status as JSON
    #[arg(long)]
    pub json: bool,
}

// =============================================================================
// Fix Command
// =============================================================================

/// Arguments for the `fix` command
#[derive(Args, Debug)]
pub struct FixArgs {
    /// Environment to repair (defaults to the primary environment)
    #[arg(short, long)]
    pub env: Option<String>,

    /// Do not merge multiple heads
    #[arg(long)]
    pub no_merge: bool,

    /// Do not generate a revision for schema drift
    #[arg(long)]
    pub no_generate: bool,

    /// Do not apply missing revisions
    #[arg(long)]
    pub no_upgrade: bool,

    /// Compute the plan without applying it
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation for production environments
    #[arg(short, long)]
    pub yes: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

// =============================================================================
// Sync Command
// =============================================================================

/// Arguments for the `sync` command
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Source environment
    #[arg(long)]
    pub from: String,

    /// Target environment
    #[arg(long)]
    pub to: String,

    /// Apply the plan (otherwise only report it)
    #[arg(long)]
    pub apply: bool,

    /// Compute the plan without applying it
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation for production environments
    #[arg(short, long)]
    pub yes: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

// =============================================================================
// Autogen Command
// =============================================================================

/// Arguments for the `autogen` command
#[derive(Args, Debug)]
pub struct AutogenArgs {
    /// Revision label
    #[arg(short, long, default_value = "autogenerated")]
    pub message: String,

    /// Environment whose live schema is compared (defaults to the primary)
    #[arg(short, long)]
    pub env: Option<String>,
}
