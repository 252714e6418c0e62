use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::core::timekey::TimeWindow;

/// Shared application context for global flags
#[derive(Clone, Debug, Default)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
    pub dry_run: bool,  // global --dry-run
}

#[derive(Parser)]
#[command(name = "bwreg")]
#[command(
    about = "Build deduplicated registries of raw Beiwe data spread over several download folders"
)]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress progress bars and non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Show what would be done without executing
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// More log output on stderr (-v info, -vv debug); BWREG_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build, export and summarize a project registry
    Registry(RegistryArgs),

    /// Build one user's registry
    User(UserArgs),

    /// Merge explicit directories of raw files
    Merge(MergeArgs),

    /// Initialize a bwreg.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Optional inclusive window, keys formatted `YYYY-MM-DD HH_MM_SS`
#[derive(Debug, Clone, Default, Args)]
pub struct WindowArgs {
    /// Window start (inclusive)
    #[arg(long, requires = "to")]
    pub from: Option<String>,

    /// Window end (inclusive)
    #[arg(long, requires = "from")]
    pub to: Option<String>,
}

impl WindowArgs {
    /// Parse the window; a reversed or malformed window is a hard error.
    pub fn resolve(&self) -> anyhow::Result<Option<TimeWindow>> {
        match (&self.from, &self.to) {
            (Some(from), Some(to)) => Ok(Some(TimeWindow::parse(from, to)?)),
            (None, None) => Ok(None),
            _ => anyhow::bail!("--from and --to must be given together"),
        }
    }
}

#[derive(Debug, Parser)]
pub struct RegistryArgs {
    /// Raw data roots (defaults to raw_roots from the config)
    pub roots: Vec<PathBuf>,

    /// Only these user ids (comma separated or repeated)
    #[arg(short, long, value_delimiter = ',')]
    pub users: Vec<String>,

    #[command(flatten)]
    pub window: WindowArgs,

    /// Study configuration file attached to every user
    #[arg(long)]
    pub configuration: Option<PathBuf>,

    /// Export directory (defaults to output_dir from the config)
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Folder name of the export
    #[arg(long)]
    pub name: Option<String>,

    /// Build users in parallel
    #[arg(long)]
    pub parallel: bool,

    /// Only register these passive streams (identifiers are always kept)
    #[arg(long = "include", value_delimiter = ',')]
    pub include: Vec<String>,

    /// Emit the project registry as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct UserArgs {
    /// Beiwe user id
    pub user_id: String,

    /// Raw data roots (defaults to raw_roots from the config)
    pub roots: Vec<PathBuf>,

    #[command(flatten)]
    pub window: WindowArgs,

    /// Study configuration file
    #[arg(long)]
    pub configuration: Option<PathBuf>,

    /// Write {user_id}_registry.json into this directory
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Emit the registry as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct MergeArgs {
    /// Directories holding copies of the same stream
    #[arg(required = true)]
    pub dirs: Vec<PathBuf>,

    #[command(flatten)]
    pub window: WindowArgs,

    /// Stream label recorded on each file in JSON output
    #[arg(long)]
    pub stream: Option<String>,

    /// Emit the merged stream as JSON instead of paths
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct InitArgs {
    /// Directory to initialize config in
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,

    /// Write the script into this directory instead of stdout
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}
