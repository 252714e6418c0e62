use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::{AppContext, InitArgs};
use crate::core::device::OsPolicy;
use crate::core::timekey::TimeWindow;
use crate::infra::walk::DEFAULT_IGNORES;

pub const CONFIG_FILE: &str = "bwreg.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config
{
    /// Raw data roots used when none are given on the command line
    pub raw_roots: Vec<PathBuf>,

    /// Where exported registries go
    pub output_dir: Option<PathBuf>,

    /// Folder name of an exported project
    pub project_name: String,

    /// Basename globs that are never data
    pub ignore_patterns: Vec<String>,

    /// Build users concurrently
    pub parallel: bool,

    /// Follow symlinks inside raw roots
    pub follow_symlinks: bool,

    /// Passive streams to register; all when unset
    pub include_streams: Option<Vec<String>>,

    /// Device OS names as written in identifiers files -> canonical name
    pub os_aliases: BTreeMap<String, String>,

    /// Per-user follow-up windows, used when --from/--to are not given
    pub utc_ranges: BTreeMap<String, TimeWindow>,

    /// Per-user study configuration files, used when --configuration is not given
    pub configurations: BTreeMap<String, PathBuf>,
}

impl Default for Config
{
    fn default() -> Self
    {
        Self {
            raw_roots: Vec::new(),
            output_dir: None,
            project_name: "registry".to_string(),
            ignore_patterns: DEFAULT_IGNORES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            parallel: false,
            follow_symlinks: false,
            include_streams: None,
            os_aliases: OsPolicy::default().aliases,
            utc_ranges: BTreeMap::new(),
            configurations: BTreeMap::new(),
        }
    }
}

pub fn load_config() -> Result<Config>
{
    let mut builder = config::Config::builder();

    // First config file found wins
    let config_paths = [CONFIG_FILE, "bwreg.yaml", "bwreg.json", ".bwreg.toml"];

    for path in &config_paths
    {
        if Path::new(path).exists()
        {
            builder = builder.add_source(config::File::with_name(path));
            break;
        }
    }

    // BWREG_PROJECT_NAME, BWREG_PARALLEL, ...
    builder = builder.add_source(
        config::Environment::with_prefix("BWREG")
            .prefix_separator("_")
            .try_parsing(true),
    );

    let cfg = builder
        .build()
        .context("Failed to load configuration")?;
    let parsed: Config = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;

    Ok(parsed)
}

/// Roots from the command line, else from the config; `~` and `$VAR` are
/// expanded. Unexpandable paths are kept as given.
pub fn resolve_roots(
    cli_roots: &[PathBuf],
    config: &Config,
) -> Vec<PathBuf>
{
    let roots = if cli_roots.is_empty() { &config.raw_roots } else { cli_roots };

    roots
        .iter()
        .map(|root| {
            let raw = root.to_string_lossy();
            match shellexpand::full(&raw)
            {
                Ok(expanded) => PathBuf::from(expanded.as_ref()),
                Err(_) => root.clone(),
            }
        })
        .collect()
}

pub fn init(
    args: InitArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let config_path = args
        .path
        .join(CONFIG_FILE);

    if config_path.exists() && !args.force
    {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let config = Config::default();
    let toml_string =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;

    if ctx.dry_run
    {
        if !ctx.quiet
        {
            println!("DRY RUN: would write {}", config_path.display());
        }
        return Ok(());
    }

    std::fs::write(&config_path, toml_string).context("Failed to write config file")?;

    if !ctx.quiet
    {
        println!("Created config file at {}", config_path.display());
    }
    Ok(())
}
