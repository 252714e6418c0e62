use anyhow::Result;
use beiwe_registry::cli::{AppContext, Cli, Commands};
use beiwe_registry::infra::logging;
use clap::Parser;

fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(cli.verbose, cli.no_color);

    // Build a context once, pass everywhere
    let ctx = AppContext {
        quiet: cli.quiet,
        no_color: cli.no_color,
        dry_run: cli.dry_run,
    };

    match cli.command {
        Commands::Registry(args) => beiwe_registry::registry_run(args, &ctx),
        Commands::User(args) => beiwe_registry::user_run(args, &ctx),
        Commands::Merge(args) => beiwe_registry::merge_run(args, &ctx),
        Commands::Init(args) => beiwe_registry::infra::config::init(args, &ctx),
        Commands::Completions(args) => beiwe_registry::completion::run(args, &ctx),
    }
}
