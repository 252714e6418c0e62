//! `bwreg completions`: shell scripts generated from the clap definition.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::{Shell, generate, generate_to};

use crate::cli::{AppContext, Cli, CompletionsArgs};

const BIN_NAME: &str = "bwreg";

/// Completion script for `shell` as bytes.
pub fn script(shell: Shell) -> Vec<u8> {
    let mut buf = Vec::new();
    generate(shell, &mut Cli::command(), BIN_NAME, &mut buf);
    buf
}

/// Print the script, or write it into `--out-dir`.
pub fn run(args: CompletionsArgs, ctx: &AppContext) -> Result<()> {
    let Some(dir) = args.out_dir else {
        io::stdout()
            .write_all(&script(args.shell))
            .context("writing completion script")?;
        return Ok(());
    };

    if ctx.dry_run {
        if !ctx.quiet {
            println!("DRY RUN: would write {} completions into {}", args.shell, dir.display());
        }
        return Ok(());
    }

    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let path: PathBuf = generate_to(args.shell, &mut Cli::command(), BIN_NAME, &dir)
        .with_context(|| format!("writing {} completions", args.shell))?;

    if !ctx.quiet {
        eprintln!("Wrote completion to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn bash_script_names_the_subcommands() {
        let text = String::from_utf8(script(Shell::Bash)).unwrap();
        assert!(text.contains(BIN_NAME));
        for sub in ["registry", "user", "merge", "init", "completions"] {
            assert!(text.contains(sub), "missing {sub}");
        }
    }

    #[test]
    fn dry_run_leaves_out_dir_alone() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("completions");
        let args = CompletionsArgs { shell: Shell::Zsh, out_dir: Some(dir.clone()) };
        let ctx = AppContext { quiet: true, dry_run: true, ..AppContext::default() };

        run(args, &ctx).unwrap();
        assert!(!dir.exists());

        let args = CompletionsArgs { shell: Shell::Zsh, out_dir: Some(dir.clone()) };
        run(args, &AppContext { quiet: true, ..AppContext::default() }).unwrap();
        assert!(dir.join("_bwreg").exists());
    }
}
