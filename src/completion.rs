//! `dmerge completions`: shell completion scripts via clap_complete.

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::{generate, generate_to};

use crate::cli::{AppContext, Cli, CompletionsArgs};

pub fn run(args: CompletionsArgs, ctx: &AppContext) -> Result<()> {
    let mut cmd = Cli::command();
    let bin = cmd.get_name().to_string();

    let Some(dir) = args.out_dir else {
        generate(args.shell, &mut cmd, bin, &mut std::io::stdout());
        return Ok(());
    };

    if ctx.dry_run {
        if !ctx.quiet {
            eprintln!("DRY RUN: would write {} completions for {bin} into {}", args.shell, dir.display());
        }
        return Ok(());
    }

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = generate_to(args.shell, &mut cmd, bin, &dir)
        .context("Failed to write completion script")?;

    if !ctx.quiet {
        eprintln!("Wrote {}", path.display());
    }
    Ok(())
}
