use anyhow::Result;
use clap::Parser;
use danmerge::cli::{AppContext, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    danmerge::infra::init_logging(cli.verbose)?;

    // Build a context once, pass everywhere
    let ctx = AppContext {
        quiet: cli.quiet,
        no_color: cli.no_color,
        dry_run: cli.dry_run,
    };

    match cli.command {
        Commands::Process(args) => danmerge::process_run(args, &ctx),
        Commands::Init(args) => danmerge::infra::config_init(args, &ctx),
        Commands::Completions(args) => danmerge::completion::run(args, &ctx),
    }
}
