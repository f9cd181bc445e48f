use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::core::codec::{Egress, FormatHint};
use crate::core::scheduler::DumpStep;

/// Shared application context for global flags
#[derive(Clone, Debug)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
    pub dry_run: bool,  // global --dry-run
}

#[derive(Parser)]
#[command(name = "dmerge")]
#[command(about = "Merge and de-duplicate near-identical danmaku comments")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress the summary and non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Process input but do not write egress
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the merge pipeline over comment payloads
    Process(ProcessArgs),

    /// Initialize a danmerge.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Parser)]
pub struct ProcessArgs {
    /// Input payloads. One XML document, or binary segments as
    /// file[:index[@from-to]] (seconds)
    #[arg(required = true)]
    pub inputs: Vec<String>,

    /// Input format
    #[arg(short, long, value_enum, default_value = "auto")]
    pub format: InputFormat,

    /// Output format
    #[arg(short, long, value_enum, default_value = "xml")]
    pub egress: EgressFormat,

    /// Which step to write: the decoded input or the merged output
    #[arg(long, value_enum, default_value = "output")]
    pub step: Step,

    /// Config file (defaults to danmerge.toml / .danmerge.toml in the
    /// working directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output file; stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print run statistics to stderr
    #[arg(long)]
    pub stats: bool,

    /// Print run statistics as JSON instead of a summary
    #[arg(long, requires = "stats")]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    Auto,
    Xml,
    Binary,
}

impl From<InputFormat> for FormatHint {
    fn from(f: InputFormat) -> Self {
        match f {
            InputFormat::Auto => FormatHint::Auto,
            InputFormat::Xml => FormatHint::Xml,
            InputFormat::Binary => FormatHint::Binary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EgressFormat {
    Xml,
    Binary,
    Debug,
    /// Debug dump with member texts
    DebugPeers,
}

impl From<EgressFormat> for Egress {
    fn from(f: EgressFormat) -> Self {
        match f {
            EgressFormat::Xml => Egress::Xml,
            EgressFormat::Binary => Egress::Binary,
            EgressFormat::Debug => Egress::Debug { show_peers: false },
            EgressFormat::DebugPeers => Egress::Debug { show_peers: true },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Step {
    Input,
    Output,
}

impl From<Step> for DumpStep {
    fn from(s: Step) -> Self {
        match s {
            Step::Input => DumpStep::Input,
            Step::Output => DumpStep::Output,
        }
    }
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

#[derive(Args)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,

    /// Write the script into this directory instead of stdout
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_process_defaults() {
        let cli = Cli::try_parse_from(["dmerge", "process", "dm.xml"]).unwrap();
        let Commands::Process(args) = cli.command else {
            panic!("expected process");
        };
        assert_eq!(args.format, InputFormat::Auto);
        assert_eq!(Egress::from(args.egress), Egress::Xml);
        assert_eq!(DumpStep::from(args.step), DumpStep::Output);
        assert!(args.output.is_none());
    }

    #[test]
    fn test_json_requires_stats() {
        assert!(Cli::try_parse_from(["dmerge", "process", "a.xml", "--json"]).is_err());
        assert!(Cli::try_parse_from(["dmerge", "process", "a.xml", "--stats", "--json"]).is_ok());
    }
}
