use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// indicatif bars on stderr; falls back to text when stderr is not a tty.
    Progress,
    Text,
    Jsonl,
    None,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Text => "text",
            Self::Jsonl => "jsonl",
            Self::None => "none",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "harvest", version, about = "Collect a batch of sources with retries and resume")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file to use instead of ~/.harvest/config.toml / ./harvest.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect every source of a list into an output directory.
    Collect(CollectArgs),
    /// Show the counts recorded in a state file.
    Status(StatusArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct CollectArgs {
    /// Source list (.json or .toml).
    #[arg(long)]
    pub sources: PathBuf,

    #[arg(long)]
    pub output: PathBuf,

    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Resume from / persist to this file.
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Ignore any saved state and start over.
    #[arg(long)]
    pub fresh: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Progress)]
    pub format: OutputFormat,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct StatusArgs {
    /// Defaults to `scheduler.state_file` from config.
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Print the counts as JSON.
    #[arg(long)]
    pub json: bool,
}
