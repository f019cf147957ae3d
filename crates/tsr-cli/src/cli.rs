use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tessera",
    about = "Tessera: inspect the shared commit log of a project",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the metadata header: generation, slots, master, ring region
    Inspect(LogArgs),
    /// List the records still held in the ring
    Records(RecordsArgs),
    /// Print the effective store configuration as TOML
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct LogArgs {
    /// Directory holding the shared segments
    #[arg(long)]
    pub dir: PathBuf,
    #[arg(long)]
    pub project: String,
}

#[derive(Args)]
pub struct RecordsArgs {
    #[command(flatten)]
    pub log: LogArgs,
    /// Only show records newer than this generation
    #[arg(long)]
    pub since: Option<i64>,
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// TOML file to load; defaults apply when absent
    #[arg(long)]
    pub file: Option<PathBuf>,
}
