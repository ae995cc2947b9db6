use clap::{Parser, Subcommand, ValueEnum};

pub mod run;
pub use run::*;

#[derive(Parser)]
#[command(
    name = "jobwire",
    version,
    about = "Run SQL, warehouse, function and shell jobs concurrently with uniform pass/fail results"
)]
pub struct Cli {
    /// Log output format (stderr)
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a batch of jobs from a YAML or JSON file
    Run(RunArgs),
    /// Execute one queued job payload and print its result envelope
    Dispatch(DispatchArgs),
    /// List registered connection types
    Kinds,
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}
