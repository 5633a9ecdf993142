// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `loopdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "loopdag",
    version,
    about = "Compile workflows with declared loops into DAG-only jobs.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workflow file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Loopdag.toml")]
    pub config: String,

    /// Write the lowered workflow here instead of stdout.
    #[arg(long, value_name = "PATH")]
    pub out: Option<String>,

    /// Compile and print a summary, but don't emit the lowered workflow.
    #[arg(long)]
    pub dry_run: bool,

    /// Compile, then run this loop offline until it terminates.
    #[arg(long, value_name = "LOOP")]
    pub simulate: Option<String>,

    /// Iteration at which the simulated `until` predicate becomes true.
    #[arg(long, value_name = "N", requires = "simulate")]
    pub satisfy_at: Option<u32>,

    /// Store simulated iteration state under this directory instead of in
    /// memory.
    #[arg(long, value_name = "DIR", requires = "simulate")]
    pub state_dir: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `LOOPDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
