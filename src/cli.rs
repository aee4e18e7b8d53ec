// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `teeproc`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "teeproc",
    version,
    about = "Run a command, mirroring its output into log files in real time.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Teeproc.toml` in the current working directory, if present.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print the command line before running it.
    #[arg(long)]
    pub echo: bool,

    /// Append the command's stdout to this file (repeatable).
    #[arg(long, value_name = "PATH")]
    pub tee_stdout: Vec<PathBuf>,

    /// Append the command's stderr to this file (repeatable).
    #[arg(long, value_name = "PATH")]
    pub tee_stderr: Vec<PathBuf>,

    /// Append the `$ command` trace line to this file (repeatable).
    #[arg(long, value_name = "PATH")]
    pub tee_prompt: Vec<PathBuf>,

    /// Terminate the command tree after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<f64>,

    /// Seconds between SIGTERM and SIGKILL on timeout.
    #[arg(long, value_name = "SECS")]
    pub grace: Option<f64>,

    /// Join the arguments and run them through the shell.
    #[arg(long)]
    pub shell: bool,

    /// Report a non-zero exit status as an error.
    #[arg(long)]
    pub check: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TEEPROC_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// The command to run, after `--`.
    #[arg(required = true, trailing_var_arg = true, value_name = "COMMAND")]
    pub command: Vec<String>,
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
