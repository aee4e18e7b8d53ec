// src/lib.rs

pub mod blocking;
pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod registry;
pub mod runner;
pub mod sink;

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error};

use crate::cli::CliArgs;
use crate::config::model::RawConfigFile;
use crate::config::{ConfigFile, default_config_path, load_and_validate};
use crate::sink::FileTargets;

pub use crate::errors::{ExecError, Result as ExecResult};
pub use crate::exec::{
    Captured, CommandLine, ManagedProcess, OutputMode, Redirect, SpawnOptions, StdinSource,
};
pub use crate::registry::{
    reset_globals, set_global_echo, set_global_prompt_tees, set_global_stderr_tees,
    set_global_stdout_tees,
};
pub use crate::runner::{
    CompletedExecution, RunOptions, call, check_call, check_output, get_output,
    get_status_output, run,
};
pub use crate::sink::{LineSink, Sink, TeeTarget};

/// Exit status used when the command timed out, as `timeout(1)` does.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// High-level entry point used by `main.rs`. Returns the exit status to
/// terminate with.
///
/// This wires together:
/// - config loading and process-wide sinks
/// - the per-call sinks given on the command line
/// - one `run` of the command with its streams left on the terminal
pub async fn run_cli(args: CliArgs) -> Result<i32> {
    let cfg = load_cli_config(&args)?;
    cfg.apply_globals();
    if args.echo {
        set_global_echo(true);
    }

    let mut files = FileTargets::default();
    let mut spawn = cfg.run_options().spawn;
    for path in &args.tee_stdout {
        spawn = spawn.tee_stdout(files.get(path));
    }
    for path in &args.tee_stderr {
        spawn = spawn.tee_stderr(files.get(path));
    }
    for path in &args.tee_prompt {
        spawn = spawn.tee_prompt(files.get(path));
    }

    let mut options = cfg
        .run_options()
        .spawn(spawn)
        .stdout(Redirect::Inherit)
        .stderr(Redirect::Inherit);
    if let Some(secs) = args.timeout {
        options = options.timeout(seconds("--timeout", secs)?);
    }
    if let Some(secs) = args.grace {
        options = options.sigterm_timeout(seconds("--grace", secs)?);
    }
    if args.check {
        options = options.check();
    }

    let command = if args.shell {
        CommandLine::Shell(args.command.join(" "))
    } else {
        CommandLine::Argv(args.command.clone())
    };
    debug!(%command, "running from command line");

    match run(command, options).await {
        Ok(done) => Ok(exit_status(done.exit_code)),
        Err(err @ ExecError::Timeout { .. }) => {
            error!("{err}");
            Ok(TIMEOUT_EXIT_CODE)
        }
        Err(ExecError::Failed { command, code, .. }) => {
            error!(%command, code, "command failed");
            Ok(exit_status(code))
        }
        Err(err) => Err(err.into()),
    }
}

/// The explicit `--config`, else `Teeproc.toml` if it exists, else defaults.
fn load_cli_config(args: &CliArgs) -> Result<ConfigFile> {
    if let Some(path) = &args.config {
        return load_and_validate(path)
            .with_context(|| format!("loading config {}", path.display()));
    }
    let path = default_config_path();
    if path.exists() {
        return load_and_validate(&path)
            .with_context(|| format!("loading config {}", path.display()));
    }
    Ok(ConfigFile::try_from(RawConfigFile::default())?)
}

fn seconds(flag: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .with_context(|| format!("{flag} must be a non-negative number of seconds"))
}

/// Shell-style status: signals map to 128 + signal number.
fn exit_status(code: i32) -> i32 {
    if code < 0 { 128 - code } else { code }
}
