// src/runner.rs

//! High-level "run and wait" API on top of [`ManagedProcess`].
//!
//! `run` spawns, feeds input, waits for completion or timeout and always
//! leaves the process tree cleaned up before returning. The other functions
//! are fixed option combinations over `run`.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::errors::{ExecError, Result};
use crate::exec::tree;
use crate::exec::{
    Captured, CommandLine, ManagedProcess, OutputMode, Redirect, SpawnOptions, StdinSource,
};

pub const DEFAULT_SIGTERM_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum time given to the tree to vanish after it was terminated.
const REAP_TIMEOUT: Duration = Duration::from_secs(1);

/// Options of [`run`]. The stdio fields here take precedence over the ones in
/// `spawn`, which are replaced after normalization.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub spawn: SpawnOptions,
    pub stdin: Option<StdinSource>,
    pub stdout: Option<Redirect>,
    pub stderr: Option<Redirect>,
    pub input: Option<Vec<u8>>,
    pub capture_output: bool,
    pub timeout: Option<Duration>,
    /// Time between SIGTERM and SIGKILL when the timeout expires.
    pub sigterm_timeout: Duration,
    pub check: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            spawn: SpawnOptions::default(),
            stdin: None,
            stdout: None,
            stderr: None,
            input: None,
            capture_output: false,
            timeout: None,
            sigterm_timeout: DEFAULT_SIGTERM_TIMEOUT,
            check: false,
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(mut self, spawn: SpawnOptions) -> Self {
        self.spawn = spawn;
        self
    }

    pub fn stdin(mut self, stdin: StdinSource) -> Self {
        self.stdin = Some(stdin);
        self
    }

    pub fn stdout(mut self, stdout: Redirect) -> Self {
        self.stdout = Some(stdout);
        self
    }

    pub fn stderr(mut self, stderr: Redirect) -> Self {
        self.stderr = Some(stderr);
        self
    }

    pub fn input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn capture_output(mut self) -> Self {
        self.capture_output = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn sigterm_timeout(mut self, grace: Duration) -> Self {
        self.sigterm_timeout = grace;
        self
    }

    pub fn check(mut self) -> Self {
        self.check = true;
        self
    }

    pub fn text(mut self) -> Self {
        self.spawn.mode = OutputMode::Text;
        self
    }

    pub fn echo(mut self, echo: bool) -> Self {
        self.spawn.echo = Some(echo);
        self
    }

    /// The `SpawnOptions` actually used: capture defaults, stdin pipe for
    /// input, and the timeout comment on the trace line.
    pub fn normalize(&self) -> Result<SpawnOptions> {
        let mut spawn = self.spawn.clone();

        if self.input.is_some() && self.stdin.is_some() {
            return Err(ExecError::Config(
                "stdin and input may not both be used".to_string(),
            ));
        }
        if self.capture_output && (self.stdout.is_some() || self.stderr.is_some()) {
            return Err(ExecError::Config(
                "stdout and stderr may not be used with capture_output".to_string(),
            ));
        }

        spawn.stdin = match (&self.input, self.stdin) {
            (Some(_), _) => StdinSource::Pipe,
            (None, Some(stdin)) => stdin,
            (None, None) => StdinSource::Inherit,
        };

        let (stdout, stderr) = match (&self.stdout, &self.stderr) {
            (None, None) => (Redirect::AutoCapture, Redirect::AutoCapture),
            (stdout, stderr) => (
                stdout.clone().unwrap_or_default(),
                stderr.clone().unwrap_or_default(),
            ),
        };
        spawn.stdout = stdout;
        spawn.stderr = stderr;

        if spawn.comment.is_none() {
            spawn.comment = self
                .timeout
                .map(|t| format!("timeout={}", t.as_secs_f64()));
        }
        Ok(spawn)
    }
}

/// Result of a finished [`run`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedExecution {
    pub command: CommandLine,
    pub exit_code: i32,
    pub stdout: Option<Captured>,
    pub stderr: Option<Captured>,
    /// From the OS-reported creation of the process to its completion.
    pub duration: Duration,
}

impl CompletedExecution {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_text(&self) -> String {
        self.stdout.as_ref().map(Captured::to_text).unwrap_or_default()
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.as_ref().map(Captured::to_text).unwrap_or_default()
    }
}

/// Run `command` to completion.
///
/// On timeout the process tree is terminated (SIGTERM, then SIGKILL after
/// `sigterm_timeout`) before [`ExecError::Timeout`] is returned. On any other
/// error the tree is killed first.
pub async fn run(
    command: impl Into<CommandLine>,
    options: RunOptions,
) -> Result<CompletedExecution> {
    let command = command.into();
    let spawn = options.normalize()?;
    let mut process = ManagedProcess::spawn(command.clone(), spawn).await?;

    let outcome = process
        .communicate(options.input.as_deref(), options.timeout)
        .await;
    let finished_at = Instant::now();

    let (stdout, stderr) = match outcome {
        Ok(output) => output,
        Err(err) if err.is_timeout() => {
            warn!(pid = ?process.pid(), command = %command, "timed out; terminating process tree");
            tree::terminate_tree(&mut process, options.sigterm_timeout).await;
            reap(&mut process, options.sigterm_timeout.max(REAP_TIMEOUT)).await;
            return Err(ExecError::Timeout {
                command: command.to_string(),
                elapsed: finished_at.saturating_duration_since(process.created_at()),
            });
        }
        Err(err) => {
            debug!(pid = ?process.pid(), error = %err, "communication failed; killing process tree");
            tree::kill_tree(&mut process).await;
            reap(&mut process, REAP_TIMEOUT).await;
            return Err(err);
        }
    };

    let exit_code = process.wait(None).await?;
    let duration = finished_at.saturating_duration_since(process.created_at());
    info!(command = %command, exit_code, ?duration, "run finished");

    if options.check && exit_code != 0 {
        return Err(ExecError::Failed {
            command: command.to_string(),
            code: exit_code,
            stdout,
            stderr,
        });
    }

    Ok(CompletedExecution {
        command,
        exit_code,
        stdout,
        stderr,
        duration,
    })
}

/// Wait for the group after termination; helpers kept alive by an escaped
/// descendant are killed.
async fn reap(process: &mut ManagedProcess, timeout: Duration) {
    if process.wait(Some(timeout)).await.is_ok() {
        return;
    }
    process.kill_fanouts();
    if let Err(err) = process.wait(Some(timeout)).await {
        debug!(pid = ?process.pid(), error = %err, "process group not reaped");
    }
}

/// Run and return the exit code.
pub async fn call(command: impl Into<CommandLine>, options: RunOptions) -> Result<i32> {
    Ok(run(command, options).await?.exit_code)
}

/// Like [`call`], but a non-zero exit code is an [`ExecError::Failed`].
pub async fn check_call(command: impl Into<CommandLine>, options: RunOptions) -> Result<i32> {
    call(command, options.check()).await
}

/// Run with `check` and return stdout, piped unless another destination is
/// set.
pub async fn check_output(
    command: impl Into<CommandLine>,
    mut options: RunOptions,
) -> Result<Captured> {
    if options.stdout.is_none() && !options.capture_output {
        options.stdout = Some(Redirect::Pipe);
    }
    let mode = options.spawn.mode;
    let done = run(command, options.check()).await?;
    Ok(done.stdout.unwrap_or_else(|| empty(mode)))
}

/// Run a shell command in text mode with stderr merged into stdout; returns
/// the exit code and the combined output.
pub async fn get_status_output(
    command: impl Into<String>,
    mut options: RunOptions,
) -> Result<(i32, String)> {
    options.capture_output = false;
    options.stdout = Some(Redirect::Pipe);
    options.stderr = Some(Redirect::MergeIntoStdout);
    let done = run(CommandLine::Shell(command.into()), options.text()).await?;
    let output = done.stdout_text();
    Ok((done.exit_code, output))
}

/// [`get_status_output`] without the exit code.
pub async fn get_output(command: impl Into<String>, options: RunOptions) -> Result<String> {
    Ok(get_status_output(command, options).await?.1)
}

fn empty(mode: OutputMode) -> Captured {
    match mode {
        OutputMode::Binary => Captured::Bytes(Vec::new()),
        OutputMode::Text | OutputMode::TextLossy => Captured::Text(String::new()),
    }
}
