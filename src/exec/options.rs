// src/exec/options.rs

//! Command lines, stream destinations and spawn options.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use crate::sink::TeeTarget;

const DEFAULT_SHELL: &str = "/bin/sh";

/// What to execute: an argument vector, or a script handed to a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    Argv(Vec<String>),
    Shell(String),
}

impl CommandLine {
    pub fn argv<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandLine::Argv(args.into_iter().map(Into::into).collect())
    }

    pub fn shell(script: impl Into<String>) -> Self {
        CommandLine::Shell(script.into())
    }

    /// Program name used in logs and spawn errors.
    pub fn program(&self) -> &str {
        match self {
            CommandLine::Argv(args) => args.first().map(String::as_str).unwrap_or(""),
            CommandLine::Shell(script) => script,
        }
    }

    /// Shell form of the command: argv tokens are quoted, scripts are kept.
    pub fn to_shell_string(&self) -> String {
        match self {
            CommandLine::Argv(args) => super::prompt::quote(args),
            CommandLine::Shell(script) => script.clone(),
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell_string())
    }
}

impl From<&str> for CommandLine {
    fn from(script: &str) -> Self {
        CommandLine::Shell(script.to_string())
    }
}

impl From<String> for CommandLine {
    fn from(script: String) -> Self {
        CommandLine::Shell(script)
    }
}

impl From<Vec<String>> for CommandLine {
    fn from(args: Vec<String>) -> Self {
        CommandLine::Argv(args)
    }
}

impl From<Vec<&str>> for CommandLine {
    fn from(args: Vec<&str>) -> Self {
        CommandLine::argv(args)
    }
}

impl<const N: usize> From<[&str; N]> for CommandLine {
    fn from(args: [&str; N]) -> Self {
        CommandLine::argv(args)
    }
}

/// Destination of the child's stdout or stderr.
#[derive(Debug, Clone, Default)]
pub enum Redirect {
    /// Share this process' stream.
    #[default]
    Inherit,
    /// Drop everything.
    Discard,
    /// OS pipe read by the caller or by `communicate`.
    Pipe,
    /// Only valid for stderr: send it wherever stdout goes.
    MergeIntoStdout,
    /// Growable temp file owned by the process, read back after exit.
    AutoCapture,
    /// Caller-provided file.
    File(Arc<File>),
}

impl Redirect {
    pub fn file(file: File) -> Self {
        Redirect::File(Arc::new(file))
    }

    pub(crate) fn is_inherit(&self) -> bool {
        matches!(self, Redirect::Inherit)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StdinSource {
    #[default]
    Inherit,
    Null,
    Pipe,
}

/// How captured bytes are returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    #[default]
    Binary,
    /// UTF-8, invalid data is an error.
    Text,
    /// UTF-8, invalid sequences replaced by U+FFFD.
    TextLossy,
}

/// Everything needed to spawn a [`super::ManagedProcess`].
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub cwd: Option<PathBuf>,
    /// Variables added on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    pub mode: OutputMode,
    pub stdin: StdinSource,
    pub stdout: Redirect,
    pub stderr: Redirect,
    pub stdout_tees: Vec<TeeTarget>,
    pub stderr_tees: Vec<TeeTarget>,
    pub prompt_tees: Vec<TeeTarget>,
    pub add_global_stdout_tees: bool,
    pub add_global_stderr_tees: bool,
    pub add_global_prompt_tees: bool,
    /// `None` defers to the global echo flag.
    pub echo: Option<bool>,
    /// Shown in the prompt line instead of the real command.
    pub alias: Option<String>,
    pub comment: Option<String>,
    /// Shell used for [`CommandLine::Shell`]; `/bin/sh` when unset.
    pub shell: Option<PathBuf>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            env: BTreeMap::new(),
            mode: OutputMode::Binary,
            stdin: StdinSource::Inherit,
            stdout: Redirect::Inherit,
            stderr: Redirect::Inherit,
            stdout_tees: Vec::new(),
            stderr_tees: Vec::new(),
            prompt_tees: Vec::new(),
            add_global_stdout_tees: true,
            add_global_stderr_tees: true,
            add_global_prompt_tees: true,
            echo: None,
            alias: None,
            comment: None,
            shell: None,
        }
    }
}

impl SpawnOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn text(self) -> Self {
        self.mode(OutputMode::Text)
    }

    pub fn stdin(mut self, stdin: StdinSource) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn stdout(mut self, stdout: Redirect) -> Self {
        self.stdout = stdout;
        self
    }

    pub fn stderr(mut self, stderr: Redirect) -> Self {
        self.stderr = stderr;
        self
    }

    pub fn tee_stdout(mut self, target: TeeTarget) -> Self {
        self.stdout_tees.push(target);
        self
    }

    pub fn tee_stderr(mut self, target: TeeTarget) -> Self {
        self.stderr_tees.push(target);
        self
    }

    pub fn tee_prompt(mut self, target: TeeTarget) -> Self {
        self.prompt_tees.push(target);
        self
    }

    /// Ignore the globally registered sinks for all three streams.
    pub fn without_global_tees(mut self) -> Self {
        self.add_global_stdout_tees = false;
        self.add_global_stderr_tees = false;
        self.add_global_prompt_tees = false;
        self
    }

    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = Some(echo);
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    pub(crate) fn shell_program(&self) -> PathBuf {
        self.shell
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SHELL))
    }
}
