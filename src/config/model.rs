// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::exec::SpawnOptions;
use crate::runner::{DEFAULT_SIGTERM_TIMEOUT, RunOptions};

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [defaults]
/// echo = true
/// sigterm_timeout = 5.0
/// shell = "/bin/bash"
///
/// [tees]
/// stdout = ["logs/session.log"]
/// stderr = ["logs/session.log"]
/// prompt = ["logs/session.log"]
/// log_lines = false
/// ```
///
/// All sections are optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub defaults: DefaultsSection,

    #[serde(default)]
    pub tees: TeesSection,
}

/// `[defaults]` section: per-run defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultsSection {
    /// Echo the command line and mirror its output on the terminal.
    #[serde(default)]
    pub echo: bool,

    /// Seconds between SIGTERM and SIGKILL when a run times out.
    #[serde(default = "default_sigterm_timeout")]
    pub sigterm_timeout: f64,

    /// Shell used for shell-mode commands. `/bin/sh` when unset.
    #[serde(default)]
    pub shell: Option<String>,
}

fn default_sigterm_timeout() -> f64 {
    DEFAULT_SIGTERM_TIMEOUT.as_secs_f64()
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            echo: false,
            sigterm_timeout: default_sigterm_timeout(),
            shell: None,
        }
    }
}

/// `[tees]` section: files every run mirrors into.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TeesSection {
    #[serde(default)]
    pub stdout: Vec<PathBuf>,

    #[serde(default)]
    pub stderr: Vec<PathBuf>,

    #[serde(default)]
    pub prompt: Vec<PathBuf>,

    /// Also forward every stdout/stderr line to the log.
    #[serde(default)]
    pub log_lines: bool,
}

/// Validated configuration. Built from [`RawConfigFile`] via `TryFrom`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub defaults: DefaultsSection,
    pub tees: TeesSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(defaults: DefaultsSection, tees: TeesSection) -> Self {
        Self { defaults, tees }
    }

    pub fn sigterm_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.defaults.sigterm_timeout)
    }

    /// `RunOptions` seeded with the configured shell and grace period. Echo
    /// and sinks come from the registry, see `apply_globals`.
    pub fn run_options(&self) -> RunOptions {
        let mut spawn = SpawnOptions::new();
        if let Some(shell) = &self.defaults.shell {
            spawn = spawn.shell(shell);
        }
        RunOptions::new()
            .spawn(spawn)
            .sigterm_timeout(self.sigterm_timeout())
    }
}
