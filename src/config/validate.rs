// src/config/validate.rs

use tracing::Level;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{ExecError, Result};
use crate::registry;
use crate::sink::{FileTargets, LineSink, TeeTarget};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = ExecError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.defaults, raw.tees))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_defaults(cfg)?;
    validate_tee_paths(cfg)?;
    Ok(())
}

fn validate_defaults(cfg: &RawConfigFile) -> Result<()> {
    let grace = cfg.defaults.sigterm_timeout;
    if !grace.is_finite() || grace < 0.0 {
        return Err(ExecError::Config(format!(
            "[defaults].sigterm_timeout must be a non-negative number of seconds (got {grace})"
        )));
    }

    if let Some(shell) = &cfg.defaults.shell {
        if shell.trim().is_empty() {
            return Err(ExecError::Config(
                "[defaults].shell must not be empty".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_tee_paths(cfg: &RawConfigFile) -> Result<()> {
    let sections = [
        ("stdout", &cfg.tees.stdout),
        ("stderr", &cfg.tees.stderr),
        ("prompt", &cfg.tees.prompt),
    ];
    for (name, paths) in sections {
        if paths.iter().any(|p| p.as_os_str().is_empty()) {
            return Err(ExecError::Config(format!(
                "[tees].{name} contains an empty path"
            )));
        }
    }
    Ok(())
}

impl ConfigFile {
    /// Install echo and the configured sinks as process-wide defaults.
    ///
    /// The same path listed in several sets is opened once per spawn and
    /// shared.
    pub fn apply_globals(&self) {
        let mut files = FileTargets::default();

        let mut stdout: Vec<TeeTarget> = self.tees.stdout.iter().map(|p| files.get(p)).collect();
        let mut stderr: Vec<TeeTarget> = self.tees.stderr.iter().map(|p| files.get(p)).collect();
        let prompt: Vec<TeeTarget> = self.tees.prompt.iter().map(|p| files.get(p)).collect();

        if self.tees.log_lines {
            stdout.push(LineSink::target("stdout", Level::INFO));
            stderr.push(LineSink::target("stderr", Level::WARN));
        }

        registry::set_global_echo(self.defaults.echo);
        registry::set_global_stdout_tees(stdout);
        registry::set_global_stderr_tees(stderr);
        registry::set_global_prompt_tees(prompt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_from_str;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = ConfigFile::try_from(load_from_str("").unwrap()).unwrap();
        assert!(!cfg.defaults.echo);
        assert_eq!(cfg.sigterm_timeout().as_secs(), 10);
        assert!(cfg.tees.stdout.is_empty());
    }

    #[test]
    fn negative_grace_is_rejected() {
        let raw = load_from_str("[defaults]\nsigterm_timeout = -1.0\n").unwrap();
        let err = ConfigFile::try_from(raw).unwrap_err();
        assert!(matches!(err, ExecError::Config(_)));
    }

    #[test]
    fn empty_tee_path_is_rejected() {
        let raw = load_from_str("[tees]\nprompt = [\"\"]\n").unwrap();
        assert!(ConfigFile::try_from(raw).is_err());
    }

    #[test]
    fn unknown_keys_fail_to_parse() {
        let err = load_from_str("[defaults]\nechoo = true\n").unwrap_err();
        assert!(matches!(err, ExecError::Toml(_)));
    }
}
