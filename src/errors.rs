// src/errors.rs

//! Crate-wide error type and result alias.

use std::time::Duration;

use thiserror::Error;

use crate::exec::Captured;

#[derive(Error, Debug)]
pub enum ExecError {
    /// Inconsistent options (e.g. tee-ing a stream that is merged into the
    /// other one). Never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("cannot send input after starting communication")]
    InputAfterCommunication,

    #[error("{0} stream is no longer readable")]
    StreamClosed(&'static str),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command '{command}' timed out after {:.3}s", elapsed.as_secs_f64())]
    Timeout { command: String, elapsed: Duration },

    #[error("command '{command}' returned non-zero exit status {code}")]
    Failed {
        command: String,
        code: i32,
        stdout: Option<Captured>,
        stderr: Option<Captured>,
    },

    /// A helper process (`tee`, the prompt script) exited unsuccessfully.
    #[error("helper '{helper}' exited with status {code}")]
    Helper { helper: &'static str, code: i32 },

    #[error("output is not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ExecError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout { .. })
    }

    /// Exit code carried by a [`ExecError::Failed`] error.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::Failed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecError>;
