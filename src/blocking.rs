// src/blocking.rs

//! Synchronous versions of the [`crate::runner`] functions.
//!
//! Each call drives the async implementation on its own current-thread
//! runtime, so these must not be called from inside a tokio runtime.

use std::future::Future;

use crate::errors::Result;
use crate::exec::{Captured, CommandLine};
use crate::runner::{self, CompletedExecution, RunOptions};

fn block_on<F: Future<Output = Result<T>>, T>(fut: F) -> Result<T> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(fut)
}

pub fn run(command: impl Into<CommandLine>, options: RunOptions) -> Result<CompletedExecution> {
    block_on(runner::run(command, options))
}

pub fn call(command: impl Into<CommandLine>, options: RunOptions) -> Result<i32> {
    block_on(runner::call(command, options))
}

pub fn check_call(command: impl Into<CommandLine>, options: RunOptions) -> Result<i32> {
    block_on(runner::check_call(command, options))
}

pub fn check_output(command: impl Into<CommandLine>, options: RunOptions) -> Result<Captured> {
    block_on(runner::check_output(command, options))
}

pub fn get_status_output(command: impl Into<String>, options: RunOptions) -> Result<(i32, String)> {
    block_on(runner::get_status_output(command, options))
}

pub fn get_output(command: impl Into<String>, options: RunOptions) -> Result<String> {
    block_on(runner::get_output(command, options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Redirect;

    #[test]
    fn blocking_run_captures_output() {
        let done = run(["echo", "Hello!"], RunOptions::new().echo(false)).unwrap();
        assert_eq!(done.exit_code, 0);
        assert_eq!(done.stdout_text(), "Hello!\n");
        assert_eq!(done.stderr_text(), "");
    }

    #[test]
    fn blocking_status_output_merges_streams() {
        let (code, out) = get_status_output(
            "echo out; echo err >&2; exit 3",
            RunOptions::new().echo(false),
        )
        .unwrap();
        assert_eq!(code, 3);
        assert_eq!(out, "out\nerr\n");
    }

    #[test]
    fn blocking_check_output_fails_on_non_zero() {
        let err = check_output(
            ["sh", "-c", "echo partial; exit 1"],
            RunOptions::new().echo(false).stderr(Redirect::Discard),
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), Some(1));
    }
}
