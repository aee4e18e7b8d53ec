// src/exec/prompt.rs

//! Prompt echo: a synthetic interactive-shell trace line (`$ cmd args`)
//! written to the prompt sinks right before a process starts.
//!
//! The prompt strings are discovered once per process. When `bash` supports
//! `${var@P}` expansion, the user's own `PS1`/`PS2` are used and expanded at
//! every call (so time or cwd escapes render live); otherwise the fixed
//! `"$ "` / `"> "` pair is used.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::debug;

use super::fanout::{OutputRoute, StreamFanout, clear_cloexec, tee_args};
use crate::errors::{ExecError, Result};
use crate::sink::{FdSet, STDERR_FD, STDOUT_FD};

pub const FALLBACK_PS1: &str = "$ ";
pub const FALLBACK_PS2: &str = "> ";

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Prompts {
    Bash { ps1: String, ps2: String },
    Fixed,
}

static PROMPTS: OnceCell<Prompts> = OnceCell::const_new();

async fn prompts() -> &'static Prompts {
    PROMPTS.get_or_init(discover).await
}

async fn discover() -> Prompts {
    match tokio::time::timeout(DISCOVERY_TIMEOUT, discover_bash()).await {
        Ok(Some((ps1, ps2))) => {
            debug!(%ps1, %ps2, "using bash prompt strings");
            Prompts::Bash { ps1, ps2 }
        }
        _ => {
            debug!("bash prompt expansion unavailable; using fixed prompts");
            Prompts::Fixed
        }
    }
}

async fn discover_bash() -> Option<(String, String)> {
    let expands = Command::new("bash")
        .args(["-c", "echo ${0@P}"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .ok()?
        .success();
    if !expands {
        return None;
    }

    let output = Command::new("bash")
        .args(["-ic", r#"echo "$PS1"; echo "$PS2""#])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .ok()?;

    let text = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = text.lines().collect();
    match lines.as_slice() {
        [.., ps1, ps2] => Some((ps1.to_string(), ps2.to_string())),
        _ => None,
    }
}

/// Join tokens into one line that a POSIX shell would split back into the
/// same tokens.
pub fn quote<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| quote_token(arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_token(token: &str) -> String {
    match shlex::try_quote(token) {
        Ok(quoted) => quoted.into_owned(),
        // Only NUL bytes are unquotable; a shell could not receive them anyway.
        Err(_) => shlex::try_quote(&token.replace('\0', ""))
            .map(Cow::into_owned)
            .unwrap_or_default(),
    }
}

/// The command as it would be typed, plus ` 2>&1` when stderr is merged into
/// stdout and ` # comment` when a comment is given.
pub fn shellify(command: &str, err2out: bool, comment: Option<&str>) -> String {
    let mut line = command.to_string();
    if err2out {
        line.push_str(" 2>&1");
    }
    if let Some(comment) = comment.filter(|c| !c.is_empty()) {
        line.push_str(" # ");
        line.push_str(comment);
    }
    line
}

/// Prefix the first line with `ps1` and every further line with `ps2`.
pub fn render(line: &str, ps1: &str, ps2: &str) -> String {
    let body = line.strip_suffix('\n').unwrap_or(line);
    let mut out = String::with_capacity(body.len() + ps1.len() + 1);
    for (i, part) in body.split('\n').enumerate() {
        out.push_str(if i == 0 { ps1 } else { ps2 });
        out.push_str(part);
        out.push('\n');
    }
    out
}

/// What gets echoed and where the prompt helper runs.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub cwd: Option<&'a Path>,
    pub env: &'a BTreeMap<String, String>,
    pub err2out: bool,
    pub comment: Option<&'a str>,
}

/// Write the prompt line for `command` into every fd of `fds` and wait until
/// all of them received it.
pub async fn emit(fds: &FdSet, command: &str, ctx: PromptContext<'_>) -> Result<()> {
    if fds.is_empty() {
        return Ok(());
    }
    let line = shellify(command, ctx.err2out, ctx.comment);

    match prompts().await {
        Prompts::Fixed => {
            let text = render(&line, FALLBACK_PS1, FALLBACK_PS2);
            let mut fanout = StreamFanout::spawn(Stdio::piped(), fds, OutputRoute::Null)?;
            fanout.feed(text.as_bytes()).await
        }
        Prompts::Bash { ps1, ps2 } => emit_with_bash(fds, &line, ps1, ps2, ctx).await,
    }
}

async fn emit_with_bash(
    fds: &FdSet,
    line: &str,
    ps1: &str,
    ps2: &str,
    ctx: PromptContext<'_>,
) -> Result<()> {
    let files: FdSet = fds.iter().copied().filter(|fd| *fd != STDOUT_FD).collect();
    let script = format!(
        "(\n    IFS= read -r line\n    echo \"${{CPS1@P}}${{line}}\"\n    while IFS= read -r line; do\n        echo \"${{CPS2@P}}${{line}}\"\n    done\n) | {}",
        quote(&tee_args(&files))
    );
    let inherited: Vec<_> = files.iter().copied().filter(|fd| *fd > STDERR_FD).collect();

    let mut cmd = Command::new("bash");
    cmd.arg("-c")
        .arg(script)
        .env("CPS1", ps1)
        .env("CPS2", ps2)
        .envs(ctx.env)
        .stdin(Stdio::piped())
        .stdout(if fds.contains(&STDOUT_FD) { Stdio::inherit() } else { Stdio::null() })
        .stderr(if fds.contains(&STDERR_FD) { Stdio::inherit() } else { Stdio::null() })
        .kill_on_drop(true);
    if let Some(cwd) = ctx.cwd {
        cmd.current_dir(cwd);
    }
    // SAFETY: the closure only calls fcntl(2), which is async-signal-safe.
    unsafe {
        cmd.pre_exec(move || clear_cloexec(&inherited));
    }

    let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
        program: "bash".to_string(),
        source,
    })?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.shutdown().await?;
    }
    let status = child.wait().await?;
    if !status.success() {
        return Err(ExecError::Helper {
            helper: "prompt",
            code: status.code().unwrap_or(-1),
        });
    }
    Ok(())
}
