// src/exec/fanout.rs

//! Real-time duplication of one byte stream into several descriptors.
//!
//! Duplication is done by a sibling `tee` process rather than a task in this
//! process: every target is drained by the OS independently, and a slow sink
//! only ever stalls `tee`, never the caller.
//!
//! Descriptor conventions:
//! - fd 1 / fd 2 in the target set mean the real stdout / stderr of this
//!   process. `tee` inherits them as its own stdout / stderr.
//! - If fd 1 is a target, `tee`'s stdout *is* that target, so fd 1 is dropped
//!   from the argument list. A captured copy is then routed through `tee`'s
//!   stderr and reached as `/dev/fd/2`.
//! - Any other fd is inherited by clearing `FD_CLOEXEC` between fork and exec
//!   and is opened by `tee` as `/dev/fd/N`.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::RawFd;
use std::process::{ExitStatus, Stdio};
use std::sync::OnceLock;

use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tracing::debug;

use crate::errors::{ExecError, Result};
use crate::sink::{FdSet, STDERR_FD, STDOUT_FD};

/// Readable end of a captured stream.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Where the helper sends its own copy of the stream.
#[derive(Debug, Default)]
pub enum OutputRoute {
    #[default]
    Null,
    Pipe,
    File(File),
}

impl OutputRoute {
    fn is_null(&self) -> bool {
        matches!(self, OutputRoute::Null)
    }

    fn into_stdio(self) -> Stdio {
        match self {
            OutputRoute::Null => Stdio::null(),
            OutputRoute::Pipe => Stdio::piped(),
            OutputRoute::File(file) => Stdio::from(file),
        }
    }
}

pub struct StreamFanout {
    child: Child,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    output: Option<BoxedReader>,
}

impl std::fmt::Debug for StreamFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamFanout")
            .field("pid", &self.pid)
            .field("captured", &self.output.is_some())
            .finish()
    }
}

impl StreamFanout {
    /// Spawn a helper copying `source` into every fd of `targets`, plus the
    /// output `route`.
    pub fn spawn(source: Stdio, targets: &FdSet, route: OutputRoute) -> Result<Self> {
        if targets.is_empty() {
            return Err(ExecError::Config(
                "a fanout needs at least one target descriptor".to_string(),
            ));
        }

        let mut fds = targets.clone();
        let wants_output = !route.is_null();
        let output_on_stderr = fds.contains(&STDOUT_FD);

        let (stdout, stderr) = if output_on_stderr {
            let stderr = if wants_output {
                if fds.contains(&STDERR_FD) {
                    return Err(ExecError::Config(
                        "cannot tee to both the real stdout and the real stderr while capturing"
                            .to_string(),
                    ));
                }
                fds.insert(STDERR_FD);
                route.into_stdio()
            } else if fds.contains(&STDERR_FD) {
                Stdio::inherit()
            } else {
                Stdio::null()
            };
            (Stdio::inherit(), stderr)
        } else if fds.contains(&STDERR_FD) {
            (route.into_stdio(), Stdio::inherit())
        } else {
            (route.into_stdio(), Stdio::null())
        };

        fds.remove(&STDOUT_FD);
        let inherited: Vec<RawFd> = fds.iter().copied().filter(|fd| *fd > STDERR_FD).collect();

        let mut cmd = helper_command(&fds);
        cmd.stdin(source).stdout(stdout).stderr(stderr).kill_on_drop(true);
        // SAFETY: the closure only calls fcntl(2), which is async-signal-safe.
        unsafe {
            cmd.pre_exec(move || clear_cloexec(&inherited));
        }

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: "tee".to_string(),
            source,
        })?;
        let pid = child.id();

        let output = if output_on_stderr {
            child.stderr.take().map(|r| Box::new(r) as BoxedReader)
        } else {
            child.stdout.take().map(|r| Box::new(r) as BoxedReader)
        };

        debug!(?pid, targets = ?targets, captured = output.is_some(), "fanout helper started");

        Ok(Self {
            pid,
            stdin: child.stdin.take(),
            output,
            child,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// The duplicated stream, if the route was a pipe. Can be taken once.
    pub fn take_output(&mut self) -> Option<BoxedReader> {
        self.output.take()
    }

    /// Write `data` into a helper spawned with a piped source, close its input
    /// and wait until every target received it.
    pub async fn feed(&mut self, data: &[u8]) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.write_all(data).await?;
            stdin.shutdown().await?;
        }
        let status = self.wait().await?;
        if !status.success() {
            return Err(ExecError::Helper {
                helper: "tee",
                code: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }

    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    pub fn start_kill(&mut self) {
        if let Err(err) = self.child.start_kill() {
            debug!(pid = ?self.pid, error = %err, "fanout helper already gone");
        }
    }
}

/// `tee -a /dev/fd/N ...`, or a bash process substitution when fd 2 is a
/// target but `/dev/fd/2` cannot be opened for writing.
fn helper_command(fds: &FdSet) -> Command {
    if fds.contains(&STDERR_FD) && !stderr_dev_fd_writable() {
        let others: FdSet = fds.iter().copied().filter(|fd| *fd != STDERR_FD).collect();
        let script = format!("{} >(cat >&2)", super::prompt::quote(&tee_args(&others)));
        debug!(%script, "using process substitution for stderr fanout");
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(script);
        cmd
    } else {
        let args = tee_args(fds);
        let mut cmd = Command::new(&args[0]);
        cmd.args(&args[1..]);
        cmd
    }
}

/// Argument vector of the duplication helper for `fds`.
pub fn tee_args(fds: &FdSet) -> Vec<String> {
    let mut args = vec!["tee".to_string(), "-a".to_string()];
    args.extend(fds.iter().map(|fd| format!("/dev/fd/{fd}")));
    args
}

fn stderr_dev_fd_writable() -> bool {
    static WRITABLE: OnceLock<bool> = OnceLock::new();
    *WRITABLE.get_or_init(|| {
        OpenOptions::new()
            .append(true)
            .open(format!("/dev/fd/{STDERR_FD}"))
            .is_ok()
    })
}

/// Make `fds` survive `exec` in the child. Runs between fork and exec.
pub(crate) fn clear_cloexec(fds: &[RawFd]) -> io::Result<()> {
    for &fd in fds {
        // SAFETY: F_SETFD on a descriptor number has no memory-safety impact.
        if unsafe { libc::fcntl(fd, libc::F_SETFD, 0) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
