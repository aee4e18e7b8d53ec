// src/exec/process.rs

//! A spawned command plus the fanout helpers mirroring its streams.
//!
//! `ManagedProcess` composes a `tokio::process::Child` with zero, one or two
//! [`StreamFanout`]s. `poll`, `wait` and `communicate` treat the group as one
//! unit: the process only counts as finished once every mirrored byte has
//! been flushed by its helpers.

use std::fmt;
use std::future::Future;
use std::io::{self, PipeReader};
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::capture::{AutoCapture, Captured};
use super::fanout::{BoxedReader, OutputRoute, StreamFanout};
use super::options::{CommandLine, OutputMode, Redirect, SpawnOptions, StdinSource};
use super::procfs;
use super::prompt::{self, PromptContext};
use super::tree;
use crate::errors::{ExecError, Result};
use crate::registry;
use crate::sink::{self, FdSet, ResolvedSinks, Sink};

/// Captured `(stdout, stderr)`; `None` for streams that were not captured.
pub type Communicated = (Option<Captured>, Option<Captured>);

pub struct ManagedProcess {
    command: CommandLine,
    child: Child,
    pid: Option<u32>,
    created_at: Instant,
    mode: OutputMode,
    stdin: Option<ChildStdin>,
    stdout: Option<BoxedReader>,
    stderr: Option<BoxedReader>,
    stdout_fanout: Option<StreamFanout>,
    stderr_fanout: Option<StreamFanout>,
    stdout_capture: Option<AutoCapture>,
    stderr_capture: Option<AutoCapture>,
    io: Option<IoTasks>,
    exit_code: Option<i32>,
    // Last field: dropped after the helpers were killed.
    sinks: OpenedSinks,
}

impl fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("command", &self.command)
            .field("pid", &self.pid)
            .field("stdout_fanout", &self.stdout_fanout)
            .field("stderr_fanout", &self.stderr_fanout)
            .field("exit_code", &self.exit_code)
            .finish_non_exhaustive()
    }
}

/// Sinks opened through factories; closed once drained, or on drop.
#[derive(Default)]
struct OpenedSinks(Vec<Box<dyn Sink>>);

impl OpenedSinks {
    fn close(&mut self) {
        sink::close_all(std::mem::take(&mut self.0));
    }
}

impl Drop for OpenedSinks {
    fn drop(&mut self) {
        self.close();
    }
}

/// Background work started by the first `communicate` call.
struct IoTasks {
    stdin: Option<JoinHandle<io::Result<()>>>,
    stdout: ReadTask,
    stderr: ReadTask,
}

impl Drop for IoTasks {
    fn drop(&mut self) {
        // Readers may be blocked on a pipe an escaped descendant still holds.
        if let Some(task) = &self.stdin {
            task.abort();
        }
        for task in [&self.stdout, &self.stderr] {
            if let ReadTask::Running(handle) = task {
                handle.abort();
            }
        }
    }
}

enum ReadTask {
    Idle,
    Running(JoinHandle<io::Result<Vec<u8>>>),
    Done(Vec<u8>),
}

impl ReadTask {
    fn start(reader: Option<BoxedReader>) -> Self {
        match reader {
            Some(mut reader) => ReadTask::Running(tokio::spawn(async move {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).await?;
                Ok(buf)
            })),
            None => ReadTask::Idle,
        }
    }

    /// Cancel-safe: an interrupted call leaves the task running.
    async fn finish(&mut self) -> Result<()> {
        if let ReadTask::Running(handle) = self {
            let buf = handle.await.map_err(io::Error::other)??;
            *self = ReadTask::Done(buf);
        }
        Ok(())
    }

    fn bytes(&self) -> Option<&[u8]> {
        match self {
            ReadTask::Done(buf) => Some(buf),
            _ => None,
        }
    }
}

/// One end of a child's output stream before spawn.
enum Endpoint {
    Inherit,
    Null,
    Fd(OwnedFd),
}

impl Endpoint {
    /// A second handle on the same destination, for `2>&1`.
    fn try_clone(&self) -> io::Result<Endpoint> {
        Ok(match self {
            Endpoint::Inherit => Endpoint::Fd(io::stdout().as_fd().try_clone_to_owned()?),
            Endpoint::Null => Endpoint::Null,
            Endpoint::Fd(fd) => Endpoint::Fd(fd.try_clone()?),
        })
    }

    fn into_stdio(self) -> Stdio {
        match self {
            Endpoint::Inherit => Stdio::inherit(),
            Endpoint::Null => Stdio::null(),
            Endpoint::Fd(fd) => Stdio::from(fd),
        }
    }
}

/// Decide where a stream of the child goes. A stream with sinks, or one the
/// caller wants to read, gets a pipe whose read end is returned.
fn endpoint(
    redirect: &Redirect,
    teed: bool,
    capture: Option<&AutoCapture>,
) -> Result<(Endpoint, Option<PipeReader>)> {
    if teed || matches!(redirect, Redirect::Pipe) {
        let (reader, writer) = io::pipe()?;
        return Ok((Endpoint::Fd(writer.into()), Some(reader)));
    }
    let end = match redirect {
        Redirect::Inherit => Endpoint::Inherit,
        Redirect::Discard => Endpoint::Null,
        Redirect::AutoCapture => match capture {
            Some(capture) => Endpoint::Fd(capture.writer()?.into()),
            None => Endpoint::Null,
        },
        Redirect::File(file) => Endpoint::Fd(file.try_clone()?.into()),
        Redirect::Pipe | Redirect::MergeIntoStdout => {
            return Err(ExecError::Config(
                "stdout cannot be merged into itself".to_string(),
            ));
        }
    };
    Ok((end, None))
}

/// Read end of a child stream: duplicated through a fanout when the stream
/// has sinks, read directly otherwise.
fn attach(
    reader: Option<PipeReader>,
    fds: &FdSet,
    redirect: &Redirect,
    capture: Option<&AutoCapture>,
) -> Result<(Option<BoxedReader>, Option<StreamFanout>)> {
    let Some(reader) = reader else {
        return Ok((None, None));
    };
    if fds.is_empty() {
        let receiver = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;
        return Ok((Some(Box::new(receiver)), None));
    }

    let route = match redirect {
        Redirect::Pipe => OutputRoute::Pipe,
        Redirect::AutoCapture => match capture {
            Some(capture) => OutputRoute::File(capture.writer()?),
            None => OutputRoute::Null,
        },
        Redirect::File(file) => OutputRoute::File(file.try_clone()?),
        Redirect::Inherit | Redirect::Discard => OutputRoute::Null,
        Redirect::MergeIntoStdout => {
            return Err(ExecError::Config(
                "cannot tee a stream that is merged into stdout".to_string(),
            ));
        }
    };
    let mut fanout = StreamFanout::spawn(Stdio::from(reader), fds, route)?;
    Ok((fanout.take_output(), Some(fanout)))
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| status.signal().map(|sig| -sig).unwrap_or(-1))
}

async fn with_deadline<F: Future>(deadline: Option<tokio::time::Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

fn deadline_after(timeout: Option<Duration>) -> Option<tokio::time::Instant> {
    timeout.map(|t| tokio::time::Instant::now() + t)
}

impl ManagedProcess {
    /// Spawn `command`, echoing the prompt line first and attaching a fanout
    /// to every stream that has sinks.
    pub async fn spawn(command: impl Into<CommandLine>, options: SpawnOptions) -> Result<Self> {
        let command = command.into();
        if matches!(options.stdout, Redirect::MergeIntoStdout) {
            return Err(ExecError::Config(
                "stdout cannot be merged into itself".to_string(),
            ));
        }
        if matches!(&command, CommandLine::Argv(args) if args.is_empty()) {
            return Err(ExecError::Config("empty command".to_string()));
        }

        let err2out = matches!(options.stderr, Redirect::MergeIntoStdout);
        let sets = registry::merge_tee_sets(&registry::snapshot(), &options);
        let mut resolved = ResolvedSinks::resolve(&sets.stdout, &sets.stderr, &sets.prompt)?;
        let sinks = OpenedSinks(resolved.take_opened());

        if !resolved.prompt.is_empty() {
            let shown = options
                .alias
                .clone()
                .unwrap_or_else(|| command.to_shell_string());
            let ctx = PromptContext {
                cwd: options.cwd.as_deref(),
                env: &options.env,
                err2out,
                comment: options.comment.as_deref(),
            };
            prompt::emit(&resolved.prompt, &shown, ctx).await?;
        }

        let stdout_capture = match options.stdout {
            Redirect::AutoCapture => Some(AutoCapture::new()?),
            _ => None,
        };
        let stderr_capture = match options.stderr {
            Redirect::AutoCapture => Some(AutoCapture::new()?),
            _ => None,
        };

        let (stdout_end, stdout_reader) = endpoint(
            &options.stdout,
            !resolved.stdout.is_empty(),
            stdout_capture.as_ref(),
        )?;
        let (stderr_end, stderr_reader) = if err2out {
            (stdout_end.try_clone()?, None)
        } else {
            endpoint(
                &options.stderr,
                !resolved.stderr.is_empty(),
                stderr_capture.as_ref(),
            )?
        };

        let mut cmd = match &command {
            CommandLine::Argv(args) => {
                let mut cmd = Command::new(&args[0]);
                cmd.args(&args[1..]);
                cmd
            }
            CommandLine::Shell(script) => {
                let mut cmd = Command::new(options.shell_program());
                cmd.arg("-c").arg(script);
                cmd
            }
        };
        cmd.envs(&options.env)
            .stdin(match options.stdin {
                StdinSource::Inherit => Stdio::inherit(),
                StdinSource::Null => Stdio::null(),
                StdinSource::Pipe => Stdio::piped(),
            })
            .stdout(stdout_end.into_stdio())
            .stderr(stderr_end.into_stdio())
            .kill_on_drop(true);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: command.program().to_string(),
            source,
        })?;
        // The command owns our copies of the write ends; they must be closed
        // for the readers to ever see EOF.
        drop(cmd);

        let pid = child.id();
        let created_at = procfs::creation_instant(pid);
        info!(?pid, command = %command, "process spawned");

        let (stdout, stdout_fanout) = attach(
            stdout_reader,
            &resolved.stdout,
            &options.stdout,
            stdout_capture.as_ref(),
        )?;
        let (stderr, stderr_fanout) = attach(
            stderr_reader,
            &resolved.stderr,
            &options.stderr,
            stderr_capture.as_ref(),
        )?;

        // Shared sinks only had to stay open until the helpers inherited them.
        drop(resolved);

        Ok(Self {
            command,
            stdin: child.stdin.take(),
            child,
            pid,
            created_at,
            mode: options.mode,
            stdout,
            stderr,
            stdout_fanout,
            stderr_fanout,
            stdout_capture,
            stderr_capture,
            io: None,
            exit_code: None,
            sinks,
        })
    }

    pub fn command(&self) -> &CommandLine {
        &self.command
    }

    /// OS pid of the main process (not of the fanout helpers).
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// OS-reported creation time of the main process.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Writable input of the child, when spawned with [`StdinSource::Pipe`].
    pub fn stdin(&mut self) -> Result<&mut ChildStdin> {
        self.stdin.as_mut().ok_or(ExecError::StreamClosed("stdin"))
    }

    /// The readable stdout: the fanout's copy when the stream is teed.
    pub fn stdout(&mut self) -> Result<&mut BoxedReader> {
        self.stdout.as_mut().ok_or(ExecError::StreamClosed("stdout"))
    }

    pub fn stderr(&mut self) -> Result<&mut BoxedReader> {
        self.stderr.as_mut().ok_or(ExecError::StreamClosed("stderr"))
    }

    pub fn has_fanout(&self) -> bool {
        self.stdout_fanout.is_some() || self.stderr_fanout.is_some()
    }

    fn fanouts_mut(&mut self) -> impl Iterator<Item = &mut StreamFanout> {
        self.stdout_fanout.iter_mut().chain(self.stderr_fanout.iter_mut())
    }

    fn record_exit(&mut self, status: ExitStatus) -> i32 {
        let code = exit_code(status);
        if self.exit_code.is_none() {
            info!(pid = ?self.pid, code, "process exited");
        }
        self.exit_code = Some(code);
        code
    }

    fn timeout_error(&self) -> ExecError {
        ExecError::Timeout {
            command: self.command.to_string(),
            elapsed: self.created_at.elapsed(),
        }
    }

    /// Exit code once the process and every fanout finished, `None` before.
    pub fn poll(&mut self) -> Result<Option<i32>> {
        if let Some(code) = self.exit_code {
            return Ok(Some(code));
        }
        for fanout in self.fanouts_mut() {
            if fanout.try_wait()?.is_none() {
                return Ok(None);
            }
        }
        match self.child.try_wait()? {
            Some(status) => Ok(Some(self.record_exit(status))),
            None => Ok(None),
        }
    }

    /// Block until the fanouts and then the process exit, all within one
    /// `timeout` budget.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> Result<i32> {
        match with_deadline(deadline_after(timeout), self.wait_all()).await {
            Some(result) => result,
            None => Err(self.timeout_error()),
        }
    }

    async fn wait_all(&mut self) -> Result<i32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }
        for fanout in self.fanouts_mut() {
            fanout.wait().await?;
        }
        let status = self.child.wait().await?;
        Ok(self.record_exit(status))
    }

    /// Send `input` (if any), read every captured stream to the end and wait
    /// for the whole group to exit.
    ///
    /// May be called again after a timeout; it resumes without losing data.
    /// Input can only be given before communication starts.
    pub async fn communicate(
        &mut self,
        input: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<Communicated> {
        let input = input.filter(|data| !data.is_empty());
        if self.io.is_some() && input.is_some() {
            return Err(ExecError::InputAfterCommunication);
        }
        if self.io.is_none() {
            self.start_io(input);
        }

        match with_deadline(deadline_after(timeout), self.finish_io()).await {
            Some(result) => result?,
            None => return Err(self.timeout_error()),
        }
        self.sinks.close();

        let mode = self.mode;
        let (stdout, stderr) = match &self.io {
            Some(io) => (
                io.stdout.bytes().map(<[u8]>::to_vec),
                io.stderr.bytes().map(<[u8]>::to_vec),
            ),
            None => (None, None),
        };
        let stdout = match (stdout, self.stdout_capture.as_mut()) {
            (Some(bytes), _) => Some(bytes),
            (None, Some(capture)) => Some(capture.read_all()?),
            (None, None) => None,
        };
        let stderr = match (stderr, self.stderr_capture.as_mut()) {
            (Some(bytes), _) => Some(bytes),
            (None, Some(capture)) => Some(capture.read_all()?),
            (None, None) => None,
        };

        Ok((
            stdout.map(|b| Captured::decode(b, mode)).transpose()?,
            stderr.map(|b| Captured::decode(b, mode)).transpose()?,
        ))
    }

    fn start_io(&mut self, input: Option<&[u8]>) {
        let stdin = match self.stdin.take() {
            Some(mut stdin) => {
                let payload = input.map(<[u8]>::to_vec);
                Some(tokio::spawn(async move {
                    if let Some(payload) = payload {
                        stdin.write_all(&payload).await?;
                    }
                    stdin.shutdown().await
                }))
            }
            None => {
                if input.is_some() {
                    debug!(pid = ?self.pid, "no stdin pipe; input ignored");
                }
                None
            }
        };
        self.io = Some(IoTasks {
            stdin,
            stdout: ReadTask::start(self.stdout.take()),
            stderr: ReadTask::start(self.stderr.take()),
        });
    }

    async fn finish_io(&mut self) -> Result<()> {
        if let Some(io) = self.io.as_mut() {
            if let Some(task) = io.stdin.as_mut() {
                match task.await.map_err(io::Error::other)? {
                    Ok(()) => {}
                    Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                        debug!(pid = ?self.pid, "child closed stdin before reading all input");
                    }
                    Err(err) => return Err(err.into()),
                }
                io.stdin = None;
            }
            io.stdout.finish().await?;
            io.stderr.finish().await?;
        }
        self.wait_all().await?;
        Ok(())
    }

    /// Gracefully terminate the process tree, escalating after `grace`.
    pub async fn terminate_tree(&mut self, grace: Duration) {
        tree::terminate_tree(self, grace).await;
    }

    /// Forcefully kill the process tree. Does nothing once the process was
    /// reaped.
    pub async fn kill_tree(&mut self) {
        tree::kill_tree(self).await;
    }

    /// Whether the exit status has been collected.
    pub fn has_exited(&self) -> bool {
        self.exit_code.is_some()
    }

    pub(crate) fn start_kill(&mut self) {
        if self.exit_code.is_some() {
            return;
        }
        if let Err(err) = self.child.start_kill() {
            debug!(pid = ?self.pid, error = %err, "process already gone");
        }
    }

    /// Kill the helpers, e.g. when an escaped descendant keeps their input
    /// open.
    pub(crate) fn kill_fanouts(&mut self) {
        for fanout in self.fanouts_mut() {
            fanout.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn dropping_io_tasks_releases_the_readers() {
        let (reader, mut writer) = io::pipe().unwrap();
        let receiver = pipe::Receiver::from_owned_fd(OwnedFd::from(reader)).unwrap();
        let io = IoTasks {
            stdin: None,
            stdout: ReadTask::start(Some(Box::new(receiver))),
            stderr: ReadTask::Idle,
        };
        writer.write_all(b"still read\n").unwrap();
        drop(io);

        // Once the aborted reader is gone the pipe has no read end left.
        let mut broken = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if let Err(err) = writer.write_all(b"x") {
                assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
                broken = true;
                break;
            }
        }
        assert!(broken, "reader task outlived its IoTasks");
    }
}
