// src/sink/mod.rs

//! Output sinks.
//!
//! A sink is anything exposing a file descriptor that can receive a copy of a
//! child's output stream. Sinks are referenced through [`TeeTarget`]:
//!
//! - [`TeeTarget::Stdout`] / [`TeeTarget::Stderr`] are the *real* standard
//!   streams of the current process (always fd 1 / fd 2).
//! - [`TeeTarget::Shared`] is a ready sink owned by the caller; it is never
//!   closed by this crate.
//! - [`TeeTarget::Factory`] is opened lazily at spawn time and closed once the
//!   process is fully drained.

pub mod line;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

pub use line::LineSink;

/// Descriptor numbers of the sinks attached to one stream.
pub type FdSet = BTreeSet<RawFd>;

pub const STDOUT_FD: RawFd = 1;
pub const STDERR_FD: RawFd = 2;

/// A destination able to receive a copy of a process stream.
pub trait Sink: AsFd + Send + Sync {
    /// Release the sink after every helper process writing to it exited.
    fn close(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

impl Sink for File {}
impl Sink for OwnedFd {}
impl Sink for io::PipeWriter {}
impl Sink for io::Stdout {}
impl Sink for io::Stderr {}

pub type SinkFactory = Arc<dyn Fn() -> io::Result<Box<dyn Sink>> + Send + Sync>;

#[derive(Clone)]
pub enum TeeTarget {
    Stdout,
    Stderr,
    Shared(Arc<dyn Sink>),
    Factory(SinkFactory),
}

impl TeeTarget {
    pub fn shared(sink: impl Sink + 'static) -> Self {
        TeeTarget::Shared(Arc::new(sink))
    }

    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn() -> io::Result<Box<dyn Sink>> + Send + Sync + 'static,
    {
        TeeTarget::Factory(Arc::new(factory))
    }

    /// A file opened in append mode (created if missing) for every spawn.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        TeeTarget::factory(move || {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            Ok(Box::new(file) as Box<dyn Sink>)
        })
    }

    /// Logical identity: same real stream, same `Arc`, or same factory.
    pub fn same_as(&self, other: &TeeTarget) -> bool {
        match (self, other) {
            (TeeTarget::Stdout, TeeTarget::Stdout) => true,
            (TeeTarget::Stderr, TeeTarget::Stderr) => true,
            (TeeTarget::Shared(a), TeeTarget::Shared(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (TeeTarget::Factory(a), TeeTarget::Factory(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}

impl fmt::Debug for TeeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeeTarget::Stdout => f.write_str("Stdout"),
            TeeTarget::Stderr => f.write_str("Stderr"),
            TeeTarget::Shared(sink) => write!(f, "Shared(fd={})", sink.as_fd().as_raw_fd()),
            TeeTarget::Factory(_) => f.write_str("Factory"),
        }
    }
}

/// Append-mode file targets keyed by path, so that a path listed in several
/// sets resolves to one factory and is opened once per spawn.
#[derive(Debug, Default)]
pub struct FileTargets {
    by_path: Vec<(PathBuf, TeeTarget)>,
}

impl FileTargets {
    pub fn get(&mut self, path: &Path) -> TeeTarget {
        if let Some((_, target)) = self.by_path.iter().find(|(p, _)| p == path) {
            return target.clone();
        }
        let target = TeeTarget::file(path);
        self.by_path.push((path.to_path_buf(), target.clone()));
        target
    }
}

/// Add `target` to `set` unless an identical target is already present.
pub fn push_unique(set: &mut Vec<TeeTarget>, target: TeeTarget) {
    if !set.iter().any(|t| t.same_as(&target)) {
        set.push(target);
    }
}

pub fn contains(set: &[TeeTarget], target: &TeeTarget) -> bool {
    set.iter().any(|t| t.same_as(target))
}

/// Sink sets of one spawn resolved to descriptor numbers.
///
/// Holds the shared sinks alive and owns the sinks opened by factories until
/// [`ResolvedSinks::take_opened`] hands them to the process.
#[derive(Default)]
pub struct ResolvedSinks {
    pub stdout: FdSet,
    pub stderr: FdSet,
    pub prompt: FdSet,
    shared: Vec<Arc<dyn Sink>>,
    opened: Vec<Box<dyn Sink>>,
}

impl ResolvedSinks {
    /// Resolve the three sets. A factory referenced by several sets is
    /// opened only once.
    pub fn resolve(
        stdout: &[TeeTarget],
        stderr: &[TeeTarget],
        prompt: &[TeeTarget],
    ) -> io::Result<Self> {
        let mut resolved = ResolvedSinks::default();
        let mut factories: HashMap<*const (), RawFd> = HashMap::new();

        resolved.stdout = resolved.resolve_set(stdout, &mut factories)?;
        resolved.stderr = resolved.resolve_set(stderr, &mut factories)?;
        resolved.prompt = resolved.resolve_set(prompt, &mut factories)?;

        debug!(
            stdout = ?resolved.stdout,
            stderr = ?resolved.stderr,
            prompt = ?resolved.prompt,
            opened = resolved.opened.len(),
            "resolved tee sinks"
        );
        Ok(resolved)
    }

    fn resolve_set(
        &mut self,
        targets: &[TeeTarget],
        factories: &mut HashMap<*const (), RawFd>,
    ) -> io::Result<FdSet> {
        let mut fds = FdSet::new();
        for target in targets {
            let fd = match target {
                TeeTarget::Stdout => STDOUT_FD,
                TeeTarget::Stderr => STDERR_FD,
                TeeTarget::Shared(sink) => {
                    self.shared.push(Arc::clone(sink));
                    sink.as_fd().as_raw_fd()
                }
                TeeTarget::Factory(factory) => {
                    let key = Arc::as_ptr(factory) as *const ();
                    match factories.get(&key) {
                        Some(fd) => *fd,
                        None => {
                            let sink = factory()?;
                            let fd = sink.as_fd().as_raw_fd();
                            self.opened.push(sink);
                            factories.insert(key, fd);
                            fd
                        }
                    }
                }
            };
            fds.insert(fd);
        }
        Ok(fds)
    }

    pub fn take_opened(&mut self) -> Vec<Box<dyn Sink>> {
        std::mem::take(&mut self.opened)
    }
}

/// Close sinks opened through factories; failures are only logged.
pub fn close_all(sinks: Vec<Box<dyn Sink>>) {
    for sink in sinks {
        let fd = sink.as_fd().as_raw_fd();
        if let Err(err) = sink.close() {
            warn!(fd, error = %err, "failed to close tee sink");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_target_is_deduplicated() {
        let file = TeeTarget::shared(tempfile::tempfile().unwrap());
        let mut set = Vec::new();
        push_unique(&mut set, TeeTarget::Stdout);
        push_unique(&mut set, file.clone());
        push_unique(&mut set, TeeTarget::Stdout);
        push_unique(&mut set, file);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn factory_shared_between_sets_is_opened_once() {
        let opened = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        let factory = TeeTarget::factory(move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(Box::new(tempfile::tempfile()?) as Box<dyn Sink>)
        });

        let mut resolved = ResolvedSinks::resolve(
            &[factory.clone(), TeeTarget::Stdout],
            &[TeeTarget::Stderr],
            &[factory],
        )
        .unwrap();

        assert_eq!(opened.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(resolved.stdout.len(), 2);
        assert!(resolved.stdout.contains(&STDOUT_FD));
        assert_eq!(resolved.stderr, FdSet::from([STDERR_FD]));
        assert_eq!(resolved.prompt.len(), 1);
        assert!(resolved.stdout.is_superset(&resolved.prompt));
        close_all(resolved.take_opened());
    }

    #[test]
    fn distinct_handles_to_same_fd_collapse() {
        let file = Arc::new(tempfile::tempfile().unwrap());
        let a = TeeTarget::Shared(file.clone());
        let b = TeeTarget::Shared(file);
        let resolved = ResolvedSinks::resolve(&[a, b], &[], &[]).unwrap();
        assert_eq!(resolved.stdout.len(), 1);
    }
}
