// src/exec/tree.rs

//! Termination of a process together with everything it spawned.
//!
//! Descendants are enumerated with `pstree -p` (or `/proc` when `pstree` is
//! missing) and signalled deepest first, so a parent never gets the chance to
//! respawn a child that was just killed.

use std::collections::HashSet;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::process::ManagedProcess;
use super::procfs;

static PID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\((\d+)\)").unwrap_or_else(|err| panic!("invalid pid pattern: {err}"))
});

/// Pids in `pstree -p` output, deepest descendants first and the root last.
pub fn parse_pstree(text: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = PID_RE
        .captures_iter(text)
        .filter_map(|caps| caps[1].parse().ok())
        .collect();
    pids.reverse();
    pids
}

/// `pid` and all of its descendants, deepest first.
pub async fn list_tree(pid: u32) -> Vec<u32> {
    let output = Command::new("pstree")
        .arg("-p")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await;
    match output {
        Ok(out) if out.status.success() => {
            let pids = parse_pstree(&String::from_utf8_lossy(&out.stdout));
            if pids.is_empty() { vec![pid] } else { pids }
        }
        Ok(out) => {
            debug!(pid, status = %out.status, "pstree failed; reading /proc");
            procfs::descendants(pid)
        }
        Err(err) => {
            debug!(pid, error = %err, "pstree unavailable; reading /proc");
            procfs::descendants(pid)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Kill,
}

impl Signal {
    fn flag(self) -> &'static str {
        match self {
            Signal::Terminate => "-TERM",
            Signal::Kill => "-9",
        }
    }
}

/// Signal every pid through the `kill` utility. Pids that already exited
/// make `kill` fail; that is expected and only logged.
pub async fn signal_all(pids: &[u32], signal: Signal) {
    if pids.is_empty() {
        return;
    }
    let result = Command::new("kill")
        .arg(signal.flag())
        .args(pids.iter().map(u32::to_string))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match result {
        Ok(status) if status.success() => debug!(?pids, ?signal, "signalled"),
        Ok(status) => debug!(?pids, ?signal, %status, "some processes were already gone"),
        Err(err) => warn!(?pids, ?signal, error = %err, "could not run kill"),
    }
}

/// Pid of the main process while it has not been reaped yet. Once reaped,
/// the pid may already belong to an unrelated process.
fn live_pid(process: &ManagedProcess) -> Option<u32> {
    if process.has_exited() {
        debug!(pid = ?process.pid(), "process already reaped; not signalling");
        return None;
    }
    process.pid()
}

/// Ask the whole tree to exit with SIGTERM; whatever is still running after
/// `grace` gets SIGKILL. A zero `grace` kills right away.
pub async fn terminate_tree(process: &mut ManagedProcess, grace: Duration) {
    if grace.is_zero() {
        kill_tree(process).await;
        return;
    }
    let Some(pid) = live_pid(process) else {
        return;
    };
    let pids = list_tree(pid).await;
    info!(pid, count = pids.len(), ?grace, "terminating process tree");
    signal_all(&pids, Signal::Terminate).await;

    if let Err(err) = process.communicate(None, Some(grace)).await {
        debug!(pid, error = %err, "still running after grace period");
        // Descendants orphaned by the TERM are no longer below `pid`.
        let mut survivors = list_tree(pid).await;
        survivors.extend(pids.into_iter().filter(|p| *p != pid));
        let mut seen = HashSet::new();
        survivors.retain(|p| seen.insert(*p));
        signal_all(&survivors, Signal::Kill).await;
        process.start_kill();
    }
}

/// SIGKILL the whole tree, deepest first, then the main process itself.
/// Returns the pids that were signalled; empty once the process was reaped.
pub async fn kill_tree(process: &mut ManagedProcess) -> Vec<u32> {
    let Some(pid) = live_pid(process) else {
        return Vec::new();
    };
    let pids = list_tree(pid).await;
    info!(pid, count = pids.len(), "killing process tree");
    signal_all(&pids, Signal::Kill).await;
    process.start_kill();
    pids
}
