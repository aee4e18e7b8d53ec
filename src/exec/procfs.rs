// src/exec/procfs.rs

//! Linux `/proc` helpers: process creation time and parent links.

use std::collections::HashMap;
use std::fs;
use std::time::{Duration, Instant};

/// Fields of `/proc/<pid>/stat` after the `(comm)` field, which may itself
/// contain spaces and parentheses.
fn stat_fields(pid: u32) -> Option<Vec<String>> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let rest = stat.get(stat.rfind(')')? + 1..)?;
    Some(rest.split_whitespace().map(str::to_string).collect())
}

fn clock_ticks_per_second() -> Option<f64> {
    // SAFETY: sysconf only reads a configuration value.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    (ticks > 0).then_some(ticks as f64)
}

fn uptime() -> Option<f64> {
    fs::read_to_string("/proc/uptime")
        .ok()?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

/// How long ago the OS created `pid`.
pub fn process_age(pid: u32) -> Option<Duration> {
    // Field 22 of stat is the start time in clock ticks since boot; the
    // slice returned by `stat_fields` starts at field 3.
    let start_ticks: f64 = stat_fields(pid)?.get(19)?.parse().ok()?;
    let started = start_ticks / clock_ticks_per_second()?;
    Some(Duration::from_secs_f64((uptime()? - started).max(0.0)))
}

/// OS-reported creation time of `pid` on the monotonic clock, or now if the
/// OS does not report it.
pub fn creation_instant(pid: Option<u32>) -> Instant {
    let now = Instant::now();
    pid.and_then(process_age)
        .and_then(|age| now.checked_sub(age))
        .unwrap_or(now)
}

fn parent_of(pid: u32) -> Option<u32> {
    stat_fields(pid)?.get(1)?.parse().ok()
}

/// `pid` and all of its descendants, deepest first, from `/proc` parent
/// links. Used when `pstree` is unavailable.
pub fn descendants(pid: u32) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    if let Ok(entries) = fs::read_dir("/proc") {
        for entry in entries.flatten() {
            let Some(child) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok())
            else {
                continue;
            };
            if let Some(parent) = parent_of(child) {
                children.entry(parent).or_default().push(child);
            }
        }
    }

    let mut order = Vec::new();
    let mut stack = vec![pid];
    while let Some(next) = stack.pop() {
        order.push(next);
        if let Some(kids) = children.get(&next) {
            stack.extend(kids.iter().copied());
        }
    }
    order.reverse();
    order
}
