// src/registry.rs

//! Process-wide default sinks and echo flag.
//!
//! Defaults are meant to be configured once at startup (see
//! [`crate::config::ConfigFile::apply_globals`]); every spawn takes a snapshot
//! and merges it with its own options. Each setter replaces the previous set.

use std::sync::{LazyLock, PoisonError, RwLock};

use crate::exec::{Redirect, SpawnOptions};
use crate::sink::{self, TeeTarget};

#[derive(Debug, Clone, Default)]
pub struct GlobalDefaults {
    pub echo: bool,
    pub stdout: Vec<TeeTarget>,
    pub stderr: Vec<TeeTarget>,
    pub prompt: Vec<TeeTarget>,
}

static GLOBAL: LazyLock<RwLock<GlobalDefaults>> =
    LazyLock::new(|| RwLock::new(GlobalDefaults::default()));

fn update(f: impl FnOnce(&mut GlobalDefaults)) {
    let mut guard = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard);
}

pub fn set_global_echo(echo: bool) {
    update(|g| g.echo = echo);
}

pub fn set_global_stdout_tees(targets: impl IntoIterator<Item = TeeTarget>) {
    let targets = dedup(targets);
    update(|g| g.stdout = targets);
}

pub fn set_global_stderr_tees(targets: impl IntoIterator<Item = TeeTarget>) {
    let targets = dedup(targets);
    update(|g| g.stderr = targets);
}

pub fn set_global_prompt_tees(targets: impl IntoIterator<Item = TeeTarget>) {
    let targets = dedup(targets);
    update(|g| g.prompt = targets);
}

/// Back to the initial empty state.
pub fn reset_globals() {
    update(|g| *g = GlobalDefaults::default());
}

pub fn snapshot() -> GlobalDefaults {
    GLOBAL.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn dedup(targets: impl IntoIterator<Item = TeeTarget>) -> Vec<TeeTarget> {
    let mut set = Vec::new();
    for target in targets {
        sink::push_unique(&mut set, target);
    }
    set
}

/// The logical sink sets of one spawn.
#[derive(Debug, Clone, Default)]
pub struct TeeSets {
    pub stdout: Vec<TeeTarget>,
    pub stderr: Vec<TeeTarget>,
    pub prompt: Vec<TeeTarget>,
}

/// Merge per-call sinks with the global defaults and the echo flag.
///
/// A stream left on the real terminal whose only sink is that same terminal
/// needs no duplication; a stream left on the terminal with other sinks gets
/// the terminal added so the output still shows up there.
pub fn merge_tee_sets(globals: &GlobalDefaults, options: &SpawnOptions) -> TeeSets {
    let mut stdout = dedup(options.stdout_tees.iter().cloned());
    let mut stderr = dedup(options.stderr_tees.iter().cloned());
    let mut prompt = dedup(options.prompt_tees.iter().cloned());

    if options.add_global_prompt_tees {
        globals.prompt.iter().cloned().for_each(|t| sink::push_unique(&mut prompt, t));
    }
    if options.add_global_stdout_tees {
        globals.stdout.iter().cloned().for_each(|t| sink::push_unique(&mut stdout, t));
    }
    if options.add_global_stderr_tees {
        globals.stderr.iter().cloned().for_each(|t| sink::push_unique(&mut stderr, t));
    }

    if options.echo.unwrap_or(globals.echo) {
        sink::push_unique(&mut prompt, TeeTarget::Stdout);
        sink::push_unique(&mut stdout, TeeTarget::Stdout);
        sink::push_unique(&mut stderr, TeeTarget::Stderr);
    }

    if options.stdout.is_inherit() {
        normalize_inherited(&mut stdout, TeeTarget::Stdout);
    }
    if options.stderr.is_inherit() {
        normalize_inherited(&mut stderr, TeeTarget::Stderr);
    }
    if matches!(options.stderr, Redirect::MergeIntoStdout) {
        stderr.clear();
    }

    TeeSets {
        stdout,
        stderr,
        prompt,
    }
}

fn normalize_inherited(set: &mut Vec<TeeTarget>, terminal: TeeTarget) {
    if set.len() == 1 && sink::contains(set, &terminal) {
        set.clear();
    }
    if !set.is_empty() {
        sink::push_unique(set, terminal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is(set: &[TeeTarget], expected: &[TeeTarget]) -> bool {
        set.len() == expected.len() && expected.iter().all(|t| sink::contains(set, t))
    }

    #[test]
    fn echo_on_inherited_streams_needs_no_fanout() {
        let options = SpawnOptions::new().echo(true);
        let sets = merge_tee_sets(&GlobalDefaults::default(), &options);
        assert!(sets.stdout.is_empty());
        assert!(sets.stderr.is_empty());
        assert!(is(&sets.prompt, &[TeeTarget::Stdout]));
    }

    #[test]
    fn echo_on_captured_streams_mirrors_to_terminal() {
        let options = SpawnOptions::new()
            .echo(true)
            .stdout(Redirect::AutoCapture)
            .stderr(Redirect::AutoCapture);
        let sets = merge_tee_sets(&GlobalDefaults::default(), &options);
        assert!(is(&sets.stdout, &[TeeTarget::Stdout]));
        assert!(is(&sets.stderr, &[TeeTarget::Stderr]));
    }

    #[test]
    fn extra_sink_on_inherited_stream_adds_terminal() {
        let file = TeeTarget::shared(tempfile::tempfile().unwrap());
        let options = SpawnOptions::new().tee_stdout(file.clone());
        let sets = merge_tee_sets(&GlobalDefaults::default(), &options);
        assert!(is(&sets.stdout, &[file, TeeTarget::Stdout]));
    }

    #[test]
    fn globals_merge_unless_disabled() {
        let file = TeeTarget::shared(tempfile::tempfile().unwrap());
        let globals = GlobalDefaults {
            echo: false,
            stdout: vec![file.clone()],
            stderr: vec![file.clone()],
            prompt: vec![file.clone()],
        };

        let options = SpawnOptions::new().stdout(Redirect::Pipe).stderr(Redirect::Pipe);
        let sets = merge_tee_sets(&globals, &options);
        assert!(is(&sets.stdout, &[file.clone()]));
        assert!(is(&sets.stderr, &[file.clone()]));
        assert!(is(&sets.prompt, &[file]));

        let sets = merge_tee_sets(&globals, &options.without_global_tees());
        assert!(sets.stdout.is_empty() && sets.stderr.is_empty() && sets.prompt.is_empty());
    }

    #[test]
    fn merged_stderr_has_no_sinks_of_its_own() {
        let file = TeeTarget::shared(tempfile::tempfile().unwrap());
        let options = SpawnOptions::new()
            .stdout(Redirect::Pipe)
            .stderr(Redirect::MergeIntoStdout)
            .tee_stderr(file);
        let sets = merge_tee_sets(&GlobalDefaults::default(), &options);
        assert!(sets.stderr.is_empty());
    }

    #[test]
    fn global_echo_is_overridden_per_call() {
        let globals = GlobalDefaults {
            echo: true,
            ..GlobalDefaults::default()
        };
        let options = SpawnOptions::new().echo(false);
        let sets = merge_tee_sets(&globals, &options);
        assert!(sets.prompt.is_empty());
    }
}
