mod common;

use common::{SharedFileSink, init_tracing};
use teeproc::exec::{Redirect, SpawnOptions};
use teeproc::registry::snapshot;
use teeproc::{
    RunOptions, TeeTarget, reset_globals, run, set_global_prompt_tees, set_global_stderr_tees,
    set_global_stdout_tees,
};

// The registry is process-wide, so everything touching it lives in a single
// test.
#[tokio::test]
async fn global_sinks_apply_to_every_run_unless_disabled() {
    init_tracing();
    reset_globals();

    let mut out = SharedFileSink::new();
    let mut err = SharedFileSink::new();
    let mut prompt = SharedFileSink::new();
    let out_target = out.target();
    set_global_stdout_tees([out_target.clone(), out_target]);
    set_global_stderr_tees([err.target()]);
    set_global_prompt_tees([prompt.target()]);
    assert_eq!(snapshot().stdout.len(), 1);

    let done = run("echo hi; echo oops >&2", RunOptions::new().text())
        .await
        .unwrap();
    assert_eq!(done.stdout_text(), "hi\n");
    assert_eq!(done.stderr_text(), "oops\n");
    assert_eq!(out.text(), "hi\n");
    assert_eq!(err.text(), "oops\n");
    assert!(prompt.text().ends_with("echo hi; echo oops >&2\n"));

    let spawn = SpawnOptions::new().without_global_tees();
    run(
        "echo again",
        RunOptions::new()
            .spawn(spawn)
            .stdout(Redirect::Pipe)
            .stderr(Redirect::Pipe),
    )
    .await
    .unwrap();
    assert_eq!(out.text(), "hi\n");

    // Each setter replaces the previous set.
    set_global_stdout_tees(Vec::<TeeTarget>::new());
    run("echo replaced", RunOptions::new()).await.unwrap();
    assert_eq!(out.text(), "hi\n");

    reset_globals();
    let globals = snapshot();
    assert!(!globals.echo);
    assert!(globals.stdout.is_empty() && globals.stderr.is_empty() && globals.prompt.is_empty());
}
