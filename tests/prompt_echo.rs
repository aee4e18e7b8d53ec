mod common;

use std::time::Duration;

use common::{LogDir, SharedFileSink, init_tracing};
use teeproc::exec::prompt::{quote, shellify};
use teeproc::exec::{Redirect, SpawnOptions};
use teeproc::{RunOptions, run};

#[tokio::test]
async fn trace_line_precedes_the_output() {
    init_tracing();
    let logs = LogDir::new();
    let session = logs.target("session.log");
    let spawn = SpawnOptions::new()
        .tee_prompt(session.clone())
        .tee_stdout(session);

    let done = run(["echo", "hello world"], RunOptions::new().spawn(spawn))
        .await
        .unwrap();
    assert_eq!(done.stdout_text(), "hello world\n");

    let command = quote(&["echo", "hello world"]);
    let expected_tail = format!("{}\nhello world\n", shellify(&command, false, None));
    let log = logs.read("session.log");
    assert!(log.ends_with(&expected_tail), "log was {log:?}");
}

#[tokio::test]
async fn every_prompt_sink_gets_the_same_line() {
    init_tracing();
    let mut sinks: Vec<SharedFileSink> = (0..3).map(|_| SharedFileSink::new()).collect();
    let mut spawn = SpawnOptions::new();
    for sink in &sinks {
        spawn = spawn.tee_prompt(sink.target());
    }

    run("true", RunOptions::new().spawn(spawn)).await.unwrap();

    let copies: Vec<String> = sinks.iter_mut().map(SharedFileSink::text).collect();
    assert!(copies[0].ends_with("true\n"), "prompt was {:?}", copies[0]);
    assert!(copies.iter().all(|c| c == &copies[0]));
}

#[tokio::test]
async fn alias_comment_and_merge_are_rendered() {
    init_tracing();
    let mut sink = SharedFileSink::new();
    let spawn = SpawnOptions::new()
        .tee_prompt(sink.target())
        .alias("deploy --fast");

    run(
        "echo hidden",
        RunOptions::new()
            .spawn(spawn)
            .stdout(Redirect::Pipe)
            .stderr(Redirect::MergeIntoStdout)
            .timeout(Duration::from_secs(5)),
    )
    .await
    .unwrap();

    let prompt = sink.text();
    assert!(
        prompt.ends_with("deploy --fast 2>&1 # timeout=5\n"),
        "prompt was {prompt:?}"
    );
    assert!(!prompt.contains("hidden"));
}

#[tokio::test]
async fn multi_line_command_uses_continuation_prompt() {
    init_tracing();
    let mut sink = SharedFileSink::new();
    let spawn = SpawnOptions::new().tee_prompt(sink.target());

    let done = run("for i in 1 2\ndo echo $i\ndone", RunOptions::new().spawn(spawn).text())
        .await
        .unwrap();
    assert_eq!(done.stdout_text(), "1\n2\n");

    let prompt = sink.text();
    assert!(prompt.contains("for i in 1 2\n"), "prompt was {prompt:?}");
    assert!(prompt.ends_with("done\n"), "prompt was {prompt:?}");
    assert_eq!(prompt.matches("do echo $i").count(), 1);
}
