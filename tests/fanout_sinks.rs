mod common;

use common::{LogDir, SharedFileSink, init_tracing};
use teeproc::exec::{Redirect, SpawnOptions};
use teeproc::{LineSink, RunOptions, get_status_output, run};

const CHATTY: &str = "i=0; while [ $i -lt 300 ]; do echo \"out $i\"; echo \"err $i\" >&2; i=$((i+1)); done";

#[tokio::test]
async fn capture_is_identical_for_any_number_of_sinks() {
    init_tracing();
    let plain = run(CHATTY, RunOptions::new()).await.unwrap();
    let expected_out = plain.stdout.clone().unwrap();
    let expected_err = plain.stderr.clone().unwrap();
    assert!(expected_out.as_bytes().starts_with(b"out 0\n"));

    for count in [1, 3] {
        let mut out_sinks: Vec<SharedFileSink> = (0..count).map(|_| SharedFileSink::new()).collect();
        let mut err_sinks: Vec<SharedFileSink> = (0..count).map(|_| SharedFileSink::new()).collect();

        let mut spawn = SpawnOptions::new();
        for sink in &out_sinks {
            spawn = spawn.tee_stdout(sink.target());
        }
        for sink in &err_sinks {
            spawn = spawn.tee_stderr(sink.target());
        }

        let done = run(CHATTY, RunOptions::new().spawn(spawn)).await.unwrap();
        assert_eq!(done.stdout.as_ref(), Some(&expected_out), "{count} sinks");
        assert_eq!(done.stderr.as_ref(), Some(&expected_err), "{count} sinks");

        for sink in &mut out_sinks {
            assert_eq!(sink.contents(), expected_out.as_bytes());
        }
        for sink in &mut err_sinks {
            assert_eq!(sink.contents(), expected_err.as_bytes());
        }
    }
}

#[tokio::test]
async fn piped_stream_with_sinks_is_read_through_the_fanout() {
    init_tracing();
    let mut sink = SharedFileSink::new();
    let spawn = SpawnOptions::new().tee_stdout(sink.target());

    let done = run(
        ["printf", "a\\nb\\n"],
        RunOptions::new()
            .spawn(spawn)
            .stdout(Redirect::Pipe)
            .stderr(Redirect::Discard)
            .text(),
    )
    .await
    .unwrap();

    assert_eq!(done.stdout_text(), "a\nb\n");
    assert_eq!(done.stderr, None);
    assert_eq!(sink.text(), "a\nb\n");
}

#[tokio::test]
async fn file_destination_and_sink_both_receive_output() {
    init_tracing();
    let mut sink = SharedFileSink::new();
    let dest_file = tempfile::NamedTempFile::new().unwrap();
    let done = run(
        ["echo", "to file"],
        RunOptions::new()
            .spawn(SpawnOptions::new().tee_stdout(sink.target()))
            .stdout(Redirect::file(dest_file.reopen().unwrap()))
            .stderr(Redirect::Discard),
    )
    .await
    .unwrap();

    assert_eq!(done.stdout, None);
    assert_eq!(sink.text(), "to file\n");
    assert_eq!(std::fs::read_to_string(dest_file.path()).unwrap(), "to file\n");
}

#[tokio::test]
async fn merged_stderr_is_captured_with_stdout() {
    init_tracing();
    let (code, output) = get_status_output("echo one; echo two >&2; echo three", RunOptions::new())
        .await
        .unwrap();
    assert_eq!(code, 0);
    assert_eq!(output, "one\ntwo\nthree\n");
}

#[tokio::test]
async fn merged_stderr_mirrors_through_stdout_sinks() {
    init_tracing();
    let mut sink = SharedFileSink::new();
    let spawn = SpawnOptions::new().tee_stdout(sink.target());
    let (code, output) = get_status_output("echo one; echo two >&2", RunOptions::new().spawn(spawn))
        .await
        .unwrap();
    assert_eq!(code, 0);
    assert_eq!(output, "one\ntwo\n");
    assert_eq!(sink.text(), "one\ntwo\n");
}

#[tokio::test]
async fn path_sinks_are_appended_and_shared_between_sets() {
    init_tracing();
    let logs = LogDir::new();
    let session = logs.target("session.log");
    let spawn = SpawnOptions::new()
        .tee_stdout(session.clone())
        .tee_stderr(session);

    for _ in 0..2 {
        let done = run("echo out; sleep 0.1; echo err >&2", RunOptions::new().spawn(spawn.clone()))
            .await
            .unwrap();
        assert_eq!(done.stdout_text(), "out\n");
        assert_eq!(done.stderr_text(), "err\n");
    }

    assert_eq!(logs.read("session.log"), "out\nerr\nout\nerr\n");
}

#[tokio::test]
async fn line_sink_receives_every_line() {
    init_tracing();
    let spawn = SpawnOptions::new().tee_stdout(LineSink::target("stdout", tracing::Level::INFO));
    let done = run(["printf", "x\\ny\\nno newline"], RunOptions::new().spawn(spawn))
        .await
        .unwrap();
    assert_eq!(done.stdout_text(), "x\ny\nno newline");
}
