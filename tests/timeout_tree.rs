mod common;

use std::time::{Duration, Instant};

use common::{LogDir, init_tracing, pid_alive, with_timeout};
use teeproc::exec::{ManagedProcess, Redirect, SpawnOptions};
use teeproc::{ExecError, RunOptions, run};

fn read_pids(logs: &LogDir) -> Vec<u32> {
    logs.read("pids")
        .split_whitespace()
        .filter_map(|p| p.parse().ok())
        .collect()
}

#[tokio::test]
async fn timeout_raises_and_leaves_no_process_behind() {
    init_tracing();
    let logs = LogDir::new();
    let script = format!(
        "sleep 30 & echo $! >> {pids}; echo $$ >> {pids}; wait",
        pids = logs.path("pids").display()
    );

    let started = Instant::now();
    let err = with_timeout(run(script, RunOptions::new().timeout(Duration::from_secs(1))))
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(10));

    let pids = read_pids(&logs);
    assert_eq!(pids.len(), 2, "pids file: {:?}", logs.read("pids"));
    for pid in pids {
        assert!(!pid_alive(pid), "pid {pid} survived");
    }
}

#[tokio::test]
async fn sleep_is_stopped_at_the_timeout() {
    init_tracing();
    let started = Instant::now();
    let err = with_timeout(run("sleep 3", RunOptions::new().timeout(Duration::from_secs(1))))
        .await
        .unwrap_err();

    match err {
        ExecError::Timeout { elapsed, .. } => {
            assert!(elapsed >= Duration::from_millis(900), "{elapsed:?}");
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_millis(2900));
}

#[tokio::test]
async fn ignored_sigterm_escalates_to_sigkill() {
    init_tracing();
    let started = Instant::now();
    let err = with_timeout(run(
        "trap '' TERM; sleep 10",
        RunOptions::new()
            .timeout(Duration::from_secs(1))
            .sigterm_timeout(Duration::from_secs(1)),
    ))
    .await
    .unwrap_err();

    assert!(err.is_timeout());
    let elapsed = started.elapsed();
    // One second for the timeout plus one of grace before the kill.
    assert!(elapsed >= Duration::from_millis(1900), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(8), "{elapsed:?}");
}

#[tokio::test]
async fn zero_grace_kills_immediately() {
    init_tracing();
    let started = Instant::now();
    let err = with_timeout(run(
        "trap '' TERM; sleep 10",
        RunOptions::new()
            .timeout(Duration::from_secs(1))
            .sigterm_timeout(Duration::ZERO),
    ))
    .await
    .unwrap_err();

    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_millis(1900));
}

#[tokio::test]
async fn teed_streams_do_not_keep_a_timed_out_run_alive() {
    init_tracing();
    let logs = LogDir::new();
    let spawn = SpawnOptions::new()
        .tee_stdout(logs.target("out.log"))
        .tee_stderr(logs.target("err.log"));

    let err = with_timeout(run(
        "echo started; sleep 30 & wait",
        RunOptions::new()
            .spawn(spawn)
            .timeout(Duration::from_secs(1))
            .sigterm_timeout(Duration::from_millis(500)),
    ))
    .await
    .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(logs.read("out.log"), "started\n");
}

#[tokio::test]
async fn terminate_tree_on_a_managed_process() {
    init_tracing();
    let mut process = ManagedProcess::spawn(
        "sleep 30 & sleep 30 & wait",
        SpawnOptions::new().stdout(Redirect::Discard),
    )
    .await
    .unwrap();
    let pid = process.pid().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    with_timeout(process.terminate_tree(Duration::from_secs(2))).await;
    let code = with_timeout(process.wait(None)).await.unwrap();

    assert_ne!(code, 0);
    assert!(!pid_alive(pid));
}
