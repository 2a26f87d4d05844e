//! LocalExecutor against a real `sh`.

use std::time::{Duration, Instant};

use hostsync_core::HostRole;
use hostsync_exec::{ExecError, Executor, LocalExecutor};

fn local() -> LocalExecutor {
    LocalExecutor::new(HostRole::Source).with_kill_window(Duration::from_millis(500))
}

#[tokio::test]
async fn captures_stdout_stderr_and_exit_code() {
    let exec = local();
    let result = exec
        .run_command("echo out; echo err >&2; exit 3", None)
        .await
        .unwrap();
    assert_eq!(result.exit_code, 3);
    assert_eq!(result.stdout, "out\n");
    assert_eq!(result.stderr, "err\n");
    assert_eq!(exec.tracked_processes(), 0);
}

#[tokio::test]
async fn missing_binary_is_data_not_error() {
    let result = local()
        .run_command("definitely-not-a-command-hostsync", None)
        .await
        .unwrap();
    assert_eq!(result.exit_code, 127);
}

#[tokio::test]
async fn timeout_kills_process_group() {
    let exec = local();
    let started = Instant::now();
    let err = exec
        .run_command("sleep 30", Some(Duration::from_millis(200)))
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::Timeout { .. }), "got {err}");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(exec.tracked_processes(), 0);
}

#[tokio::test]
async fn streams_stdout_lines() {
    let exec = local();
    let mut handle = exec.start_process("printf 'a\\nb\\n'; exit 0").await.unwrap();
    assert!(handle.pid().is_some());
    assert_eq!(handle.next_stdout_line().await.unwrap().as_deref(), Some("a"));
    let result = handle.wait().await.unwrap();
    assert!(result.success());
    assert_eq!(result.stdout, "a\nb\n");
}

#[tokio::test]
async fn terminate_all_reaches_running_processes() {
    let exec = local();
    let mut handle = exec.start_process("sleep 30").await.unwrap();
    assert_eq!(exec.tracked_processes(), 1);

    let started = Instant::now();
    exec.terminate_all_processes().await;
    assert_eq!(exec.tracked_processes(), 0);

    let result = handle.wait().await.unwrap();
    assert_eq!(result.exit_code, 128 + 15);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn terminate_all_escalates_when_term_is_ignored() {
    let exec = local();
    let mut handle = exec
        .start_process("trap '' TERM; sleep 30")
        .await
        .unwrap();
    // Let the shell install its trap.
    tokio::time::sleep(Duration::from_millis(200)).await;

    exec.terminate_all_processes().await;
    let result = handle.wait().await.unwrap();
    assert_eq!(result.exit_code, 128 + 9);
}

#[tokio::test]
async fn terminate_all_without_processes_is_noop() {
    let exec = local();
    let started = Instant::now();
    exec.terminate_all_processes().await;
    assert!(started.elapsed() < Duration::from_millis(100));
}
