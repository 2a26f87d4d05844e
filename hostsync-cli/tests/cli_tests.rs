use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;
use predicates::str::contains;

use hostsync_core::{lock, Dirs, SessionId};

/// `hostsync` with every platform directory pointed into `home`.
fn hostsync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("hostsync"));
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("XDG_DATA_HOME", home.join(".local/share"))
        .env("XDG_STATE_HOME", home.join(".local/state"))
        .env("XDG_RUNTIME_DIR", home.join("run"))
        .env("NO_COLOR", "1");
    cmd
}

fn dirs_for(home: &Path) -> Dirs {
    Dirs {
        config: home.join(".config"),
        data: home.join(".local/share"),
        state: home.join(".local/state"),
        runtime: home.join("run"),
    }
}

#[test]
fn version_output_is_parseable_by_install_check() {
    let home = TempDir::new().unwrap();
    hostsync_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(contains(format!("hostsync {}", env!("CARGO_PKG_VERSION"))));
}

#[test]
fn help_lists_every_command() {
    let home = TempDir::new().unwrap();
    let assert = hostsync_cmd(home.path()).arg("--help").assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    for command in ["sync", "init", "logs", "unlock", "cleanup-snapshots"] {
        assert!(stdout.contains(command), "missing {command} in help");
    }
}

#[test]
fn init_writes_default_config_once() {
    let home = TempDir::new().unwrap();
    hostsync_cmd(home.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("Wrote default configuration"));

    let config = home.child(".config/hostsync/config.yaml");
    config.assert(predicate::path::is_file());
    config.assert(contains("sync_jobs:"));

    config.write_str("# edited by hand\n").unwrap();
    hostsync_cmd(home.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("left unchanged"));
    config.assert("# edited by hand\n");
}

#[test]
fn init_honours_explicit_path() {
    let home = TempDir::new().unwrap();
    let target = home.child("elsewhere/hostsync.yaml");
    hostsync_cmd(home.path())
        .args(["init", "--config"])
        .arg(target.path())
        .assert()
        .success();
    target.assert(predicate::path::is_file());
}

#[test]
fn sync_without_config_points_at_init() {
    let home = TempDir::new().unwrap();
    hostsync_cmd(home.path())
        .args(["sync", "backup-host"])
        .assert()
        .failure()
        .stderr(contains("hostsync init"));
}

#[test]
fn sync_rejects_invalid_config_before_connecting() {
    let home = TempDir::new().unwrap();
    let config = home.child("bad.yaml");
    config
        .write_str("sync_jobs:\n  no_such_job: true\n")
        .unwrap();
    hostsync_cmd(home.path())
        .args(["sync", "unreachable.invalid", "--config"])
        .arg(config.path())
        .assert()
        .failure()
        .stderr(contains("no_such_job"))
        .stderr(contains("failed to connect").not());

    let logs: Vec<_> = std::fs::read_dir(dirs_for(home.path()).logs_dir())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(logs.len(), 1);
    let run_log = std::fs::read_to_string(&logs[0]).unwrap();
    assert!(run_log.contains("no_such_job"), "{run_log}");
    assert!(run_log.contains("neither host was touched"), "{run_log}");
}

#[test]
fn logs_without_runs() {
    let home = TempDir::new().unwrap();
    hostsync_cmd(home.path())
        .arg("logs")
        .assert()
        .success()
        .stdout(contains("no run logs found"));
}

#[test]
fn logs_tails_the_newest_run() {
    let home = TempDir::new().unwrap();
    let logs = home.child(".local/share/hostsync/logs");
    let record = |level: &str, event: &str| {
        format!(
            r#"{{"timestamp":"2026-05-01T12:00:00Z","level":"{level}","job":"dummy_success","host":"target","event":"{event}","context":{{}}}}"#
        )
    };
    logs.child("sync-20260430T080000-old00001.log")
        .write_str(&format!("{}\n", record("INFO", "older run")))
        .unwrap();
    logs.child("sync-20260501T120000-new00001.log")
        .write_str(&format!(
            "{}\n{}\n{}\n",
            record("DEBUG", "noise"),
            record("INFO", "step 1 of 2 done"),
            record("ERROR", "simulated failure at 60%")
        ))
        .unwrap();

    hostsync_cmd(home.path())
        .args(["logs", "--lines", "2"])
        .assert()
        .success()
        .stdout(contains("new00001"))
        .stdout(contains("[dummy_success] (target) step 1 of 2 done"))
        .stdout(contains("simulated failure at 60%"))
        .stdout(contains("noise").not())
        .stdout(contains("older run").not());

    hostsync_cmd(home.path())
        .args(["logs", "--level", "error", "--raw"])
        .assert()
        .success()
        .stdout(contains(r#""level":"ERROR""#))
        .stdout(contains("step 1 of 2").not());
}

#[test]
fn unlock_without_lock() {
    let home = TempDir::new().unwrap();
    hostsync_cmd(home.path())
        .arg("unlock")
        .assert()
        .success()
        .stdout(contains("No lock held"));
}

#[test]
fn unlock_removes_a_stuck_lock_and_names_its_holder() {
    let home = TempDir::new().unwrap();
    let path = dirs_for(home.path()).lock_file();
    let guard = lock::acquire_at(&path, &SessionId::from("crashed1"), "laptop").unwrap();
    std::mem::forget(guard);

    hostsync_cmd(home.path())
        .arg("unlock")
        .assert()
        .success()
        .stdout(contains("crashed1"))
        .stdout(contains("laptop"));
    assert!(!path.exists());
}

#[test]
fn cleanup_refuses_while_a_sync_holds_the_lock() {
    let home = TempDir::new().unwrap();
    hostsync_cmd(home.path()).arg("init").assert().success();
    let path = dirs_for(home.path()).lock_file();
    let _running = lock::acquire_at(&path, &SessionId::from("running1"), "laptop").unwrap();

    hostsync_cmd(home.path())
        .args(["cleanup-snapshots", "--dry-run"])
        .assert()
        .failure()
        .stderr(contains("run lock"))
        .stderr(contains("running1"));
    assert!(path.exists());
}
