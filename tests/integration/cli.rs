#[path = "common/mod.rs"]
mod common;

use std::fs;

use assert_cmd::Command;
use common::{TestProject, is_process_alive, wait_for_process_exit};
use predicates::prelude::*;

fn pidward(project: &TestProject) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("pidward"));
    cmd.current_dir(project.path())
        .arg("--config")
        .arg(project.config_path())
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_and_version_exit_zero() {
    let project = TestProject::new();
    pidward(&project)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--restart"));
    pidward(&project).arg("--version").assert().success();
}

#[test]
fn usage_errors_exit_one() {
    let project = TestProject::new();
    pidward(&project).assert().code(1);
    pidward(&project).args(["--start", "--kill"]).assert().code(1);
    pidward(&project).args(["--stay", "--bogus"]).assert().code(1);
}

#[test]
fn check_without_config_exits_one() {
    let project = TestProject::new();
    pidward(&project)
        .arg("--check")
        .assert()
        .code(1)
        .stderr(predicate::function(|stderr: &str| {
            stderr.matches("No configuration found").count() == 1
        }));
}

#[test]
fn start_without_command_exits_one() {
    let project = TestProject::new();
    pidward(&project)
        .arg("--start")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No command configured"));
    assert!(!project.config_path().exists());
}

#[test]
fn generate_writes_config_without_starting() {
    let project = TestProject::new();
    pidward(&project)
        .args(["--generate", "--yes", "--outfile", "out.log", "--allow", "-1"])
        .args(["--", "sleep", "100"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("NOT_RUNNING"));

    let written = fs::read_to_string(project.config_path()).unwrap();
    assert!(written.contains("sleep"));
    assert!(written.contains("outfile: out.log"));
    assert!(written.contains("allow: -1"));
    assert!(project.read_pid().is_none());
}

#[test]
fn temporary_start_leaves_no_config() {
    let project = TestProject::new();
    pidward(&project)
        .args(["--start", "--temporary", "--wait-timeout", "10"])
        .args(["--", "sleep", "100"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("STARTED"));

    assert!(!project.config_path().exists());
    let pid = project.read_pid().expect("pidfile written");
    assert!(is_process_alive(pid));
}

#[test]
fn start_check_kill_through_binary() {
    let project = TestProject::new();
    pidward(&project)
        .args(["--start", "--wait-timeout", "10", "--", "sleep", "100"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("STARTED pid="));
    let pid = project.read_pid().expect("pidfile written");

    pidward(&project)
        .args(["--check", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""code": "RUNNING""#))
        .stdout(predicate::str::contains(format!(r#""pid": {pid}"#)));

    pidward(&project)
        .args(["--kill", "--wait-timeout", "10"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("STOPPED"));
    wait_for_process_exit(pid);
    assert!(project.read_pid().is_none());

    pidward(&project)
        .arg("--check")
        .assert()
        .code(1)
        .stdout(predicate::str::starts_with("NOT_RUNNING"));
}

#[test]
fn foreground_exit_code_is_propagated() {
    let project = TestProject::new();
    pidward(&project)
        .args(["--stay", "--foreground", "--", "sh", "-c", "exit 3"])
        .assert()
        .code(3)
        .stdout(predicate::str::starts_with("STOPPED"));
    assert!(project.read_pid().is_none());
}

#[test]
fn failing_hook_prints_status_and_exits_one() {
    let project = TestProject::new();
    project.write_config(
        r#"command: [sleep, "100"]
hooks:
  before_start: "exit 4"
"#,
    );

    pidward(&project)
        .arg("--stay")
        .assert()
        .code(1)
        .stdout(predicate::str::starts_with("NOT_RUNNING"))
        .stderr(predicate::str::contains("before_start hook `exit 4` failed"));
    assert!(project.read_pid().is_none());
}
