//! Lifecycle hooks around real processes.

#[path = "common/mod.rs"]
mod common;

use common::{TestProject, is_process_alive, wait_for_lines};
use pidward::{
    config::HookEvent,
    error::SupervisorError,
    status::StatusCode,
    supervisor::{Action, Request},
};

#[test]
fn start_hooks_bracket_the_pidfile_write() {
    let project = TestProject::new();
    project.write_config(
        r#"command: [sleep, "100"]
hooks:
  before_start: "test ! -e proc.pid && echo A >> markers.log"
  after_start: "test -s proc.pid && echo \"B $PIDWARD_STATUS\" >> markers.log"
"#,
    );

    let report = project
        .supervisor()
        .run(&Request::new(Action::Stay))
        .expect("stay failed");

    assert_eq!(report.status.code, StatusCode::Started);
    assert_eq!(
        wait_for_lines(&project.join("markers.log"), 2),
        vec!["A", "B STARTED"]
    );
}

#[test]
fn failing_before_stop_keeps_process_alive() {
    let project = TestProject::new();
    project.write_config(
        r#"command: [sleep, "100"]
hooks:
  before_stop: "exit 2"
"#,
    );
    let supervisor = project.supervisor();
    let started = supervisor
        .run(&Request::new(Action::Stay))
        .expect("stay failed");
    let pid = started.status.pid;

    let err = supervisor
        .run(&Request::new(Action::Kill))
        .expect_err("kill should fail");

    match err {
        SupervisorError::HookFailed {
            event,
            code,
            status,
            ..
        } => {
            assert_eq!(event, HookEvent::BeforeStop);
            assert_eq!(code, 2);
            assert_eq!(status.code, StatusCode::Running);
            assert_eq!(status.pid, pid);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(is_process_alive(pid));
    assert_eq!(project.read_pid(), Some(pid));
}

#[test]
fn suppressed_before_stop_failure_still_stops() {
    let project = TestProject::new();
    project.write_config(
        r#"command: [sleep, "100"]
hooks:
  before_stop: "exit 2"
  nocheck_before_stop: true
  after_stop: [sh, -c, "echo \"$PIDWARD_EVENT $PIDWARD_STATUS $PIDWARD_PID\" > stopped.log"]
"#,
    );
    let supervisor = project.supervisor();
    let pid = supervisor
        .run(&Request::new(Action::Stay))
        .expect("stay failed")
        .status
        .pid;

    let report = supervisor
        .run(&Request::new(Action::Kill))
        .expect("kill failed");

    assert_eq!(report.status.code, StatusCode::Stopped);
    assert!(!is_process_alive(pid));
    assert_eq!(
        wait_for_lines(&project.join("stopped.log"), 1),
        vec![format!("after_stop STOPPED {pid}")]
    );
}
