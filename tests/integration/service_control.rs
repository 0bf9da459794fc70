//! Start, check, stay and kill against real processes.

#[path = "common/mod.rs"]
mod common;

use common::{TestProject, is_process_alive, wait_for_lines};
use pidward::{
    config::Overrides,
    error::SupervisorError,
    status::StatusCode,
    supervisor::{Action, Request},
};

fn sleeper(action: Action) -> Request {
    Request::new(action).with_command(["sleep", "100"])
}

#[test]
fn start_check_kill_cycle() {
    let project = TestProject::new();
    let supervisor = project.supervisor();

    let started = supervisor.run(&sleeper(Action::Start)).expect("start failed");
    assert_eq!(started.status.code, StatusCode::Started);
    assert_eq!(started.exit_code, 0);
    assert!(project.config_path().exists());
    let pid = started.status.pid;
    assert_eq!(project.read_pid(), Some(pid));
    assert!(is_process_alive(pid));

    let checked = supervisor
        .run(&Request::new(Action::Check))
        .expect("check failed");
    assert_eq!(checked.status.code, StatusCode::Running);
    assert_eq!(checked.status.pid, pid);
    assert_eq!(checked.exit_code, 0);

    let killed = supervisor
        .run(&Request::new(Action::Kill))
        .expect("kill failed");
    assert_eq!(killed.status.code, StatusCode::Stopped);
    assert_eq!(killed.status.pid, pid);
    assert!(!is_process_alive(pid));
    assert!(project.read_pid().is_none());

    let after = supervisor
        .run(&Request::new(Action::Check))
        .expect("check failed");
    assert_eq!(after.status.code, StatusCode::NotRunning);
    assert_eq!(after.exit_code, 1);
}

#[test]
fn start_refuses_to_overwrite_config() {
    let project = TestProject::new();
    let supervisor = project.supervisor();
    supervisor.run(&sleeper(Action::Start)).expect("start failed");
    let pid = project.read_pid();

    let err = supervisor
        .run(&sleeper(Action::Start))
        .expect_err("second start should fail");
    assert!(matches!(err, SupervisorError::ConfigExists(_)));
    assert_eq!(project.read_pid(), pid);
}

#[test]
fn stay_is_idempotent() {
    let project = TestProject::new();
    let supervisor = project.supervisor();

    let first = supervisor.run(&sleeper(Action::Stay)).expect("stay failed");
    assert_eq!(first.status.code, StatusCode::Started);

    for _ in 0..3 {
        let again = supervisor.run(&sleeper(Action::Stay)).expect("stay failed");
        assert_eq!(again.status.code, StatusCode::Running);
        assert_eq!(again.status.pid, first.status.pid);
        assert_eq!(again.exit_code, 0);
    }
}

#[test]
fn check_does_not_change_anything() {
    let project = TestProject::new();
    let supervisor = project.supervisor();
    supervisor.run(&sleeper(Action::Start)).expect("start failed");
    let config_before = std::fs::read_to_string(project.config_path()).unwrap();

    let first = supervisor.run(&Request::new(Action::Check)).unwrap();
    let second = supervisor.run(&Request::new(Action::Check)).unwrap();

    assert_eq!(first, second);
    assert_eq!(
        std::fs::read_to_string(project.config_path()).unwrap(),
        config_before
    );
}

#[test]
fn output_is_redirected_to_outfile() {
    let project = TestProject::new();
    let request = Request::new(Action::Start)
        .with_command(["sh", "-c", "echo hello from child; exec sleep 100"])
        .with_overrides(Overrides {
            outfile: Some("logs/out.log".into()),
            ..Overrides::default()
        });

    let report = project.supervisor().run(&request).expect("start failed");

    assert_eq!(report.status.code, StatusCode::Started);
    assert_eq!(
        wait_for_lines(&project.join("logs/out.log"), 1),
        vec!["hello from child"]
    );
}

#[test]
fn kill_without_running_process_fails() {
    let project = TestProject::new();
    project.write_config("command: [sleep, \"100\"]\n");

    let report = project
        .supervisor()
        .run(&Request::new(Action::Kill))
        .expect("kill failed");
    assert_eq!(report.status.code, StatusCode::NotRunning);
    assert_eq!(report.exit_code, 1);
}
