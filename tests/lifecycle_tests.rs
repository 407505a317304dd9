//! Tests for the app lifecycle driver.
//!
//! The supervisor is replaced by [`FakeControl`]; the pod directory is real.

mod common;

use std::fs;

use common::{basic_app, FakeControl, TestPod};
use serde_json::json;
use stage1::{
    AppState, ControlOutput, EnterCommand, Error, Flavor, InsecureOptions, LifecycleDriver,
    StaticSupervisorInfo, EXIT_PRECONDITION_FAILED, SYSTEMCTL_BIN,
};

const ENTER: &str = "/enter";
const POD_PID: i32 = 4242;

fn driver(pod: &TestPod, control: FakeControl) -> LifecycleDriver<FakeControl, StaticSupervisorInfo> {
    LifecycleDriver::new(
        pod.load(),
        EnterCommand::new(ENTER, POD_PID),
        control,
        StaticSupervisorInfo::new(233, Flavor::Coreos),
    )
}

/// A pod whose `web` app has already been added.
fn added_pod() -> TestPod {
    let pod = TestPod::with_app("web", basic_app(), json!({}));
    driver(&pod, FakeControl::new()).add("web").unwrap();
    pod
}

// =============================================================================
// State Observation
// =============================================================================

#[test]
fn test_state_not_present_without_unit() {
    let pod = TestPod::with_app("web", basic_app(), json!({}));
    let d = driver(&pod, FakeControl::new());

    assert_eq!(d.state("web").unwrap(), AppState::NotPresent);
    assert!(d.control().calls().is_empty(), "no supervisor query without a unit");
}

#[test]
fn test_state_observed_from_supervisor() {
    let pod = added_pod();

    assert_eq!(driver(&pod, FakeControl::new()).state("web").unwrap(), AppState::Prepared);
    assert_eq!(driver(&pod, FakeControl::new().active()).state("web").unwrap(), AppState::Running);

    let activating = FakeControl::new().respond("is-active", ControlOutput::failed(3, "activating\n"));
    assert_eq!(driver(&pod, activating).state("web").unwrap(), AppState::Running);

    let failed = FakeControl::new().respond("is-active", ControlOutput::failed(3, "failed\n"));
    assert_eq!(driver(&pod, failed).state("web").unwrap(), AppState::Exited);

    pod.write_status("web", 0);
    assert_eq!(driver(&pod, FakeControl::new()).state("web").unwrap(), AppState::Exited);
}

#[test]
fn test_state_query_failure() {
    let pod = added_pod();
    let control = FakeControl::new().respond("is-active", ControlOutput::failed(1, ""));

    let err = driver(&pod, control).state("web").unwrap_err();
    assert!(matches!(
        err.root_cause(),
        Error::SupervisorControlFailure { status: Some(1), .. }
    ));
}

#[test]
fn test_status_reports_exit_code() {
    let pod = added_pod();
    pod.write_status("web", 7);

    let status = driver(&pod, FakeControl::new()).status("web").unwrap();
    assert_eq!(status.state, AppState::Exited);
    assert_eq!(status.exit_code, Some(7));
    assert_eq!(
        serde_json::to_value(&status).unwrap(),
        json!({ "app": "web", "state": "exited", "exitCode": 7 })
    );
}

#[test]
fn test_status_of_prepared_app_has_no_exit_code() {
    let pod = added_pod();
    let status = driver(&pod, FakeControl::new()).status("web").unwrap();
    assert_eq!(
        serde_json::to_value(&status).unwrap(),
        json!({ "app": "web", "state": "prepared" })
    );
}

#[test]
fn test_unknown_app() {
    let pod = TestPod::with_app("web", basic_app(), json!({}));
    let mut d = driver(&pod, FakeControl::new());

    let err = d.add("db").unwrap_err();
    assert!(matches!(err.root_cause(), Error::AppNotFound(a) if a == "db"));
    assert_eq!(err.exit_code(), EXIT_PRECONDITION_FAILED);
    assert!(d.control().calls().is_empty());
}

// =============================================================================
// Add
// =============================================================================

#[test]
fn test_add_writes_units_and_reloads() {
    let pod = TestPod::with_app("web", basic_app(), json!({}));
    let mut d = driver(&pod, FakeControl::new());
    d.add("web").unwrap();

    let calls = d.control().calls();
    assert_eq!(
        calls,
        vec![vec![
            ENTER.to_string(),
            format!("--pid={POD_PID}"),
            "--".to_string(),
            SYSTEMCTL_BIN.to_string(),
            "daemon-reload".to_string(),
        ]]
    );

    let unit = pod.read_unit("web.service");
    assert!(unit.lines().any(|l| l == "Before=halt.target"));
    assert!(unit.lines().any(|l| l == "Conflicts=halt.target"));
    assert!(unit.lines().any(|l| l == "StandardOutput=journal+console"));
    assert!(unit.lines().any(|l| l == "StandardError=journal+console"));
    assert!(unit.lines().any(|l| l == r#"ExecStart="/bin/app" "--serve""#));
    assert!(pod.paths().unit_file("reaper-web.service").exists());
    assert!(pod.paths().env_file("web").exists());
    assert!(pod.paths().sysusers_file("web").exists());
}

#[test]
fn test_add_is_repeatable() {
    let pod = added_pod();
    let first = pod.read_unit("web.service");

    let mut d = driver(&pod, FakeControl::new());
    d.add("web").unwrap();
    assert_eq!(
        d.control().systemctl_calls(),
        vec!["is-active web.service", "daemon-reload"]
    );
    assert_eq!(pod.read_unit("web.service"), first);
}

#[test]
fn test_add_refuses_running_app() {
    let pod = added_pod();
    let mut d = driver(&pod, FakeControl::new().active());

    let err = d.add("web").unwrap_err();
    assert!(matches!(
        err.root_cause(),
        Error::InvalidAppState { state, .. } if state == "running"
    ));
    assert_eq!(err.exit_code(), EXIT_PRECONDITION_FAILED);
    assert_eq!(d.control().systemctl_calls(), vec!["is-active web.service"]);
}

#[test]
fn test_add_missing_binary() {
    let app = json!({ "exec": ["server"], "user": "0", "group": "0" });
    let pod = TestPod::with_app("web", app, json!({}));
    pod.app_rootfs("web");
    let mut d = driver(&pod, FakeControl::new());

    let err = d.add("web").unwrap_err();
    assert!(matches!(err.root_cause(), Error::BinaryNotFound { .. }));
    assert!(!pod.paths().unit_file("web.service").exists());
    assert!(d.control().calls().is_empty());
}

#[test]
fn test_add_with_insecure_options() {
    let pod = TestPod::with_app("web", basic_app(), json!({}));
    let mut d = driver(&pod, FakeControl::new()).with_insecure_options(InsecureOptions {
        disable_seccomp: true,
        ..InsecureOptions::default()
    });
    d.add("web").unwrap();

    let unit = pod.read_unit("web.service");
    assert!(!unit.contains("SystemCallFilter="));
    assert!(unit.contains("CapabilityBoundingSet="));
}

#[test]
fn test_add_reload_failure() {
    let pod = TestPod::with_app("web", basic_app(), json!({}));
    let control = FakeControl::new().respond("daemon-reload", ControlOutput {
        status: Some(1),
        stdout: String::new(),
        stderr: "Failed to reload daemon: Access denied\n".to_string(),
    });
    let mut d = driver(&pod, control);

    let err = d.add("web").unwrap_err();
    match err.root_cause() {
        Error::SupervisorControlFailure { command, stderr, .. } => {
            assert!(command.ends_with("/usr/bin/systemctl daemon-reload"));
            assert_eq!(stderr, "Failed to reload daemon: Access denied");
        }
        other => panic!("expected SupervisorControlFailure, got {other:?}"),
    }

    let paths = pod.paths();
    assert!(!paths.unit_file("web.service").exists());
    assert!(!paths.unit_file("reaper-web.service").exists());
    assert!(!paths.default_wants_dir().join("web.service").exists());
    assert!(!paths.env_file("web").exists());
    assert!(!paths.sysusers_file("web").exists());
    assert_eq!(d.state("web").unwrap(), AppState::NotPresent);
}

// =============================================================================
// Start / Stop
// =============================================================================

#[test]
fn test_start_prepared_app() {
    let pod = added_pod();
    let d = driver(&pod, FakeControl::new());
    d.start("web").unwrap();
    assert_eq!(
        d.control().systemctl_calls(),
        vec!["is-active web.service", "start web.service"]
    );
}

#[test]
fn test_start_exited_app() {
    let pod = added_pod();
    pod.write_status("web", 1);
    let d = driver(&pod, FakeControl::new());
    d.start("web").unwrap();
    assert!(d.control().systemctl_calls().contains(&"start web.service".to_string()));
}

#[test]
fn test_start_refused_in_wrong_state() {
    let pod = TestPod::with_app("web", basic_app(), json!({}));
    let err = driver(&pod, FakeControl::new()).start("web").unwrap_err();
    assert!(matches!(
        err.root_cause(),
        Error::InvalidAppState { state, .. } if state == "not-present"
    ));

    let pod = added_pod();
    let d = driver(&pod, FakeControl::new().active());
    let err = d.start("web").unwrap_err();
    assert!(matches!(err.root_cause(), Error::InvalidAppState { .. }));
    assert!(!d.control().systemctl_calls().contains(&"start web.service".to_string()));
}

#[test]
fn test_start_failure_propagates_status() {
    let pod = added_pod();
    let control = FakeControl::new().respond("start", ControlOutput::failed(5, ""));

    let err = driver(&pod, control).start("web").unwrap_err();
    assert!(matches!(
        err.root_cause(),
        Error::SupervisorControlFailure { status: Some(5), .. }
    ));
    assert_eq!(err.exit_code(), 5);
}

#[test]
fn test_stop_running_app() {
    let pod = added_pod();
    let d = driver(&pod, FakeControl::new().active());
    d.stop("web").unwrap();
    assert_eq!(
        d.control().systemctl_calls(),
        vec!["is-active web.service", "stop web.service"]
    );
}

#[test]
fn test_stop_refused_when_not_running() {
    let pod = added_pod();
    let d = driver(&pod, FakeControl::new());
    let err = d.stop("web").unwrap_err();
    assert!(matches!(
        err.root_cause(),
        Error::InvalidAppState { state, expected, .. } if state == "prepared" && expected == "running"
    ));
    assert_eq!(d.control().systemctl_calls(), vec!["is-active web.service"]);
}

// =============================================================================
// Remove
// =============================================================================

#[test]
fn test_remove_running_app_refused() {
    let pod = added_pod();
    let d = driver(&pod, FakeControl::new().active());

    let err = d.remove("web").unwrap_err();
    assert!(matches!(err.root_cause(), Error::AppStillRunning(a) if a == "web"));
    assert_eq!(err.exit_code(), EXIT_PRECONDITION_FAILED);

    assert!(pod.paths().unit_file("web.service").exists());
    assert!(pod.paths().unit_file("reaper-web.service").exists());
    assert!(pod.paths().env_file("web").exists());
    assert_eq!(d.control().systemctl_calls(), vec!["is-active web.service"]);
}

#[test]
fn test_remove_deletes_generated_files() {
    let pod = added_pod();
    pod.write_status("web", 0);
    let paths = pod.paths();
    fs::write(paths.unit_file("opt-stage2-web-rootfs-data.mount"), "[Mount]\n").unwrap();
    fs::write(paths.unit_file("opt-stage2-db-rootfs-data.mount"), "[Mount]\n").unwrap();

    let d = driver(&pod, FakeControl::new());
    d.remove("web").unwrap();

    assert!(!paths.unit_file("web.service").exists());
    assert!(!paths.unit_file("reaper-web.service").exists());
    assert!(paths.default_wants_dir().join("web.service").symlink_metadata().is_err());
    assert!(!paths.env_file("web").exists());
    assert!(!paths.sysusers_file("web").exists());
    assert!(!paths.unit_file("opt-stage2-web-rootfs-data.mount").exists());
    assert!(paths.unit_file("opt-stage2-db-rootfs-data.mount").exists());
    assert_eq!(
        d.control().systemctl_calls(),
        vec!["is-active web.service", "daemon-reload"]
    );

    assert_eq!(driver(&pod, FakeControl::new()).state("web").unwrap(), AppState::NotPresent);
}

#[test]
fn test_remove_socket_activated_app() {
    let app = json!({
        "exec": ["/bin/app"],
        "ports": [{ "name": "http", "protocol": "tcp", "port": 80, "socketActivated": true }],
    });
    let pod = TestPod::with_app("web", app, json!({}));
    driver(&pod, FakeControl::new()).add("web").unwrap();
    let paths = pod.paths();
    assert!(paths.unit_file("web.socket").exists());

    driver(&pod, FakeControl::new()).remove("web").unwrap();
    assert!(!paths.unit_file("web.socket").exists());
    assert!(paths.sockets_wants_dir().join("web.socket").symlink_metadata().is_err());
}

#[test]
fn test_remove_not_present_app_only_reloads() {
    let pod = TestPod::with_app("web", basic_app(), json!({}));
    let d = driver(&pod, FakeControl::new());
    d.remove("web").unwrap();
    assert_eq!(d.control().systemctl_calls(), vec!["daemon-reload"]);
}

// =============================================================================
// Enter Command
// =============================================================================

#[test]
fn test_enter_command_from_vars() {
    let pod = TestPod::new();
    let paths = pod.paths();

    let err = EnterCommand::from_vars(None, Some("1".to_string()), &paths).unwrap_err();
    assert!(matches!(err, Error::SupervisorUnavailable(_)));

    let err = EnterCommand::from_vars(Some(ENTER.to_string()), None, &paths).unwrap_err();
    assert!(matches!(err, Error::SupervisorUnavailable(_)));

    fs::write(paths.pid_file(), "321\n").unwrap();
    let enter = EnterCommand::from_vars(Some(ENTER.to_string()), None, &paths).unwrap();
    assert_eq!(enter, EnterCommand::new(ENTER, 321));

    let err = EnterCommand::from_vars(Some(ENTER.to_string()), Some("0".to_string()), &paths)
        .unwrap_err();
    assert!(matches!(err, Error::SupervisorUnavailable(_)));
}
