//! Tests for unit generation.
//!
//! Covers the service, reaper, socket and mount units of an app together
//! with the environment file and sysusers fragment written next to them.

mod common;

use std::fs;

use common::{basic_app, TestPod};
use serde_json::json;
use stage1::units::{quote_exec, unit_name_path_escape, UnitWriter};
use stage1::{Error, Flavor, InsecureOptions, StaticSupervisorInfo, UnitOption};

fn info() -> StaticSupervisorInfo {
    StaticSupervisorInfo::new(233, Flavor::Coreos)
}

/// Writes the units of `app` and returns the first error, if any.
fn write_app(pod: &TestPod, app: &str, info: &StaticSupervisorInfo, insecure: InsecureOptions) -> Option<Error> {
    let mut loaded = pod.load();
    let mut writer = UnitWriter::new(&mut loaded, info, insecure);
    writer.app_unit(app, "/bin/app", &[]);
    writer.app_reaper_unit(app, "/bin/app");
    writer.finish().err()
}

fn has_line(unit: &str, line: &str) -> bool {
    unit.lines().any(|l| l == line)
}

// =============================================================================
// Service Unit
// =============================================================================

#[test]
fn test_service_unit_basics() {
    let pod = TestPod::with_app("web", basic_app(), json!({}));
    assert!(write_app(&pod, "web", &info(), InsecureOptions::default()).is_none());

    let unit = pod.read_unit("web.service");
    assert!(unit.starts_with("[Unit]\n"));
    assert!(has_line(&unit, "Description=Application=web Image=example.com/web"));
    assert!(has_line(&unit, "DefaultDependencies=false"));
    assert!(has_line(&unit, "Wants=reaper-web.service"));
    assert!(has_line(&unit, "Requires=prepare-app@opt-stage2-web-rootfs.service"));
    assert!(has_line(&unit, "Requires=sysusers.service"));
    assert!(has_line(&unit, "OnFailure=halt.target"));
    assert!(has_line(&unit, "OnFailureJobMode=isolate"));
    assert!(has_line(&unit, "[Service]"));
    assert!(has_line(&unit, "Restart=no"));
    assert!(has_line(&unit, r#"ExecStart="/bin/app" "--serve""#));
    assert!(has_line(&unit, "RootDirectory=/opt/stage2/web/rootfs"));
    assert!(has_line(&unit, "WorkingDirectory=/"));
    assert!(has_line(&unit, "EnvironmentFile=/rkt/env/web"));
    assert!(has_line(&unit, "User=0"));
    assert!(has_line(&unit, "Group=0"));
    assert!(has_line(&unit, "SyslogIdentifier=web"));
    assert!(has_line(&unit, "NoNewPrivileges=false"));
    assert!(has_line(&unit, "DevicePolicy=closed"));
    assert!(has_line(&unit, "ProtectKernelTunables=true"));
    assert!(has_line(&unit, "ReadOnlyDirectories=-/opt/stage2/web/rootfs/proc/bus"));
    assert!(has_line(&unit, "InaccessiblePaths=-/opt/stage2/web/rootfs/proc/kcore"));
}

#[test]
fn test_service_unit_default_confinement() {
    let pod = TestPod::with_app("web", basic_app(), json!({}));
    assert!(write_app(&pod, "web", &info(), InsecureOptions::default()).is_none());

    let unit = pod.read_unit("web.service");
    let caps = unit
        .lines()
        .find_map(|l| l.strip_prefix("CapabilityBoundingSet="))
        .unwrap();
    assert_eq!(caps.split(' ').count(), 14);
    assert!(caps.starts_with("CAP_CHOWN CAP_DAC_OVERRIDE"));

    let filter = unit
        .lines()
        .find_map(|l| l.strip_prefix("SystemCallFilter="))
        .unwrap();
    assert!(!filter.starts_with('~'), "default filter is a whitelist");
    assert!(filter.split(' ').any(|s| s == "read"));
}

#[test]
fn test_service_unit_activated() {
    let pod = TestPod::with_app("web", basic_app(), json!({}));
    assert!(write_app(&pod, "web", &info(), InsecureOptions::default()).is_none());

    let link = pod.paths().default_wants_dir().join("web.service");
    assert_eq!(fs::read_link(link).unwrap(), std::path::PathBuf::from("../web.service"));
}

#[test]
fn test_extra_options_appended() {
    let pod = TestPod::with_app("web", basic_app(), json!({}));
    let mut loaded = pod.load();
    let info = info();
    let mut writer = UnitWriter::new(&mut loaded, &info, InsecureOptions::default());
    writer.app_unit(
        "web",
        "/bin/app",
        &[UnitOption::new("Service", "StandardOutput", "journal+console")],
    );
    writer.finish().unwrap();

    let unit = pod.read_unit("web.service");
    assert!(has_line(&unit, "StandardOutput=journal+console"));
}

#[test]
fn test_unit_generation_idempotent() {
    let app = json!({
        "exec": ["/bin/app"],
        "user": "0",
        "group": "0",
        "mountPoints": [{ "name": "data", "path": "/data", "readOnly": false }],
        "ports": [{ "name": "http", "protocol": "tcp", "port": 80, "socketActivated": true }],
    });
    let pod = TestPod::with_app("web", app, json!({}));

    assert!(write_app(&pod, "web", &info(), InsecureOptions::default()).is_none());
    let first: Vec<String> = ["web.service", "reaper-web.service", "web.socket"]
        .iter()
        .map(|u| pod.read_unit(u))
        .collect();
    let env_first = fs::read(pod.paths().env_file("web")).unwrap();

    assert!(write_app(&pod, "web", &info(), InsecureOptions::default()).is_none());
    let second: Vec<String> = ["web.service", "reaper-web.service", "web.socket"]
        .iter()
        .map(|u| pod.read_unit(u))
        .collect();
    assert_eq!(first, second);
    assert_eq!(env_first, fs::read(pod.paths().env_file("web")).unwrap());
}

// =============================================================================
// Insecure Options and Supervisor Gates
// =============================================================================

#[test]
fn test_insecure_options_drop_confinement() {
    let pod = TestPod::with_app("web", basic_app(), json!({}));
    let insecure = InsecureOptions {
        disable_paths: true,
        disable_capabilities: true,
        disable_seccomp: true,
    };
    assert!(write_app(&pod, "web", &info(), insecure).is_none());

    let unit = pod.read_unit("web.service");
    assert!(!unit.contains("CapabilityBoundingSet="));
    assert!(!unit.contains("SystemCallFilter="));
    assert!(!unit.contains("DevicePolicy="));
    assert!(!unit.contains("ReadOnlyDirectories=-"));
}

#[test]
fn test_pod_insecure_options_merged() {
    let pod = TestPod::with_app("web", basic_app(), json!({}));
    pod.write_runtime_config(&json!({ "insecureOptions": { "disableSeccomp": true } }));
    assert!(write_app(&pod, "web", &info(), InsecureOptions::default()).is_none());

    let unit = pod.read_unit("web.service");
    assert!(!unit.contains("SystemCallFilter="));
    assert!(unit.contains("CapabilityBoundingSet="));
}

#[test]
fn test_old_supervisor_skips_newer_options() {
    let pod = TestPod::with_app("web", basic_app(), json!({}));
    let old = StaticSupervisorInfo::new(229, Flavor::Src);
    assert!(write_app(&pod, "web", &old, InsecureOptions::default()).is_none());

    let unit = pod.read_unit("web.service");
    assert!(!unit.contains("InaccessiblePaths="));
    assert!(!unit.contains("ProtectKernelTunables="));
    assert!(has_line(&unit, "InaccessibleDirectories=-/opt/stage2/web/rootfs/sys/firmware"));
}

#[test]
fn test_unprivileged_app_forces_no_new_privileges() {
    let mut app = basic_app();
    app["user"] = json!("1000");
    app["group"] = json!("1000");
    app["supplementaryGIDs"] = json!([10, 1000]);
    let pod = TestPod::with_app("web", app, json!({}));
    assert!(write_app(&pod, "web", &info(), InsecureOptions::default()).is_none());

    let unit = pod.read_unit("web.service");
    assert!(has_line(&unit, "User=1000"));
    assert!(has_line(&unit, "SupplementaryGroups=10 1000"));
    assert!(has_line(&unit, "NoNewPrivileges=true"));
}

// =============================================================================
// Mounts, Devices, Resources, Event Handlers
// =============================================================================

#[test]
fn test_mount_directories() {
    let app = json!({
        "exec": ["/bin/app"],
        "mountPoints": [
            { "name": "conf", "path": "/etc/app", "readOnly": true },
            { "name": "data", "path": "/data", "readOnly": false },
        ],
    });
    let pod = TestPod::with_app(
        "web",
        app,
        json!({ "volumes": [{ "name": "conf", "kind": "host", "source": "/srv/conf" }] }),
    );
    assert!(write_app(&pod, "web", &info(), InsecureOptions::default()).is_none());

    let unit = pod.read_unit("web.service");
    assert!(has_line(&unit, "ReadOnlyDirectories=/opt/stage2/web/rootfs/etc/app"));
    assert!(has_line(&unit, "ReadWriteDirectories=/opt/stage2/web/rootfs/data"));
}

#[test]
fn test_device_volume_allowed() {
    let app = json!({
        "exec": ["/bin/app"],
        "mountPoints": [{ "name": "null", "path": "/dev/custom-null", "readOnly": false }],
    });
    let pod = TestPod::with_app(
        "web",
        app,
        json!({ "volumes": [{ "name": "null", "kind": "host", "source": "/dev/null" }] }),
    );
    assert!(write_app(&pod, "web", &info(), InsecureOptions::default()).is_none());

    let unit = pod.read_unit("web.service");
    assert!(has_line(&unit, "DeviceAllow=/opt/stage2/web/rootfs/dev/custom-null rw"));
}

#[test]
fn test_resources_and_event_handlers() {
    let mut app = basic_app();
    app["isolators"] = json!([
        { "name": "resource/cpu", "value": { "limit": "250m" } },
        { "name": "resource/memory", "value": { "limit": "128Mi" } },
    ]);
    app["eventHandlers"] = json!([
        { "name": "pre-start", "exec": ["/bin/prepare", "$STATE"] },
        { "name": "post-stop", "exec": ["/bin/cleanup"] },
    ]);
    let pod = TestPod::with_app("web", app, json!({}));
    assert!(write_app(&pod, "web", &info(), InsecureOptions::default()).is_none());

    let unit = pod.read_unit("web.service");
    assert!(has_line(&unit, "CPUQuota=25%"));
    assert!(has_line(&unit, "MemoryLimit=134217728"));
    assert!(has_line(&unit, r#"ExecStartPre="/bin/prepare" "$$STATE""#));
    assert!(has_line(&unit, r#"ExecStopPost="/bin/cleanup""#));
}

#[test]
fn test_unrecognized_event_handler() {
    let mut app = basic_app();
    app["eventHandlers"] = json!([{ "name": "post-start", "exec": ["/bin/x"] }]);
    let pod = TestPod::with_app("web", app, json!({}));

    let err = write_app(&pod, "web", &info(), InsecureOptions::default()).unwrap();
    assert!(matches!(err.root_cause(), Error::UnrecognizedEventHandler(n) if n == "post-start"));
}

// =============================================================================
// Reaper, Environment, Users
// =============================================================================

#[test]
fn test_reaper_unit() {
    let pod = TestPod::with_app("web", basic_app(), json!({}));
    assert!(write_app(&pod, "web", &info(), InsecureOptions::default()).is_none());

    let unit = pod.read_unit("reaper-web.service");
    assert!(has_line(&unit, "Description=web Reaper"));
    assert!(has_line(&unit, "StopWhenUnneeded=yes"));
    assert!(has_line(&unit, "Before=halt.target"));
    assert!(has_line(&unit, "Conflicts=exit.target"));
    assert!(has_line(&unit, "Conflicts=halt.target"));
    assert!(has_line(&unit, "Conflicts=poweroff.target"));
    assert!(has_line(&unit, "RemainAfterExit=yes"));
    assert!(has_line(
        &unit,
        r#"ExecStop=/reaper.sh "web" "/opt/stage2/web/rootfs" "/bin/app""#
    ));
}

#[test]
fn test_env_file_written() {
    let mut app = basic_app();
    app["environment"] = json!([{ "name": "MODE", "value": "prod" }]);
    let pod = TestPod::with_app("web", app, json!({}));
    pod.write_runtime_config(&json!({ "metadataServiceURL": "http://169.254.169.255:2375" }));
    assert!(write_app(&pod, "web", &info(), InsecureOptions::default()).is_none());

    let env = fs::read_to_string(pod.paths().env_file("web")).unwrap();
    let lines: Vec<&str> = env.lines().collect();
    assert!(lines.contains(&"MODE=prod"));
    assert!(lines.contains(&"AC_APP_NAME=web"));
    assert!(lines.contains(&"AC_METADATA_URL=http://169.254.169.255:2375"));
    assert!(lines.contains(&"HOME=/root"));
    assert!(lines.iter().any(|l| l.starts_with("PATH=")));
}

#[test]
fn test_named_user_from_passwd() {
    let mut app = basic_app();
    app["user"] = json!("www-data");
    app["group"] = json!("www-data");
    let pod = TestPod::with_app("web", app, json!({}));
    let etc = pod.app_rootfs("web").join("etc");
    fs::create_dir_all(&etc).unwrap();
    fs::write(
        etc.join("passwd"),
        "root:x:0:0:root:/root:/bin/sh\nwww-data:x:33:33:www-data:/var/www:/bin/false\n",
    )
    .unwrap();
    fs::write(etc.join("group"), "root:x:0:\nwww-data:x:33:\n").unwrap();

    assert!(write_app(&pod, "web", &info(), InsecureOptions::default()).is_none());
    let unit = pod.read_unit("web.service");
    assert!(has_line(&unit, "User=33"));
    assert!(has_line(&unit, "Group=33"));

    let sysusers = fs::read_to_string(pod.paths().sysusers_file("web")).unwrap();
    assert_eq!(sysusers, "g gen33 33\nu gen33 33 \"gen33\"\n");
}

#[test]
fn test_unknown_user_rejected() {
    let mut app = basic_app();
    app["user"] = json!("nobody-here");
    let pod = TestPod::with_app("web", app, json!({}));

    let err = write_app(&pod, "web", &info(), InsecureOptions::default()).unwrap();
    assert!(matches!(err, Error::App { ref app, .. } if app == "web"));
    assert!(matches!(err.root_cause(), Error::InvalidUserOrGroup { .. }));
}

// =============================================================================
// Socket Activation
// =============================================================================

#[test]
fn test_socket_unit_uses_host_port() {
    let app = json!({
        "exec": ["/bin/app"],
        "ports": [{ "name": "http", "protocol": "tcp", "port": 80, "socketActivated": true }],
    });
    let pod = TestPod::with_app(
        "web",
        app,
        json!({ "ports": [{ "name": "http", "hostPort": 8080 }] }),
    );
    assert!(write_app(&pod, "web", &info(), InsecureOptions::default()).is_none());

    let socket = pod.read_unit("web.socket");
    assert!(has_line(&socket, "ListenStream=8080"));
    assert!(has_line(&socket, "BindIPv6Only=both"));
    assert!(has_line(&socket, "Service=web.service"));

    let service = pod.read_unit("web.service");
    assert!(has_line(&service, "Requires=web.socket"));
    assert!(has_line(&service, "After=web.socket"));

    let link = pod.paths().sockets_wants_dir().join("web.socket");
    assert!(link.symlink_metadata().is_ok());
}

#[test]
fn test_socket_unit_udp_falls_back_to_app_port() {
    let app = json!({
        "exec": ["/bin/app"],
        "ports": [{ "name": "dns", "protocol": "udp", "port": 53, "socketActivated": true }],
    });
    let pod = TestPod::with_app("web", app, json!({}));
    assert!(write_app(&pod, "web", &info(), InsecureOptions::default()).is_none());

    let socket = pod.read_unit("web.socket");
    assert!(has_line(&socket, "ListenDatagram=53"));
}

#[test]
fn test_socket_unit_unknown_protocol() {
    let app = json!({
        "exec": ["/bin/app"],
        "ports": [{ "name": "sig", "protocol": "sctp", "port": 9, "socketActivated": true }],
    });
    let pod = TestPod::with_app("web", app, json!({}));

    let err = write_app(&pod, "web", &info(), InsecureOptions::default()).unwrap();
    assert!(matches!(
        err.root_cause(),
        Error::UnrecognizedProtocol { protocol, .. } if protocol == "sctp"
    ));
}

// =============================================================================
// First Error Wins
// =============================================================================

#[test]
fn test_first_error_wins() {
    let pod = TestPod::with_app("web", basic_app(), json!({}));
    let mut loaded = pod.load();
    let info = info();
    let mut writer = UnitWriter::new(&mut loaded, &info, InsecureOptions::default());

    writer.app_unit("ghost", "/bin/app", &[]);
    assert!(writer.error().is_some());
    writer.app_unit("web", "/bin/app", &[]);
    writer.app_reaper_unit("web", "/bin/app");

    let err = writer.finish().unwrap_err();
    assert!(matches!(err.root_cause(), Error::AppNotFound(a) if a == "ghost"));
    assert!(!pod.paths().unit_file("web.service").exists());
    assert!(!pod.paths().unit_file("reaper-web.service").exists());
}

// =============================================================================
// VM Flavor
// =============================================================================

#[test]
fn test_kvm_mount_units() {
    let app = json!({
        "exec": ["/bin/app"],
        "mountPoints": [{ "name": "data", "path": "/data", "readOnly": true }],
    });
    let pod = TestPod::with_app("web", app, json!({}));
    let kvm = StaticSupervisorInfo::new(233, Flavor::Kvm);
    assert!(write_app(&pod, "web", &kvm, InsecureOptions::default()).is_none());

    let mount_name = format!("{}.mount", unit_name_path_escape("/opt/stage2/web/rootfs/data"));
    assert_eq!(mount_name, "opt-stage2-web-rootfs-data.mount");
    let mount = pod.read_unit(&mount_name);
    assert!(has_line(&mount, "What=/rkt/volumes/web-data"));
    assert!(has_line(&mount, "Where=/opt/stage2/web/rootfs/data"));
    assert!(has_line(&mount, "Type=none"));
    assert!(has_line(&mount, "Options=bind,ro"));
    assert!(has_line(&mount, "Before=web.service"));

    let service = pod.read_unit("web.service");
    assert!(has_line(&service, &format!("Requires={mount_name}")));
    assert!(!service.contains("DevicePolicy="), "no device policy inside the VM");
    assert!(pod.paths().shared_volume("web-data").is_dir());
}

#[test]
fn test_quote_exec_reexported() {
    assert_eq!(quote_exec(&["/bin/true".to_string()]), "\"/bin/true\"");
}
