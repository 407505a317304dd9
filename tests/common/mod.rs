//! Shared fixtures for integration tests.
//!
//! Builds throw-away pod directories and in-memory supervisor fakes.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{json, Value};
use stage1::{ControlOutput, Pod, PodPaths, SupervisorControl, SYSTEMCTL_BIN};
use tempfile::TempDir;
use uuid::Uuid;

pub const POD_UUID: &str = "6733c88a-b5a1-4a3c-bd9e-1c5c6fa4d3b1";

// =============================================================================
// Pod Directories
// =============================================================================

/// A pod directory inside a temporary directory.
pub struct TestPod {
    pub dir: TempDir,
}

impl TestPod {
    /// Creates an empty pod with its stage1 rootfs.
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let pod = Self { dir };
        fs::create_dir_all(pod.paths().stage1_rootfs()).unwrap();
        pod
    }

    /// Creates a pod with a single app whose image carries `app`.
    ///
    /// `pod_extra` is merged into the pod manifest (volumes, ports, ...).
    /// The binary named by `exec[0]` is installed in the app rootfs.
    pub fn with_app(name: &str, app: Value, pod_extra: Value) -> Self {
        let pod = Self::new();
        let mut manifest = json!({
            "acVersion": "0.8.11",
            "acKind": "PodManifest",
            "apps": [{
                "name": name,
                "image": { "name": format!("example.com/{name}"), "id": "sha512-0123" }
            }]
        });
        if let (Some(target), Some(extra)) = (manifest.as_object_mut(), pod_extra.as_object()) {
            for (k, v) in extra {
                target.insert(k.clone(), v.clone());
            }
        }
        pod.write_pod_manifest(&manifest);
        pod.write_image(name, app.clone(), &[]);

        if let Some(bin) = app["exec"][0].as_str() {
            if bin.starts_with('/') {
                pod.install_binary(name, bin);
            }
        }
        pod
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn paths(&self) -> PodPaths {
        PodPaths::new(self.dir.path())
    }

    pub fn uuid() -> Uuid {
        Uuid::parse_str(POD_UUID).unwrap()
    }

    pub fn write_pod_manifest(&self, manifest: &Value) {
        fs::write(self.paths().pod_manifest(), manifest.to_string()).unwrap();
    }

    pub fn write_runtime_config(&self, config: &Value) {
        fs::write(self.paths().runtime_config(), config.to_string()).unwrap();
    }

    /// Writes the image manifest of `app`, with optional annotations.
    pub fn write_image(&self, app: &str, spec: Value, annotations: &[(&str, &str)]) {
        let annotations: Vec<Value> = annotations
            .iter()
            .map(|(n, v)| json!({ "name": n, "value": v }))
            .collect();
        let image = json!({
            "acKind": "ImageManifest",
            "acVersion": "0.8.11",
            "name": format!("example.com/{app}"),
            "app": spec,
            "annotations": annotations,
        });
        let path = self.paths().image_manifest(app);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, image.to_string()).unwrap();
    }

    /// App rootfs on the host, created on demand.
    pub fn app_rootfs(&self, app: &str) -> PathBuf {
        let rootfs = self.paths().app_rootfs(app);
        fs::create_dir_all(&rootfs).unwrap();
        rootfs
    }

    /// Writes an executable file at app-absolute `path`.
    pub fn install_binary(&self, app: &str, path: &str) {
        let host = self.app_rootfs(app).join(path.trim_start_matches('/'));
        fs::create_dir_all(host.parent().unwrap()).unwrap();
        fs::write(&host, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&host, fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// Marks the app as exited with `code`, as the reaper would.
    pub fn write_status(&self, app: &str, code: i32) {
        let path = self.paths().status_file(app);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, code.to_string()).unwrap();
    }

    pub fn load(&self) -> Pod {
        Pod::load(self.root(), Self::uuid()).unwrap()
    }

    pub fn read_unit(&self, unit: &str) -> String {
        fs::read_to_string(self.paths().unit_file(unit)).unwrap()
    }
}

/// A minimal app spec running `/bin/app` as root.
pub fn basic_app() -> Value {
    json!({
        "exec": ["/bin/app", "--serve"],
        "user": "0",
        "group": "0",
    })
}

/// Returns true when tests run with an effective uid of 0.
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Current effective uid and gid.
pub fn current_ids() -> (u32, u32) {
    // SAFETY: geteuid/getegid have no preconditions and cannot fail.
    unsafe { (libc::geteuid(), libc::getegid()) }
}

// =============================================================================
// Supervisor Fake
// =============================================================================

/// Records control commands and answers them from a script.
///
/// Responses are keyed by the `systemctl` verb (`is-active`, `start`, ...).
/// Unscripted `is-active` calls report an inactive unit; everything else
/// succeeds.
#[derive(Default)]
pub struct FakeControl {
    calls: Mutex<Vec<Vec<String>>>,
    responses: Mutex<HashMap<String, ControlOutput>>,
}

impl FakeControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the answer to a `systemctl` verb.
    pub fn respond(self, verb: &str, output: ControlOutput) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(verb.to_string(), output);
        self
    }

    /// Reports the app as active.
    pub fn active(self) -> Self {
        self.respond("is-active", ControlOutput::ok("active\n"))
    }

    /// Full argument vectors of every command run.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// `systemctl` arguments of every command run, space-joined.
    pub fn systemctl_calls(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|argv| {
                let pos = argv.iter().position(|a| a == SYSTEMCTL_BIN)?;
                Some(argv[pos + 1..].join(" "))
            })
            .collect()
    }
}

impl SupervisorControl for FakeControl {
    fn run(&self, argv: &[String]) -> stage1::Result<ControlOutput> {
        self.calls.lock().unwrap().push(argv.to_vec());
        let verb = argv
            .iter()
            .position(|a| a == SYSTEMCTL_BIN)
            .and_then(|pos| argv.get(pos + 1))
            .cloned()
            .unwrap_or_default();

        if let Some(output) = self.responses.lock().unwrap().get(&verb) {
            return Ok(output.clone());
        }
        Ok(match verb.as_str() {
            "is-active" => ControlOutput::failed(3, "inactive\n"),
            _ => ControlOutput::ok(""),
        })
    }
}
