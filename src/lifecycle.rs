//! # App Lifecycle Driver
//!
//! Adds, starts, stops and removes apps of a running pod. Each verb is one
//! process invocation: the pod is loaded fresh, the verb runs as a single
//! synchronous sequence, and any failure aborts it. Nothing is retried;
//! callers re-invoke.
//!
//! ## State Machine
//!
//! ```text
//!                add               start
//!   not-present ─────▶ prepared ─────────▶ running
//!        ▲                │  ▲               │
//!        │        rm      │  │ start         │ stop / exit
//!        └────────────────┘  │               ▼
//!        ▲                   └─────────── exited
//!        │                rm                 │
//!        └───────────────────────────────────┘
//! ```
//!
//! The state is observed, never stored:
//!
//! | Observation                                   | State       |
//! |-----------------------------------------------|-------------|
//! | no service unit file                          | not-present |
//! | `is-active`: active, activating, reloading... | running     |
//! | `is-active`: failed                           | exited      |
//! | `is-active`: inactive, status file present    | exited      |
//! | `is-active`: inactive, no status file         | prepared    |
//!
//! ## Supervisor Commands
//!
//! Every supervisor command runs inside the pod through [`EnterCommand`];
//! a non-zero exit is fatal to the verb.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::constants::{HALT_TARGET, SYSTEMCTL_BIN};
use crate::error::{Error, Result};
use crate::mount::{app_mounts, prepare_mountpoints};
use crate::pod::{InsecureOptions, Pod, PodPaths};
use crate::rootfs::find_bin_path;
use crate::supervisor::{ControlOutput, EnterCommand, SupervisorControl, SupervisorInfo};
use crate::units::{
    mount_unit_prefix, reaper_unit_name, service_unit_name, socket_unit_name, UnitOption,
    UnitWriter,
};

// =============================================================================
// App State
// =============================================================================

/// Externally observed state of an app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppState {
    NotPresent,
    Prepared,
    Running,
    Exited,
}

impl AppState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppState::NotPresent => "not-present",
            AppState::Prepared => "prepared",
            AppState::Running => "running",
            AppState::Exited => "exited",
        }
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of an app plus its exit code once it has exited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
    pub app: String,
    pub state: AppState,
    /// Exit code recorded by the reaper, if the app has exited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

// =============================================================================
// Driver
// =============================================================================

/// Drives app state transitions against a running pod.
pub struct LifecycleDriver<C, I> {
    pod: Pod,
    enter: EnterCommand,
    control: C,
    info: I,
    insecure: InsecureOptions,
}

impl<C: SupervisorControl, I: SupervisorInfo> LifecycleDriver<C, I> {
    pub fn new(pod: Pod, enter: EnterCommand, control: C, info: I) -> Self {
        Self {
            pod,
            enter,
            control,
            info,
            insecure: InsecureOptions::default(),
        }
    }

    /// Disables confinement features on top of the pod's own opt-outs.
    #[must_use]
    pub fn with_insecure_options(mut self, insecure: InsecureOptions) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn pod(&self) -> &Pod {
        &self.pod
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    // -------------------------------------------------------------------------
    // Supervisor commands
    // -------------------------------------------------------------------------

    fn systemctl(&self, args: &[&str]) -> Result<(String, ControlOutput)> {
        let mut cmd = vec![SYSTEMCTL_BIN.to_string()];
        cmd.extend(args.iter().map(|a| a.to_string()));
        let argv = self.enter.argv(&cmd);
        let output = self.control.run(&argv)?;
        Ok((argv.join(" "), output))
    }

    fn systemctl_checked(&self, args: &[&str]) -> Result<()> {
        let (command, output) = self.systemctl(args)?;
        if !output.success() {
            return Err(Error::SupervisorControlFailure {
                command,
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    /// Observes the state of an app.
    pub fn state(&self, app: &str) -> Result<AppState> {
        self.observe(app).map_err(|e| e.in_app(app))
    }

    fn observe(&self, app: &str) -> Result<AppState> {
        self.pod.runtime_app(app)?;
        let paths = self.pod.paths();
        let service = service_unit_name(app);
        if !paths.unit_file(&service).exists() {
            return Ok(AppState::NotPresent);
        }

        let (command, output) = self.systemctl(&["is-active", &service])?;
        let state = match output.stdout.trim() {
            "active" | "activating" | "deactivating" | "reloading" => AppState::Running,
            "failed" => AppState::Exited,
            // is-active exits 3 for units that are not active.
            _ if !matches!(output.status, Some(0) | Some(3)) => {
                return Err(Error::SupervisorControlFailure {
                    command,
                    status: output.status,
                    stderr: output.stderr.trim().to_string(),
                });
            }
            _ if paths.status_file(app).exists() => AppState::Exited,
            _ => AppState::Prepared,
        };
        debug!("App {} is {}", app, state);
        Ok(state)
    }

    /// Observes the state and exit code of an app.
    pub fn status(&self, app: &str) -> Result<AppStatus> {
        let state = self.state(app)?;
        let exit_code = match state {
            AppState::Exited => read_exit_code(&self.pod.paths().status_file(app))
                .map_err(|e| e.in_app(app))?,
            _ => None,
        };
        Ok(AppStatus {
            app: app.to_string(),
            state,
            exit_code,
        })
    }

    fn expect_state(&self, app: &str, allowed: &[AppState], expected: &str) -> Result<AppState> {
        let state = self.observe(app)?;
        if !allowed.contains(&state) {
            return Err(Error::InvalidAppState {
                app: app.to_string(),
                state: state.to_string(),
                expected: expected.to_string(),
            });
        }
        Ok(state)
    }

    // -------------------------------------------------------------------------
    // Verbs
    // -------------------------------------------------------------------------

    /// Prepares an app: mount points, units, environment; then reloads the
    /// supervisor. The app is left prepared, not started.
    pub fn add(&mut self, app: &str) -> Result<()> {
        self.try_add(app).map_err(|e| e.in_app(app))
    }

    fn try_add(&mut self, app: &str) -> Result<()> {
        self.expect_state(
            app,
            &[AppState::NotPresent, AppState::Prepared, AppState::Exited],
            "not running",
        )?;

        let paths = self.pod.paths().clone();
        let bin_path = find_bin_path(app, &paths.app_rootfs(app), self.pod.app(app)?)?;
        debug!("Binary of app {} is {}", app, bin_path);

        let mounts = app_mounts(&mut self.pod, app)?;
        prepare_mountpoints(&paths, app, &mounts, &self.pod.uid_range)?;

        if let Err(e) = self.generate_units(app, &bin_path) {
            warn!("Adding app {} failed, removing its generated files", app);
            if let Err(cleanup) = remove_app_files(&paths, app) {
                warn!("Cleanup of app {} incomplete: {}", app, cleanup);
            }
            return Err(e);
        }
        info!("Added app {} to pod {}", app, self.pod.uuid);
        Ok(())
    }

    /// Writes the units of an app and makes the supervisor load them.
    fn generate_units(&mut self, app: &str, bin_path: &str) -> Result<()> {
        let extra = [
            UnitOption::new("Unit", "Before", HALT_TARGET),
            UnitOption::new("Unit", "Conflicts", HALT_TARGET),
            UnitOption::new("Service", "StandardOutput", "journal+console"),
            UnitOption::new("Service", "StandardError", "journal+console"),
        ];
        let mut writer = UnitWriter::new(&mut self.pod, &self.info, self.insecure);
        writer.app_unit(app, bin_path, &extra);
        writer.app_reaper_unit(app, bin_path);
        writer.finish()?;

        self.systemctl_checked(&["daemon-reload"])
    }

    /// Starts a prepared or exited app.
    pub fn start(&self, app: &str) -> Result<()> {
        self.expect_state(
            app,
            &[AppState::Prepared, AppState::Exited],
            "prepared or exited",
        )
        .and_then(|_| self.systemctl_checked(&["start", &service_unit_name(app)]))
        .map_err(|e| e.in_app(app))?;
        info!("Started app {}", app);
        Ok(())
    }

    /// Stops a running app.
    pub fn stop(&self, app: &str) -> Result<()> {
        self.expect_state(app, &[AppState::Running], "running")
            .and_then(|_| self.systemctl_checked(&["stop", &service_unit_name(app)]))
            .map_err(|e| e.in_app(app))?;
        info!("Stopped app {}", app);
        Ok(())
    }

    /// Removes the units and generated files of an app that is not running,
    /// then reloads the supervisor.
    pub fn remove(&self, app: &str) -> Result<()> {
        self.try_remove(app).map_err(|e| e.in_app(app))
    }

    fn try_remove(&self, app: &str) -> Result<()> {
        if self.observe(app)? == AppState::Running {
            return Err(Error::AppStillRunning(app.to_string()));
        }

        remove_app_files(self.pod.paths(), app)?;

        self.systemctl_checked(&["daemon-reload"])?;
        info!("Removed app {} from pod {}", app, self.pod.uuid);
        Ok(())
    }
}

/// Files generated for an app.
fn app_files(paths: &PodPaths, app: &str) -> Result<Vec<PathBuf>> {
    let service = service_unit_name(app);
    let socket = socket_unit_name(app);
    let mut files = vec![
        paths.default_wants_dir().join(&service),
        paths.sockets_wants_dir().join(&socket),
        paths.unit_file(&service),
        paths.unit_file(&reaper_unit_name(app)),
        paths.unit_file(&socket),
        paths.env_file(app),
        paths.sysusers_file(app),
    ];

    let prefix = mount_unit_prefix(app);
    match fs::read_dir(paths.units_dir()) {
        Ok(entries) => {
            for entry in entries {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with(&prefix) && name.ends_with(".mount") {
                    files.push(entry.path());
                }
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::Io(e)),
    }
    Ok(files)
}

fn remove_app_files(paths: &PodPaths, app: &str) -> Result<()> {
    for path in app_files(paths, app)? {
        remove_if_exists(&path)?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::UnitWriteFailed {
            path: path.to_path_buf(),
            reason: format!("remove: {e}"),
        }),
    }
}

/// Reads the exit code recorded by the reaper.
fn read_exit_code(path: &Path) -> Result<Option<i32>> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(raw.trim().parse().ok()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}
