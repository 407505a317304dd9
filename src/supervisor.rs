//! # Supervisor Collaborators
//!
//! The compiler never implements process supervision. It needs two narrow
//! things from the supervisor running as the pod's init:
//!
//! - [`SupervisorInfo`]: which supervisor build is there (version, flavor),
//!   to gate features the supervisor may not understand.
//! - [`SupervisorControl`]: a way to run its control command (`systemctl`)
//!   *inside* the pod's namespaces, through the enter primitive.
//!
//! ```text
//!   LifecycleDriver
//!        │ argv = ["systemctl", "start", "web.service"]
//!        ▼
//!   EnterCommand::argv ──▶ [enter, --pid=4242, --, systemctl, start, web.service]
//!        │
//!        ▼
//!   SupervisorControl::run ──▶ ControlOutput { status, stdout, stderr }
//! ```
//!
//! Both are traits so tests can substitute in-memory fakes.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

use crate::constants::{ENV_ENTER_CMD, ENV_ENTER_PID};
use crate::error::{Error, Result};
use crate::pod::PodPaths;

// =============================================================================
// Supervisor Metadata
// =============================================================================

/// Build variant of the stage1 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flavor {
    /// Supervisor shipped with the stage1 image.
    Coreos,
    /// Supervisor built from source.
    Src,
    /// Host supervisor reused inside the pod.
    Host,
    /// Pod runs inside a lightweight VM.
    Kvm,
    /// Any other flavor name.
    Other(String),
}

impl Flavor {
    /// Parses a flavor name.
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "coreos" => Flavor::Coreos,
            "src" => Flavor::Src,
            "host" => Flavor::Host,
            "kvm" => Flavor::Kvm,
            other => Flavor::Other(other.to_string()),
        }
    }

    /// Returns true for the VM-based flavor.
    pub fn is_kvm(&self) -> bool {
        matches!(self, Flavor::Kvm)
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flavor::Coreos => write!(f, "coreos"),
            Flavor::Src => write!(f, "src"),
            Flavor::Host => write!(f, "host"),
            Flavor::Kvm => write!(f, "kvm"),
            Flavor::Other(name) => write!(f, "{name}"),
        }
    }
}

/// Read-only facts about the supervisor.
pub trait SupervisorInfo {
    /// Major version of the supervisor (e.g. `231`).
    fn version(&self) -> Result<u32>;

    /// Flavor of the stage1 image.
    fn flavor(&self) -> Result<Flavor>;
}

/// Supervisor facts read from the stage1 rootfs of a pod.
#[derive(Debug, Clone)]
pub struct Stage1Info {
    paths: PodPaths,
}

impl Stage1Info {
    /// Reads facts from the pod at `paths`.
    pub fn new(paths: PodPaths) -> Self {
        Self { paths }
    }
}

impl SupervisorInfo for Stage1Info {
    fn version(&self) -> Result<u32> {
        let path = self.paths.supervisor_version_file();
        let raw = fs::read_to_string(&path).map_err(|e| {
            Error::SupervisorUnavailable(format!("reading {}: {e}", path.display()))
        })?;
        parse_version(&raw)
    }

    fn flavor(&self) -> Result<Flavor> {
        let path = self.paths.flavor_link();
        let target = fs::read_link(&path).map_err(|e| {
            Error::SupervisorUnavailable(format!("reading flavor link {}: {e}", path.display()))
        })?;
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| target.to_string_lossy().into_owned());
        Ok(Flavor::parse(&name))
    }
}

/// Fixed supervisor facts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticSupervisorInfo {
    /// Version, or `None` when unknown.
    pub version: Option<u32>,
    /// Flavor of the stage1 image.
    pub flavor: Flavor,
}

impl StaticSupervisorInfo {
    pub fn new(version: u32, flavor: Flavor) -> Self {
        Self {
            version: Some(version),
            flavor,
        }
    }
}

impl SupervisorInfo for StaticSupervisorInfo {
    fn version(&self) -> Result<u32> {
        self.version
            .ok_or_else(|| Error::SupervisorUnavailable("version unknown".to_string()))
    }

    fn flavor(&self) -> Result<Flavor> {
        Ok(self.flavor.clone())
    }
}

/// Parses `v231`, `231` or `231.4-2` into the major version.
pub fn parse_version(raw: &str) -> Result<u32> {
    let trimmed = raw.trim();
    let digits: String = trimmed
        .trim_start_matches('v')
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits
        .parse()
        .map_err(|_| Error::SupervisorUnavailable(format!("unparsable version {trimmed:?}")))
}

// =============================================================================
// Enter Primitive
// =============================================================================

/// How to run a command inside the namespaces of a running pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnterCommand {
    /// Path of the namespace-entry binary.
    pub entrypoint: PathBuf,
    /// Pid of the pod's init process.
    pub pid: i32,
}

impl EnterCommand {
    pub fn new(entrypoint: impl Into<PathBuf>, pid: i32) -> Self {
        Self {
            entrypoint: entrypoint.into(),
            pid,
        }
    }

    /// Reads the enter primitive from the process environment, falling back
    /// to the pod's pid file for the pid.
    pub fn from_env(paths: &PodPaths) -> Result<Self> {
        Self::from_vars(
            std::env::var(ENV_ENTER_CMD).ok(),
            std::env::var(ENV_ENTER_PID).ok(),
            paths,
        )
    }

    /// Builds the enter primitive from raw variable values.
    pub fn from_vars(
        entrypoint: Option<String>,
        pid: Option<String>,
        paths: &PodPaths,
    ) -> Result<Self> {
        let entrypoint = entrypoint.filter(|e| !e.is_empty()).ok_or_else(|| {
            Error::SupervisorUnavailable(format!("{ENV_ENTER_CMD} is not set"))
        })?;

        let pid = match pid.filter(|p| !p.is_empty()) {
            Some(pid) => pid,
            None => {
                let path = paths.pid_file();
                fs::read_to_string(&path).map_err(|e| {
                    Error::SupervisorUnavailable(format!(
                        "{ENV_ENTER_PID} is not set and {} is unreadable: {e}",
                        path.display()
                    ))
                })?
            }
        };
        let pid = pid
            .trim()
            .parse::<i32>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| Error::SupervisorUnavailable(format!("invalid pod pid {pid:?}")))?;

        Ok(Self::new(entrypoint, pid))
    }

    /// Argument vector running `cmd` inside the pod.
    pub fn argv(&self, cmd: &[String]) -> Vec<String> {
        let mut argv = Vec::with_capacity(cmd.len() + 3);
        argv.push(self.entrypoint.to_string_lossy().into_owned());
        argv.push(format!("--pid={}", self.pid));
        argv.push("--".to_string());
        argv.extend(cmd.iter().cloned());
        argv
    }
}

// =============================================================================
// Supervisor Control
// =============================================================================

/// Captured result of a control command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlOutput {
    /// Exit status, `None` if killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ControlOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given status and stdout.
    pub fn failed(status: i32, stdout: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs supervisor control commands.
///
/// Implementations run the full argument vector as given, wait for it and
/// report its status. A non-zero status is *not* an error at this level;
/// callers decide (e.g. `is-active` exits 3 for inactive units).
pub trait SupervisorControl {
    fn run(&self, argv: &[String]) -> Result<ControlOutput>;
}

/// Runs control commands as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessControl;

impl SupervisorControl for ProcessControl {
    fn run(&self, argv: &[String]) -> Result<ControlOutput> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            Error::SupervisorUnavailable("empty control command".to_string())
        })?;
        debug!("Running {}", argv.join(" "));

        let output = Command::new(program).args(args).output().map_err(|e| {
            Error::SupervisorControlFailure {
                command: argv.join(" "),
                status: None,
                stderr: e.to_string(),
            }
        })?;

        Ok(ControlOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("v231\n").unwrap(), 231);
        assert_eq!(parse_version("233").unwrap(), 233);
        assert_eq!(parse_version("229.4-2").unwrap(), 229);
        assert!(parse_version("systemd").is_err());
    }

    #[test]
    fn test_enter_argv() {
        let enter = EnterCommand::new("/enter", 42);
        let argv = enter.argv(&["/usr/bin/systemctl".to_string(), "daemon-reload".to_string()]);
        assert_eq!(
            argv,
            vec!["/enter", "--pid=42", "--", "/usr/bin/systemctl", "daemon-reload"]
        );
    }

    #[test]
    fn test_flavor_parse() {
        assert_eq!(Flavor::parse("kvm"), Flavor::Kvm);
        assert!(Flavor::parse("kvm").is_kvm());
        assert_eq!(Flavor::parse("fly"), Flavor::Other("fly".to_string()));
    }
}
