//! Error types for the stage1 compiler and lifecycle driver.

use std::path::PathBuf;

use crate::constants::{EXIT_FAILURE, EXIT_PRECONDITION_FAILED};

/// Result type alias for stage1 operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while compiling a pod into supervisor units or
/// while driving an app's lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Manifest Errors
    // =========================================================================
    /// A pod manifest, image manifest or runtime config could not be used.
    #[error("invalid manifest {path}: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },

    /// App is not part of the pod manifest.
    #[error("app not found in pod: {0}")]
    AppNotFound(String),

    /// App has no executable.
    #[error("app '{0}' has an empty exec (no binary to run)")]
    EmptyExec(String),

    // =========================================================================
    // Path Errors
    // =========================================================================
    /// Path resolution left the app rootfs. Security-critical, never retried.
    #[error("path {path:?} escapes app root{}", link_suffix(.target))]
    PathEscapesRoot {
        path: String,
        target: Option<String>,
    },

    /// Symlink chain too deep (or cyclic).
    #[error("too many levels of symbolic links resolving {0:?}")]
    TooManySymlinks(String),

    /// Binary could not be found inside the app rootfs.
    #[error("unable to find executable {binary:?} in {search_path:?}")]
    BinaryNotFound { binary: String, search_path: String },

    // =========================================================================
    // Mount Errors
    // =========================================================================
    /// Volume kind is neither `host` nor `empty`.
    #[error("volume '{volume}' has invalid kind '{kind}'")]
    InvalidVolumeKind { volume: String, kind: String },

    /// Explicit mount references a volume the pod does not define.
    #[error("could not find volume '{0}'")]
    VolumeNotFound(String),

    /// Preparing a mount point failed.
    #[error("mount error at {path}: {reason}")]
    MountError { path: PathBuf, reason: String },

    // =========================================================================
    // Isolator Errors
    // =========================================================================
    /// Capability isolators cannot be combined this way.
    #[error("conflicting capability isolators: {0}")]
    ConflictingCapabilityIsolators(String),

    /// Unknown Linux capability name.
    #[error("invalid capability: {0:?}")]
    InvalidCapability(String),

    /// More than one seccomp isolator on a single app.
    #[error("too many seccomp isolators specified (only one allowed per app)")]
    TooManySeccompIsolators,

    /// Seccomp group requires a newer supervisor.
    #[error("seccomp group {group:?} needs supervisor version >= {required}, found {}", version_label(.found))]
    UnsupportedSeccompGroup {
        group: String,
        required: u32,
        found: Option<u32>,
    },

    /// Isolator value could not be interpreted.
    #[error("invalid isolator '{name}': {reason}")]
    InvalidIsolator { name: String, reason: String },

    // =========================================================================
    // Unit Generation Errors
    // =========================================================================
    /// User or group could not be resolved to a numeric id.
    #[error("invalid user or group {value:?}: {reason}")]
    InvalidUserOrGroup { value: String, reason: String },

    /// Port protocol is neither tcp nor udp.
    #[error("unrecognized protocol {protocol:?} for port '{port}'")]
    UnrecognizedProtocol { port: String, protocol: String },

    /// Event handler name is neither pre-start nor post-stop.
    #[error("unrecognized event handler: {0:?}")]
    UnrecognizedEventHandler(String),

    /// Malformed `shift:count` user namespace range.
    #[error("invalid uid range: {0}")]
    InvalidUidRange(String),

    /// Writing a unit, env file or sysusers fragment failed.
    #[error("failed to write {path}: {reason}")]
    UnitWriteFailed { path: PathBuf, reason: String },

    // =========================================================================
    // Supervisor Errors
    // =========================================================================
    /// Supervisor control command exited non-zero (or could not be spawned).
    #[error("supervisor command `{command}` failed ({}): {stderr}", status_label(.status))]
    SupervisorControlFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// Supervisor metadata (flavor, version, enter command) is unavailable.
    #[error("supervisor unavailable: {0}")]
    SupervisorUnavailable(String),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// App is active and cannot be removed.
    #[error("app '{0}' is still running")]
    AppStillRunning(String),

    /// App is in the wrong state for the requested transition.
    #[error("app '{app}' is in state '{state}', expected '{expected}'")]
    InvalidAppState {
        app: String,
        state: String,
        expected: String,
    },

    // =========================================================================
    // Context
    // =========================================================================
    /// Error raised while processing a specific app.
    #[error("app '{app}': {source}")]
    App {
        app: String,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Wraps the error with the name of the app being processed.
    ///
    /// Already-wrapped errors for the same app are left alone so the chain
    /// does not repeat the app name.
    #[must_use]
    pub fn in_app(self, app: &str) -> Self {
        if let Error::App { app: inner, .. } = &self {
            if inner == app {
                return self;
            }
        }
        Error::App {
            app: app.to_string(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping app context wrappers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::App { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Process exit code a CLI should use for this error.
    ///
    /// Supervisor failures propagate the child's own status; lifecycle
    /// precondition violations use a fixed code.
    pub fn exit_code(&self) -> u8 {
        match self.root_cause() {
            Error::SupervisorControlFailure {
                status: Some(code), ..
            } if (1..=255).contains(code) => *code as u8,
            Error::AppNotFound(_) | Error::AppStillRunning(_) | Error::InvalidAppState { .. } => {
                EXIT_PRECONDITION_FAILED
            }
            _ => EXIT_FAILURE,
        }
    }
}

fn link_suffix(target: &Option<String>) -> String {
    match target {
        Some(t) => format!(" via symlink target {t:?}"),
        None => String::new(),
    }
}

fn version_label(found: &Option<u32>) -> String {
    match found {
        Some(v) => format!("v{v}"),
        None => "unknown version".to_string(),
    }
}

fn status_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal or not spawned".to_string(),
    }
}
