//! # Stage1 Constants
//!
//! Paths, unit names, default policies and version gates shared by the
//! compiler and the lifecycle driver. These constants are the **single
//! source of truth** for the pod directory layout and for the default
//! confinement applied to apps that do not ask for anything specific.
//!
//! ## Layout
//!
//! ```text
//! <pod>/
//! ├── pod                         pod manifest
//! ├── runtime-config              runtime parameters (JSON)
//! ├── pid                         pid of the pod's init
//! ├── appsinfo/<app>/manifest     image manifest per app
//! └── stage1/rootfs/
//!     ├── flavor                  symlink naming the stage1 flavor
//!     ├── systemd-version         supervisor version ("v231")
//!     ├── opt/stage2/<app>/rootfs app root filesystems
//!     ├── usr/lib/systemd/system  generated units
//!     ├── usr/lib/sysusers.d      generated user database fragments
//!     └── rkt/{env,volumes,status}
//! ```
//!
//! ## Cross-References
//!
//! - [`crate::pod::PodPaths`]: builds absolute paths from these components
//! - [`crate::isolators`]: default capability set and seccomp version gate
//! - [`crate::units`]: unit names and environment defaults

// =============================================================================
// Pod Layout
// =============================================================================

/// Pod manifest, relative to the pod root.
pub const POD_MANIFEST_FILE: &str = "pod";

/// Runtime configuration, relative to the pod root.
pub const RUNTIME_CONFIG_FILE: &str = "runtime-config";

/// File holding the pid of the pod's init process.
pub const POD_PID_FILE: &str = "pid";

/// Directory holding per-app image manifests.
pub const APPS_INFO_DIR: &str = "appsinfo";

/// Image manifest file name inside an app's info directory.
pub const IMAGE_MANIFEST_FILE: &str = "manifest";

/// Stage1 root filesystem, relative to the pod root.
pub const STAGE1_ROOTFS_DIR: &str = "stage1/rootfs";

/// Parent of all app root filesystems, relative to the stage1 rootfs.
pub const STAGE2_DIR: &str = "opt/stage2";

/// Supervisor unit directory, relative to the stage1 rootfs.
pub const UNITS_DIR: &str = "usr/lib/systemd/system";

/// sysusers.d directory, relative to the stage1 rootfs.
pub const SYSUSERS_DIR: &str = "usr/lib/sysusers.d";

/// Environment files, relative to the stage1 rootfs.
pub const ENV_DIR: &str = "rkt/env";

/// Shared volume backing directories, relative to the stage1 rootfs.
pub const SHARED_VOLUMES_DIR: &str = "rkt/volumes";

/// Per-app exit status files written by the reaper.
pub const STATUS_DIR: &str = "rkt/status";

/// Flavor symlink inside the stage1 rootfs.
pub const FLAVOR_FILE: &str = "flavor";

/// Supervisor version file inside the stage1 rootfs.
pub const SUPERVISOR_VERSION_FILE: &str = "systemd-version";

/// Teardown script run by reaper units (stage1-absolute).
pub const REAPER_SCRIPT: &str = "/reaper.sh";

/// Supervisor control binary inside the stage1 rootfs.
pub const SYSTEMCTL_BIN: &str = "/usr/bin/systemctl";

// =============================================================================
// Unit Names
// =============================================================================

/// Target whose wants directory activates app services.
pub const DEFAULT_TARGET: &str = "default.target";

/// Target whose wants directory activates app sockets.
pub const SOCKETS_TARGET: &str = "sockets.target";

/// Target isolated when an app fails.
pub const HALT_TARGET: &str = "halt.target";

/// Targets the reaper must conflict with.
pub const REAPER_CONFLICTS: &[&str] = &["exit.target", "halt.target", "poweroff.target"];

/// User database generation unit every app depends on.
pub const SYSUSERS_SERVICE: &str = "sysusers.service";

/// Template of the per-app preparation unit.
pub const PREPARE_APP_TEMPLATE: &str = "prepare-app@";

// =============================================================================
// Environment
// =============================================================================

/// Default `PATH` for apps and for binary lookup.
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Environment defaults applied when an app does not set them.
pub const DEFAULT_ENV: &[(&str, &str)] = &[
    ("PATH", DEFAULT_PATH),
    ("SHELL", "/bin/sh"),
    ("USER", "root"),
    ("LOGNAME", "root"),
    ("HOME", "/root"),
];

/// Injected app name variable.
pub const ENV_APP_NAME: &str = "AC_APP_NAME";

/// Injected metadata service URL variable.
pub const ENV_METADATA_URL: &str = "AC_METADATA_URL";

/// Variable naming the namespace-entry binary.
pub const ENV_ENTER_CMD: &str = "STAGE1_ENTERCMD";

/// Variable naming the pid of the pod's init.
pub const ENV_ENTER_PID: &str = "STAGE1_ENTERPID";

// =============================================================================
// Image Annotations
// =============================================================================

/// Annotation present on images converted from Docker images.
pub const DOCKER_ORIGINAL_NAME_ANNOTATION: &str = "appc.io/docker/originalname";

// =============================================================================
// Volumes
// =============================================================================

/// Mode of implicitly created empty volumes.
pub const IMPLICIT_VOLUME_MODE: &str = "0755";

/// Owner uid of implicitly created empty volumes.
pub const IMPLICIT_VOLUME_UID: u32 = 0;

/// Owner gid of implicitly created empty volumes.
pub const IMPLICIT_VOLUME_GID: u32 = 0;

// =============================================================================
// Capabilities
// =============================================================================

/// Bounding set applied when an app carries no capability isolator.
pub const DEFAULT_CAPABILITIES: &[&str] = &[
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_FOWNER",
    "CAP_FSETID",
    "CAP_KILL",
    "CAP_MKNOD",
    "CAP_NET_RAW",
    "CAP_NET_BIND_SERVICE",
    "CAP_SETUID",
    "CAP_SETGID",
    "CAP_SETPCAP",
    "CAP_SETFCAP",
    "CAP_SYS_CHROOT",
    "CAP_AUDIT_WRITE",
];

/// Every Linux capability name accepted in isolators.
pub const ALL_CAPABILITIES: &[&str] = &[
    "CAP_AUDIT_CONTROL",
    "CAP_AUDIT_READ",
    "CAP_AUDIT_WRITE",
    "CAP_BLOCK_SUSPEND",
    "CAP_BPF",
    "CAP_CHECKPOINT_RESTORE",
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_DAC_READ_SEARCH",
    "CAP_FOWNER",
    "CAP_FSETID",
    "CAP_IPC_LOCK",
    "CAP_IPC_OWNER",
    "CAP_KILL",
    "CAP_LEASE",
    "CAP_LINUX_IMMUTABLE",
    "CAP_MAC_ADMIN",
    "CAP_MAC_OVERRIDE",
    "CAP_MKNOD",
    "CAP_NET_ADMIN",
    "CAP_NET_BIND_SERVICE",
    "CAP_NET_BROADCAST",
    "CAP_NET_RAW",
    "CAP_PERFMON",
    "CAP_SETFCAP",
    "CAP_SETGID",
    "CAP_SETPCAP",
    "CAP_SETUID",
    "CAP_SYSLOG",
    "CAP_SYS_ADMIN",
    "CAP_SYS_BOOT",
    "CAP_SYS_CHROOT",
    "CAP_SYS_MODULE",
    "CAP_SYS_NICE",
    "CAP_SYS_PACCT",
    "CAP_SYS_PTRACE",
    "CAP_SYS_RAWIO",
    "CAP_SYS_RESOURCE",
    "CAP_SYS_TIME",
    "CAP_SYS_TTY_CONFIG",
    "CAP_WAKE_ALARM",
];

// =============================================================================
// Supervisor Version Gates
// =============================================================================

/// Minimum supervisor version for `@systemd/*` seccomp groups and
/// `InaccessiblePaths=`.
pub const MIN_VERSION_SECCOMP_GROUPS: u32 = 231;

/// Minimum supervisor version for `ProtectKernelTunables=`.
pub const MIN_VERSION_PROTECT_KERNEL_TUNABLES: u32 = 233;

// =============================================================================
// Kernel Tunable Protection
// =============================================================================

/// Paths made read-only inside every app.
pub const READ_ONLY_PATHS: &[&str] = &[
    "/proc/bus/",
    "/proc/sys/kernel/core_pattern",
    "/proc/sys/kernel/modprobe",
    "/proc/sys/vm/panic_on_oom",
    "/proc/sysrq-trigger",
    "/sys/block/",
    "/sys/bus/",
    "/sys/class/",
    "/sys/dev/",
    "/sys/devices/",
    "/sys/kernel/",
];

/// Directories hidden from every app.
pub const HIDDEN_DIRS: &[&str] = &[
    "/sys/firmware/",
    "/sys/fs/",
    "/sys/hypervisor/",
    "/sys/module/",
    "/sys/power/",
];

/// Files hidden from every app (supervisor >= 231).
pub const HIDDEN_PATHS: &[&str] = &[
    "/proc/config.gz",
    "/proc/kallsyms",
    "/proc/sched_debug",
    "/proc/kcore",
    "/proc/kmem",
    "/proc/mem",
];

// =============================================================================
// Limits
// =============================================================================

/// Maximum symlink hops followed while resolving a path in an app rootfs.
pub const MAX_SYMLINK_HOPS: usize = 40;

/// Maximum size of a manifest read from disk (1 MiB).
pub const MAX_MANIFEST_SIZE: u64 = 1024 * 1024;

// =============================================================================
// Exit Codes
// =============================================================================

/// Successful lifecycle verb.
pub const EXIT_SUCCESS: u8 = 0;

/// Generic failure.
pub const EXIT_FAILURE: u8 = 1;

/// Lifecycle precondition failed (unknown app, app still running, ...).
pub const EXIT_PRECONDITION_FAILED: u8 = 2;
