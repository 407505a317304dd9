//! Confinement options of an app service unit.

use std::path::Path;

use tracing::debug;

use super::exec::quote_exec;
use super::UnitOption;
use crate::constants::{
    HIDDEN_DIRS, HIDDEN_PATHS, MIN_VERSION_PROTECT_KERNEL_TUNABLES, MIN_VERSION_SECCOMP_GROUPS,
    READ_ONLY_PATHS,
};
use crate::error::{Error, Result};
use crate::fsutil::is_device_node;
use crate::mount::ResolvedMount;
use crate::rootfs::app_absolute;
use crate::schema::{EventHandler, VolumeKind};

/// Joins an app-absolute path under the app's stage1-relative rootfs,
/// dropping any trailing slash.
pub(super) fn under_rootfs(rel_rootfs: &str, path: &str) -> String {
    let path = path.trim_matches('/');
    if path.is_empty() {
        rel_rootfs.to_string()
    } else {
        format!("{rel_rootfs}/{path}")
    }
}

/// Read-only and hidden `/proc` and `/sys` entries.
///
/// Every path is prefixed with `-` so entries missing on the host are
/// ignored by the supervisor.
pub(super) fn protect_kernel_tunables(rel_rootfs: &str, version: Option<u32>) -> Vec<UnitOption> {
    let mut opts = Vec::new();
    for p in READ_ONLY_PATHS {
        opts.push(UnitOption::new(
            "Service",
            "ReadOnlyDirectories",
            format!("-{}", under_rootfs(rel_rootfs, p)),
        ));
    }
    for p in HIDDEN_DIRS {
        opts.push(UnitOption::new(
            "Service",
            "InaccessibleDirectories",
            format!("-{}", under_rootfs(rel_rootfs, p)),
        ));
    }

    let version = version.unwrap_or(0);
    if version >= MIN_VERSION_SECCOMP_GROUPS {
        for p in HIDDEN_PATHS {
            opts.push(UnitOption::new(
                "Service",
                "InaccessiblePaths",
                format!("-{}", under_rootfs(rel_rootfs, p)),
            ));
        }
    }
    if version >= MIN_VERSION_PROTECT_KERNEL_TUNABLES {
        opts.push(UnitOption::new("Service", "ProtectKernelTunables", "true"));
    }
    opts
}

/// Read-write and read-only directory options for the mounts of an app.
pub(super) fn mount_directories(
    rel_rootfs: &str,
    app_rootfs: &Path,
    mounts: &[ResolvedMount],
) -> Result<Vec<UnitOption>> {
    let mut rw = Vec::new();
    let mut ro = Vec::new();
    for mount in mounts {
        let target = app_absolute(&mount.resolve_target(app_rootfs)?);
        let dir = under_rootfs(rel_rootfs, &target);
        if mount.read_only {
            ro.push(dir);
        } else {
            rw.push(dir);
        }
    }

    let mut opts = Vec::new();
    if !rw.is_empty() {
        opts.push(UnitOption::new("Service", "ReadWriteDirectories", rw.join(" ")));
    }
    if !ro.is_empty() {
        opts.push(UnitOption::new("Service", "ReadOnlyDirectories", ro.join(" ")));
    }
    Ok(opts)
}

/// `DeviceAllow=` entries for host volumes backed by device nodes.
pub(super) fn device_allows(
    rel_rootfs: &str,
    app_rootfs: &Path,
    mounts: &[ResolvedMount],
) -> Result<Vec<String>> {
    let mut allows = Vec::new();
    for mount in mounts {
        if mount.kind()? != VolumeKind::Host {
            continue;
        }
        let Some(source) = mount.volume.source.as_deref() else {
            continue;
        };
        if !is_device_node(Path::new(source)) {
            continue;
        }
        let mode = if mount.read_only { "r" } else { "rw" };
        let target = app_absolute(&mount.resolve_target(app_rootfs)?);
        debug!("Allowing device {} at {}", source, target);
        allows.push(format!("{} {mode}", under_rootfs(rel_rootfs, &target)));
    }
    Ok(allows)
}

/// `ExecStartPre=`/`ExecStopPost=` options of the event handlers.
pub(super) fn event_handlers(handlers: &[EventHandler]) -> Result<Vec<UnitOption>> {
    handlers
        .iter()
        .map(|eh| {
            let name = match eh.name.as_str() {
                "pre-start" => "ExecStartPre",
                "post-stop" => "ExecStopPost",
                other => return Err(Error::UnrecognizedEventHandler(other.to_string())),
            };
            Ok(UnitOption::new("Service", name, quote_exec(&eh.exec)))
        })
        .collect()
}
