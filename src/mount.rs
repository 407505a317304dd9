//! # Mount Resolution
//!
//! Maps the volumes of a pod and the mount points of an app onto the list of
//! mounts the app actually gets.
//!
//! ## Resolution Order
//!
//! ```text
//!   RuntimeApp.mounts (explicit)          App.mountPoints
//!          │                                     │
//!          ▼                                     ▼
//!   kept verbatim, in order           covered by an explicit mount path?
//!                                          │ no
//!                                          ▼
//!                                   volume with the same name? ──yes──▶ bind
//!                                          │ no
//!                                          ▼
//!                                   synthesize `<app>-<mountpoint>`
//!                                   (empty, 0755, 0:0), push into pod volumes
//! ```
//!
//! The read-only flag of a mount comes from the volume when the volume sets
//! one, otherwise from the matching mount point.
//!
//! ## Preparation
//!
//! [`prepare_mountpoints`] creates the backing directory of every `empty`
//! volume under the shared volumes area. Volumes synthesized for images
//! converted from Docker images are first seeded with the image's own
//! content at the mount target, mirroring Docker data volume semantics.

use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::constants::{IMPLICIT_VOLUME_GID, IMPLICIT_VOLUME_MODE, IMPLICIT_VOLUME_UID};
use crate::error::{Error, Result};
use crate::fsutil::copy_tree;
use crate::pod::{Pod, PodPaths};
use crate::rootfs::resolve_in_root;
use crate::schema::{Mount, MountPoint, RuntimeApp, Volume, VolumeKind};
use crate::uid::UidRange;

/// A mount of a volume into an app, after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMount {
    /// Volume backing the mount.
    pub volume: Volume,
    /// Target path inside the app, as declared.
    pub path: String,
    /// Effective read-only flag.
    pub read_only: bool,
    /// Volume was synthesized for a Docker-converted image and is seeded
    /// from the image content at `path`.
    pub docker_implicit: bool,
}

impl ResolvedMount {
    /// Kind of the backing volume.
    pub fn kind(&self) -> Result<VolumeKind> {
        volume_kind(&self.volume)
    }

    /// Source of the mount as seen from inside stage1.
    ///
    /// Host volumes use their host path; empty volumes live in the shared
    /// volumes area.
    pub fn rel_source(&self) -> Result<String> {
        match self.kind()? {
            VolumeKind::Host => Ok(self.volume.source.clone().unwrap_or_default()),
            VolumeKind::Empty => Ok(PodPaths::rel_shared_volume(&self.volume.name)),
        }
    }

    /// Resolves the target inside `app_rootfs`, returning it relative to the
    /// rootfs.
    ///
    /// Escapes are reported as [`Error::PathEscapesRoot`]; any other failure
    /// becomes [`Error::MountError`].
    pub fn resolve_target(&self, app_rootfs: &Path) -> Result<PathBuf> {
        resolve_in_root(app_rootfs, &self.path).map_err(|e| match e {
            Error::PathEscapesRoot { .. } => e,
            other => Error::MountError {
                path: app_rootfs.join(self.path.trim_start_matches('/')),
                reason: other.to_string(),
            },
        })
    }
}

/// Validates the kind of a volume.
pub fn volume_kind(volume: &Volume) -> Result<VolumeKind> {
    volume.volume_kind().ok_or_else(|| Error::InvalidVolumeKind {
        volume: volume.name.clone(),
        kind: volume.kind.clone(),
    })
}

/// Read-only flag of an explicit mount: the volume's own flag wins,
/// otherwise the mount point named like the mount's volume reference decides.
fn is_read_only(volume: &Volume, mount: &Mount, mount_points: &[MountPoint]) -> bool {
    if let Some(ro) = volume.read_only {
        return ro;
    }
    mount_points
        .iter()
        .find(|mp| mp.name == mount.volume)
        .map(|mp| mp.read_only)
        .unwrap_or(false)
}

/// Computes the mounts of `ra`.
///
/// `volumes` is the pod volume set; implicit volumes are appended to it so
/// later stages see them. `docker_converted` marks the image as converted
/// from a Docker image, which makes implicit volumes seedable.
///
/// # Errors
///
/// - [`Error::VolumeNotFound`] when an explicit mount names an unknown volume
/// - [`Error::InvalidVolumeKind`] when a bound volume is neither host nor empty
pub fn generate_mounts(
    ra: &RuntimeApp,
    volumes: &mut Vec<Volume>,
    docker_converted: bool,
) -> Result<Vec<ResolvedMount>> {
    let mount_points: &[MountPoint] = ra
        .app
        .as_ref()
        .map(|app| app.mount_points.as_slice())
        .unwrap_or_default();

    let mut mounts = Vec::with_capacity(ra.mounts.len() + mount_points.len());

    for m in &ra.mounts {
        let volume = match &m.app_volume {
            Some(v) => v.clone(),
            None => volumes
                .iter()
                .find(|v| v.name == m.volume)
                .cloned()
                .ok_or_else(|| Error::VolumeNotFound(m.volume.clone()))?,
        };
        volume_kind(&volume)?;
        let read_only = is_read_only(&volume, m, mount_points);
        mounts.push(ResolvedMount {
            volume,
            path: m.path.clone(),
            read_only,
            docker_implicit: false,
        });
    }

    for mp in mount_points {
        if ra.mounts.iter().any(|m| m.path == mp.path) {
            continue;
        }

        let implicit_name = format!("{}-{}", ra.name, mp.name);
        let existing = volumes.iter().find(|v| v.name == mp.name).cloned();
        let synthesized = volumes.iter().find(|v| v.name == implicit_name).cloned();
        let (volume, docker_implicit) = match (existing, synthesized) {
            (Some(v), _) => (v, false),
            // Synthesized by an earlier resolution in this invocation.
            (None, Some(v)) => (v, docker_converted),
            (None, None) => {
                let name = implicit_name;
                warn!(
                    "App {} needs a volume for mount point {} at {}; creating implicit empty \
                     volume {} (it is removed together with the pod)",
                    ra.name, mp.name, mp.path, name
                );
                let v = Volume::empty(
                    name,
                    IMPLICIT_VOLUME_MODE,
                    IMPLICIT_VOLUME_UID,
                    IMPLICIT_VOLUME_GID,
                );
                volumes.push(v.clone());
                (v, docker_converted)
            }
        };
        volume_kind(&volume)?;

        let read_only = volume.read_only.unwrap_or(mp.read_only);
        mounts.push(ResolvedMount {
            volume,
            path: mp.path.clone(),
            read_only,
            docker_implicit,
        });
    }

    debug!("Resolved {} mounts for app {}", mounts.len(), ra.name);
    Ok(mounts)
}

/// Computes the mounts of a pod app, growing the pod's volume set.
pub fn app_mounts(pod: &mut Pod, app_name: &str) -> Result<Vec<ResolvedMount>> {
    let ra = pod.runtime_app(app_name)?.clone();
    let docker_converted = pod.image_manifest(app_name)?.is_docker_converted();
    generate_mounts(&ra, &mut pod.manifest.volumes, docker_converted)
}

// =============================================================================
// Mount Point Preparation
// =============================================================================

/// Creates the backing directories of the empty volumes of an app.
pub fn prepare_mountpoints(
    paths: &PodPaths,
    app_name: &str,
    mounts: &[ResolvedMount],
    uid_range: &UidRange,
) -> Result<()> {
    let app_rootfs = paths.app_rootfs(app_name);
    fs::create_dir_all(paths.shared_volumes_dir()).map_err(|e| Error::MountError {
        path: paths.shared_volumes_dir(),
        reason: e.to_string(),
    })?;

    for mount in mounts {
        if mount.kind()? != VolumeKind::Empty {
            continue;
        }
        let target = app_rootfs.join(mount.resolve_target(&app_rootfs)?);
        prepare_mountpoint(
            &paths.shared_volume(&mount.volume.name),
            &target,
            &mount.volume,
            mount.docker_implicit,
            uid_range,
        )?;
    }
    Ok(())
}

/// Creates the backing directory of one empty volume.
///
/// `target` is the host path of the mount target inside the app rootfs; it
/// is only read, for Docker-implicit seeding. An existing backing directory
/// keeps its content.
pub fn prepare_mountpoint(
    volume_path: &Path,
    target: &Path,
    volume: &Volume,
    docker_implicit: bool,
    uid_range: &UidRange,
) -> Result<()> {
    if volume_kind(volume)? != VolumeKind::Empty {
        return Ok(());
    }

    let mount_error = |reason: String| Error::MountError {
        path: volume_path.to_path_buf(),
        reason,
    };

    let mode_str = volume.mode.as_deref().unwrap_or(IMPLICIT_VOLUME_MODE);
    let mut mode = u32::from_str_radix(mode_str, 8)
        .map_err(|e| mount_error(format!("invalid mode {mode_str:?}: {e}")))?;
    let (mut uid, mut gid) = uid_range.shift_ids(
        volume.uid.unwrap_or(IMPLICIT_VOLUME_UID),
        volume.gid.unwrap_or(IMPLICIT_VOLUME_GID),
    )?;

    if volume_path.exists() {
        debug!("Volume directory {} already exists", volume_path.display());
    } else if docker_implicit {
        match fs::metadata(target) {
            Ok(meta) => {
                info!(
                    "Seeding volume {} from image content at {}",
                    volume.name,
                    target.display()
                );
                copy_tree(target, volume_path, uid_range)?;
                mode = meta.mode() & 0o7777;
                (uid, gid) = uid_range.remap_ids(meta.uid(), meta.gid())?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(mount_error(format!("stat {}: {e}", target.display()))),
        }
    }

    debug!("Creating empty volume directory {}", volume_path.display());
    fs::create_dir_all(volume_path).map_err(|e| mount_error(format!("create: {e}")))?;
    std::os::unix::fs::chown(volume_path, Some(uid), Some(gid))
        .map_err(|e| mount_error(format!("chown {uid}:{gid}: {e}")))?;
    fs::set_permissions(volume_path, fs::Permissions::from_mode(mode))
        .map_err(|e| mount_error(format!("chmod {mode:o}: {e}")))?;
    Ok(())
}
