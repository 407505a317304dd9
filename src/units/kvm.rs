//! Mount units for the VM flavor.
//!
//! Inside a VM the supervisor performs the bind mounts itself, so every
//! mount of an app becomes a `.mount` unit ordered before the app service:
//!
//! ```text
//!   [Mount]
//!   What=/rkt/volumes/web-data
//!   Where=/opt/stage2/web/rootfs/data
//!   Type=none
//!   Options=bind,ro
//! ```

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use super::app::under_rootfs;
use super::exec::unit_name_path_escape;
use super::UnitOption;
use crate::error::{Error, Result};
use crate::mount::ResolvedMount;
use crate::pod::PodPaths;
use crate::rootfs::app_absolute;
use crate::schema::VolumeKind;

/// Mode of destination directories created inside the app rootfs.
const MOUNT_TARGET_MODE: u32 = 0o700;

/// A mount unit ready to be written.
pub(super) struct MountUnit {
    pub name: String,
    pub options: Vec<UnitOption>,
}

/// Builds the mount units of an app and creates their directories.
pub(super) fn mount_units(
    paths: &PodPaths,
    app_name: &str,
    service_name: &str,
    mounts: &[ResolvedMount],
) -> Result<Vec<MountUnit>> {
    let rel_rootfs = PodPaths::rel_app_rootfs(app_name);
    let app_rootfs = paths.app_rootfs(app_name);
    let stage1 = paths.stage1_rootfs();

    let mut units = Vec::with_capacity(mounts.len());
    for mount in mounts {
        let what = mount.rel_source()?;
        if mount.kind()? == VolumeKind::Empty {
            let dir = stage1.join(what.trim_start_matches('/'));
            create_dir(&dir, None)?;
        }

        let target = app_absolute(&mount.resolve_target(&app_rootfs)?);
        let where_ = under_rootfs(&rel_rootfs, &target);
        create_dir(&stage1.join(where_.trim_start_matches('/')), Some(MOUNT_TARGET_MODE))?;

        let mut mount_options = "bind".to_string();
        if mount.read_only {
            mount_options.push_str(",ro");
        }

        units.push(MountUnit {
            name: format!("{}.mount", unit_name_path_escape(&where_)),
            options: vec![
                UnitOption::new("Unit", "Description", format!("Mount for {where_}")),
                UnitOption::new("Unit", "DefaultDependencies", "false"),
                UnitOption::new("Unit", "Before", service_name),
                UnitOption::new("Mount", "What", what),
                UnitOption::new("Mount", "Where", where_.clone()),
                UnitOption::new("Mount", "Type", "none"),
                UnitOption::new("Mount", "Options", mount_options),
            ],
        });
    }
    Ok(units)
}

fn create_dir(dir: &Path, mode: Option<u32>) -> Result<()> {
    let mount_error = |e: std::io::Error| Error::MountError {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    };
    if dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(mount_error)?;
    if let Some(mode) = mode {
        fs::set_permissions(dir, fs::Permissions::from_mode(mode)).map_err(mount_error)?;
    }
    Ok(())
}
