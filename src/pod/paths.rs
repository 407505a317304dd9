//! Pod directory layout.
//!
//! Every on-disk location used by the compiler is derived here from the pod
//! root. "Relative" paths are stage1-absolute: they are what the supervisor
//! running inside the stage1 rootfs sees (e.g. `/opt/stage2/web/rootfs`).

use std::path::{Path, PathBuf};

use crate::constants::{
    APPS_INFO_DIR, DEFAULT_TARGET, ENV_DIR, FLAVOR_FILE, IMAGE_MANIFEST_FILE, POD_MANIFEST_FILE,
    POD_PID_FILE, RUNTIME_CONFIG_FILE, SHARED_VOLUMES_DIR, SOCKETS_TARGET, STAGE1_ROOTFS_DIR,
    STAGE2_DIR, STATUS_DIR, SUPERVISOR_VERSION_FILE, SYSUSERS_DIR, UNITS_DIR,
};

/// Path builder rooted at a pod directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodPaths {
    root: PathBuf,
}

impl PodPaths {
    /// Creates a path builder for the pod at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Pod root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // -------------------------------------------------------------------------
    // Pod-level files
    // -------------------------------------------------------------------------

    pub fn pod_manifest(&self) -> PathBuf {
        self.root.join(POD_MANIFEST_FILE)
    }

    pub fn runtime_config(&self) -> PathBuf {
        self.root.join(RUNTIME_CONFIG_FILE)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join(POD_PID_FILE)
    }

    pub fn image_manifest(&self, app: &str) -> PathBuf {
        self.root
            .join(APPS_INFO_DIR)
            .join(app)
            .join(IMAGE_MANIFEST_FILE)
    }

    // -------------------------------------------------------------------------
    // Stage1 rootfs
    // -------------------------------------------------------------------------

    pub fn stage1_rootfs(&self) -> PathBuf {
        self.root.join(STAGE1_ROOTFS_DIR)
    }

    pub fn flavor_link(&self) -> PathBuf {
        self.stage1_rootfs().join(FLAVOR_FILE)
    }

    pub fn supervisor_version_file(&self) -> PathBuf {
        self.stage1_rootfs().join(SUPERVISOR_VERSION_FILE)
    }

    /// App rootfs as seen from inside stage1.
    pub fn rel_app_rootfs(app: &str) -> String {
        format!("/{STAGE2_DIR}/{app}/rootfs")
    }

    /// App rootfs on the host.
    pub fn app_rootfs(&self, app: &str) -> PathBuf {
        self.stage1_rootfs().join(STAGE2_DIR).join(app).join("rootfs")
    }

    pub fn units_dir(&self) -> PathBuf {
        self.stage1_rootfs().join(UNITS_DIR)
    }

    pub fn unit_file(&self, unit_name: &str) -> PathBuf {
        self.units_dir().join(unit_name)
    }

    /// Wants directory of the default target.
    pub fn default_wants_dir(&self) -> PathBuf {
        self.units_dir().join(format!("{DEFAULT_TARGET}.wants"))
    }

    /// Wants directory of the sockets target.
    pub fn sockets_wants_dir(&self) -> PathBuf {
        self.units_dir().join(format!("{SOCKETS_TARGET}.wants"))
    }

    pub fn rel_env_file(app: &str) -> String {
        format!("/{ENV_DIR}/{app}")
    }

    pub fn env_file(&self, app: &str) -> PathBuf {
        self.stage1_rootfs().join(ENV_DIR).join(app)
    }

    pub fn rel_shared_volume(volume: &str) -> String {
        format!("/{SHARED_VOLUMES_DIR}/{volume}")
    }

    pub fn shared_volumes_dir(&self) -> PathBuf {
        self.stage1_rootfs().join(SHARED_VOLUMES_DIR)
    }

    pub fn shared_volume(&self, volume: &str) -> PathBuf {
        self.shared_volumes_dir().join(volume)
    }

    pub fn status_file(&self, app: &str) -> PathBuf {
        self.stage1_rootfs().join(STATUS_DIR).join(app)
    }

    pub fn sysusers_dir(&self) -> PathBuf {
        self.stage1_rootfs().join(SYSUSERS_DIR)
    }

    pub fn sysusers_file(&self, app: &str) -> PathBuf {
        self.sysusers_dir().join(format!("{app}.service.conf"))
    }
}
