//! # Pod - Persisted Pod State
//!
//! A [`Pod`] is the in-memory view of a pod directory: its identity, the pod
//! manifest, the image manifest of every app and the runtime parameters the
//! pod was started with.
//!
//! ## Lifetime
//!
//! ```text
//!   lifecycle verb starts
//!          │
//!          ▼
//!   Pod::load(root, uuid) ──▶ read runtime-config, pod, appsinfo/*/manifest
//!          │
//!          ▼
//!   UnitWriter / LifecycleDriver (may add implicit volumes in memory)
//!          │
//!          ▼
//!   process exits, Pod dropped
//! ```
//!
//! Every add/start/stop/rm invocation loads the pod fresh; nothing is
//! written back to the manifests. Volumes synthesized while resolving mounts
//! only live for the duration of the invocation.
//!
//! ## Defaults Applied on Load
//!
//! - A runtime app without an `app` section inherits the image's app.
//! - An empty working directory becomes `/`.

mod config;
mod paths;

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::constants::MAX_MANIFEST_SIZE;
use crate::error::{Error, Result};
use crate::schema::{App, ImageManifest, PodManifest, RuntimeApp};
use crate::uid::UidRange;

pub use config::{InsecureOptions, RuntimePod};
pub use paths::PodPaths;

/// A pod loaded from its directory.
#[derive(Debug, Clone)]
pub struct Pod {
    /// Pod identity.
    pub uuid: Uuid,
    /// Pod manifest; volumes may grow while mounts are resolved.
    pub manifest: PodManifest,
    /// Image manifest per app name.
    pub images: HashMap<String, ImageManifest>,
    /// Runtime parameters.
    pub config: RuntimePod,
    /// User namespace shift of the pod.
    pub uid_range: UidRange,
    paths: PodPaths,
}

impl Pod {
    /// Loads the pod stored at `root`.
    ///
    /// # Errors
    ///
    /// - Runtime config, pod manifest or an image manifest is unreadable or
    ///   malformed
    /// - `privateUsers` is not a valid `shift:count`
    /// - An app has neither its own nor an inherited `app` section
    pub fn load(root: impl Into<PathBuf>, uuid: Uuid) -> Result<Self> {
        let paths = PodPaths::new(root);

        let config_path = paths.runtime_config();
        let config: RuntimePod = if config_path.exists() {
            let raw = read_bounded(&config_path)?;
            serde_json::from_slice(&raw).map_err(|e| Error::InvalidManifest {
                path: config_path.clone(),
                reason: e.to_string(),
            })?
        } else {
            debug!("No runtime config at {}, using defaults", config_path.display());
            RuntimePod::default()
        };
        let uid_range = UidRange::deserialize(config.private_users.as_bytes())?;

        let manifest_path = paths.pod_manifest();
        let raw = read_bounded(&manifest_path)?;
        let manifest =
            PodManifest::from_json(&raw).map_err(|reason| Error::InvalidManifest {
                path: manifest_path.clone(),
                reason,
            })?;

        Self::from_parts(paths, uuid, manifest, config, uid_range)
    }

    /// Builds a pod from an already-parsed manifest, reading image manifests
    /// from the pod directory.
    pub fn from_parts(
        paths: PodPaths,
        uuid: Uuid,
        mut manifest: PodManifest,
        config: RuntimePod,
        uid_range: UidRange,
    ) -> Result<Self> {
        let mut images = HashMap::new();

        for ra in &mut manifest.apps {
            let image_path = paths.image_manifest(&ra.name);
            let raw = read_bounded(&image_path)?;
            let image =
                ImageManifest::from_json(&raw).map_err(|reason| Error::InvalidManifest {
                    path: image_path.clone(),
                    reason,
                })?;

            if ra.app.is_none() {
                ra.app = image.app.clone();
            }
            let app = ra.app.as_mut().ok_or_else(|| Error::InvalidManifest {
                path: image_path.clone(),
                reason: format!("app '{}' has no app section", ra.name),
            })?;
            if app.working_directory.is_empty() {
                app.working_directory = "/".to_string();
            }

            debug!("Loaded image manifest {} for app {}", image.name, ra.name);
            images.insert(ra.name.clone(), image);
        }

        Ok(Self {
            uuid,
            manifest,
            images,
            config,
            uid_range,
            paths,
        })
    }

    /// Directory layout of this pod.
    pub fn paths(&self) -> &PodPaths {
        &self.paths
    }

    /// Pod root directory.
    pub fn root(&self) -> &Path {
        self.paths.root()
    }

    /// Looks up a runtime app.
    pub fn runtime_app(&self, name: &str) -> Result<&RuntimeApp> {
        self.manifest
            .app(name)
            .ok_or_else(|| Error::AppNotFound(name.to_string()))
    }

    /// Effective app spec of a runtime app.
    pub fn app(&self, name: &str) -> Result<&App> {
        self.runtime_app(name)?
            .app
            .as_ref()
            .ok_or_else(|| Error::AppNotFound(name.to_string()))
    }

    /// Image manifest of an app.
    pub fn image_manifest(&self, name: &str) -> Result<&ImageManifest> {
        self.images
            .get(name)
            .ok_or_else(|| Error::AppNotFound(name.to_string()))
    }

    /// Image name of an app, for unit descriptions.
    pub fn image_name(&self, name: &str) -> String {
        self.images
            .get(name)
            .map(|im| im.name.clone())
            .unwrap_or_default()
    }

    /// Metadata service URL, if the pod has one.
    pub fn metadata_url(&self) -> Option<&str> {
        let url = self.config.metadata_service_url.as_str();
        (!url.is_empty()).then_some(url)
    }

    /// Networks the pod is attached to.
    pub fn networks(&self) -> &[String] {
        &self.config.net_list
    }
}

/// Reads a manifest-sized file, refusing anything larger than
/// `MAX_MANIFEST_SIZE`.
fn read_bounded(path: &Path) -> Result<Vec<u8>> {
    let file = fs::File::open(path).map_err(|e| Error::InvalidManifest {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut buf = Vec::new();
    file.take(MAX_MANIFEST_SIZE + 1)
        .read_to_end(&mut buf)
        .map_err(|e| Error::InvalidManifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if buf.len() as u64 > MAX_MANIFEST_SIZE {
        return Err(Error::InvalidManifest {
            path: path.to_path_buf(),
            reason: format!("larger than {MAX_MANIFEST_SIZE} bytes"),
        });
    }
    Ok(buf)
}
