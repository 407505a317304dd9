//! Image manifest and app types.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::isolator::Isolator;
use super::Annotation;
use crate::constants::DOCKER_ORIGINAL_NAME_ANNOTATION;

/// `acKind` of an image manifest.
pub const IMAGE_MANIFEST_KIND: &str = "ImageManifest";

/// Image manifest materialized on disk for each app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub ac_kind: String,
    #[serde(default)]
    pub ac_version: String,
    pub name: String,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<App>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl ImageManifest {
    /// Parses and validates an image manifest.
    pub fn from_json(bytes: &[u8]) -> Result<Self, String> {
        let manifest: ImageManifest = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        if manifest.ac_kind != IMAGE_MANIFEST_KIND {
            return Err(format!(
                "acKind must be {IMAGE_MANIFEST_KIND:?}, got {:?}",
                manifest.ac_kind
            ));
        }
        if let Some(app) = &manifest.app {
            app.validate()?;
        }
        Ok(manifest)
    }

    /// Looks up an annotation value.
    pub fn annotation(&self, name: &str) -> Option<&str> {
        self.annotations
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Returns true if the image was converted from a Docker image.
    pub fn is_docker_converted(&self) -> bool {
        self.annotation(DOCKER_ORIGINAL_NAME_ANNOTATION).is_some()
    }
}

/// Image label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

/// Executable, identity and policy of an application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    #[serde(default)]
    pub exec: Vec<String>,
    /// `root`, numeric id, absolute path, or passwd name.
    #[serde(default)]
    pub user: String,
    /// `root`, numeric id, absolute path, or group name.
    #[serde(default)]
    pub group: String,
    #[serde(default, rename = "supplementaryGIDs")]
    pub supplementary_gids: Vec<u32>,
    #[serde(default)]
    pub event_handlers: Vec<EventHandler>,
    #[serde(default)]
    pub working_directory: String,
    #[serde(default)]
    pub environment: Vec<EnvironmentVariable>,
    #[serde(default)]
    pub isolators: Vec<Isolator>,
    #[serde(default)]
    pub mount_points: Vec<MountPoint>,
    #[serde(default)]
    pub ports: Vec<Port>,
}

impl App {
    /// Looks up a declared environment variable.
    pub fn env(&self, name: &str) -> Option<&str> {
        self.environment
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.as_str())
    }

    /// Checks the invariants a manifest must hold for this app.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for var in &self.environment {
            if var.name.is_empty() || var.name.contains('=') {
                return Err(format!("invalid environment variable name {:?}", var.name));
            }
            if !seen.insert(var.name.as_str()) {
                return Err(format!("duplicate environment variable {:?}", var.name));
            }
        }

        let mut seen = HashSet::new();
        for mp in &self.mount_points {
            if !seen.insert(mp.name.as_str()) {
                return Err(format!("duplicate mount point {:?}", mp.name));
            }
        }
        Ok(())
    }
}

/// Command run on an app lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHandler {
    /// `pre-start` or `post-stop`.
    pub name: String,
    pub exec: Vec<String>,
}

/// Declared environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

/// Location inside the app rootfs where a volume should be mounted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountPoint {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Port exposed by an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub name: String,
    pub protocol: String,
    pub port: u16,
    #[serde(default = "default_port_count")]
    pub count: u32,
    #[serde(default)]
    pub socket_activated: bool,
}

fn default_port_count() -> u32 {
    1
}
