//! Pod manifest types.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::image::{App, Label};
use super::isolator::Isolator;
use super::Annotation;

/// `acKind` of a pod manifest.
pub const POD_MANIFEST_KIND: &str = "PodManifest";

/// Declarative description of a pod: its apps, volumes and policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodManifest {
    #[serde(default)]
    pub ac_version: String,
    pub ac_kind: String,
    #[serde(default)]
    pub apps: Vec<RuntimeApp>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub isolators: Vec<Isolator>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub ports: Vec<ExposedPort>,
}

impl PodManifest {
    /// Parses and validates a pod manifest.
    pub fn from_json(bytes: &[u8]) -> Result<Self, String> {
        let manifest: PodManifest = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Checks kind and name uniqueness.
    pub fn validate(&self) -> Result<(), String> {
        if self.ac_kind != POD_MANIFEST_KIND {
            return Err(format!(
                "acKind must be {POD_MANIFEST_KIND:?}, got {:?}",
                self.ac_kind
            ));
        }

        let mut names = HashSet::new();
        for app in &self.apps {
            if app.name.is_empty() {
                return Err("app with empty name".to_string());
            }
            if !names.insert(app.name.as_str()) {
                return Err(format!("duplicate app name {:?}", app.name));
            }
            if let Some(spec) = &app.app {
                spec.validate()
                    .map_err(|e| format!("app {:?}: {e}", app.name))?;
            }
        }

        let mut names = HashSet::new();
        for volume in &self.volumes {
            if !names.insert(volume.name.as_str()) {
                return Err(format!("duplicate volume name {:?}", volume.name));
            }
        }
        Ok(())
    }

    /// Looks up a runtime app by name.
    pub fn app(&self, name: &str) -> Option<&RuntimeApp> {
        self.apps.iter().find(|a| a.name == name)
    }

    /// Host port assigned to an app port, if any.
    pub fn host_port(&self, port_name: &str) -> Option<u16> {
        self.ports
            .iter()
            .find(|p| p.name == port_name)
            .map(|p| p.host_port)
    }
}

/// One application's instantiation within a pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeApp {
    pub name: String,
    pub image: RuntimeImage,
    /// App override; inherited from the image manifest when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<App>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

/// Image reference of a runtime app.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub id: String,
    #[serde(default)]
    pub labels: Vec<Label>,
}

/// Explicit volume-to-path binding on a runtime app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mount {
    pub volume: String,
    pub path: String,
    /// Volume embedded directly in the mount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_volume: Option<Volume>,
}

/// Kind of backing store of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKind {
    /// Bind mount of a host path.
    Host,
    /// Fresh directory owned by the pod.
    Empty,
}

/// Named storage shared by the apps of a pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    /// `host` or `empty`; validated when the volume is used.
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recursive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

impl Volume {
    /// Builds an `empty` volume.
    pub fn empty(name: impl Into<String>, mode: &str, uid: u32, gid: u32) -> Self {
        Self {
            name: name.into(),
            kind: "empty".to_string(),
            source: None,
            read_only: None,
            recursive: None,
            mode: Some(mode.to_string()),
            uid: Some(uid),
            gid: Some(gid),
        }
    }

    /// Builds a `host` volume.
    pub fn host(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: "host".to_string(),
            source: Some(source.into()),
            read_only: None,
            recursive: None,
            mode: None,
            uid: None,
            gid: None,
        }
    }

    /// Parsed kind, or `None` if it is neither `host` nor `empty`.
    pub fn volume_kind(&self) -> Option<VolumeKind> {
        match self.kind.as_str() {
            "host" => Some(VolumeKind::Host),
            "empty" => Some(VolumeKind::Empty),
            _ => None,
        }
    }
}

/// Host port assigned to an app port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposedPort {
    pub name: String,
    pub host_port: u16,
    #[serde(default, rename = "hostIP", skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
}
