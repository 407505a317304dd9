//! Runtime parameters of a pod.
//!
//! Stored as JSON next to the pod manifest by whoever launched the pod.
//! Every field has a default, so a missing or partial file is valid.

use serde::{Deserialize, Serialize};

/// Runtime parameters persisted at pod start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimePod {
    /// Verbose logging.
    pub debug: bool,
    /// Apps may be added and removed after the pod started.
    pub mutable: bool,
    /// User namespace range as `shift:count`, empty for none.
    pub private_users: String,
    /// Metadata service endpoint exported to apps.
    #[serde(rename = "metadataServiceURL")]
    pub metadata_service_url: String,
    /// Networks the pod is attached to.
    pub net_list: Vec<String>,
    /// Confinement features switched off for this pod.
    pub insecure_options: InsecureOptions,
}

/// Named opt-outs of confinement features.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InsecureOptions {
    /// No `/proc`/`/sys` restrictions and no device policy.
    pub disable_paths: bool,
    /// No capability bounding set.
    pub disable_capabilities: bool,
    /// No seccomp filter.
    pub disable_seccomp: bool,
}

impl InsecureOptions {
    /// Union of two sets of opt-outs.
    #[must_use]
    pub fn merge(self, other: InsecureOptions) -> Self {
        Self {
            disable_paths: self.disable_paths || other.disable_paths,
            disable_capabilities: self.disable_capabilities || other.disable_capabilities,
            disable_seccomp: self.disable_seccomp || other.disable_seccomp,
        }
    }
}
