//! Manifest schema consumed by the compiler.
//!
//! JSON field names follow the App Container conventions (camelCase,
//! `acKind`/`acVersion`). Parsing validates the invariants later stages rely
//! on: unique app names, unique volume names and unique environment keys.

mod image;
mod isolator;
mod pod;

use serde::{Deserialize, Serialize};

pub use image::{
    App, EnvironmentVariable, EventHandler, IMAGE_MANIFEST_KIND, ImageManifest, Label, MountPoint,
    Port,
};
pub use isolator::{
    CAPABILITIES_REMOVE_SET, CAPABILITIES_RETAIN_SET, CapabilitySet, Isolator, NO_NEW_PRIVILEGES,
    OOM_SCORE_ADJ, RESOURCE_CPU, RESOURCE_MEMORY, ResourceLimits, SECCOMP_REMOVE_SET,
    SECCOMP_RETAIN_SET, SeccompSet,
};
pub use pod::{
    ExposedPort, Mount, POD_MANIFEST_KIND, PodManifest, RuntimeApp, RuntimeImage, Volume,
    VolumeKind,
};

/// Free-form name/value metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    pub value: String,
}
