//! Isolator types.
//!
//! On the wire an isolator is `{"name": "...", "value": ...}` where the shape
//! of `value` depends on `name`. Here it is a sum type with one case per
//! isolator this crate acts on; everything else is kept as
//! [`Isolator::Unknown`] and skipped by the resolvers.

use serde::{Deserialize, Serialize};

// =============================================================================
// Isolator Names
// =============================================================================

/// CPU request/limit.
pub const RESOURCE_CPU: &str = "resource/cpu";
/// Memory request/limit.
pub const RESOURCE_MEMORY: &str = "resource/memory";
/// Capabilities to keep in the bounding set.
pub const CAPABILITIES_RETAIN_SET: &str = "os/linux/capabilities-retain-set";
/// Capabilities to drop from the default bounding set.
pub const CAPABILITIES_REMOVE_SET: &str = "os/linux/capabilities-remove-set";
/// Seccomp whitelist.
pub const SECCOMP_RETAIN_SET: &str = "os/linux/seccomp-retain-set";
/// Seccomp blacklist.
pub const SECCOMP_REMOVE_SET: &str = "os/linux/seccomp-remove-set";
/// `no_new_privs` process flag.
pub const NO_NEW_PRIVILEGES: &str = "os/linux/no-new-privileges";
/// OOM killer score adjustment.
pub const OOM_SCORE_ADJ: &str = "os/linux/oom-score-adj";

/// Valid range of the OOM score adjustment.
const OOM_SCORE_ADJ_RANGE: std::ops::RangeInclusive<i32> = -1000..=1000;

// =============================================================================
// Isolator Values
// =============================================================================

/// Request and limit of a resource isolator, as quantity strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
}

/// Set of capability names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    #[serde(default)]
    pub set: Vec<String>,
}

/// Set of syscall names or wildcards, with an optional errno override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeccompSet {
    #[serde(default)]
    pub set: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errno: Option<String>,
}

/// A named policy attached to an app or pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawIsolator", into = "RawIsolator")]
pub enum Isolator {
    ResourceCpu(ResourceLimits),
    ResourceMemory(ResourceLimits),
    CapabilitiesRetain(CapabilitySet),
    CapabilitiesRemove(CapabilitySet),
    SeccompRetain(SeccompSet),
    SeccompRemove(SeccompSet),
    NoNewPrivileges(bool),
    OomScoreAdj(i32),
    /// Isolator kind this crate does not act on.
    Unknown {
        name: String,
        value: serde_json::Value,
    },
}

impl Isolator {
    /// Wire name of the isolator.
    pub fn name(&self) -> &str {
        match self {
            Isolator::ResourceCpu(_) => RESOURCE_CPU,
            Isolator::ResourceMemory(_) => RESOURCE_MEMORY,
            Isolator::CapabilitiesRetain(_) => CAPABILITIES_RETAIN_SET,
            Isolator::CapabilitiesRemove(_) => CAPABILITIES_REMOVE_SET,
            Isolator::SeccompRetain(_) => SECCOMP_RETAIN_SET,
            Isolator::SeccompRemove(_) => SECCOMP_REMOVE_SET,
            Isolator::NoNewPrivileges(_) => NO_NEW_PRIVILEGES,
            Isolator::OomScoreAdj(_) => OOM_SCORE_ADJ,
            Isolator::Unknown { name, .. } => name,
        }
    }
}

// =============================================================================
// Wire Form
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawIsolator {
    name: String,
    #[serde(default)]
    value: serde_json::Value,
}

fn value_of<T: serde::de::DeserializeOwned>(
    name: &str,
    value: serde_json::Value,
) -> Result<T, String> {
    serde_json::from_value(value).map_err(|e| format!("isolator {name:?}: {e}"))
}

impl TryFrom<RawIsolator> for Isolator {
    type Error = String;

    fn try_from(raw: RawIsolator) -> Result<Self, Self::Error> {
        let RawIsolator { name, value } = raw;
        let isolator = match name.as_str() {
            RESOURCE_CPU => Isolator::ResourceCpu(value_of(&name, value)?),
            RESOURCE_MEMORY => Isolator::ResourceMemory(value_of(&name, value)?),
            CAPABILITIES_RETAIN_SET => Isolator::CapabilitiesRetain(value_of(&name, value)?),
            CAPABILITIES_REMOVE_SET => Isolator::CapabilitiesRemove(value_of(&name, value)?),
            SECCOMP_RETAIN_SET | SECCOMP_REMOVE_SET => {
                let set: SeccompSet = value_of(&name, value)?;
                if let Some(errno) = &set.errno {
                    validate_errno(errno).map_err(|e| format!("isolator {name:?}: {e}"))?;
                }
                if name == SECCOMP_RETAIN_SET {
                    Isolator::SeccompRetain(set)
                } else {
                    Isolator::SeccompRemove(set)
                }
            }
            NO_NEW_PRIVILEGES => Isolator::NoNewPrivileges(value_of(&name, value)?),
            OOM_SCORE_ADJ => {
                let adj: i32 = value_of(&name, value)?;
                if !OOM_SCORE_ADJ_RANGE.contains(&adj) {
                    return Err(format!("isolator {name:?}: {adj} outside of -1000..1000"));
                }
                Isolator::OomScoreAdj(adj)
            }
            _ => Isolator::Unknown { name, value },
        };
        Ok(isolator)
    }
}

impl From<Isolator> for RawIsolator {
    fn from(isolator: Isolator) -> Self {
        let name = isolator.name().to_string();
        let value = match isolator {
            Isolator::ResourceCpu(v) | Isolator::ResourceMemory(v) => serde_json::to_value(v),
            Isolator::CapabilitiesRetain(v) | Isolator::CapabilitiesRemove(v) => {
                serde_json::to_value(v)
            }
            Isolator::SeccompRetain(v) | Isolator::SeccompRemove(v) => serde_json::to_value(v),
            Isolator::NoNewPrivileges(v) => serde_json::to_value(v),
            Isolator::OomScoreAdj(v) => serde_json::to_value(v),
            Isolator::Unknown { value, .. } => Ok(value),
        }
        .unwrap_or(serde_json::Value::Null);
        RawIsolator { name, value }
    }
}

/// Errno overrides are symbolic names such as `ENOSYS`.
fn validate_errno(errno: &str) -> Result<(), String> {
    let valid = errno.len() > 1
        && errno.starts_with('E')
        && errno
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(format!("invalid errno {errno:?}"))
    }
}
