//! Capability bounding set resolution.
//!
//! | Isolators present        | Bounding set                    |
//! |--------------------------|---------------------------------|
//! | none                     | default set                     |
//! | retain-set               | exactly the listed capabilities |
//! | remove-set               | default set minus the listed    |
//! | retain-set + remove-set  | error                           |

use tracing::debug;

use crate::constants::{ALL_CAPABILITIES, DEFAULT_CAPABILITIES};
use crate::error::{Error, Result};
use crate::schema::{CapabilitySet, Isolator};

/// Computes the bounding set from `isolators` and the built-in default set.
pub fn resolve_capabilities(isolators: &[Isolator]) -> Result<Vec<String>> {
    resolve_capabilities_with(isolators, DEFAULT_CAPABILITIES)
}

/// Computes the bounding set from `isolators` and an explicit default set.
///
/// The result keeps the order of the retain list (or of `defaults` for a
/// remove list) and holds no duplicates.
pub fn resolve_capabilities_with(isolators: &[Isolator], defaults: &[&str]) -> Result<Vec<String>> {
    let mut retain: Option<&CapabilitySet> = None;
    let mut remove: Option<&CapabilitySet> = None;

    for isolator in isolators {
        match isolator {
            Isolator::CapabilitiesRetain(set) => {
                if retain.replace(set).is_some() {
                    return Err(Error::ConflictingCapabilityIsolators(
                        "more than one retain-set isolator".to_string(),
                    ));
                }
            }
            Isolator::CapabilitiesRemove(set) => {
                if remove.replace(set).is_some() {
                    return Err(Error::ConflictingCapabilityIsolators(
                        "more than one remove-set isolator".to_string(),
                    ));
                }
            }
            _ => {}
        }
    }

    let caps = match (retain, remove) {
        (Some(_), Some(_)) => {
            return Err(Error::ConflictingCapabilityIsolators(
                "retain-set and remove-set cannot be combined".to_string(),
            ));
        }
        (Some(retain), None) => {
            let mut caps: Vec<String> = Vec::with_capacity(retain.set.len());
            for name in &retain.set {
                let cap = normalize_capability(name)?;
                if !caps.contains(&cap) {
                    caps.push(cap);
                }
            }
            caps
        }
        (None, Some(remove)) => {
            let removed = remove
                .set
                .iter()
                .map(|name| normalize_capability(name))
                .collect::<Result<Vec<_>>>()?;
            let mut caps: Vec<String> = Vec::with_capacity(defaults.len());
            for cap in defaults {
                let cap = cap.to_string();
                if !removed.contains(&cap) && !caps.contains(&cap) {
                    caps.push(cap);
                }
            }
            caps
        }
        (None, None) => defaults.iter().map(|c| c.to_string()).collect(),
    };

    debug!("Capability bounding set: {}", caps.join(" "));
    Ok(caps)
}

/// Canonical `CAP_*` form of a capability name.
///
/// Accepts any case, with or without the `CAP_` prefix.
pub fn normalize_capability(name: &str) -> Result<String> {
    let upper = name.trim().to_ascii_uppercase();
    let canonical = if upper.starts_with("CAP_") {
        upper
    } else {
        format!("CAP_{upper}")
    };
    if ALL_CAPABILITIES.contains(&canonical.as_str()) {
        Ok(canonical)
    } else {
        Err(Error::InvalidCapability(name.to_string()))
    }
}
