//! Seccomp filter compilation.
//!
//! An app carries at most one seccomp isolator. Its set mixes plain syscall
//! names and `@scope/name` wildcards:
//!
//! | Wildcard                    | Meaning                                 |
//! |-----------------------------|-----------------------------------------|
//! | `@appc.io/all` (retain)     | no filtering at all                     |
//! | `@appc.io/empty` (remove)   | runtime default whitelist, rest ignored |
//! | `@docker/default-*`         | Docker-compatible lists                 |
//! | `@rkt/default-*`            | runtime default lists                   |
//! | `@systemd/<group>`          | supervisor groups, version >= 231       |
//!
//! Unknown wildcards are skipped. Without any seccomp isolator the runtime
//! default whitelist applies.

use tracing::debug;

use super::syscalls::{
    DOCKER_DEFAULT_BLACKLIST, DOCKER_DEFAULT_WHITELIST, RKT_DEFAULT_BLACKLIST,
    RKT_DEFAULT_WHITELIST, SYSTEMD_GROUPS,
};
use crate::constants::MIN_VERSION_SECCOMP_GROUPS;
use crate::error::{Error, Result};
use crate::schema::{Isolator, SeccompSet, SECCOMP_RETAIN_SET};
use crate::supervisor::SupervisorInfo;

/// Whether the listed syscalls are allowed or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// Only the listed syscalls are allowed.
    Whitelist,
    /// The listed syscalls are denied.
    Blacklist,
}

/// Effective syscall filter of an app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeccompFilter {
    pub mode: FilterMode,
    /// Syscall names and supervisor groups, deduplicated, in first-seen order.
    pub syscalls: Vec<String>,
    /// Errno returned by denied syscalls, instead of killing the process.
    pub errno: Option<String>,
    /// `no_new_privs` must be set for the filter to be installable.
    pub force_no_new_privileges: bool,
}

impl SeccompFilter {
    /// Value of the `SystemCallFilter=` unit option.
    pub fn to_unit_value(&self) -> String {
        let list = self.syscalls.join(" ");
        match self.mode {
            FilterMode::Whitelist => list,
            FilterMode::Blacklist => format!("~{list}"),
        }
    }

    fn default_whitelist(errno: Option<String>) -> Self {
        Self {
            mode: FilterMode::Whitelist,
            syscalls: RKT_DEFAULT_WHITELIST.iter().map(|s| s.to_string()).collect(),
            errno,
            force_no_new_privileges: false,
        }
    }
}

/// Compiles the seccomp filter of an app.
///
/// `unprivileged` is true when the app does not run as root; installing a
/// filter then requires `no_new_privs`.
///
/// Returns `Ok(None)` when the app opted out of filtering.
///
/// # Errors
///
/// - [`Error::TooManySeccompIsolators`] for a second seccomp isolator
/// - [`Error::UnsupportedSeccompGroup`] for `@systemd/*` on an old supervisor
/// - [`Error::InvalidIsolator`] for a whitelist that ends up empty
pub fn compile_seccomp_filter(
    isolators: &[Isolator],
    info: &dyn SupervisorInfo,
    unprivileged: bool,
) -> Result<Option<SeccompFilter>> {
    let mut selected: Option<(FilterMode, &SeccompSet)> = None;
    for isolator in isolators {
        let candidate = match isolator {
            Isolator::SeccompRetain(set) => (FilterMode::Whitelist, set),
            Isolator::SeccompRemove(set) => (FilterMode::Blacklist, set),
            _ => continue,
        };
        if selected.replace(candidate).is_some() {
            return Err(Error::TooManySeccompIsolators);
        }
    }

    let mut filter = match selected {
        None => SeccompFilter::default_whitelist(None),
        Some((mode, set)) => match expand_set(mode, set, info)? {
            Some(filter) => filter,
            None => {
                debug!("Seccomp filtering disabled by @appc.io/all");
                return Ok(None);
            }
        },
    };

    filter.force_no_new_privileges = unprivileged;
    debug!(
        "Seccomp {:?} filter with {} entries",
        filter.mode,
        filter.syscalls.len()
    );
    Ok(Some(filter))
}

/// Expands one isolator set. `None` means "no filter".
fn expand_set(
    mode: FilterMode,
    set: &SeccompSet,
    info: &dyn SupervisorInfo,
) -> Result<Option<SeccompFilter>> {
    let mut syscalls: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        if !syscalls.iter().any(|s| s == name) {
            syscalls.push(name.to_string());
        }
    };
    // Fetched on the first @systemd group only.
    let mut version: Option<Option<u32>> = None;

    for item in &set.set {
        let Some(wildcard) = item.strip_prefix('@') else {
            push(item.as_str());
            continue;
        };
        let Some((scope, name)) = wildcard.split_once('/') else {
            debug!("Skipping malformed seccomp wildcard {}", item);
            continue;
        };

        match (scope, name) {
            ("appc.io", "all") if mode == FilterMode::Whitelist => return Ok(None),
            ("appc.io", "empty") if mode == FilterMode::Blacklist => {
                debug!("Seccomp remove-set opts into the default whitelist");
                return Ok(Some(SeccompFilter::default_whitelist(set.errno.clone())));
            }
            ("appc.io", "empty") => {}
            ("docker", "default-blacklist") => DOCKER_DEFAULT_BLACKLIST.iter().for_each(|s| push(s)),
            ("docker", "default-whitelist") => DOCKER_DEFAULT_WHITELIST.iter().for_each(|s| push(s)),
            ("rkt", "default-blacklist") => RKT_DEFAULT_BLACKLIST.iter().for_each(|s| push(s)),
            ("rkt", "default-whitelist") => RKT_DEFAULT_WHITELIST.iter().for_each(|s| push(s)),
            ("systemd", group) => {
                let Some((_, supervisor_group)) = SYSTEMD_GROUPS.iter().find(|(n, _)| *n == group)
                else {
                    debug!("Skipping unknown supervisor group {}", item);
                    continue;
                };
                let found = *version.get_or_insert_with(|| info.version().ok());
                match found {
                    Some(v) if v >= MIN_VERSION_SECCOMP_GROUPS => push(supervisor_group),
                    _ => {
                        return Err(Error::UnsupportedSeccompGroup {
                            group: item.clone(),
                            required: MIN_VERSION_SECCOMP_GROUPS,
                            found,
                        });
                    }
                }
            }
            _ => debug!("Skipping unknown seccomp wildcard {}", item),
        }
    }

    if syscalls.is_empty() {
        return match mode {
            // A blacklist of nothing also falls back to the default whitelist.
            FilterMode::Blacklist => Ok(Some(SeccompFilter::default_whitelist(set.errno.clone()))),
            FilterMode::Whitelist => Err(Error::InvalidIsolator {
                name: SECCOMP_RETAIN_SET.to_string(),
                reason: "whitelist allows no syscalls".to_string(),
            }),
        };
    }

    Ok(Some(SeccompFilter {
        mode,
        syscalls,
        errno: set.errno.clone(),
        force_no_new_privileges: false,
    }))
}
