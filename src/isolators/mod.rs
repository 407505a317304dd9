//! # Isolator Resolution
//!
//! Folds the isolators of an app into the concrete confinement the unit
//! generator writes out:
//!
//! - [`capabilities`]: the capability bounding set
//! - [`seccomp`]: the syscall filter
//! - [`resources`]: CPU, memory and OOM score values
//!
//! Isolator kinds a resolver does not act on are skipped, never rejected.
//! Default tables are immutable constants passed by reference.

pub mod capabilities;
pub mod resources;
pub mod seccomp;
pub mod syscalls;

use crate::schema::Isolator;

pub use capabilities::{normalize_capability, resolve_capabilities, resolve_capabilities_with};
pub use resources::{parse_quantity_milli, resource_options};
pub use seccomp::{compile_seccomp_filter, FilterMode, SeccompFilter};

/// Value of the app's own no-new-privileges isolator, if any.
pub fn no_new_privileges(isolators: &[Isolator]) -> bool {
    isolators
        .iter()
        .any(|i| matches!(i, Isolator::NoNewPrivileges(true)))
}
