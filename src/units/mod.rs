//! # Unit Generation
//!
//! Synthesizes the supervisor units that run an app inside the pod.
//!
//! ## Units per App
//!
//! ```text
//!   default.target.wants/web.service ──▶ web.service
//!                                          │ Wants/After
//!                                          ├──▶ reaper-web.service   (teardown on stop)
//!                                          │ Requires/After
//!                                          ├──▶ prepare-app@opt-stage2-web-rootfs.service
//!                                          ├──▶ sysusers.service
//!                                          └──▶ web.socket           (socket-activated ports only)
//!   sockets.target.wants/web.socket  ──▶ web.socket
//! ```
//!
//! Next to the units, the writer produces the app's environment file and a
//! `sysusers.d` fragment declaring its numeric user and groups.
//!
//! ## Error Handling
//!
//! [`UnitWriter`] remembers the first error and turns every later call into
//! a no-op, so generation reads as a straight sequence of steps followed by
//! a single [`UnitWriter::finish`]. Files written before the failure stay on
//! disk; the caller removes them.
//!
//! ## Idempotence
//!
//! Files are truncated and rewritten, wants symlinks replaced. Generating
//! the same app twice yields identical files.

mod app;
pub mod env;
pub mod exec;
mod kvm;
pub mod user;
mod writer;

pub use env::{compose_env, render_env, write_env_file, EnvFileFormat};
pub use exec::{quote_exec, unit_name_path_escape};
pub use user::{render_sysusers, resolve_id, IdKind};
pub use writer::UnitWriter;

use crate::constants::PREPARE_APP_TEMPLATE;
use crate::pod::PodPaths;

/// One `Name=Value` line of a unit file, in a section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOption {
    pub section: String,
    pub name: String,
    pub value: String,
}

impl UnitOption {
    pub fn new(section: &str, name: &str, value: impl Into<String>) -> Self {
        Self {
            section: section.to_string(),
            name: name.to_string(),
            value: value.into(),
        }
    }
}

/// Serializes options into unit file text.
///
/// Sections appear in the order they are first used; options keep their
/// relative order within a section. Sections are separated by a blank line.
pub fn serialize_unit(options: &[UnitOption]) -> String {
    let mut sections: Vec<(&str, Vec<&UnitOption>)> = Vec::new();
    for opt in options {
        match sections.iter_mut().find(|(name, _)| *name == opt.section) {
            Some((_, opts)) => opts.push(opt),
            None => sections.push((opt.section.as_str(), vec![opt])),
        }
    }

    let mut out = String::new();
    for (i, (section, opts)) in sections.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format!("[{section}]\n"));
        for opt in opts {
            out.push_str(&format!("{}={}\n", opt.name, opt.value));
        }
    }
    out
}

// =============================================================================
// Unit Names
// =============================================================================

pub fn service_unit_name(app: &str) -> String {
    format!("{app}.service")
}

pub fn reaper_unit_name(app: &str) -> String {
    format!("reaper-{app}.service")
}

pub fn socket_unit_name(app: &str) -> String {
    format!("{app}.socket")
}

/// Instance of the preparation template for an app.
pub fn prepare_app_unit_name(app: &str) -> String {
    format!(
        "{PREPARE_APP_TEMPLATE}{}.service",
        unit_name_path_escape(&PodPaths::rel_app_rootfs(app))
    )
}

/// Prefix shared by the mount units of an app (kvm flavor).
pub fn mount_unit_prefix(app: &str) -> String {
    format!("{}-", unit_name_path_escape(&PodPaths::rel_app_rootfs(app)))
}
