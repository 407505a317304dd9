//! # stage1
//!
//! **Pod-to-Sandbox Compiler and App Lifecycle Driver**
//!
//! This crate turns a declarative pod (a pod manifest plus one image manifest
//! per app) into the supervisor units that run each app confined inside the
//! pod, and drives apps through their lifecycle once the pod is running. It
//! never supervises processes itself: a systemd-compatible supervisor running
//! as the pod's init does that, reached through a namespace-entry primitive.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                             stage1                                  │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │                    LifecycleDriver                          │    │
//! │  │         add(app) → start(app) → stop(app) → remove(app)     │    │
//! │  │                       status(app)                           │    │
//! │  └─────────────────────────────────────────────────────────────┘    │
//! │                              │                                      │
//! │  ┌───────────────────────────┼───────────────────────────────┐      │
//! │  │                    UnitWriter                             │      │
//! │  │  service │ reaper │ socket │ mount units │ env │ sysusers │      │
//! │  └───────────────────────────┼───────────────────────────────┘      │
//! │                              │                                      │
//! │  ┌──────────────┐  ┌─────────┴──────┐  ┌──────────────────────┐     │
//! │  │ MountResolver│  │ Capability Set │  │ Seccomp Compiler     │     │
//! │  │ + Prepare    │  │   Resolver     │  │ (version-gated)      │     │
//! │  └──────┬───────┘  └────────────────┘  └──────────────────────┘     │
//! │         │                                                           │
//! │  ┌──────┴──────────────────────────────────────────────────────┐    │
//! │  │          SymlinkResolver (contained in the app rootfs)      │    │
//! │  └─────────────────────────────────────────────────────────────┘    │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │   SupervisorInfo (version, flavor) │ SupervisorControl (systemctl)  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # App Lifecycle
//!
//! ```text
//!   ┌─────────────┐   add    ┌──────────┐  start   ┌─────────┐
//!   │ not-present │ ───────► │ prepared │ ───────► │ running │
//!   └─────────────┘          └──────────┘          └────┬────┘
//!          ▲                      │ rm                  │ stop / exit
//!          │◄─────────────────────┘                     ▼
//!          │                rm                     ┌────────┐
//!          └────────────────────────────────────── │ exited │ ── start ──► running
//!                                                  └────────┘
//! ```
//!
//! # Security Model
//!
//! - **Rootfs containment**: every path taken from a manifest is resolved
//!   inside the app rootfs, symlink by symlink; anything escaping it fails
//!   with [`Error::PathEscapesRoot`] (see [`rootfs::resolve_in_root`]).
//! - **Least privilege by default**: apps get a fixed capability bounding
//!   set and a syscall whitelist unless their isolators say otherwise.
//! - **Kernel tunables**: `/proc` and `/sys` are read-only or hidden and the
//!   device policy is closed, except for host device volumes.
//! - **Bounded reads**: manifests larger than `MAX_MANIFEST_SIZE` are refused.
//!
//! # Example
//!
//! ```rust,ignore
//! use stage1::{EnterCommand, LifecycleDriver, Pod, ProcessControl, Stage1Info};
//!
//! fn main() -> stage1::Result<()> {
//!     let pod = Pod::load("/var/lib/pods/6733c88a", uuid)?;
//!     let paths = pod.paths().clone();
//!     let enter = EnterCommand::from_env(&paths)?;
//!     let mut driver = LifecycleDriver::new(pod, enter, ProcessControl, Stage1Info::new(paths));
//!     driver.add("web")?;
//!     driver.start("web")?;
//!     Ok(())
//! }
//! ```

pub mod constants;
pub mod error;
pub mod fsutil;
pub mod isolators;
pub mod lifecycle;
pub mod mount;
pub mod pod;
pub mod rootfs;
pub mod schema;
pub mod supervisor;
pub mod uid;
pub mod units;

// Re-exports
pub use constants::*;
pub use error::{Error, Result};
pub use isolators::{compile_seccomp_filter, resolve_capabilities, FilterMode, SeccompFilter};
pub use lifecycle::{AppState, AppStatus, LifecycleDriver};
pub use mount::{generate_mounts, prepare_mountpoints, ResolvedMount};
pub use pod::{InsecureOptions, Pod, PodPaths, RuntimePod};
pub use rootfs::{find_bin_path, resolve_in_root};
pub use supervisor::{
    ControlOutput, EnterCommand, Flavor, ProcessControl, Stage1Info, StaticSupervisorInfo,
    SupervisorControl, SupervisorInfo,
};
pub use uid::UidRange;
pub use units::{UnitOption, UnitWriter};
