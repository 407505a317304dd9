//! First-error-wins unit writer.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use tracing::{debug, warn};

use super::app::{device_allows, event_handlers, mount_directories, protect_kernel_tunables};
use super::env::{compose_env, write_env_file, EnvFileFormat};
use super::exec::quote_exec;
use super::kvm::mount_units;
use super::user::{resolve_id, write_sysusers, IdKind};
use super::{
    prepare_app_unit_name, reaper_unit_name, serialize_unit, service_unit_name,
    socket_unit_name, UnitOption,
};
use crate::constants::{HALT_TARGET, REAPER_CONFLICTS, REAPER_SCRIPT, SYSUSERS_SERVICE};
use crate::error::{Error, Result};
use crate::isolators::{
    compile_seccomp_filter, no_new_privileges, resolve_capabilities, resource_options,
};
use crate::mount::app_mounts;
use crate::pod::{InsecureOptions, Pod, PodPaths};
use crate::supervisor::SupervisorInfo;

/// Writes the units of the apps of a pod.
///
/// Every method is a no-op once an error has been recorded; the first error
/// is returned by [`UnitWriter::finish`].
pub struct UnitWriter<'a> {
    pod: &'a mut Pod,
    info: &'a dyn SupervisorInfo,
    insecure: InsecureOptions,
    err: Option<Error>,
}

impl<'a> UnitWriter<'a> {
    /// Creates a writer for `pod`.
    ///
    /// `insecure` is merged with the pod's own insecure options.
    pub fn new(pod: &'a mut Pod, info: &'a dyn SupervisorInfo, insecure: InsecureOptions) -> Self {
        let insecure = insecure.merge(pod.config.insecure_options);
        Self {
            pod,
            info,
            insecure,
            err: None,
        }
    }

    /// First recorded error, if any.
    pub fn error(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    /// Ends the writer, returning the first recorded error.
    pub fn finish(self) -> Result<()> {
        match self.err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn step(&mut self, app: Option<&str>, f: impl FnOnce(&mut Self) -> Result<()>) {
        if self.err.is_some() {
            return;
        }
        if let Err(e) = f(self) {
            self.err = Some(match app {
                Some(app) => e.in_app(app),
                None => e,
            });
        }
    }

    // =========================================================================
    // Files
    // =========================================================================

    /// Writes a unit file, replacing any previous content.
    pub fn write_unit(&mut self, path: &Path, options: &[UnitOption]) {
        self.step(None, |w| w.try_write_unit(path, options));
    }

    fn try_write_unit(&mut self, path: &Path, options: &[UnitOption]) -> Result<()> {
        let write_error = |e: io::Error| Error::UnitWriteFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(write_error)?;
        }
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(path)
            .map_err(write_error)?;
        file.write_all(serialize_unit(options).as_bytes())
            .map_err(write_error)?;
        debug!("Wrote unit {}", path.display());

        self.pod.uid_range.shift_files(&[path])
    }

    /// Links `unit_name` into a wants directory.
    pub fn activate(&mut self, unit_name: &str, wants_dir: &Path) {
        self.step(None, |_| activate_unit(unit_name, wants_dir));
    }

    // =========================================================================
    // App Units
    // =========================================================================

    /// Writes the service unit of an app, with its environment file, user
    /// database fragment and, when needed, socket and mount units.
    ///
    /// `bin_path` is the app binary inside its rootfs; `extra` options are
    /// appended to the service unit.
    pub fn app_unit(&mut self, app_name: &str, bin_path: &str, extra: &[UnitOption]) {
        self.step(Some(app_name), |w| w.try_app_unit(app_name, bin_path, extra));
    }

    fn try_app_unit(&mut self, app_name: &str, bin_path: &str, extra: &[UnitOption]) -> Result<()> {
        let app = self.pod.app(app_name)?.clone();
        if app.exec.is_empty() {
            return Err(Error::EmptyExec(app_name.to_string()));
        }
        let paths = self.pod.paths().clone();
        let uid_range = self.pod.uid_range;
        let image_name = self.pod.image_name(app_name);
        let rel_rootfs = PodPaths::rel_app_rootfs(app_name);
        let app_rootfs = paths.app_rootfs(app_name);
        let service_name = service_unit_name(app_name);

        let env = compose_env(app_name, &app, self.pod.metadata_url());
        write_env_file(&paths.env_file(app_name), &env, EnvFileFormat::Newline, &uid_range)?;

        let uid = resolve_id(&app_rootfs, &app.user, IdKind::User, &uid_range)?;
        let gid = resolve_id(&app_rootfs, &app.group, IdKind::Group, &uid_range)?;
        write_sysusers(
            &paths.sysusers_file(app_name),
            uid,
            gid,
            &app.supplementary_gids,
            &uid_range,
        )?;

        let capabilities = resolve_capabilities(&app.isolators)?;
        let mounts = app_mounts(self.pod, app_name)?;
        let flavor = self.info.flavor()?;
        let version = self.info.version().ok();

        let mut exec_start = vec![bin_path.to_string()];
        exec_start.extend(app.exec.iter().skip(1).cloned());

        let prepare_app = prepare_app_unit_name(app_name);
        let reaper = reaper_unit_name(app_name);
        let mut opts = vec![
            UnitOption::new(
                "Unit",
                "Description",
                format!("Application={app_name} Image={image_name}"),
            ),
            UnitOption::new("Unit", "DefaultDependencies", "false"),
            UnitOption::new("Unit", "Wants", reaper.clone()),
            UnitOption::new("Unit", "After", reaper),
            UnitOption::new("Unit", "Requires", prepare_app.clone()),
            UnitOption::new("Unit", "After", prepare_app),
            UnitOption::new("Unit", "Requires", SYSUSERS_SERVICE),
            UnitOption::new("Unit", "After", SYSUSERS_SERVICE),
            UnitOption::new("Unit", "OnFailure", HALT_TARGET),
            UnitOption::new("Unit", "OnFailureJobMode", "isolate"),
            UnitOption::new("Service", "Restart", "no"),
            UnitOption::new("Service", "ExecStart", quote_exec(&exec_start)),
            UnitOption::new("Service", "RootDirectory", rel_rootfs.clone()),
            UnitOption::new("Service", "WorkingDirectory", app.working_directory.clone()),
            UnitOption::new("Service", "EnvironmentFile", PodPaths::rel_env_file(app_name)),
            UnitOption::new("Service", "User", uid.to_string()),
            UnitOption::new("Service", "Group", gid.to_string()),
            UnitOption::new("Service", "SyslogIdentifier", app_name),
        ];

        if !app.supplementary_gids.is_empty() {
            let gids: Vec<String> = app.supplementary_gids.iter().map(u32::to_string).collect();
            opts.push(UnitOption::new("Service", "SupplementaryGroups", gids.join(" ")));
        }

        if !self.insecure.disable_capabilities {
            opts.push(UnitOption::new(
                "Service",
                "CapabilityBoundingSet",
                capabilities.join(" "),
            ));
        }

        let mut nnp = no_new_privileges(&app.isolators);
        if !self.insecure.disable_seccomp {
            if let Some(filter) = compile_seccomp_filter(&app.isolators, self.info, uid != 0)? {
                opts.push(UnitOption::new("Service", "SystemCallFilter", filter.to_unit_value()));
                if let Some(errno) = &filter.errno {
                    opts.push(UnitOption::new("Service", "SystemCallErrorNumber", errno.clone()));
                }
                nnp |= filter.force_no_new_privileges;
            }
        }
        opts.push(UnitOption::new("Service", "NoNewPrivileges", nnp.to_string()));

        opts.extend(mount_directories(&rel_rootfs, &app_rootfs, &mounts)?);

        if !self.insecure.disable_paths && !flavor.is_kvm() {
            opts.extend(protect_kernel_tunables(&rel_rootfs, version));
            opts.push(UnitOption::new("Service", "DevicePolicy", "closed"));
            for allow in device_allows(&rel_rootfs, &app_rootfs, &mounts)? {
                opts.push(UnitOption::new("Service", "DeviceAllow", allow));
            }
        }

        opts.extend(event_handlers(&app.event_handlers)?);

        for (name, value) in resource_options(&app.isolators)? {
            opts.push(UnitOption::new("Service", name, value));
        }

        if app.ports.iter().any(|p| p.socket_activated) {
            let socket = socket_unit_name(app_name);
            opts.push(UnitOption::new("Unit", "Requires", socket.clone()));
            opts.push(UnitOption::new("Unit", "After", socket));
            self.try_app_socket_unit(app_name, &image_name)?;
        }

        if flavor.is_kvm() {
            for unit in mount_units(&paths, app_name, &service_name, &mounts)? {
                opts.push(UnitOption::new("Unit", "Requires", unit.name.clone()));
                opts.push(UnitOption::new("Unit", "After", unit.name.clone()));
                self.try_write_unit(&paths.unit_file(&unit.name), &unit.options)?;
            }
        }

        opts.extend(extra.iter().cloned());

        self.try_write_unit(&paths.unit_file(&service_name), &opts)?;
        activate_unit(&service_name, &paths.default_wants_dir())
    }

    /// Writes the socket unit binding the socket-activated ports of an app.
    fn try_app_socket_unit(&mut self, app_name: &str, image_name: &str) -> Result<()> {
        let app = self.pod.app(app_name)?;
        let mut opts = vec![
            UnitOption::new(
                "Unit",
                "Description",
                format!("Application={app_name} Image={image_name} socket-activated ports"),
            ),
            UnitOption::new("Unit", "DefaultDependencies", "false"),
            UnitOption::new("Socket", "BindIPv6Only", "both"),
            UnitOption::new("Socket", "Service", service_unit_name(app_name)),
        ];

        for port in app.ports.iter().filter(|p| p.socket_activated) {
            let listen = match port.protocol.as_str() {
                "tcp" => "ListenStream",
                "udp" => "ListenDatagram",
                other => {
                    return Err(Error::UnrecognizedProtocol {
                        port: port.name.clone(),
                        protocol: other.to_string(),
                    });
                }
            };
            // The socket is created on the host, so the supervisor matches it
            // by the host port number.
            let number = match self.pod.manifest.host_port(&port.name) {
                Some(host_port) => host_port,
                None => {
                    warn!(
                        "No host port for socket-activated port {} of app {}, using {}",
                        port.name, app_name, port.port
                    );
                    port.port
                }
            };
            opts.push(UnitOption::new("Socket", listen, number.to_string()));
        }

        let paths = self.pod.paths().clone();
        let socket_name = socket_unit_name(app_name);
        self.try_write_unit(&paths.unit_file(&socket_name), &opts)?;
        activate_unit(&socket_name, &paths.sockets_wants_dir())
    }

    /// Writes the reaper unit of an app.
    ///
    /// The reaper stays active while the app service needs it and runs the
    /// teardown script when stopped. It conflicts with the pod shutdown
    /// targets so it is stopped in order during pod shutdown.
    pub fn app_reaper_unit(&mut self, app_name: &str, bin_path: &str) {
        self.step(Some(app_name), |w| {
            let mut opts = vec![
                UnitOption::new("Unit", "Description", format!("{app_name} Reaper")),
                UnitOption::new("Unit", "DefaultDependencies", "false"),
                UnitOption::new("Unit", "StopWhenUnneeded", "yes"),
                UnitOption::new("Unit", "Before", HALT_TARGET),
            ];
            for target in REAPER_CONFLICTS {
                opts.push(UnitOption::new("Unit", "Conflicts", *target));
            }
            opts.push(UnitOption::new("Service", "RemainAfterExit", "yes"));
            opts.push(UnitOption::new(
                "Service",
                "ExecStop",
                format!(
                    "{REAPER_SCRIPT} \"{app_name}\" \"{}\" \"{bin_path}\"",
                    PodPaths::rel_app_rootfs(app_name)
                ),
            ));

            let path = w.pod.paths().unit_file(&reaper_unit_name(app_name));
            w.try_write_unit(&path, &opts)
        });
    }
}

/// Replaces `<wants_dir>/<unit>` with a link to `../<unit>`.
fn activate_unit(unit_name: &str, wants_dir: &Path) -> Result<()> {
    let link = wants_dir.join(unit_name);
    let write_error = |e: io::Error| Error::UnitWriteFailed {
        path: link.clone(),
        reason: e.to_string(),
    };
    fs::create_dir_all(wants_dir).map_err(write_error)?;
    if link.symlink_metadata().is_ok() {
        fs::remove_file(&link).map_err(write_error)?;
    }
    std::os::unix::fs::symlink(Path::new("..").join(unit_name), &link).map_err(write_error)?;
    debug!("Activated {} in {}", unit_name, wants_dir.display());
    Ok(())
}
