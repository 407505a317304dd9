//! stage1 - App lifecycle entrypoints of a running pod
//!
//! Invoked by the pod manager with the pod directory as working directory
//! (or `--pod-root`). Each invocation performs one verb and exits.
//!
//! ## Usage
//!
//! ```sh
//! stage1 app-add    --app=web [--disable-seccomp ...] <pod-uuid>
//! stage1 app-start  --app=web <pod-uuid>
//! stage1 app-stop   --app=web <pod-uuid>
//! stage1 app-rm     --app=web <pod-uuid>
//! stage1 app-status --app=web <pod-uuid>
//! ```
//!
//! ## Environment
//!
//! - `STAGE1_ENTERCMD`: namespace-entry binary used to run `systemctl`
//!   inside the pod
//! - `STAGE1_ENTERPID`: pid of the pod's init (falls back to `<pod>/pid`)
//!
//! ## Exit Codes
//!
//! `0` on success. A failing supervisor command propagates its own exit
//! status; precondition failures (unknown app, app still running, wrong
//! state) exit with `2`; anything else with `1`.

use std::path::PathBuf;
use std::process::ExitCode;

use stage1::constants::{EXIT_FAILURE, EXIT_SUCCESS};
use stage1::{
    EnterCommand, InsecureOptions, LifecycleDriver, Pod, ProcessControl, Stage1Info, UidRange,
};
use tracing::{debug, error, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Add,
    Start,
    Stop,
    Remove,
    Status,
}

impl Verb {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "app-add" => Some(Verb::Add),
            "app-start" => Some(Verb::Start),
            "app-stop" => Some(Verb::Stop),
            "app-rm" => Some(Verb::Remove),
            "app-status" => Some(Verb::Status),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Options {
    verb: Verb,
    app: String,
    uuid: Uuid,
    pod_root: PathBuf,
    debug: bool,
    insecure: InsecureOptions,
    private_users: Option<String>,
}

#[derive(Debug)]
enum Command {
    Run(Options),
    Version,
    Help,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let Some(first) = args.get(1) else {
        return Ok(Command::Help);
    };
    let verb = match first.as_str() {
        "help" | "--help" | "-h" => return Ok(Command::Help),
        "version" | "--version" => return Ok(Command::Version),
        other => Verb::parse(other).ok_or_else(|| format!("unknown command: {other}"))?,
    };

    let mut app = None;
    let mut uuid = None;
    let mut pod_root = PathBuf::from(".");
    let mut debug = false;
    let mut insecure = InsecureOptions::default();
    let mut private_users = None;

    for arg in &args[2..] {
        match arg.as_str() {
            "--debug" => debug = true,
            "--disable-capabilities-restriction" => insecure.disable_capabilities = true,
            "--disable-paths" => insecure.disable_paths = true,
            "--disable-seccomp" => insecure.disable_seccomp = true,
            flag if flag.starts_with("--app=") => {
                app = Some(flag["--app=".len()..].to_string());
            }
            flag if flag.starts_with("--pod-root=") => {
                pod_root = PathBuf::from(&flag["--pod-root=".len()..]);
            }
            flag if flag.starts_with("--private-users=") => {
                private_users = Some(flag["--private-users=".len()..].to_string());
            }
            flag if flag.starts_with("--") => return Err(format!("unknown flag: {flag}")),
            positional => {
                if uuid.is_some() {
                    return Err(format!("unexpected argument: {positional}"));
                }
                let parsed = Uuid::parse_str(positional)
                    .map_err(|e| format!("invalid pod uuid {positional:?}: {e}"))?;
                uuid = Some(parsed);
            }
        }
    }

    let app = app
        .filter(|a| !a.is_empty())
        .ok_or_else(|| "--app is required".to_string())?;
    let uuid = uuid.ok_or_else(|| "pod uuid is required".to_string())?;

    Ok(Command::Run(Options {
        verb,
        app,
        uuid,
        pod_root,
        debug,
        insecure,
        private_users,
    }))
}

// =============================================================================
// Commands
// =============================================================================

fn run(opts: Options, mut pod: Pod) -> stage1::Result<()> {
    if let Some(raw) = &opts.private_users {
        pod.uid_range = UidRange::deserialize(raw.as_bytes())?;
    }

    let paths = pod.paths().clone();
    let enter = EnterCommand::from_env(&paths)?;
    debug!(
        "Pod {} entered through {} (pid {})",
        opts.uuid,
        enter.entrypoint.display(),
        enter.pid
    );

    let mut driver = LifecycleDriver::new(pod, enter, ProcessControl, Stage1Info::new(paths))
        .with_insecure_options(opts.insecure);

    match opts.verb {
        Verb::Add => driver.add(&opts.app),
        Verb::Start => driver.start(&opts.app),
        Verb::Stop => driver.stop(&opts.app),
        Verb::Remove => driver.remove(&opts.app),
        Verb::Status => {
            let status = driver.status(&opts.app)?;
            let json = serde_json::to_string_pretty(&status)
                .map_err(|e| stage1::Error::Serialization(e.to_string()))?;
            println!("{json}");
            Ok(())
        }
    }
}

fn cmd_help() {
    println!(
        r#"stage1 - app lifecycle entrypoints of a running pod

USAGE:
    stage1 <command> --app=<name> [options] <pod-uuid>

COMMANDS:
    app-add       Prepare an app: mount points, units, environment
    app-start     Start a prepared or exited app
    app-stop      Stop a running app
    app-rm        Remove the units and files of a stopped app
    app-status    Print the state of an app (JSON)
    version       Show version information
    help          Show this help message

OPTIONS:
    --app=<name>                         App to operate on
    --pod-root=<dir>                     Pod directory (default: .)
    --debug                              Verbose logging
    --private-users=<shift:count>        User namespace range of the pod
    --disable-capabilities-restriction   No capability bounding set
    --disable-paths                      No /proc and /sys restrictions, no device policy
    --disable-seccomp                    No seccomp filter

ENVIRONMENT:
    STAGE1_ENTERCMD   Binary entering the pod's namespaces
    STAGE1_ENTERPID   Pid of the pod's init (default: read from <pod>/pid)
"#
    );
}

fn init_logging(debug: bool) -> Result<(), String> {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("failed to set tracing subscriber: {e}"))
}

// =============================================================================
// Main
// =============================================================================

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let opts = match parse_args(&args) {
        Ok(Command::Run(opts)) => opts,
        Ok(Command::Version) => {
            println!("stage1 {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::from(EXIT_SUCCESS);
        }
        Ok(Command::Help) => {
            cmd_help();
            return ExitCode::from(EXIT_SUCCESS);
        }
        Err(e) => {
            eprintln!("error: {e}");
            cmd_help();
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let pod = match Pod::load(&opts.pod_root, opts.uuid) {
        Ok(pod) => pod,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(e.exit_code());
        }
    };

    if let Err(e) = init_logging(opts.debug || pod.config.debug) {
        eprintln!("error: {e}");
        return ExitCode::from(EXIT_FAILURE);
    }

    match run(opts, pod) {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
