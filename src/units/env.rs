//! App environment files.

use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::constants::{DEFAULT_ENV, ENV_APP_NAME, ENV_METADATA_URL};
use crate::error::{Error, Result};
use crate::schema::App;
use crate::uid::UidRange;

/// Separator between `NAME=VALUE` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvFileFormat {
    /// One record per line, read by the supervisor's `EnvironmentFile=`.
    #[default]
    Newline,
    /// NUL-terminated records, for consumers that exec directly.
    Nul,
}

impl EnvFileFormat {
    fn separator(self) -> u8 {
        match self {
            EnvFileFormat::Newline => b'\n',
            EnvFileFormat::Nul => 0,
        }
    }
}

/// Builds the environment of an app.
///
/// Defaults for variables the app does not declare come first, then the
/// declared variables in order, with the injected ones set (overriding a
/// declared value of the same name).
pub fn compose_env(app_name: &str, app: &App, metadata_url: Option<&str>) -> Vec<(String, String)> {
    let mut declared: Vec<(String, String)> = app
        .environment
        .iter()
        .map(|e| (e.name.clone(), e.value.clone()))
        .collect();

    let mut set = |name: &str, value: &str| {
        match declared.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => declared.push((name.to_string(), value.to_string())),
        }
    };
    set(ENV_APP_NAME, app_name);
    if let Some(url) = metadata_url {
        set(ENV_METADATA_URL, url);
    }

    let mut env: Vec<(String, String)> = DEFAULT_ENV
        .iter()
        .filter(|(name, _)| !declared.iter().any(|(n, _)| n == name))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    env.extend(declared);
    env
}

/// Serializes an environment.
pub fn render_env(env: &[(String, String)], format: EnvFileFormat) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, value) in env {
        out.extend_from_slice(name.as_bytes());
        out.push(b'=');
        out.extend_from_slice(value.as_bytes());
        out.push(format.separator());
    }
    out
}

/// Writes an environment file, truncating any previous content.
pub fn write_env_file(
    path: &Path,
    env: &[(String, String)],
    format: EnvFileFormat,
    uid_range: &UidRange,
) -> Result<()> {
    let write_error = |e: std::io::Error| Error::UnitWriteFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_error)?;
    }
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .map_err(write_error)?;
    file.write_all(&render_env(env, format)).map_err(write_error)?;

    uid_range.shift_files(&[path])
}
