//! # Confined Path Resolution
//!
//! Resolves paths inside an app root filesystem the way the kernel would
//! once the app is chrooted there, without ever letting a symlink point the
//! host side outside of that rootfs.
//!
//! ## Resolution Model
//!
//! ```text
//!   root = /pod/stage1/rootfs/opt/stage2/web/rootfs
//!   path = var/lib/data
//!
//!   var ──▶ lstat ──▶ dir      ──▶ keep
//!   lib ──▶ lstat ──▶ symlink  ──▶ "/srv"   (absolute: restart at root)
//!   srv ──▶ lstat ──▶ dir      ──▶ keep
//!   data ─▶ lstat ──▶ ENOENT   ──▶ keep (not created yet)
//!
//!   result = srv/data
//! ```
//!
//! - Absolute link targets are interpreted relative to `root`; relative
//!   targets relative to the directory containing the link.
//! - Link targets are walked hop by hop, so chains of links resolve to
//!   their final target (bounded by [`MAX_SYMLINK_HOPS`]).
//! - A missing segment does not fail resolution: mount targets are allowed
//!   to not exist yet. Later segments are still `lstat`ed, so a `..` that
//!   climbs back out of the missing part cannot skip over a link.
//!
//! ## Security
//!
//! Any step that would move above `root` (a `..` at the top, or a link whose
//! target climbs out) fails with [`Error::PathEscapesRoot`]. Only `lstat`
//! and `readlink` are performed; nothing is created.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::constants::{DEFAULT_PATH, MAX_SYMLINK_HOPS};
use crate::error::{Error, Result};
use crate::schema::App;

/// Where a queued segment came from, for error reporting.
#[derive(Debug, Clone)]
struct LinkOrigin {
    link: String,
    target: String,
}

/// Resolves `path` inside `root`, following symlinks without escaping.
///
/// Returns the resolved path relative to `root` (no leading `/`; empty for
/// the root itself).
///
/// # Errors
///
/// - [`Error::PathEscapesRoot`] if any step leaves `root`
/// - [`Error::TooManySymlinks`] on link loops
/// - [`Error::Io`] if `lstat`/`readlink` fail for reasons other than
///   non-existence
pub fn resolve_in_root(root: &Path, path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let root = clean_path(root);
    let display = path.to_string_lossy().into_owned();

    let mut queue: VecDeque<(OsString, Option<LinkOrigin>)> = VecDeque::new();
    push_components(&mut queue, path, None, false);

    let mut resolved = root.clone();
    let mut hops = 0usize;

    while let Some((segment, origin)) = queue.pop_front() {
        if segment == ".." {
            step_up(&mut resolved, &root, &display, origin.as_ref())?;
            continue;
        }

        let next = resolved.join(&segment);
        let meta = match fs::symlink_metadata(&next) {
            Ok(meta) => meta,
            // Keep walking: a later `..` may climb back into existing
            // directories, whose entries must still be checked for links.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                resolved = next;
                continue;
            }
            Err(e) => return Err(Error::Io(e)),
        };

        if !meta.file_type().is_symlink() {
            resolved = next;
            continue;
        }

        hops += 1;
        if hops > MAX_SYMLINK_HOPS {
            return Err(Error::TooManySymlinks(display));
        }

        let target = fs::read_link(&next)?;
        let origin = LinkOrigin {
            link: rel_display(&next, &root),
            target: target.to_string_lossy().into_owned(),
        };
        debug!("Following symlink {} -> {}", origin.link, origin.target);

        if target.is_absolute() {
            resolved = root.clone();
        }
        push_components(&mut queue, &target, Some(origin), true);
    }

    Ok(resolved
        .strip_prefix(&root)
        .map(Path::to_path_buf)
        .unwrap_or_default())
}

/// Queues the segments of `path`, at the front if it is a link target.
fn push_components(
    queue: &mut VecDeque<(OsString, Option<LinkOrigin>)>,
    path: &Path,
    origin: Option<LinkOrigin>,
    front: bool,
) {
    let segments: Vec<OsString> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_os_string()),
            Component::ParentDir => Some(OsString::from("..")),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => None,
        })
        .collect();

    if front {
        for segment in segments.into_iter().rev() {
            queue.push_front((segment, origin.clone()));
        }
    } else {
        for segment in segments {
            queue.push_back((segment, origin.clone()));
        }
    }
}

fn step_up(
    resolved: &mut PathBuf,
    root: &Path,
    display: &str,
    origin: Option<&LinkOrigin>,
) -> Result<()> {
    if resolved.as_path() == root {
        return Err(match origin {
            Some(o) => Error::PathEscapesRoot {
                path: o.link.clone(),
                target: Some(o.target.clone()),
            },
            None => Error::PathEscapesRoot {
                path: display.to_string(),
                target: None,
            },
        });
    }
    resolved.pop();
    Ok(())
}

fn rel_display(path: &Path, root: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => format!("/{}", rel.display()),
        Err(_) => path.display().to_string(),
    }
}

/// Lexically normalizes a path: drops `.`, folds `..`, removes duplicate
/// separators. `..` never climbs above `/` for absolute paths.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// Renders a rootfs-relative path in app-absolute form (`/data`).
pub fn app_absolute(rel: &Path) -> String {
    let rel = rel.to_string_lossy();
    let rel = rel.trim_start_matches('/');
    format!("/{rel}")
}

/// Returns true for an existing regular file with any execute bit set.
pub fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

// =============================================================================
// Binary Lookup
// =============================================================================

/// Finds the binary of an app, as a path inside its rootfs.
///
/// - Absolute `exec[0]`: used as-is.
/// - Relative path with a `/`: joined to the working directory.
/// - Bare name: searched in the app's `PATH` (or the default `PATH`); every
///   candidate is resolved inside the rootfs and must be executable.
pub fn find_bin_path(app_name: &str, app_rootfs: &Path, app: &App) -> Result<String> {
    let bin = app
        .exec
        .first()
        .ok_or_else(|| Error::EmptyExec(app_name.to_string()))?;

    if bin.starts_with('/') {
        return Ok(bin.clone());
    }

    let work_dir = if app.working_directory.is_empty() {
        "/"
    } else {
        app.working_directory.as_str()
    };

    if bin.contains('/') {
        let joined = clean_path(&Path::new(work_dir).join(bin));
        return Ok(joined.to_string_lossy().into_owned());
    }

    let search_path = app.env("PATH").unwrap_or(DEFAULT_PATH);
    for dir in search_path.split(':').filter(|d| !d.is_empty()) {
        let dir = if dir.starts_with('/') {
            PathBuf::from(dir)
        } else {
            Path::new(work_dir).join(dir)
        };
        let candidate = clean_path(&dir.join(bin));
        let resolved = resolve_in_root(app_rootfs, &candidate)?;
        if is_executable(&app_rootfs.join(&resolved)) {
            debug!("Found {} for app {} at {}", bin, app_name, candidate.display());
            return Ok(candidate.to_string_lossy().into_owned());
        }
    }

    Err(Error::BinaryNotFound {
        binary: bin.clone(),
        search_path: search_path.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path(Path::new("/a/./b/../c//d")), PathBuf::from("/a/c/d"));
        assert_eq!(clean_path(Path::new("/../x")), PathBuf::from("/x"));
        assert_eq!(clean_path(Path::new("a/../../b")), PathBuf::from("../b"));
        assert_eq!(clean_path(Path::new("")), PathBuf::from("."));
    }

    #[test]
    fn test_app_absolute() {
        assert_eq!(app_absolute(Path::new("data/x")), "/data/x");
        assert_eq!(app_absolute(Path::new("")), "/");
    }
}
