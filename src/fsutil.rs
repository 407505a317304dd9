//! Filesystem helpers for volume seeding.
//!
//! [`copy_tree`] reproduces an image directory inside an empty volume:
//! regular files, directories, symlinks, device nodes and named pipes, with
//! ownership, mode and timestamps preserved. Ownership is remapped through
//! the pod's [`UidRange`] so the copy is owned by the same container ids as
//! the source.
//!
//! The walk never follows symlinks, so a link inside the image cannot make
//! the copy read from (or write to) anywhere outside `src`/`dest`.

use std::ffi::CString;
use std::fs::{self, Metadata};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::uid::UidRange;

/// Mask of permission bits (including setuid/setgid/sticky).
const MODE_MASK: u32 = 0o7777;

/// Recursively copies `src` into `dest`.
///
/// `dest` itself receives the mode, owner and times of `src`. Directory
/// times are restored after their content has been written.
pub fn copy_tree(src: &Path, dest: &Path, uid_range: &UidRange) -> Result<()> {
    let mut dirs: Vec<(PathBuf, Metadata)> = Vec::new();

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| copy_error(src, e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| copy_error(entry.path(), e.to_string()))?;
        let target = dest.join(rel);
        let meta = entry
            .path()
            .symlink_metadata()
            .map_err(|e| copy_error(entry.path(), e.to_string()))?;
        let file_type = meta.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| copy_error(&target, e.to_string()))?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target).map_err(|e| copy_error(&target, e.to_string()))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())
                .map_err(|e| copy_error(entry.path(), e.to_string()))?;
            std::os::unix::fs::symlink(&link, &target)
                .map_err(|e| copy_error(&target, e.to_string()))?;
        } else if file_type.is_block_device() || file_type.is_char_device() {
            make_node(&target, &meta)?;
        } else if file_type.is_fifo() {
            make_fifo(&target, &meta)?;
        } else {
            debug!("Skipping unsupported file type at {}", entry.path().display());
            continue;
        }

        let (uid, gid) = uid_range.remap_ids(meta.uid(), meta.gid())?;
        std::os::unix::fs::lchown(&target, Some(uid), Some(gid))
            .map_err(|e| copy_error(&target, format!("chown {uid}:{gid}: {e}")))?;

        if file_type.is_dir() {
            // Mode and times are applied once the content is in place.
            dirs.push((target, meta));
            continue;
        }
        if !file_type.is_symlink() {
            fs::set_permissions(&target, fs::Permissions::from_mode(meta.mode() & MODE_MASK))
                .map_err(|e| copy_error(&target, e.to_string()))?;
        }
        set_times(&target, &meta).map_err(|e| copy_error(&target, e.to_string()))?;
    }

    for (dir, meta) in dirs.iter().rev() {
        fs::set_permissions(dir, fs::Permissions::from_mode(meta.mode() & MODE_MASK))
            .map_err(|e| copy_error(dir, e.to_string()))?;
        set_times(dir, meta).map_err(|e| copy_error(dir, e.to_string()))?;
    }

    debug!("Copied {} into {}", src.display(), dest.display());
    Ok(())
}

/// Returns true if `path` is a block or character device (following links).
pub fn is_device_node(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.file_type().is_block_device() || m.file_type().is_char_device())
        .unwrap_or(false)
}

fn copy_error(path: &Path, reason: String) -> Error {
    Error::MountError {
        path: path.to_path_buf(),
        reason: format!("copy failed: {reason}"),
    }
}

fn c_path(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|e| copy_error(path, format!("path contains NUL: {e}")))
}

fn make_node(target: &Path, meta: &Metadata) -> Result<()> {
    let c = c_path(target)?;
    // SAFETY: c is a valid NUL-terminated path for the duration of the call
    let rc = unsafe { libc::mknod(c.as_ptr(), meta.mode() as libc::mode_t, meta.rdev() as libc::dev_t) };
    if rc != 0 {
        return Err(copy_error(target, format!("mknod: {}", io::Error::last_os_error())));
    }
    Ok(())
}

fn make_fifo(target: &Path, meta: &Metadata) -> Result<()> {
    let c = c_path(target)?;
    // SAFETY: c is a valid NUL-terminated path for the duration of the call
    let rc = unsafe { libc::mkfifo(c.as_ptr(), (meta.mode() & MODE_MASK) as libc::mode_t) };
    if rc != 0 {
        return Err(copy_error(target, format!("mkfifo: {}", io::Error::last_os_error())));
    }
    Ok(())
}

/// Restores access and modification times without following symlinks.
fn set_times(target: &Path, meta: &Metadata) -> io::Result<()> {
    let c = CString::new(target.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let times = [
        libc::timespec {
            tv_sec: meta.atime() as libc::time_t,
            tv_nsec: meta.atime_nsec() as _,
        },
        libc::timespec {
            tv_sec: meta.mtime() as libc::time_t,
            tv_nsec: meta.mtime_nsec() as _,
        },
    ];
    // SAFETY: c and times outlive the call; utimensat does not retain them
    let rc = unsafe {
        libc::utimensat(
            libc::AT_FDCWD,
            c.as_ptr(),
            times.as_ptr(),
            libc::AT_SYMLINK_NOFOLLOW,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
