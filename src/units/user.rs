//! User and group resolution inside an app rootfs.
//!
//! `user`/`group` of an app may be:
//!
//! 1. `root` (or empty): id 0
//! 2. a numeric id
//! 3. an absolute path: owner of that file inside the rootfs, unshifted
//! 4. a name: looked up in the rootfs' `/etc/passwd` or `/etc/group`
//!
//! The name lookup resolves `/etc/passwd` through the confined resolver, so
//! an image shipping `/etc -> /` cannot make us read host files.

use std::fs;
use std::io::Write;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::rootfs::resolve_in_root;
use crate::uid::UidRange;

/// Which database a name is looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    User,
    Group,
}

impl IdKind {
    fn database(self) -> &'static str {
        match self {
            IdKind::User => "/etc/passwd",
            IdKind::Group => "/etc/group",
        }
    }
}

/// Field holding the numeric id in passwd and group lines.
const ID_FIELD: usize = 2;

/// Resolves a user or group to its numeric id inside `app_rootfs`.
pub fn resolve_id(app_rootfs: &Path, value: &str, kind: IdKind, uid_range: &UidRange) -> Result<u32> {
    let invalid = |reason: String| Error::InvalidUserOrGroup {
        value: value.to_string(),
        reason,
    };

    if value.is_empty() || value == "root" {
        return Ok(0);
    }
    if let Ok(id) = value.parse::<u32>() {
        return Ok(id);
    }

    if value.starts_with('/') {
        let rel = resolve_in_root(app_rootfs, value)?;
        let meta = fs::metadata(app_rootfs.join(&rel))
            .map_err(|e| invalid(format!("stat {value}: {e}")))?;
        let (uid, gid) = uid_range.unshift_ids(meta.uid(), meta.gid())?;
        let id = match kind {
            IdKind::User => uid,
            IdKind::Group => gid,
        };
        debug!("Resolved {} to {} from file ownership", value, id);
        return Ok(id);
    }

    let db = resolve_in_root(app_rootfs, kind.database())?;
    let content = fs::read_to_string(app_rootfs.join(&db))
        .map_err(|e| invalid(format!("reading {}: {e}", kind.database())))?;
    lookup_name(&content, value, ID_FIELD)
        .ok_or_else(|| invalid(format!("not found in {}", kind.database())))
}

/// Finds `name` in passwd/group formatted `content`.
fn lookup_name(content: &str, name: &str, id_field: usize) -> Option<u32> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            (fields.first() == Some(&name))
                .then(|| fields.get(id_field).and_then(|id| id.parse().ok()))
                .flatten()
        })
        .next()
}

// =============================================================================
// sysusers.d Fragment
// =============================================================================

/// Renders the user database fragment declaring `uid` and the groups.
///
/// Groups come first (supplementary, then primary), deduplicated.
pub fn render_sysusers(uid: u32, gid: u32, supplementary_gids: &[u32]) -> String {
    let mut gids: Vec<u32> = Vec::with_capacity(supplementary_gids.len() + 1);
    for g in supplementary_gids.iter().copied().chain(std::iter::once(gid)) {
        if !gids.contains(&g) {
            gids.push(g);
        }
    }

    let mut out = String::new();
    for g in gids {
        out.push_str(&format!("g gen{g} {g}\n"));
    }
    out.push_str(&format!("u gen{uid} {uid} \"gen{uid}\"\n"));
    out
}

/// Writes the user database fragment of an app.
pub fn write_sysusers(
    path: &Path,
    uid: u32,
    gid: u32,
    supplementary_gids: &[u32],
    uid_range: &UidRange,
) -> Result<()> {
    let write_error = |e: std::io::Error| Error::UnitWriteFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let dir = path.parent().unwrap_or(Path::new("/"));
    fs::create_dir_all(dir).map_err(write_error)?;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o640)
        .open(path)
        .map_err(write_error)?;
    file.write_all(render_sysusers(uid, gid, supplementary_gids).as_bytes())
        .map_err(write_error)?;

    uid_range.shift_files(&[dir, path])
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWD: &str = "root:x:0:0:root:/root:/bin/sh\n# comment\nweb:x:1000:1001::/srv:/bin/false\n";

    #[test]
    fn test_lookup_name() {
        assert_eq!(lookup_name(PASSWD, "web", 2), Some(1000));
        assert_eq!(lookup_name(PASSWD, "root", 2), Some(0));
        assert_eq!(lookup_name(PASSWD, "nobody", 2), None);
    }

    #[test]
    fn test_render_sysusers() {
        assert_eq!(
            render_sysusers(1000, 1001, &[20, 1001]),
            "g gen20 20\ng gen1001 1001\nu gen1000 1000 \"gen1000\"\n"
        );
    }
}
