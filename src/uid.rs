//! User namespace id shifting.
//!
//! A pod started with private users maps container ids `[0, count)` onto
//! host ids `[shift, shift + count)`. The range travels between processes as
//! the string `shift:count`; an empty string means "no shift".

use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

/// Container-to-host id mapping of a pod with private users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UidRange {
    /// First host id of the range.
    pub shift: u32,
    /// Number of ids in the range.
    pub count: u32,
}

impl UidRange {
    /// Range that performs no shifting.
    #[must_use]
    pub fn blank() -> Self {
        Self::default()
    }

    /// Returns true if no shift is active.
    pub fn is_blank(&self) -> bool {
        self.shift == 0 && self.count == 0
    }

    /// Parses the `shift:count` form. Empty input yields a blank range.
    pub fn deserialize(raw: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| Error::InvalidUidRange(format!("not UTF-8: {e}")))?
            .trim();
        if text.is_empty() {
            return Ok(Self::blank());
        }

        let (shift, count) = text
            .split_once(':')
            .ok_or_else(|| Error::InvalidUidRange(format!("{text:?} is not shift:count")))?;
        let shift = shift
            .parse::<u32>()
            .map_err(|e| Error::InvalidUidRange(format!("bad shift {shift:?}: {e}")))?;
        let count = count
            .parse::<u32>()
            .map_err(|e| Error::InvalidUidRange(format!("bad count {count:?}: {e}")))?;
        if shift.checked_add(count).is_none() {
            return Err(Error::InvalidUidRange(format!(
                "range {shift}:{count} overflows the id space"
            )));
        }

        Ok(Self { shift, count })
    }

    /// Serializes to the `shift:count` form (empty for a blank range).
    pub fn serialize(&self) -> String {
        if self.is_blank() {
            String::new()
        } else {
            format!("{}:{}", self.shift, self.count)
        }
    }

    /// Maps container ids to host ids.
    pub fn shift_ids(&self, uid: u32, gid: u32) -> Result<(u32, u32)> {
        if self.is_blank() {
            return Ok((uid, gid));
        }
        if uid >= self.count || gid >= self.count {
            return Err(Error::InvalidUidRange(format!(
                "ids {uid}:{gid} outside of range {}",
                self.serialize()
            )));
        }
        Ok((uid + self.shift, gid + self.shift))
    }

    /// Maps host ids back to container ids.
    pub fn unshift_ids(&self, uid: u32, gid: u32) -> Result<(u32, u32)> {
        if self.is_blank() {
            return Ok((uid, gid));
        }
        let end = self.shift + self.count;
        let in_range = |id: u32| id >= self.shift && id < end;
        if !in_range(uid) || !in_range(gid) {
            return Err(Error::InvalidUidRange(format!(
                "host ids {uid}:{gid} outside of range {}",
                self.serialize()
            )));
        }
        Ok((uid - self.shift, gid - self.shift))
    }

    /// Normalizes on-disk ownership to host ids.
    ///
    /// Ids already inside the shifted window are kept; ids below it are
    /// treated as container ids and shifted.
    pub fn remap_ids(&self, uid: u32, gid: u32) -> Result<(u32, u32)> {
        let (uid, gid) = self.unshift_ids(uid, gid).unwrap_or((uid, gid));
        self.shift_ids(uid, gid)
    }

    /// Hands generated files to the pod's shifted root.
    pub fn shift_files(&self, paths: &[&Path]) -> Result<()> {
        if self.is_blank() {
            return Ok(());
        }
        for path in paths {
            std::os::unix::fs::chown(path, Some(self.shift), Some(self.shift)).map_err(|e| {
                Error::UnitWriteFailed {
                    path: path.to_path_buf(),
                    reason: format!("chown to shifted root: {e}"),
                }
            })?;
        }
        Ok(())
    }
}

impl fmt::Display for UidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_blank() {
            write!(f, "none")
        } else {
            write!(f, "{}:{}", self.shift, self.count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_round_trip() {
        let range = UidRange::deserialize(b"").unwrap();
        assert!(range.is_blank());
        assert_eq!(range.serialize(), "");
        assert_eq!(range.shift_ids(5, 6).unwrap(), (5, 6));
    }

    #[test]
    fn test_shift_and_unshift() {
        let range = UidRange::deserialize(b"100000:65536").unwrap();
        assert_eq!(range.shift_ids(0, 0).unwrap(), (100000, 100000));
        assert_eq!(range.unshift_ids(100042, 100043).unwrap(), (42, 43));
        assert!(range.shift_ids(65536, 0).is_err());
        assert!(range.unshift_ids(99999, 100000).is_err());
    }

    #[test]
    fn test_remap_accepts_both_conventions() {
        let range = UidRange { shift: 1000, count: 100 };
        assert_eq!(range.remap_ids(5, 5).unwrap(), (1005, 1005));
        assert_eq!(range.remap_ids(1005, 1005).unwrap(), (1005, 1005));
    }

    #[test]
    fn test_malformed_ranges() {
        assert!(UidRange::deserialize(b"100000").is_err());
        assert!(UidRange::deserialize(b"a:b").is_err());
        assert!(UidRange::deserialize(b"4294967295:2").is_err());
    }
}
