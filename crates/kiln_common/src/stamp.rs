//! Modification-time helpers.
//!
//! Persisted caches compare timestamps as nanoseconds since the Unix epoch so
//! that they survive serialization without loss.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the last modification time of `path`, or `None` if it is missing.
pub fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Converts a time into nanoseconds since the Unix epoch.
///
/// Times before the epoch collapse to zero; times past `u64::MAX` nanoseconds
/// saturate.
pub fn to_stamp(time: SystemTime) -> u64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => u64::try_from(d.as_nanos()).unwrap_or(u64::MAX),
        Err(_) => 0,
    }
}

/// Returns the modification stamp of `path`, or `None` if it is missing.
pub fn file_stamp(path: &Path) -> Option<u64> {
    modified_time(path).map(to_stamp)
}

/// Sets the modification time of an existing file.
pub fn set_modified(path: &Path, time: SystemTime) -> std::io::Result<()> {
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_modified(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn missing_file_has_no_stamp() {
        let dir = tempfile::tempdir().unwrap();
        assert!(file_stamp(&dir.path().join("gone.h")).is_none());
    }

    #[test]
    fn stamp_tracks_modified_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.h");
        std::fs::write(&path, "#pragma once\n").unwrap();
        let t = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        set_modified(&path, t).unwrap();
        assert_eq!(file_stamp(&path), Some(1_700_000_000 * 1_000_000_000));
    }

    #[test]
    fn pre_epoch_collapses_to_zero() {
        let t = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(to_stamp(t), 0);
    }
}
