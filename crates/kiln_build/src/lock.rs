//! Advisory lock serializing kiln invocations that share persisted caches.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use kiln_common::ContentHash;
use tracing::{debug, info};

use crate::error::BuildError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An exclusive advisory lock, released when dropped.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Lock file name for an install location: one lock per executable path.
    pub fn file_name(executable: &Path) -> String {
        let hash = ContentHash::from_bytes(executable.to_string_lossy().as_bytes());
        format!("kiln-{}.lock", hash.short())
    }

    /// Takes the lock for `executable` inside `dir`, waiting up to `timeout`
    /// for another holder to release it.
    pub fn acquire(dir: &Path, executable: &Path, timeout: Duration) -> Result<Self, BuildError> {
        let path = dir.join(Self::file_name(executable));
        let io_error = |source| BuildError::LockIo {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(dir).map_err(io_error)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(io_error)?;

        let started = Instant::now();
        let mut announced = false;
        loop {
            if file.try_lock_exclusive().is_ok() {
                debug!(path = %path.display(), "acquired instance lock");
                return Ok(Self { file, path });
            }
            if started.elapsed() >= timeout {
                return Err(BuildError::LockTimeout { path, timeout });
            }
            if !announced {
                info!("waiting for another kiln instance to finish");
                announced = true;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Returns the lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_names_depend_on_executable() {
        let a = InstanceLock::file_name(Path::new("/opt/kiln/bin/kiln"));
        let b = InstanceLock::file_name(Path::new("/usr/local/bin/kiln"));
        assert_ne!(a, b);
        assert!(a.starts_with("kiln-") && a.ends_with(".lock"));
    }

    #[test]
    fn second_holder_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let exe = Path::new("/opt/kiln/bin/kiln");
        let first = InstanceLock::acquire(dir.path(), exe, Duration::from_secs(1)).unwrap();
        assert!(first.path().exists());

        let err = InstanceLock::acquire(dir.path(), exe, Duration::from_millis(150)).unwrap_err();
        assert!(matches!(err, BuildError::LockTimeout { .. }));
    }

    #[test]
    fn dropping_releases_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let exe = Path::new("/opt/kiln/bin/kiln");
        drop(InstanceLock::acquire(dir.path(), exe, Duration::from_secs(1)).unwrap());
        assert!(InstanceLock::acquire(dir.path(), exe, Duration::ZERO).is_ok());
    }

    #[test]
    fn different_installs_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let _a = InstanceLock::acquire(dir.path(), Path::new("/a/kiln"), Duration::ZERO).unwrap();
        assert!(InstanceLock::acquire(dir.path(), Path::new("/b/kiln"), Duration::ZERO).is_ok());
    }
}
