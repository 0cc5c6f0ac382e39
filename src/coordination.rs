use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use tracing::warn;

/// A lock file left behind by a crashed process is reclaimed after this long.
const STALE_AFTER: Duration = Duration::from_secs(300);

/// Exclusive lock held by the existence of `<path>`; released on drop.
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    pub fn acquire(lock_path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let lock_path = lock_path.as_ref();
        let start = SystemTime::now();

        loop {
            match Self::try_acquire(lock_path) {
                Ok(lock) => return Ok(lock),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Self::is_stale(lock_path) {
                        warn!("Removing stale lock file {:?}", lock_path);
                        let _ = std::fs::remove_file(lock_path);
                        continue;
                    }
                    if start.elapsed().unwrap_or(timeout) >= timeout {
                        return Err(anyhow!("timed out waiting for lock {:?}", lock_path));
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn try_acquire(lock_path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)?;

        // Write current timestamp and process info
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let lock_info = format!("{}:{}", timestamp, std::process::id());
        file.write_all(lock_info.as_bytes())?;
        file.flush()?;

        Ok(FileLock {
            _file: file,
            path: lock_path.to_path_buf(),
        })
    }

    fn is_stale(lock_path: &Path) -> bool {
        std::fs::metadata(lock_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .map(|age| age > STALE_AFTER)
            .unwrap_or(false)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Run `f` while holding the lock file `lock_path`.
pub fn with_lock<F, R>(lock_path: impl AsRef<Path>, timeout: Duration, f: F) -> Result<R>
where
    F: FnOnce() -> Result<R>,
{
    let _lock = FileLock::acquire(lock_path, timeout)?;
    f()
}
