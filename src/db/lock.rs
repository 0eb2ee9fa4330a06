//! The single-writer lock.
//!
//! Cross-process exclusion uses an exclusive flock on a lock file in the
//! database directory; the file is created with the default mode, so its
//! permissions honour the process umask. Within the process a global
//! registry catches a second writable open of the same directory, since
//! POSIX locks are per-process and would happily succeed twice.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::error::{NautexError, Result};

/// Name of the lock file inside the database directory.
pub const LOCK_FILE: &str = "nautex-lock";

lazy_static! {
    static ref HELD: Mutex<HashSet<PathBuf>> = Mutex::new(HashSet::new());
}

/// RAII guard on the writer lock; released on drop or explicit release.
pub struct WriterLock {
    dir: PathBuf,
    file: Option<File>,
}

impl WriterLock {
    /// Take the writer lock for `dir`, failing with `DatabaseLocked` when
    /// any other handle (in this process or another) already holds it.
    pub fn acquire(dir: &Path) -> Result<WriterLock> {
        let canonical = dir
            .canonicalize()
            .map_err(NautexError::DatabaseIo)?;
        {
            let mut held = HELD.lock();
            if held.contains(&canonical) {
                return Err(NautexError::DatabaseLocked(format!(
                    "{} already has a writer in this process",
                    dir.display()
                )));
            }
            held.insert(canonical.clone());
        }
        let path = dir.join(LOCK_FILE);
        let file = match OpenOptions::new().write(true).create(true).open(&path) {
            Ok(f) => f,
            Err(e) => {
                HELD.lock().remove(&canonical);
                return Err(e.into());
            }
        };
        if file.try_lock_exclusive().is_err() {
            HELD.lock().remove(&canonical);
            return Err(NautexError::DatabaseLocked(format!(
                "{} is locked by another process",
                dir.display()
            )));
        }
        Ok(WriterLock {
            dir: canonical,
            file: Some(file),
        })
    }

    /// Drop the lock early (idempotent).
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
            let _ = std::fs::remove_file(self.dir.join(LOCK_FILE));
            HELD.lock().remove(&self.dir);
        }
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let dir = TempDir::new().unwrap();
        let mut first = WriterLock::acquire(dir.path()).unwrap();
        match WriterLock::acquire(dir.path()) {
            Err(NautexError::DatabaseLocked(_)) => {}
            other => panic!("expected DatabaseLocked, got {:?}", other.map(|_| ())),
        }
        first.release();
        let _second = WriterLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn test_release_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut lock = WriterLock::acquire(dir.path()).unwrap();
        lock.release();
        lock.release();
    }

    #[test]
    fn test_drop_releases() {
        let dir = TempDir::new().unwrap();
        {
            let _lock = WriterLock::acquire(dir.path()).unwrap();
        }
        let _again = WriterLock::acquire(dir.path()).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_file_mode_honours_umask() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let _lock = WriterLock::acquire(dir.path()).unwrap();
        let mode = std::fs::metadata(dir.path().join(LOCK_FILE))
            .unwrap()
            .permissions()
            .mode();
        // Created with 0666 before the umask; whatever the umask stripped
        // must stay stripped, and no execute bits ever appear.
        assert_eq!(mode & 0o111, 0);
        let umask = unsafe { libc_umask_probe() };
        assert_eq!(mode & 0o777 & umask, 0);
    }

    #[cfg(unix)]
    unsafe fn libc_umask_probe() -> u32 {
        // Read the umask without a libc binding: set-and-restore.
        extern "C" {
            fn umask(mask: u32) -> u32;
        }
        let current = umask(0o022);
        umask(current);
        current
    }
}
