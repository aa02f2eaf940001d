//! Home-directory lock: at most one BoxliteRuntime per BOXLITE_HOME.
//!
//! The registry is in-memory only, so two runtimes sharing a home would each
//! believe they own every box launched from it. An advisory `flock` on
//! `<home>/.lock` turns that into a construction-time `RuntimeInit` error.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::runtime::layout::FilesystemLayout;
use boxlite_shared::errors::{BoxliteError, BoxliteResult};

/// Exclusive lock on a runtime home directory.
///
/// Released when dropped, or by the OS when the process exits.
#[derive(Debug)]
pub struct RuntimeLock {
    file: File,
    path: PathBuf,
}

impl RuntimeLock {
    /// Try to take the lock without blocking.
    ///
    /// Fails with `RuntimeInit` if another runtime holds it.
    pub fn acquire(layout: &FilesystemLayout) -> BoxliteResult<Self> {
        let lock_path = layout.lock_file();

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| BoxliteError::Storage(format!("failed to open lock file: {}", e)))?;

        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Err(BoxliteError::RuntimeInit(format!(
                    "Another BoxliteRuntime is already using directory: {}",
                    layout.home_dir().display()
                )));
            }
            return Err(BoxliteError::Storage(format!(
                "failed to acquire lock: {}",
                err
            )));
        }

        tracing::debug!(lock_path = %lock_path.display(), "Acquired runtime lock");

        Ok(RuntimeLock {
            file,
            path: lock_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RuntimeLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        tracing::debug!(lock_path = %self.path.display(), "Released runtime lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    fn layout(temp: &TempDir) -> FilesystemLayout {
        let layout = FilesystemLayout::new(temp.path().to_path_buf());
        layout.prepare().unwrap();
        layout
    }

    #[test]
    fn test_acquire_lock() {
        let temp_dir = TempDir::new().unwrap();
        let lock = RuntimeLock::acquire(&layout(&temp_dir)).unwrap();

        assert!(lock.path().exists());
        assert_eq!(lock.path(), temp_dir.path().join(".lock"));
    }

    #[test]
    fn test_second_acquire_is_runtime_init_error() {
        let temp_dir = TempDir::new().unwrap();
        let layout = layout(&temp_dir);

        let _held = RuntimeLock::acquire(&layout).unwrap();
        let err = RuntimeLock::acquire(&layout).unwrap_err();

        assert!(matches!(err, BoxliteError::RuntimeInit(_)));
        assert!(err.to_string().contains("Another BoxliteRuntime"));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let layout = layout(&temp_dir);

        drop(RuntimeLock::acquire(&layout).unwrap());

        let _again = RuntimeLock::acquire(&layout).unwrap();
    }

    #[test]
    fn test_lock_across_threads() {
        let temp_dir = TempDir::new().unwrap();
        let layout = layout(&temp_dir);
        let _held = RuntimeLock::acquire(&layout).unwrap();

        let other = layout.clone();
        let result = thread::spawn(move || RuntimeLock::acquire(&other).is_err())
            .join()
            .unwrap();
        assert!(result);
    }

    #[test]
    fn test_different_homes_are_independent() {
        let temp1 = TempDir::new().unwrap();
        let temp2 = TempDir::new().unwrap();

        let _lock1 = RuntimeLock::acquire(&layout(&temp1)).unwrap();
        let _lock2 = RuntimeLock::acquire(&layout(&temp2)).unwrap();
    }
}
