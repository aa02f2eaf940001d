use boxlite_shared::errors::{BoxliteError, BoxliteResult};
use std::path::{Path, PathBuf};

/// Directory structure constants
pub mod dirs {
    /// Base directory name for BoxLite data
    pub const BOXLITE_DIR: &str = ".boxlite";

    /// Subdirectory for log files
    pub const LOGS_DIR: &str = "logs";
}

// ============================================================================
// FILESYSTEM LAYOUT (home directory)
// ============================================================================

/// On-disk layout of a runtime home directory.
///
/// ```text
/// ~/.boxlite/
/// ├── .lock          # RuntimeLock (one runtime per home)
/// └── logs/
///     └── boxlite.log.YYYY-MM-DD
/// ```
#[derive(Clone, Debug)]
pub struct FilesystemLayout {
    home_dir: PathBuf,
}

impl FilesystemLayout {
    pub fn new(home_dir: PathBuf) -> Self {
        Self { home_dir }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::LOGS_DIR)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.home_dir
            .join(crate::runtime::constants::filenames::LOCK_FILE)
    }

    /// Initialize the filesystem structure.
    ///
    /// Creates the home and logs directories if missing.
    pub fn prepare(&self) -> BoxliteResult<()> {
        std::fs::create_dir_all(&self.home_dir)
            .map_err(|e| BoxliteError::Storage(format!("failed to create home: {e}")))?;

        std::fs::create_dir_all(self.logs_dir())
            .map_err(|e| BoxliteError::Storage(format!("failed to create logs dir: {e}")))?;

        Ok(())
    }
}
