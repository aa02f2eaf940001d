//! Constants for BoxLite runtime
//!
//! Centralized location for hardcoded values, paths, and timeouts.

// Re-export shared constants from boxlite-shared
pub use boxlite_shared::constants::{log_targets, resources};

pub mod envs {
    pub const BOXLITE_HOME: &str = "BOXLITE_HOME";

    /// Standard tracing filter variable, read by `init_logging_for`.
    pub const RUST_LOG: &str = "RUST_LOG";
}

/// Default timeouts applied by `BoxliteOptions::default()`.
pub mod timeouts {
    use std::time::Duration;

    /// Upper bound on a backend launch.
    pub const START_TIMEOUT: Duration = Duration::from_secs(30);

    /// Per-box bound on one resource sample during `get`/`list`.
    pub const SAMPLE_TIMEOUT: Duration = Duration::from_millis(500);

    /// How long to wait for a force-killed process to be reaped.
    pub const KILL_GRACE: Duration = Duration::from_secs(5);

    /// Graceful stop window used by `shutdown` for each remaining box.
    pub const SHUTDOWN_STOP_TIMEOUT: Duration = Duration::from_secs(10);
}

/// File naming patterns
pub mod filenames {
    /// Lock file name
    pub const LOCK_FILE: &str = ".lock";

    /// Prefix of the daily-rotated runtime log
    pub const LOG_FILE: &str = "boxlite.log";
}
