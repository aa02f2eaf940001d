pub mod process;

use std::sync::OnceLock;

use crate::runtime::constants::{envs, filenames};
use crate::runtime::layout::FilesystemLayout;
use boxlite_shared::errors::{BoxliteError, BoxliteResult};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Keeps the background log writer alive for the rest of the process.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize tracing with file logging under the runtime home.
///
/// Logs are written to `{home_dir}/logs/boxlite.log` with daily rotation.
/// The filter comes from `RUST_LOG` and defaults to `info`. If the host
/// application already installed a global subscriber this is a no-op.
pub fn init_logging_for(layout: &FilesystemLayout) -> BoxliteResult<()> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(filenames::LOG_FILE)
        .build(layout.logs_dir())
        .map_err(|e| BoxliteError::Storage(format!("failed to open log file: {}", e)))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_env(envs::RUST_LOG)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| BoxliteError::Config(format!("invalid log filter: {}", e)))?;

    if register_to_tracing(non_blocking, env_filter) {
        let _ = LOG_GUARD.set(guard);
    }

    Ok(())
}

/// Install the global subscriber. Returns false if one was already set.
pub fn register_to_tracing(non_blocking: NonBlocking, env_filter: EnvFilter) -> bool {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false),
        )
        .try_init()
        .is_ok()
}
