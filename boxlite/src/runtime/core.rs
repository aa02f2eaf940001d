//! High-level runtime facade.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::controller::ProcessController;
use crate::management::{BoxManager, ManagerSettings};
use crate::metrics::{ResourceSampler, RuntimeMetrics, RuntimeMetricsStorage, SysinfoSampler};
use crate::runtime::constants::timeouts;
use crate::runtime::layout::FilesystemLayout;
use crate::runtime::lock::RuntimeLock;
use crate::runtime::options::{BoxOptions, BoxliteOptions};
use crate::runtime::types::BoxInfo;
use crate::util::init_logging_for;
use crate::vmm::IsolationBackend;
use boxlite_shared::errors::{BoxliteError, BoxliteResult};
use tokio::sync::OnceCell;

// ============================================================================
// PUBLIC API
// ============================================================================

/// BoxliteRuntime is the entry point for creating and managing boxes.
///
/// Wires the box registry to an isolation backend and a resource sampler.
/// There is no hidden global instance: construct one explicitly and pass it
/// (or a clone) to every call site, then call [`shutdown`](Self::shutdown).
///
/// **Lock Behavior**: Only one `BoxliteRuntime` can use a given `BOXLITE_HOME`
/// directory at a time. The filesystem lock is released when the last clone
/// is dropped.
///
/// **Cloning**: Runtime is cheaply cloneable via `Arc` - all clones share the same state.
#[derive(Clone)]
pub struct BoxliteRuntime {
    inner: RuntimeInner,
}

/// Shared runtime state.
pub(crate) type RuntimeInner = Arc<RuntimeInnerImpl>;

pub(crate) struct RuntimeInnerImpl {
    pub(crate) box_manager: BoxManager,
    pub(crate) backend: Arc<dyn IsolationBackend>,
    /// Runtime-wide metrics (AtomicU64 based, lock-free)
    pub(crate) runtime_metrics: RuntimeMetricsStorage,
    pub(crate) layout: FilesystemLayout,
    /// Set as soon as shutdown begins; every later call is rejected.
    is_shutdown: AtomicBool,
    shutdown_done: OnceCell<()>,
    _runtime_lock: RuntimeLock,
}

// ============================================================================
// RUNTIME IMPLEMENTATION
// ============================================================================

impl BoxliteRuntime {
    /// Create a runtime backed by host processes and `sysinfo` sampling.
    ///
    /// **Prepare Before Execute**: All setup (filesystem, logging, lock,
    /// registry) completes before returning. No partial initialization states.
    ///
    /// # Errors
    ///
    /// `RuntimeInit` if:
    /// - The options are invalid (relative home, zero timeout)
    /// - Filesystem initialization fails
    /// - Another `BoxliteRuntime` is already using the same home directory
    pub fn new(options: BoxliteOptions) -> BoxliteResult<Self> {
        let sampler = SysinfoSampler::with_lock_timeout(options.sample_timeout);
        Self::with_components(
            options,
            Arc::new(ProcessController::new()),
            Arc::new(sampler),
        )
    }

    /// Create a runtime with default options.
    ///
    /// Equivalent to `BoxliteRuntime::new(BoxliteOptions::default())`. Returns
    /// an owned runtime; call it once and share the result.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use boxlite::BoxliteRuntime;
    ///
    /// let runtime = BoxliteRuntime::with_defaults()?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn with_defaults() -> BoxliteResult<Self> {
        Self::new(BoxliteOptions::default())
    }

    /// Create a runtime with a custom isolation backend and sampler.
    pub fn with_components(
        options: BoxliteOptions,
        backend: Arc<dyn IsolationBackend>,
        sampler: Arc<dyn ResourceSampler>,
    ) -> BoxliteResult<Self> {
        // Validate Early: Check preconditions before expensive work
        options.validate().map_err(|e| init_error("invalid options", e))?;

        let layout = FilesystemLayout::new(options.home_dir.clone());
        layout.prepare().map_err(|e| {
            init_error(
                &format!("failed to initialize filesystem at {}", layout.home_dir().display()),
                e,
            )
        })?;

        init_logging_for(&layout).map_err(|e| init_error("failed to initialize logging", e))?;

        let runtime_lock =
            RuntimeLock::acquire(&layout).map_err(|e| init_error("failed to acquire runtime lock", e))?;

        let runtime_metrics = RuntimeMetricsStorage::new();
        let box_manager = BoxManager::new(
            Arc::clone(&backend),
            sampler,
            runtime_metrics.clone(),
            ManagerSettings::from(&options),
        );

        let inner = Arc::new(RuntimeInnerImpl {
            box_manager,
            backend,
            runtime_metrics,
            layout,
            is_shutdown: AtomicBool::new(false),
            shutdown_done: OnceCell::new(),
            _runtime_lock: runtime_lock,
        });

        tracing::info!(
            home_dir = %inner.layout.home_dir().display(),
            backend = inner.backend.name(),
            "Initialized runtime"
        );

        Ok(Self { inner })
    }

    /// Register a new box in state Created.
    ///
    /// Validates the options (`cpus`/`memory_mib` positive, image non-empty,
    /// name unused) but launches nothing; call [`start`](Self::start) for that.
    pub fn create(&self, options: BoxOptions) -> BoxliteResult<BoxInfo> {
        self.inner.ensure_open()?;
        self.inner.box_manager.create(&options)
    }

    /// Launch a Created box. `id` may be the box id or its name.
    pub async fn start(&self, id: impl AsRef<str>) -> BoxliteResult<()> {
        self.inner.ensure_open()?;
        self.inner.box_manager.start(id.as_ref()).await
    }

    /// Stop a Running or Paused box, force-killing it after `timeout`.
    pub async fn stop(&self, id: impl AsRef<str>, timeout: Duration) -> BoxliteResult<()> {
        self.inner.ensure_open()?;
        self.inner.box_manager.stop(id.as_ref(), timeout).await
    }

    pub async fn pause(&self, id: impl AsRef<str>) -> BoxliteResult<()> {
        self.inner.ensure_open()?;
        self.inner.box_manager.pause(id.as_ref()).await
    }

    pub async fn resume(&self, id: impl AsRef<str>) -> BoxliteResult<()> {
        self.inner.ensure_open()?;
        self.inner.box_manager.resume(id.as_ref()).await
    }

    /// Snapshot of one box, with live usage if it is Running.
    pub async fn get(&self, id: impl AsRef<str>) -> BoxliteResult<BoxInfo> {
        self.inner.ensure_open()?;
        self.inner.box_manager.get(id.as_ref()).await
    }

    /// Snapshot of every box, in creation order.
    pub async fn list_info(&self) -> BoxliteResult<Vec<BoxInfo>> {
        self.inner.ensure_open()?;
        self.inner.box_manager.list().await
    }

    /// Check if a box with the given id or name is registered.
    pub fn exists(&self, id: impl AsRef<str>) -> BoxliteResult<bool> {
        self.inner.ensure_open()?;
        self.inner.box_manager.exists(id.as_ref())
    }

    /// Remove a box by id or name.
    ///
    /// Without `force` the box must be Stopped, Exited or Failed. With
    /// `force` a Running or Paused box is killed first.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn example(runtime: &boxlite::BoxliteRuntime, id: &boxlite::BoxID) -> boxlite::BoxliteResult<()> {
    /// // Kills the box if it is still running
    /// runtime.remove(id, true).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn remove(&self, id: impl AsRef<str>, force: bool) -> BoxliteResult<()> {
        self.inner.ensure_open()?;
        self.inner.box_manager.remove(id.as_ref(), force).await
    }

    /// Get runtime-wide metrics.
    ///
    /// Returns a handle for querying aggregate statistics across all boxes.
    ///
    /// **Lock-Free**: Uses AtomicU64 internally, no lock needed!
    pub fn metrics(&self) -> RuntimeMetrics {
        RuntimeMetrics::new(self.inner.runtime_metrics.clone())
    }

    /// Stop every active box and release the backend.
    ///
    /// Each box gets `timeout` to exit gracefully before it is force-killed.
    /// After this starts, every other call fails with `BoxliteError::Stopped`.
    /// Idempotent: concurrent and repeated calls wait for the first one.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> BoxliteResult<()> {
        let timeout = timeout.unwrap_or(timeouts::SHUTDOWN_STOP_TIMEOUT);
        self.inner.is_shutdown.store(true, Ordering::Release);

        self.inner
            .shutdown_done
            .get_or_init(|| async {
                tracing::info!("Shutting down runtime");

                if let Err(e) = self.inner.box_manager.stop_all(timeout).await {
                    tracing::warn!(error = %e, "Failed to stop boxes during shutdown");
                }
                if let Err(e) = self.inner.backend.shutdown().await {
                    tracing::warn!(error = %e, "Isolation backend shutdown failed");
                }

                tracing::info!("Runtime shut down");
            })
            .await;

        Ok(())
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown.load(Ordering::Acquire)
    }
}

// ============================================================================
// INTERNAL HELPERS
// ============================================================================

impl RuntimeInnerImpl {
    fn ensure_open(&self) -> BoxliteResult<()> {
        if self.is_shutdown.load(Ordering::Acquire) {
            return Err(BoxliteError::Stopped(
                "runtime has been shut down".into(),
            ));
        }
        Ok(())
    }
}

/// Fold any construction failure into `RuntimeInit`.
fn init_error(context: &str, err: BoxliteError) -> BoxliteError {
    match err {
        BoxliteError::RuntimeInit(_) => err,
        other => BoxliteError::RuntimeInit(format!("{}: {}", context, other)),
    }
}

impl std::fmt::Debug for BoxliteRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxliteRuntime")
            .field("home_dir", &self.inner.layout.home_dir())
            .field("backend", &self.inner.backend.name())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

// ============================================================================
// THREAD SAFETY ASSERTIONS
// ============================================================================

// Compile-time assertions to ensure BoxliteRuntime is Send + Sync
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<BoxliteRuntime>;
};
