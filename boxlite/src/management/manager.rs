//! Thread-safe box registry implementation.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::litebox::{BoxConfig, BoxState, BoxStatus, ExitReason, Transition};
use crate::metrics::{ResourceSampler, RuntimeMetricsStorage};
use crate::runtime::options::{BoxOptions, BoxliteOptions};
use crate::runtime::types::{BoxID, BoxIdGenerator, BoxInfo, ResourceUsage};
use crate::vmm::{ExitStatus, IsolationBackend};
use boxlite_shared::errors::{BoxliteError, BoxliteResult};

/// Timeouts the registry applies to backend and sampler calls.
#[derive(Debug, Clone, Copy)]
pub struct ManagerSettings {
    pub start_timeout: Duration,
    pub sample_timeout: Duration,
    pub kill_grace: Duration,
}

impl From<&BoxliteOptions> for ManagerSettings {
    fn from(options: &BoxliteOptions) -> Self {
        Self {
            start_timeout: options.start_timeout,
            sample_timeout: options.sample_timeout,
            kill_grace: options.kill_grace,
        }
    }
}

/// Thread-safe registry: the single source of truth for every box on the host.
///
/// Cloneable via `Arc`. Concurrency model:
///
/// - **Table lock** (`RwLock`): guards membership, and orders state commits
///   against `list`. Writers of a `BoxState` hold it in read mode for the
///   commit; `list` holds it in write mode while it copies every state, so a
///   listing is one instant of the whole registry. Never held across an await.
/// - **Per-box op lock** (`tokio::sync::Mutex`): serializes every mutating
///   operation on one box, including the exit watcher. Operations on
///   different boxes run concurrently.
/// - **Per-box state lock** (`parking_lot::RwLock`): held only for the
///   instant a `BoxState` is read or replaced, so readers never observe a
///   torn record.
///
/// `start`, `stop`, `pause` and `resume` run in a spawned task that owns the
/// op lock. Dropping the caller's future therefore never leaves a box half
/// way through a transition.
#[derive(Clone)]
pub struct BoxManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    table: RwLock<BoxTable>,
    ids: BoxIdGenerator,
    backend: Arc<dyn IsolationBackend>,
    sampler: Arc<dyn ResourceSampler>,
    metrics: RuntimeMetricsStorage,
    settings: ManagerSettings,
}

#[derive(Default)]
struct BoxTable {
    /// Keyed by monotonic id, so iteration order is creation order.
    boxes: BTreeMap<BoxID, Arc<BoxSlot>>,
    names: HashMap<String, BoxID>,
}

struct BoxSlot {
    config: BoxConfig,
    state: parking_lot::RwLock<BoxState>,
    op_lock: tokio::sync::Mutex<()>,
    /// Cancels the exit watcher armed by the last successful start.
    watcher: parking_lot::Mutex<Option<CancellationToken>>,
    last_sample: parking_lot::Mutex<Option<ResourceUsage>>,
    /// Set once the box left the table; late backend events are dropped.
    reaped: AtomicBool,
}

impl BoxSlot {
    fn new(config: BoxConfig) -> Self {
        let state = BoxState::new(config.created_at);
        Self {
            config,
            state: parking_lot::RwLock::new(state),
            op_lock: tokio::sync::Mutex::new(()),
            watcher: parking_lot::Mutex::new(None),
            last_sample: parking_lot::Mutex::new(None),
            reaped: AtomicBool::new(false),
        }
    }

    fn id(&self) -> &BoxID {
        &self.config.id
    }

    fn state(&self) -> BoxState {
        self.state.read().clone()
    }

    fn is_reaped(&self) -> bool {
        self.reaped.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> BoxliteResult<()> {
        if self.is_reaped() {
            return Err(BoxliteError::NotFound(self.id().to_string()));
        }
        Ok(())
    }

    fn disarm_watcher(&self) {
        if let Some(token) = self.watcher.lock().take() {
            token.cancel();
        }
    }

    /// Last cached sample, or zero when none was ever taken.
    fn cached_usage(&self) -> ResourceUsage {
        self.last_sample.lock().unwrap_or_default()
    }
}

impl BoxManager {
    /// Create an empty registry driving `backend` and reading through `sampler`.
    pub fn new(
        backend: Arc<dyn IsolationBackend>,
        sampler: Arc<dyn ResourceSampler>,
        metrics: RuntimeMetricsStorage,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                table: RwLock::new(BoxTable::default()),
                ids: BoxIdGenerator::new(),
                backend,
                sampler,
                metrics,
                settings,
            }),
        }
    }

    /// Register a new box in state Created.
    ///
    /// # Errors
    ///
    /// `InvalidSpec` if the options are invalid or the name is taken.
    pub fn create(&self, options: &BoxOptions) -> BoxliteResult<BoxInfo> {
        options.resolve()?;

        // Ids are drawn under the table lock so id order is insertion order
        let slot = {
            let mut table = self.inner.write_table()?;
            if let Some(name) = &options.name
                && table.names.contains_key(name)
            {
                return Err(BoxliteError::InvalidSpec(format!(
                    "box name '{}' is already in use",
                    name
                )));
            }

            let config = BoxConfig::new(self.inner.ids.next_id()?, options)?;
            let slot = Arc::new(BoxSlot::new(config));
            if let Some(name) = &slot.config.name {
                table.names.insert(name.clone(), slot.id().clone());
            }
            table.boxes.insert(slot.id().clone(), Arc::clone(&slot));
            slot
        };

        self.inner.metrics.record_created();
        tracing::info!(
            box_id = %slot.id(),
            name = ?slot.config.name,
            image = %slot.config.image,
            cpus = slot.config.cpus,
            memory_mib = slot.config.memory_mib,
            "Box created"
        );

        Ok(BoxInfo::new(&slot.config, &slot.state(), None))
    }

    /// Launch the box process. Created → Running, or Created → Failed.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no box matches `key`
    /// - `InvalidTransition` if the box is not Created
    /// - `StartFailed` if the backend failed or timed out (box is now Failed)
    pub async fn start(&self, key: &str) -> BoxliteResult<()> {
        let slot = self.inner.lookup(key)?;
        let inner = Arc::clone(&self.inner);
        detached(async move { inner.start_box(slot).await }).await
    }

    /// Terminate the box process. Running/Paused → Stopped.
    ///
    /// Sends a graceful terminate and waits up to `timeout`. On timeout the
    /// process is force-killed; the box still ends Stopped (`forced: true`).
    ///
    /// # Errors
    ///
    /// - `NotFound`, `InvalidTransition` as for `start`
    /// - `StopFailed` if the backend rejected the forced terminate; the box
    ///   keeps its state and pid
    pub async fn stop(&self, key: &str, timeout: Duration) -> BoxliteResult<()> {
        let slot = self.inner.lookup(key)?;
        let inner = Arc::clone(&self.inner);
        detached(async move { inner.stop_box(slot, timeout).await }).await
    }

    /// Suspend the box process. Running → Paused.
    pub async fn pause(&self, key: &str) -> BoxliteResult<()> {
        let slot = self.inner.lookup(key)?;
        let inner = Arc::clone(&self.inner);
        detached(async move { inner.pause_box(slot).await }).await
    }

    /// Continue a suspended box. Paused → Running.
    pub async fn resume(&self, key: &str) -> BoxliteResult<()> {
        let slot = self.inner.lookup(key)?;
        let inner = Arc::clone(&self.inner);
        detached(async move { inner.resume_box(slot).await }).await
    }

    /// Snapshot one box, with a fresh resource sample if it is Running.
    pub async fn get(&self, key: &str) -> BoxliteResult<BoxInfo> {
        let slot = self.inner.lookup(key)?;
        Ok(self.inner.snapshot(&slot).await)
    }

    /// Snapshot every box in creation order.
    ///
    /// Every state is copied in one critical section, so the listing never
    /// mixes states from different instants. Running boxes are then sampled
    /// concurrently, each under `sample_timeout`. A sampling gap never fails
    /// the listing; the box reports its last known usage (or zero).
    pub async fn list(&self) -> BoxliteResult<Vec<BoxInfo>> {
        let captured: Vec<(Arc<BoxSlot>, BoxState)> = {
            let table = self.inner.write_table()?;
            table
                .boxes
                .values()
                .map(|slot| (Arc::clone(slot), slot.state()))
                .collect()
        };
        Ok(join_all(
            captured
                .into_iter()
                .map(|(slot, state)| async move { self.inner.describe(&slot, state).await }),
        )
        .await)
    }

    /// Whether `key` names a box in the table.
    pub fn exists(&self, key: &str) -> BoxliteResult<bool> {
        match self.inner.lookup(key) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete a box from the table. Its id is never reused.
    ///
    /// Without `force` only a Stopped, Exited or Failed box may be removed.
    /// With `force` a Running or Paused box is killed first, and a Created
    /// box is dropped without ever launching.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no box matches `key`
    /// - `InvalidTransition` if the box is not terminal and `force` is unset
    /// - `StopFailed` if the forced kill was rejected; the box stays registered
    pub async fn remove(&self, key: &str, force: bool) -> BoxliteResult<()> {
        let slot = self.inner.lookup(key)?;
        let inner = Arc::clone(&self.inner);
        detached(async move { inner.remove_box(slot, force).await }).await
    }

    /// Stop every Running or Paused box, waiting up to `timeout` each.
    ///
    /// Best-effort: failures are logged, not returned.
    pub async fn stop_all(&self, timeout: Duration) -> BoxliteResult<()> {
        let active: Vec<Arc<BoxSlot>> = self
            .inner
            .read_table()?
            .boxes
            .values()
            .filter(|slot| slot.state.read().status.is_active())
            .cloned()
            .collect();

        let results = join_all(active.into_iter().map(|slot| {
            let inner = Arc::clone(&self.inner);
            let id = slot.id().clone();
            async move { (id, detached(async move { inner.stop_box(slot, timeout).await }).await) }
        }))
        .await;

        for (id, result) in results {
            match result {
                Ok(()) => {}
                // Exited on its own while we were collecting
                Err(e) if e.is_invalid_transition() || e.is_not_found() => {}
                Err(e) => tracing::warn!(box_id = %id, error = %e, "Failed to stop box"),
            }
        }
        Ok(())
    }

    /// Get the number of boxes being tracked.
    pub fn count(&self) -> BoxliteResult<usize> {
        Ok(self.inner.read_table()?.boxes.len())
    }
}

/// Run `fut` on its own task so the caller dropping its future cannot
/// interrupt a transition midway.
async fn detached<F>(fut: F) -> BoxliteResult<()>
where
    F: std::future::Future<Output = BoxliteResult<()>> + Send + 'static,
{
    tokio::spawn(fut)
        .await
        .map_err(|e| BoxliteError::Internal(format!("box operation task failed: {}", e)))?
}

// ============================================================================
// REGISTRY IMPLEMENTATION
// ============================================================================

impl ManagerInner {
    fn read_table(&self) -> BoxliteResult<RwLockReadGuard<'_, BoxTable>> {
        self.table
            .read()
            .map_err(|e| BoxliteError::Internal(format!("manager lock poisoned: {}", e)))
    }

    fn write_table(&self) -> BoxliteResult<RwLockWriteGuard<'_, BoxTable>> {
        self.table
            .write()
            .map_err(|e| BoxliteError::Internal(format!("manager lock poisoned: {}", e)))
    }

    /// Resolve `key` as an exact id first, then as a name.
    fn lookup(&self, key: &str) -> BoxliteResult<Arc<BoxSlot>> {
        let table = self.read_table()?;
        let slot = match table.boxes.get(key) {
            Some(slot) => Some(slot),
            None => table
                .names
                .get(key)
                .and_then(|id| table.boxes.get(id))
                .filter(|slot| slot.config.matches(key)),
        };
        slot.cloned()
            .ok_or_else(|| BoxliteError::NotFound(key.to_string()))
    }

    async fn start_box(self: Arc<Self>, slot: Arc<BoxSlot>) -> BoxliteResult<()> {
        let _op = slot.op_lock.lock().await;
        slot.ensure_live()?;
        slot.state.read().status.apply(Transition::Start)?;

        let spec = slot.config.launch_spec();
        tracing::debug!(box_id = %slot.id(), backend = self.backend.name(), "Launching box");

        // A panicking backend must still resolve the box to Failed
        let launch = AssertUnwindSafe(self.backend.launch(&spec)).catch_unwind();
        let failure = match tokio::time::timeout(self.settings.start_timeout, launch).await {
            Ok(Ok(Ok(pid))) => {
                self.commit(&slot, |state| state.mark_running(pid))?;
                self.metrics.record_started();
                self.arm_watcher(&slot, pid);
                tracing::info!(box_id = %slot.id(), pid, "Box started");
                return Ok(());
            }
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(_panic)) => "isolation backend panicked during launch".to_string(),
            Err(_) => format!(
                "launch did not complete within {:?}",
                self.settings.start_timeout
            ),
        };

        self.commit(&slot, |state| state.mark_start_failed(failure.clone()))?;
        self.metrics.record_terminal(BoxStatus::Failed, false);
        tracing::error!(box_id = %slot.id(), error = %failure, "Box failed to start");
        Err(BoxliteError::StartFailed(failure))
    }

    async fn stop_box(self: Arc<Self>, slot: Arc<BoxSlot>, timeout: Duration) -> BoxliteResult<()> {
        let _op = slot.op_lock.lock().await;
        slot.ensure_live()?;
        self.stop_locked(&slot, Some(timeout)).await
    }

    /// Stop an active box; the caller holds its op lock.
    ///
    /// `graceful` bounds the wait after a graceful terminate. `None` kills
    /// the process straight away.
    async fn stop_locked(
        self: &Arc<Self>,
        slot: &Arc<BoxSlot>,
        graceful: Option<Duration>,
    ) -> BoxliteResult<()> {
        let (status, pid) = {
            let state = slot.state.read();
            (state.status, state.pid)
        };
        status.apply(Transition::Stop)?;
        let pid = pid.ok_or_else(|| {
            BoxliteError::Internal(format!("active box {} has no pid", slot.id()))
        })?;

        slot.disarm_watcher();

        // A stopped process can't act on a graceful terminate
        if status == BoxStatus::Paused
            && let Err(e) = self.backend.resume(pid).await
        {
            tracing::warn!(box_id = %slot.id(), pid, error = %e, "Failed to resume paused box before stop");
        }

        let exited: Option<ExitStatus> = match graceful {
            Some(timeout) => self.stop_gracefully(slot, pid, timeout).await,
            None => None,
        };

        let (forced, exit_code) = match exited {
            Some(exit) => (false, exit.code),
            None => {
                if let Err(e) = self.backend.terminate(pid, true).await {
                    self.arm_watcher(slot, pid);
                    tracing::error!(box_id = %slot.id(), pid, error = %e, "Forced stop rejected");
                    return Err(BoxliteError::StopFailed(e.to_string()));
                }
                match tokio::time::timeout(self.settings.kill_grace, self.backend.wait(pid)).await {
                    Ok(Ok(exit)) => (true, exit.code),
                    _ => {
                        tracing::warn!(box_id = %slot.id(), pid, "Kill delivered but exit not confirmed");
                        (true, None)
                    }
                }
            }
        };

        self.commit(slot, |state| {
            state.mark_terminated(Transition::Stop, ExitReason::Stopped { forced, exit_code })
        })?;
        slot.last_sample.lock().take();
        self.backend.release(pid);
        self.metrics.record_terminal(BoxStatus::Stopped, true);
        tracing::info!(box_id = %slot.id(), pid, forced, "Box stopped");
        Ok(())
    }

    /// Send a graceful terminate and wait up to `timeout` for the exit.
    async fn stop_gracefully(&self, slot: &BoxSlot, pid: u32, timeout: Duration) -> Option<ExitStatus> {
        let graceful = async {
            self.backend.terminate(pid, false).await?;
            self.backend.wait(pid).await
        };
        match tokio::time::timeout(timeout, graceful).await {
            Ok(Ok(exit)) => Some(exit),
            Ok(Err(e)) => {
                tracing::warn!(box_id = %slot.id(), pid, error = %e, "Graceful stop failed, escalating");
                None
            }
            Err(_) => {
                tracing::info!(box_id = %slot.id(), pid, ?timeout, "Graceful stop timed out, escalating");
                None
            }
        }
    }

    async fn remove_box(self: Arc<Self>, slot: Arc<BoxSlot>, force: bool) -> BoxliteResult<()> {
        let _op = slot.op_lock.lock().await;
        slot.ensure_live()?;

        let status = slot.state.read().status;
        if !force {
            status.ensure_removable()?;
        } else if status.is_active() {
            tracing::info!(box_id = %slot.id(), status = %status, "Force removing active box");
            self.stop_locked(&slot, None).await?;
        }

        {
            let mut table = self.write_table()?;
            table.boxes.remove(slot.id());
            if let Some(name) = &slot.config.name {
                table.names.remove(name);
            }
        }
        slot.reaped.store(true, Ordering::Release);
        slot.disarm_watcher();

        self.metrics.record_removed();
        tracing::info!(box_id = %slot.id(), force, "Box removed");
        Ok(())
    }

    async fn pause_box(self: Arc<Self>, slot: Arc<BoxSlot>) -> BoxliteResult<()> {
        let _op = slot.op_lock.lock().await;
        slot.ensure_live()?;
        let pid = self.active_pid(&slot, Transition::Pause)?;

        self.backend.pause(pid).await?;
        self.commit(&slot, BoxState::mark_paused)?;
        tracing::info!(box_id = %slot.id(), pid, "Box paused");
        Ok(())
    }

    async fn resume_box(self: Arc<Self>, slot: Arc<BoxSlot>) -> BoxliteResult<()> {
        let _op = slot.op_lock.lock().await;
        slot.ensure_live()?;
        let pid = self.active_pid(&slot, Transition::Resume)?;

        self.backend.resume(pid).await?;
        self.commit(&slot, BoxState::mark_resumed)?;
        tracing::info!(box_id = %slot.id(), pid, "Box resumed");
        Ok(())
    }

    /// Replace the state of `slot` through `update`.
    ///
    /// Holds the table lock in read mode so the commit cannot land in the
    /// middle of a `list` copy.
    fn commit<R>(
        &self,
        slot: &BoxSlot,
        update: impl FnOnce(&mut BoxState) -> BoxliteResult<R>,
    ) -> BoxliteResult<R> {
        let _table = self.read_table()?;
        let mut state = slot.state.write();
        update(&mut state)
    }

    /// Check `transition` is legal and return the pid it acts on.
    fn active_pid(&self, slot: &BoxSlot, transition: Transition) -> BoxliteResult<u32> {
        let state = slot.state.read();
        state.status.apply(transition)?;
        state.pid.ok_or_else(|| {
            BoxliteError::Internal(format!("active box {} has no pid", slot.id()))
        })
    }

    // ========================================================================
    // EXIT WATCH
    // ========================================================================

    /// Watch `pid` in the background and post its exit through the op lock.
    fn arm_watcher(self: &Arc<Self>, slot: &Arc<BoxSlot>, pid: u32) {
        let token = CancellationToken::new();
        if let Some(previous) = slot.watcher.lock().replace(token.clone()) {
            previous.cancel();
        }

        let inner = Arc::clone(self);
        let slot = Arc::clone(slot);
        tokio::spawn(async move { inner.watch_exit(slot, pid, token).await });
    }

    async fn watch_exit(&self, slot: Arc<BoxSlot>, pid: u32, token: CancellationToken) {
        let result = tokio::select! {
            _ = token.cancelled() => return,
            result = self.backend.wait(pid) => result,
        };

        let _op = slot.op_lock.lock().await;
        // stop/remove may have claimed the box while we waited for the lock
        if token.is_cancelled() || slot.is_reaped() {
            return;
        }

        let committed = self.commit(&slot, |state| {
            if state.pid != Some(pid) {
                return Ok(None);
            }
            let was = state.status;
            let (transition, reason) = exit_transition(was, result);
            state.mark_terminated(transition, reason.clone())?;
            Ok(Some((was, state.status, reason)))
        });
        let (was, status, reason) = match committed {
            Ok(Some(outcome)) => outcome,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(box_id = %slot.id(), pid, error = %e, "Dropped exit event");
                return;
            }
        };

        slot.watcher.lock().take();
        slot.last_sample.lock().take();
        self.backend.release(pid);
        self.metrics.record_terminal(status, true);
        tracing::info!(box_id = %slot.id(), pid, from = ?was, status = ?status, reason = %reason, "Box process ended");
    }

    // ========================================================================
    // SNAPSHOTS
    // ========================================================================

    async fn snapshot(&self, slot: &Arc<BoxSlot>) -> BoxInfo {
        self.describe(slot, slot.state()).await
    }

    /// Build the public view of `state`, sampling if it is Running.
    async fn describe(&self, slot: &BoxSlot, state: BoxState) -> BoxInfo {
        let usage = match (state.status, state.pid) {
            (BoxStatus::Running, Some(pid)) => Some(self.sample(slot, pid).await),
            _ => None,
        };
        BoxInfo::new(&slot.config, &state, usage)
    }

    /// Fresh sample under `sample_timeout`, falling back to the cached value.
    async fn sample(&self, slot: &BoxSlot, pid: u32) -> ResourceUsage {
        let sampler = Arc::clone(&self.sampler);
        let read = tokio::task::spawn_blocking(move || sampler.sample(pid));

        match tokio::time::timeout(self.settings.sample_timeout, read).await {
            Ok(Ok(Ok(usage))) => {
                *slot.last_sample.lock() = Some(usage);
                usage
            }
            Ok(Ok(Err(e))) => {
                tracing::trace!(box_id = %slot.id(), pid, error = %e, "Resource sample unavailable");
                slot.cached_usage()
            }
            Ok(Err(e)) => {
                tracing::warn!(box_id = %slot.id(), pid, error = %e, "Resource sampler task failed");
                slot.cached_usage()
            }
            Err(_) => {
                tracing::debug!(box_id = %slot.id(), pid, "Resource sample timed out");
                slot.cached_usage()
            }
        }
    }
}

/// Map an observed process end onto the transition it causes from `status`.
///
/// The machine has no Paused → Exited/Failed edge, so any end while paused
/// is recorded as Stopped.
fn exit_transition(
    status: BoxStatus,
    result: BoxliteResult<ExitStatus>,
) -> (Transition, ExitReason) {
    match (status, result) {
        (BoxStatus::Paused, Ok(exit)) => (
            Transition::Stop,
            ExitReason::Terminated {
                code: exit.code,
                signal: exit.signal,
            },
        ),
        (BoxStatus::Paused, Err(e)) => (
            Transition::Stop,
            ExitReason::BackendError {
                message: e.to_string(),
            },
        ),
        (_, Ok(ExitStatus { code: Some(code), .. })) => {
            (Transition::Exit, ExitReason::Exited { code })
        }
        (_, Ok(exit)) => (
            Transition::Fail,
            ExitReason::Crashed {
                signal: exit.signal,
            },
        ),
        (_, Err(e)) => (
            Transition::Fail,
            ExitReason::BackendError {
                message: e.to_string(),
            },
        ),
    }
}

// Compile-time assertion: the registry is shared across tasks
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<BoxManager>;
};
