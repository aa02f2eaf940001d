//! Shared fixtures for boxlite integration tests.
//!
//! [`FakeBackend`] and [`FakeSampler`] stand in for real processes so
//! lifecycle tests can script exits, slow launches and stubborn boxes
//! deterministically. [`TestContext`] wires them into a runtime rooted in a
//! temporary directory.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use boxlite::{
    BoxInfo, BoxStatus, BoxliteError, BoxliteOptions, BoxliteResult, BoxliteRuntime, ExitStatus,
    IsolationBackend, LaunchSpec, ResourceSampler, ResourceUsage,
};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::watch;

const SIGKILL: i32 = 9;
const SIGTERM: i32 = 15;

// ============================================================================
// FAKE BACKEND
// ============================================================================

/// Calls observed by [`FakeBackend`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Launch(String),
    Terminate { pid: u32, force: bool },
    Pause(u32),
    Resume(u32),
    Release(u32),
    Shutdown,
}

struct FakeProcess {
    spec: LaunchSpec,
    exit: watch::Sender<Option<ExitStatus>>,
    paused: bool,
}

/// Scriptable in-memory `IsolationBackend`.
///
/// Launched "processes" live until [`exit`](Self::exit) is called or they are
/// terminated. Graceful termination resolves with SIGTERM unless
/// [`ignore_sigterm`](Self::ignore_sigterm) is set; forced termination
/// resolves with SIGKILL unless [`refuse_kill`](Self::refuse_kill) is set.
#[derive(Default)]
pub struct FakeBackend {
    next_pid: AtomicU32,
    processes: Mutex<HashMap<u32, FakeProcess>>,
    launch_error: Mutex<Option<String>>,
    launch_delay: Mutex<Option<Duration>>,
    panic_on_launch: AtomicBool,
    ignore_sigterm: AtomicBool,
    refuse_kill: AtomicBool,
    calls: Mutex<Vec<BackendCall>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every following launch fails with `BoxliteError::Engine(message)`.
    pub fn fail_launches(&self, message: impl Into<String>) {
        *self.launch_error.lock() = Some(message.into());
    }

    /// Every following launch sleeps for `delay` before returning.
    pub fn delay_launches(&self, delay: Duration) {
        *self.launch_delay.lock() = Some(delay);
    }

    pub fn panic_on_launch(&self) {
        self.panic_on_launch.store(true, Ordering::SeqCst);
    }

    /// Graceful termination requests are accepted but have no effect.
    pub fn ignore_sigterm(&self) {
        self.ignore_sigterm.store(true, Ordering::SeqCst);
    }

    /// Forced termination requests fail.
    pub fn refuse_kill(&self, refuse: bool) {
        self.refuse_kill.store(refuse, Ordering::SeqCst);
    }

    /// Make the process behind `pid` end with `status`.
    pub fn exit(&self, pid: u32, status: ExitStatus) {
        if let Some(process) = self.processes.lock().get(&pid) {
            process.exit.send_replace(Some(status));
        }
    }

    /// Drop the process record, so a pending `wait` resolves with an error.
    pub fn lose(&self, pid: u32) {
        self.processes.lock().remove(&pid);
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.processes
            .lock()
            .get(&pid)
            .is_some_and(|p| p.exit.borrow().is_none())
    }

    pub fn is_paused(&self, pid: u32) -> bool {
        self.processes.lock().get(&pid).is_some_and(|p| p.paused)
    }

    pub fn launched(&self) -> Vec<LaunchSpec> {
        let processes = self.processes.lock();
        let mut pids: Vec<&u32> = processes.keys().collect();
        pids.sort();
        pids.into_iter().map(|pid| processes[pid].spec.clone()).collect()
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().push(call);
    }

    fn publish(&self, pid: u32, status: ExitStatus) -> BoxliteResult<()> {
        let processes = self.processes.lock();
        let process = processes
            .get(&pid)
            .ok_or_else(|| BoxliteError::NotFound(format!("pid {}", pid)))?;
        if process.exit.borrow().is_none() {
            process.exit.send_replace(Some(status));
        }
        Ok(())
    }

    fn set_paused(&self, pid: u32, paused: bool) -> BoxliteResult<()> {
        let mut processes = self.processes.lock();
        let process = processes
            .get_mut(&pid)
            .ok_or_else(|| BoxliteError::NotFound(format!("pid {}", pid)))?;
        if process.exit.borrow().is_some() {
            return Err(BoxliteError::Engine(format!("pid {} has exited", pid)));
        }
        process.paused = paused;
        Ok(())
    }
}

#[async_trait]
impl IsolationBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn launch(&self, spec: &LaunchSpec) -> BoxliteResult<u32> {
        self.record(BackendCall::Launch(spec.box_id.to_string()));

        let delay = *self.launch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_on_launch.load(Ordering::SeqCst) {
            panic!("fake backend launch panic");
        }
        if let Some(message) = self.launch_error.lock().clone() {
            return Err(BoxliteError::Engine(message));
        }

        let pid = 10_000 + self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (exit, _) = watch::channel(None);
        self.processes.lock().insert(
            pid,
            FakeProcess {
                spec: spec.clone(),
                exit,
                paused: false,
            },
        );
        Ok(pid)
    }

    async fn terminate(&self, pid: u32, force: bool) -> BoxliteResult<()> {
        self.record(BackendCall::Terminate { pid, force });

        if force {
            if self.refuse_kill.load(Ordering::SeqCst) {
                return Err(BoxliteError::Engine(format!(
                    "kill of pid {} not permitted",
                    pid
                )));
            }
            return self.publish(pid, ExitStatus::signaled(SIGKILL));
        }

        if self.ignore_sigterm.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.publish(pid, ExitStatus::signaled(SIGTERM))
    }

    async fn wait(&self, pid: u32) -> BoxliteResult<ExitStatus> {
        let mut rx = self
            .processes
            .lock()
            .get(&pid)
            .map(|p| p.exit.subscribe())
            .ok_or_else(|| BoxliteError::NotFound(format!("pid {}", pid)))?;

        let status = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| BoxliteError::Engine(format!("lost track of pid {}", pid)))?;
        (*status).ok_or_else(|| BoxliteError::Internal("exit status vanished".into()))
    }

    async fn pause(&self, pid: u32) -> BoxliteResult<()> {
        self.record(BackendCall::Pause(pid));
        self.set_paused(pid, true)
    }

    async fn resume(&self, pid: u32) -> BoxliteResult<()> {
        self.record(BackendCall::Resume(pid));
        self.set_paused(pid, false)
    }

    fn release(&self, pid: u32) {
        self.record(BackendCall::Release(pid));
    }

    async fn shutdown(&self) -> BoxliteResult<()> {
        self.record(BackendCall::Shutdown);
        Ok(())
    }
}

// ============================================================================
// FAKE SAMPLER
// ============================================================================

/// `ResourceSampler` returning a configurable reading.
pub struct FakeSampler {
    usage: Mutex<ResourceUsage>,
    unavailable: AtomicBool,
    delay: Mutex<Option<Duration>>,
    samples: AtomicUsize,
}

impl Default for FakeSampler {
    fn default() -> Self {
        Self {
            usage: Mutex::new(ResourceUsage {
                cpu_percent: 12.5,
                memory_mib: 64,
            }),
            unavailable: AtomicBool::new(false),
            delay: Mutex::new(None),
            samples: AtomicUsize::new(0),
        }
    }
}

impl FakeSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_usage(&self, usage: ResourceUsage) {
        *self.usage.lock() = usage;
    }

    /// Make every sample fail with `BoxliteError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Block every sample for `delay` (samples run on blocking threads).
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn samples(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }
}

impl ResourceSampler for FakeSampler {
    fn sample(&self, pid: u32) -> BoxliteResult<ResourceUsage> {
        self.samples.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BoxliteError::Unavailable(format!("pid {} is gone", pid)));
        }
        Ok(*self.usage.lock())
    }
}

// ============================================================================
// TEST CONTEXT
// ============================================================================

/// Runtime over fakes in an isolated home directory.
pub struct TestContext {
    pub runtime: BoxliteRuntime,
    pub backend: Arc<FakeBackend>,
    pub sampler: Arc<FakeSampler>,
    pub home: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_options(|options| options)
    }

    /// Build a context after adjusting the default options (home is preset).
    pub fn with_options(configure: impl FnOnce(BoxliteOptions) -> BoxliteOptions) -> Self {
        let home = TempDir::new().expect("Failed to create temp dir");
        let options = configure(BoxliteOptions::with_home(home.path()));

        let backend = Arc::new(FakeBackend::new());
        let sampler = Arc::new(FakeSampler::new());
        let runtime = BoxliteRuntime::with_components(
            options,
            Arc::clone(&backend) as Arc<dyn IsolationBackend>,
            Arc::clone(&sampler) as Arc<dyn ResourceSampler>,
        )
        .expect("Failed to create runtime");

        Self {
            runtime,
            backend,
            sampler,
            home,
        }
    }

    /// Poll `get` until the box reaches `status`.
    pub async fn wait_for_status(&self, id: &str, status: BoxStatus) -> BoxInfo {
        wait_for_status(&self.runtime, id, status, Duration::from_secs(5)).await
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `runtime.get(id)` until it reports `status`, panicking after `within`.
pub async fn wait_for_status(
    runtime: &BoxliteRuntime,
    id: &str,
    status: BoxStatus,
    within: Duration,
) -> BoxInfo {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let info = runtime.get(id).await.expect("box should exist");
        if info.status == status {
            return info;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "box {} stuck in {} while waiting for {}",
                id, info.status, status
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
