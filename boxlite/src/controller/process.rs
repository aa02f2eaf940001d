//! ProcessController - runs each box as a resource-bounded host process.

use std::collections::HashMap;
use std::process::Child;
use std::sync::Arc;
use std::thread;

use async_trait::async_trait;
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::log_stream::LogStreamHandler;
use super::spawn::spawn_box_process;
use crate::util::process::signal_group;
use crate::vmm::{ExitStatus, IsolationBackend, LaunchSpec};
use boxlite_shared::errors::{BoxliteError, BoxliteResult};

/// Exit status slot filled once by the reaper thread.
type ExitSlot = Option<Result<ExitStatus, String>>;

/// A launched child as seen by the controller.
struct ChildEntry {
    exit: watch::Receiver<ExitSlot>,
    /// The registry is done with this pid; the reaper drops the entry on exit.
    released: bool,
}

type ChildTable = Arc<Mutex<HashMap<u32, ChildEntry>>>;

/// Host-process isolation backend.
///
/// Each box is a child process in its own process group, bounded by
/// RLIMIT_AS and CPU affinity. A dedicated reaper thread per child waits for
/// the exit and publishes it on a watch channel, so `wait` may be called any
/// number of times and still observe an exit that already happened. Entries
/// are dropped once the child exited and the registry released its pid.
///
/// Provides resource bounds only. Filesystem, network and pid isolation are
/// the job of a sandboxing backend plugged in through `IsolationBackend`.
pub struct ProcessController {
    children: ChildTable,
}

impl ProcessController {
    pub fn new() -> Self {
        Self {
            children: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn receiver(&self, pid: u32) -> BoxliteResult<watch::Receiver<ExitSlot>> {
        self.children
            .lock()
            .get(&pid)
            .map(|entry| entry.exit.clone())
            .ok_or_else(|| BoxliteError::Engine(format!("process {} is not managed by this backend", pid)))
    }

    fn has_exited(&self, pid: u32) -> BoxliteResult<bool> {
        Ok(self.receiver(pid)?.borrow().is_some())
    }

    fn signal(&self, pid: u32, signal: Signal) -> BoxliteResult<bool> {
        signal_group(pid, signal).map_err(|e| {
            BoxliteError::Engine(format!("failed to send {:?} to process {}: {}", signal, pid, e))
        })
    }
}

impl Default for ProcessController {
    fn default() -> Self {
        Self::new()
    }
}

/// Fork the box process and register it. Runs on a blocking thread.
///
/// The child is in `children` before this returns, so a caller that gave up
/// waiting still leaves it reaped and reachable by `shutdown`.
fn launch_blocking(children: &ChildTable, spec: &LaunchSpec) -> BoxliteResult<u32> {
    let mut child = spawn_box_process(spec)?;
    let pid = child.id();

    let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
        (Some(stdout), Some(stderr)) => (stdout, stderr),
        _ => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(BoxliteError::Engine(
                "Failed to capture box stdout/stderr (pipe not available)".into(),
            ));
        }
    };

    let log_handler = match LogStreamHandler::new(&spec.box_id, stdout, stderr) {
        Ok(handler) => handler,
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }
    };

    // Registered before the reaper starts, so its prune always finds the entry
    let (tx, exit) = watch::channel::<ExitSlot>(None);
    children.lock().insert(
        pid,
        ChildEntry {
            exit,
            released: false,
        },
    );

    let table = Arc::clone(children);
    let spawned = thread::Builder::new()
        .name(format!("boxlite-reaper-{}", pid))
        .spawn(move || reap(child, tx, log_handler, &table));
    if let Err(e) = spawned {
        children.lock().remove(&pid);
        let _ = signal_group(pid, Signal::SIGKILL);
        return Err(BoxliteError::Engine(format!("Failed to spawn reaper thread: {}", e)));
    }

    Ok(pid)
}

/// Reaper thread body: wait for the child, publish its status, then drop the
/// table entry if the registry already released the pid.
fn reap(
    mut child: Child,
    tx: watch::Sender<ExitSlot>,
    log_handler: LogStreamHandler,
    children: &ChildTable,
) {
    let pid = child.id();
    let status = child
        .wait()
        .map(ExitStatus::from)
        .map_err(|e| e.to_string());
    tracing::debug!(pid, status = ?status, "Box process reaped");
    tx.send_replace(Some(status));

    {
        let mut children = children.lock();
        if children.get(&pid).is_some_and(|entry| entry.released) {
            children.remove(&pid);
        }
    }

    // Publish first: a grandchild holding the pipes open must not
    // delay exit notification.
    log_handler.join();
}

#[async_trait]
impl IsolationBackend for ProcessController {
    fn name(&self) -> &str {
        "process"
    }

    async fn launch(&self, spec: &LaunchSpec) -> BoxliteResult<u32> {
        let children = Arc::clone(&self.children);
        let blocking_spec = spec.clone();
        let pid = tokio::task::spawn_blocking(move || launch_blocking(&children, &blocking_spec))
            .await
            .map_err(|e| BoxliteError::Engine(format!("launch task failed: {}", e)))??;

        tracing::info!(
            box_id = %spec.box_id,
            pid,
            image = %spec.image,
            cpus = spec.cpus,
            memory_mib = spec.memory_mib,
            "Box process spawned"
        );
        Ok(pid)
    }

    async fn terminate(&self, pid: u32, force: bool) -> BoxliteResult<()> {
        if self.has_exited(pid)? {
            return Ok(());
        }

        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        let delivered = self.signal(pid, signal)?;
        tracing::debug!(pid, ?signal, delivered, "Sent termination signal");
        Ok(())
    }

    async fn wait(&self, pid: u32) -> BoxliteResult<ExitStatus> {
        let mut rx = self.receiver(pid)?;
        let slot = rx
            .wait_for(|slot| slot.is_some())
            .await
            .map_err(|_| BoxliteError::Engine(format!("reaper for process {} vanished", pid)))?;

        match slot.as_ref() {
            Some(Ok(status)) => Ok(*status),
            Some(Err(e)) => Err(BoxliteError::Engine(format!(
                "failed to wait for process {}: {}",
                pid, e
            ))),
            None => Err(BoxliteError::Internal("exit slot empty after wait".into())),
        }
    }

    async fn pause(&self, pid: u32) -> BoxliteResult<()> {
        if self.has_exited(pid)? || !self.signal(pid, Signal::SIGSTOP)? {
            return Err(BoxliteError::Engine(format!("process {} is not running", pid)));
        }
        Ok(())
    }

    async fn resume(&self, pid: u32) -> BoxliteResult<()> {
        if self.has_exited(pid)? || !self.signal(pid, Signal::SIGCONT)? {
            return Err(BoxliteError::Engine(format!("process {} is not running", pid)));
        }
        Ok(())
    }

    fn release(&self, pid: u32) {
        let mut children = self.children.lock();
        let Some(entry) = children.get_mut(&pid) else {
            return;
        };
        if entry.exit.borrow().is_some() {
            children.remove(&pid);
        } else {
            entry.released = true;
        }
    }

    async fn shutdown(&self) -> BoxliteResult<()> {
        let live: Vec<u32> = self
            .children
            .lock()
            .iter()
            .filter(|(_, entry)| entry.exit.borrow().is_none())
            .map(|(pid, _)| *pid)
            .collect();

        for pid in live {
            tracing::warn!(pid, "Killing box process left running at shutdown");
            let _ = self.signal(pid, Signal::SIGKILL);
        }
        Ok(())
    }
}

// Compile-time assertion: the backend is shared across tasks behind an Arc
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<ProcessController>;
};
