//! Live resource sampling for box processes.

use std::time::Duration;

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessStatus, System};

use crate::runtime::constants::resources::MIB;
use crate::runtime::constants::timeouts;
use crate::runtime::types::ResourceUsage;
use boxlite_shared::errors::{BoxliteError, BoxliteResult};

/// Reads point-in-time CPU/memory usage for a host process.
///
/// Implementations may block on host reads; the registry calls them from a
/// blocking thread under a timeout. Every failure is reported as
/// `BoxliteError::Unavailable`, which callers treat as "no fresh value".
pub trait ResourceSampler: Send + Sync {
    fn sample(&self, pid: u32) -> BoxliteResult<ResourceUsage>;
}

/// `ResourceSampler` backed by `sysinfo`.
///
/// CPU usage is a delta between two refreshes of the same process, so one
/// `System` is kept for the sampler's lifetime. The first sample of a
/// process therefore reports 0% CPU.
///
/// Samples share that `System`. A caller waits at most `lock_timeout` for it
/// and reports `Unavailable` otherwise, so one stuck host read only costs
/// the box it was reading.
pub struct SysinfoSampler {
    sys: Mutex<System>,
    lock_timeout: Duration,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self::with_lock_timeout(timeouts::SAMPLE_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            sys: Mutex::new(System::new()),
            lock_timeout,
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&self, pid: u32) -> BoxliteResult<ResourceUsage> {
        let pid = Pid::from_u32(pid);
        let mut sys = self.sys.try_lock_for(self.lock_timeout).ok_or_else(|| {
            BoxliteError::Unavailable(format!("sampler busy, skipped process {}", pid))
        })?;

        if !sys.refresh_process(pid) {
            return Err(BoxliteError::Unavailable(format!("process {} not found", pid)));
        }

        let process = sys
            .process(pid)
            .ok_or_else(|| BoxliteError::Unavailable(format!("process {} not found", pid)))?;

        // Exited but not yet reaped
        if process.status() == ProcessStatus::Zombie {
            return Err(BoxliteError::Unavailable(format!("process {} has exited", pid)));
        }

        Ok(ResourceUsage {
            cpu_percent: process.cpu_usage(),
            memory_mib: process.memory() / MIB,
        })
    }
}
