//! Isolation backend abstraction for Boxlite runtime.
//!
//! The registry never touches processes directly. Everything that creates,
//! signals, or reaps a box process goes through [`IsolationBackend`], so the
//! mechanism (host process, namespace sandbox, micro-VM) is swappable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::runtime::types::BoxID;
use boxlite_shared::errors::BoxliteResult;

/// Everything a backend needs to launch one box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Box the process belongs to (for logging and naming).
    pub box_id: BoxID,
    pub image: String,
    pub cpus: u8,
    pub memory_mib: u32,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// How a box process ended.
///
/// Exactly one of `code` / `signal` is normally set: `code` for a voluntary
/// exit, `signal` when the process was killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitStatus {
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// The external subsystem that owns real box processes.
///
/// Implementations must be safe to call concurrently for different pids. The
/// registry guarantees at most one mutating call per box at a time, but
/// `wait` for a box may run concurrently with `terminate`/`pause`/`resume`
/// for the same pid.
#[async_trait]
pub trait IsolationBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Launch the box process and return its host pid.
    async fn launch(&self, spec: &LaunchSpec) -> BoxliteResult<u32>;

    /// Ask the process to terminate: gracefully, or forcibly if `force`.
    ///
    /// Terminating a process that already exited is not an error.
    async fn terminate(&self, pid: u32, force: bool) -> BoxliteResult<()>;

    /// Resolve once the process has exited.
    ///
    /// May be called any number of times, including after the exit happened.
    async fn wait(&self, pid: u32) -> BoxliteResult<ExitStatus>;

    /// Suspend the process.
    async fn pause(&self, pid: u32) -> BoxliteResult<()>;

    /// Continue a suspended process.
    async fn resume(&self, pid: u32) -> BoxliteResult<()>;

    /// Forget `pid` once the registry has recorded its end.
    ///
    /// After this, `wait(pid)` may report the pid as unknown. The process may
    /// still be dying when a forced kill was not confirmed.
    fn release(&self, _pid: u32) {}

    /// Release backend resources. Called once during runtime teardown.
    async fn shutdown(&self) -> BoxliteResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_display() {
        assert_eq!(ExitStatus::exited(3).to_string(), "exit code 3");
        assert_eq!(ExitStatus::signaled(9).to_string(), "signal 9");
        assert!(ExitStatus::exited(0).success());
        assert!(!ExitStatus::signaled(15).success());
    }

    #[test]
    fn test_exit_status_from_std() {
        use std::os::unix::process::ExitStatusExt;

        let status: ExitStatus = std::process::ExitStatus::from_raw(3 << 8).into();
        assert_eq!(status, ExitStatus::exited(3));

        let status: ExitStatus = std::process::ExitStatus::from_raw(9).into();
        assert_eq!(status, ExitStatus::signaled(9));
    }
}
