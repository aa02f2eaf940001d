//! Process helpers shared by the host-process backend.

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;

/// Check if a process with the given PID exists.
///
/// Uses `libc::kill(pid, 0)` which sends a null signal to check existence.
/// A zombie still counts as alive until it is reaped.
pub fn is_process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

/// Send `signal` to the process group led by `pid`.
///
/// Returns `Ok(false)` if the group no longer exists.
pub fn signal_group(pid: u32, signal: Signal) -> Result<bool, Errno> {
    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read errno in an async-signal-safe way (usable from `pre_exec`).
pub(crate) fn last_errno() -> i32 {
    Errno::last_raw()
}
