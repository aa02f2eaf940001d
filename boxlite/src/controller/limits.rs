//! Resource bounds applied to a box process between fork and exec.
//!
//! Everything here runs in the `pre_exec` hook, so only async-signal-safe
//! calls are allowed: no logging, no allocation, no locks.

use crate::runtime::constants::resources::MIB;
use crate::util::process::last_errno;
use crate::vmm::LaunchSpec;

#[cfg(target_os = "linux")]
type RlimitResource = libc::__rlimit_resource_t;
#[cfg(not(target_os = "linux"))]
type RlimitResource = libc::c_int;

/// Limits derived from a `LaunchSpec`, copied into the child before exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct BoxLimits {
    /// Address-space ceiling (RLIMIT_AS) in bytes.
    pub memory_bytes: u64,
    /// Number of CPUs the process may run on.
    pub cpus: usize,
}

impl BoxLimits {
    pub(super) fn from_spec(spec: &LaunchSpec) -> Self {
        Self {
            memory_bytes: u64::from(spec.memory_mib) * MIB,
            cpus: usize::from(spec.cpus),
        }
    }

    /// Apply every limit to the calling process. Returns the raw errno on failure.
    pub(super) fn apply_raw(&self) -> Result<(), i32> {
        set_rlimit_raw(libc::RLIMIT_AS, self.memory_bytes)?;
        pin_to_first_cpus_raw(self.cpus)?;
        Ok(())
    }
}

/// Lower both soft and hard limit to `limit`, never raising the hard limit.
#[allow(clippy::unnecessary_cast)]
fn set_rlimit_raw(resource: RlimitResource, limit: u64) -> Result<(), i32> {
    let mut current = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    if unsafe { libc::getrlimit(resource, &mut current) } != 0 {
        return Err(last_errno());
    }

    let limit = (limit as libc::rlim_t).min(current.rlim_max);
    let rlim = libc::rlimit {
        rlim_cur: limit,
        rlim_max: limit,
    };
    if unsafe { libc::setrlimit(resource, &rlim) } != 0 {
        return Err(last_errno());
    }

    Ok(())
}

/// Restrict the process to the first `cpus` CPUs of its current affinity mask.
///
/// A request for at least as many CPUs as are available leaves the mask alone.
#[cfg(target_os = "linux")]
fn pin_to_first_cpus_raw(cpus: usize) -> Result<(), i32> {
    let size = std::mem::size_of::<libc::cpu_set_t>();
    let mut allowed: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    if unsafe { libc::sched_getaffinity(0, size, &mut allowed) } != 0 {
        return Err(last_errno());
    }

    let mut pinned: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    let mut taken = 0;
    for cpu in 0..libc::CPU_SETSIZE as usize {
        if taken == cpus {
            break;
        }
        if unsafe { libc::CPU_ISSET(cpu, &allowed) } {
            unsafe { libc::CPU_SET(cpu, &mut pinned) };
            taken += 1;
        }
    }

    if taken < cpus {
        return Ok(());
    }

    if unsafe { libc::sched_setaffinity(0, size, &pinned) } != 0 {
        return Err(last_errno());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn pin_to_first_cpus_raw(_cpus: usize) -> Result<(), i32> {
    Ok(())
}
