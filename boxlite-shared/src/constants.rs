//! Constants shared by the runtime and its backends.

/// Resource defaults applied when `BoxOptions` leaves a field unset.
pub mod resources {
    /// Default number of CPUs allocated to a box
    pub const DEFAULT_CPUS: u8 = 1;

    /// Default memory ceiling in MiB
    pub const DEFAULT_MEMORY_MIB: u32 = 512;

    /// Bytes per MiB
    pub const MIB: u64 = 1024 * 1024;
}

/// Log targets used when forwarding box output into `tracing`.
pub mod log_targets {
    pub const BOX_STDOUT: &str = "box:stdout";
    pub const BOX_STDERR: &str = "box:stderr";
}

/// Placeholder rendered by listing consumers when a box has no pid.
pub const PID_PLACEHOLDER: &str = "-";
