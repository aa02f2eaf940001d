//! Core data types for box lifecycle management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::litebox::config::BoxConfig;
use boxlite_shared::constants::PID_PLACEHOLDER;
use boxlite_shared::errors::{BoxliteError, BoxliteResult};

// Re-export status types from litebox module
pub use crate::litebox::{BoxState, BoxStatus, ExitReason};

// ============================================================================
// BOX ID
// ============================================================================

/// Box identifier (ULID format for sortability).
///
/// ULIDs are 26-character strings that encode:
/// - 48-bit timestamp (millisecond precision)
/// - 80 bits of randomness
/// - Lexicographically sortable by creation time
///
/// Ids handed out by one [`BoxIdGenerator`] are strictly increasing, so
/// ordering by `BoxID` is ordering by creation.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BoxID(String);

impl BoxID {
    /// Length of full box ID (26 chars = ULID format).
    pub const FULL_LENGTH: usize = 26;

    /// Length of short box ID for display (8 chars).
    pub const SHORT_LENGTH: usize = 8;

    /// Parse a BoxID from an existing string.
    ///
    /// Returns `None` if the string is not a valid 26-char ULID string.
    pub fn parse(s: &str) -> Option<Self> {
        if Self::is_valid(s) {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    /// Check if a string is a valid box ID format.
    pub fn is_valid(s: &str) -> bool {
        s.len() == Self::FULL_LENGTH && ulid::Ulid::from_string(s).is_ok()
    }

    /// Get the full box ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the short form (first 8 characters) for display.
    pub fn short(&self) -> &str {
        &self.0[..Self::SHORT_LENGTH]
    }
}

impl From<ulid::Ulid> for BoxID {
    fn from(ulid: ulid::Ulid) -> Self {
        Self(ulid.to_string())
    }
}

impl fmt::Display for BoxID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for BoxID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoxID({})", self.short())
    }
}

impl AsRef<str> for BoxID {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for BoxID {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Monotonic id source owned by the registry.
///
/// Two ids generated in the same millisecond still compare in generation
/// order, and no id is ever produced twice.
pub struct BoxIdGenerator {
    inner: parking_lot::Mutex<ulid::Generator>,
}

impl BoxIdGenerator {
    pub fn new() -> Self {
        Self {
            inner: parking_lot::Mutex::new(ulid::Generator::new()),
        }
    }

    /// Next id, strictly greater than every id this generator returned before.
    pub fn next_id(&self) -> BoxliteResult<BoxID> {
        self.inner
            .lock()
            .generate()
            .map(BoxID::from)
            .map_err(|e| BoxliteError::Internal(format!("box id space exhausted: {e}")))
    }
}

impl Default for BoxIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BoxIdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxIdGenerator").finish_non_exhaustive()
    }
}

// ============================================================================
// RESOURCE USAGE
// ============================================================================

/// Point-in-time resource consumption of a running box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// CPU usage percentage (0.0-100.0 per core).
    pub cpu_percent: f32,

    /// Resident memory in MiB.
    pub memory_mib: u64,
}

// ============================================================================
// BOX INFO (snapshot)
// ============================================================================

/// Public snapshot of a box (returned by `get` and `list`).
///
/// A materialized copy: it never changes after it is returned, regardless of
/// what happens to the box afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxInfo {
    /// Unique box identifier (ULID).
    pub id: BoxID,

    /// User-defined name (optional).
    pub name: Option<String>,

    /// Current lifecycle status.
    pub status: BoxStatus,

    /// Image the box runs.
    pub image: String,

    /// Allocated CPU count.
    pub cpus: u8,

    /// Allocated memory in MiB.
    pub memory_mib: u32,

    /// Host process id. Present only while Running or Paused.
    pub pid: Option<u32>,

    /// Creation timestamp (UTC).
    pub created_at: DateTime<Utc>,

    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,

    /// Set once the box reaches a terminal state.
    pub exit_reason: Option<ExitReason>,

    /// Last state change timestamp (UTC).
    pub last_updated: DateTime<Utc>,

    /// Live resource sample; `None` unless the box is Running.
    pub usage: Option<ResourceUsage>,
}

impl BoxInfo {
    /// Create BoxInfo from config, state and an optional sample.
    pub fn new(config: &BoxConfig, state: &BoxState, usage: Option<ResourceUsage>) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            status: state.status,
            image: config.image.clone(),
            cpus: config.cpus,
            memory_mib: config.memory_mib,
            pid: state.pid,
            created_at: config.created_at,
            started_at: state.started_at,
            ended_at: state.ended_at,
            exit_reason: state.exit_reason.clone(),
            last_updated: state.last_updated,
            usage,
        }
    }

    /// `pid` as shown in tables: the number, or `-` when the box has no process.
    pub fn pid_label(&self) -> String {
        self.pid
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| PID_PLACEHOLDER.to_string())
    }
}
