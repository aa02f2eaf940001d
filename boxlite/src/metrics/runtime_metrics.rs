//! Runtime-level metrics (aggregate across all boxes).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::litebox::BoxStatus;

/// Storage for runtime-wide metrics.
///
/// Owned by the registry and updated on every committed transition.
#[derive(Clone, Default)]
pub struct RuntimeMetricsStorage {
    /// Total boxes created since runtime startup
    pub(crate) boxes_created: Arc<AtomicU64>,
    /// Total successful starts
    pub(crate) boxes_started: Arc<AtomicU64>,
    /// Total boxes that reached Stopped
    pub(crate) boxes_stopped: Arc<AtomicU64>,
    /// Total boxes that reached Exited
    pub(crate) boxes_exited: Arc<AtomicU64>,
    /// Total boxes that reached Failed (start failures included)
    pub(crate) boxes_failed: Arc<AtomicU64>,
    /// Total boxes removed from the registry
    pub(crate) boxes_removed: Arc<AtomicU64>,
    /// Boxes currently Running or Paused
    pub(crate) active_boxes: Arc<AtomicU64>,
}

impl RuntimeMetricsStorage {
    /// Create new runtime metrics storage.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_created(&self) {
        self.boxes_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_started(&self) {
        self.boxes_started.fetch_add(1, Ordering::Relaxed);
        self.active_boxes.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a box entering terminal state `status` from `was_active`.
    pub(crate) fn record_terminal(&self, status: BoxStatus, was_active: bool) {
        let counter = match status {
            BoxStatus::Stopped => &self.boxes_stopped,
            BoxStatus::Exited => &self.boxes_exited,
            BoxStatus::Failed => &self.boxes_failed,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if was_active {
            // Never wraps: every decrement pairs with an earlier record_started
            let _ = self
                .active_boxes
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        }
    }

    pub(crate) fn record_removed(&self) {
        self.boxes_removed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle for querying runtime-wide metrics.
///
/// Cloneable, lightweight handle (only Arc pointers).
#[derive(Clone)]
pub struct RuntimeMetrics {
    storage: RuntimeMetricsStorage,
}

impl RuntimeMetrics {
    /// Create new handle from storage.
    pub(crate) fn new(storage: RuntimeMetricsStorage) -> Self {
        Self { storage }
    }

    /// Total number of boxes created since runtime startup.
    pub fn boxes_created_total(&self) -> u64 {
        self.storage.boxes_created.load(Ordering::Relaxed)
    }

    /// Total number of successful `start` calls.
    pub fn boxes_started_total(&self) -> u64 {
        self.storage.boxes_started.load(Ordering::Relaxed)
    }

    pub fn boxes_stopped_total(&self) -> u64 {
        self.storage.boxes_stopped.load(Ordering::Relaxed)
    }

    pub fn boxes_exited_total(&self) -> u64 {
        self.storage.boxes_exited.load(Ordering::Relaxed)
    }

    /// Total number of boxes that failed, either at start or while running.
    pub fn boxes_failed_total(&self) -> u64 {
        self.storage.boxes_failed.load(Ordering::Relaxed)
    }

    pub fn boxes_removed_total(&self) -> u64 {
        self.storage.boxes_removed.load(Ordering::Relaxed)
    }

    /// Number of boxes currently Running or Paused.
    pub fn num_active_boxes(&self) -> u64 {
        self.storage.active_boxes.load(Ordering::Relaxed)
    }
}
