//! Metrics for Boxlite runtime.
//!
//! - **RuntimeMetrics**: lifecycle counters aggregated across all boxes
//! - **ResourceSampler**: live CPU/memory readings for a single box process
//!
//! Counters are monotonic (never decrease). `active_boxes` is the only gauge.

mod runtime_metrics;
pub mod sampler;

pub use runtime_metrics::{RuntimeMetrics, RuntimeMetricsStorage};
pub use sampler::{ResourceSampler, SysinfoSampler};
