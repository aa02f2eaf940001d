//! BoxLite - single-host registry and lifecycle manager for isolated boxes.
//!
//! A *box* is an isolated execution unit with a fixed image, CPU and memory
//! allotment. [`BoxliteRuntime`] creates boxes, drives them through their
//! lifecycle via an [`IsolationBackend`](vmm::IsolationBackend), and serves
//! consistent point-in-time snapshots to callers.
//!
//! ```no_run
//! use boxlite::{BoxOptions, BoxliteRuntime};
//! use std::time::Duration;
//!
//! # async fn example() -> boxlite::BoxliteResult<()> {
//! let runtime = BoxliteRuntime::with_defaults()?;
//!
//! let info = runtime.create(BoxOptions::new("sleep").with_args(["60"]).with_memory_mib(256))?;
//! runtime.start(&info.id).await?;
//!
//! for b in runtime.list_info().await? {
//!     println!("{} {} {:?}", b.id, b.status, b.pid);
//! }
//!
//! runtime.stop(&info.id, Duration::from_secs(5)).await?;
//! runtime.remove(&info.id, false).await?;
//! runtime.shutdown(None).await?;
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod litebox;
pub mod management;
pub mod metrics;
pub mod runtime;
pub mod util;
pub mod vmm;

pub use boxlite_shared::errors::{BoxliteError, BoxliteResult};
pub use litebox::{BoxStatus, ExitReason, Transition};
pub use metrics::{ResourceSampler, RuntimeMetrics};
pub use runtime::BoxliteRuntime;
pub use runtime::options::{BoxOptions, BoxliteOptions};
pub use runtime::types::{BoxID, BoxInfo, ResourceUsage};
pub use vmm::{ExitStatus, IsolationBackend, LaunchSpec};
