//! Host-process isolation backend.
//!
//! `ProcessController` launches each box as a child process bounded by
//! resource limits, forwards its output to tracing, and reaps it on a
//! dedicated thread.

mod limits;
mod log_stream;
mod process;
mod spawn;

pub use process::ProcessController;
