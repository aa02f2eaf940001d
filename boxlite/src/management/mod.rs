//! Box registry.
//!
//! - **BoxManager**: owns every box record, serializes per-box mutations,
//!   drives the isolation backend and merges resource samples into snapshots
//! - **ManagerSettings**: timeouts applied to backend and sampler calls

mod manager;

pub use manager::{BoxManager, ManagerSettings};
