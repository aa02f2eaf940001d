//! LiteBox - per-box configuration and lifecycle state
//!
//! - `config`: immutable `BoxConfig`, fixed at creation
//! - `state`: `BoxStatus` state machine and mutable `BoxState`

pub mod config;
mod state;

pub use config::BoxConfig;
pub use state::{BoxState, BoxStatus, ExitReason, Transition};
