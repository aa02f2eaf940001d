//! BoxLite Shared - common types for the box registry and its backends
//!
//! This crate holds the error taxonomy and the constants that both the
//! runtime (boxlite) and backend implementations agree on.

pub mod constants;
pub mod errors;

pub use errors::{BoxliteError, BoxliteResult};
