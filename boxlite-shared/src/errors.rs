//! Error taxonomy shared by every BoxLite component.
//!
//! Hard errors are returned to the immediate caller and never retried by the
//! runtime. `Unavailable` is the one soft error: only the resource sampler
//! produces it and the registry absorbs it before it reaches a caller.

use thiserror::Error;

/// Result alias used across BoxLite crates.
pub type BoxliteResult<T> = Result<T, BoxliteError>;

#[derive(Debug, Error)]
pub enum BoxliteError {
    /// Box creation parameters were rejected (zero cpus, empty image, ...).
    #[error("invalid box spec: {0}")]
    InvalidSpec(String),

    /// No live box matches the given id or name.
    #[error("box not found: {0}")]
    NotFound(String),

    /// The requested operation is not legal from the box's current state.
    #[error("invalid transition: cannot {transition} a box in state {from}")]
    InvalidTransition { from: String, transition: String },

    /// The isolation backend failed to launch the box process.
    #[error("failed to start box: {0}")]
    StartFailed(String),

    /// The isolation backend rejected a termination request.
    #[error("failed to stop box: {0}")]
    StopFailed(String),

    /// The runtime could not be constructed.
    #[error("runtime initialization failed: {0}")]
    RuntimeInit(String),

    /// A resource metric could not be read (sampler only).
    #[error("metric unavailable: {0}")]
    Unavailable(String),

    /// Any other isolation backend failure.
    #[error("engine error: {0}")]
    Engine(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// The runtime has been shut down and no longer accepts operations.
    #[error("runtime stopped: {0}")]
    Stopped(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BoxliteError {
    /// Whether this error is the soft, sampler-only `Unavailable` kind.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BoxliteError::Unavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BoxliteError::NotFound(_))
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, BoxliteError::InvalidTransition { .. })
    }
}
