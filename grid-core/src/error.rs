use thiserror::Error;

/// The error taxonomy for `grid-core`: `Validation`, `NotFound` and
/// `Unsupported` are surfaced synchronously to callers; a worker's own
/// failure is never raised as an error here — it is represented as
/// `ProcessState` data instead (see `job.rs`).
#[derive(Debug, Error)]
pub enum GridError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GridError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, GridError>;
