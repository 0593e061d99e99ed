//! Backend error types.

use thiserror::Error;

/// Errors that can occur in backend operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Failed to create a command allocator, list or fence.
    #[error("object creation failed: {0}")]
    ObjectCreationFailed(String),
    /// A command list could not be recorded or submitted.
    #[error("submission failed: {0}")]
    SubmissionFailed(String),
    /// A fence wait failed for a reason other than timeout.
    #[error("fence wait failed: {0}")]
    WaitFailed(String),
    /// The device was lost.
    #[error("GPU device lost")]
    DeviceLost,
    /// Invalid parameter.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// Internal backend error.
    #[error("internal backend error: {0}")]
    Internal(String),
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
