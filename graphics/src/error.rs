//! Graphics error types.

use strata_core::{Name, NameError};
use thiserror::Error;

use crate::backend::BackendError;
use crate::graph::PassHandle;
use crate::types::QueueType;

/// Errors in a render graph declaration, reported at add or compile time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The passes' dependencies form a cycle through the given pass.
    #[error("render graph contains cyclic dependency through pass {0}")]
    CyclicDependency(Name),

    /// A pass handle does not belong to this graph.
    #[error("invalid pass handle: {0:?}")]
    InvalidPassHandle(PassHandle),

    /// A pass was declared to depend on itself.
    #[error("pass {0} cannot depend on itself")]
    SelfDependency(Name),

    /// Two passes share a name.
    #[error("pass \"{0}\" is already declared")]
    DuplicatePass(String),

    /// A pass lists the same buffer twice.
    #[error("pass \"{pass}\" uses buffer \"{buffer}\" more than once")]
    DuplicateBufferUse { pass: String, buffer: String },

    /// A mandatory output is declared but no pass writes it.
    #[error("mandatory output \"{0}\" is never written")]
    UnreachableOutput(String),

    /// A mandatory output names a buffer no pass uses.
    #[error("mandatory output \"{0}\" is not used by any pass")]
    UnknownOutput(String),

    /// Two distinct names hash to the same value.
    #[error(transparent)]
    NameCollision(#[from] NameError),
}

/// Errors from queue and fence synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// A queue was asked to wait on its own fence.
    #[error("{0} queue cannot wait on itself")]
    SelfWait(QueueType),

    /// A fence value was not greater than the last value signalled.
    #[error("non-monotonic signal on {queue} queue: {value} <= {last}")]
    NonMonotonicSignal { queue: QueueType, value: u64, last: u64 },

    /// A CPU wait elapsed before the fences were reached.
    #[error("timed out waiting for GPU fences")]
    Timeout,

    /// Synchronization was already shut down with `wait_all`.
    #[error("queue synchronization has been terminated")]
    Terminated,

    /// The backend failed a fence operation.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors that can occur in the graphics system.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphicsError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl From<NameError> for GraphicsError {
    fn from(err: NameError) -> Self {
        Self::Graph(GraphError::NameCollision(err))
    }
}
