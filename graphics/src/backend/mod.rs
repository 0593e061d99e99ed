//! GPU backend abstraction layer.
//!
//! The scheduler talks to the GPU through the [`GpuBackend`] trait: command
//! allocators and lists, barrier recording, queue submission and fences with
//! monotonically increasing 64-bit values (timeline semantics).
//!
//! # Available Backends
//!
//! - `dummy` (default): simulated queues running on worker threads, for
//!   testing the scheduler without GPU hardware
//!
//! # Architecture
//!
//! Each backend provides:
//! - Per-queue command allocator and command list creation
//! - Resource barrier recording
//! - Submission of closed command lists to a queue
//! - GPU-side signal/wait on fences and CPU-side fence waits

#[cfg(feature = "dummy")]
pub mod dummy;
mod error;

use std::time::Duration;

pub use error::{BackendError, BackendResult};

use crate::compiler::BarrierConfig;
use crate::types::QueueType;

/// Trait implemented by GPU backends.
///
/// All methods take `&self`; backends are shared behind an `Arc` and must be
/// internally synchronized. Objects created for one queue must only be used
/// with that queue.
pub trait GpuBackend: Send + Sync + 'static {
    /// Backing memory for command recording.
    type CommandAllocator: Send;
    /// A recordable, submittable list of GPU commands.
    type CommandList: Send;
    /// A GPU fence holding a monotonically increasing value.
    type Fence: Send + Sync;

    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Create a command allocator for `queue`.
    fn create_command_allocator(&self, queue: QueueType) -> BackendResult<Self::CommandAllocator>;

    /// Reclaim an allocator's memory. The GPU must be done with every list
    /// recorded from it.
    fn reset_command_allocator(&self, allocator: &mut Self::CommandAllocator)
    -> BackendResult<()>;

    /// Create a command list for `queue`, initially closed.
    fn create_command_list(&self, queue: QueueType) -> BackendResult<Self::CommandList>;

    /// Open `list` for recording, backed by `allocator`.
    fn begin_command_list(
        &self,
        list: &mut Self::CommandList,
        allocator: &mut Self::CommandAllocator,
    ) -> BackendResult<()>;

    /// Finish recording `list`.
    fn close_command_list(&self, list: &mut Self::CommandList) -> BackendResult<()>;

    /// Record resource transitions into an open list.
    fn record_barriers(&self, list: &mut Self::CommandList, barriers: &[BarrierConfig]);

    /// Create a fence with the given initial value.
    fn create_fence(&self, initial_value: u64) -> BackendResult<Self::Fence>;

    /// Submit closed command lists to `queue` in order.
    fn execute(&self, queue: QueueType, lists: &[&Self::CommandList]) -> BackendResult<()>;

    /// Make `queue` set `fence` to `value` once all prior work completes.
    fn queue_signal(&self, queue: QueueType, fence: &Self::Fence, value: u64)
    -> BackendResult<()>;

    /// Make `queue` stall until `fence` reaches `value`.
    fn queue_wait(&self, queue: QueueType, fence: &Self::Fence, value: u64) -> BackendResult<()>;

    /// Latest value the GPU has written to `fence`.
    fn fence_completed_value(&self, fence: &Self::Fence) -> u64;

    /// Block until `fence` reaches `value`.
    ///
    /// Returns `Ok(false)` if `timeout` elapsed first; `None` waits forever.
    fn wait_fence(
        &self,
        fence: &Self::Fence,
        value: u64,
        timeout: Option<Duration>,
    ) -> BackendResult<bool> {
        self.wait_fences(&[(fence, value)], timeout)
    }

    /// Block until every fence reaches its value.
    ///
    /// Returns `Ok(false)` if `timeout` elapsed first; `None` waits forever.
    fn wait_fences(
        &self,
        waits: &[(&Self::Fence, u64)],
        timeout: Option<Duration>,
    ) -> BackendResult<bool>;
}
