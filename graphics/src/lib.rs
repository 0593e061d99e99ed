//! # Strata Graphics
//!
//! Render pass graph scheduling for multi-queue GPUs.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`RenderGraph`] - Declarative description of render passes and their buffers
//! - [`compiler`] - Pass culling, async-compute batching and barrier synthesis
//! - [`scheduler`] - Frame execution with cross-queue waits and per-queue fences
//! - [`pool`] - Command allocator and command list pooling
//! - [`GpuBackend`] - Trait for native API implementations
//! - [`DummyBackend`] - Threaded software queues for testing
//!
//! ## Example
//!
//! ```
//! use strata_graphics::{BufferStateFlags, CompileOptions, QueueType, RenderGraph, RenderPass};
//!
//! let mut graph = RenderGraph::new();
//! graph.add_pass(RenderPass::compute("skinning").writes("vertices", BufferStateFlags::UAV))?;
//! graph.add_pass(
//!     RenderPass::new("forward")
//!         .reads("vertices", BufferStateFlags::SRV_NON_PIXEL)
//!         .writes("color", BufferStateFlags::RTV),
//! )?;
//! graph.mark_output("color")?;
//!
//! let compiled = graph.compile(&CompileOptions::default())?;
//! assert_eq!(compiled.passes()[0].queue, QueueType::Compute);
//! # Ok::<(), strata_graphics::GraphError>(())
//! ```

pub mod backend;
pub mod compiler;
pub mod device;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod pool;
pub mod scheduler;
pub mod types;

// Re-export main types for convenience
#[cfg(feature = "dummy")]
pub use backend::dummy::DummyBackend;
pub use backend::{BackendError, BackendResult, GpuBackend};
pub use compiler::{
    BarrierConfig, BarrierPlan, CompileOptions, CompiledGraph, CompiledPass, QueueBatch,
    SplitType,
};
pub use device::{DeviceConfig, GraphicsDevice};
pub use error::{GraphError, GraphicsError, SyncError};
pub use graph::{BufferConfig, BufferId, ImportedBuffer, PassHandle, RenderGraph, RenderPass};
pub use pipeline::FramePipeline;
pub use scheduler::{FrameSchedule, PassCallbacks, PassContext, QueueSync, SubmittedFrame};
pub use types::{BufferFormat, BufferStateFlags, ClearValue, LoadOp, PerQueue, QueueType};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the graphics subsystem.
///
/// Only logs the crate version; nothing else depends on it having run.
pub fn init() {
    log::info!("Strata Graphics v{} initialized", VERSION);
}
