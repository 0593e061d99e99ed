//! Graphics device.
//!
//! The [`GraphicsDevice`] owns a backend together with everything a frame
//! needs to run against it: per-queue fences, command object pools, the
//! frame pipeline and a scratch arena for graph compilation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use strata_core::{FrameArena, frame_mark, profile_function};

use crate::backend::GpuBackend;
use crate::compiler::{CompileOptions, CompiledGraph, compile_with_arena};
use crate::error::{GraphError, GraphicsError};
use crate::graph::RenderGraph;
use crate::pipeline::FramePipeline;
use crate::pool::CommandPools;
use crate::scheduler::{FrameSchedule, PassCallbacks, QueueSync};
use crate::types::QueueType;

/// Device creation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Objects created per queue on a pool's first growth.
    pub initial_pool_capacity: usize,
    /// Bound on every CPU fence wait. `None` waits forever.
    pub cpu_wait_timeout: Option<Duration>,
    /// Number of frames that may be in flight at once. Must be at least 1.
    pub frames_in_flight: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            initial_pool_capacity: 4,
            cpu_wait_timeout: None,
            frames_in_flight: 2,
        }
    }
}

impl DeviceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_pool_capacity(mut self, capacity: usize) -> Self {
        self.initial_pool_capacity = capacity;
        self
    }

    pub fn with_cpu_wait_timeout(mut self, timeout: Duration) -> Self {
        self.cpu_wait_timeout = Some(timeout);
        self
    }

    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }
}

/// A backend plus the synchronization state frames execute against.
///
/// # Thread Safety
///
/// `GraphicsDevice` is `Send` but is driven from a single submission thread;
/// every frame operation takes `&mut self`.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use strata_graphics::scheduler::PassCallbacks;
/// use strata_graphics::{
///     BufferStateFlags, CompileOptions, DeviceConfig, DummyBackend, GraphicsDevice, RenderGraph,
///     RenderPass,
/// };
///
/// let backend = Arc::new(DummyBackend::new().unwrap());
/// let mut device = GraphicsDevice::new(backend, DeviceConfig::default()).unwrap();
///
/// let mut graph = RenderGraph::new();
/// graph
///     .add_pass(RenderPass::new("clear").writes("color", BufferStateFlags::RTV))
///     .unwrap();
/// graph.mark_output("color").unwrap();
///
/// let compiled = device.compile(&graph, &CompileOptions::default()).unwrap();
/// device
///     .submit(&graph, &compiled, &mut PassCallbacks::new())
///     .unwrap();
/// assert_eq!(device.shutdown().unwrap(), 0);
/// ```
pub struct GraphicsDevice<B: GpuBackend> {
    backend: Arc<B>,
    sync: QueueSync<B>,
    pools: CommandPools<B>,
    pipeline: FramePipeline<B>,
    arena: FrameArena,
    config: DeviceConfig,
    shut_down: bool,
}

impl<B: GpuBackend> GraphicsDevice<B> {
    /// Create the device's fences and empty pools.
    pub fn new(backend: Arc<B>, config: DeviceConfig) -> Result<Self, GraphicsError> {
        if config.frames_in_flight == 0 {
            return Err(GraphicsError::InvalidParameter(
                "frames_in_flight must be at least 1".into(),
            ));
        }

        let sync = QueueSync::new(Arc::clone(&backend), config.cpu_wait_timeout)?;
        log::info!(
            "Created graphics device on {} backend ({} frames in flight)",
            backend.name(),
            config.frames_in_flight
        );

        Ok(Self {
            sync,
            pools: CommandPools::new(config.initial_pool_capacity),
            pipeline: FramePipeline::new(config.frames_in_flight),
            arena: FrameArena::new(),
            backend,
            config,
            shut_down: false,
        })
    }

    /// Compile `graph`, reusing the device's scratch arena.
    pub fn compile(
        &mut self,
        graph: &RenderGraph,
        options: &CompileOptions,
    ) -> Result<CompiledGraph, GraphError> {
        compile_with_arena(graph, options, &mut self.arena)
    }

    /// Run one frame: wait for the slot's previous frame, record and submit
    /// `compiled`, and keep it in flight.
    ///
    /// Returns the fence value each touched queue reaches when the frame
    /// completes.
    pub fn submit(
        &mut self,
        graph: &RenderGraph,
        compiled: &CompiledGraph,
        callbacks: &mut PassCallbacks<B>,
    ) -> Result<HashMap<QueueType, u64>, GraphicsError> {
        profile_function!();

        if self.shut_down {
            return Err(GraphicsError::InvalidParameter(
                "device has been shut down".into(),
            ));
        }

        self.pipeline
            .begin_frame(&self.backend, &self.sync, &mut self.pools)?;
        let frame = FrameSchedule::new(&*self.backend, &mut self.sync, &mut self.pools)
            .execute(graph, compiled, callbacks)?;
        let fence_values = frame.fence_values().clone();
        self.pipeline.end_frame(frame);

        frame_mark!();
        Ok(fence_values)
    }

    /// Block until every in-flight frame has completed.
    pub fn wait_idle(&mut self) -> Result<(), GraphicsError> {
        self.pipeline
            .wait_idle(&self.backend, &self.sync, &mut self.pools)?;
        Ok(())
    }

    /// Drain all queues and tear the pools down.
    ///
    /// Returns the number of pool checkouts that were never returned.
    /// Calling it again is a no-op that returns 0.
    pub fn shutdown(&mut self) -> Result<usize, GraphicsError> {
        if self.shut_down {
            return Ok(0);
        }
        self.wait_idle()?;
        self.sync.wait_all()?;
        let leaked = self.pools.term();
        self.shut_down = true;
        log::info!("Graphics device shut down");
        Ok(leaked)
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn sync(&self) -> &QueueSync<B> {
        &self.sync
    }

    /// Mutable access for callers driving [`FrameSchedule`] themselves.
    pub fn sync_mut(&mut self) -> &mut QueueSync<B> {
        &mut self.sync
    }

    pub fn pools(&self) -> &CommandPools<B> {
        &self.pools
    }

    pub fn pipeline(&self) -> &FramePipeline<B> {
        &self.pipeline
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl<B: GpuBackend> Drop for GraphicsDevice<B> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("Graphics device shutdown failed: {err}");
        }
    }
}

impl<B: GpuBackend> std::fmt::Debug for GraphicsDevice<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .field("pipeline", &self.pipeline)
            .field("shut_down", &self.shut_down)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "dummy")]
static_assertions::assert_impl_all!(GraphicsDevice<crate::backend::dummy::DummyBackend>: Send);

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::graph::RenderPass;
    use crate::types::BufferStateFlags as S;

    fn device(config: DeviceConfig) -> GraphicsDevice<DummyBackend> {
        let backend = Arc::new(DummyBackend::new().unwrap());
        GraphicsDevice::new(backend, config).unwrap()
    }

    fn graph() -> RenderGraph {
        let mut graph = RenderGraph::new();
        graph
            .add_pass(RenderPass::compute("cull").writes("draws", S::UAV))
            .unwrap();
        graph
            .add_pass(
                RenderPass::new("draw")
                    .reads("draws", S::SRV_NON_PIXEL)
                    .writes("color", S::RTV),
            )
            .unwrap();
        graph.mark_output("color").unwrap();
        graph
    }

    #[test]
    fn test_config_builders() {
        let config = DeviceConfig::new()
            .with_initial_pool_capacity(8)
            .with_cpu_wait_timeout(Duration::from_secs(1))
            .with_frames_in_flight(3);
        assert_eq!(config.initial_pool_capacity, 8);
        assert_eq!(config.cpu_wait_timeout, Some(Duration::from_secs(1)));
        assert_eq!(config.frames_in_flight, 3);

        let default = DeviceConfig::default();
        assert_eq!(default.initial_pool_capacity, 4);
        assert_eq!(default.cpu_wait_timeout, None);
        assert_eq!(default.frames_in_flight, 2);
    }

    #[test]
    fn test_zero_frames_in_flight_rejected() {
        let backend = Arc::new(DummyBackend::new().unwrap());
        let result = GraphicsDevice::new(backend, DeviceConfig::new().with_frames_in_flight(0));
        assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
    }

    #[test]
    fn test_submit_frames() {
        let mut device = device(DeviceConfig::new().with_cpu_wait_timeout(Duration::from_secs(5)));
        let graph = graph();
        let compiled = device.compile(&graph, &CompileOptions::default()).unwrap();
        let mut callbacks = PassCallbacks::new();

        let first = device.submit(&graph, &compiled, &mut callbacks).unwrap();
        assert_eq!(first.get(&QueueType::Compute), Some(&1));
        assert_eq!(first.get(&QueueType::Graphics), Some(&1));

        let second = device.submit(&graph, &compiled, &mut callbacks).unwrap();
        assert_eq!(second.get(&QueueType::Graphics), Some(&2));
        assert_eq!(device.pipeline().frame_count(), 2);

        device.wait_idle().unwrap();
        assert_eq!(device.pools().lists().outstanding_count(), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut device = device(DeviceConfig::default());
        let graph = graph();
        let compiled = device.compile(&graph, &CompileOptions::default()).unwrap();
        device
            .submit(&graph, &compiled, &mut PassCallbacks::new())
            .unwrap();

        assert_eq!(device.shutdown().unwrap(), 0);
        assert!(device.is_shut_down());
        assert!(device.sync().is_terminated());
        assert_eq!(device.shutdown().unwrap(), 0);

        let result = device.submit(&graph, &compiled, &mut PassCallbacks::new());
        assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
    }
}
