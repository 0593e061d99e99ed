//! Render graph compilation.
//!
//! This module turns a [`RenderGraph`](crate::graph::RenderGraph) declaration
//! into an execution plan ([`CompiledGraph`]). Compilation runs in stages:
//!
//! 1. **Culling** - drop passes no mandatory output depends on
//! 2. **Hazard analysis** - order every read and write of each buffer
//! 3. **Topological sort** - validate the graph is a DAG
//! 4. **Batching** - group passes into per-queue batches with cross-queue waits
//! 5. **Usage tracking** - record each buffer's states in the final order
//! 6. **Barrier synthesis** - emit transitions, split across gaps when possible,
//!    then make the last batch wait for other queues before final-state
//!    transitions
//!
//! # Example
//!
//! ```
//! use strata_graphics::{BufferStateFlags, CompileOptions, QueueType, RenderGraph, RenderPass};
//!
//! let mut graph = RenderGraph::new();
//! graph.add_pass(RenderPass::compute("simulate").writes("particles", BufferStateFlags::UAV))?;
//! graph.add_pass(
//!     RenderPass::new("draw")
//!         .reads("particles", BufferStateFlags::SRV_NON_PIXEL)
//!         .writes("color", BufferStateFlags::RTV),
//! )?;
//! graph.mark_output("color")?;
//!
//! let compiled = graph.compile(&CompileOptions::default())?;
//! assert_eq!(compiled.batches().len(), 2);
//! assert_eq!(compiled.batches()[1].waits[0].queue, QueueType::Compute);
//! # Ok::<(), strata_graphics::GraphError>(())
//! ```

mod barrier;
mod batch;
mod cull;
mod hazard;

use strata_core::{FrameArena, Name, profile_function, profile_plot, profile_scope};

pub use barrier::{
    AnchoredBarrier, BarrierConfig, BarrierPlan, BarrierSettings, SplitType, synthesize,
};
pub use batch::{BatchWait, PassSignalInfo, QueueBatch};
pub use cull::{cull_passes, producer_graph};

use crate::error::GraphError;
use crate::graph::{BufferId, PassHandle, RenderGraph, UsageTable, configure_usages};
use crate::types::QueueType;

use batch::{build_batches, order_final_transitions};
use hazard::HazardGraph;

/// Options controlling graph compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Run passes on their declared queues. When disabled every pass
    /// executes on the graphics queue.
    pub async_compute: bool,
    /// Emit begin/end barrier pairs across gaps between uses.
    pub split_barriers: bool,
    /// Widen a read transition instead of adding another one.
    pub merge_read_states: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            async_compute: true,
            split_barriers: true,
            merge_read_states: true,
        }
    }
}

impl CompileOptions {
    pub fn with_async_compute(mut self, enabled: bool) -> Self {
        self.async_compute = enabled;
        self
    }

    pub fn with_split_barriers(mut self, enabled: bool) -> Self {
        self.split_barriers = enabled;
        self
    }

    pub fn with_merge_read_states(mut self, enabled: bool) -> Self {
        self.merge_read_states = enabled;
        self
    }

    fn barrier_settings(&self) -> BarrierSettings {
        BarrierSettings {
            split_barriers: self.split_barriers,
            merge_read_states: self.merge_read_states,
        }
    }
}

/// A pass in the compiled execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledPass {
    /// Handle of the pass in the source graph.
    pub handle: PassHandle,
    /// Pass name.
    pub name: Name,
    /// Queue the pass executes on.
    pub queue: QueueType,
    /// Index of the batch containing the pass.
    pub batch: usize,
}

/// A compiled render graph ready for execution.
///
/// Passes are listed in final execution order: the concatenation of the
/// queue batches. Barrier slots and buffer usage records are indexed by
/// position in this order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledGraph {
    passes: Vec<CompiledPass>,
    pass_order: Vec<PassHandle>,
    batches: Vec<QueueBatch>,
    usages: UsageTable,
    barriers: BarrierPlan,
    signal_info: PassSignalInfo,
    culled: Vec<PassHandle>,
}

impl CompiledGraph {
    /// Passes in execution order.
    pub fn passes(&self) -> &[CompiledPass] {
        &self.passes
    }

    /// Source handles in execution order.
    pub fn pass_order(&self) -> &[PassHandle] {
        &self.pass_order
    }

    /// Queue batches in submission order.
    pub fn batches(&self) -> &[QueueBatch] {
        &self.batches
    }

    /// Barriers issued right before the pass at `index`.
    pub fn barriers_before_pass(&self, index: usize) -> &[BarrierConfig] {
        self.barriers.before_pass(index)
    }

    /// Barriers issued right after the pass at `index`.
    pub fn barriers_after_pass(&self, index: usize) -> &[BarrierConfig] {
        self.barriers.after_pass(index)
    }

    pub fn barrier_plan(&self) -> &BarrierPlan {
        &self.barriers
    }

    /// Buffer usage records over the execution order.
    pub fn usages(&self) -> &UsageTable {
        &self.usages
    }

    /// Dense id of a buffer, if any surviving pass uses it.
    pub fn buffer_id(&self, buffer: &str) -> Option<BufferId> {
        self.usages.buffer_id(Name::hash_str(buffer))
    }

    /// Cross-queue signal/wait pairs.
    pub fn signal_info(&self) -> &PassSignalInfo {
        &self.signal_info
    }

    /// Passes removed by culling, in declaration order.
    pub fn culled_passes(&self) -> &[PassHandle] {
        &self.culled
    }

    /// Get the number of passes in the compiled graph.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Check if the compiled graph is empty.
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Total number of barrier commands.
    pub fn barrier_count(&self) -> usize {
        self.barriers.barrier_count()
    }

    /// Execution position of a source pass, if it survived culling.
    pub fn position_of(&self, handle: PassHandle) -> Option<usize> {
        self.pass_order.iter().position(|&h| h == handle)
    }
}

/// Compile a render graph into an execution plan.
pub fn compile(graph: &RenderGraph, options: &CompileOptions) -> Result<CompiledGraph, GraphError> {
    compile_with_arena(graph, options, &mut FrameArena::new())
}

/// Compile using `arena` for scratch allocations.
///
/// The arena is reset before this returns, so one arena can be reused every
/// frame.
pub fn compile_with_arena(
    graph: &RenderGraph,
    options: &CompileOptions,
    arena: &mut FrameArena,
) -> Result<CompiledGraph, GraphError> {
    profile_function!();

    let kept = cull_passes(graph, arena)?;
    let culled: Vec<PassHandle> = (0..graph.pass_count() as u32)
        .map(PassHandle::new)
        .filter(|handle| !kept.contains(handle))
        .collect();

    let hazards = HazardGraph::build(graph, &kept, options.barrier_settings());
    let sorted = hazards.sorted_order()?;

    let queues: Vec<QueueType> = kept
        .iter()
        .filter_map(|&handle| graph.pass(handle))
        .map(|pass| {
            if options.async_compute {
                pass.queue()
            } else {
                QueueType::Graphics
            }
        })
        .collect();

    let mut plan = {
        profile_scope!("batching");
        build_batches(&hazards, &queues, &sorted)?
    };

    let pass_order: Vec<PassHandle> = plan.order.iter().map(|&pos| kept[pos]).collect();
    let passes: Vec<CompiledPass> = plan
        .order
        .iter()
        .zip(&plan.batch_of)
        .map(|(&pos, &batch)| CompiledPass {
            handle: kept[pos],
            name: hazards.name(pos),
            queue: queues[pos],
            batch,
        })
        .collect();

    let usages = configure_usages(pass_order.iter().filter_map(|&handle| graph.pass(handle)));
    let barriers = {
        profile_scope!("barriers");
        synthesize(
            &usages,
            graph.imports(),
            passes.len(),
            &plan.batch_of,
            options.barrier_settings(),
        )
    };
    order_final_transitions(&mut plan, &hazards, &usages, &barriers);

    profile_plot!("barriers", barriers.barrier_count());
    log::debug!(
        "compiled graph: {} passes ({} culled), {} batches, {} barriers",
        passes.len(),
        culled.len(),
        plan.batches.len(),
        barriers.barrier_count()
    );

    Ok(CompiledGraph {
        passes,
        pass_order,
        batches: plan.batches,
        usages,
        barriers,
        signal_info: plan.signal_info,
        culled,
    })
}
