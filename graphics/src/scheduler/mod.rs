//! Frame execution.
//!
//! [`FrameSchedule`] records and submits a [`CompiledGraph`] batch by batch:
//!
//! | Step | Per batch |
//! |------|-----------|
//! | Wait | GPU-side waits on the batches listed in [`QueueBatch::waits`](crate::compiler::QueueBatch) |
//! | Record | one pooled allocator and list; barriers of slot `i` before pass `i`, then its callback |
//! | Submit | close and execute the list on the batch's queue |
//! | Signal | `signal_next` when another batch waits on this one, or it is its queue's last batch |
//!
//! The returned [`SubmittedFrame`] keeps the pool checkouts alive until the
//! GPU has finished with them, and records the fence value each queue
//! reaches when the frame completes. When a batch fails, batches already
//! submitted are waited for and their checkouts go back to the pools.
//!
//! # Module Contents
//!
//! - [`FrameSchedule`] - Records and submits one compiled graph
//! - [`PassCallbacks`] - Name-keyed registry of recording callbacks
//! - [`PassContext`] - What a callback sees while recording its pass
//! - [`QueueSync`] - Per-queue fences and signal counters
//!
//! # Example
//!
//! ```ignore
//! let mut callbacks = PassCallbacks::new();
//! callbacks.insert("lighting", |ctx| {
//!     let albedo = ctx.buffer_id("albedo");
//!     record_lighting(ctx.list(), albedo);
//! });
//!
//! let frame = FrameSchedule::new(&backend, &mut sync, &mut pools)
//!     .execute(&graph, &compiled, &mut callbacks)?;
//! pipeline.end_frame(frame);
//! ```

mod sync;

pub use sync::QueueSync;

use std::collections::HashMap;
use std::fmt;

use strata_core::{Name, profile_function, profile_scope};

use crate::backend::{BackendError, GpuBackend};
use crate::compiler::{CompiledGraph, CompiledPass, QueueBatch};
use crate::error::{GraphError, GraphicsError, SyncError};
use crate::graph::{BufferConfig, BufferId, RenderGraph, RenderPass};
use crate::pool::{CommandCheckout, CommandPools};
use crate::types::{PerQueue, QueueType};

type PassCallback<B> = Box<dyn FnMut(&mut PassContext<'_, B>)>;

/// Recording callbacks keyed by pass name.
pub struct PassCallbacks<B: GpuBackend> {
    callbacks: HashMap<Name, PassCallback<B>>,
}

impl<B: GpuBackend> PassCallbacks<B> {
    pub fn new() -> Self {
        Self {
            callbacks: HashMap::new(),
        }
    }

    /// Register the callback for `pass`, replacing any previous one.
    ///
    /// Returns `true` if a callback was replaced.
    pub fn insert<F>(&mut self, pass: &str, callback: F) -> bool
    where
        F: FnMut(&mut PassContext<'_, B>) + 'static,
    {
        self.callbacks
            .insert(Name::hash_str(pass), Box::new(callback))
            .is_some()
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with<F>(mut self, pass: &str, callback: F) -> Self
    where
        F: FnMut(&mut PassContext<'_, B>) + 'static,
    {
        self.insert(pass, callback);
        self
    }

    pub fn remove(&mut self, pass: &str) -> bool {
        self.callbacks.remove(&Name::hash_str(pass)).is_some()
    }

    pub fn contains(&self, pass: &str) -> bool {
        self.callbacks.contains_key(&Name::hash_str(pass))
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    fn get_mut(&mut self, pass: Name) -> Option<&mut PassCallback<B>> {
        self.callbacks.get_mut(&pass)
    }
}

impl<B: GpuBackend> Default for PassCallbacks<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: GpuBackend> fmt::Debug for PassCallbacks<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassCallbacks")
            .field("len", &self.callbacks.len())
            .finish()
    }
}

/// State handed to a pass callback while its pass is recorded.
pub struct PassContext<'a, B: GpuBackend> {
    pass: &'a RenderPass,
    compiled_pass: CompiledPass,
    index: usize,
    compiled: &'a CompiledGraph,
    list: &'a mut B::CommandList,
}

impl<B: GpuBackend> PassContext<'_, B> {
    pub fn name(&self) -> Name {
        self.compiled_pass.name
    }

    pub fn label(&self) -> &str {
        self.pass.label()
    }

    /// Queue the pass executes on.
    pub fn queue(&self) -> QueueType {
        self.compiled_pass.queue
    }

    /// Position of the pass in the compiled order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Batch containing the pass.
    pub fn batch(&self) -> usize {
        self.compiled_pass.batch
    }

    /// The open command list to record into.
    pub fn list(&mut self) -> &mut B::CommandList {
        self.list
    }

    /// Dense id of a buffer this pass declared.
    pub fn buffer_id(&self, buffer: &str) -> Option<BufferId> {
        self.pass.buffer(Name::hash_str(buffer))?;
        self.compiled.buffer_id(buffer)
    }

    /// Declaration of a buffer this pass uses.
    pub fn buffer(&self, buffer: &str) -> Option<&BufferConfig> {
        self.pass.buffer(Name::hash_str(buffer))
    }

    pub fn buffers(&self) -> &[BufferConfig] {
        self.pass.buffers()
    }
}

/// A frame whose command lists have been submitted.
pub struct SubmittedFrame<B: GpuBackend> {
    fence_values: HashMap<QueueType, u64>,
    batch_values: Vec<Option<u64>>,
    checkouts: Vec<CommandCheckout<B>>,
    /// Queues with work submitted after their latest signal.
    unsignaled: PerQueue<bool>,
}

impl<B: GpuBackend> SubmittedFrame<B> {
    fn with_batches(count: usize) -> Self {
        Self {
            fence_values: HashMap::new(),
            batch_values: vec![None; count],
            checkouts: Vec::with_capacity(count),
            unsignaled: PerQueue::default(),
        }
    }

    /// Fence value each touched queue reaches when the frame is complete.
    pub fn fence_values(&self) -> &HashMap<QueueType, u64> {
        &self.fence_values
    }

    pub fn fence_value(&self, queue: QueueType) -> Option<u64> {
        self.fence_values.get(&queue).copied()
    }

    /// Fence value signalled after `batch`, if it signalled.
    pub fn batch_signal(&self, batch: usize) -> Option<u64> {
        self.batch_values.get(batch).copied().flatten()
    }

    pub fn batch_count(&self) -> usize {
        self.batch_values.len()
    }

    /// Return the frame's command objects to `pools`.
    ///
    /// The GPU must have reached every value in
    /// [`fence_values`](Self::fence_values).
    pub fn retire(self, backend: &B, pools: &mut CommandPools<B>) {
        for checkout in self.checkouts {
            pools.release(backend, checkout);
        }
    }
}

impl<B: GpuBackend> fmt::Debug for SubmittedFrame<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmittedFrame")
            .field("fence_values", &self.fence_values)
            .field("batch_values", &self.batch_values)
            .field("checkouts", &self.checkouts.len())
            .finish()
    }
}

/// Records and submits compiled graphs.
pub struct FrameSchedule<'a, B: GpuBackend> {
    backend: &'a B,
    sync: &'a mut QueueSync<B>,
    pools: &'a mut CommandPools<B>,
}

impl<'a, B: GpuBackend> FrameSchedule<'a, B> {
    pub fn new(backend: &'a B, sync: &'a mut QueueSync<B>, pools: &'a mut CommandPools<B>) -> Self {
        Self {
            backend,
            sync,
            pools,
        }
    }

    /// Record and submit every batch of `compiled`.
    ///
    /// Each surviving pass's callback runs exactly once, in compiled order.
    /// `graph` must be the graph `compiled` was built from.
    pub fn execute(
        &mut self,
        graph: &RenderGraph,
        compiled: &CompiledGraph,
        callbacks: &mut PassCallbacks<B>,
    ) -> Result<SubmittedFrame<B>, GraphicsError> {
        profile_function!();
        if self.sync.is_terminated() {
            return Err(SyncError::Terminated.into());
        }

        let batches = compiled.batches();
        let mut last_on_queue: PerQueue<Option<usize>> = PerQueue::default();
        for (index, batch) in batches.iter().enumerate() {
            last_on_queue[batch.queue] = Some(index);
        }

        let mut frame = SubmittedFrame::with_batches(batches.len());
        for (index, batch) in batches.iter().enumerate() {
            profile_scope!("batch");
            let last = last_on_queue[batch.queue] == Some(index);
            let submitted =
                self.submit_batch(graph, compiled, index, batch, last, callbacks, &mut frame);
            if let Err(err) = submitted {
                self.abandon(frame, index);
                return Err(err);
            }
        }

        log::debug!(
            "FrameSchedule: submitted {} passes in {} batches",
            compiled.pass_count(),
            batches.len()
        );
        Ok(frame)
    }

    #[allow(clippy::too_many_arguments)]
    fn submit_batch(
        &mut self,
        graph: &RenderGraph,
        compiled: &CompiledGraph,
        index: usize,
        batch: &QueueBatch,
        last_on_queue: bool,
        callbacks: &mut PassCallbacks<B>,
        frame: &mut SubmittedFrame<B>,
    ) -> Result<(), GraphicsError> {
        for wait in &batch.waits {
            let value = frame.batch_signal(wait.batch).ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "batch {index} waits on batch {} which did not signal",
                    wait.batch
                ))
            })?;
            self.sync.wait_on_queue_gpu(wait.queue, value, batch.queue)?;
        }

        let mut checkout = self.pools.retain(self.backend, batch.queue, 1)?;
        if let Err(err) = self.record(graph, compiled, batch, &mut checkout, callbacks) {
            self.pools.release(self.backend, checkout);
            return Err(err);
        }
        frame.checkouts.push(checkout);
        frame.unsignaled[batch.queue] = true;

        if batch.signals || last_on_queue {
            let value = self.sync.signal_next(batch.queue)?;
            frame.batch_values[index] = Some(value);
            frame.fence_values.insert(batch.queue, value);
            frame.unsignaled[batch.queue] = false;
        }
        Ok(())
    }

    /// Return the command objects of a frame that failed at `failed_batch`.
    ///
    /// Queues with submitted but unsignalled work get one more signal so the
    /// CPU can wait for everything already submitted.
    fn abandon(&mut self, mut frame: SubmittedFrame<B>, failed_batch: usize) {
        if frame.checkouts.is_empty() {
            return;
        }
        for queue in QueueType::ALL {
            if frame.unsignaled[queue]
                && let Ok(value) = self.sync.signal_next(queue)
            {
                frame.fence_values.insert(queue, value);
            }
        }
        match self.sync.wait_on_cpu(frame.fence_values()) {
            Ok(()) => {
                log::warn!(
                    "FrameSchedule: batch {} failed, retired {} submitted batches",
                    failed_batch,
                    frame.checkouts.len()
                );
                frame.retire(self.backend, self.pools);
            }
            Err(err) => log::error!(
                "FrameSchedule: batch {} failed, dropping {} checkouts: {}",
                failed_batch,
                frame.checkouts.len(),
                err
            ),
        }
    }

    fn record(
        &self,
        graph: &RenderGraph,
        compiled: &CompiledGraph,
        batch: &QueueBatch,
        checkout: &mut CommandCheckout<B>,
        callbacks: &mut PassCallbacks<B>,
    ) -> Result<(), GraphicsError> {
        let missing = || BackendError::Internal("empty command checkout".into());
        let allocator = checkout.allocators.get_mut(0).ok_or_else(missing)?;
        let list = checkout.lists.get_mut(0).ok_or_else(missing)?;

        self.backend.begin_command_list(list, allocator)?;
        let last = compiled.pass_count().checked_sub(1);
        for index in batch.passes.clone() {
            let compiled_pass = compiled.passes()[index];
            let pass = graph
                .pass(compiled_pass.handle)
                .ok_or(GraphError::InvalidPassHandle(compiled_pass.handle))?;

            self.backend
                .record_barriers(list, compiled.barriers_before_pass(index));

            match callbacks.get_mut(compiled_pass.name) {
                Some(callback) => {
                    log::trace!("FrameSchedule: recording pass '{}'", pass.label());
                    let mut context = PassContext {
                        pass,
                        compiled_pass,
                        index,
                        compiled,
                        list: &mut *list,
                    };
                    callback(&mut context);
                }
                None => log::debug!(
                    "FrameSchedule: no callback for pass '{}', recording barriers only",
                    pass.label()
                ),
            }

            if Some(index) == last {
                self.backend
                    .record_barriers(list, compiled.barriers_after_pass(index));
            }
        }
        self.backend.close_command_list(list)?;
        self.backend.execute(batch.queue, &[&*list])?;
        Ok(())
    }
}
