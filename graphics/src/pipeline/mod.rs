//! Frame pipeline for managing multiple frames in flight.
//!
//! This module provides [`FramePipeline`], which coordinates CPU-GPU
//! synchronization across multiple frames so the CPU can record frame N+1
//! while the GPU executes frame N.
//!
//! # Rendering Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          FramePipeline                                  │
//! │  Holds N submitted frames. Before a slot is reused the CPU waits for    │
//! │  that frame's per-queue fence values, then its command objects go back  │
//! │  to the pools.                                                          │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                          FrameSchedule                                  │
//! │  Records one compiled graph batch by batch, inserting cross-queue       │
//! │  waits and signals, and returns a SubmittedFrame.                       │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                          CompiledGraph                                  │
//! │  Culled pass order, queue batches and barrier slots.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Synchronization Model
//!
//! | Level | Primitive | Purpose |
//! |-------|-----------|---------|
//! | Pass → Pass | Barriers | Resource state transitions within a queue |
//! | Batch → Batch | Fence waits on the GPU | Cross-queue ordering within a frame |
//! | Frame → Frame | Fence waits on the CPU | Reuse of a frame slot's command objects |
//!
//! # Example
//!
//! ```ignore
//! let mut pipeline = FramePipeline::new(2);
//!
//! while running {
//!     pipeline.begin_frame(&backend, &sync, &mut pools)?;
//!     let frame = FrameSchedule::new(&backend, &mut sync, &mut pools)
//!         .execute(&graph, &compiled, &mut callbacks)?;
//!     pipeline.end_frame(frame);
//! }
//!
//! pipeline.wait_idle(&backend, &sync, &mut pools)?;
//! ```
//!
//! # Choosing Frames in Flight
//!
//! | Count | Behavior |
//! |-------|----------|
//! | 1 | CPU waits for GPU every frame. Simple but slow. |
//! | 2 | Good balance. CPU can work on N+1 while GPU renders N. |
//! | 3 | More overlap, higher latency. |

use std::fmt;

use crate::backend::GpuBackend;
use crate::error::SyncError;
use crate::pool::CommandPools;
use crate::scheduler::{QueueSync, SubmittedFrame};

/// Manages multiple frames in flight for CPU-GPU parallelism.
///
/// # Frame Slots
///
/// With N frames in flight there are N slots. [`begin_frame`](Self::begin_frame)
/// blocks until the frame previously stored in the current slot completes.
///
/// ```text
/// frames_in_flight = 2
///
/// Slot 0: [Frame 0] ──► [Frame 2] ──► [Frame 4] ──►
/// Slot 1: [Frame 1] ──► [Frame 3] ──► [Frame 5] ──►
/// ```
///
/// # Thread Safety
///
/// `FramePipeline` should be owned by the submission thread.
pub struct FramePipeline<B: GpuBackend> {
    /// Submitted frames per slot. `None` if the slot is free.
    frames: Vec<Option<SubmittedFrame<B>>>,

    /// Current frame slot index (0 to frames_in_flight - 1).
    current_slot: usize,

    /// Total frames started.
    frame_count: u64,
}

impl<B: GpuBackend> FramePipeline<B> {
    /// Create a new frame pipeline.
    ///
    /// # Panics
    ///
    /// Panics if `frames_in_flight` is 0.
    pub fn new(frames_in_flight: usize) -> Self {
        assert!(frames_in_flight > 0, "frames_in_flight must be at least 1");

        Self {
            frames: (0..frames_in_flight).map(|_| None).collect(),
            current_slot: 0,
            frame_count: 0,
        }
    }

    /// Begin a new frame.
    ///
    /// Waits on the CPU until the frame last stored in the current slot has
    /// completed on every queue it touched, then returns its command objects
    /// to `pools`. On a failed wait the frame stays in its slot.
    pub fn begin_frame(
        &mut self,
        backend: &B,
        sync: &QueueSync<B>,
        pools: &mut CommandPools<B>,
    ) -> Result<(), SyncError> {
        Self::drain_slot(&mut self.frames[self.current_slot], backend, sync, pools)?;

        self.frame_count += 1;
        log::trace!(
            "Begin frame {} (slot {})",
            self.frame_count,
            self.current_slot
        );
        Ok(())
    }

    /// End the current frame.
    ///
    /// Stores the submitted frame in the current slot and advances to the
    /// next one.
    pub fn end_frame(&mut self, frame: SubmittedFrame<B>) {
        log::trace!(
            "End frame {} (slot {})",
            self.frame_count,
            self.current_slot
        );

        let slot = &mut self.frames[self.current_slot];
        if slot.is_some() {
            log::warn!(
                "FramePipeline: slot {} still held a frame; begin_frame was skipped",
                self.current_slot
            );
        }
        *slot = Some(frame);
        self.current_slot = (self.current_slot + 1) % self.frames.len();
    }

    /// Wait for all in-flight frames and retire them.
    pub fn wait_idle(
        &mut self,
        backend: &B,
        sync: &QueueSync<B>,
        pools: &mut CommandPools<B>,
    ) -> Result<(), SyncError> {
        log::trace!("Waiting for GPU idle ({} slots)", self.frames.len());
        for slot in &mut self.frames {
            Self::drain_slot(slot, backend, sync, pools)?;
        }
        log::trace!("GPU idle");
        Ok(())
    }

    fn drain_slot(
        slot: &mut Option<SubmittedFrame<B>>,
        backend: &B,
        sync: &QueueSync<B>,
        pools: &mut CommandPools<B>,
    ) -> Result<(), SyncError> {
        if let Some(frame) = slot.as_ref() {
            sync.wait_on_cpu(frame.fence_values())?;
        }
        if let Some(frame) = slot.take() {
            frame.retire(backend, pools);
        }
        Ok(())
    }

    /// Get the number of frames in flight.
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Get the current frame slot index.
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Get the total number of frames started.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Check if a slot is free or its frame has completed (non-blocking).
    pub fn is_slot_ready(&self, slot: usize, sync: &QueueSync<B>) -> bool {
        assert!(slot < self.frames.len(), "Invalid slot index");

        match &self.frames[slot] {
            Some(frame) => frame
                .fence_values()
                .iter()
                .all(|(&queue, &value)| sync.completed_value(queue) >= value),
            None => true,
        }
    }

    /// Check if every slot is ready (non-blocking).
    pub fn is_idle(&self, sync: &QueueSync<B>) -> bool {
        (0..self.frames.len()).all(|slot| self.is_slot_ready(slot, sync))
    }

    /// Number of slots holding a submitted frame.
    pub fn in_flight_count(&self) -> usize {
        self.frames.iter().filter(|frame| frame.is_some()).count()
    }
}

impl<B: GpuBackend> Default for FramePipeline<B> {
    /// Creates a pipeline with 2 frames in flight.
    fn default() -> Self {
        Self::new(2)
    }
}

impl<B: GpuBackend> fmt::Debug for FramePipeline<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePipeline")
            .field("frames_in_flight", &self.frames.len())
            .field("in_flight", &self.in_flight_count())
            .field("current_slot", &self.current_slot)
            .field("frame_count", &self.frame_count)
            .finish()
    }
}
