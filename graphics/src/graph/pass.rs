//! Render pass declarations.

use bitflags::bitflags;
use strata_core::Name;

use crate::types::{BufferFormat, BufferStateFlags, ClearValue, LoadOp, QueueType};

bitflags! {
    /// Behavioural flags for a pass.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PassFlags: u32 {
        /// Keep the pass even when no mandatory output depends on it.
        ///
        /// Used for synchronization-only passes and passes with side effects
        /// outside the graph (readbacks, queries).
        const NEVER_CULL = 1 << 0;
    }
}

impl Default for PassFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// How a pass uses one buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferConfig {
    label: String,
    name: Name,
    /// State the buffer must be in while the pass runs.
    pub state: BufferStateFlags,
    /// Treatment of the buffer's prior contents.
    pub load_op: LoadOp,
    /// Size override in bytes.
    pub size: Option<u64>,
    /// Format override.
    pub format: Option<BufferFormat>,
    /// Clear value, used with [`LoadOp::Clear`].
    pub clear_value: Option<ClearValue>,
}

impl BufferConfig {
    /// Declare a use of `buffer` in `state`, preserving its contents.
    pub fn new(buffer: impl Into<String>, state: BufferStateFlags) -> Self {
        let label = buffer.into();
        let name = Name::hash_str(&label);
        Self {
            label,
            name,
            state,
            load_op: LoadOp::Load,
            size: None,
            format: None,
            clear_value: None,
        }
    }

    /// Set the load operation.
    pub fn with_load_op(mut self, load_op: LoadOp) -> Self {
        self.load_op = load_op;
        self
    }

    /// Clear the buffer to `value` on first use in this pass.
    pub fn with_clear(mut self, value: ClearValue) -> Self {
        self.load_op = LoadOp::Clear;
        self.clear_value = Some(value);
        self
    }

    /// Override the buffer size.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Override the buffer format.
    pub fn with_format(mut self, format: BufferFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Buffer name as declared.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Hashed buffer name.
    pub fn name(&self) -> Name {
        self.name
    }

    /// Whether the pass writes the buffer.
    pub fn is_write(&self) -> bool {
        self.state.is_write()
    }

    /// Whether the pass observes the buffer's previous contents.
    ///
    /// Reads always do; writes only when they load.
    pub fn consumes_previous(&self) -> bool {
        !self.state.is_write() || self.load_op.preserves_contents()
    }
}

/// A single unit of GPU work and the buffers it touches.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPass {
    label: String,
    name: Name,
    queue: QueueType,
    buffers: Vec<BufferConfig>,
    flags: PassFlags,
}

impl RenderPass {
    /// Create a graphics-queue pass with no buffer usages.
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        let name = Name::hash_str(&label);
        Self {
            label,
            name,
            queue: QueueType::Graphics,
            buffers: Vec::new(),
            flags: PassFlags::empty(),
        }
    }

    /// Shorthand for a pass on the async compute queue.
    pub fn compute(label: impl Into<String>) -> Self {
        Self::new(label).on_queue(QueueType::Compute)
    }

    /// Shorthand for a pass on the copy queue.
    pub fn transfer(label: impl Into<String>) -> Self {
        Self::new(label).on_queue(QueueType::Transfer)
    }

    /// Select the queue the pass runs on.
    pub fn on_queue(mut self, queue: QueueType) -> Self {
        self.queue = queue;
        self
    }

    /// Add a buffer usage.
    pub fn with_buffer(mut self, config: BufferConfig) -> Self {
        self.buffers.push(config);
        self
    }

    /// Read `buffer` in `state`.
    pub fn reads(self, buffer: impl Into<String>, state: BufferStateFlags) -> Self {
        self.with_buffer(BufferConfig::new(buffer, state))
    }

    /// Write `buffer` in `state` without loading its previous contents.
    pub fn writes(self, buffer: impl Into<String>, state: BufferStateFlags) -> Self {
        self.with_buffer(BufferConfig::new(buffer, state).with_load_op(LoadOp::DontCare))
    }

    /// Keep this pass regardless of output reachability.
    pub fn never_cull(mut self) -> Self {
        self.flags |= PassFlags::NEVER_CULL;
        self
    }

    /// Replace all flags.
    pub fn with_flags(mut self, flags: PassFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Pass name as declared.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Hashed pass name.
    pub fn name(&self) -> Name {
        self.name
    }

    /// Queue the pass is submitted to.
    pub fn queue(&self) -> QueueType {
        self.queue
    }

    /// Buffer usages in declaration order.
    pub fn buffers(&self) -> &[BufferConfig] {
        &self.buffers
    }

    /// Usage of `buffer`, if this pass declares one.
    pub fn buffer(&self, buffer: Name) -> Option<&BufferConfig> {
        self.buffers.iter().find(|config| config.name == buffer)
    }

    /// Pass flags.
    pub fn flags(&self) -> PassFlags {
        self.flags
    }

    /// Check if the pass is protected from culling.
    pub fn is_never_cull(&self) -> bool {
        self.flags.contains(PassFlags::NEVER_CULL)
    }
}
