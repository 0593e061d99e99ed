//! Buffer resource states and descriptors.

use bitflags::bitflags;

bitflags! {
    /// Resource states a buffer can be in while a pass uses it.
    ///
    /// Read-only states can be combined into one state so that several
    /// readers share a single transition. Write states and `PRESENT` are
    /// exclusive and never merge with anything.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferStateFlags: u32 {
        /// Bound as a constant (uniform) buffer.
        const CONSTANT_BUFFER = 1 << 0;
        /// Shader resource read from pixel shaders.
        const SRV_PIXEL = 1 << 1;
        /// Shader resource read from non-pixel stages.
        const SRV_NON_PIXEL = 1 << 2;
        /// Unordered access (read/write storage).
        const UAV = 1 << 3;
        /// Render target write.
        const RTV = 1 << 4;
        /// Depth/stencil write.
        const DEPTH_WRITE = 1 << 5;
        /// Read-only depth/stencil.
        const DEPTH_READ = 1 << 6;
        /// Source of a copy.
        const COPY_SRC = 1 << 7;
        /// Destination of a copy.
        const COPY_DST = 1 << 8;
        /// Ready for presentation.
        const PRESENT = 1 << 9;

        /// States in which a pass writes the buffer.
        const WRITE = Self::UAV.bits()
            | Self::RTV.bits()
            | Self::DEPTH_WRITE.bits()
            | Self::COPY_DST.bits();
        /// States that cannot be combined with any other state.
        const EXCLUSIVE = Self::WRITE.bits() | Self::PRESENT.bits();
        /// Any shader-resource read.
        const SRV = Self::SRV_PIXEL.bits() | Self::SRV_NON_PIXEL.bits();
    }
}

impl Default for BufferStateFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl BufferStateFlags {
    /// Check if the state includes a write.
    pub fn is_write(self) -> bool {
        self.intersects(Self::WRITE)
    }

    /// Check if the state is a non-empty read-only state.
    pub fn is_read_only(self) -> bool {
        !self.is_empty() && !self.intersects(Self::EXCLUSIVE)
    }

    /// Whether `self` and `other` may be OR-ed into one combined state.
    pub fn is_mergeable_with(self, other: Self) -> bool {
        !self.intersects(Self::EXCLUSIVE) && !other.intersects(Self::EXCLUSIVE)
    }

    /// Whether being in `self` already satisfies a request for `other`.
    pub fn contains_state(self, other: Self) -> bool {
        self.contains(other)
    }
}

/// Element layout of a buffer, when the pass needs a typed view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferFormat {
    /// Untyped byte-addressed buffer.
    #[default]
    Raw,
    /// Structured buffer with a fixed element stride in bytes.
    Structured { stride: u32 },
    R32Uint,
    R32Float,
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl BufferFormat {
    /// Bytes per element, or `None` for raw buffers.
    pub fn element_size(self) -> Option<u32> {
        match self {
            Self::Raw => None,
            Self::Structured { stride } => Some(stride),
            Self::R32Uint
            | Self::R32Float
            | Self::Rgba8Unorm
            | Self::Depth32Float
            | Self::Depth24PlusStencil8 => Some(4),
            Self::Rgba16Float => Some(8),
            Self::Rgba32Float => Some(16),
        }
    }

    /// Check if this is a depth format.
    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth32Float | Self::Depth24PlusStencil8)
    }
}
