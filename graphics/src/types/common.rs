//! Values shared between pass declarations and backends.

/// What happens to a buffer's prior contents when a pass starts using it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadOp {
    /// Preserve the existing contents. A write with `Load` also consumes the
    /// previous writer's output.
    #[default]
    Load,
    /// Clear to the pass's clear value.
    Clear,
    /// Contents are undefined.
    DontCare,
}

impl LoadOp {
    /// Check if prior contents are observed.
    pub fn preserves_contents(self) -> bool {
        self == Self::Load
    }
}

/// Clear value for a buffer with [`LoadOp::Clear`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ClearValue {
    /// No clear operation.
    #[default]
    None,
    /// Clear with RGBA values.
    Color { r: f32, g: f32, b: f32, a: f32 },
    /// Clear depth.
    Depth(f32),
    /// Clear depth and stencil.
    DepthStencil { depth: f32, stencil: u32 },
    /// Fill with a repeated 32-bit value.
    Uint(u32),
}

impl ClearValue {
    /// Create a color clear value.
    pub fn color(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self::Color { r, g, b, a }
    }

    /// Create a depth clear value.
    pub fn depth(value: f32) -> Self {
        Self::Depth(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_op_default_preserves() {
        assert!(LoadOp::default().preserves_contents());
        assert!(!LoadOp::Clear.preserves_contents());
        assert!(!LoadOp::DontCare.preserves_contents());
    }

    #[test]
    fn test_clear_value_constructors() {
        assert_eq!(
            ClearValue::color(0.0, 0.5, 1.0, 1.0),
            ClearValue::Color { r: 0.0, g: 0.5, b: 1.0, a: 1.0 }
        );
        assert_eq!(ClearValue::depth(1.0), ClearValue::Depth(1.0));
        assert_eq!(ClearValue::default(), ClearValue::None);
    }
}
