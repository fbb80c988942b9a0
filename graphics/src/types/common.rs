//! Common types shared across the graphics system.

// ============================================================================
// Extent
// ============================================================================

/// Two-dimensional size in pixels.
///
/// Used for viewports, pass resolutions and swapchain extents. Resize
/// callbacks map one `Extent2d` (the parent resolution) to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Extent2d {
    /// Create an extent.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether either dimension is zero.
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Clamp both dimensions to at least one pixel.
    pub fn clamped(self) -> Self {
        Self {
            width: self.width.max(1),
            height: self.height.max(1),
        }
    }

    /// Scale both dimensions, rounding down.
    pub fn scaled(self, factor: f32) -> Self {
        Self {
            width: (self.width as f32 * factor) as u32,
            height: (self.height as f32 * factor) as u32,
        }
    }
}

impl From<(u32, u32)> for Extent2d {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Extent2d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ============================================================================
// Viewport
// ============================================================================

/// Viewport configuration for rendering.
///
/// Depth range is `[0, 1]`. With reversed depth the pass clears to 0 and
/// tests with `GREATER`; the viewport itself is unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// X coordinate of the viewport's top-left corner.
    pub x: f32,
    /// Y coordinate of the viewport's top-left corner.
    pub y: f32,
    /// Width of the viewport.
    pub width: f32,
    /// Height of the viewport.
    pub height: f32,
    /// Minimum depth value (default: 0.0).
    pub min_depth: f32,
    /// Maximum depth value (default: 1.0).
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

impl Viewport {
    /// Create a new viewport with standard `[0, 1]` depth range.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            ..Self::default()
        }
    }

    /// Full viewport covering `extent`.
    pub fn from_extent(extent: Extent2d) -> Self {
        Self::new(0.0, 0.0, extent.width as f32, extent.height as f32)
    }
}

/// Scissor rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScissorRect {
    /// X offset.
    pub x: i32,
    /// Y offset.
    pub y: i32,
    /// Width of the rectangle.
    pub width: u32,
    /// Height of the rectangle.
    pub height: u32,
}

impl ScissorRect {
    /// Create a new scissor rectangle.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Scissor covering `extent`.
    pub fn from_extent(extent: Extent2d) -> Self {
        Self::new(0, 0, extent.width, extent.height)
    }
}

// ============================================================================
// Clear values
// ============================================================================

/// Clear value for render targets.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ClearValue {
    /// No clear operation.
    #[default]
    None,
    /// Clear color attachment with RGBA values.
    Color { r: f32, g: f32, b: f32, a: f32 },
    /// Clear depth attachment.
    Depth(f32),
    /// Clear depth and stencil attachments.
    DepthStencil { depth: f32, stencil: u32 },
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

    /// Whether this value clears anything.
    pub fn is_clear(&self) -> bool {
        !matches!(self, Self::None)
    }
}
