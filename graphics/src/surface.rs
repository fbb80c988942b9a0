//! Surface and swapchain management for presenting to windows.
//!
//! - [`Surface`] - A presentation target, a window or an offscreen extent
//! - [`SurfaceConfiguration`] - Format, present mode, extent and image count
//! - [`Swapchain`] - The images the present root renders into
//! - [`PresentMode`] - Controls vsync behavior
//!
//! The frame graph owns the swapchain of its present root and recreates it
//! through the staged-resize path when the surface reports out-of-date or
//! suboptimal.
//!
//! # Example
//!
//! ```ignore
//! let surface = Surface::from_window(&device, &window)?;
//! let config = surface.negotiate(
//!     &SurfaceConfiguration::new(surface.extent()?).with_format(TextureFormat::Bgra8UnormSrgb),
//! )?;
//! let graph = renderer.compile(Some(config.format), &device)?;
//! let frame_graph = FrameGraph::new(device, graph, FrameGraphSurface::new(surface, config), jobs)?;
//! ```

use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::backend::{GpuBackend, GpuSurface, GpuSwapchain, SurfaceTarget};
use crate::device::{GraphicsDevice, Image};
use crate::error::GraphicsError;
use crate::types::{Extent2d, TextureFormat};

/// Presentation mode for the swapchain.
///
/// Controls how frames are synchronized with the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresentMode {
    /// No synchronization. May cause tearing but has lowest latency.
    Immediate,
    /// Triple buffering. Low latency without tearing.
    Mailbox,
    /// VSync enabled. No tearing, but may have higher latency.
    #[default]
    Fifo,
    /// VSync with relaxed timing. May tear if a frame is late.
    FifoRelaxed,
}

/// Configuration for a swapchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceConfiguration {
    /// Format of the swapchain images.
    pub format: TextureFormat,
    /// Presentation mode.
    pub present_mode: PresentMode,
    /// Size of the swapchain images.
    pub extent: Extent2d,
    /// Requested number of swapchain images.
    pub image_count: u32,
}

impl SurfaceConfiguration {
    /// Create a new surface configuration.
    pub fn new(extent: Extent2d) -> Self {
        Self {
            format: TextureFormat::Bgra8Unorm,
            present_mode: PresentMode::default(),
            extent,
            image_count: 3,
        }
    }

    /// Set the texture format.
    pub fn with_format(mut self, format: TextureFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the present mode.
    pub fn with_present_mode(mut self, present_mode: PresentMode) -> Self {
        self.present_mode = present_mode;
        self
    }

    pub fn with_extent(mut self, extent: Extent2d) -> Self {
        self.extent = extent;
        self
    }

    /// Set the number of swapchain images (at least one).
    pub fn with_image_count(mut self, image_count: u32) -> Self {
        self.image_count = image_count.max(1);
        self
    }
}

/// Pick `preferred` if the surface supports it, otherwise the first
/// supported format.
pub fn negotiate_format(available: &[TextureFormat], preferred: TextureFormat) -> TextureFormat {
    if available.is_empty() || available.contains(&preferred) {
        return preferred;
    }
    let fallback = available[0];
    log::warn!(
        "Surface format {:?} not supported, falling back to {:?}",
        preferred,
        fallback
    );
    fallback
}

/// Pick `preferred` if supported, otherwise FIFO, which every surface has.
pub fn negotiate_present_mode(available: &[PresentMode], preferred: PresentMode) -> PresentMode {
    if available.contains(&preferred) {
        return preferred;
    }
    if preferred != PresentMode::Fifo {
        log::warn!(
            "Present mode {:?} not supported, falling back to Fifo",
            preferred
        );
    }
    PresentMode::Fifo
}

/// A presentation surface.
pub struct Surface {
    backend: Arc<dyn GpuBackend>,
    raw: GpuSurface,
}

impl Surface {
    pub(crate) fn new(backend: Arc<dyn GpuBackend>, raw: GpuSurface) -> Self {
        Self { backend, raw }
    }

    /// Create a surface for a window.
    ///
    /// The window must outlive the surface.
    pub fn from_window<W>(device: &GraphicsDevice, window: &W) -> Result<Self, GraphicsError>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        log::info!("Creating surface from window");
        let display = window.display_handle().map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to get display handle: {e}"))
        })?;
        let handle = window.window_handle().map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to get window handle: {e}"))
        })?;
        device.create_surface(&SurfaceTarget::Window {
            display: display.as_raw(),
            window: handle.as_raw(),
        })
    }

    /// Create an offscreen surface with a fixed extent.
    pub fn headless(device: &GraphicsDevice, extent: Extent2d) -> Result<Self, GraphicsError> {
        device.create_surface(&SurfaceTarget::Headless(extent))
    }

    pub fn raw(&self) -> &GpuSurface {
        &self.raw
    }

    /// Current size of the surface.
    pub fn extent(&self) -> Result<Extent2d, GraphicsError> {
        self.backend.surface_extent(&self.raw)
    }

    /// Supported formats, most preferred first.
    pub fn formats(&self) -> Result<Vec<TextureFormat>, GraphicsError> {
        self.backend.surface_formats(&self.raw)
    }

    /// Resolve `preferred` against what the surface supports.
    ///
    /// The format falls back to the first supported one. The extent is taken
    /// from the surface. Present-mode fallback happens when the swapchain is
    /// created.
    pub fn negotiate(
        &self,
        preferred: &SurfaceConfiguration,
    ) -> Result<SurfaceConfiguration, GraphicsError> {
        let format = negotiate_format(&self.formats()?, preferred.format);
        Ok(preferred
            .clone()
            .with_format(format)
            .with_extent(self.extent()?))
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface").field("raw", &self.raw).finish()
    }
}

/// A swapchain and its images.
#[derive(Debug)]
pub struct Swapchain {
    // Views of the images are destroyed before the swapchain that owns them.
    images: Vec<Arc<Image>>,
    raw: GpuSwapchain,
    config: SurfaceConfiguration,
}

impl Swapchain {
    pub(crate) fn new(raw: GpuSwapchain, images: Vec<Arc<Image>>, config: SurfaceConfiguration) -> Self {
        Self {
            images,
            raw,
            config,
        }
    }

    pub fn raw(&self) -> &GpuSwapchain {
        &self.raw
    }

    pub fn images(&self) -> &[Arc<Image>] {
        &self.images
    }

    pub fn image(&self, index: usize) -> Option<&Arc<Image>> {
        self.images.get(index)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn format(&self) -> TextureFormat {
        self.config.format
    }

    pub fn extent(&self) -> Extent2d {
        self.config.extent
    }

    pub fn config(&self) -> &SurfaceConfiguration {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_mode_default() {
        assert_eq!(PresentMode::default(), PresentMode::Fifo);
    }

    #[test]
    fn test_surface_config_builder() {
        let config = SurfaceConfiguration::new(Extent2d::new(1920, 1080))
            .with_format(TextureFormat::Rgba8Unorm)
            .with_present_mode(PresentMode::Mailbox)
            .with_image_count(0);
        assert_eq!(config.extent, Extent2d::new(1920, 1080));
        assert_eq!(config.format, TextureFormat::Rgba8Unorm);
        assert_eq!(config.present_mode, PresentMode::Mailbox);
        assert_eq!(config.image_count, 1);
    }

    #[test]
    fn test_format_negotiation() {
        let available = [TextureFormat::Rgba8Unorm, TextureFormat::Bgra8Unorm];
        assert_eq!(
            negotiate_format(&available, TextureFormat::Bgra8Unorm),
            TextureFormat::Bgra8Unorm
        );
        assert_eq!(
            negotiate_format(&available, TextureFormat::Rgba16Float),
            TextureFormat::Rgba8Unorm
        );
        assert_eq!(
            negotiate_format(&[], TextureFormat::Rgba16Float),
            TextureFormat::Rgba16Float
        );
    }

    #[test]
    fn test_present_mode_negotiation() {
        let available = [PresentMode::Fifo, PresentMode::Immediate];
        assert_eq!(
            negotiate_present_mode(&available, PresentMode::Immediate),
            PresentMode::Immediate
        );
        assert_eq!(
            negotiate_present_mode(&available, PresentMode::Mailbox),
            PresentMode::Fifo
        );
    }
}
