//! # redgraph graphics
//!
//! Render-graph execution engine.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`Renderer`] - Declarative graph of named passes, attachments and dependencies
//! - [`CompiledGraph`] - Validated graph with a single root and resolved formats
//! - [`FrameGraph`] - Live pass instances: top-down resize, bottom-up recording,
//!   frame-in-flight synchronization and optional parallel recording
//! - [`GraphicsDevice`] - Resource creation, deferred destruction and the render-pass cache
//! - [`DescriptorSet`] - Lazily updated binding tables
//! - Backends: Vulkan (ash) and Dummy (for testing)
//!
//! ## Example
//!
//! ```ignore
//! use redgraph_graphics::*;
//!
//! let instance = GraphicsInstance::new(InstanceParameters::new())?;
//! let device = instance.create_device()?;
//! let jobs = instance.create_job_system();
//!
//! let mut renderer = Renderer::new();
//! renderer
//!     .node("gbuffer")
//!     .render_pass(GBufferPass::default)
//!     .attachment(Attachment::slot("albedo").with_format(TextureFormat::Rgba8Unorm).with_clear_color([0.0; 4]));
//! renderer.node("present").require(["gbuffer"]).render_pass(PresentPass::default);
//!
//! let graph = renderer.compile(None, &device)?;
//! let mut frame_graph = FrameGraph::headless(device, graph, Extent2d::new(1280, 720), jobs)?;
//! frame_graph.render_frame()?;
//! ```

pub mod backend;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod graph;
pub mod instance;
pub mod pass;
pub mod surface;
pub mod types;

pub use backend::{GpuBackend, create_backend, has_gpu_backend};
pub use descriptor::{BindingLayout, BindingType, DescriptorSet, DescriptorSetLayout};
pub use device::{Buffer, CommandBuffer, GraphicsDevice, Image, Sampler};
pub use error::GraphicsError;
pub use graph::{Attachment, CompiledGraph, GraphError, RenderNode, Renderer};
pub use instance::{
    BackendType, FrameGraph, FrameGraphSurface, FrameIndices, FrameStatus, GraphicsInstance,
    InstanceParameters, PassId, PassKind,
};
pub use pass::{DrawContext, EmptyPass, PassContext, PassView, RenderPass};
pub use surface::{PresentMode, Surface, SurfaceConfiguration, Swapchain};
pub use types::{
    BufferDescriptor, BufferUsage, ClearValue, Extent2d, ImageDescriptor, SamplerDescriptor,
    ScissorRect, TextureFormat, TextureUsage, Viewport,
};

pub use redgraph_core;

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_empty_renderer() {
        let renderer = Renderer::new();
        assert!(renderer.is_empty());
    }
}
