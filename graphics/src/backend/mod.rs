//! GPU backend abstraction layer.
//!
//! Everything the frame graph needs from a GPU API goes through the
//! [`GpuBackend`] trait. Objects come back as handle enums (see [`handles`])
//! with one variant per compiled-in backend.
//!
//! # Available Backends
//!
//! - `dummy` (default): records every command and submission, no GPU needed
//! - `vulkan-backend`: native Vulkan backend using ash and gpu-allocator
//!
//! [`create_backend`] picks one according to the
//! [`InstanceParameters`](crate::instance::InstanceParameters).

pub mod dummy;
pub mod handles;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use std::any::Any;
use std::sync::Arc;

use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::descriptor::{BindingLayout, BindingType};
use crate::error::GraphicsError;
use crate::graph::RenderPassKey;
use crate::instance::{BackendType, InstanceParameters};
use crate::surface::SurfaceConfiguration;
use crate::types::{
    BufferDescriptor, ClearValue, Extent2d, ImageDescriptor, SamplerDescriptor, ScissorRect,
    TextureFormat, Viewport,
};

pub use handles::{
    GpuBuffer, GpuCommandBuffer, GpuDescriptorSet, GpuDescriptorSetLayout, GpuFence,
    GpuFramebuffer, GpuImage, GpuRenderPass, GpuSampler, GpuSemaphore, GpuSurface, GpuSwapchain,
};

// ============================================================================
// Recording parameters
// ============================================================================

/// Level of a command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferLevel {
    /// Submitted to a queue.
    Primary,
    /// Executed from a primary inside a render pass.
    Secondary,
}

/// Which command pool a command buffer is allocated from.
///
/// Command pools are externally synchronized, so every thread that records
/// concurrently gets its own pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordingSlot {
    /// The frame thread.
    Primary,
    /// Parallel recording thread `n`.
    Secondary(usize),
}

/// How the commands of a render pass are provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubpassContents {
    /// Recorded directly into the primary buffer.
    Inline,
    /// Recorded into secondaries and executed from the primary.
    SecondaryCommandBuffers,
}

/// Pipeline stage a submission waits at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStage {
    /// Wait before writing color attachments (swapchain acquire).
    ColorAttachmentOutput,
    /// Wait before any command (dependency edges).
    AllCommands,
}

/// Render pass and framebuffer a secondary command buffer continues.
#[derive(Debug, Clone, Copy)]
pub struct Inheritance<'a> {
    pub render_pass: &'a GpuRenderPass,
    pub framebuffer: &'a GpuFramebuffer,
}

/// Parameters of `cmd_begin_render_pass`.
#[derive(Debug)]
pub struct RenderPassBegin<'a> {
    pub render_pass: &'a GpuRenderPass,
    pub framebuffer: &'a GpuFramebuffer,
    pub extent: Extent2d,
    pub clear_values: &'a [ClearValue],
    pub contents: SubpassContents,
}

/// One queue submission.
#[derive(Debug, Default)]
pub struct SubmitInfo<'a> {
    pub label: &'a str,
    pub command_buffers: Vec<&'a GpuCommandBuffer>,
    pub wait_semaphores: Vec<(&'a GpuSemaphore, WaitStage)>,
    pub signal_semaphores: Vec<&'a GpuSemaphore>,
    pub fence: Option<&'a GpuFence>,
}

// ============================================================================
// Descriptors
// ============================================================================

/// Resource written into one descriptor binding.
#[derive(Debug, Clone, Copy)]
pub enum DescriptorResource<'a> {
    Image(&'a GpuImage),
    Sampler(&'a GpuSampler),
    ImageSampler(&'a GpuImage, &'a GpuSampler),
    Buffer(&'a GpuBuffer),
}

/// One binding of a descriptor-set update.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorWrite<'a> {
    pub binding: u32,
    pub binding_type: BindingType,
    pub resource: DescriptorResource<'a>,
}

// ============================================================================
// Surfaces
// ============================================================================

/// What a surface presents to.
#[derive(Debug, Clone, Copy)]
pub enum SurfaceTarget {
    /// A native window.
    Window {
        display: RawDisplayHandle,
        window: RawWindowHandle,
    },
    /// An offscreen surface with a fixed extent.
    Headless(Extent2d),
}

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    pub suboptimal: bool,
}

// ============================================================================
// Backend trait
// ============================================================================

/// GPU backend trait for abstracting different GPU APIs.
///
/// Recording methods (`cmd_*`) cannot fail; API errors surface at
/// `end_command_buffer` or `submit`.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Downcasting hook for tests and tools.
    fn as_any(&self) -> &dyn Any;

    // --- Resources ---

    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<GpuImage, GraphicsError>;

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError>;

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<GpuSampler, GraphicsError>;

    fn create_render_pass(&self, key: &RenderPassKey) -> Result<GpuRenderPass, GraphicsError>;

    fn create_framebuffer(
        &self,
        render_pass: &GpuRenderPass,
        attachments: &[&GpuImage],
        extent: Extent2d,
    ) -> Result<GpuFramebuffer, GraphicsError>;

    // --- Synchronization ---

    fn create_semaphore(&self) -> Result<GpuSemaphore, GraphicsError>;

    fn create_fence(&self, signaled: bool) -> Result<GpuFence, GraphicsError>;

    /// Block until the fence is signaled.
    fn wait_fence(&self, fence: &GpuFence) -> Result<(), GraphicsError>;

    fn reset_fence(&self, fence: &GpuFence) -> Result<(), GraphicsError>;

    fn is_fence_signaled(&self, fence: &GpuFence) -> Result<bool, GraphicsError>;

    // --- Command recording ---

    fn create_command_buffer(
        &self,
        level: CommandBufferLevel,
        slot: RecordingSlot,
        label: &str,
    ) -> Result<GpuCommandBuffer, GraphicsError>;

    /// Reset and begin recording. Secondaries pass their inheritance.
    fn begin_command_buffer(
        &self,
        cmd: &mut GpuCommandBuffer,
        inheritance: Option<Inheritance<'_>>,
    ) -> Result<(), GraphicsError>;

    fn end_command_buffer(&self, cmd: &mut GpuCommandBuffer) -> Result<(), GraphicsError>;

    fn cmd_begin_render_pass(&self, cmd: &mut GpuCommandBuffer, begin: &RenderPassBegin<'_>);

    fn cmd_end_render_pass(&self, cmd: &mut GpuCommandBuffer);

    fn cmd_set_viewport(&self, cmd: &mut GpuCommandBuffer, viewport: &Viewport);

    fn cmd_set_scissor(&self, cmd: &mut GpuCommandBuffer, scissor: &ScissorRect);

    fn cmd_draw(
        &self,
        cmd: &mut GpuCommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );

    fn cmd_draw_indexed(
        &self,
        cmd: &mut GpuCommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    fn cmd_dispatch(&self, cmd: &mut GpuCommandBuffer, x: u32, y: u32, z: u32);

    /// Execute secondaries from a primary, in slice order.
    fn cmd_execute_commands(&self, cmd: &mut GpuCommandBuffer, secondaries: &[&GpuCommandBuffer]);

    // --- Queue ---

    fn submit(&self, info: &SubmitInfo<'_>) -> Result<(), GraphicsError>;

    fn wait_idle(&self) -> Result<(), GraphicsError>;

    // --- Descriptors ---

    fn create_descriptor_set_layout(
        &self,
        layout: &BindingLayout,
    ) -> Result<GpuDescriptorSetLayout, GraphicsError>;

    fn allocate_descriptor_set(
        &self,
        layout: &GpuDescriptorSetLayout,
    ) -> Result<GpuDescriptorSet, GraphicsError>;

    fn update_descriptor_set(&self, set: &GpuDescriptorSet, writes: &[DescriptorWrite<'_>]);

    // --- Presentation ---

    fn create_surface(&self, target: &SurfaceTarget) -> Result<GpuSurface, GraphicsError>;

    /// Formats the surface supports, most preferred first.
    fn surface_formats(&self, surface: &GpuSurface) -> Result<Vec<TextureFormat>, GraphicsError>;

    /// Current extent of the surface.
    fn surface_extent(&self, surface: &GpuSurface) -> Result<Extent2d, GraphicsError>;

    /// Create a swapchain and return it with its images.
    fn create_swapchain(
        &self,
        surface: &GpuSurface,
        config: &SurfaceConfiguration,
        old: Option<&GpuSwapchain>,
    ) -> Result<(GpuSwapchain, Vec<GpuImage>), GraphicsError>;

    /// Acquire the next image. Returns [`GraphicsError::SurfaceOutdated`]
    /// when the swapchain must be recreated.
    fn acquire_next_image(
        &self,
        swapchain: &GpuSwapchain,
        signal: &GpuSemaphore,
    ) -> Result<AcquiredImage, GraphicsError>;

    /// Present an image. Returns `true` when the swapchain is suboptimal.
    fn present(
        &self,
        swapchain: &GpuSwapchain,
        image_index: u32,
        wait: &[&GpuSemaphore],
    ) -> Result<bool, GraphicsError>;

    // --- Diagnostics ---

    /// Number of live image and buffer allocations.
    fn outstanding_allocations(&self) -> usize;
}

/// Selects and creates the backend requested by `params`.
///
/// [`BackendType::Auto`] tries Vulkan first and falls back to the dummy
/// backend.
pub fn create_backend(params: &InstanceParameters) -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    match params.backend {
        BackendType::Dummy => {
            log::info!("Using dummy backend");
            Ok(Arc::new(dummy::DummyBackend::new()))
        }
        BackendType::Vulkan => {
            #[cfg(feature = "vulkan-backend")]
            {
                let backend = vulkan::VulkanBackend::with_params(params)?;
                log::info!("Using Vulkan backend (ash)");
                Ok(Arc::new(backend))
            }
            #[cfg(not(feature = "vulkan-backend"))]
            {
                Err(GraphicsError::InitializationFailed(
                    "Vulkan backend requested but the vulkan-backend feature is disabled"
                        .to_string(),
                ))
            }
        }
        BackendType::Auto => {
            #[cfg(feature = "vulkan-backend")]
            {
                match vulkan::VulkanBackend::with_params(params) {
                    Ok(backend) => {
                        log::info!("Using Vulkan backend (ash)");
                        return Ok(Arc::new(backend));
                    }
                    Err(e) => {
                        log::warn!("Failed to create Vulkan backend: {}", e);
                    }
                }
            }

            log::info!("Using dummy backend");
            Ok(Arc::new(dummy::DummyBackend::new()))
        }
    }
}

/// Check if a real GPU backend is compiled in.
pub fn has_gpu_backend() -> bool {
    cfg!(feature = "vulkan-backend")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_dummy_backend() {
        let params = InstanceParameters::new().with_backend(BackendType::Dummy);
        let backend = create_backend(&params).unwrap();
        assert_eq!(backend.name(), "Dummy Backend");
        assert!(backend.as_any().is::<dummy::DummyBackend>());
    }

    #[test]
    fn test_recording_slot_order() {
        assert!(RecordingSlot::Primary < RecordingSlot::Secondary(0));
        assert!(RecordingSlot::Secondary(1) < RecordingSlot::Secondary(2));
    }
}
