//! Backend object handles.
//!
//! Each handle is an enum with a `Dummy` variant and a feature-gated
//! `Vulkan` variant. Vulkan variants hold an `Arc` of the shared context so
//! they can destroy themselves in `Drop` regardless of which thread lets go
//! of them last.

use std::sync::atomic::{AtomicBool, AtomicU32};

#[cfg(feature = "vulkan-backend")]
use std::sync::Arc;

#[cfg(feature = "vulkan-backend")]
use ash::vk;
#[cfg(feature = "vulkan-backend")]
use ash::vk::Handle;
#[cfg(feature = "vulkan-backend")]
use gpu_allocator::vulkan::Allocation;
#[cfg(feature = "vulkan-backend")]
use parking_lot::Mutex;

use crate::graph::RenderPassKey;
use crate::types::{Extent2d, TextureFormat};

use super::dummy::{DummyCommand, LiveToken};
use super::CommandBufferLevel;
#[cfg(feature = "vulkan-backend")]
use super::RecordingSlot;

#[cfg(feature = "vulkan-backend")]
use super::vulkan::VulkanContext;

/// `Debug` for handles that only show their id.
macro_rules! impl_id_debug {
    ($($ty:ident),* $(,)?) => {
        $(
            impl std::fmt::Debug for $ty {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{}({:#x})", stringify!($ty), self.id())
                }
            }
        )*
    };
}

// ============================================================================
// Images and buffers
// ============================================================================

/// Handle to a GPU image and its default view.
pub enum GpuImage {
    /// Dummy backend (no GPU allocation)
    Dummy {
        id: u64,
        extent: Extent2d,
        format: TextureFormat,
        _live: LiveToken,
    },
    /// Vulkan backend image
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        ctx: Arc<VulkanContext>,
        image: vk::Image,
        view: vk::ImageView,
        /// `None` for swapchain images, which the swapchain owns.
        allocation: Mutex<Option<Allocation>>,
        owned: bool,
        format: vk::Format,
        extent: Extent2d,
    },
}

impl GpuImage {
    pub fn id(&self) -> u64 {
        match self {
            Self::Dummy { id, .. } => *id,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { image, .. } => image.as_raw(),
        }
    }

    pub fn extent(&self) -> Extent2d {
        match self {
            Self::Dummy { extent, .. } => *extent,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { extent, .. } => *extent,
        }
    }
}

impl std::fmt::Debug for GpuImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy {
                id, extent, format, ..
            } => f
                .debug_struct("GpuImage::Dummy")
                .field("id", id)
                .field("extent", extent)
                .field("format", format)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan {
                image,
                view,
                format,
                extent,
                ..
            } => f
                .debug_struct("GpuImage::Vulkan")
                .field("image", image)
                .field("view", view)
                .field("format", format)
                .field("extent", extent)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a GPU buffer.
pub enum GpuBuffer {
    /// Dummy backend (no GPU allocation)
    Dummy { id: u64, size: u64, _live: LiveToken },
    /// Vulkan backend buffer
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        ctx: Arc<VulkanContext>,
        buffer: vk::Buffer,
        allocation: Mutex<Option<Allocation>>,
        size: u64,
    },
}

impl GpuBuffer {
    pub fn id(&self) -> u64 {
        match self {
            Self::Dummy { id, .. } => *id,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer, .. } => buffer.as_raw(),
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Self::Dummy { size, .. } => *size,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { size, .. } => *size,
        }
    }
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { id, size, .. } => f
                .debug_struct("GpuBuffer::Dummy")
                .field("id", id)
                .field("size", size)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer, size, .. } => f
                .debug_struct("GpuBuffer::Vulkan")
                .field("buffer", buffer)
                .field("size", size)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a texture sampler.
pub enum GpuSampler {
    Dummy { id: u64 },
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        ctx: Arc<VulkanContext>,
        sampler: vk::Sampler,
    },
}

impl GpuSampler {
    pub fn id(&self) -> u64 {
        match self {
            Self::Dummy { id } => *id,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { sampler, .. } => sampler.as_raw(),
        }
    }
}

impl_id_debug!(GpuSampler);

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuSampler {
    fn drop(&mut self) {
        if let GpuSampler::Vulkan { ctx, sampler } = self {
            unsafe {
                ctx.device.destroy_sampler(*sampler, None);
            }
        }
    }
}

// ============================================================================
// Command buffers
// ============================================================================

/// Handle to a command buffer.
pub enum GpuCommandBuffer {
    /// Dummy backend: commands are kept for inspection
    Dummy {
        id: u64,
        label: String,
        level: CommandBufferLevel,
        commands: Vec<DummyCommand>,
    },
    /// Vulkan backend command buffer
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        ctx: Arc<VulkanContext>,
        command_buffer: vk::CommandBuffer,
        slot: RecordingSlot,
        level: CommandBufferLevel,
    },
}

impl GpuCommandBuffer {
    pub fn id(&self) -> u64 {
        match self {
            Self::Dummy { id, .. } => *id,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { command_buffer, .. } => command_buffer.as_raw(),
        }
    }

    pub fn level(&self) -> CommandBufferLevel {
        match self {
            Self::Dummy { level, .. } => *level,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { level, .. } => *level,
        }
    }

    /// Commands recorded so far. Empty for GPU backends.
    pub fn recorded(&self) -> &[DummyCommand] {
        match self {
            Self::Dummy { commands, .. } => commands,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { .. } => &[],
        }
    }
}

impl std::fmt::Debug for GpuCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy {
                id,
                label,
                level,
                commands,
            } => f
                .debug_struct("GpuCommandBuffer::Dummy")
                .field("id", id)
                .field("label", label)
                .field("level", level)
                .field("commands", &commands.len())
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan {
                command_buffer,
                slot,
                level,
                ..
            } => f
                .debug_struct("GpuCommandBuffer::Vulkan")
                .field("command_buffer", command_buffer)
                .field("slot", slot)
                .field("level", level)
                .finish_non_exhaustive(),
        }
    }
}

// ============================================================================
// Synchronization
// ============================================================================

/// Handle to a fence for CPU-GPU synchronization.
pub enum GpuFence {
    /// Dummy backend: signaled at submit
    Dummy { id: u64, signaled: AtomicBool },
    /// Vulkan backend fence
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        ctx: Arc<VulkanContext>,
        fence: vk::Fence,
    },
}

impl GpuFence {
    pub fn id(&self) -> u64 {
        match self {
            Self::Dummy { id, .. } => *id,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { fence, .. } => fence.as_raw(),
        }
    }
}

impl std::fmt::Debug for GpuFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { id, signaled } => f
                .debug_struct("GpuFence::Dummy")
                .field("id", id)
                .field("signaled", signaled)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { fence, .. } => f
                .debug_struct("GpuFence::Vulkan")
                .field("fence", fence)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a binary semaphore for GPU-GPU synchronization.
pub enum GpuSemaphore {
    Dummy { id: u64 },
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        ctx: Arc<VulkanContext>,
        semaphore: vk::Semaphore,
    },
}

impl GpuSemaphore {
    pub fn id(&self) -> u64 {
        match self {
            Self::Dummy { id } => *id,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { semaphore, .. } => semaphore.as_raw(),
        }
    }
}

// ============================================================================
// Render passes and framebuffers
// ============================================================================

/// Handle to a native render-pass object.
pub enum GpuRenderPass {
    Dummy { id: u64, key: RenderPassKey },
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        ctx: Arc<VulkanContext>,
        render_pass: vk::RenderPass,
    },
}

impl GpuRenderPass {
    pub fn id(&self) -> u64 {
        match self {
            Self::Dummy { id, .. } => *id,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { render_pass, .. } => render_pass.as_raw(),
        }
    }
}

/// Handle to a framebuffer.
pub enum GpuFramebuffer {
    Dummy {
        id: u64,
        extent: Extent2d,
        attachments: Vec<u64>,
    },
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        ctx: Arc<VulkanContext>,
        framebuffer: vk::Framebuffer,
        extent: Extent2d,
    },
}

impl GpuFramebuffer {
    pub fn id(&self) -> u64 {
        match self {
            Self::Dummy { id, .. } => *id,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { framebuffer, .. } => framebuffer.as_raw(),
        }
    }

    pub fn extent(&self) -> Extent2d {
        match self {
            Self::Dummy { extent, .. } => *extent,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { extent, .. } => *extent,
        }
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// Handle to a descriptor-set layout.
pub enum GpuDescriptorSetLayout {
    Dummy { id: u64 },
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        ctx: Arc<VulkanContext>,
        layout: vk::DescriptorSetLayout,
    },
}

impl GpuDescriptorSetLayout {
    pub fn id(&self) -> u64 {
        match self {
            Self::Dummy { id } => *id,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { layout, .. } => layout.as_raw(),
        }
    }
}

/// Handle to a descriptor set.
pub enum GpuDescriptorSet {
    Dummy { id: u64 },
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        ctx: Arc<VulkanContext>,
        set: vk::DescriptorSet,
    },
}

impl GpuDescriptorSet {
    pub fn id(&self) -> u64 {
        match self {
            Self::Dummy { id } => *id,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { set, .. } => set.as_raw(),
        }
    }
}

// ============================================================================
// Presentation
// ============================================================================

/// Handle to a presentation surface.
pub enum GpuSurface {
    Dummy { id: u64 },
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        ctx: Arc<VulkanContext>,
        surface: vk::SurfaceKHR,
    },
}

impl GpuSurface {
    pub fn id(&self) -> u64 {
        match self {
            Self::Dummy { id } => *id,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { surface, .. } => surface.as_raw(),
        }
    }
}

/// Handle to a swapchain.
pub enum GpuSwapchain {
    Dummy {
        id: u64,
        image_count: u32,
        extent: Extent2d,
        next_image: AtomicU32,
    },
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        ctx: Arc<VulkanContext>,
        swapchain: vk::SwapchainKHR,
    },
}

impl GpuSwapchain {
    pub fn id(&self) -> u64 {
        match self {
            Self::Dummy { id, .. } => *id,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { swapchain, .. } => swapchain.as_raw(),
        }
    }
}

impl_id_debug!(
    GpuSemaphore,
    GpuRenderPass,
    GpuFramebuffer,
    GpuDescriptorSetLayout,
    GpuDescriptorSet,
    GpuSurface,
    GpuSwapchain,
);

// ============================================================================
// Vulkan Resource Cleanup (Drop implementations)
// ============================================================================

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuImage {
    fn drop(&mut self) {
        if let GpuImage::Vulkan {
            ctx,
            image,
            view,
            allocation,
            owned,
            ..
        } = self
        {
            unsafe {
                ctx.device.destroy_image_view(*view, None);
                if *owned {
                    ctx.device.destroy_image(*image, None);
                }
            }
            if let Some(allocation) = allocation.lock().take() {
                ctx.free_allocation(allocation);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let GpuBuffer::Vulkan {
            ctx,
            buffer,
            allocation,
            ..
        } = self
        {
            unsafe {
                ctx.device.destroy_buffer(*buffer, None);
            }
            if let Some(allocation) = allocation.lock().take() {
                ctx.free_allocation(allocation);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuCommandBuffer {
    fn drop(&mut self) {
        if let GpuCommandBuffer::Vulkan {
            ctx,
            command_buffer,
            slot,
            ..
        } = self
        {
            ctx.free_command_buffer(*slot, *command_buffer);
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuFence {
    fn drop(&mut self) {
        if let GpuFence::Vulkan { ctx, fence } = self {
            unsafe {
                ctx.device.destroy_fence(*fence, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuSemaphore {
    fn drop(&mut self) {
        if let GpuSemaphore::Vulkan { ctx, semaphore } = self {
            unsafe {
                ctx.device.destroy_semaphore(*semaphore, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuRenderPass {
    fn drop(&mut self) {
        if let GpuRenderPass::Vulkan { ctx, render_pass } = self {
            unsafe {
                ctx.device.destroy_render_pass(*render_pass, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuFramebuffer {
    fn drop(&mut self) {
        if let GpuFramebuffer::Vulkan {
            ctx, framebuffer, ..
        } = self
        {
            unsafe {
                ctx.device.destroy_framebuffer(*framebuffer, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuDescriptorSetLayout {
    fn drop(&mut self) {
        if let GpuDescriptorSetLayout::Vulkan { ctx, layout } = self {
            unsafe {
                ctx.device.destroy_descriptor_set_layout(*layout, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuDescriptorSet {
    fn drop(&mut self) {
        if let GpuDescriptorSet::Vulkan { ctx, set } = self {
            ctx.free_descriptor_set(*set);
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuSwapchain {
    fn drop(&mut self) {
        if let GpuSwapchain::Vulkan { ctx, swapchain } = self {
            unsafe {
                ctx.swapchain_loader.destroy_swapchain(*swapchain, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuSurface {
    fn drop(&mut self) {
        if let GpuSurface::Vulkan { ctx, surface } = self {
            unsafe {
                ctx.surface_loader.destroy_surface(*surface, None);
            }
        }
    }
}

static_assertions::assert_impl_all!(GpuImage: Send, Sync);
static_assertions::assert_impl_all!(GpuCommandBuffer: Send, Sync);
static_assertions::assert_impl_all!(GpuFence: Send, Sync);
