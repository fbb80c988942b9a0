//! Native Vulkan backend implementation using ash.
//!
//! Every object handed out holds an `Arc<VulkanContext>`, so the device,
//! the allocator and the pools outlive the last handle no matter which thread
//! drops it. Render passes are classic `VkRenderPass` objects: the frame
//! graph shares them by [`RenderPassKey`] and parallel recording continues
//! them from secondary command buffers.

mod allocator;
mod command;
pub(crate) mod conversion;
mod debug;
mod descriptor;
mod device;
mod instance;
mod render_pass;
mod swapchain;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, Allocator};
use parking_lot::Mutex;

use crate::descriptor::BindingLayout;
use crate::error::GraphicsError;
use crate::graph::RenderPassKey;
use crate::instance::InstanceParameters;
use crate::surface::SurfaceConfiguration;
use crate::types::{
    BufferDescriptor, Extent2d, ImageDescriptor, SamplerDescriptor, ScissorRect, TextureFormat,
    TextureUsage, Viewport,
};

use super::{
    AcquiredImage, CommandBufferLevel, DescriptorWrite, GpuBackend, GpuBuffer, GpuCommandBuffer,
    GpuDescriptorSet, GpuDescriptorSetLayout, GpuFence, GpuFramebuffer, GpuImage, GpuRenderPass,
    GpuSampler, GpuSemaphore, GpuSurface, GpuSwapchain, Inheritance, RecordingSlot,
    RenderPassBegin, SubmitInfo, SubpassContents, SurfaceTarget,
};

use self::conversion::{
    aspect_mask, convert_address_mode, convert_buffer_usage, convert_clear_value,
    convert_compare_function, convert_filter_mode, convert_mipmap_filter_mode,
    convert_texture_format, convert_texture_usage, convert_vk_error, convert_wait_stage,
};

// ============================================================================
// Shared context
// ============================================================================

/// Device-level state shared by the backend and every handle it created.
pub struct VulkanContext {
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    /// Queue submission and presentation are externally synchronized.
    pub(crate) queue: Mutex<vk::Queue>,
    pub(crate) queue_family: u32,
    /// Taken in `Drop` so the allocator is released before the device.
    allocator: Mutex<Option<Allocator>>,
    live_allocations: AtomicUsize,
    /// One pool per recording thread.
    command_pools: Mutex<HashMap<RecordingSlot, vk::CommandPool>>,
    descriptor_pool: Mutex<vk::DescriptorPool>,
    pub(crate) surface_loader: ash::khr::surface::Instance,
    pub(crate) swapchain_loader: ash::khr::swapchain::Device,
}

impl VulkanContext {
    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation, GraphicsError> {
        let mut guard = self.allocator.lock();
        let allocator = guard
            .as_mut()
            .ok_or_else(|| GraphicsError::Internal("allocator already released".to_string()))?;
        let allocation = allocator::allocate(allocator, name, requirements, location, linear)?;
        self.live_allocations.fetch_add(1, Ordering::AcqRel);
        Ok(allocation)
    }

    /// Return an image or buffer allocation to the allocator.
    pub(crate) fn free_allocation(&self, allocation: Allocation) {
        if let Some(allocator) = self.allocator.lock().as_mut() {
            if let Err(e) = allocator.free(allocation) {
                log::error!("Failed to free GPU allocation: {}", e);
            }
        }
        self.live_allocations.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn free_command_buffer(&self, slot: RecordingSlot, command_buffer: vk::CommandBuffer) {
        let pools = self.command_pools.lock();
        match pools.get(&slot) {
            Some(&pool) => unsafe { self.device.free_command_buffers(pool, &[command_buffer]) },
            None => log::error!("Command buffer freed into unknown pool {:?}", slot),
        }
    }

    pub(crate) fn free_descriptor_set(&self, set: vk::DescriptorSet) {
        let pool = self.descriptor_pool.lock();
        if let Err(e) = unsafe { self.device.free_descriptor_sets(*pool, &[set]) } {
            log::error!("Failed to free descriptor set: {:?}", e);
        }
    }

    /// Default 2D view of `image`.
    pub(crate) fn create_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        texture_format: TextureFormat,
    ) -> Result<vk::ImageView, GraphicsError> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_mask(texture_format),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe { self.device.create_image_view(&view_info, None) }
            .map_err(|e| convert_vk_error(e, "Failed to create image view"))
    }

    /// Move a fresh attachment image into `SHADER_READ_ONLY_OPTIMAL`, the
    /// layout render passes that load it expect.
    fn initialize_attachment_layout(
        &self,
        image: vk::Image,
        texture_format: TextureFormat,
    ) -> Result<(), GraphicsError> {
        command::submit_immediate(&self.device, &self.queue, self.queue_family, |cmd| {
            let barrier = vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: aspect_mask(texture_format),
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            unsafe {
                self.device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::FRAGMENT_SHADER
                        | vk::PipelineStageFlags::COMPUTE_SHADER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    std::slice::from_ref(&barrier),
                );
            }
        })
    }

    fn command_pool(&self, slot: RecordingSlot) -> Result<vk::CommandPool, GraphicsError> {
        let mut pools = self.command_pools.lock();
        if let Some(&pool) = pools.get(&slot) {
            return Ok(pool);
        }
        let pool = command::create_command_pool(&self.device, self.queue_family)?;
        log::debug!("Vulkan: created command pool for {:?}", slot);
        pools.insert(slot, pool);
        Ok(pool)
    }
}

impl std::fmt::Debug for VulkanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanContext")
            .field("physical_device", &self.physical_device)
            .field("queue_family", &self.queue_family)
            .field(
                "live_allocations",
                &self.live_allocations.load(Ordering::Acquire),
            )
            .finish_non_exhaustive()
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            for (_, pool) in self.command_pools.get_mut().drain() {
                self.device.destroy_command_pool(pool, None);
            }
            self.device
                .destroy_descriptor_pool(*self.descriptor_pool.get_mut(), None);

            // Allocator frees its memory blocks through the device.
            drop(self.allocator.get_mut().take());

            self.device.destroy_device(None);

            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

// ============================================================================
// Raw handle access
// ============================================================================

fn foreign(what: &str) -> GraphicsError {
    GraphicsError::InvalidParameter(format!("{what} does not belong to the Vulkan backend"))
}

fn raw_render_pass(render_pass: &GpuRenderPass) -> Result<vk::RenderPass, GraphicsError> {
    match render_pass {
        GpuRenderPass::Vulkan { render_pass, .. } => Ok(*render_pass),
        _ => Err(foreign("render pass")),
    }
}

fn raw_framebuffer(framebuffer: &GpuFramebuffer) -> Result<vk::Framebuffer, GraphicsError> {
    match framebuffer {
        GpuFramebuffer::Vulkan { framebuffer, .. } => Ok(*framebuffer),
        _ => Err(foreign("framebuffer")),
    }
}

fn raw_fence(fence: &GpuFence) -> Result<vk::Fence, GraphicsError> {
    match fence {
        GpuFence::Vulkan { fence, .. } => Ok(*fence),
        _ => Err(foreign("fence")),
    }
}

fn raw_semaphore(semaphore: &GpuSemaphore) -> Result<vk::Semaphore, GraphicsError> {
    match semaphore {
        GpuSemaphore::Vulkan { semaphore, .. } => Ok(*semaphore),
        _ => Err(foreign("semaphore")),
    }
}

fn raw_command_buffer(cmd: &GpuCommandBuffer) -> Option<vk::CommandBuffer> {
    match cmd {
        GpuCommandBuffer::Vulkan { command_buffer, .. } => Some(*command_buffer),
        _ => None,
    }
}

// ============================================================================
// Backend
// ============================================================================

/// Vulkan-based GPU backend using ash.
///
/// - Validation layers when [`InstanceParameters::validation`] is set
/// - gpu-allocator for memory management
/// - Classic render passes and secondary command buffers
/// - One command pool per [`RecordingSlot`]
pub struct VulkanBackend {
    ctx: Arc<VulkanContext>,
    validation_enabled: bool,
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("validation_enabled", &self.validation_enabled)
            .field("ctx", &self.ctx)
            .finish()
    }
}

impl VulkanBackend {
    /// Initialize the instance, pick a physical device and create the
    /// logical device, the allocator and the descriptor pool.
    pub fn with_params(params: &InstanceParameters) -> Result<Self, GraphicsError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to load Vulkan: {}", e))
        })?;

        let validation_enabled = params.validation;
        let bundle =
            instance::create_instance(&entry, &params.application_name, validation_enabled)?;
        let instance = &bundle.instance;

        let selected = device::select_physical_device(instance).and_then(|physical_device| {
            let queue_family = device::find_graphics_queue_family(instance, physical_device)?;
            let device = device::create_logical_device(instance, physical_device, queue_family)?;
            Ok((physical_device, queue_family, device))
        });
        let (physical_device, queue_family, device) = match selected {
            Ok(selected) => selected,
            Err(e) => {
                unsafe { bundle.destroy() };
                return Err(e);
            }
        };

        let resources = allocator::create_allocator(instance, physical_device, &device)
            .and_then(|allocator| {
                descriptor::create_descriptor_pool(&device).map(|pool| (allocator, pool))
            });
        let (allocator, descriptor_pool) = match resources {
            Ok(resources) => resources,
            Err(e) => {
                unsafe {
                    device.destroy_device(None);
                    bundle.destroy();
                }
                return Err(e);
            }
        };

        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        let surface_loader = ash::khr::surface::Instance::new(&entry, instance);
        let swapchain_loader = ash::khr::swapchain::Device::new(instance, &device);
        let instance::InstanceBundle { instance, debug } = bundle;

        log::info!(
            "Vulkan backend initialized (validation: {})",
            validation_enabled
        );

        Ok(Self {
            ctx: Arc::new(VulkanContext {
                entry,
                instance,
                debug,
                physical_device,
                device,
                queue: Mutex::new(queue),
                queue_family,
                allocator: Mutex::new(Some(allocator)),
                live_allocations: AtomicUsize::new(0),
                command_pools: Mutex::new(HashMap::new()),
                descriptor_pool: Mutex::new(descriptor_pool),
                surface_loader,
                swapchain_loader,
            }),
            validation_enabled,
        })
    }

    pub fn context(&self) -> &Arc<VulkanContext> {
        &self.ctx
    }

    fn device(&self) -> &ash::Device {
        &self.ctx.device
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan Backend (ash)"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    // --- Resources ---

    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<GpuImage, GraphicsError> {
        let format = convert_texture_format(descriptor.format);
        let usage = convert_texture_usage(descriptor.usage, descriptor.format);

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: descriptor.extent.width,
                height: descriptor.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device().create_image(&image_info, None) }
            .map_err(|e| convert_vk_error(e, "Failed to create image"))?;

        let requirements = unsafe { self.device().get_image_memory_requirements(image) };
        let name = descriptor.label.as_deref().unwrap_or("image");
        let allocation =
            match self
                .ctx
                .allocate(name, requirements, MemoryLocation::GpuOnly, false)
            {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { self.device().destroy_image(image, None) };
                    return Err(e);
                }
            };

        let view = unsafe {
            self.device()
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .map_err(|e| convert_vk_error(e, "Failed to bind image memory"))
        .and_then(|()| self.ctx.create_view(image, format, descriptor.format));
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.device().destroy_image(image, None) };
                self.ctx.free_allocation(allocation);
                return Err(e);
            }
        };

        let sampled_attachment = TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING;
        if descriptor.usage.contains(sampled_attachment) {
            if let Err(e) = self.ctx.initialize_attachment_layout(image, descriptor.format) {
                unsafe {
                    self.device().destroy_image_view(view, None);
                    self.device().destroy_image(image, None);
                }
                self.ctx.free_allocation(allocation);
                return Err(e);
            }
        }

        log::trace!(
            "Vulkan: created image {:?} {} {:?}",
            descriptor.label,
            descriptor.extent,
            descriptor.format
        );
        Ok(GpuImage::Vulkan {
            ctx: Arc::clone(&self.ctx),
            image,
            view,
            allocation: Mutex::new(Some(allocation)),
            owned: true,
            format,
            extent: descriptor.extent,
        })
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError> {
        use crate::types::BufferUsage;

        let buffer_info = vk::BufferCreateInfo::default()
            .size(descriptor.size)
            .usage(convert_buffer_usage(descriptor.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device().create_buffer(&buffer_info, None) }
            .map_err(|e| convert_vk_error(e, "Failed to create buffer"))?;

        // Uniform and COPY_DST buffers are written from the CPU every frame.
        let location = if descriptor
            .usage
            .intersects(BufferUsage::UNIFORM | BufferUsage::COPY_DST)
        {
            MemoryLocation::CpuToGpu
        } else {
            MemoryLocation::GpuOnly
        };

        let requirements = unsafe { self.device().get_buffer_memory_requirements(buffer) };
        let name = descriptor.label.as_deref().unwrap_or("buffer");
        let allocation = match self.ctx.allocate(name, requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        let (memory, offset) = (unsafe { allocation.memory() }, allocation.offset());

        let handle = GpuBuffer::Vulkan {
            ctx: Arc::clone(&self.ctx),
            buffer,
            allocation: Mutex::new(Some(allocation)),
            size: descriptor.size,
        };
        unsafe { self.device().bind_buffer_memory(buffer, memory, offset) }
            .map_err(|e| convert_vk_error(e, "Failed to bind buffer memory"))?;
        Ok(handle)
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<GpuSampler, GraphicsError> {
        let address_mode = convert_address_mode(descriptor.address_mode);
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(convert_filter_mode(descriptor.mag_filter))
            .min_filter(convert_filter_mode(descriptor.min_filter))
            .mipmap_mode(convert_mipmap_filter_mode(descriptor.min_filter))
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .compare_enable(descriptor.compare.is_some())
            .compare_op(
                descriptor
                    .compare
                    .map(convert_compare_function)
                    .unwrap_or(vk::CompareOp::ALWAYS),
            )
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK)
            .unnormalized_coordinates(false);

        let sampler = unsafe { self.device().create_sampler(&sampler_info, None) }
            .map_err(|e| convert_vk_error(e, "Failed to create sampler"))?;

        Ok(GpuSampler::Vulkan {
            ctx: Arc::clone(&self.ctx),
            sampler,
        })
    }

    fn create_render_pass(&self, key: &RenderPassKey) -> Result<GpuRenderPass, GraphicsError> {
        let render_pass = render_pass::create_render_pass(self.device(), key)?;
        log::debug!(
            "Vulkan: created render pass for {} attachment(s), present: {}",
            key.attachments.len(),
            key.present
        );
        Ok(GpuRenderPass::Vulkan {
            ctx: Arc::clone(&self.ctx),
            render_pass,
        })
    }

    fn create_framebuffer(
        &self,
        render_pass: &GpuRenderPass,
        attachments: &[&GpuImage],
        extent: Extent2d,
    ) -> Result<GpuFramebuffer, GraphicsError> {
        let views = attachments
            .iter()
            .map(|image| match image {
                GpuImage::Vulkan { view, .. } => Ok(*view),
                _ => Err(foreign("framebuffer attachment")),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(raw_render_pass(render_pass)?)
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { self.device().create_framebuffer(&create_info, None) }
            .map_err(|e| convert_vk_error(e, "Failed to create framebuffer"))?;

        Ok(GpuFramebuffer::Vulkan {
            ctx: Arc::clone(&self.ctx),
            framebuffer,
            extent,
        })
    }

    // --- Synchronization ---

    fn create_semaphore(&self) -> Result<GpuSemaphore, GraphicsError> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { self.device().create_semaphore(&create_info, None) }
            .map_err(|e| convert_vk_error(e, "Failed to create semaphore"))?;
        Ok(GpuSemaphore::Vulkan {
            ctx: Arc::clone(&self.ctx),
            semaphore,
        })
    }

    fn create_fence(&self, signaled: bool) -> Result<GpuFence, GraphicsError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { self.device().create_fence(&create_info, None) }
            .map_err(|e| convert_vk_error(e, "Failed to create fence"))?;
        Ok(GpuFence::Vulkan {
            ctx: Arc::clone(&self.ctx),
            fence,
        })
    }

    fn wait_fence(&self, fence: &GpuFence) -> Result<(), GraphicsError> {
        let fences = [raw_fence(fence)?];
        unsafe { self.device().wait_for_fences(&fences, true, u64::MAX) }
            .map_err(|e| convert_vk_error(e, "Failed to wait for fence"))
    }

    fn reset_fence(&self, fence: &GpuFence) -> Result<(), GraphicsError> {
        let fences = [raw_fence(fence)?];
        unsafe { self.device().reset_fences(&fences) }
            .map_err(|e| convert_vk_error(e, "Failed to reset fence"))
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> Result<bool, GraphicsError> {
        unsafe { self.device().get_fence_status(raw_fence(fence)?) }
            .map_err(|e| convert_vk_error(e, "Failed to query fence"))
    }

    // --- Command recording ---

    fn create_command_buffer(
        &self,
        level: CommandBufferLevel,
        slot: RecordingSlot,
        label: &str,
    ) -> Result<GpuCommandBuffer, GraphicsError> {
        let pool = self.ctx.command_pool(slot)?;
        // Pools are externally synchronized; allocation happens on the frame
        // thread while no job records into them.
        let command_buffer = {
            let _pools = self.ctx.command_pools.lock();
            command::allocate_command_buffer(self.device(), pool, level)?
        };
        log::trace!("Vulkan: allocated {:?} command buffer '{}'", level, label);
        Ok(GpuCommandBuffer::Vulkan {
            ctx: Arc::clone(&self.ctx),
            command_buffer,
            slot,
            level,
        })
    }

    fn begin_command_buffer(
        &self,
        cmd: &mut GpuCommandBuffer,
        inheritance: Option<Inheritance<'_>>,
    ) -> Result<(), GraphicsError> {
        let GpuCommandBuffer::Vulkan {
            command_buffer,
            level,
            ..
        } = cmd
        else {
            return Err(foreign("command buffer"));
        };

        unsafe {
            self.device()
                .reset_command_buffer(*command_buffer, vk::CommandBufferResetFlags::empty())
        }
        .map_err(|e| convert_vk_error(e, "Failed to reset command buffer"))?;

        let result = match (*level, inheritance) {
            (CommandBufferLevel::Primary, _) => {
                let begin_info = vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
                unsafe { self.device().begin_command_buffer(*command_buffer, &begin_info) }
            }
            (CommandBufferLevel::Secondary, Some(inheritance)) => {
                let inheritance_info = vk::CommandBufferInheritanceInfo::default()
                    .render_pass(raw_render_pass(inheritance.render_pass)?)
                    .subpass(0)
                    .framebuffer(raw_framebuffer(inheritance.framebuffer)?);
                let begin_info = vk::CommandBufferBeginInfo::default()
                    .flags(
                        vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
                            | vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE,
                    )
                    .inheritance_info(&inheritance_info);
                unsafe { self.device().begin_command_buffer(*command_buffer, &begin_info) }
            }
            (CommandBufferLevel::Secondary, None) => {
                return Err(GraphicsError::InvalidParameter(
                    "secondary command buffers need an inheritance".to_string(),
                ));
            }
        };
        result.map_err(|e| convert_vk_error(e, "Failed to begin command buffer"))
    }

    fn end_command_buffer(&self, cmd: &mut GpuCommandBuffer) -> Result<(), GraphicsError> {
        let command_buffer = raw_command_buffer(cmd).ok_or_else(|| foreign("command buffer"))?;
        unsafe { self.device().end_command_buffer(command_buffer) }
            .map_err(|e| convert_vk_error(e, "Failed to end command buffer"))
    }

    fn cmd_begin_render_pass(&self, cmd: &mut GpuCommandBuffer, begin: &RenderPassBegin<'_>) {
        let (Some(command_buffer), Ok(render_pass), Ok(framebuffer)) = (
            raw_command_buffer(cmd),
            raw_render_pass(begin.render_pass),
            raw_framebuffer(begin.framebuffer),
        ) else {
            log::error!("cmd_begin_render_pass with handles from another backend");
            return;
        };

        let clear_values: Vec<_> = begin.clear_values.iter().map(convert_clear_value).collect();
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: begin.extent.width,
                    height: begin.extent.height,
                },
            })
            .clear_values(&clear_values);
        let contents = match begin.contents {
            SubpassContents::Inline => vk::SubpassContents::INLINE,
            SubpassContents::SecondaryCommandBuffers => {
                vk::SubpassContents::SECONDARY_COMMAND_BUFFERS
            }
        };

        unsafe {
            self.device()
                .cmd_begin_render_pass(command_buffer, &begin_info, contents)
        };
    }

    fn cmd_end_render_pass(&self, cmd: &mut GpuCommandBuffer) {
        if let Some(command_buffer) = raw_command_buffer(cmd) {
            unsafe { self.device().cmd_end_render_pass(command_buffer) };
        }
    }

    fn cmd_set_viewport(&self, cmd: &mut GpuCommandBuffer, viewport: &Viewport) {
        if let Some(command_buffer) = raw_command_buffer(cmd) {
            let viewports = [vk::Viewport {
                x: viewport.x,
                y: viewport.y,
                width: viewport.width,
                height: viewport.height,
                min_depth: viewport.min_depth,
                max_depth: viewport.max_depth,
            }];
            unsafe { self.device().cmd_set_viewport(command_buffer, 0, &viewports) };
        }
    }

    fn cmd_set_scissor(&self, cmd: &mut GpuCommandBuffer, scissor: &ScissorRect) {
        if let Some(command_buffer) = raw_command_buffer(cmd) {
            let scissors = [vk::Rect2D {
                offset: vk::Offset2D {
                    x: scissor.x,
                    y: scissor.y,
                },
                extent: vk::Extent2D {
                    width: scissor.width,
                    height: scissor.height,
                },
            }];
            unsafe { self.device().cmd_set_scissor(command_buffer, 0, &scissors) };
        }
    }

    fn cmd_draw(
        &self,
        cmd: &mut GpuCommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        if let Some(command_buffer) = raw_command_buffer(cmd) {
            unsafe {
                self.device().cmd_draw(
                    command_buffer,
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                )
            };
        }
    }

    fn cmd_draw_indexed(
        &self,
        cmd: &mut GpuCommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        if let Some(command_buffer) = raw_command_buffer(cmd) {
            unsafe {
                self.device().cmd_draw_indexed(
                    command_buffer,
                    index_count,
                    instance_count,
                    first_index,
                    vertex_offset,
                    first_instance,
                )
            };
        }
    }

    fn cmd_dispatch(&self, cmd: &mut GpuCommandBuffer, x: u32, y: u32, z: u32) {
        if let Some(command_buffer) = raw_command_buffer(cmd) {
            unsafe { self.device().cmd_dispatch(command_buffer, x, y, z) };
        }
    }

    fn cmd_execute_commands(&self, cmd: &mut GpuCommandBuffer, secondaries: &[&GpuCommandBuffer]) {
        let Some(command_buffer) = raw_command_buffer(cmd) else {
            return;
        };
        let secondaries: Vec<_> = secondaries
            .iter()
            .filter_map(|secondary| raw_command_buffer(secondary))
            .collect();
        if !secondaries.is_empty() {
            unsafe {
                self.device()
                    .cmd_execute_commands(command_buffer, &secondaries)
            };
        }
    }

    // --- Queue ---

    fn submit(&self, info: &SubmitInfo<'_>) -> Result<(), GraphicsError> {
        let command_buffers = info
            .command_buffers
            .iter()
            .map(|cmd| raw_command_buffer(cmd).ok_or_else(|| foreign("command buffer")))
            .collect::<Result<Vec<_>, _>>()?;
        let mut wait_semaphores = Vec::with_capacity(info.wait_semaphores.len());
        let mut wait_stages = Vec::with_capacity(info.wait_semaphores.len());
        for (semaphore, stage) in &info.wait_semaphores {
            wait_semaphores.push(raw_semaphore(semaphore)?);
            wait_stages.push(convert_wait_stage(*stage));
        }
        let signal_semaphores = info
            .signal_semaphores
            .iter()
            .map(|semaphore| raw_semaphore(semaphore))
            .collect::<Result<Vec<_>, _>>()?;
        let fence = match info.fence {
            Some(fence) => raw_fence(fence)?,
            None => vk::Fence::null(),
        };

        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);

        let queue = self.ctx.queue.lock();
        unsafe {
            self.device()
                .queue_submit(*queue, std::slice::from_ref(&submit_info), fence)
        }
        .map_err(|e| convert_vk_error(e, &format!("Failed to submit '{}'", info.label)))
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        unsafe { self.device().device_wait_idle() }
            .map_err(|e| convert_vk_error(e, "Failed to wait for device idle"))
    }

    // --- Descriptors ---

    fn create_descriptor_set_layout(
        &self,
        layout: &BindingLayout,
    ) -> Result<GpuDescriptorSetLayout, GraphicsError> {
        let layout = descriptor::create_descriptor_set_layout(self.device(), layout)?;
        Ok(GpuDescriptorSetLayout::Vulkan {
            ctx: Arc::clone(&self.ctx),
            layout,
        })
    }

    fn allocate_descriptor_set(
        &self,
        layout: &GpuDescriptorSetLayout,
    ) -> Result<GpuDescriptorSet, GraphicsError> {
        let GpuDescriptorSetLayout::Vulkan { layout, .. } = layout else {
            return Err(foreign("descriptor set layout"));
        };
        let set = {
            let pool = self.ctx.descriptor_pool.lock();
            descriptor::allocate_descriptor_set(self.device(), *pool, *layout)?
        };
        Ok(GpuDescriptorSet::Vulkan {
            ctx: Arc::clone(&self.ctx),
            set,
        })
    }

    fn update_descriptor_set(&self, set: &GpuDescriptorSet, writes: &[DescriptorWrite<'_>]) {
        match set {
            GpuDescriptorSet::Vulkan { set, .. } => {
                descriptor::update_descriptor_set(self.device(), *set, writes)
            }
            _ => log::error!("update_descriptor_set with a set from another backend"),
        }
    }

    // --- Presentation ---

    fn create_surface(&self, target: &SurfaceTarget) -> Result<GpuSurface, GraphicsError> {
        swapchain::create_surface(&self.ctx, target)
    }

    fn surface_formats(&self, surface: &GpuSurface) -> Result<Vec<TextureFormat>, GraphicsError> {
        swapchain::surface_formats(&self.ctx, surface)
    }

    fn surface_extent(&self, surface: &GpuSurface) -> Result<Extent2d, GraphicsError> {
        swapchain::surface_extent(&self.ctx, surface)
    }

    fn create_swapchain(
        &self,
        surface: &GpuSurface,
        config: &SurfaceConfiguration,
        old: Option<&GpuSwapchain>,
    ) -> Result<(GpuSwapchain, Vec<GpuImage>), GraphicsError> {
        swapchain::create_swapchain(&self.ctx, surface, config, old)
    }

    fn acquire_next_image(
        &self,
        swapchain: &GpuSwapchain,
        signal: &GpuSemaphore,
    ) -> Result<AcquiredImage, GraphicsError> {
        swapchain::acquire_next_image(&self.ctx, swapchain, raw_semaphore(signal)?)
    }

    fn present(
        &self,
        swapchain: &GpuSwapchain,
        image_index: u32,
        wait: &[&GpuSemaphore],
    ) -> Result<bool, GraphicsError> {
        let wait = wait
            .iter()
            .map(|semaphore| raw_semaphore(semaphore))
            .collect::<Result<Vec<_>, _>>()?;
        swapchain::present(&self.ctx, swapchain, image_index, &wait)
    }

    // --- Diagnostics ---

    fn outstanding_allocations(&self) -> usize {
        self.ctx.live_allocations.load(Ordering::Acquire)
    }
}

static_assertions::assert_impl_all!(VulkanBackend: Send, Sync);
static_assertions::assert_impl_all!(VulkanContext: Send, Sync);
