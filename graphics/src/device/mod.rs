//! Graphics device.
//!
//! [`GraphicsDevice`] creates every GPU object the frame graph uses and owns
//! the three pieces of state shared between passes:
//!
//! - the frame counter and the number of frames in flight
//!   ([`image_count`](GraphicsDevice::image_count));
//! - the deferred-destruction ring ([`DeferredDestructor`]);
//! - the render-pass cache keyed by [`RenderPassKey`].
//!
//! Objects created here hold the backend, never the device, so a device is
//! dropped as soon as the last frame graph using it is. Teardown flushes all
//! retired resources and asserts that no allocation outlived the device.

mod command;
mod deferred;
mod resources;
mod sync;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{
    CommandBufferLevel, GpuBackend, GpuImage, RecordingSlot, SubmitInfo, SurfaceTarget,
};
use crate::descriptor::{BindingLayout, DescriptorSet, DescriptorSetLayout};
use crate::error::GraphicsError;
use crate::graph::RenderPassKey;
use crate::surface::{Surface, SurfaceConfiguration, Swapchain};
use crate::types::{
    BufferDescriptor, Extent2d, ImageDescriptor, SamplerDescriptor, TextureUsage,
};

pub use command::CommandBuffer;
pub use deferred::DeferredDestructor;
pub use resources::{Buffer, Framebuffer, Image, RenderPassObject, Sampler};
pub use sync::{Fence, Semaphore};

/// A graphics device.
///
/// Created by [`GraphicsInstance::create_device`](crate::GraphicsInstance::create_device).
///
/// # Thread Safety
///
/// `GraphicsDevice` is `Send + Sync`. Parallel recording jobs create no
/// objects; everything else runs on the frame thread.
///
/// # Example
///
/// ```ignore
/// let device = instance.create_device()?;
/// let image = device.create_image(
///     &ImageDescriptor::new_2d(Extent2d::new(1920, 1080), TextureFormat::Rgba8Unorm, TextureUsage::RENDER_ATTACHMENT)
///         .with_copies(device.image_count()),
/// )?;
/// ```
pub struct GraphicsDevice {
    backend: Arc<dyn GpuBackend>,
    deferred: Arc<DeferredDestructor>,
    render_passes: Mutex<HashMap<RenderPassKey, Arc<RenderPassObject>>>,
    image_count: usize,
}

impl GraphicsDevice {
    /// Create a device with `image_count` frames in flight (at least one).
    pub(crate) fn new(backend: Arc<dyn GpuBackend>, image_count: usize) -> Self {
        let image_count = image_count.max(1);
        log::info!(
            "Creating GraphicsDevice on {} ({} frames in flight)",
            backend.name(),
            image_count
        );
        Self {
            backend,
            deferred: Arc::new(DeferredDestructor::new(image_count)),
            render_passes: Mutex::new(HashMap::new()),
            image_count,
        }
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// Get the backend name.
    pub fn name(&self) -> &str {
        self.backend.name()
    }

    // ========================================================================
    // Frames
    // ========================================================================

    /// Number of frames in flight.
    pub fn image_count(&self) -> usize {
        self.image_count
    }

    /// Slot of the frame being recorded, in `0..image_count`.
    pub fn current_image(&self) -> usize {
        self.deferred.current_slot()
    }

    /// Monotonic frame number.
    pub fn frame_number(&self) -> u64 {
        self.deferred.frame()
    }

    /// Advance to the next frame-in-flight slot.
    pub fn next_frame(&self) {
        self.deferred.advance();
    }

    // ========================================================================
    // Deferred destruction
    // ========================================================================

    /// Retire `resource`. It is released by the [`flush_resources`]
    /// call of the next frame recorded in the current slot.
    ///
    /// [`flush_resources`]: GraphicsDevice::flush_resources
    pub fn drop_resource<R: Any + Send + Sync>(&self, resource: R) {
        self.deferred.queue(Box::new(resource));
    }

    /// Release everything retired in the current slot. Call once per frame
    /// after the slot's fence has signaled.
    pub fn flush_resources(&self) -> usize {
        let released = self.deferred.flush_current();
        if released > 0 {
            log::trace!(
                "GraphicsDevice: released {} deferred resources (slot {})",
                released,
                self.current_image()
            );
        }
        released
    }

    /// Number of retired resources not yet released.
    pub fn pending_resource_count(&self) -> usize {
        self.deferred.pending_count()
    }

    pub(crate) fn deferred(&self) -> &Arc<DeferredDestructor> {
        &self.deferred
    }

    /// Number of live image and buffer allocations on the backend.
    pub fn outstanding_allocations(&self) -> usize {
        self.backend.outstanding_allocations()
    }

    // ========================================================================
    // Render passes
    // ========================================================================

    /// Return the cached render pass for `key`, creating it on first use.
    pub fn find_or_create_render_pass(
        &self,
        key: &RenderPassKey,
    ) -> Result<Arc<RenderPassObject>, GraphicsError> {
        let mut cache = self.render_passes.lock();
        if let Some(render_pass) = cache.get(key) {
            return Ok(Arc::clone(render_pass));
        }
        let raw = self.backend.create_render_pass(key)?;
        let render_pass = Arc::new(RenderPassObject::new(key.clone(), raw));
        cache.insert(key.clone(), Arc::clone(&render_pass));
        log::debug!(
            "GraphicsDevice: created render pass #{} ({} attachments)",
            cache.len(),
            key.attachments.len()
        );
        Ok(render_pass)
    }

    /// Number of distinct render passes created so far.
    pub fn render_pass_count(&self) -> usize {
        self.render_passes.lock().len()
    }

    // ========================================================================
    // Resources
    // ========================================================================

    /// Create an image with `descriptor.copies` backing GPU images.
    ///
    /// # Errors
    ///
    /// Returns an error if the extent is zero or allocation fails.
    pub fn create_image(&self, descriptor: &ImageDescriptor) -> Result<Arc<Image>, GraphicsError> {
        if descriptor.extent.is_degenerate() {
            return Err(GraphicsError::InvalidParameter(format!(
                "image dimensions cannot be zero ({})",
                descriptor.extent
            )));
        }
        let copies = (0..descriptor.copies.max(1))
            .map(|_| self.backend.create_image(descriptor))
            .collect::<Result<Vec<_>, _>>()?;

        log::trace!(
            "GraphicsDevice: created image {:?}, size={}, copies={}",
            descriptor.label,
            descriptor.extent,
            copies.len()
        );
        Ok(Arc::new(Image::new(descriptor.clone(), copies)))
    }

    /// Create a GPU buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the size is zero or allocation fails.
    pub fn create_buffer(
        &self,
        descriptor: &BufferDescriptor,
    ) -> Result<Arc<Buffer>, GraphicsError> {
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size cannot be zero".to_string(),
            ));
        }
        let raw = self.backend.create_buffer(descriptor)?;
        log::trace!(
            "GraphicsDevice: created buffer {:?}, size={}",
            descriptor.label,
            descriptor.size
        );
        Ok(Arc::new(Buffer::new(descriptor.clone(), raw)))
    }

    pub fn create_sampler(
        &self,
        descriptor: &SamplerDescriptor,
    ) -> Result<Arc<Sampler>, GraphicsError> {
        let raw = self.backend.create_sampler(descriptor)?;
        log::trace!("GraphicsDevice: created sampler {:?}", descriptor.label);
        Ok(Arc::new(Sampler::new(descriptor.clone(), raw)))
    }

    pub fn create_framebuffer(
        &self,
        render_pass: &RenderPassObject,
        attachments: &[&GpuImage],
        extent: Extent2d,
    ) -> Result<Arc<Framebuffer>, GraphicsError> {
        let raw = self
            .backend
            .create_framebuffer(render_pass.raw(), attachments, extent)?;
        Ok(Arc::new(Framebuffer::new(raw, extent)))
    }

    // ========================================================================
    // Commands and synchronization
    // ========================================================================

    pub fn create_command_buffer(
        &self,
        level: CommandBufferLevel,
        slot: RecordingSlot,
        label: &str,
    ) -> Result<CommandBuffer, GraphicsError> {
        let raw = self.backend.create_command_buffer(level, slot, label)?;
        Ok(CommandBuffer::new(Arc::clone(&self.backend), raw, label))
    }

    pub fn create_semaphore(&self) -> Result<Semaphore, GraphicsError> {
        Ok(Semaphore::new(self.backend.create_semaphore()?))
    }

    pub fn create_fence(&self, signaled: bool) -> Result<Fence, GraphicsError> {
        let raw = self.backend.create_fence(signaled)?;
        Ok(Fence::new(Arc::clone(&self.backend), raw))
    }

    pub fn submit(&self, info: &SubmitInfo<'_>) -> Result<(), GraphicsError> {
        self.backend.submit(info)
    }

    /// Block until the GPU is idle.
    pub fn wait_idle(&self) -> Result<(), GraphicsError> {
        self.backend.wait_idle()
    }

    // ========================================================================
    // Descriptors
    // ========================================================================

    pub fn create_descriptor_set_layout(
        &self,
        layout: BindingLayout,
    ) -> Result<Arc<DescriptorSetLayout>, GraphicsError> {
        let raw = self.backend.create_descriptor_set_layout(&layout)?;
        Ok(Arc::new(DescriptorSetLayout::new(layout, raw)))
    }

    /// Create a descriptor set with one backend set per frame in flight, or
    /// a single one when `is_static`.
    pub fn create_descriptor_set(
        &self,
        layout: &Arc<DescriptorSetLayout>,
        is_static: bool,
    ) -> Result<DescriptorSet, GraphicsError> {
        let count = if is_static { 1 } else { self.image_count };
        let raw = (0..count)
            .map(|_| self.backend.allocate_descriptor_set(layout.raw()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DescriptorSet::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.deferred),
            Arc::clone(layout),
            raw,
        ))
    }

    // ========================================================================
    // Presentation
    // ========================================================================

    pub fn create_surface(&self, target: &SurfaceTarget) -> Result<Surface, GraphicsError> {
        let raw = self.backend.create_surface(target)?;
        Ok(Surface::new(Arc::clone(&self.backend), raw))
    }

    /// Create a swapchain, replacing `old` if given.
    pub fn create_swapchain(
        &self,
        surface: &Surface,
        config: &SurfaceConfiguration,
        old: Option<&Swapchain>,
    ) -> Result<Swapchain, GraphicsError> {
        let (raw, images) =
            self.backend
                .create_swapchain(surface.raw(), config, old.map(Swapchain::raw))?;
        let images = images
            .into_iter()
            .enumerate()
            .map(|(index, image)| {
                let descriptor = ImageDescriptor::new_2d(
                    config.extent,
                    config.format,
                    TextureUsage::RENDER_ATTACHMENT,
                )
                .with_label(format!("swapchain_{index}"));
                Arc::new(Image::new(descriptor, vec![image]))
            })
            .collect::<Vec<_>>();
        log::info!(
            "GraphicsDevice: created swapchain {} with {} images ({:?}, {:?})",
            config.extent,
            images.len(),
            config.format,
            config.present_mode
        );
        Ok(Swapchain::new(raw, images, config.clone()))
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            log::error!("GraphicsDevice: wait_idle failed during teardown: {}", e);
        }
        let released = self.deferred.flush_all();
        self.render_passes.lock().clear();
        log::info!(
            "GraphicsDevice: teardown released {} deferred resources",
            released
        );

        let outstanding = self.backend.outstanding_allocations();
        if outstanding != 0 {
            if std::thread::panicking() {
                log::error!("GraphicsDevice dropped with {outstanding} outstanding allocations");
            } else {
                panic!("GraphicsDevice dropped with {outstanding} outstanding allocations");
            }
        }
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("backend", &self.backend.name())
            .field("image_count", &self.image_count)
            .field("deferred", &self.deferred)
            .finish()
    }
}

// Ensure GraphicsDevice is Send + Sync
static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::graph::AttachmentKey;
    use crate::types::{BufferUsage, TextureFormat};

    fn create_test_device() -> (Arc<DummyBackend>, GraphicsDevice) {
        let backend = Arc::new(DummyBackend::new());
        let device = GraphicsDevice::new(backend.clone(), 2);
        (backend, device)
    }

    fn key(format: TextureFormat, has_clear: bool) -> RenderPassKey {
        RenderPassKey {
            attachments: vec![AttachmentKey { format, has_clear }],
            present: false,
            reversed_z: false,
        }
    }

    #[test]
    fn test_frame_slots_wrap() {
        let (_, device) = create_test_device();
        assert_eq!(device.image_count(), 2);
        assert_eq!(device.current_image(), 0);
        device.next_frame();
        assert_eq!(device.current_image(), 1);
        device.next_frame();
        assert_eq!(device.current_image(), 0);
        assert_eq!(device.frame_number(), 2);
    }

    #[test]
    fn test_render_pass_cache_shares_equal_keys() {
        let (_, device) = create_test_device();
        let a = device
            .find_or_create_render_pass(&key(TextureFormat::Rgba8Unorm, true))
            .unwrap();
        let b = device
            .find_or_create_render_pass(&key(TextureFormat::Rgba8Unorm, true))
            .unwrap();
        let c = device
            .find_or_create_render_pass(&key(TextureFormat::Rgba8Unorm, false))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(device.render_pass_count(), 2);
    }

    #[test]
    fn test_create_frame_buffered_image() {
        let (backend, device) = create_test_device();
        let image = device
            .create_image(
                &ImageDescriptor::new_2d(
                    Extent2d::new(64, 32),
                    TextureFormat::Rgba16Float,
                    TextureUsage::RENDER_ATTACHMENT,
                )
                .with_copies(device.image_count()),
            )
            .unwrap();
        assert_eq!(image.copy_count(), 2);
        assert_ne!(image.raw(0).id(), image.raw(1).id());
        assert_eq!(image.raw(0).id(), image.raw(2).id());
        assert_eq!(backend.outstanding_allocations(), 2);
    }

    #[test]
    fn test_create_buffer_zero_size() {
        let (_, device) = create_test_device();
        let result = device.create_buffer(&BufferDescriptor::new(0, BufferUsage::VERTEX));
        assert!(result.is_err());
    }

    #[test]
    fn test_drop_resource_released_on_slot_flush() {
        let (backend, device) = create_test_device();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(256, BufferUsage::UNIFORM))
            .unwrap();
        let weak = Arc::downgrade(&buffer);

        device.drop_resource(buffer);
        assert!(weak.upgrade().is_some());

        // Slot 1 flushes nothing retired in slot 0.
        device.next_frame();
        assert_eq!(device.flush_resources(), 0);
        assert!(weak.upgrade().is_some());
        assert_eq!(backend.outstanding_allocations(), 1);

        device.next_frame();
        assert_eq!(device.flush_resources(), 1);
        assert!(weak.upgrade().is_none());
        assert_eq!(backend.outstanding_allocations(), 0);
    }

    #[test]
    fn test_teardown_flushes_pending() {
        let (backend, device) = create_test_device();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(64, BufferUsage::STORAGE))
            .unwrap();
        device.drop_resource(buffer);
        drop(device);
        assert_eq!(backend.outstanding_allocations(), 0);
    }

    #[test]
    #[should_panic(expected = "outstanding allocations")]
    fn test_teardown_with_leak_panics() {
        let (_, device) = create_test_device();
        let leaked = device
            .create_buffer(&BufferDescriptor::new(64, BufferUsage::STORAGE))
            .unwrap();
        std::mem::forget(leaked);
        drop(device);
    }
}
