//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform any GPU work. Command buffers keep the
//! commands recorded into them and every submission, framebuffer creation,
//! descriptor update and present is appended to an inspectable log, so tests
//! can assert on the exact stream the frame graph produced.
//!
//! Submission is synchronous: fences are signaled by `submit` itself.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::descriptor::BindingLayout;
use crate::error::GraphicsError;
use crate::graph::RenderPassKey;
use crate::surface::SurfaceConfiguration;
use crate::types::{
    BufferDescriptor, ClearValue, Extent2d, ImageDescriptor, SamplerDescriptor, ScissorRect,
    TextureFormat, Viewport,
};

use super::{
    AcquiredImage, CommandBufferLevel, DescriptorResource, DescriptorWrite, GpuBackend, GpuBuffer,
    GpuCommandBuffer, GpuDescriptorSet, GpuDescriptorSetLayout, GpuFence, GpuFramebuffer,
    GpuImage, GpuRenderPass, GpuSampler, GpuSemaphore, GpuSurface, GpuSwapchain, Inheritance,
    RecordingSlot, RenderPassBegin, SubmitInfo, SubpassContents, SurfaceTarget, WaitStage,
};

/// Extent of a window surface until a test changes it.
const DEFAULT_SURFACE_EXTENT: Extent2d = Extent2d::new(800, 600);

// ============================================================================
// Recorded data
// ============================================================================

/// Allocation counter shared by every live dummy image and buffer.
#[derive(Debug)]
pub struct LiveToken(Arc<AtomicUsize>);

impl LiveToken {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for LiveToken {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A command recorded into a dummy command buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum DummyCommand {
    BeginRenderPass {
        render_pass: u64,
        framebuffer: u64,
        extent: Extent2d,
        clear_values: Vec<ClearValue>,
        contents: SubpassContents,
    },
    EndRenderPass,
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    /// Secondaries executed from a primary, in execution order.
    ExecuteCommands(Vec<RecordedCommands>),
}

/// Snapshot of a command buffer's contents.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCommands {
    pub id: u64,
    pub label: String,
    pub commands: Vec<DummyCommand>,
}

impl RecordedCommands {
    fn snapshot(cmd: &GpuCommandBuffer) -> Self {
        match cmd {
            GpuCommandBuffer::Dummy {
                id,
                label,
                commands,
                ..
            } => Self {
                id: *id,
                label: label.clone(),
                commands: commands.clone(),
            },
            #[cfg(feature = "vulkan-backend")]
            GpuCommandBuffer::Vulkan { .. } => Self {
                id: cmd.id(),
                label: String::new(),
                commands: Vec::new(),
            },
        }
    }

    /// Draw commands, including those executed through secondaries.
    pub fn draws(&self) -> Vec<&DummyCommand> {
        let mut draws = Vec::new();
        collect_draws(&self.commands, &mut draws);
        draws
    }
}

fn collect_draws<'a>(commands: &'a [DummyCommand], out: &mut Vec<&'a DummyCommand>) {
    for command in commands {
        match command {
            DummyCommand::Draw { .. } | DummyCommand::DrawIndexed { .. } => out.push(command),
            DummyCommand::ExecuteCommands(secondaries) => {
                for secondary in secondaries {
                    collect_draws(&secondary.commands, out);
                }
            }
            _ => {}
        }
    }
}

/// One logged queue submission.
#[derive(Debug, Clone)]
pub struct SubmitRecord {
    pub label: String,
    pub command_buffers: Vec<RecordedCommands>,
    pub wait_semaphores: Vec<u64>,
    /// Stage of each entry of `wait_semaphores`.
    pub wait_stages: Vec<WaitStage>,
    pub signal_semaphores: Vec<u64>,
    pub fence: Option<u64>,
}

/// One logged descriptor-set update: `(binding, resource id)` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorUpdateRecord {
    pub set: u64,
    pub writes: Vec<(u32, u64)>,
}

/// One logged present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentRecord {
    pub swapchain: u64,
    pub image_index: u32,
    pub wait_semaphores: Vec<u64>,
}

#[derive(Debug, Default)]
struct DummyLog {
    submissions: Vec<SubmitRecord>,
    framebuffers_created: usize,
    descriptor_updates: Vec<DescriptorUpdateRecord>,
    presents: Vec<PresentRecord>,
}

#[derive(Debug)]
struct DummySurfaceState {
    extent: Extent2d,
    out_of_date: bool,
    formats: Vec<TextureFormat>,
}

// ============================================================================
// Backend
// ============================================================================

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    next_id: AtomicU64,
    live: Arc<AtomicUsize>,
    log: Mutex<DummyLog>,
    surface: Mutex<DummySurfaceState>,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            live: Arc::new(AtomicUsize::new(0)),
            log: Mutex::new(DummyLog::default()),
            surface: Mutex::new(DummySurfaceState {
                extent: DEFAULT_SURFACE_EXTENT,
                out_of_date: false,
                formats: vec![TextureFormat::Bgra8Unorm, TextureFormat::Rgba8Unorm],
            }),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn record(cmd: &mut GpuCommandBuffer, command: DummyCommand) {
        if let GpuCommandBuffer::Dummy { commands, .. } = cmd {
            commands.push(command);
        }
    }

    // --- Inspection ---

    /// All submissions since creation or the last [`clear_log`](Self::clear_log).
    pub fn submissions(&self) -> Vec<SubmitRecord> {
        self.log.lock().submissions.clone()
    }

    /// Number of framebuffers created so far.
    pub fn framebuffer_count(&self) -> usize {
        self.log.lock().framebuffers_created
    }

    pub fn descriptor_updates(&self) -> Vec<DescriptorUpdateRecord> {
        self.log.lock().descriptor_updates.clone()
    }

    pub fn presents(&self) -> Vec<PresentRecord> {
        self.log.lock().presents.clone()
    }

    /// Forget everything logged so far. Allocation counts are kept.
    pub fn clear_log(&self) {
        *self.log.lock() = DummyLog::default();
    }

    // --- Virtual surface ---

    /// Resize the virtual surface. Presents become suboptimal until the
    /// swapchain is recreated.
    pub fn set_surface_extent(&self, extent: Extent2d) {
        self.surface.lock().extent = extent;
    }

    /// Make the next acquire fail with [`GraphicsError::SurfaceOutdated`].
    pub fn mark_surface_out_of_date(&self) {
        self.surface.lock().out_of_date = true;
    }

    /// Replace the formats reported for the surface.
    pub fn set_surface_formats(&self, formats: Vec<TextureFormat>) {
        self.surface.lock().formats = formats;
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<GpuImage, GraphicsError> {
        if descriptor.extent.is_degenerate() {
            return Err(GraphicsError::InvalidParameter(format!(
                "image {:?} has zero extent {}",
                descriptor.label, descriptor.extent
            )));
        }
        log::trace!(
            "DummyBackend: creating image {:?} ({}, {:?})",
            descriptor.label,
            descriptor.extent,
            descriptor.format
        );
        Ok(GpuImage::Dummy {
            id: self.next_id(),
            extent: descriptor.extent,
            format: descriptor.format,
            _live: LiveToken::new(&self.live),
        })
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        Ok(GpuBuffer::Dummy {
            id: self.next_id(),
            size: descriptor.size,
            _live: LiveToken::new(&self.live),
        })
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<GpuSampler, GraphicsError> {
        log::trace!("DummyBackend: creating sampler {:?}", descriptor.label);
        Ok(GpuSampler::Dummy { id: self.next_id() })
    }

    fn create_render_pass(&self, key: &RenderPassKey) -> Result<GpuRenderPass, GraphicsError> {
        log::trace!(
            "DummyBackend: creating render pass ({} attachments, present: {})",
            key.attachments.len(),
            key.present
        );
        Ok(GpuRenderPass::Dummy {
            id: self.next_id(),
            key: key.clone(),
        })
    }

    fn create_framebuffer(
        &self,
        render_pass: &GpuRenderPass,
        attachments: &[&GpuImage],
        extent: Extent2d,
    ) -> Result<GpuFramebuffer, GraphicsError> {
        if let GpuRenderPass::Dummy { key, .. } = render_pass {
            if key.attachments.len() != attachments.len() {
                return Err(GraphicsError::InvalidParameter(format!(
                    "render pass expects {} attachments, got {}",
                    key.attachments.len(),
                    attachments.len()
                )));
            }
        }
        log::trace!("DummyBackend: creating framebuffer {}", extent);
        self.log.lock().framebuffers_created += 1;
        Ok(GpuFramebuffer::Dummy {
            id: self.next_id(),
            extent,
            attachments: attachments.iter().map(|image| image.id()).collect(),
        })
    }

    fn create_semaphore(&self) -> Result<GpuSemaphore, GraphicsError> {
        Ok(GpuSemaphore::Dummy { id: self.next_id() })
    }

    fn create_fence(&self, signaled: bool) -> Result<GpuFence, GraphicsError> {
        Ok(GpuFence::Dummy {
            id: self.next_id(),
            signaled: AtomicBool::new(signaled),
        })
    }

    fn wait_fence(&self, fence: &GpuFence) -> Result<(), GraphicsError> {
        // Submission is synchronous, so an unsignaled fence would never signal.
        if self.is_fence_signaled(fence)? {
            Ok(())
        } else {
            Err(GraphicsError::Internal(format!(
                "waiting on fence {:#x} that was never submitted",
                fence.id()
            )))
        }
    }

    fn reset_fence(&self, fence: &GpuFence) -> Result<(), GraphicsError> {
        if let GpuFence::Dummy { signaled, .. } = fence {
            signaled.store(false, Ordering::Release);
        }
        Ok(())
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> Result<bool, GraphicsError> {
        match fence {
            GpuFence::Dummy { signaled, .. } => Ok(signaled.load(Ordering::Acquire)),
            #[cfg(feature = "vulkan-backend")]
            GpuFence::Vulkan { .. } => Ok(false),
        }
    }

    fn create_command_buffer(
        &self,
        level: CommandBufferLevel,
        slot: RecordingSlot,
        label: &str,
    ) -> Result<GpuCommandBuffer, GraphicsError> {
        log::trace!("DummyBackend: creating {level:?} command buffer '{label}' ({slot:?})");
        Ok(GpuCommandBuffer::Dummy {
            id: self.next_id(),
            label: label.to_string(),
            level,
            commands: Vec::new(),
        })
    }

    fn begin_command_buffer(
        &self,
        cmd: &mut GpuCommandBuffer,
        inheritance: Option<Inheritance<'_>>,
    ) -> Result<(), GraphicsError> {
        if let GpuCommandBuffer::Dummy {
            level, commands, ..
        } = cmd
        {
            if *level == CommandBufferLevel::Secondary && inheritance.is_none() {
                return Err(GraphicsError::InvalidParameter(
                    "secondary command buffer begun without inheritance".to_string(),
                ));
            }
            commands.clear();
        }
        Ok(())
    }

    fn end_command_buffer(&self, _cmd: &mut GpuCommandBuffer) -> Result<(), GraphicsError> {
        Ok(())
    }

    fn cmd_begin_render_pass(&self, cmd: &mut GpuCommandBuffer, begin: &RenderPassBegin<'_>) {
        Self::record(
            cmd,
            DummyCommand::BeginRenderPass {
                render_pass: begin.render_pass.id(),
                framebuffer: begin.framebuffer.id(),
                extent: begin.extent,
                clear_values: begin.clear_values.to_vec(),
                contents: begin.contents,
            },
        );
    }

    fn cmd_end_render_pass(&self, cmd: &mut GpuCommandBuffer) {
        Self::record(cmd, DummyCommand::EndRenderPass);
    }

    fn cmd_set_viewport(&self, cmd: &mut GpuCommandBuffer, viewport: &Viewport) {
        Self::record(cmd, DummyCommand::SetViewport(*viewport));
    }

    fn cmd_set_scissor(&self, cmd: &mut GpuCommandBuffer, scissor: &ScissorRect) {
        Self::record(cmd, DummyCommand::SetScissor(*scissor));
    }

    fn cmd_draw(
        &self,
        cmd: &mut GpuCommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        Self::record(
            cmd,
            DummyCommand::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            },
        );
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
        Self::record(
            cmd,
            DummyCommand::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            },
        );
    }

    fn cmd_dispatch(&self, cmd: &mut GpuCommandBuffer, x: u32, y: u32, z: u32) {
        Self::record(cmd, DummyCommand::Dispatch { x, y, z });
    }

    fn cmd_execute_commands(&self, cmd: &mut GpuCommandBuffer, secondaries: &[&GpuCommandBuffer]) {
        let recorded = secondaries
            .iter()
            .map(|secondary| RecordedCommands::snapshot(secondary))
            .collect();
        Self::record(cmd, DummyCommand::ExecuteCommands(recorded));
    }

    fn submit(&self, info: &SubmitInfo<'_>) -> Result<(), GraphicsError> {
        log::trace!(
            "DummyBackend: submit '{}' ({} command buffers, {} waits, {} signals)",
            info.label,
            info.command_buffers.len(),
            info.wait_semaphores.len(),
            info.signal_semaphores.len()
        );
        let record = SubmitRecord {
            label: info.label.to_string(),
            command_buffers: info
                .command_buffers
                .iter()
                .map(|cmd| RecordedCommands::snapshot(cmd))
                .collect(),
            wait_semaphores: info.wait_semaphores.iter().map(|(s, _)| s.id()).collect(),
            wait_stages: info.wait_semaphores.iter().map(|&(_, stage)| stage).collect(),
            signal_semaphores: info.signal_semaphores.iter().map(|s| s.id()).collect(),
            fence: info.fence.map(GpuFence::id),
        };
        self.log.lock().submissions.push(record);

        if let Some(GpuFence::Dummy { signaled, .. }) = info.fence {
            signaled.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        Ok(())
    }

    fn create_descriptor_set_layout(
        &self,
        layout: &BindingLayout,
    ) -> Result<GpuDescriptorSetLayout, GraphicsError> {
        log::trace!(
            "DummyBackend: creating descriptor set layout {:?} ({} bindings)",
            layout.label,
            layout.entries.len()
        );
        Ok(GpuDescriptorSetLayout::Dummy { id: self.next_id() })
    }

    fn allocate_descriptor_set(
        &self,
        _layout: &GpuDescriptorSetLayout,
    ) -> Result<GpuDescriptorSet, GraphicsError> {
        Ok(GpuDescriptorSet::Dummy { id: self.next_id() })
    }

    fn update_descriptor_set(&self, set: &GpuDescriptorSet, writes: &[DescriptorWrite<'_>]) {
        log::trace!(
            "DummyBackend: updating descriptor set {:#x} ({} writes)",
            set.id(),
            writes.len()
        );
        let writes = writes
            .iter()
            .map(|write| {
                let resource = match write.resource {
                    DescriptorResource::Image(image) => image.id(),
                    DescriptorResource::Sampler(sampler) => sampler.id(),
                    DescriptorResource::ImageSampler(image, _) => image.id(),
                    DescriptorResource::Buffer(buffer) => buffer.id(),
                };
                (write.binding, resource)
            })
            .collect();
        self.log
            .lock()
            .descriptor_updates
            .push(DescriptorUpdateRecord {
                set: set.id(),
                writes,
            });
    }

    fn create_surface(&self, target: &SurfaceTarget) -> Result<GpuSurface, GraphicsError> {
        if let SurfaceTarget::Headless(extent) = target {
            self.surface.lock().extent = *extent;
        }
        log::trace!("DummyBackend: creating surface");
        Ok(GpuSurface::Dummy { id: self.next_id() })
    }

    fn surface_formats(&self, _surface: &GpuSurface) -> Result<Vec<TextureFormat>, GraphicsError> {
        Ok(self.surface.lock().formats.clone())
    }

    fn surface_extent(&self, _surface: &GpuSurface) -> Result<Extent2d, GraphicsError> {
        Ok(self.surface.lock().extent)
    }

    fn create_swapchain(
        &self,
        _surface: &GpuSurface,
        config: &SurfaceConfiguration,
        _old: Option<&GpuSwapchain>,
    ) -> Result<(GpuSwapchain, Vec<GpuImage>), GraphicsError> {
        let extent = {
            let mut surface = self.surface.lock();
            if surface.extent.is_degenerate() {
                return Err(GraphicsError::SurfaceOutdated);
            }
            surface.out_of_date = false;
            surface.extent
        };
        let image_count = config.image_count.max(1);
        log::trace!(
            "DummyBackend: creating swapchain {} x{} ({:?})",
            extent,
            image_count,
            config.format
        );
        let images = (0..image_count)
            .map(|_| GpuImage::Dummy {
                id: self.next_id(),
                extent,
                format: config.format,
                _live: LiveToken::new(&self.live),
            })
            .collect();
        let swapchain = GpuSwapchain::Dummy {
            id: self.next_id(),
            image_count,
            extent,
            next_image: AtomicU32::new(0),
        };
        Ok((swapchain, images))
    }

    fn acquire_next_image(
        &self,
        swapchain: &GpuSwapchain,
        _signal: &GpuSemaphore,
    ) -> Result<AcquiredImage, GraphicsError> {
        let surface = self.surface.lock();
        if surface.out_of_date {
            return Err(GraphicsError::SurfaceOutdated);
        }
        match swapchain {
            GpuSwapchain::Dummy {
                image_count,
                extent,
                next_image,
                ..
            } => {
                let index = next_image.fetch_add(1, Ordering::Relaxed) % image_count;
                Ok(AcquiredImage {
                    index,
                    suboptimal: *extent != surface.extent,
                })
            }
            #[cfg(feature = "vulkan-backend")]
            GpuSwapchain::Vulkan { .. } => Err(GraphicsError::InvalidParameter(
                "Vulkan swapchain passed to the dummy backend".to_string(),
            )),
        }
    }

    fn present(
        &self,
        swapchain: &GpuSwapchain,
        image_index: u32,
        wait: &[&GpuSemaphore],
    ) -> Result<bool, GraphicsError> {
        let suboptimal = match swapchain {
            GpuSwapchain::Dummy { extent, .. } => *extent != self.surface.lock().extent,
            #[cfg(feature = "vulkan-backend")]
            GpuSwapchain::Vulkan { .. } => false,
        };
        self.log.lock().presents.push(PresentRecord {
            swapchain: swapchain.id(),
            image_index,
            wait_semaphores: wait.iter().map(|s| s.id()).collect(),
        });
        Ok(suboptimal)
    }

    fn outstanding_allocations(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextureUsage;

    fn image_descriptor() -> ImageDescriptor {
        ImageDescriptor::new_2d(
            Extent2d::new(4, 4),
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_ATTACHMENT,
        )
    }

    #[test]
    fn test_live_allocations_tracked() {
        let backend = DummyBackend::new();
        let image = backend.create_image(&image_descriptor()).unwrap();
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(16, crate::types::BufferUsage::UNIFORM))
            .unwrap();
        assert_eq!(backend.outstanding_allocations(), 2);
        drop(image);
        assert_eq!(backend.outstanding_allocations(), 1);
        drop(buffer);
        assert_eq!(backend.outstanding_allocations(), 0);
    }

    #[test]
    fn test_zero_extent_image_rejected() {
        let backend = DummyBackend::new();
        let desc = ImageDescriptor::new_2d(
            Extent2d::new(0, 4),
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_ATTACHMENT,
        );
        assert!(backend.create_image(&desc).is_err());
    }

    #[test]
    fn test_fence_signaled_by_submit() {
        let backend = DummyBackend::new();
        let fence = backend.create_fence(false).unwrap();
        assert!(!backend.is_fence_signaled(&fence).unwrap());
        assert!(backend.wait_fence(&fence).is_err());

        backend
            .submit(&SubmitInfo {
                label: "test",
                fence: Some(&fence),
                ..Default::default()
            })
            .unwrap();
        assert!(backend.is_fence_signaled(&fence).unwrap());
        backend.wait_fence(&fence).unwrap();
        backend.reset_fence(&fence).unwrap();
        assert!(!backend.is_fence_signaled(&fence).unwrap());
    }

    #[test]
    fn test_commands_recorded_and_snapshotted() {
        let backend = DummyBackend::new();
        let mut cmd = backend
            .create_command_buffer(CommandBufferLevel::Primary, RecordingSlot::Primary, "main")
            .unwrap();
        backend.begin_command_buffer(&mut cmd, None).unwrap();
        backend.cmd_draw(&mut cmd, 3, 1, 0, 0);
        backend.cmd_dispatch(&mut cmd, 8, 8, 1);
        backend.end_command_buffer(&mut cmd).unwrap();
        assert_eq!(cmd.recorded().len(), 2);

        backend
            .submit(&SubmitInfo {
                label: "main",
                command_buffers: vec![&cmd],
                ..Default::default()
            })
            .unwrap();
        let submissions = backend.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].command_buffers[0].label, "main");
        assert_eq!(submissions[0].command_buffers[0].draws().len(), 1);

        // Re-beginning resets the buffer.
        backend.begin_command_buffer(&mut cmd, None).unwrap();
        assert!(cmd.recorded().is_empty());
    }

    #[test]
    fn test_secondary_requires_inheritance() {
        let backend = DummyBackend::new();
        let mut cmd = backend
            .create_command_buffer(
                CommandBufferLevel::Secondary,
                RecordingSlot::Secondary(0),
                "worker",
            )
            .unwrap();
        assert!(backend.begin_command_buffer(&mut cmd, None).is_err());
    }

    #[test]
    fn test_out_of_date_surface() {
        let backend = DummyBackend::new();
        let surface = backend
            .create_surface(&SurfaceTarget::Headless(Extent2d::new(64, 64)))
            .unwrap();
        let config = SurfaceConfiguration::new(Extent2d::new(64, 64)).with_image_count(3);
        let (swapchain, images) = backend.create_swapchain(&surface, &config, None).unwrap();
        assert_eq!(images.len(), 3);
        let semaphore = backend.create_semaphore().unwrap();

        let first = backend.acquire_next_image(&swapchain, &semaphore).unwrap();
        assert_eq!(first.index, 0);
        assert!(!first.suboptimal);

        backend.set_surface_extent(Extent2d::new(32, 32));
        assert!(backend.present(&swapchain, 0, &[]).unwrap());

        backend.mark_surface_out_of_date();
        assert_eq!(
            backend.acquire_next_image(&swapchain, &semaphore),
            Err(GraphicsError::SurfaceOutdated)
        );
    }

    #[test]
    fn test_zero_extent_surface_has_no_swapchain() {
        let backend = DummyBackend::new();
        let surface = backend
            .create_surface(&SurfaceTarget::Headless(Extent2d::new(64, 64)))
            .unwrap();
        backend.set_surface_extent(Extent2d::new(0, 0));
        let config = SurfaceConfiguration::new(Extent2d::new(64, 64));
        assert!(matches!(
            backend.create_swapchain(&surface, &config, None),
            Err(GraphicsError::SurfaceOutdated)
        ));
        assert_eq!(backend.outstanding_allocations(), 0);
    }
}
