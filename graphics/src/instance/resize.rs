//! Top-down resize and the staged swap at frame start.
//!
//! Resolutions flow from the root to the leaves: each pass maps its parent's
//! resolution through its resize callback and hands the result to its
//! dependencies. The first build of a pass installs its images directly.
//! Later builds are staged in `next_frame_resources` because in-flight frames
//! may still read the current ones; [`FrameGraph::reset_for_next_frame`]
//! swaps them in and retires the old set through deferred destruction.

use std::collections::HashSet;

use redgraph_core::profiling::profile_scope;

use crate::backend::GpuImage;
use crate::error::GraphicsError;
use crate::graph::GraphError;
use crate::types::{Extent2d, ImageDescriptor, TextureUsage};

use super::frame_graph::{FrameGraph, lookup, lookup_mut};
use super::pass_instance::{FrameResources, PassId, PassKind, PassState};

impl FrameGraph {
    /// Size `id` and its dependencies for `parent_resolution`.
    ///
    /// Unchanged resolutions are a no-op unless `force` is set. `force`
    /// applies to `id` only; dependencies rebuild when their own resolution
    /// changes.
    pub fn create_or_resize(
        &mut self,
        id: PassId,
        viewport: Extent2d,
        parent_resolution: Extent2d,
        force: bool,
    ) -> Result<(), GraphicsError> {
        let instance = lookup_mut(&mut self.instances, id)?;
        let desired = match instance.kind {
            PassKind::Present => viewport,
            _ => instance.definition.desired_resolution(parent_resolution),
        };
        let resolution = if desired.is_degenerate() {
            log::error!(
                "Pass '{}' resolved to {} for parent {}, clamping to {}",
                instance.name(),
                desired,
                parent_resolution,
                desired.clamped()
            );
            desired.clamped()
        } else {
            desired
        };
        instance.viewport = viewport;

        let dependencies = instance.dependencies.clone();
        for dependency in dependencies {
            self.create_or_resize(dependency, viewport, resolution, false)?;
        }

        let instance = lookup(&self.instances, id)?;
        if !force && instance.pending_resolution() == Some(resolution) {
            return Ok(());
        }

        let resources = self.build_resources(id, resolution)?;
        let instance = lookup_mut(&mut self.instances, id)?;
        if instance.frame_resources.is_none() {
            instance.resolution = resolution;
            instance.frame_resources = Some(resources);
            instance.state = PassState::Sized;
            log::debug!("Pass '{}': created resources at {}", instance.name(), resolution);
            self.with_strategy(id, None, |strategy, ctx| {
                strategy.on_create_framebuffer(ctx)
            })
        } else {
            log::debug!(
                "Pass '{}': staged resize {} -> {}",
                instance.name(),
                instance.resolution,
                resolution
            );
            if let Some(replaced) = instance.next_frame_resources.replace(resources) {
                self.device.drop_resource(replaced);
            }
            Ok(())
        }
    }

    /// Prepare the tree for recording a new frame.
    ///
    /// Clears the per-frame `prepared` flags and swaps staged resources in,
    /// after this graph's recording jobs have finished. A pass whose
    /// resources or whose dependency's resources were swapped gets
    /// `on_create_framebuffer`.
    pub fn reset_for_next_frame(&mut self) -> Result<(), GraphicsError> {
        profile_scope!("reset_for_next_frame");
        if self
            .instances
            .values()
            .any(|instance| instance.next_frame_resources.is_some())
        {
            self.recording.wait();
        }

        let mut swapped = HashSet::new();
        for id in self.postorder() {
            let instance = lookup_mut(&mut self.instances, id)?;
            instance.prepared = false;
            if instance.state != PassState::Uninitialized {
                instance.state = PassState::Sized;
            }

            let mut rebind = instance
                .dependencies
                .iter()
                .any(|dependency| swapped.contains(dependency));
            if let Some(staged) = instance.next_frame_resources.take() {
                log::debug!(
                    "Pass '{}': swapping in {} resources",
                    instance.name(),
                    staged.resolution
                );
                instance.resolution = staged.resolution;
                if let Some(old) = instance.frame_resources.replace(staged) {
                    self.device.drop_resource(old);
                }
                swapped.insert(id);
                rebind = true;
            }

            if rebind {
                self.with_strategy(id, None, |strategy, ctx| {
                    strategy.on_create_framebuffer(ctx)
                })?;
            }
        }
        Ok(())
    }

    fn build_resources(
        &self,
        id: PassId,
        resolution: Extent2d,
    ) -> Result<FrameResources, GraphicsError> {
        profile_scope!("build_resources");
        let instance = lookup(&self.instances, id)?;
        let image_count = self.device.image_count();

        if instance.kind == PassKind::Present {
            let surface = self.surface.as_ref().ok_or_else(|| {
                GraphicsError::Internal("present pass without a surface".to_string())
            })?;
            let render_pass = instance.render_pass.as_ref().ok_or_else(|| {
                GraphicsError::Internal(format!("pass '{}' has no render pass", instance.name()))
            })?;
            let config = surface
                .config
                .clone()
                .with_extent(resolution)
                .with_image_count(image_count as u32 + 1);
            let old = instance
                .next_frame_resources
                .as_ref()
                .and_then(|resources| resources.swapchain.as_ref())
                .or(instance.swapchain());
            let swapchain = self
                .device
                .create_swapchain(&surface.surface, &config, old)?;
            let framebuffers = swapchain
                .images()
                .iter()
                .map(|image| {
                    self.device
                        .create_framebuffer(render_pass, &[image.raw(0)], resolution)
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(FrameResources {
                resolution,
                attachments: Vec::new(),
                framebuffers,
                swapchain: Some(swapchain),
            });
        }

        let usage = match instance.kind {
            PassKind::Compute => TextureUsage::STORAGE_BINDING | TextureUsage::TEXTURE_BINDING,
            _ => TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        };
        let mut attachments = Vec::with_capacity(instance.definition.attachments().len());
        for attachment in instance.definition.attachments() {
            let format = attachment.format().ok_or_else(|| {
                GraphicsError::Graph(GraphError::UnresolvedAttachmentFormat {
                    pass: instance.name().to_string(),
                    attachment: attachment.name().to_string(),
                })
            })?;
            let image = self.device.create_image(
                &ImageDescriptor::new_2d(resolution, format, usage)
                    .with_label(format!("{}.{}", instance.name(), attachment.name()))
                    .with_copies(image_count),
            )?;
            attachments.push((attachment.name().to_string(), image));
        }

        let mut framebuffers = Vec::new();
        if let (PassKind::Graphics, Some(render_pass)) = (instance.kind, &instance.render_pass) {
            for slot in 0..image_count {
                let views: Vec<&GpuImage> = attachments
                    .iter()
                    .map(|(_, image)| image.raw(slot))
                    .collect();
                framebuffers.push(self.device.create_framebuffer(render_pass, &views, resolution)?);
            }
        }

        Ok(FrameResources {
            resolution,
            attachments,
            framebuffers,
            swapchain: None,
        })
    }
}
