//! Per-frame recording and submission.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use redgraph_core::profiling::profile_scope;

use crate::backend::{
    CommandBufferLevel, GpuSemaphore, Inheritance, RecordingSlot, RenderPassBegin, SubmitInfo,
    SubpassContents, WaitStage,
};
use crate::device::{CommandBuffer, Framebuffer, RenderPassObject, Semaphore};
use crate::error::GraphicsError;
use crate::graph::Attachment;
use crate::pass::{DrawContext, RenderPass};
use crate::types::ClearValue;

use super::frame_graph::{FrameGraph, FrameIndices, lookup, lookup_mut};
use super::pass_instance::{FrameCommandBuffers, PassId, PassInstance, PassKind, PassState};

type SharedStrategy = Arc<RwLock<Box<dyn RenderPass>>>;

impl FrameGraph {
    /// Record and submit `id` after its dependencies.
    ///
    /// Runs at most once per frame: the `prepared` flag is cleared by
    /// [`reset_for_next_frame`](FrameGraph::reset_for_next_frame).
    pub fn render(&mut self, id: PassId, frame: FrameIndices) -> Result<(), GraphicsError> {
        let instance = lookup_mut(&mut self.instances, id)?;
        if instance.prepared {
            return Ok(());
        }
        instance.prepared = true;
        instance.state = PassState::Prepared;

        let dependencies = instance.dependencies.clone();
        for dependency in dependencies {
            self.render(dependency, frame)?;
        }
        self.render_internal(id, frame)
    }

    fn render_internal(&mut self, id: PassId, frame: FrameIndices) -> Result<(), GraphicsError> {
        profile_scope!("render_pass");
        self.with_strategy(id, Some(frame), |strategy, ctx| strategy.pre_draw(ctx))?;

        let slot = frame.device_image % self.device.image_count();
        let mut buffers =
            std::mem::take(&mut lookup_mut(&mut self.instances, id)?.command_buffers[slot]);
        let result = self
            .record(id, frame, &mut buffers)
            .and_then(|()| self.with_strategy(id, Some(frame), |strategy, ctx| strategy.pre_submit(ctx)))
            .and_then(|()| self.submit(id, frame, &buffers));

        let instance = lookup_mut(&mut self.instances, id)?;
        instance.command_buffers[slot] = buffers;
        result?;
        instance.state = PassState::Submitted;
        Ok(())
    }

    fn record(
        &self,
        id: PassId,
        frame: FrameIndices,
        buffers: &mut FrameCommandBuffers,
    ) -> Result<(), GraphicsError> {
        let instance = lookup(&self.instances, id)?;
        let ctx = draw_context(instance, frame)?;

        let primary = match buffers.primary.take() {
            Some(primary) => primary,
            None => self.device.create_command_buffer(
                CommandBufferLevel::Primary,
                RecordingSlot::Primary,
                instance.name(),
            )?,
        };
        let primary = buffers.primary.insert(primary);
        primary.begin()?;

        let strategy = Arc::clone(&instance.strategy);
        if instance.kind == PassKind::Compute {
            strategy.read().draw(&ctx, primary, 0)?;
            return primary.end();
        }

        let (Some(render_pass), Some(framebuffer)) = (&ctx.render_pass, &ctx.framebuffer) else {
            return Err(GraphicsError::Internal(format!(
                "pass '{}' recorded without a framebuffer",
                instance.name()
            )));
        };
        let clear_values: Vec<ClearValue> = instance
            .definition
            .attachments()
            .iter()
            .map(Attachment::clear_value)
            .collect();
        let threads = strategy.read().record_threads();
        let parallel = threads > 1;

        primary.begin_render_pass(&RenderPassBegin {
            render_pass: render_pass.raw(),
            framebuffer: framebuffer.raw(),
            extent: ctx.resolution,
            clear_values: &clear_values,
            contents: if parallel {
                SubpassContents::SecondaryCommandBuffers
            } else {
                SubpassContents::Inline
            },
        });

        if parallel {
            self.record_parallel(&ctx, &strategy, threads, &mut buffers.secondaries)?;
            let secondaries: Vec<&CommandBuffer> = buffers
                .secondaries
                .range(..threads)
                .map(|(_, cmd)| cmd)
                .collect();
            primary.execute_commands(&secondaries);
        } else {
            primary.set_viewport(&ctx.viewport());
            primary.set_scissor(&ctx.scissor());
            strategy.read().draw(&ctx, primary, 0)?;
        }

        primary.end_render_pass();
        primary.end()
    }

    /// Record `threads` secondaries on the job system and wait for all of
    /// them. Buffers are stored back under their thread index.
    fn record_parallel(
        &self,
        ctx: &DrawContext,
        strategy: &SharedStrategy,
        threads: usize,
        secondaries: &mut BTreeMap<usize, CommandBuffer>,
    ) -> Result<(), GraphicsError> {
        profile_scope!("record_parallel");
        let (Some(render_pass), Some(framebuffer)) = (&ctx.render_pass, &ctx.framebuffer) else {
            return Err(GraphicsError::Internal(format!(
                "pass '{}' recorded without a framebuffer",
                ctx.name
            )));
        };

        let mut commands = Vec::with_capacity(threads);
        for thread_index in 0..threads {
            let cmd = match secondaries.remove(&thread_index) {
                Some(cmd) => cmd,
                None => self.device.create_command_buffer(
                    CommandBufferLevel::Secondary,
                    RecordingSlot::Secondary(thread_index),
                    &format!("{}[{}]", ctx.name, thread_index),
                )?,
            };
            commands.push(cmd);
        }

        let handles: Vec<_> = commands
            .into_iter()
            .enumerate()
            .map(|(thread_index, mut cmd)| {
                let ctx = ctx.clone();
                let strategy = Arc::clone(strategy);
                let render_pass = Arc::clone(render_pass);
                let framebuffer = Arc::clone(framebuffer);
                self.jobs.schedule_in(&self.recording, move || {
                    let result = record_secondary(
                        &mut cmd,
                        &ctx,
                        &strategy,
                        &render_pass,
                        &framebuffer,
                        thread_index,
                    );
                    (cmd, result)
                })
            })
            .collect();

        let mut first_error = None;
        for (thread_index, handle) in handles.into_iter().enumerate() {
            let (cmd, result) = handle.wait();
            secondaries.insert(thread_index, cmd);
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn submit(
        &self,
        id: PassId,
        frame: FrameIndices,
        buffers: &FrameCommandBuffers,
    ) -> Result<(), GraphicsError> {
        let instance = lookup(&self.instances, id)?;
        let slot = frame.device_image % self.device.image_count();
        let primary = buffers.primary.as_ref().ok_or_else(|| {
            GraphicsError::Internal(format!("pass '{}' has no primary buffer", instance.name()))
        })?;

        // Parents may sample or store to a dependency's images from any
        // shader stage, so edge waits cover every command.
        let mut wait_semaphores = Vec::with_capacity(instance.dependencies.len() + 1);
        for &dependency in &instance.dependencies {
            let dependency = lookup(&self.instances, dependency)?;
            let semaphore = dependency.finished[slot].get(&id).ok_or_else(|| {
                GraphicsError::Internal(format!(
                    "no semaphore for edge '{}' -> '{}'",
                    dependency.name(),
                    instance.name()
                ))
            })?;
            wait_semaphores.push((semaphore.raw(), WaitStage::AllCommands));
        }
        let mut signal_semaphores: Vec<&GpuSemaphore> =
            instance.finished[slot].values().map(Semaphore::raw).collect();

        let mut fence = None;
        if id == self.root {
            let (in_flight, acquire, present) = self.root_sync(slot);
            if instance.kind == PassKind::Present {
                wait_semaphores.push((acquire.raw(), WaitStage::ColorAttachmentOutput));
                signal_semaphores.push(present.raw());
            }
            fence = Some(in_flight.raw());
        }

        self.device.submit(&SubmitInfo {
            label: instance.name(),
            command_buffers: vec![primary.raw()],
            wait_semaphores,
            signal_semaphores,
            fence,
        })
    }
}

fn record_secondary(
    cmd: &mut CommandBuffer,
    ctx: &DrawContext,
    strategy: &SharedStrategy,
    render_pass: &RenderPassObject,
    framebuffer: &Framebuffer,
    thread_index: usize,
) -> Result<(), GraphicsError> {
    profile_scope!("record_secondary");
    cmd.begin_secondary(Inheritance {
        render_pass: render_pass.raw(),
        framebuffer: framebuffer.raw(),
    })?;
    cmd.set_viewport(&ctx.viewport());
    cmd.set_scissor(&ctx.scissor());
    strategy.read().draw(ctx, cmd, thread_index)?;
    cmd.end()
}

/// Snapshot of `instance` for recording `frame`.
fn draw_context(instance: &PassInstance, frame: FrameIndices) -> Result<DrawContext, GraphicsError> {
    let resources = instance.frame_resources.as_ref().ok_or_else(|| {
        GraphicsError::Internal(format!("pass '{}' rendered before it was sized", instance.name()))
    })?;

    let (framebuffer, attachments) = match instance.kind {
        PassKind::Present => {
            let swapchain = resources.swapchain.as_ref().ok_or_else(|| {
                GraphicsError::Internal("present pass has no swapchain".to_string())
            })?;
            let image = swapchain.image(frame.swapchain_image).ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "swapchain image {} out of range ({})",
                    frame.swapchain_image,
                    swapchain.image_count()
                ))
            })?;
            let name = instance
                .definition
                .attachments()
                .first()
                .map_or("present", Attachment::name);
            (
                resources.framebuffers.get(frame.swapchain_image).cloned(),
                vec![(name.to_string(), Arc::clone(image))],
            )
        }
        PassKind::Graphics => (
            resources.framebuffers.get(frame.device_image).cloned(),
            resources.attachments.clone(),
        ),
        PassKind::Compute => (None, resources.attachments.clone()),
    };

    Ok(DrawContext {
        name: instance.name().to_string(),
        kind: instance.kind,
        frame,
        resolution: instance.resolution,
        attachments,
        render_pass: instance.render_pass.clone(),
        framebuffer,
        reversed_log_z: instance.definition.is_reversed_log_z(),
        flip_culling: instance.definition.is_flip_culling(),
        with_imgui: instance.definition.has_imgui(),
    })
}
