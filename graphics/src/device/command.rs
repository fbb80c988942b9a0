//! Command buffer wrapper.

use std::sync::Arc;

use crate::backend::{
    CommandBufferLevel, GpuBackend, GpuCommandBuffer, Inheritance, RenderPassBegin,
};
use crate::error::GraphicsError;
use crate::types::{ScissorRect, Viewport};

/// A primary or secondary command buffer.
///
/// Recording methods forward to the backend; API failures surface from
/// [`end`](CommandBuffer::end) or from submission. Secondaries are moved to
/// worker threads for parallel recording, so the type is `Send`.
pub struct CommandBuffer {
    backend: Arc<dyn GpuBackend>,
    raw: GpuCommandBuffer,
    label: String,
}

impl CommandBuffer {
    pub(crate) fn new(backend: Arc<dyn GpuBackend>, raw: GpuCommandBuffer, label: &str) -> Self {
        Self {
            backend,
            raw,
            label: label.to_string(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn level(&self) -> CommandBufferLevel {
        self.raw.level()
    }

    pub fn raw(&self) -> &GpuCommandBuffer {
        &self.raw
    }

    /// Reset and begin a primary buffer.
    pub fn begin(&mut self) -> Result<(), GraphicsError> {
        self.backend.begin_command_buffer(&mut self.raw, None)
    }

    /// Reset and begin a secondary buffer continuing `inheritance`.
    pub fn begin_secondary(&mut self, inheritance: Inheritance<'_>) -> Result<(), GraphicsError> {
        self.backend
            .begin_command_buffer(&mut self.raw, Some(inheritance))
    }

    pub fn end(&mut self) -> Result<(), GraphicsError> {
        self.backend.end_command_buffer(&mut self.raw)
    }

    pub fn begin_render_pass(&mut self, begin: &RenderPassBegin<'_>) {
        self.backend.cmd_begin_render_pass(&mut self.raw, begin);
    }

    pub fn end_render_pass(&mut self) {
        self.backend.cmd_end_render_pass(&mut self.raw);
    }

    pub fn set_viewport(&mut self, viewport: &Viewport) {
        self.backend.cmd_set_viewport(&mut self.raw, viewport);
    }

    pub fn set_scissor(&mut self, scissor: &ScissorRect) {
        self.backend.cmd_set_scissor(&mut self.raw, scissor);
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.backend.cmd_draw(
            &mut self.raw,
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        );
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.backend.cmd_draw_indexed(
            &mut self.raw,
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        );
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.backend.cmd_dispatch(&mut self.raw, x, y, z);
    }

    /// Execute `secondaries` in slice order.
    pub fn execute_commands(&mut self, secondaries: &[&CommandBuffer]) {
        let raw: Vec<&GpuCommandBuffer> = secondaries.iter().map(|cmd| &cmd.raw).collect();
        self.backend.cmd_execute_commands(&mut self.raw, &raw);
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("label", &self.label)
            .field("raw", &self.raw)
            .finish()
    }
}

static_assertions::assert_impl_all!(CommandBuffer: Send, Sync);
