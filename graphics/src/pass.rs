//! The application-facing pass contract.
//!
//! Every node of the graph is recorded by a [`RenderPass`] strategy object.
//! The frame graph calls it at fixed points of the frame:
//!
//! | Callback | When | Thread |
//! |----------|------|--------|
//! | [`init`](RenderPass::init) | once, after the whole instance tree exists | frame |
//! | [`on_create_framebuffer`](RenderPass::on_create_framebuffer) | after this pass or a dependency got new images | frame |
//! | [`pre_draw`](RenderPass::pre_draw) | before the primary buffer begins | frame |
//! | [`draw`](RenderPass::draw) | inside the render pass, once per recording thread | frame or worker |
//! | [`pre_submit`](RenderPass::pre_submit) | after recording, before submission | frame |
//!
//! Frame-thread callbacks get a [`PassContext`] borrowing the live instance
//! tree. `draw` may run on job-system workers and gets an owned
//! [`DrawContext`] snapshot instead.

use std::sync::Arc;

use slotmap::SlotMap;

use crate::device::{CommandBuffer, Framebuffer, GraphicsDevice, Image, RenderPassObject};
use crate::error::GraphicsError;
use crate::graph::RenderNode;
use crate::instance::{FrameIndices, PassId, PassInstance, PassKind};
use crate::types::{Extent2d, ScissorRect, Viewport};

/// Strategy object recording one pass.
///
/// Only [`draw`](RenderPass::draw) is required. Returning
/// `record_threads() > 1` records `draw` in parallel into secondary command
/// buffers, one per thread index; they are executed in ascending index
/// order whatever order the workers finish in.
pub trait RenderPass: Send + Sync {
    /// Called once after the instance tree is built. Dependencies and parents
    /// can be queried, images do not exist yet.
    fn init(&mut self, ctx: &PassContext<'_>) -> Result<(), GraphicsError> {
        let _ = ctx;
        Ok(())
    }

    /// Called when the images of this pass or of one of its dependencies were
    /// (re)created. Rebind descriptor sets here.
    fn on_create_framebuffer(&mut self, ctx: &PassContext<'_>) -> Result<(), GraphicsError> {
        let _ = ctx;
        Ok(())
    }

    fn pre_draw(&mut self, ctx: &PassContext<'_>) -> Result<(), GraphicsError> {
        let _ = ctx;
        Ok(())
    }

    /// Record the pass. `thread_index` is in `0..record_threads()`.
    fn draw(
        &self,
        ctx: &DrawContext,
        cmd: &mut CommandBuffer,
        thread_index: usize,
    ) -> Result<(), GraphicsError>;

    fn pre_submit(&mut self, ctx: &PassContext<'_>) -> Result<(), GraphicsError> {
        let _ = ctx;
        Ok(())
    }

    /// Number of threads recording this pass. 0 and 1 record inline.
    fn record_threads(&self) -> usize {
        1
    }
}

/// Pass that records nothing. Used for nodes without a strategy factory.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyPass;

impl RenderPass for EmptyPass {
    fn draw(&self, _: &DrawContext, _: &mut CommandBuffer, _: usize) -> Result<(), GraphicsError> {
        Ok(())
    }
}

// ============================================================================
// PassView
// ============================================================================

/// Read-only view of a live pass instance.
#[derive(Clone, Copy)]
pub struct PassView<'a> {
    id: PassId,
    instance: &'a PassInstance,
}

impl<'a> PassView<'a> {
    pub(crate) fn new(id: PassId, instance: &'a PassInstance) -> Self {
        Self { id, instance }
    }

    pub fn id(&self) -> PassId {
        self.id
    }

    pub fn name(&self) -> &'a str {
        self.instance.name()
    }

    pub fn kind(&self) -> PassKind {
        self.instance.kind()
    }

    pub fn definition(&self) -> &'a RenderNode {
        self.instance.definition()
    }

    /// Current resolution. Zero before the first resize.
    pub fn resolution(&self) -> Extent2d {
        self.instance.resolution()
    }

    /// Offscreen attachment image by name. Frame-buffered, pick the copy
    /// with [`Image::raw`]. Swapchain images are not listed.
    pub fn attachment(&self, name: &str) -> Option<&'a Arc<Image>> {
        self.instance.attachment(name)
    }

    pub fn attachments(&self) -> impl Iterator<Item = (&'a str, &'a Arc<Image>)> {
        self.instance.attachments()
    }

    pub fn render_pass(&self) -> Option<&'a Arc<RenderPassObject>> {
        self.instance.render_pass()
    }
}

impl std::fmt::Debug for PassView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassView")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("resolution", &self.resolution())
            .finish()
    }
}

// ============================================================================
// PassContext
// ============================================================================

/// Frame-thread context handed to the mutable [`RenderPass`] callbacks.
pub struct PassContext<'a> {
    pub(crate) instances: &'a SlotMap<PassId, PassInstance>,
    pub(crate) id: PassId,
    pub(crate) device: &'a Arc<GraphicsDevice>,
    pub(crate) frame: Option<FrameIndices>,
}

impl<'a> PassContext<'a> {
    fn this(&self) -> &'a PassInstance {
        // The executor only builds contexts for live ids.
        &self.instances[self.id]
    }

    /// The pass this context belongs to.
    pub fn pass(&self) -> PassView<'a> {
        PassView::new(self.id, self.this())
    }

    pub fn name(&self) -> &'a str {
        self.this().name()
    }

    pub fn definition(&self) -> &'a RenderNode {
        self.this().definition()
    }

    pub fn device(&self) -> &'a Arc<GraphicsDevice> {
        self.device
    }

    pub fn resolution(&self) -> Extent2d {
        self.this().resolution()
    }

    /// Viewport size the tree was last resized with.
    pub fn viewport(&self) -> Extent2d {
        self.this().viewport()
    }

    pub fn attachment(&self, name: &str) -> Option<&'a Arc<Image>> {
        self.this().attachment(name)
    }

    /// Frame being recorded. `None` outside of frame recording.
    pub fn frame(&self) -> Option<FrameIndices> {
        self.frame
    }

    /// Direct dependency by generic name.
    pub fn dependency(&self, name: &str) -> Option<PassView<'a>> {
        self.this()
            .dependency_ids()
            .iter()
            .filter_map(|&id| self.view(id))
            .find(|view| view.name() == name)
    }

    pub fn dependencies(&self) -> Vec<PassView<'a>> {
        self.this()
            .dependency_ids()
            .iter()
            .filter_map(|&id| self.view(id))
            .collect()
    }

    /// Passes that depend on this one. Empty for the root.
    pub fn parents(&self) -> Vec<PassView<'a>> {
        self.this()
            .parent_ids()
            .iter()
            .filter_map(|&id| self.view(id))
            .collect()
    }

    /// Any live pass by generic name, custom passes included.
    pub fn find_pass(&self, name: &str) -> Option<PassView<'a>> {
        self.instances
            .iter()
            .find(|(_, instance)| instance.name() == name)
            .map(|(id, instance)| PassView::new(id, instance))
    }

    fn view(&self, id: PassId) -> Option<PassView<'a>> {
        self.instances
            .get(id)
            .map(|instance| PassView::new(id, instance))
    }
}

// ============================================================================
// DrawContext
// ============================================================================

/// Owned snapshot of everything [`RenderPass::draw`] may need.
///
/// Cloned into every recording job, so it only holds shared handles.
#[derive(Debug, Clone)]
pub struct DrawContext {
    pub(crate) name: String,
    pub(crate) kind: PassKind,
    pub(crate) frame: FrameIndices,
    pub(crate) resolution: Extent2d,
    pub(crate) attachments: Vec<(String, Arc<Image>)>,
    pub(crate) render_pass: Option<Arc<RenderPassObject>>,
    pub(crate) framebuffer: Option<Arc<Framebuffer>>,
    pub(crate) reversed_log_z: bool,
    pub(crate) flip_culling: bool,
    pub(crate) with_imgui: bool,
}

impl DrawContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PassKind {
        self.kind
    }

    pub fn frame(&self) -> FrameIndices {
        self.frame
    }

    pub fn resolution(&self) -> Extent2d {
        self.resolution
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::from_extent(self.resolution)
    }

    pub fn scissor(&self) -> ScissorRect {
        ScissorRect::from_extent(self.resolution)
    }

    /// Attachment image written this frame. For the present pass this is the
    /// acquired swapchain image.
    pub fn attachment(&self, name: &str) -> Option<&Arc<Image>> {
        self.attachments
            .iter()
            .find(|(attachment, _)| attachment == name)
            .map(|(_, image)| image)
    }

    pub fn render_pass(&self) -> Option<&Arc<RenderPassObject>> {
        self.render_pass.as_ref()
    }

    pub fn framebuffer(&self) -> Option<&Arc<Framebuffer>> {
        self.framebuffer.as_ref()
    }

    pub fn is_reversed_log_z(&self) -> bool {
        self.reversed_log_z
    }

    pub fn is_flip_culling(&self) -> bool {
        self.flip_culling
    }

    pub fn has_imgui(&self) -> bool {
        self.with_imgui
    }
}

static_assertions::assert_impl_all!(DrawContext: Send, Sync);
static_assertions::assert_obj_safe!(RenderPass);
