//! Live pass instances.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::device::{CommandBuffer, Framebuffer, Image, RenderPassObject, Semaphore};
use crate::graph::{RenderNode, RenderPassRef};
use crate::pass::RenderPass;
use crate::surface::Swapchain;
use crate::types::Extent2d;

slotmap::new_key_type! {
    /// Key of a pass instance inside a [`FrameGraph`](super::FrameGraph).
    pub struct PassId;
}

/// What a pass instance records into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Offscreen render pass with frame-buffered attachments.
    Graphics,
    /// Dispatches outside a render pass. Attachments are storage images.
    Compute,
    /// Root pass rendering into the swapchain.
    Present,
}

/// Lifecycle of an instance within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassState {
    /// Built but never sized.
    Uninitialized,
    /// Has images and framebuffers.
    Sized,
    /// Picked up by the current frame's render walk.
    Prepared,
    /// Command buffer of the current frame submitted.
    Submitted,
}

/// Images and framebuffers of one resolution.
pub(crate) struct FrameResources {
    pub(crate) resolution: Extent2d,
    /// Offscreen attachments, each with one copy per frame in flight.
    pub(crate) attachments: Vec<(String, Arc<Image>)>,
    /// Per frame slot, or per swapchain image for the present pass.
    pub(crate) framebuffers: Vec<Arc<Framebuffer>>,
    pub(crate) swapchain: Option<Swapchain>,
}

/// Command buffers of one frame slot, reused every `image_count` frames.
#[derive(Default)]
pub(crate) struct FrameCommandBuffers {
    pub(crate) primary: Option<CommandBuffer>,
    /// Keyed by recording thread index.
    pub(crate) secondaries: BTreeMap<usize, CommandBuffer>,
}

/// Live counterpart of a [`RenderNode`].
///
/// Holds ids of its dependencies and back-references to its parents; the
/// [`FrameGraph`](super::FrameGraph) arena owns every instance.
pub struct PassInstance {
    pub(crate) definition: RenderNode,
    pub(crate) kind: PassKind,
    pub(crate) state: PassState,
    pub(crate) prepared: bool,
    pub(crate) resolution: Extent2d,
    pub(crate) viewport: Extent2d,
    pub(crate) dependencies: Vec<PassId>,
    pub(crate) parents: Vec<PassId>,
    pub(crate) render_pass: Option<Arc<RenderPassObject>>,
    pub(crate) frame_resources: Option<FrameResources>,
    pub(crate) next_frame_resources: Option<FrameResources>,
    pub(crate) command_buffers: Vec<FrameCommandBuffers>,
    /// Per frame slot, the semaphore signalled towards each parent.
    pub(crate) finished: Vec<BTreeMap<PassId, Semaphore>>,
    pub(crate) strategy: Arc<RwLock<Box<dyn RenderPass>>>,
    pub(crate) custom: bool,
}

impl PassInstance {
    pub(crate) fn new(
        definition: RenderNode,
        kind: PassKind,
        render_pass: Option<Arc<RenderPassObject>>,
        image_count: usize,
    ) -> Self {
        let strategy = definition.create_strategy();
        Self {
            definition,
            kind,
            state: PassState::Uninitialized,
            prepared: false,
            resolution: Extent2d::default(),
            viewport: Extent2d::default(),
            dependencies: Vec::new(),
            parents: Vec::new(),
            render_pass,
            frame_resources: None,
            next_frame_resources: None,
            command_buffers: (0..image_count).map(|_| FrameCommandBuffers::default()).collect(),
            finished: (0..image_count).map(|_| BTreeMap::new()).collect(),
            strategy: Arc::new(RwLock::new(strategy)),
            custom: false,
        }
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn pass_ref(&self) -> &RenderPassRef {
        self.definition.pass_ref()
    }

    pub fn definition(&self) -> &RenderNode {
        &self.definition
    }

    pub fn kind(&self) -> PassKind {
        self.kind
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Whether this pass was attached at runtime.
    pub fn is_custom(&self) -> bool {
        self.custom
    }

    pub fn resolution(&self) -> Extent2d {
        self.resolution
    }

    pub fn viewport(&self) -> Extent2d {
        self.viewport
    }

    pub fn dependency_ids(&self) -> &[PassId] {
        &self.dependencies
    }

    pub fn parent_ids(&self) -> &[PassId] {
        &self.parents
    }

    pub fn render_pass(&self) -> Option<&Arc<RenderPassObject>> {
        self.render_pass.as_ref()
    }

    pub fn attachment(&self, name: &str) -> Option<&Arc<Image>> {
        self.frame_resources.as_ref().and_then(|resources| {
            resources
                .attachments
                .iter()
                .find(|(attachment, _)| attachment == name)
                .map(|(_, image)| image)
        })
    }

    pub fn attachments(&self) -> impl Iterator<Item = (&str, &Arc<Image>)> {
        self.frame_resources
            .iter()
            .flat_map(|resources| resources.attachments.iter())
            .map(|(name, image)| (name.as_str(), image))
    }

    /// Number of framebuffers currently installed.
    pub fn framebuffer_count(&self) -> usize {
        self.frame_resources
            .as_ref()
            .map_or(0, |resources| resources.framebuffers.len())
    }

    /// Whether a resize is staged for the next frame.
    pub fn has_staged_resources(&self) -> bool {
        self.next_frame_resources.is_some()
    }

    /// Resolution the pass will have once staged resources are swapped in.
    pub(crate) fn pending_resolution(&self) -> Option<Extent2d> {
        self.next_frame_resources
            .as_ref()
            .or(self.frame_resources.as_ref())
            .map(|resources| resources.resolution)
    }

    pub(crate) fn swapchain(&self) -> Option<&Swapchain> {
        self.frame_resources
            .as_ref()
            .and_then(|resources| resources.swapchain.as_ref())
    }
}

impl std::fmt::Debug for PassInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassInstance")
            .field("pass", self.pass_ref())
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("resolution", &self.resolution)
            .field("dependencies", &self.dependencies)
            .field("parents", &self.parents)
            .field("staged", &self.next_frame_resources.is_some())
            .finish()
    }
}

static_assertions::assert_impl_all!(PassInstance: Send, Sync);
