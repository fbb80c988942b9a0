//! Graph builder: [`Renderer`] and [`RenderNode`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::pass::{EmptyPass, RenderPass};
use crate::types::{Extent2d, TextureFormat};

use super::{Attachment, RenderPassKey, RenderPassRef};

/// Maps a parent resolution to the resolution of a pass.
pub type ResizeCallback = Arc<dyn Fn(Extent2d) -> Extent2d + Send + Sync>;

/// Builds the strategy object of a pass. Called once per pass instance.
pub type PassFactory = Arc<dyn Fn() -> Box<dyn RenderPass> + Send + Sync>;

/// Declaration of one named pass.
///
/// Mutated through [`Renderer::node`] while building; compiled graphs hold
/// frozen copies.
#[derive(Clone)]
pub struct RenderNode {
    pass_ref: RenderPassRef,
    dependencies: BTreeSet<String>,
    attachments: Vec<Attachment>,
    resize_callback: Option<ResizeCallback>,
    factory: Option<PassFactory>,
    reversed_log_z: bool,
    flip_culling: bool,
    compute_pass: bool,
    with_imgui: bool,
    present: bool,
}

impl RenderNode {
    /// Create a detached node, for passes attached at runtime with
    /// [`FrameGraph::add_custom_pass`](crate::instance::FrameGraph::add_custom_pass).
    pub fn new(name: &str) -> Self {
        Self {
            pass_ref: RenderPassRef::new(name, 0),
            dependencies: BTreeSet::new(),
            attachments: Vec::new(),
            resize_callback: None,
            factory: None,
            reversed_log_z: false,
            flip_culling: false,
            compute_pass: false,
            with_imgui: false,
            present: false,
        }
    }

    // ------------------------------------------------------------------
    // Builder
    // ------------------------------------------------------------------

    /// Declare passes this pass reads from.
    pub fn require<I, S>(&mut self, dependencies: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Append an attachment. Replaces an earlier attachment of the same name.
    pub fn attachment(&mut self, attachment: Attachment) -> &mut Self {
        match self
            .attachments
            .iter_mut()
            .find(|a| a.name() == attachment.name())
        {
            Some(existing) => *existing = attachment,
            None => self.attachments.push(attachment),
        }
        self
    }

    /// Map the parent resolution to this pass's resolution.
    pub fn resize_callback<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(Extent2d) -> Extent2d + Send + Sync + 'static,
    {
        self.resize_callback = Some(Arc::new(callback));
        self
    }

    /// Set the strategy factory.
    pub fn render_pass<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: RenderPass + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(move || Box::new(factory()) as Box<dyn RenderPass>));
        self
    }

    pub fn with_imgui(&mut self, enabled: bool) -> &mut Self {
        self.with_imgui = enabled;
        self
    }

    pub fn reversed_log_z(&mut self, enabled: bool) -> &mut Self {
        self.reversed_log_z = enabled;
        self
    }

    pub fn flip_culling(&mut self, enabled: bool) -> &mut Self {
        self.flip_culling = enabled;
        self
    }

    /// Record this pass outside a render pass, for dispatches.
    pub fn compute_pass(&mut self, enabled: bool) -> &mut Self {
        self.compute_pass = enabled;
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        self.pass_ref.generic_name()
    }

    /// Identity assigned at compile time.
    pub fn pass_ref(&self) -> &RenderPassRef {
        &self.pass_ref
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(String::as_str)
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn find_attachment(&self, name: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.name() == name)
    }

    pub fn is_compute(&self) -> bool {
        self.compute_pass
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

    /// Whether this node renders into a presentation image.
    pub fn is_present(&self) -> bool {
        self.present
    }

    /// Resolution of this pass for a given parent resolution.
    ///
    /// Without a resize callback the parent resolution is inherited.
    pub fn desired_resolution(&self, parent: Extent2d) -> Extent2d {
        match &self.resize_callback {
            Some(callback) => callback(parent),
            None => parent,
        }
    }

    /// Build a fresh strategy object.
    pub fn create_strategy(&self) -> Box<dyn RenderPass> {
        match &self.factory {
            Some(factory) => factory(),
            None => Box::new(EmptyPass),
        }
    }

    /// Native render-pass key. `None` for compute passes or unresolved formats.
    pub fn render_pass_key(&self) -> Option<RenderPassKey> {
        if self.compute_pass {
            return None;
        }
        let attachments = self
            .attachments
            .iter()
            .map(Attachment::key)
            .collect::<Option<Vec<_>>>()?;
        Some(RenderPassKey {
            attachments,
            present: self.present,
            reversed_z: self.reversed_log_z,
        })
    }

    // ------------------------------------------------------------------
    // Compile-time mutation
    // ------------------------------------------------------------------

    pub(crate) fn assign_id(&mut self, unique_id: u64) {
        self.pass_ref = RenderPassRef::new(self.pass_ref.generic_name(), unique_id);
    }

    pub(crate) fn mark_present(&mut self, format: TextureFormat) {
        self.present = true;
        match self.attachments.first_mut() {
            Some(attachment) => attachment.set_format(format),
            None => self
                .attachments
                .push(Attachment::slot("present").with_format(format)),
        }
    }
}

impl std::fmt::Debug for RenderNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderNode")
            .field("pass_ref", &self.pass_ref)
            .field("dependencies", &self.dependencies)
            .field("attachments", &self.attachments)
            .field("has_resize_callback", &self.resize_callback.is_some())
            .field("compute_pass", &self.compute_pass)
            .field("present", &self.present)
            .finish()
    }
}

/// Mutable builder for a render graph.
///
/// Nodes are created on first access by name. Declaration order does not
/// matter; dependencies only have to exist when [`compile`](Renderer::compile)
/// runs.
///
/// ```ignore
/// let mut renderer = Renderer::new();
/// renderer.node("gbuffer").attachment(Attachment::slot("albedo").with_format(TextureFormat::Rgba8Unorm));
/// renderer.node("resolve").require(["gbuffer"]).attachment(Attachment::slot("hdr").with_format(TextureFormat::Rgba16Float));
/// renderer.node("present").require(["resolve"]);
/// let graph = renderer.compile(Some(TextureFormat::Bgra8Unorm), &device)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    pub(super) nodes: BTreeMap<String, RenderNode>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the node called `name`, creating it if needed.
    pub fn node(&mut self, name: &str) -> &mut RenderNode {
        self.nodes
            .entry(name.to_string())
            .or_insert_with(|| RenderNode::new(name))
    }

    pub fn get(&self, name: &str) -> Option<&RenderNode> {
        self.nodes.get(name)
    }

    /// Remove a node. Dependencies on it are left dangling.
    pub fn remove(&mut self, name: &str) -> Option<RenderNode> {
        self.nodes.remove(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
