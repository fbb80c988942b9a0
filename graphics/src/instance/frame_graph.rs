//! The runtime frame graph.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use redgraph_core::jobs::{JobGroup, JobSystem};
use redgraph_core::profiling::{frame_mark, profile_function, profile_plot};
use slotmap::SlotMap;

use crate::device::{Fence, GraphicsDevice, Semaphore};
use crate::error::GraphicsError;
use crate::graph::CompiledGraph;
use crate::pass::{PassContext, RenderPass};
use crate::surface::{Surface, SurfaceConfiguration, Swapchain};
use crate::types::Extent2d;

use super::custom::CustomPassList;
use super::pass_instance::{PassId, PassInstance, PassKind};

/// Frame indices threaded through one frame.
///
/// `swapchain_image` selects the present framebuffer, `device_image` the
/// frame-in-flight slot of everything else. Headless graphs use the slot for
/// both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameIndices {
    pub swapchain_image: usize,
    pub device_image: usize,
}

/// Outcome of [`FrameGraph::render_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameStatus {
    /// The frame was recorded, submitted and (with a surface) presented.
    Presented,
    /// The swapchain was out of date or the surface has no area. A resize
    /// is staged or pending and nothing was recorded.
    Skipped,
}

/// Presentation target of a frame graph.
#[derive(Debug)]
pub struct FrameGraphSurface {
    pub(crate) surface: Surface,
    pub(crate) config: SurfaceConfiguration,
}

impl FrameGraphSurface {
    /// `config.format` must match the graph's target format.
    pub fn new(surface: Surface, config: SurfaceConfiguration) -> Self {
        Self { surface, config }
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn config(&self) -> &SurfaceConfiguration {
        &self.config
    }
}

/// Per-slot synchronization of the root pass.
struct FrameSync {
    fence: Fence,
    acquire: Semaphore,
    present: Semaphore,
}

/// Live instance tree of a [`CompiledGraph`].
///
/// Owns one [`PassInstance`] per node in a slotmap arena. Nodes reached
/// through several parents share one instance. Each call to
/// [`render_frame`](FrameGraph::render_frame) waits for the slot's previous
/// frame, applies staged resizes, records every pass dependencies-first and
/// presents.
///
/// # Example
///
/// ```ignore
/// let mut frame_graph = FrameGraph::new(
///     device.clone(),
///     renderer.compile(Some(config.format), &device)?,
///     FrameGraphSurface::new(surface, config),
///     jobs.clone(),
/// )?;
/// loop {
///     if let WindowEvent::Resized(_) = event {
///         frame_graph.resize_to_surface(false)?;
///     }
///     frame_graph.render_frame()?;
/// }
/// ```
pub struct FrameGraph {
    pub(super) graph: CompiledGraph,
    pub(super) instances: SlotMap<PassId, PassInstance>,
    pub(super) root: PassId,
    pub(super) by_name: HashMap<String, PassId>,
    pub(super) custom: CustomPassList,
    pub(super) surface: Option<FrameGraphSurface>,
    frames: Vec<FrameSync>,
    pub(super) viewport: Extent2d,
    pub(super) resize_pending: bool,
    pub(super) jobs: Arc<JobSystem>,
    /// Secondary recording jobs of this graph only.
    pub(super) recording: Arc<JobGroup>,
    // Dropped last: everything above holds backend objects.
    pub(super) device: Arc<GraphicsDevice>,
}

impl FrameGraph {
    /// Build a frame graph presenting to `surface`.
    ///
    /// The graph must have been compiled with the surface's format as target.
    pub fn new(
        device: Arc<GraphicsDevice>,
        graph: CompiledGraph,
        surface: FrameGraphSurface,
        jobs: Arc<JobSystem>,
    ) -> Result<Self, GraphicsError> {
        if graph.target_format() != Some(surface.config.format) {
            return Err(GraphicsError::InvalidParameter(format!(
                "graph compiled for {:?}, surface configured for {:?}",
                graph.target_format(),
                surface.config.format
            )));
        }
        let viewport = surface.surface.extent()?;
        Self::build(device, graph, Some(surface), viewport, jobs)
    }

    /// Build an offscreen frame graph rendering at `viewport`.
    pub fn headless(
        device: Arc<GraphicsDevice>,
        graph: CompiledGraph,
        viewport: Extent2d,
        jobs: Arc<JobSystem>,
    ) -> Result<Self, GraphicsError> {
        Self::build(device, graph, None, viewport, jobs)
    }

    fn build(
        device: Arc<GraphicsDevice>,
        graph: CompiledGraph,
        surface: Option<FrameGraphSurface>,
        viewport: Extent2d,
        jobs: Arc<JobSystem>,
    ) -> Result<Self, GraphicsError> {
        profile_function!();

        let mut instances = SlotMap::with_key();
        let mut by_name = HashMap::new();
        let root = instantiate(
            &device,
            &graph,
            graph.root(),
            surface.is_some(),
            &mut instances,
            &mut by_name,
        )?;

        let frames = (0..device.image_count())
            .map(|_| {
                Ok(FrameSync {
                    fence: device.create_fence(true)?,
                    acquire: device.create_semaphore()?,
                    present: device.create_semaphore()?,
                })
            })
            .collect::<Result<Vec<_>, GraphicsError>>()?;

        let mut frame_graph = Self {
            graph,
            instances,
            root,
            by_name,
            custom: CustomPassList::default(),
            surface,
            frames,
            viewport,
            resize_pending: false,
            jobs,
            recording: JobGroup::new(),
            device,
        };

        let edges: Vec<(PassId, PassId)> = frame_graph
            .instances
            .iter()
            .flat_map(|(id, instance)| instance.parents.iter().map(move |&parent| (id, parent)))
            .collect();
        for (child, parent) in edges {
            frame_graph.connect(child, parent)?;
        }

        for id in frame_graph.postorder() {
            frame_graph.with_strategy(id, None, |strategy, ctx| strategy.init(ctx))?;
        }

        frame_graph.create_or_resize(root, viewport, viewport, false)?;

        log::info!(
            "FrameGraph: {} pass instances, root '{}' ({}), viewport {}",
            frame_graph.instances.len(),
            frame_graph.graph.root(),
            if frame_graph.surface.is_some() {
                "present"
            } else {
                "headless"
            },
            viewport
        );
        Ok(frame_graph)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    pub fn jobs(&self) -> &Arc<JobSystem> {
        &self.jobs
    }

    pub fn root(&self) -> PassId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn pass(&self, id: PassId) -> Option<&PassInstance> {
        self.instances.get(id)
    }

    /// Instance id of the compiled-graph pass `name`.
    ///
    /// Custom pass names are only unique per host; look them up with
    /// [`find_custom`](Self::find_custom).
    pub fn find(&self, name: &str) -> Option<PassId> {
        self.by_name.get(name).copied()
    }

    pub fn instance(&self, name: &str) -> Option<&PassInstance> {
        self.find(name).and_then(|id| self.instances.get(id))
    }

    /// Instance id of the custom pass `name` attached under `host`.
    pub fn find_custom(&self, host: &str, name: &str) -> Option<PassId> {
        self.find(host).and_then(|host| self.custom.find(host, name))
    }

    pub fn custom_instance(&self, host: &str, name: &str) -> Option<&PassInstance> {
        self.find_custom(host, name).and_then(|id| self.instances.get(id))
    }

    pub fn instances(&self) -> impl Iterator<Item = (PassId, &PassInstance)> {
        self.instances.iter()
    }

    pub fn custom_passes(&self) -> &CustomPassList {
        &self.custom
    }

    pub fn surface(&self) -> Option<&FrameGraphSurface> {
        self.surface.as_ref()
    }

    /// Swapchain currently presented to. `None` when headless.
    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.instances.get(self.root).and_then(PassInstance::swapchain)
    }

    pub fn viewport(&self) -> Extent2d {
        self.viewport
    }

    /// Instance ids reachable from the root, dependencies before dependents.
    pub fn postorder(&self) -> Vec<PassId> {
        let mut visited = BTreeSet::new();
        let mut order = Vec::with_capacity(self.instances.len());
        self.visit_postorder(self.root, &mut visited, &mut order);
        order
    }

    fn visit_postorder(&self, id: PassId, visited: &mut BTreeSet<PassId>, order: &mut Vec<PassId>) {
        if !visited.insert(id) {
            return;
        }
        if let Some(instance) = self.instances.get(id) {
            for &dependency in &instance.dependencies {
                self.visit_postorder(dependency, visited, order);
            }
            order.push(id);
        }
    }

    // ========================================================================
    // Frame loop
    // ========================================================================

    /// Wait for the slot, apply staged resizes, record, submit and present.
    ///
    /// # Errors
    ///
    /// Any backend failure is returned as is and should be treated as fatal.
    /// An out-of-date swapchain is not an error: it stages a resize and
    /// returns [`FrameStatus::Skipped`]. So does a zero-sized surface, until
    /// it has an area again.
    pub fn render_frame(&mut self) -> Result<FrameStatus, GraphicsError> {
        profile_function!();
        let slot = self.device.current_image();

        self.frames[slot].fence.wait()?;
        self.device.flush_resources();

        if self.resize_pending && self.surface.is_some() {
            self.resize_to_surface(true)?;
            if self.resize_pending {
                return Ok(FrameStatus::Skipped);
            }
        }
        self.reset_for_next_frame()?;

        let Some(swapchain_image) = self.acquire(slot)? else {
            return Ok(FrameStatus::Skipped);
        };
        let frame = FrameIndices {
            swapchain_image,
            device_image: slot,
        };

        self.frames[slot].fence.reset()?;
        self.render(self.root, frame)?;
        self.present(frame)?;

        profile_plot!("deferred_resources", self.device.pending_resource_count());
        self.device.next_frame();
        frame_mark!();
        Ok(FrameStatus::Presented)
    }

    /// Swapchain image to render into, `None` if the swapchain is out of date.
    fn acquire(&mut self, slot: usize) -> Result<Option<usize>, GraphicsError> {
        if self.surface.is_none() {
            return Ok(Some(slot));
        }
        let swapchain = self.swapchain().ok_or_else(|| {
            GraphicsError::Internal("present pass has no swapchain".to_string())
        })?;
        let acquired = self
            .device
            .backend()
            .acquire_next_image(swapchain.raw(), self.frames[slot].acquire.raw());
        match acquired {
            Ok(acquired) => {
                if acquired.suboptimal {
                    self.resize_pending = true;
                }
                Ok(Some(acquired.index as usize))
            }
            Err(GraphicsError::SurfaceOutdated) => {
                log::debug!("FrameGraph: swapchain out of date on acquire, skipping frame");
                self.resize_to_surface(true)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn present(&mut self, frame: FrameIndices) -> Result<(), GraphicsError> {
        if self.surface.is_none() {
            return Ok(());
        }
        let swapchain = self.swapchain().ok_or_else(|| {
            GraphicsError::Internal("present pass has no swapchain".to_string())
        })?;
        let presented = self.device.backend().present(
            swapchain.raw(),
            frame.swapchain_image as u32,
            &[self.frames[frame.device_image].present.raw()],
        );
        match presented {
            Ok(suboptimal) if suboptimal || self.resize_pending => {
                log::debug!("FrameGraph: swapchain suboptimal, staging recreation");
                self.resize_to_surface(true)
            }
            Ok(_) => Ok(()),
            Err(GraphicsError::SurfaceOutdated) => {
                log::debug!("FrameGraph: swapchain out of date on present");
                self.resize_to_surface(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Stage a resize of the whole tree to `viewport`.
    pub fn resize(&mut self, viewport: Extent2d) -> Result<(), GraphicsError> {
        self.viewport = viewport;
        self.create_or_resize(self.root, viewport, viewport, false)
    }

    /// Stage a resize to the current surface extent. `force` recreates the
    /// swapchain even if the extent did not change.
    ///
    /// A zero-sized surface (a minimized window) cannot back a swapchain: the
    /// resize stays pending and frames are skipped until the surface has an
    /// area again.
    pub fn resize_to_surface(&mut self, force: bool) -> Result<(), GraphicsError> {
        let extent = match &self.surface {
            Some(surface) => surface.surface.extent()?,
            None => self.viewport,
        };
        if extent.is_degenerate() {
            log::debug!("FrameGraph: surface extent is {}, deferring resize", extent);
            self.resize_pending = true;
            return Ok(());
        }
        self.resize_pending = false;
        self.viewport = extent;
        self.create_or_resize(self.root, extent, extent, force)
    }

    // ========================================================================
    // Internals shared by the resize, executor and custom-pass code
    // ========================================================================

    /// Run a mutable strategy callback of `id` with a context over the tree.
    pub(super) fn with_strategy<F>(
        &self,
        id: PassId,
        frame: Option<FrameIndices>,
        callback: F,
    ) -> Result<(), GraphicsError>
    where
        F: FnOnce(&mut dyn RenderPass, &PassContext<'_>) -> Result<(), GraphicsError>,
    {
        let strategy = Arc::clone(&lookup(&self.instances, id)?.strategy);
        let ctx = PassContext {
            instances: &self.instances,
            id,
            device: &self.device,
            frame,
        };
        let mut strategy = strategy.write();
        callback(&mut **strategy, &ctx)
    }

    /// Create the per-slot semaphores of the edge `child -> parent`.
    pub(super) fn connect(&mut self, child: PassId, parent: PassId) -> Result<(), GraphicsError> {
        let semaphores = (0..self.device.image_count())
            .map(|_| self.device.create_semaphore())
            .collect::<Result<Vec<_>, _>>()?;
        let instance = lookup_mut(&mut self.instances, child)?;
        for (slot, semaphore) in semaphores.into_iter().enumerate() {
            instance.finished[slot].insert(parent, semaphore);
        }
        Ok(())
    }

    pub(super) fn root_sync(&self, slot: usize) -> (&Fence, &Semaphore, &Semaphore) {
        let sync = &self.frames[slot];
        (&sync.fence, &sync.acquire, &sync.present)
    }
}

impl Drop for FrameGraph {
    fn drop(&mut self) {
        self.recording.wait();
        if let Err(e) = self.device.wait_idle() {
            log::error!("FrameGraph: wait_idle failed during teardown: {}", e);
        }
    }
}

impl std::fmt::Debug for FrameGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGraph")
            .field("root", &self.graph.root())
            .field("instances", &self.instances.len())
            .field("custom", &self.custom)
            .field("viewport", &self.viewport)
            .field("headless", &self.surface.is_none())
            .finish()
    }
}

pub(super) fn lookup(
    instances: &SlotMap<PassId, PassInstance>,
    id: PassId,
) -> Result<&PassInstance, GraphicsError> {
    instances
        .get(id)
        .ok_or_else(|| GraphicsError::Internal(format!("stale pass id {id:?}")))
}

pub(super) fn lookup_mut(
    instances: &mut SlotMap<PassId, PassInstance>,
    id: PassId,
) -> Result<&mut PassInstance, GraphicsError> {
    instances
        .get_mut(id)
        .ok_or_else(|| GraphicsError::Internal(format!("stale pass id {id:?}")))
}

/// Instantiate `name` and, recursively, its dependencies. A node reached a
/// second time returns the existing instance.
fn instantiate(
    device: &GraphicsDevice,
    graph: &CompiledGraph,
    name: &str,
    present_root: bool,
    instances: &mut SlotMap<PassId, PassInstance>,
    by_name: &mut HashMap<String, PassId>,
) -> Result<PassId, GraphicsError> {
    if let Some(&id) = by_name.get(name) {
        return Ok(id);
    }
    let node = graph
        .node(name)
        .ok_or_else(|| GraphicsError::Internal(format!("pass '{name}' missing from graph")))?;

    let mut dependencies = Vec::new();
    for dependency in node.dependencies() {
        let id = instantiate(device, graph, dependency, false, instances, by_name)?;
        if !dependencies.contains(&id) {
            dependencies.push(id);
        }
    }

    let kind = if node.is_compute() {
        PassKind::Compute
    } else if present_root {
        PassKind::Present
    } else {
        PassKind::Graphics
    };
    let mut instance = PassInstance::new(
        node.clone(),
        kind,
        graph.render_pass(name).cloned(),
        device.image_count(),
    );
    instance.dependencies = dependencies.clone();
    let id = instances.insert(instance);
    for dependency in dependencies {
        lookup_mut(instances, dependency)?.parents.push(id);
    }
    by_name.insert(name.to_string(), id);
    Ok(id)
}
