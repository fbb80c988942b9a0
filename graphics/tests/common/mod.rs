//! Common utilities for frame graph integration tests.
//!
//! Provides the backend matrix, a [`TestContext`] owning an instance, a
//! device and a job system, and a tracing [`RenderPass`] that logs every
//! callback so tests can assert on the order the frame graph drives them.

use std::sync::Arc;

use parking_lot::Mutex;
use redgraph_graphics::backend::dummy::DummyBackend;
use redgraph_graphics::redgraph_core::jobs::JobSystem;
use redgraph_graphics::{
    Attachment, BackendType, CommandBuffer, DrawContext, Extent2d, FrameGraph, FrameGraphSurface,
    GraphicsDevice, GraphicsError, GraphicsInstance, InstanceParameters, PassContext, RenderPass,
    Renderer, Surface, SurfaceConfiguration, TextureFormat,
};

/// Frames in flight used by every test context.
pub const IMAGE_COUNT: usize = 2;

/// Viewport of headless frame graphs and dummy surfaces.
pub const VIEWPORT: Extent2d = Extent2d::new(640, 480);

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Available GPU backends for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Dummy backend (no actual GPU operations, inspectable log).
    Dummy,
    /// Vulkan backend (native via ash).
    Vulkan,
}

impl Backend {
    /// Check if this backend is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Backend::Dummy => true,
            #[cfg(feature = "vulkan-backend")]
            Backend::Vulkan => true,
            #[cfg(not(feature = "vulkan-backend"))]
            Backend::Vulkan => false,
        }
    }

    #[allow(dead_code)]
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Dummy => "dummy",
            Backend::Vulkan => "vulkan",
        }
    }

    /// Convert to InstanceParameters for creating a GraphicsInstance.
    pub fn to_instance_parameters(self) -> InstanceParameters {
        let params = InstanceParameters::new()
            .with_image_count(IMAGE_COUNT)
            .with_worker_threads(4)
            .with_application_name("redgraph-tests");
        match self {
            Backend::Dummy => params.with_backend(BackendType::Dummy),
            Backend::Vulkan => params.with_backend(BackendType::Vulkan),
        }
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// Graphics instance, device and job system for one test.
pub struct TestContext {
    #[allow(dead_code)]
    pub backend: Backend,
    #[allow(dead_code)]
    pub instance: Arc<GraphicsInstance>,
    pub device: Arc<GraphicsDevice>,
    pub jobs: Arc<JobSystem>,
    dummy: Option<Arc<DummyBackend>>,
}

impl TestContext {
    /// Create a context for `backend`.
    ///
    /// Returns `None` if the backend is not compiled in or has no device.
    pub fn new(backend: Backend) -> Option<Self> {
        if !backend.is_available() {
            return None;
        }
        let _ = env_logger::builder().is_test(true).try_init();

        let params = backend.to_instance_parameters();
        let (instance, dummy) = match backend {
            Backend::Dummy => {
                let dummy = Arc::new(DummyBackend::new());
                (
                    GraphicsInstance::with_backend(dummy.clone(), params),
                    Some(dummy),
                )
            }
            Backend::Vulkan => (GraphicsInstance::new(params).ok()?, None),
        };
        let device = instance.create_device().ok()?;
        let jobs = instance.create_job_system();

        Some(Self {
            backend,
            instance,
            device,
            jobs,
            dummy,
        })
    }

    /// The dummy backend's log. Panics for other backends.
    #[allow(dead_code)]
    pub fn dummy(&self) -> &DummyBackend {
        self.dummy
            .as_deref()
            .expect("backend log is only available on the dummy backend")
    }

    /// Offscreen frame graph at [`VIEWPORT`].
    #[allow(dead_code)]
    pub fn headless(&self, renderer: &Renderer) -> FrameGraph {
        let graph = renderer
            .compile(None, &self.device)
            .expect("Failed to compile render graph");
        FrameGraph::headless(
            Arc::clone(&self.device),
            graph,
            VIEWPORT,
            Arc::clone(&self.jobs),
        )
        .expect("Failed to build frame graph")
    }

    /// Frame graph presenting to a headless dummy surface of [`VIEWPORT`].
    #[allow(dead_code)]
    pub fn presenting(&self, renderer: &Renderer, format: TextureFormat) -> FrameGraph {
        let surface =
            Surface::headless(&self.device, VIEWPORT).expect("Failed to create surface");
        let config = surface
            .negotiate(&SurfaceConfiguration::new(VIEWPORT).with_format(format))
            .expect("Failed to negotiate surface configuration");
        let graph = renderer
            .compile(Some(config.format), &self.device)
            .expect("Failed to compile render graph");
        FrameGraph::new(
            Arc::clone(&self.device),
            graph,
            FrameGraphSurface::new(surface, config),
            Arc::clone(&self.jobs),
        )
        .expect("Failed to build frame graph")
    }
}

// ============================================================================
// Tracing pass
// ============================================================================

/// Shared, ordered log of strategy callbacks: `"<callback>:<pass>"`.
#[derive(Debug, Default)]
pub struct EventLog(Mutex<Vec<String>>);

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, event: String) {
        self.0.lock().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Events of one callback kind, in order.
    #[allow(dead_code)]
    pub fn of(&self, callback: &str) -> Vec<String> {
        let prefix = format!("{callback}:");
        self.0
            .lock()
            .iter()
            .filter_map(|event| event.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    #[allow(dead_code)]
    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Pass that logs its callbacks and records `draws` draws per thread.
///
/// Draw `i` of thread `t` is recorded with `first_vertex = i` and
/// `first_instance = t`.
pub struct TracePass {
    name: String,
    log: Arc<EventLog>,
    draws: u32,
    threads: usize,
}

impl TracePass {
    pub fn factory(name: &str, log: &Arc<EventLog>) -> impl Fn() -> TracePass + Send + Sync + 'static {
        Self::parallel(name, log, 1, 1)
    }

    pub fn parallel(
        name: &str,
        log: &Arc<EventLog>,
        threads: usize,
        draws: u32,
    ) -> impl Fn() -> TracePass + Send + Sync + 'static {
        let name = name.to_string();
        let log = Arc::clone(log);
        move || TracePass {
            name: name.clone(),
            log: Arc::clone(&log),
            draws,
            threads,
        }
    }
}

impl RenderPass for TracePass {
    fn init(&mut self, _ctx: &PassContext<'_>) -> Result<(), GraphicsError> {
        self.log.push(format!("init:{}", self.name));
        Ok(())
    }

    fn on_create_framebuffer(&mut self, _ctx: &PassContext<'_>) -> Result<(), GraphicsError> {
        self.log.push(format!("framebuffer:{}", self.name));
        Ok(())
    }

    fn pre_draw(&mut self, _ctx: &PassContext<'_>) -> Result<(), GraphicsError> {
        self.log.push(format!("pre_draw:{}", self.name));
        Ok(())
    }

    fn draw(
        &self,
        _ctx: &DrawContext,
        cmd: &mut CommandBuffer,
        thread_index: usize,
    ) -> Result<(), GraphicsError> {
        for i in 0..self.draws {
            cmd.draw(3, 1, i, thread_index as u32);
        }
        Ok(())
    }

    fn pre_submit(&mut self, _ctx: &PassContext<'_>) -> Result<(), GraphicsError> {
        self.log.push(format!("pre_submit:{}", self.name));
        Ok(())
    }

    fn record_threads(&self) -> usize {
        self.threads
    }
}

// ============================================================================
// Graphs
// ============================================================================

/// `gbuffer -> resolve -> present`, every pass traced into `log`.
///
/// `present` declares no attachment: headless it renders into nothing,
/// presenting it gets the synthesized swapchain attachment.
pub fn deferred_renderer(log: &Arc<EventLog>) -> Renderer {
    let mut renderer = Renderer::new();
    renderer
        .node("gbuffer")
        .attachment(
            Attachment::slot("albedo")
                .with_format(TextureFormat::Rgba8Unorm)
                .with_clear_color([0.0, 0.0, 0.0, 1.0]),
        )
        .attachment(
            Attachment::slot("depth")
                .with_format(TextureFormat::Depth32Float)
                .with_clear_depth(1.0),
        )
        .render_pass(TracePass::factory("gbuffer", log));
    renderer
        .node("resolve")
        .require(["gbuffer"])
        .attachment(Attachment::slot("hdr").with_format(TextureFormat::Rgba16Float))
        .render_pass(TracePass::factory("resolve", log));
    renderer
        .node("present")
        .require(["resolve"])
        .render_pass(TracePass::factory("present", log));
    renderer
}
