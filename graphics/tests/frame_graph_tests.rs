//! Frame graph integration tests.
//!
//! Every test runs on the dummy backend, whose log makes submissions, waits,
//! framebuffer creations and presents observable. Tests that only rely on the
//! public frame graph state also run on Vulkan when a device is present.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use common::{Backend, EventLog, IMAGE_COUNT, TestContext, TracePass, VIEWPORT, deferred_renderer};
use redgraph_graphics::backend::WaitStage;
use redgraph_graphics::backend::dummy::DummyCommand;
use redgraph_graphics::instance::PassState;
use redgraph_graphics::{
    Attachment, BindingLayout, DescriptorSet, Extent2d, FrameIndices, FrameStatus, GpuBackend,
    GraphError, GraphicsError, PassContext, PassKind, RenderNode, RenderPass, Renderer,
    TextureFormat,
};
use rstest::rstest;

fn skip(backend: Backend) {
    eprintln!("Skipping test: {:?} backend not available", backend);
}

// ============================================================================
// Build and first frame
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_present_chain_first_frame(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let log = EventLog::new();
    let mut frame_graph = ctx.presenting(&deferred_renderer(&log), TextureFormat::Bgra8Unorm);

    assert_eq!(
        log.events(),
        [
            "init:gbuffer",
            "init:resolve",
            "init:present",
            "framebuffer:gbuffer",
            "framebuffer:resolve",
            "framebuffer:present",
        ]
    );

    let root = frame_graph.pass(frame_graph.root()).unwrap();
    assert_eq!(root.name(), "present");
    assert_eq!(root.kind(), PassKind::Present);
    let swapchain = frame_graph.swapchain().unwrap();
    assert_eq!(swapchain.format(), TextureFormat::Bgra8Unorm);
    assert_eq!(swapchain.image_count(), IMAGE_COUNT + 1);
    assert_eq!(swapchain.extent(), VIEWPORT);
    let swapchain_id = swapchain.raw().id();

    log.clear();
    assert_eq!(frame_graph.render_frame().unwrap(), FrameStatus::Presented);

    let submissions = ctx.dummy().submissions();
    let labels: Vec<&str> = submissions.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, ["gbuffer", "resolve", "present"]);

    let (gbuffer, resolve, present) = (&submissions[0], &submissions[1], &submissions[2]);
    assert!(gbuffer.wait_semaphores.is_empty());
    assert_eq!(resolve.wait_semaphores, gbuffer.signal_semaphores);
    // Resolve's result and the acquired image.
    assert_eq!(present.wait_semaphores.len(), 2);
    assert_eq!(present.wait_semaphores[0], resolve.signal_semaphores[0]);
    // Dependency edges block every stage, the acquired image only its writes.
    assert_eq!(resolve.wait_stages, [WaitStage::AllCommands]);
    assert_eq!(
        present.wait_stages,
        [WaitStage::AllCommands, WaitStage::ColorAttachmentOutput]
    );
    assert!(present.fence.is_some());
    assert!(gbuffer.fence.is_none() && resolve.fence.is_none());

    let presents = ctx.dummy().presents();
    assert_eq!(presents.len(), 1);
    assert_eq!(presents[0].wait_semaphores, present.signal_semaphores);
    assert_eq!(presents[0].swapchain, swapchain_id);

    match &present.command_buffers[0].commands[0] {
        DummyCommand::BeginRenderPass {
            extent,
            clear_values,
            ..
        } => {
            assert_eq!(*extent, VIEWPORT);
            assert_eq!(clear_values.len(), 1);
        }
        other => panic!("present did not begin a render pass: {:?}", other),
    }

    assert_eq!(
        log.of("pre_draw"),
        ["gbuffer", "resolve", "present"],
        "dependencies are recorded before their dependents"
    );
    assert_eq!(log.of("pre_submit"), ["gbuffer", "resolve", "present"]);
    for (_, instance) in frame_graph.instances() {
        assert_eq!(instance.state(), PassState::Submitted);
    }
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_headless_frames(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let log = EventLog::new();
    let mut frame_graph = ctx.headless(&deferred_renderer(&log));

    assert_eq!(frame_graph.len(), 3);
    assert!(frame_graph.swapchain().is_none());
    let root = frame_graph.pass(frame_graph.root()).unwrap();
    assert_eq!(root.kind(), PassKind::Graphics);

    for frame in 0..5u64 {
        assert_eq!(ctx.device.frame_number(), frame);
        assert_eq!(frame_graph.render_frame().unwrap(), FrameStatus::Presented);
    }
    assert_eq!(log.of("pre_draw").len(), 15);

    let gbuffer = frame_graph.instance("gbuffer").unwrap();
    assert_eq!(gbuffer.resolution(), VIEWPORT);
    assert_eq!(gbuffer.framebuffer_count(), IMAGE_COUNT);
    let albedo = gbuffer.attachment("albedo").unwrap();
    assert_eq!(albedo.copy_count(), IMAGE_COUNT);
    assert_eq!(albedo.format(), TextureFormat::Rgba8Unorm);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_render_runs_once_per_frame(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let log = EventLog::new();
    let mut frame_graph = ctx.headless(&deferred_renderer(&log));
    let root = frame_graph.root();
    let slot = ctx.device.current_image();
    let frame = FrameIndices {
        swapchain_image: slot,
        device_image: slot,
    };

    ctx.dummy().clear_log();
    frame_graph.render(root, frame).unwrap();
    frame_graph.render(root, frame).unwrap();
    let resolve = frame_graph.find("resolve").unwrap();
    frame_graph.render(resolve, frame).unwrap();

    let labels: Vec<String> = ctx
        .dummy()
        .submissions()
        .into_iter()
        .map(|s| s.label)
        .collect();
    assert_eq!(labels, ["gbuffer", "resolve", "present"]);
    assert_eq!(log.of("pre_draw"), ["gbuffer", "resolve", "present"]);

    frame_graph.reset_for_next_frame().unwrap();
    frame_graph.render(root, frame).unwrap();
    assert_eq!(ctx.dummy().submissions().len(), 6);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_shared_dependency_instantiated_once(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let log = EventLog::new();
    let mut renderer = Renderer::new();
    renderer
        .node("gbuffer")
        .attachment(Attachment::slot("albedo").with_format(TextureFormat::Rgba8Unorm))
        .render_pass(TracePass::factory("gbuffer", &log));
    for name in ["lighting", "ssao"] {
        renderer
            .node(name)
            .require(["gbuffer"])
            .attachment(Attachment::slot("out").with_format(TextureFormat::Rgba16Float))
            .render_pass(TracePass::factory(name, &log));
    }
    renderer.node("compose").require(["lighting", "ssao"]);

    let mut frame_graph = ctx.headless(&renderer);
    assert_eq!(frame_graph.len(), 4);
    assert_eq!(log.of("init"), ["gbuffer", "lighting", "ssao"]);

    let gbuffer = frame_graph.instance("gbuffer").unwrap();
    assert_eq!(gbuffer.parent_ids().len(), 2);

    frame_graph.render_frame().unwrap();
    let submissions = ctx.dummy().submissions();
    let labels: Vec<&str> = submissions.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, ["gbuffer", "lighting", "ssao", "compose"]);
    assert_eq!(submissions[0].signal_semaphores.len(), 2);
    assert_eq!(submissions[3].wait_semaphores.len(), 2);
    for parent in &submissions[1..3] {
        assert_eq!(parent.wait_semaphores.len(), 1);
        assert!(submissions[0].signal_semaphores.contains(&parent.wait_semaphores[0]));
    }
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_compute_pass_dispatches_outside_render_pass(#[case] backend: Backend) {
    struct Blur;

    impl RenderPass for Blur {
        fn draw(
            &self,
            ctx: &redgraph_graphics::DrawContext,
            cmd: &mut redgraph_graphics::CommandBuffer,
            _thread_index: usize,
        ) -> Result<(), GraphicsError> {
            let extent = ctx.resolution();
            cmd.dispatch(extent.width.div_ceil(8), extent.height.div_ceil(8), 1);
            Ok(())
        }
    }

    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let mut renderer = Renderer::new();
    renderer
        .node("blur")
        .compute_pass(true)
        .attachment(Attachment::slot("blurred").with_format(TextureFormat::Rgba16Float))
        .render_pass(|| Blur);
    renderer.node("present").require(["blur"]);

    let mut frame_graph = ctx.headless(&renderer);
    let blur = frame_graph.instance("blur").unwrap();
    assert_eq!(blur.kind(), PassKind::Compute);
    assert_eq!(blur.framebuffer_count(), 0);
    assert!(blur.attachment("blurred").is_some());

    frame_graph.render_frame().unwrap();
    let submissions = ctx.dummy().submissions();
    assert_eq!(
        submissions[0].command_buffers[0].commands,
        [DummyCommand::Dispatch { x: 80, y: 60, z: 1 }]
    );
}

// ============================================================================
// Resize
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_resize_is_idempotent(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let log = EventLog::new();
    let mut frame_graph = ctx.headless(&deferred_renderer(&log));
    let allocations = ctx.device.outstanding_allocations();

    frame_graph.resize(VIEWPORT).unwrap();
    frame_graph.resize_to_surface(false).unwrap();
    assert_eq!(ctx.device.outstanding_allocations(), allocations);
    for (_, instance) in frame_graph.instances() {
        assert!(!instance.has_staged_resources());
    }

    let resized = Extent2d::new(1024, 768);
    frame_graph.resize(resized).unwrap();
    let staged_allocations = ctx.device.outstanding_allocations();
    assert!(staged_allocations > allocations);
    frame_graph.resize(resized).unwrap();
    assert_eq!(ctx.device.outstanding_allocations(), staged_allocations);

    // Still rendering at the old size until the next frame starts.
    assert_eq!(frame_graph.instance("gbuffer").unwrap().resolution(), VIEWPORT);
    frame_graph.render_frame().unwrap();
    assert_eq!(frame_graph.instance("gbuffer").unwrap().resolution(), resized);
    assert_eq!(frame_graph.viewport(), resized);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_resize_creates_framebuffers_once(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let log = EventLog::new();
    let mut frame_graph = ctx.headless(&deferred_renderer(&log));
    // gbuffer, resolve and the attachment-less root, one per frame slot.
    assert_eq!(ctx.dummy().framebuffer_count(), 3 * IMAGE_COUNT);

    frame_graph.resize(VIEWPORT).unwrap();
    assert_eq!(ctx.dummy().framebuffer_count(), 3 * IMAGE_COUNT);

    frame_graph.resize(Extent2d::new(320, 240)).unwrap();
    frame_graph.resize(Extent2d::new(320, 240)).unwrap();
    assert_eq!(ctx.dummy().framebuffer_count(), 6 * IMAGE_COUNT);

    log.clear();
    frame_graph.render_frame().unwrap();
    assert_eq!(
        log.of("framebuffer"),
        ["gbuffer", "resolve", "present"],
        "swapped passes are notified dependencies first"
    );
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_resize_callback_scales_dependencies(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let mut renderer = Renderer::new();
    renderer
        .node("bloom")
        .resize_callback(|parent| parent.scaled(0.5))
        .attachment(Attachment::slot("bright").with_format(TextureFormat::Rgba16Float));
    renderer
        .node("bloom_source")
        .attachment(Attachment::slot("color").with_format(TextureFormat::Rgba8Unorm));
    renderer.node("bloom").require(["bloom_source"]);
    renderer.node("present").require(["bloom"]);

    let mut frame_graph = ctx.headless(&renderer);
    let half = Extent2d::new(VIEWPORT.width / 2, VIEWPORT.height / 2);
    assert_eq!(frame_graph.instance("bloom").unwrap().resolution(), half);
    // Inherits from its parent, not from the viewport.
    assert_eq!(frame_graph.instance("bloom_source").unwrap().resolution(), half);
    assert_eq!(frame_graph.instance("bloom_source").unwrap().viewport(), VIEWPORT);

    frame_graph.render_frame().unwrap();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_retired_images_outlive_frames_in_flight(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let log = EventLog::new();
    let mut frame_graph = ctx.headless(&deferred_renderer(&log));
    let allocations = ctx.device.outstanding_allocations();

    frame_graph.resize(Extent2d::new(800, 600)).unwrap();
    let staged = ctx.device.outstanding_allocations();
    assert_eq!(staged, 2 * allocations);

    // The first frame swaps the new images in and retires the old ones into
    // its slot; they are released when that slot comes around again.
    for _ in 0..IMAGE_COUNT {
        frame_graph.render_frame().unwrap();
        assert_eq!(ctx.device.outstanding_allocations(), staged);
    }
    frame_graph.render_frame().unwrap();
    assert_eq!(ctx.device.outstanding_allocations(), allocations);
    assert_eq!(ctx.device.pending_resource_count(), 0);
}

// ============================================================================
// Presentation
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_out_of_date_surface_skips_frame(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let log = EventLog::new();
    let mut frame_graph = ctx.presenting(&deferred_renderer(&log), TextureFormat::Bgra8Unorm);
    frame_graph.render_frame().unwrap();
    let old_swapchain = frame_graph.swapchain().unwrap().raw().id();

    ctx.dummy().clear_log();
    ctx.dummy().mark_surface_out_of_date();
    assert_eq!(frame_graph.render_frame().unwrap(), FrameStatus::Skipped);
    assert!(ctx.dummy().submissions().is_empty());
    assert!(ctx.dummy().presents().is_empty());
    assert!(frame_graph.pass(frame_graph.root()).unwrap().has_staged_resources());

    assert_eq!(frame_graph.render_frame().unwrap(), FrameStatus::Presented);
    assert_ne!(frame_graph.swapchain().unwrap().raw().id(), old_swapchain);
    assert_eq!(ctx.dummy().presents().len(), 1);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_suboptimal_present_recreates_swapchain(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let log = EventLog::new();
    let mut frame_graph = ctx.presenting(&deferred_renderer(&log), TextureFormat::Bgra8Unorm);

    let resized = Extent2d::new(1280, 720);
    ctx.dummy().set_surface_extent(resized);
    assert_eq!(frame_graph.render_frame().unwrap(), FrameStatus::Presented);
    assert_eq!(frame_graph.swapchain().unwrap().extent(), VIEWPORT);

    frame_graph.render_frame().unwrap();
    assert_eq!(frame_graph.swapchain().unwrap().extent(), resized);
    assert_eq!(frame_graph.instance("gbuffer").unwrap().resolution(), resized);
    assert_eq!(frame_graph.viewport(), resized);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_minimized_surface_skips_frames(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let log = EventLog::new();
    let mut frame_graph = ctx.presenting(&deferred_renderer(&log), TextureFormat::Bgra8Unorm);
    frame_graph.render_frame().unwrap();
    let swapchain_id = frame_graph.swapchain().unwrap().raw().id();

    // The present after minimizing reports a suboptimal swapchain.
    ctx.dummy().set_surface_extent(Extent2d::new(0, 0));
    assert_eq!(frame_graph.render_frame().unwrap(), FrameStatus::Presented);

    ctx.dummy().clear_log();
    for _ in 0..3 {
        assert_eq!(frame_graph.render_frame().unwrap(), FrameStatus::Skipped);
    }
    assert!(ctx.dummy().submissions().is_empty());
    assert!(ctx.dummy().presents().is_empty());
    assert_eq!(frame_graph.swapchain().unwrap().raw().id(), swapchain_id);
    assert!(!frame_graph.pass(frame_graph.root()).unwrap().has_staged_resources());

    let restored = Extent2d::new(1024, 768);
    ctx.dummy().set_surface_extent(restored);
    assert_eq!(frame_graph.render_frame().unwrap(), FrameStatus::Presented);
    assert_eq!(frame_graph.swapchain().unwrap().extent(), restored);
    assert_eq!(frame_graph.instance("gbuffer").unwrap().resolution(), restored);
    assert_eq!(ctx.dummy().presents().len(), 1);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_surface_format_fallback(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    ctx.dummy().set_surface_formats(vec![TextureFormat::Rgba8Unorm]);
    let log = EventLog::new();
    let frame_graph = ctx.presenting(&deferred_renderer(&log), TextureFormat::Bgra8Unorm);
    assert_eq!(
        frame_graph.swapchain().unwrap().format(),
        TextureFormat::Rgba8Unorm
    );
    assert_eq!(
        frame_graph.graph().target_format(),
        Some(TextureFormat::Rgba8Unorm)
    );
}

// ============================================================================
// Parallel recording
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_parallel_recording_keeps_thread_order(#[case] backend: Backend) {
    const THREADS: usize = 4;
    const DRAWS: u32 = 25;

    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let log = EventLog::new();
    let mut renderer = Renderer::new();
    renderer
        .node("scene")
        .attachment(
            Attachment::slot("color")
                .with_format(TextureFormat::Rgba8Unorm)
                .with_clear_color([0.1, 0.2, 0.3, 1.0]),
        )
        .render_pass(TracePass::parallel("scene", &log, THREADS, DRAWS));

    let mut frame_graph = ctx.headless(&renderer);
    for _ in 0..3 {
        ctx.dummy().clear_log();
        frame_graph.render_frame().unwrap();

        let submissions = ctx.dummy().submissions();
        assert_eq!(submissions.len(), 1);
        let primary = &submissions[0].command_buffers[0];

        let secondaries = primary
            .commands
            .iter()
            .find_map(|command| match command {
                DummyCommand::ExecuteCommands(secondaries) => Some(secondaries),
                _ => None,
            })
            .expect("parallel pass executes secondaries");
        let labels: Vec<&str> = secondaries.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, ["scene[0]", "scene[1]", "scene[2]", "scene[3]"]);

        let draws = primary.draws();
        assert_eq!(draws.len(), THREADS * DRAWS as usize);
        for (thread, chunk) in draws.chunks(DRAWS as usize).enumerate() {
            for (i, draw) in chunk.iter().enumerate() {
                assert_eq!(
                    **draw,
                    DummyCommand::Draw {
                        vertex_count: 3,
                        instance_count: 1,
                        first_vertex: i as u32,
                        first_instance: thread as u32,
                    }
                );
            }
        }
    }
}

/// Records `draws` draws per thread; lower thread indices finish last.
struct SkewedPass {
    threads: usize,
    draws: u32,
    completed: Arc<EventLog>,
}

impl RenderPass for SkewedPass {
    fn draw(
        &self,
        _ctx: &redgraph_graphics::DrawContext,
        cmd: &mut redgraph_graphics::CommandBuffer,
        thread_index: usize,
    ) -> Result<(), GraphicsError> {
        let delay = (self.threads - thread_index) as u64 * 15;
        thread::sleep(Duration::from_millis(delay));
        for i in 0..self.draws {
            cmd.draw(3, 1, i, thread_index as u32);
        }
        self.completed.push(thread_index.to_string());
        Ok(())
    }

    fn record_threads(&self) -> usize {
        self.threads
    }
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_parallel_recording_order_ignores_completion_order(#[case] backend: Backend) {
    const THREADS: usize = 4;
    const DRAWS: u32 = 5;

    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let completed = EventLog::new();
    let mut renderer = Renderer::new();
    let pass_log = Arc::clone(&completed);
    renderer
        .node("scene")
        .attachment(Attachment::slot("color").with_format(TextureFormat::Rgba8Unorm))
        .render_pass(move || SkewedPass {
            threads: THREADS,
            draws: DRAWS,
            completed: Arc::clone(&pass_log),
        });
    let mut frame_graph = ctx.headless(&renderer);

    ctx.dummy().clear_log();
    frame_graph.render_frame().unwrap();
    assert_ne!(completed.events(), ["0", "1", "2", "3"]);

    let submissions = ctx.dummy().submissions();
    let draws = submissions[0].command_buffers[0].draws();
    assert_eq!(draws.len(), THREADS * DRAWS as usize);
    for (thread, chunk) in draws.chunks(DRAWS as usize).enumerate() {
        for draw in chunk {
            match **draw {
                DummyCommand::Draw { first_instance, .. } => {
                    assert_eq!(first_instance, thread as u32)
                }
                ref other => panic!("unexpected command {:?}", other),
            }
        }
    }
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_unrelated_jobs_do_not_stall_frames(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let log = EventLog::new();
    let mut renderer = Renderer::new();
    renderer
        .node("scene")
        .attachment(Attachment::slot("color").with_format(TextureFormat::Rgba8Unorm))
        .render_pass(TracePass::parallel("scene", &log, 3, 4));
    renderer.node("present").require(["scene"]);
    let mut frame_graph = ctx.headless(&renderer);

    let (release, blocked) = mpsc::channel::<()>();
    let finished = Arc::new(AtomicBool::new(false));
    let job_finished = Arc::clone(&finished);
    let _ = ctx.jobs.schedule(move || {
        let _ = blocked.recv_timeout(Duration::from_secs(10));
        job_finished.store(true, Ordering::SeqCst);
    });

    let resized = Extent2d::new(320, 240);
    frame_graph.resize(resized).unwrap();
    for _ in 0..3 {
        frame_graph.render_frame().unwrap();
    }
    assert_eq!(frame_graph.instance("scene").unwrap().resolution(), resized);
    assert!(
        !finished.load(Ordering::SeqCst),
        "frames waited for a job they did not schedule"
    );

    release.send(()).unwrap();
    ctx.jobs.wait_idle();
    assert!(finished.load(Ordering::SeqCst));
}

// ============================================================================
// Descriptor sets driven by the pass callbacks
// ============================================================================

/// Samples the gbuffer albedo through a lazily updated descriptor set.
#[derive(Default)]
struct SamplingPass {
    set: Option<DescriptorSet>,
}

impl RenderPass for SamplingPass {
    fn on_create_framebuffer(&mut self, ctx: &PassContext<'_>) -> Result<(), GraphicsError> {
        let albedo = ctx
            .dependency("gbuffer")
            .and_then(|gbuffer| gbuffer.attachment("albedo"))
            .ok_or_else(|| GraphicsError::InvalidParameter("gbuffer has no albedo".into()))?;
        if self.set.is_none() {
            let layout = ctx
                .device()
                .create_descriptor_set_layout(BindingLayout::new().with_texture(0))?;
            self.set = Some(ctx.device().create_descriptor_set(&layout, false)?);
        }
        match self.set.as_mut() {
            Some(set) => set.bind_image(0, albedo),
            None => Ok(()),
        }
    }

    fn pre_draw(&mut self, ctx: &PassContext<'_>) -> Result<(), GraphicsError> {
        if let (Some(set), Some(frame)) = (self.set.as_mut(), ctx.frame()) {
            set.raw_current(frame.device_image)?;
        }
        Ok(())
    }

    fn draw(
        &self,
        _ctx: &redgraph_graphics::DrawContext,
        cmd: &mut redgraph_graphics::CommandBuffer,
        _thread_index: usize,
    ) -> Result<(), GraphicsError> {
        cmd.draw(3, 1, 0, 0);
        Ok(())
    }
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_descriptor_updates_follow_resize(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let log = EventLog::new();
    let mut renderer = deferred_renderer(&log);
    renderer.node("resolve").render_pass(SamplingPass::default);
    let mut frame_graph = ctx.headless(&renderer);

    // One update per frame slot, then the cache holds.
    for expected in [1, 2, 2, 2] {
        frame_graph.render_frame().unwrap();
        assert_eq!(ctx.dummy().descriptor_updates().len(), expected);
    }

    frame_graph.resize(Extent2d::new(320, 200)).unwrap();
    for expected in [3, 4, 4] {
        frame_graph.render_frame().unwrap();
        assert_eq!(ctx.dummy().descriptor_updates().len(), expected);
    }
}

// ============================================================================
// Custom passes
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_custom_pass_reference_counting(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let log = EventLog::new();
    let mut frame_graph = ctx.headless(&deferred_renderer(&log));

    let mut overlay = RenderNode::new("overlay");
    overlay
        .attachment(Attachment::slot("ui").with_format(TextureFormat::Rgba8Unorm))
        .render_pass(TracePass::factory("overlay", &log));

    log.clear();
    let id = frame_graph.add_custom_pass("resolve", overlay.clone()).unwrap();
    assert_eq!(
        log.events(),
        ["init:overlay", "framebuffer:overlay", "framebuffer:resolve"]
    );
    assert_eq!(frame_graph.add_custom_pass("resolve", overlay).unwrap(), id);
    assert_eq!(frame_graph.custom_passes().references(id), 2);
    assert_eq!(frame_graph.len(), 4);

    let instance = frame_graph.pass(id).unwrap();
    assert!(instance.is_custom());
    assert_eq!(instance.resolution(), VIEWPORT);
    let resolve = frame_graph.instance("resolve").unwrap();
    assert!(resolve.dependency_ids().contains(&id));

    ctx.dummy().clear_log();
    frame_graph.render_frame().unwrap();
    let labels: Vec<String> = ctx
        .dummy()
        .submissions()
        .into_iter()
        .map(|s| s.label)
        .collect();
    assert_eq!(labels, ["gbuffer", "overlay", "resolve", "present"]);

    assert!(!frame_graph.remove_custom_pass("resolve", "overlay").unwrap());
    assert!(frame_graph.remove_custom_pass("resolve", "overlay").unwrap());
    assert!(frame_graph.find("overlay").is_none());
    assert!(frame_graph.custom_passes().is_empty());
    assert!(frame_graph.remove_custom_pass("resolve", "overlay").is_err());

    ctx.dummy().clear_log();
    frame_graph.render_frame().unwrap();
    assert_eq!(ctx.dummy().submissions().len(), 3);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_custom_pass_follows_staged_host_resize(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let log = EventLog::new();
    let mut frame_graph = ctx.headless(&deferred_renderer(&log));

    let resized = Extent2d::new(800, 600);
    frame_graph.resize(resized).unwrap();
    let mut overlay = RenderNode::new("overlay");
    overlay.attachment(Attachment::slot("ui").with_format(TextureFormat::Rgba8Unorm));
    let id = frame_graph.add_custom_pass("resolve", overlay).unwrap();
    assert_eq!(frame_graph.pass(id).unwrap().resolution(), resized);

    for _ in 0..3 {
        frame_graph.render_frame().unwrap();
    }
    let host = frame_graph.instance("resolve").unwrap().resolution();
    assert_eq!(host, resized);
    assert_eq!(frame_graph.pass(id).unwrap().resolution(), host);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_custom_passes_share_names_across_hosts(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let log = EventLog::new();
    let mut frame_graph = ctx.headless(&deferred_renderer(&log));

    let mut overlay = RenderNode::new("overlay");
    overlay.attachment(Attachment::slot("ui").with_format(TextureFormat::Rgba8Unorm));
    let on_gbuffer = frame_graph.add_custom_pass("gbuffer", overlay.clone()).unwrap();
    let on_resolve = frame_graph.add_custom_pass("resolve", overlay).unwrap();
    assert_ne!(on_gbuffer, on_resolve);

    assert!(frame_graph.find("overlay").is_none());
    assert_eq!(frame_graph.find_custom("gbuffer", "overlay"), Some(on_gbuffer));
    assert_eq!(frame_graph.find_custom("resolve", "overlay"), Some(on_resolve));
    let resolve = frame_graph.find("resolve").unwrap();
    assert_eq!(
        frame_graph
            .custom_instance("resolve", "overlay")
            .unwrap()
            .parent_ids(),
        [resolve]
    );

    assert!(frame_graph.remove_custom_pass("gbuffer", "overlay").unwrap());
    assert!(frame_graph.find_custom("gbuffer", "overlay").is_none());
    assert_eq!(frame_graph.find_custom("resolve", "overlay"), Some(on_resolve));

    ctx.dummy().clear_log();
    frame_graph.render_frame().unwrap();
    let labels: Vec<String> = ctx
        .dummy()
        .submissions()
        .into_iter()
        .map(|s| s.label)
        .collect();
    assert_eq!(labels, ["gbuffer", "overlay", "resolve", "present"]);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_custom_pass_rejections(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let log = EventLog::new();
    let mut frame_graph = ctx.headless(&deferred_renderer(&log));

    let result = frame_graph.add_custom_pass("missing", RenderNode::new("overlay"));
    assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));

    let mut dependent = RenderNode::new("dependent");
    dependent.require(["gbuffer"]);
    let result = frame_graph.add_custom_pass("resolve", dependent);
    assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));

    let mut unresolved = RenderNode::new("unresolved");
    unresolved.attachment(Attachment::slot("color"));
    let result = frame_graph.add_custom_pass("resolve", unresolved);
    assert!(matches!(
        result,
        Err(GraphicsError::Graph(GraphError::UnresolvedAttachmentFormat { .. }))
    ));
    assert_eq!(frame_graph.len(), 3);
}

// ============================================================================
// Compile errors and teardown
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_invalid_graphs_fail_to_compile(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };

    let mut mutual = Renderer::new();
    mutual.node("a").require(["b"]);
    mutual.node("b").require(["a"]);
    assert!(matches!(
        mutual.compile(None, &ctx.device),
        Err(GraphicsError::Graph(GraphError::NoRoot { .. }))
    ));

    let mut cyclic = Renderer::new();
    cyclic.node("present").require(["a"]);
    cyclic.node("a").require(["b"]);
    cyclic.node("b").require(["a"]);
    match cyclic.compile(None, &ctx.device) {
        Err(GraphicsError::Graph(GraphError::CyclicDependency { passes })) => {
            assert!(passes.contains(&"a".to_string()));
            assert!(passes.contains(&"b".to_string()));
        }
        other => panic!("expected a cycle, got {:?}", other.map(|g| g.root().to_string())),
    }

    let mut compute_root = Renderer::new();
    compute_root.node("blur").compute_pass(true);
    assert!(matches!(
        compute_root.compile(Some(TextureFormat::Bgra8Unorm), &ctx.device),
        Err(GraphicsError::Graph(GraphError::ComputePresentTarget { .. }))
    ));
    assert_eq!(ctx.device.render_pass_count(), 0);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_teardown_releases_every_allocation(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        skip(backend);
        return;
    };
    let TestContext {
        instance,
        device,
        jobs,
        ..
    } = ctx;
    let backend = Arc::clone(instance.backend());

    let log = EventLog::new();
    let mut renderer = deferred_renderer(&log);
    renderer.node("resolve").render_pass(SamplingPass::default);
    let graph = renderer.compile(None, &device).unwrap();
    let mut frame_graph = redgraph_graphics::FrameGraph::headless(
        Arc::clone(&device),
        graph,
        VIEWPORT,
        Arc::clone(&jobs),
    )
    .unwrap();
    for _ in 0..3 {
        frame_graph.render_frame().unwrap();
    }
    frame_graph.resize(Extent2d::new(100, 100)).unwrap();
    frame_graph.render_frame().unwrap();
    assert!(backend.outstanding_allocations() > 0);

    drop(frame_graph);
    // Retired images are still queued until the device flushes on drop.
    drop(device);
    assert_eq!(instance.device_count(), 0);
    assert_eq!(backend.outstanding_allocations(), 0);
}
