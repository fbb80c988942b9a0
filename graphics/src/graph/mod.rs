//! Render graph definition.
//!
//! The graph is declared imperatively on a [`Renderer`]: every named
//! [`RenderNode`] lists the passes it requires, the attachments it writes and
//! the strategy object that records it. [`Renderer::compile`] turns the
//! builder into an immutable [`CompiledGraph`] with exactly one root.
//!
//! | Layer | Type | Purpose |
//! |-------|------|---------|
//! | Definition | [`Renderer`], [`RenderNode`] | Mutable declaration (this module) |
//! | Compiled | [`CompiledGraph`] | Validated, ids assigned, formats resolved |
//! | Runtime | [`FrameGraph`](crate::instance::FrameGraph) | Live instances, per-frame execution |
//!
//! # Example
//!
//! ```ignore
//! let mut renderer = Renderer::new();
//! renderer
//!     .node("gbuffer")
//!     .render_pass(GBufferPass::default)
//!     .attachment(Attachment::slot("albedo").with_format(TextureFormat::Rgba8Unorm).with_clear_color([0.0; 4]));
//! renderer.node("resolve").require(["gbuffer"]).render_pass(ResolvePass::default);
//! let graph = renderer.compile(Some(surface_format), &device)?;
//! ```

mod attachment;
mod compiler;
mod key;
mod node;

pub use attachment::Attachment;
pub use compiler::{CompiledGraph, GraphError};
pub(crate) use compiler::next_pass_id;
pub use key::{AttachmentKey, RenderPassKey, RenderPassRef};
pub use node::{PassFactory, RenderNode, Renderer, ResizeCallback};
