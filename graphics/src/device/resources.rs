//! Device-created resource wrappers.
//!
//! Wrappers own their backend handle and release it on drop. They never hold
//! the device itself; long-lived owners retire them through
//! [`GraphicsDevice::drop_resource`](super::GraphicsDevice::drop_resource) so
//! the release happens once the GPU is done with them.

use crate::backend::{GpuBuffer, GpuFramebuffer, GpuImage, GpuRenderPass, GpuSampler};
use crate::graph::RenderPassKey;
use crate::types::{
    BufferDescriptor, Extent2d, ImageDescriptor, SamplerDescriptor, TextureFormat, TextureUsage,
};

/// A frame-buffered image.
///
/// Pass attachments get one GPU image per frame-in-flight slot so frame `n`
/// can write while frame `n - 1` is still read. [`raw`](Image::raw) selects
/// the copy for a frame index; single-copy images return the same copy for
/// every frame.
pub struct Image {
    descriptor: ImageDescriptor,
    copies: Vec<GpuImage>,
}

impl Image {
    /// Wrap backend images. `copies` must not be empty.
    pub(crate) fn new(descriptor: ImageDescriptor, copies: Vec<GpuImage>) -> Self {
        debug_assert!(!copies.is_empty());
        Self { descriptor, copies }
    }

    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    pub fn extent(&self) -> Extent2d {
        self.descriptor.extent
    }

    pub fn format(&self) -> TextureFormat {
        self.descriptor.format
    }

    pub fn usage(&self) -> TextureUsage {
        self.descriptor.usage
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Number of backing GPU images.
    pub fn copy_count(&self) -> usize {
        self.copies.len()
    }

    /// Whether each frame-in-flight slot has its own copy.
    pub fn is_frame_buffered(&self) -> bool {
        self.copies.len() > 1
    }

    /// Backend image used while recording frame slot `frame`.
    pub fn raw(&self, frame: usize) -> &GpuImage {
        &self.copies[frame % self.copies.len()]
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("label", &self.descriptor.label)
            .field("extent", &self.descriptor.extent)
            .field("format", &self.descriptor.format)
            .field("copies", &self.copies.len())
            .finish()
    }
}

/// A GPU buffer.
#[derive(Debug)]
pub struct Buffer {
    descriptor: BufferDescriptor,
    raw: GpuBuffer,
}

impl Buffer {
    pub(crate) fn new(descriptor: BufferDescriptor, raw: GpuBuffer) -> Self {
        Self { descriptor, raw }
    }

    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    pub fn raw(&self) -> &GpuBuffer {
        &self.raw
    }
}

/// A texture sampler.
#[derive(Debug)]
pub struct Sampler {
    descriptor: SamplerDescriptor,
    raw: GpuSampler,
}

impl Sampler {
    pub(crate) fn new(descriptor: SamplerDescriptor, raw: GpuSampler) -> Self {
        Self { descriptor, raw }
    }

    pub fn descriptor(&self) -> &SamplerDescriptor {
        &self.descriptor
    }

    pub fn raw(&self) -> &GpuSampler {
        &self.raw
    }
}

/// A framebuffer binding one set of attachment images to a render pass.
#[derive(Debug)]
pub struct Framebuffer {
    raw: GpuFramebuffer,
    extent: Extent2d,
}

impl Framebuffer {
    pub(crate) fn new(raw: GpuFramebuffer, extent: Extent2d) -> Self {
        Self { raw, extent }
    }

    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    pub fn raw(&self) -> &GpuFramebuffer {
        &self.raw
    }
}

/// A cached native render pass, shared by every node with the same key.
#[derive(Debug)]
pub struct RenderPassObject {
    key: RenderPassKey,
    raw: GpuRenderPass,
}

impl RenderPassObject {
    pub(crate) fn new(key: RenderPassKey, raw: GpuRenderPass) -> Self {
        Self { key, raw }
    }

    pub fn key(&self) -> &RenderPassKey {
        &self.key
    }

    pub fn raw(&self) -> &GpuRenderPass {
        &self.raw
    }
}

static_assertions::assert_impl_all!(Image: Send, Sync);
static_assertions::assert_impl_all!(Framebuffer: Send, Sync);
static_assertions::assert_impl_all!(RenderPassObject: Send, Sync);
