//! Texture formats, usage flags and image descriptors.

use bitflags::bitflags;

use super::Extent2d;

/// Texture format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    // 8-bit formats
    /// 8-bit red channel, unsigned normalized.
    R8Unorm,

    // 32-bit formats
    /// 32-bit red channel, float.
    R32Float,
    /// 32-bit red channel, unsigned integer.
    R32Uint,
    /// 16-bit RG channels, float.
    Rg16Float,
    /// 8-bit RGBA channels, unsigned normalized.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA channels, sRGB.
    Rgba8UnormSrgb,
    /// 8-bit BGRA channels, unsigned normalized.
    Bgra8Unorm,
    /// 8-bit BGRA channels, sRGB.
    Bgra8UnormSrgb,
    /// Packed 10-bit RGB with 2-bit alpha.
    Rgb10A2Unorm,

    // 64-bit formats
    /// 16-bit RGBA channels, float.
    Rgba16Float,

    // 128-bit formats
    /// 32-bit RGBA channels, float.
    Rgba32Float,

    // Depth/stencil formats
    /// 16-bit depth.
    Depth16Unorm,
    /// 24-bit depth with 8-bit stencil.
    Depth24PlusStencil8,
    /// 32-bit depth, float.
    Depth32Float,
    /// 32-bit depth float with 8-bit stencil.
    Depth32FloatStencil8,
}

impl TextureFormat {
    /// Returns true if this is a depth or stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm
                | Self::Depth24PlusStencil8
                | Self::Depth32Float
                | Self::Depth32FloatStencil8
        )
    }

    /// Returns true if this format has a stencil component.
    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::Depth24PlusStencil8 | Self::Depth32FloatStencil8)
    }

    /// Bytes per texel.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::Depth16Unorm => 2,
            Self::R32Float
            | Self::R32Uint
            | Self::Rg16Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Rgb10A2Unorm
            | Self::Depth24PlusStencil8
            | Self::Depth32Float => 4,
            Self::Depth32FloatStencil8 | Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }
}

bitflags! {
    /// Texture usage flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureUsage: u32 {
        /// Texture can be used as a copy source.
        const COPY_SRC = 1 << 0;
        /// Texture can be used as a copy destination.
        const COPY_DST = 1 << 1;
        /// Texture can be sampled in shaders.
        const TEXTURE_BINDING = 1 << 2;
        /// Texture can be used as storage in shaders.
        const STORAGE_BINDING = 1 << 3;
        /// Texture can be used as a render attachment.
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

/// Descriptor for creating a frame-buffered image.
///
/// `copies` is the number of independent GPU images backing the image, one
/// per frame-in-flight slot for pass attachments, one for static images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Image size.
    pub extent: Extent2d,
    /// Texel format.
    pub format: TextureFormat,
    /// Usage flags.
    pub usage: TextureUsage,
    /// Number of per-slot copies.
    pub copies: usize,
}

impl ImageDescriptor {
    /// Create a single-copy 2D image descriptor.
    pub fn new_2d(extent: Extent2d, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            label: None,
            extent,
            format,
            usage,
            copies: 1,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the number of per-slot copies.
    pub fn with_copies(mut self, copies: usize) -> Self {
        self.copies = copies.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_formats() {
        assert!(TextureFormat::Depth32Float.is_depth_stencil());
        assert!(!TextureFormat::Depth32Float.has_stencil());
        assert!(TextureFormat::Depth24PlusStencil8.has_stencil());
        assert!(!TextureFormat::Bgra8Unorm.is_depth_stencil());
    }

    #[test]
    fn test_descriptor_copies_clamped() {
        let desc = ImageDescriptor::new_2d(
            Extent2d::new(4, 4),
            TextureFormat::Rgba16Float,
            TextureUsage::RENDER_ATTACHMENT,
        )
        .with_copies(0);
        assert_eq!(desc.copies, 1);
        assert_eq!(desc.format.block_size(), 8);
    }
}
