//! Attachment declarations.

use crate::types::{ClearValue, TextureFormat};

use super::AttachmentKey;

/// A named output image of a pass.
///
/// The format may be left unset on the root pass; compiling against a target
/// format fills it in. Two attachments compare equal when their format and
/// clear policy match; names and clear values do not take part.
///
/// ```ignore
/// renderer
///     .node("gbuffer")
///     .attachment(Attachment::slot("albedo").with_format(TextureFormat::Rgba8Unorm).with_clear_color([0.0; 4]))
///     .attachment(Attachment::slot("depth").with_format(TextureFormat::Depth32Float).with_clear_depth(1.0));
/// ```
#[derive(Debug, Clone)]
pub struct Attachment {
    name: String,
    format: Option<TextureFormat>,
    clear_color: Option<[f32; 4]>,
    clear_depth: Option<f32>,
}

impl Attachment {
    /// Declare an attachment with no format yet.
    pub fn slot(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: None,
            clear_color: None,
            clear_depth: None,
        }
    }

    /// Set the format.
    pub fn with_format(mut self, format: TextureFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Clear to `color` at the start of the pass.
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = Some(color);
        self
    }

    /// Clear depth to `depth` at the start of the pass.
    pub fn with_clear_depth(mut self, depth: f32) -> Self {
        self.clear_depth = Some(depth);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> Option<TextureFormat> {
        self.format
    }

    pub(crate) fn set_format(&mut self, format: TextureFormat) {
        self.format = Some(format);
    }

    /// Whether this attachment is cleared when the pass begins.
    pub fn has_clear(&self) -> bool {
        self.clear_color.is_some() || self.clear_depth.is_some()
    }

    /// Whether the format is a depth/stencil format.
    pub fn is_depth(&self) -> bool {
        self.format.is_some_and(|f| f.is_depth_stencil())
    }

    /// Clear value handed to the render-pass begin.
    ///
    /// Attachments without a clear policy return [`ClearValue::None`].
    pub fn clear_value(&self) -> ClearValue {
        if self.is_depth() {
            match self.clear_depth {
                Some(depth) if self.format.is_some_and(|f| f.has_stencil()) => {
                    ClearValue::DepthStencil { depth, stencil: 0 }
                }
                Some(depth) => ClearValue::Depth(depth),
                None => ClearValue::None,
            }
        } else {
            match self.clear_color {
                Some([r, g, b, a]) => ClearValue::Color { r, g, b, a },
                None => ClearValue::None,
            }
        }
    }

    /// Key used for render-pass sharing. `None` while the format is unresolved.
    pub fn key(&self) -> Option<AttachmentKey> {
        self.format.map(|format| AttachmentKey {
            format,
            has_clear: self.has_clear(),
        })
    }
}

impl PartialEq for Attachment {
    fn eq(&self, other: &Self) -> bool {
        self.format == other.format && self.has_clear() == other.has_clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_clear_value() {
        let a = Attachment::slot("a")
            .with_format(TextureFormat::Rgba8Unorm)
            .with_clear_color([1.0, 0.0, 0.0, 1.0]);
        let b = Attachment::slot("b")
            .with_format(TextureFormat::Rgba8Unorm)
            .with_clear_color([0.0, 0.0, 0.0, 0.0]);
        let c = Attachment::slot("c").with_format(TextureFormat::Rgba8Unorm);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_clear_value_by_kind() {
        let depth = Attachment::slot("depth")
            .with_format(TextureFormat::Depth32Float)
            .with_clear_depth(0.0);
        assert_eq!(depth.clear_value(), ClearValue::Depth(0.0));

        let stencil = Attachment::slot("ds")
            .with_format(TextureFormat::Depth24PlusStencil8)
            .with_clear_depth(1.0);
        assert_eq!(
            stencil.clear_value(),
            ClearValue::DepthStencil {
                depth: 1.0,
                stencil: 0
            }
        );

        let color = Attachment::slot("color").with_format(TextureFormat::Bgra8Unorm);
        assert!(!color.has_clear());
        assert_eq!(color.clear_value(), ClearValue::None);
    }

    #[test]
    fn test_key_requires_format() {
        assert!(Attachment::slot("present").key().is_none());
        let key = Attachment::slot("present")
            .with_format(TextureFormat::Bgra8Unorm)
            .key();
        assert_eq!(
            key,
            Some(AttachmentKey {
                format: TextureFormat::Bgra8Unorm,
                has_clear: false
            })
        );
    }
}
