//! Pass identity and native render-pass keys.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::types::TextureFormat;

/// Identity of one compiled pass.
///
/// The generic name identifies the logical pass across recompilations. The
/// unique id tells apart distinct compiled instances of passes that share a
/// name (two compilations of the same builder, or the same custom sub-graph
/// compiled twice). Equality and hashing use the unique id only.
#[derive(Debug, Clone)]
pub struct RenderPassRef {
    generic_name: Arc<str>,
    unique_id: u64,
}

impl RenderPassRef {
    pub(crate) fn new(generic_name: &str, unique_id: u64) -> Self {
        Self {
            generic_name: Arc::from(generic_name),
            unique_id,
        }
    }

    /// Name the pass was declared under.
    pub fn generic_name(&self) -> &str {
        &self.generic_name
    }

    /// Process-wide unique id assigned at compile time.
    ///
    /// Zero for nodes that have not been compiled yet.
    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }
}

impl PartialEq for RenderPassRef {
    fn eq(&self, other: &Self) -> bool {
        self.unique_id == other.unique_id
    }
}

impl Eq for RenderPassRef {}

impl Hash for RenderPassRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.unique_id.hash(state);
    }
}

impl std::fmt::Display for RenderPassRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.generic_name, self.unique_id)
    }
}

/// Format-normalized description of one attachment inside a [`RenderPassKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentKey {
    /// Attachment format.
    pub format: TextureFormat,
    /// Whether the attachment is cleared on load.
    pub has_clear: bool,
}

/// Hashable description used to share native render-pass objects.
///
/// Clear values and attachment names are not part of the key: two passes
/// whose attachments agree on format and clear policy key identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderPassKey {
    /// Attachments in declaration order.
    pub attachments: Vec<AttachmentKey>,
    /// Whether the single attachment is a presentation image.
    pub present: bool,
    /// Whether depth is reversed.
    pub reversed_z: bool,
}

impl RenderPassKey {
    /// Number of color (non depth/stencil) attachments.
    pub fn color_count(&self) -> usize {
        self.attachments
            .iter()
            .filter(|a| !a.format.is_depth_stencil())
            .count()
    }

    /// Index of the depth/stencil attachment, if any.
    pub fn depth_index(&self) -> Option<usize> {
        self.attachments
            .iter()
            .position(|a| a.format.is_depth_stencil())
    }
}
