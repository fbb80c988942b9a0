//! Binding layout definitions for descriptor sets.
//!
//! A layout describes what resources a shader expects at each binding. The
//! descriptor cache validates binds against it and the backends translate it
//! into native descriptor-set layouts.

/// Type of resource that can be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    /// Uniform buffer (read-only, small, frequently updated).
    UniformBuffer,

    /// Storage buffer (read-write, larger data).
    StorageBuffer,

    /// Sampled texture (for reading in shaders).
    Texture,

    /// Storage image (compute writes).
    StorageTexture,

    /// Texture sampler.
    Sampler,

    /// Combined texture and sampler.
    CombinedTextureSampler,
}

impl BindingType {
    /// Whether an image is bound at this slot.
    pub fn takes_image(self) -> bool {
        matches!(
            self,
            Self::Texture | Self::StorageTexture | Self::CombinedTextureSampler
        )
    }

    pub fn takes_buffer(self) -> bool {
        matches!(self, Self::UniformBuffer | Self::StorageBuffer)
    }
}

/// Describes a single binding slot in a layout.
#[derive(Debug, Clone)]
pub struct BindingLayoutEntry {
    /// Binding index within the set.
    pub binding: u32,

    /// Type of resource expected at this binding.
    pub binding_type: BindingType,

    /// Shader stages that can access this binding.
    pub visibility: ShaderStageFlags,
}

impl BindingLayoutEntry {
    /// Create a new binding layout entry visible to vertex and fragment stages.
    pub fn new(binding: u32, binding_type: BindingType) -> Self {
        Self {
            binding,
            binding_type,
            visibility: ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT,
        }
    }

    /// Set the shader stage visibility.
    pub fn with_visibility(mut self, visibility: ShaderStageFlags) -> Self {
        self.visibility = visibility;
        self
    }
}

bitflags::bitflags! {
    /// Shader stages that can access a binding.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStageFlags: u32 {
        /// Vertex shader stage.
        const VERTEX = 1 << 0;
        /// Fragment shader stage.
        const FRAGMENT = 1 << 1;
        /// Compute shader stage.
        const COMPUTE = 1 << 2;
    }
}

/// Describes the layout of bindings for a descriptor set.
#[derive(Debug, Clone, Default)]
pub struct BindingLayout {
    /// The binding entries in this layout.
    pub entries: Vec<BindingLayoutEntry>,

    /// Optional label for debugging.
    pub label: Option<String>,
}

impl BindingLayout {
    /// Create a new empty binding layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding entry to the layout.
    pub fn with_entry(mut self, entry: BindingLayoutEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn with_uniform_buffer(self, binding: u32) -> Self {
        self.with_entry(BindingLayoutEntry::new(binding, BindingType::UniformBuffer))
    }

    pub fn with_storage_buffer(self, binding: u32) -> Self {
        self.with_entry(BindingLayoutEntry::new(binding, BindingType::StorageBuffer))
    }

    pub fn with_texture(self, binding: u32) -> Self {
        self.with_entry(BindingLayoutEntry::new(binding, BindingType::Texture))
    }

    pub fn with_storage_texture(self, binding: u32) -> Self {
        self.with_entry(
            BindingLayoutEntry::new(binding, BindingType::StorageTexture)
                .with_visibility(ShaderStageFlags::COMPUTE),
        )
    }

    pub fn with_sampler(self, binding: u32) -> Self {
        self.with_entry(BindingLayoutEntry::new(binding, BindingType::Sampler))
    }

    pub fn with_combined_texture_sampler(self, binding: u32) -> Self {
        self.with_entry(BindingLayoutEntry::new(
            binding,
            BindingType::CombinedTextureSampler,
        ))
    }

    /// Set a debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Look up the entry for `binding`.
    pub fn entry(&self, binding: u32) -> Option<&BindingLayoutEntry> {
        self.entries.iter().find(|e| e.binding == binding)
    }
}
