//! Sampler types and descriptors.

/// Texture filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    /// Nearest-neighbour filtering.
    #[default]
    Nearest,
    /// Linear filtering.
    Linear,
}

/// Texture addressing mode outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    /// Clamp to the edge texel.
    #[default]
    ClampToEdge,
    /// Repeat the texture.
    Repeat,
    /// Repeat with mirroring.
    MirrorRepeat,
}

/// Comparison function for depth samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Descriptor for creating a sampler.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SamplerDescriptor {
    /// Debug label for the sampler.
    pub label: Option<String>,
    /// Address mode for all coordinates.
    pub address_mode: AddressMode,
    /// Magnification filter.
    pub mag_filter: FilterMode,
    /// Minification filter.
    pub min_filter: FilterMode,
    /// Comparison function for depth sampling.
    pub compare: Option<CompareFunction>,
}

impl SamplerDescriptor {
    /// Create a new sampler descriptor with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a linear filtering sampler.
    pub fn linear() -> Self {
        Self {
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            ..Self::default()
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the address mode.
    pub fn with_address_mode(mut self, mode: AddressMode) -> Self {
        self.address_mode = mode;
        self
    }

    /// Enable depth comparison.
    pub fn with_compare(mut self, compare: CompareFunction) -> Self {
        self.compare = Some(compare);
        self
    }
}
