//! Instance creation parameters.

/// Which GPU backend to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendType {
    /// Vulkan if available, otherwise the dummy backend.
    #[default]
    Auto,
    /// Recording backend without a GPU.
    Dummy,
    /// Native Vulkan. Fails if the `vulkan-backend` feature is off.
    Vulkan,
}

/// Parameters for [`GraphicsInstance`](super::GraphicsInstance) creation.
///
/// ```ignore
/// let params = InstanceParameters::new()
///     .with_backend(BackendType::Vulkan)
///     .with_validation(true)
///     .with_image_count(3);
/// let instance = GraphicsInstance::new(params)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceParameters {
    /// Backend selection.
    pub backend: BackendType,
    /// Enable API validation layers and the debug messenger.
    pub validation: bool,
    /// Frames in flight.
    pub image_count: usize,
    /// Job-system worker threads. 0 uses one per core.
    pub worker_threads: usize,
    /// Application name reported to the driver.
    pub application_name: String,
}

impl Default for InstanceParameters {
    fn default() -> Self {
        Self {
            backend: BackendType::Auto,
            validation: cfg!(debug_assertions),
            image_count: 2,
            worker_threads: 0,
            application_name: "redgraph".to_string(),
        }
    }
}

impl InstanceParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the number of frames in flight (at least one).
    pub fn with_image_count(mut self, image_count: usize) -> Self {
        self.image_count = image_count.max(1);
        self
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }
}
