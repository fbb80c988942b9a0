//! Graphics instance and the runtime frame graph.
//!
//! The [`GraphicsInstance`] is the top-level entry point: it selects a
//! backend and creates [`GraphicsDevice`]s. A [`FrameGraph`] is the live
//! counterpart of a [`CompiledGraph`](crate::graph::CompiledGraph): one
//! [`PassInstance`] per node, resized top-down and rendered bottom-up once
//! per frame.

mod custom;
mod executor;
mod frame_graph;
mod parameters;
mod pass_instance;
mod resize;

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use redgraph_core::jobs::JobSystem;

use crate::backend::{self, GpuBackend};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;

pub use custom::CustomPassList;
pub use frame_graph::{FrameGraph, FrameGraphSurface, FrameIndices, FrameStatus};
pub use parameters::{BackendType, InstanceParameters};
pub use pass_instance::{PassId, PassInstance, PassKind, PassState};

/// The graphics instance owns the backend and creates devices.
///
/// # Thread Safety
///
/// `GraphicsInstance` is `Send + Sync` and can be safely shared across threads.
///
/// # Example
///
/// ```ignore
/// let instance = GraphicsInstance::new(InstanceParameters::new())?;
/// let device = instance.create_device()?;
/// let jobs = instance.create_job_system();
/// ```
pub struct GraphicsInstance {
    params: InstanceParameters,
    /// Devices created by this instance. Weak so dropping the last user runs
    /// the device teardown checks.
    devices: RwLock<Vec<Weak<GraphicsDevice>>>,
    backend: Arc<dyn GpuBackend>,
}

impl GraphicsInstance {
    /// Create a new graphics instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested backend cannot be initialized.
    pub fn new(params: InstanceParameters) -> Result<Arc<Self>, GraphicsError> {
        log::info!("Creating GraphicsInstance ({:?})", params.backend);
        let backend = backend::create_backend(&params)?;
        Ok(Self::with_backend(backend, params))
    }

    /// Create an instance around an existing backend.
    pub fn with_backend(backend: Arc<dyn GpuBackend>, params: InstanceParameters) -> Arc<Self> {
        log::info!("Using GPU backend: {}", backend.name());
        Arc::new(Self {
            params,
            devices: RwLock::new(Vec::new()),
            backend,
        })
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    pub fn parameters(&self) -> &InstanceParameters {
        &self.params
    }

    /// Create a graphics device with `image_count` frames in flight.
    pub fn create_device(&self) -> Result<Arc<GraphicsDevice>, GraphicsError> {
        let device = Arc::new(GraphicsDevice::new(
            Arc::clone(&self.backend),
            self.params.image_count,
        ));
        let mut devices = self.devices.write();
        devices.retain(|device| device.strong_count() > 0);
        devices.push(Arc::downgrade(&device));
        Ok(device)
    }

    /// Number of devices from this instance that are still alive.
    pub fn device_count(&self) -> usize {
        self.devices
            .read()
            .iter()
            .filter(|device| device.strong_count() > 0)
            .count()
    }

    /// Create a job system sized by [`InstanceParameters::worker_threads`].
    pub fn create_job_system(&self) -> Arc<JobSystem> {
        Arc::new(match self.params.worker_threads {
            0 => JobSystem::default_threads(),
            n => JobSystem::new(n),
        })
    }
}

impl std::fmt::Debug for GraphicsInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsInstance")
            .field("backend", &self.backend.name())
            .field("params", &self.params)
            .field("devices", &self.device_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(GraphicsInstance: Send, Sync);
