//! Semaphore and fence wrappers.

use std::sync::Arc;

use redgraph_core::profiling::profile_scope;

use crate::backend::{GpuBackend, GpuFence, GpuSemaphore};
use crate::error::GraphicsError;

/// Binary semaphore ordering one submission after another on the GPU.
#[derive(Debug)]
pub struct Semaphore {
    raw: GpuSemaphore,
}

impl Semaphore {
    pub(crate) fn new(raw: GpuSemaphore) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &GpuSemaphore {
        &self.raw
    }

    pub fn id(&self) -> u64 {
        self.raw.id()
    }
}

/// Fence the CPU waits on for a submission to complete.
pub struct Fence {
    backend: Arc<dyn GpuBackend>,
    raw: GpuFence,
}

impl Fence {
    pub(crate) fn new(backend: Arc<dyn GpuBackend>, raw: GpuFence) -> Self {
        Self { backend, raw }
    }

    /// Block until signaled.
    pub fn wait(&self) -> Result<(), GraphicsError> {
        profile_scope!("fence_wait");
        self.backend.wait_fence(&self.raw)
    }

    pub fn reset(&self) -> Result<(), GraphicsError> {
        self.backend.reset_fence(&self.raw)
    }

    pub fn is_signaled(&self) -> Result<bool, GraphicsError> {
        self.backend.is_fence_signaled(&self.raw)
    }

    pub fn raw(&self) -> &GpuFence {
        &self.raw
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence").field("raw", &self.raw).finish()
    }
}
