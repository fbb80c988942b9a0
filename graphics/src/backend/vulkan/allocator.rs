//! GPU memory allocation through gpu-allocator.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};

use crate::error::GraphicsError;

/// Create a memory allocator for the Vulkan device.
pub fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: &ash::Device,
) -> Result<Allocator, GraphicsError> {
    Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device: device.clone(),
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create memory allocator: {}", e))
    })
}

/// Allocate memory for `requirements` and report failures as resource errors.
pub fn allocate(
    allocator: &mut Allocator,
    name: &str,
    requirements: vk::MemoryRequirements,
    location: MemoryLocation,
    linear: bool,
) -> Result<Allocation, GraphicsError> {
    allocator
        .allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(|e| match e {
            gpu_allocator::AllocationError::OutOfMemory => GraphicsError::OutOfMemory,
            other => GraphicsError::ResourceCreationFailed(format!(
                "Failed to allocate memory for '{}': {}",
                name, other
            )),
        })
}
