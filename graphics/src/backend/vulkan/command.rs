//! Vulkan command pool and buffer management.

use ash::vk;
use parking_lot::Mutex;

use crate::backend::CommandBufferLevel;
use crate::error::GraphicsError;

use super::conversion::convert_vk_error;

/// Create a command pool whose buffers can be reset individually.
pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> Result<vk::CommandPool, GraphicsError> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
        GraphicsError::ResourceCreationFailed(format!("Failed to create command pool: {:?}", e))
    })
}

/// Allocate one command buffer from `pool`.
pub fn allocate_command_buffer(
    device: &ash::Device,
    pool: vk::CommandPool,
    level: CommandBufferLevel,
) -> Result<vk::CommandBuffer, GraphicsError> {
    let level = match level {
        CommandBufferLevel::Primary => vk::CommandBufferLevel::PRIMARY,
        CommandBufferLevel::Secondary => vk::CommandBufferLevel::SECONDARY,
    };
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(level)
        .command_buffer_count(1);

    let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }.map_err(|e| {
        GraphicsError::ResourceCreationFailed(format!(
            "Failed to allocate command buffer: {:?}",
            e
        ))
    })?;
    buffers.into_iter().next().ok_or_else(|| {
        GraphicsError::Internal("Driver returned no command buffer".to_string())
    })
}

/// Record commands into a throwaway primary buffer, submit them and wait for
/// the queue to finish them.
pub fn submit_immediate<F>(
    device: &ash::Device,
    queue: &Mutex<vk::Queue>,
    queue_family_index: u32,
    record: F,
) -> Result<(), GraphicsError>
where
    F: FnOnce(vk::CommandBuffer),
{
    let pool = create_command_pool(device, queue_family_index)?;
    let result = record_and_wait(device, queue, pool, record);
    // Frees the command buffer as well.
    unsafe { device.destroy_command_pool(pool, None) };
    result
}

fn record_and_wait<F>(
    device: &ash::Device,
    queue: &Mutex<vk::Queue>,
    pool: vk::CommandPool,
    record: F,
) -> Result<(), GraphicsError>
where
    F: FnOnce(vk::CommandBuffer),
{
    let cmd = allocate_command_buffer(device, pool, CommandBufferLevel::Primary)?;
    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe { device.begin_command_buffer(cmd, &begin_info) }
        .map_err(|e| convert_vk_error(e, "Failed to begin immediate commands"))?;
    record(cmd);
    unsafe { device.end_command_buffer(cmd) }
        .map_err(|e| convert_vk_error(e, "Failed to end immediate commands"))?;

    let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
        .map_err(|e| convert_vk_error(e, "Failed to create fence"))?;
    let submit_info = vk::SubmitInfo::default().command_buffers(std::slice::from_ref(&cmd));
    let submitted = {
        let queue = queue.lock();
        unsafe { device.queue_submit(*queue, std::slice::from_ref(&submit_info), fence) }
    };
    let result = submitted
        .map_err(|e| convert_vk_error(e, "Failed to submit immediate commands"))
        .and_then(|()| {
            unsafe { device.wait_for_fences(&[fence], true, u64::MAX) }
                .map_err(|e| convert_vk_error(e, "Failed to wait for immediate commands"))
        });
    unsafe { device.destroy_fence(fence, None) };
    result
}
