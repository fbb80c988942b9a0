//! Vulkan physical and logical device management.

use ash::vk;

use crate::error::GraphicsError;

/// Select the best physical device for rendering.
///
/// Prefers discrete GPUs over integrated GPUs.
pub fn select_physical_device(
    instance: &ash::Instance,
) -> Result<vk::PhysicalDevice, GraphicsError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        GraphicsError::InitializationFailed(format!(
            "Failed to enumerate physical devices: {:?}",
            e
        ))
    })?;

    if devices.is_empty() {
        return Err(GraphicsError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best_device = None;
    let mut best_score = 0;

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        if find_graphics_queue_family(instance, device).is_err() {
            continue;
        }

        let mut score = 1;
        if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 1000;
        } else if properties.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            score += 100;
        }
        score += properties.limits.max_image_dimension2_d / 1024;

        log::info!(
            "Found GPU: {:?} (type: {:?}, score: {})",
            properties.device_name_as_c_str().unwrap_or(c"<unnamed>"),
            properties.device_type,
            score
        );

        if score > best_score {
            best_score = score;
            best_device = Some(device);
        }
    }

    best_device
        .ok_or_else(|| GraphicsError::InitializationFailed("No suitable GPU found".to_string()))
}

/// Find a queue family that supports graphics and compute.
pub fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<u32, GraphicsError> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    queue_families
        .iter()
        .position(|family| {
            family
                .queue_flags
                .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .map(|index| index as u32)
        .ok_or_else(|| {
            GraphicsError::InitializationFailed("No graphics queue family found".to_string())
        })
}

/// Create a logical device with the swapchain extension.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    graphics_queue_family: u32,
) -> Result<ash::Device, GraphicsError> {
    let queue_priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(graphics_queue_family)
        .queue_priorities(&queue_priorities)];

    let device_extensions = [ash::khr::swapchain::NAME.as_ptr()];

    let supported = unsafe { instance.get_physical_device_features(physical_device) };
    let features = vk::PhysicalDeviceFeatures::default()
        .sampler_anisotropy(supported.sampler_anisotropy == vk::TRUE);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .enabled_features(&features);

    unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create logical device: {:?}", e))
    })
}
