//! Surfaces and swapchains.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::backend::{AcquiredImage, GpuImage, GpuSurface, GpuSwapchain, SurfaceTarget};
use crate::error::GraphicsError;
use crate::surface::SurfaceConfiguration;
use crate::types::{Extent2d, TextureFormat};

use super::VulkanContext;
use super::conversion::{
    convert_present_mode, convert_texture_format, convert_vk_error, texture_format_from_vk,
};

pub fn create_surface(
    ctx: &Arc<VulkanContext>,
    target: &SurfaceTarget,
) -> Result<GpuSurface, GraphicsError> {
    let SurfaceTarget::Window { display, window } = *target else {
        return Err(GraphicsError::InvalidParameter(
            "headless surfaces are only available on the dummy backend".to_string(),
        ));
    };

    let surface = unsafe {
        ash_window::create_surface(&ctx.entry, &ctx.instance, display, window, None)
    }
    .map_err(|e| {
        GraphicsError::ResourceCreationFailed(format!("Failed to create surface: {:?}", e))
    })?;

    let supported = unsafe {
        ctx.surface_loader.get_physical_device_surface_support(
            ctx.physical_device,
            ctx.queue_family,
            surface,
        )
    }
    .unwrap_or(false);
    if !supported {
        unsafe { ctx.surface_loader.destroy_surface(surface, None) };
        return Err(GraphicsError::ResourceCreationFailed(
            "Graphics queue cannot present to this surface".to_string(),
        ));
    }

    Ok(GpuSurface::Vulkan {
        ctx: Arc::clone(ctx),
        surface,
    })
}

fn raw_surface(surface: &GpuSurface) -> Result<vk::SurfaceKHR, GraphicsError> {
    match surface {
        GpuSurface::Vulkan { surface, .. } => Ok(*surface),
        other => Err(GraphicsError::InvalidParameter(format!(
            "{:?} does not belong to the Vulkan backend",
            other
        ))),
    }
}

fn capabilities(
    ctx: &VulkanContext,
    surface: vk::SurfaceKHR,
) -> Result<vk::SurfaceCapabilitiesKHR, GraphicsError> {
    unsafe {
        ctx.surface_loader
            .get_physical_device_surface_capabilities(ctx.physical_device, surface)
    }
    .map_err(|e| convert_vk_error(e, "Failed to get surface capabilities"))
}

fn surface_formats_raw(
    ctx: &VulkanContext,
    surface: vk::SurfaceKHR,
) -> Result<Vec<vk::SurfaceFormatKHR>, GraphicsError> {
    unsafe {
        ctx.surface_loader
            .get_physical_device_surface_formats(ctx.physical_device, surface)
    }
    .map_err(|e| convert_vk_error(e, "Failed to get surface formats"))
}

pub fn surface_formats(
    ctx: &VulkanContext,
    surface: &GpuSurface,
) -> Result<Vec<TextureFormat>, GraphicsError> {
    let formats = surface_formats_raw(ctx, raw_surface(surface)?)?;
    Ok(formats
        .iter()
        .filter_map(|format| texture_format_from_vk(format.format))
        .collect())
}

/// Current extent, or the minimum extent when the window leaves it to the
/// swapchain.
pub fn surface_extent(
    ctx: &VulkanContext,
    surface: &GpuSurface,
) -> Result<Extent2d, GraphicsError> {
    let caps = capabilities(ctx, raw_surface(surface)?)?;
    let extent = if caps.current_extent.width == u32::MAX {
        caps.min_image_extent
    } else {
        caps.current_extent
    };
    Ok(Extent2d::new(extent.width, extent.height))
}

pub fn create_swapchain(
    ctx: &Arc<VulkanContext>,
    surface: &GpuSurface,
    config: &SurfaceConfiguration,
    old: Option<&GpuSwapchain>,
) -> Result<(GpuSwapchain, Vec<GpuImage>), GraphicsError> {
    let surface = raw_surface(surface)?;
    let caps = capabilities(ctx, surface)?;

    let formats = surface_formats_raw(ctx, surface)?;
    let wanted = convert_texture_format(config.format);
    let surface_format = match formats.iter().find(|f| f.format == wanted) {
        Some(format) => *format,
        None => {
            let fallback = formats.first().copied().ok_or_else(|| {
                GraphicsError::ResourceCreationFailed("Surface reports no formats".to_string())
            })?;
            log::warn!(
                "Surface format {:?} not supported, using {:?}",
                config.format,
                fallback.format
            );
            fallback
        }
    };
    let format = texture_format_from_vk(surface_format.format).unwrap_or(config.format);

    let present_modes = unsafe {
        ctx.surface_loader
            .get_physical_device_surface_present_modes(ctx.physical_device, surface)
    }
    .map_err(|e| convert_vk_error(e, "Failed to get present modes"))?;
    let wanted_mode = convert_present_mode(config.present_mode);
    let present_mode = if present_modes.contains(&wanted_mode) {
        wanted_mode
    } else {
        log::warn!(
            "Present mode {:?} not supported, falling back to FIFO",
            config.present_mode
        );
        vk::PresentModeKHR::FIFO
    };

    let extent = if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: config.extent.width.clamp(
                caps.min_image_extent.width,
                caps.max_image_extent.width,
            ),
            height: config.extent.height.clamp(
                caps.min_image_extent.height,
                caps.max_image_extent.height,
            ),
        }
    };

    if extent.width == 0 || extent.height == 0 {
        return Err(GraphicsError::SurfaceOutdated);
    }

    let max_images = if caps.max_image_count > 0 {
        caps.max_image_count
    } else {
        u32::MAX
    };
    let image_count = config.image_count.clamp(caps.min_image_count, max_images);

    let old_swapchain = match old {
        Some(GpuSwapchain::Vulkan { swapchain, .. }) => *swapchain,
        _ => vk::SwapchainKHR::null(),
    };

    let create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(surface)
        .min_image_count(image_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .pre_transform(caps.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain);

    let swapchain = unsafe { ctx.swapchain_loader.create_swapchain(&create_info, None) }
        .map_err(|e| convert_vk_error(e, "Failed to create swapchain"))?;
    let handle = GpuSwapchain::Vulkan {
        ctx: Arc::clone(ctx),
        swapchain,
    };

    let raw_images = unsafe { ctx.swapchain_loader.get_swapchain_images(swapchain) }
        .map_err(|e| convert_vk_error(e, "Failed to get swapchain images"))?;

    let extent = Extent2d::new(extent.width, extent.height);
    let mut images = Vec::with_capacity(raw_images.len());
    for image in raw_images {
        let view = ctx.create_view(image, surface_format.format, format)?;
        images.push(GpuImage::Vulkan {
            ctx: Arc::clone(ctx),
            image,
            view,
            allocation: Mutex::new(None),
            owned: false,
            format: surface_format.format,
            extent,
        });
    }

    log::info!(
        "Vulkan swapchain created: {} images, {}, {:?}, {:?}",
        images.len(),
        extent,
        surface_format.format,
        present_mode
    );
    Ok((handle, images))
}

pub fn acquire_next_image(
    ctx: &VulkanContext,
    swapchain: &GpuSwapchain,
    signal: vk::Semaphore,
) -> Result<AcquiredImage, GraphicsError> {
    let GpuSwapchain::Vulkan { swapchain, .. } = swapchain else {
        return Err(GraphicsError::InvalidParameter(
            "swapchain does not belong to the Vulkan backend".to_string(),
        ));
    };

    match unsafe {
        ctx.swapchain_loader
            .acquire_next_image(*swapchain, u64::MAX, signal, vk::Fence::null())
    } {
        Ok((index, suboptimal)) => Ok(AcquiredImage { index, suboptimal }),
        Err(e) => Err(convert_vk_error(e, "Failed to acquire swapchain image")),
    }
}

pub fn present(
    ctx: &VulkanContext,
    swapchain: &GpuSwapchain,
    image_index: u32,
    wait: &[vk::Semaphore],
) -> Result<bool, GraphicsError> {
    let GpuSwapchain::Vulkan { swapchain, .. } = swapchain else {
        return Err(GraphicsError::InvalidParameter(
            "swapchain does not belong to the Vulkan backend".to_string(),
        ));
    };

    let swapchains = [*swapchain];
    let indices = [image_index];
    let present_info = vk::PresentInfoKHR::default()
        .wait_semaphores(wait)
        .swapchains(&swapchains)
        .image_indices(&indices);

    let queue = ctx.queue.lock();
    match unsafe { ctx.swapchain_loader.queue_present(*queue, &present_info) } {
        Ok(suboptimal) => Ok(suboptimal),
        Err(vk::Result::SUBOPTIMAL_KHR) => Ok(true),
        Err(e) => Err(convert_vk_error(e, "Failed to present")),
    }
}
