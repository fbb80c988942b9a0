//! Type conversions between redgraph types and Vulkan types.

use ash::vk;

use crate::backend::WaitStage;
use crate::descriptor::{BindingType, ShaderStageFlags};
use crate::error::GraphicsError;
use crate::surface::PresentMode;
use crate::types::{
    AddressMode, BufferUsage, ClearValue, CompareFunction, FilterMode, TextureFormat, TextureUsage,
};

/// Convert BufferUsage flags to Vulkan buffer usage flags.
pub fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut result = vk::BufferUsageFlags::empty();

    if usage.contains(BufferUsage::VERTEX) {
        result |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        result |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        result |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        result |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        result |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        result |= vk::BufferUsageFlags::TRANSFER_DST;
    }

    result
}

/// Convert TextureFormat to Vulkan format.
pub fn convert_texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,

        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::R32Uint => vk::Format::R32_UINT,
        TextureFormat::Rg16Float => vk::Format::R16G16_SFLOAT,
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::Rgb10A2Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,

        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,

        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,

        TextureFormat::Depth16Unorm => vk::Format::D16_UNORM,
        TextureFormat::Depth24PlusStencil8 => vk::Format::D24_UNORM_S8_UINT,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
        TextureFormat::Depth32FloatStencil8 => vk::Format::D32_SFLOAT_S8_UINT,
    }
}

/// Map a surface format back to a [`TextureFormat`].
///
/// Only color formats a swapchain can report are recognized.
pub fn texture_format_from_vk(format: vk::Format) -> Option<TextureFormat> {
    match format {
        vk::Format::B8G8R8A8_UNORM => Some(TextureFormat::Bgra8Unorm),
        vk::Format::B8G8R8A8_SRGB => Some(TextureFormat::Bgra8UnormSrgb),
        vk::Format::R8G8B8A8_UNORM => Some(TextureFormat::Rgba8Unorm),
        vk::Format::R8G8B8A8_SRGB => Some(TextureFormat::Rgba8UnormSrgb),
        vk::Format::A2B10G10R10_UNORM_PACK32 => Some(TextureFormat::Rgb10A2Unorm),
        vk::Format::R16G16B16A16_SFLOAT => Some(TextureFormat::Rgba16Float),
        _ => None,
    }
}

/// Convert TextureUsage flags to Vulkan image usage flags.
///
/// The format is needed to determine whether RENDER_ATTACHMENT should map to
/// COLOR_ATTACHMENT or DEPTH_STENCIL_ATTACHMENT.
pub fn convert_texture_usage(usage: TextureUsage, format: TextureFormat) -> vk::ImageUsageFlags {
    let mut result = vk::ImageUsageFlags::empty();

    if usage.contains(TextureUsage::COPY_SRC) {
        result |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        result |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        result |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::STORAGE_BINDING) {
        result |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        if format.is_depth_stencil() {
            result |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        } else {
            result |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
    }

    result
}

/// Aspect covered by the default view of an image of `format`.
pub fn aspect_mask(format: TextureFormat) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth_stencil() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Convert FilterMode to Vulkan filter.
pub fn convert_filter_mode(mode: FilterMode) -> vk::Filter {
    match mode {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

/// Convert FilterMode to Vulkan mipmap filter mode.
pub fn convert_mipmap_filter_mode(mode: FilterMode) -> vk::SamplerMipmapMode {
    match mode {
        FilterMode::Nearest => vk::SamplerMipmapMode::NEAREST,
        FilterMode::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

/// Convert AddressMode to Vulkan sampler address mode.
pub fn convert_address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirrorRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
    }
}

/// Convert CompareFunction to Vulkan compare op.
pub fn convert_compare_function(func: CompareFunction) -> vk::CompareOp {
    match func {
        CompareFunction::Never => vk::CompareOp::NEVER,
        CompareFunction::Less => vk::CompareOp::LESS,
        CompareFunction::Equal => vk::CompareOp::EQUAL,
        CompareFunction::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareFunction::Greater => vk::CompareOp::GREATER,
        CompareFunction::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareFunction::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareFunction::Always => vk::CompareOp::ALWAYS,
    }
}

/// Convert a clear value to its Vulkan union.
///
/// `ClearValue::None` becomes zero; it is ignored by attachments that load.
pub fn convert_clear_value(value: &ClearValue) -> vk::ClearValue {
    match *value {
        ClearValue::None => vk::ClearValue::default(),
        ClearValue::Color { r, g, b, a } => vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [r, g, b, a],
            },
        },
        ClearValue::Depth(depth) => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
        },
        ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
        },
    }
}

/// Convert PresentMode to Vulkan present mode.
pub fn convert_present_mode(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
    }
}

pub fn convert_wait_stage(stage: WaitStage) -> vk::PipelineStageFlags {
    match stage {
        WaitStage::ColorAttachmentOutput => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        WaitStage::AllCommands => vk::PipelineStageFlags::ALL_COMMANDS,
    }
}

pub fn convert_binding_type(binding_type: BindingType) -> vk::DescriptorType {
    match binding_type {
        BindingType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        BindingType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        BindingType::Texture => vk::DescriptorType::SAMPLED_IMAGE,
        BindingType::StorageTexture => vk::DescriptorType::STORAGE_IMAGE,
        BindingType::Sampler => vk::DescriptorType::SAMPLER,
        BindingType::CombinedTextureSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    }
}

pub fn convert_shader_stages(stages: ShaderStageFlags) -> vk::ShaderStageFlags {
    let mut result = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStageFlags::VERTEX) {
        result |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStageFlags::FRAGMENT) {
        result |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStageFlags::COMPUTE) {
        result |= vk::ShaderStageFlags::COMPUTE;
    }
    result
}

/// Map a Vulkan error to the graphics error taxonomy.
pub fn convert_vk_error(result: vk::Result, what: &str) -> GraphicsError {
    match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            GraphicsError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DATE_KHR => GraphicsError::SurfaceOutdated,
        vk::Result::ERROR_SURFACE_LOST_KHR => GraphicsError::SurfaceLost,
        other => GraphicsError::Internal(format!("{what}: {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_formats_map_back() {
        for format in [
            TextureFormat::Bgra8Unorm,
            TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Rgba8Unorm,
            TextureFormat::Rgb10A2Unorm,
        ] {
            assert_eq!(texture_format_from_vk(convert_texture_format(format)), Some(format));
        }
        assert_eq!(texture_format_from_vk(vk::Format::D32_SFLOAT), None);
    }

    #[test]
    fn test_depth_usage_maps_to_depth_attachment() {
        let usage = convert_texture_usage(
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            TextureFormat::Depth32Float,
        );
        assert!(usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
        assert!(usage.contains(vk::ImageUsageFlags::SAMPLED));
        assert!(!usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            convert_vk_error(vk::Result::ERROR_OUT_OF_DATE_KHR, "acquire"),
            GraphicsError::SurfaceOutdated
        );
        assert_eq!(
            convert_vk_error(vk::Result::ERROR_DEVICE_LOST, "submit"),
            GraphicsError::DeviceLost
        );
    }
}
