//! Descriptor-set layouts, the shared pool and set updates.

use ash::vk;

use crate::backend::{DescriptorResource, DescriptorWrite, GpuBuffer, GpuImage, GpuSampler};
use crate::descriptor::{BindingLayout, BindingType};
use crate::error::GraphicsError;

use super::conversion::{convert_binding_type, convert_shader_stages, convert_vk_error};

/// Sets the shared pool can hold before allocation fails.
const MAX_SETS: u32 = 4096;

/// Descriptors of each type the shared pool can hold.
const DESCRIPTORS_PER_TYPE: u32 = 4 * MAX_SETS;

pub fn create_descriptor_pool(device: &ash::Device) -> Result<vk::DescriptorPool, GraphicsError> {
    let pool_sizes = [
        vk::DescriptorType::UNIFORM_BUFFER,
        vk::DescriptorType::STORAGE_BUFFER,
        vk::DescriptorType::SAMPLED_IMAGE,
        vk::DescriptorType::STORAGE_IMAGE,
        vk::DescriptorType::SAMPLER,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    ]
    .map(|ty| vk::DescriptorPoolSize {
        ty,
        descriptor_count: DESCRIPTORS_PER_TYPE,
    });

    let create_info = vk::DescriptorPoolCreateInfo::default()
        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        .max_sets(MAX_SETS)
        .pool_sizes(&pool_sizes);

    unsafe { device.create_descriptor_pool(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create descriptor pool: {:?}", e))
    })
}

pub fn create_descriptor_set_layout(
    device: &ash::Device,
    layout: &BindingLayout,
) -> Result<vk::DescriptorSetLayout, GraphicsError> {
    let bindings: Vec<_> = layout
        .entries
        .iter()
        .map(|entry| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(entry.binding)
                .descriptor_type(convert_binding_type(entry.binding_type))
                .descriptor_count(1)
                .stage_flags(convert_shader_stages(entry.visibility))
        })
        .collect();

    let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    unsafe { device.create_descriptor_set_layout(&create_info, None) }
        .map_err(|e| convert_vk_error(e, "Failed to create descriptor set layout"))
}

pub fn allocate_descriptor_set(
    device: &ash::Device,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
) -> Result<vk::DescriptorSet, GraphicsError> {
    let layouts = [layout];
    let alloc_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(&layouts);

    let sets = unsafe { device.allocate_descriptor_sets(&alloc_info) }
        .map_err(|e| convert_vk_error(e, "Failed to allocate descriptor set"))?;
    sets.into_iter()
        .next()
        .ok_or_else(|| GraphicsError::Internal("Driver returned no descriptor set".to_string()))
}

enum Info {
    Image(usize),
    Buffer(usize),
}

/// Write `writes` into `set` with a single `vkUpdateDescriptorSets`.
///
/// Resources from another backend are skipped with an error log.
pub fn update_descriptor_set(
    device: &ash::Device,
    set: vk::DescriptorSet,
    writes: &[DescriptorWrite<'_>],
) {
    let mut image_infos = Vec::with_capacity(writes.len());
    let mut buffer_infos = Vec::with_capacity(writes.len());
    let mut infos = Vec::with_capacity(writes.len());

    for write in writes {
        let info = match write.resource {
            DescriptorResource::Image(image) => image_view(image).map(|view| {
                let layout = if write.binding_type == BindingType::StorageTexture {
                    vk::ImageLayout::GENERAL
                } else {
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                };
                image_infos.push(
                    vk::DescriptorImageInfo::default()
                        .image_view(view)
                        .image_layout(layout),
                );
                Info::Image(image_infos.len() - 1)
            }),
            DescriptorResource::Sampler(sampler) => raw_sampler(sampler).map(|sampler| {
                image_infos.push(vk::DescriptorImageInfo::default().sampler(sampler));
                Info::Image(image_infos.len() - 1)
            }),
            DescriptorResource::ImageSampler(image, sampler) => image_view(image)
                .zip(raw_sampler(sampler))
                .map(|(view, sampler)| {
                    image_infos.push(
                        vk::DescriptorImageInfo::default()
                            .image_view(view)
                            .sampler(sampler)
                            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                    );
                    Info::Image(image_infos.len() - 1)
                }),
            DescriptorResource::Buffer(buffer) => raw_buffer(buffer).map(|(buffer, size)| {
                buffer_infos.push(vk::DescriptorBufferInfo {
                    buffer,
                    offset: 0,
                    range: size,
                });
                Info::Buffer(buffer_infos.len() - 1)
            }),
        };
        match info {
            Some(info) => infos.push((write, info)),
            None => log::error!(
                "Descriptor binding {} holds a resource from another backend",
                write.binding
            ),
        }
    }

    let vk_writes: Vec<_> = infos
        .iter()
        .map(|(write, info)| {
            let base = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(write.binding)
                .descriptor_type(convert_binding_type(write.binding_type));
            match *info {
                Info::Image(index) => base.image_info(std::slice::from_ref(&image_infos[index])),
                Info::Buffer(index) => {
                    base.buffer_info(std::slice::from_ref(&buffer_infos[index]))
                }
            }
        })
        .collect();

    unsafe { device.update_descriptor_sets(&vk_writes, &[]) };
}

fn image_view(image: &GpuImage) -> Option<vk::ImageView> {
    match image {
        GpuImage::Vulkan { view, .. } => Some(*view),
        _ => None,
    }
}

fn raw_sampler(sampler: &GpuSampler) -> Option<vk::Sampler> {
    match sampler {
        GpuSampler::Vulkan { sampler, .. } => Some(*sampler),
        _ => None,
    }
}

fn raw_buffer(buffer: &GpuBuffer) -> Option<(vk::Buffer, u64)> {
    match buffer {
        GpuBuffer::Vulkan { buffer, size, .. } => Some((*buffer, *size)),
        _ => None,
    }
}
