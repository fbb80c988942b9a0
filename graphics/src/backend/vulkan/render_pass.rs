//! Native render passes built from [`RenderPassKey`]s.

use ash::vk;

use crate::error::GraphicsError;
use crate::graph::RenderPassKey;

use super::conversion::{convert_texture_format, convert_vk_error};

/// Single-subpass render pass for `key`.
///
/// Offscreen attachments end in `SHADER_READ_ONLY_OPTIMAL` so parents can
/// sample them; the presentation attachment ends in `PRESENT_SRC_KHR`.
/// Loaded attachments also start in `SHADER_READ_ONLY_OPTIMAL`, the layout
/// the previous frame left them in. Images are created in that layout.
pub fn create_render_pass(
    device: &ash::Device,
    key: &RenderPassKey,
) -> Result<vk::RenderPass, GraphicsError> {
    let mut attachments = Vec::with_capacity(key.attachments.len());
    let mut color_refs = Vec::new();
    let mut depth_ref = None;

    for (index, attachment) in key.attachments.iter().enumerate() {
        let depth = attachment.format.is_depth_stencil();
        let load_op = if key.present {
            vk::AttachmentLoadOp::DONT_CARE
        } else if attachment.has_clear {
            vk::AttachmentLoadOp::CLEAR
        } else {
            vk::AttachmentLoadOp::LOAD
        };
        let initial_layout = if load_op == vk::AttachmentLoadOp::LOAD {
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        } else {
            vk::ImageLayout::UNDEFINED
        };
        let final_layout = if key.present {
            vk::ImageLayout::PRESENT_SRC_KHR
        } else {
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        };
        let stencil_load_op = if depth && attachment.format.has_stencil() {
            load_op
        } else {
            vk::AttachmentLoadOp::DONT_CARE
        };

        attachments.push(
            vk::AttachmentDescription::default()
                .format(convert_texture_format(attachment.format))
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(load_op)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(stencil_load_op)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(initial_layout)
                .final_layout(final_layout),
        );

        if depth {
            depth_ref = Some(vk::AttachmentReference {
                attachment: index as u32,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            });
        } else {
            color_refs.push(vk::AttachmentReference {
                attachment: index as u32,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            });
        }
    }

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if let Some(depth_ref) = depth_ref.as_ref() {
        subpass = subpass.depth_stencil_attachment(depth_ref);
    }
    let subpasses = [subpass];

    let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let attachment_writes = vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    let dependencies = [
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(attachment_stages | vk::PipelineStageFlags::FRAGMENT_SHADER)
            .dst_stage_mask(attachment_stages)
            .src_access_mask(vk::AccessFlags::SHADER_READ)
            .dst_access_mask(attachment_writes),
        vk::SubpassDependency::default()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(attachment_stages)
            .dst_stage_mask(
                vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER,
            )
            .src_access_mask(attachment_writes)
            .dst_access_mask(vk::AccessFlags::SHADER_READ),
    ];

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&create_info, None) }
        .map_err(|e| convert_vk_error(e, "Failed to create render pass"))
}
