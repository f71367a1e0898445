// Render passes, framebuffers and shader modules

use ash::vk;

use super::swapchain::VulkanSwapchain;
use super::{conversion, VulkanBackend};
use crate::backend::BackendResult;
use crate::types::TextureFormat;

impl VulkanBackend {
    /// Single subpass: color cleared and presented, depth cleared and
    /// discarded.
    pub(super) fn create_render_pass_impl(
        &mut self,
        color_format: TextureFormat,
        depth_format: Option<TextureFormat>,
    ) -> BackendResult<vk::RenderPass> {
        // Color attachment (the swapchain image)
        let mut attachments = vec![vk::AttachmentDescription::builder()
            .format(conversion::format(color_format))
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build()];

        if let Some(depth_format) = depth_format {
            attachments.push(
                vk::AttachmentDescription::builder()
                    .format(conversion::format(depth_format))
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::DONT_CARE) // Don't need to store depth
                    .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .build(),
            );
        }

        let color_attachment_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_attachment_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_attachment_refs);
        if depth_format.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_attachment_ref);
        }

        // Wait for the acquire semaphore's stage before writing attachments
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .build();

        let subpasses = [subpass.build()];
        let dependencies = [dependency];
        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        Ok(unsafe { self.device.create_render_pass(&render_pass_info, None) }?)
    }

    pub(super) fn create_framebuffer_impl(
        &mut self,
        render_pass: vk::RenderPass,
        swapchain: &VulkanSwapchain,
        image_index: u32,
        depth: Option<vk::ImageView>,
    ) -> BackendResult<vk::Framebuffer> {
        let mut attachments = vec![swapchain.image_views[image_index as usize]];
        attachments.extend(depth);

        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(swapchain.desc.extent.width)
            .height(swapchain.desc.extent.height)
            .layers(1);

        Ok(unsafe { self.device.create_framebuffer(&framebuffer_info, None) }?)
    }

    pub(super) fn create_shader_module_impl(
        &mut self,
        words: &[u32],
    ) -> BackendResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(words);
        Ok(unsafe { self.device.create_shader_module(&create_info, None) }?)
    }
}
