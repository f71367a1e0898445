// Vulkan backend
//
// Owns the logical device, its queues and the gpu-allocator instance.
// Drop order matters: the allocator must release its memory blocks before
// the device is destroyed, and the surface and instance outlive both.

use anyhow::Result;
use ash::extensions::khr;
use ash::vk;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;
use std::sync::Arc;

mod buffer;
mod conversion;
mod device;
mod instance;
mod pipeline;
mod swapchain;
mod texture;

pub use buffer::VulkanBuffer;
pub use instance::{Instance, Surface};
pub use swapchain::VulkanSwapchain;
pub use texture::VulkanImage;

use super::{Backend, BackendResult, CopyRegion, Submission, SwapchainDesc};
use crate::types::{
    AcquiredImage, BufferCreateInfo, ClearValue, DeviceCreateInfo, DeviceLimits, Extent2D,
    PresentStatus, SamplerState, SwapchainCreateInfo, TextureCreateInfo, TextureFormat,
};
use instance::InstanceShared;

pub struct VulkanBackend {
    allocator: ManuallyDrop<gpu_allocator::vulkan::Allocator>,
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    swapchain_loader: khr::Swapchain,

    // Queue handles
    graphics_queue: vk::Queue,
    graphics_family: u32,
    present_queue: vk::Queue,
    present_family: u32,

    limits: DeviceLimits,
    surface: Surface,
    instance: Arc<InstanceShared>,
}

impl VulkanBackend {
    pub(crate) fn new(
        instance: &Instance,
        surface: Surface,
        info: &DeviceCreateInfo,
    ) -> Result<Self> {
        let shared = Arc::clone(&instance.shared);
        if !Arc::ptr_eq(&shared, &surface.instance) {
            anyhow::bail!("Surface was created by a different instance");
        }

        let selected =
            device::pick_physical_device(&shared, surface.raw, info.prefer_discrete_gpu)?;
        let (device, graphics_queue, present_queue) =
            device::create_logical_device(&shared, &selected)?;

        let allocator = match device::create_allocator(&shared, selected.physical_device, &device) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };
        let swapchain_loader = khr::Swapchain::new(&shared.raw, &device);

        log::info!(
            "Vulkan device ready: graphics family {}, present family {}, anisotropy {}",
            selected.graphics_family,
            selected.present_family,
            if selected.limits.sampler_anisotropy {
                format!("up to {}x", selected.limits.max_sampler_anisotropy)
            } else {
                "unsupported".to_string()
            }
        );

        Ok(Self {
            allocator: ManuallyDrop::new(allocator),
            device,
            physical_device: selected.physical_device,
            swapchain_loader,
            graphics_queue,
            graphics_family: selected.graphics_family,
            present_queue,
            present_family: selected.present_family,
            limits: selected.limits,
            surface,
            instance: shared,
        })
    }

    /// The logical device, for recording commands this crate does not wrap.
    pub fn raw_device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_family
    }
}

impl Backend for VulkanBackend {
    type Buffer = VulkanBuffer;
    type Image = VulkanImage;
    type ImageView = vk::ImageView;
    type Sampler = vk::Sampler;
    type CommandPool = vk::CommandPool;
    type CommandBuffer = vk::CommandBuffer;
    type Fence = vk::Fence;
    type Semaphore = vk::Semaphore;
    type Swapchain = VulkanSwapchain;
    type RenderPass = vk::RenderPass;
    type Framebuffer = vk::Framebuffer;
    type ShaderModule = vk::ShaderModule;

    fn name(&self) -> &'static str {
        "vulkan"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn supports_depth_format(&self, format: TextureFormat) -> bool {
        self.supports_depth_format_impl(format)
    }

    fn create_buffer(
        &mut self,
        info: &BufferCreateInfo,
    ) -> BackendResult<(VulkanBuffer, Option<NonNull<u8>>)> {
        self.create_buffer_impl(info)
    }

    fn destroy_buffer(&mut self, buffer: VulkanBuffer) {
        self.destroy_buffer_impl(buffer)
    }

    fn create_image(&mut self, info: &TextureCreateInfo) -> BackendResult<VulkanImage> {
        self.create_image_impl(info)
    }

    fn destroy_image(&mut self, image: VulkanImage) {
        self.destroy_image_impl(image)
    }

    fn create_image_view(
        &mut self,
        image: &VulkanImage,
        info: &TextureCreateInfo,
    ) -> BackendResult<vk::ImageView> {
        self.create_image_view_impl(image, info)
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_sampler(&mut self, state: &SamplerState) -> BackendResult<vk::Sampler> {
        self.create_sampler_impl(state)
    }

    fn destroy_sampler(&mut self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) };
    }

    fn create_command_pool(&mut self) -> BackendResult<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.graphics_family);
        Ok(unsafe { self.device.create_command_pool(&create_info, None) }?)
    }

    fn destroy_command_pool(&mut self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffer(
        &mut self,
        pool: &vk::CommandPool,
    ) -> BackendResult<vk::CommandBuffer> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&allocate_info) }?;
        Ok(buffers[0])
    }

    fn free_command_buffer(&mut self, pool: &vk::CommandPool, cmd: vk::CommandBuffer) {
        unsafe { self.device.free_command_buffers(*pool, &[cmd]) };
    }

    fn reset_command_buffer(&mut self, cmd: &vk::CommandBuffer) -> BackendResult<()> {
        Ok(unsafe {
            self.device
                .reset_command_buffer(*cmd, vk::CommandBufferResetFlags::empty())
        }?)
    }

    fn begin_command_buffer(
        &mut self,
        cmd: &vk::CommandBuffer,
        one_time: bool,
    ) -> BackendResult<()> {
        let flags = if one_time {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
        Ok(unsafe { self.device.begin_command_buffer(*cmd, &begin_info) }?)
    }

    fn end_command_buffer(&mut self, cmd: &vk::CommandBuffer) -> BackendResult<()> {
        Ok(unsafe { self.device.end_command_buffer(*cmd) }?)
    }

    fn cmd_copy_buffer(
        &mut self,
        cmd: &vk::CommandBuffer,
        src: &VulkanBuffer,
        dst: &VulkanBuffer,
        regions: &[CopyRegion],
    ) {
        self.cmd_copy_buffer_impl(*cmd, src, dst, regions)
    }

    fn cmd_begin_render_pass(
        &mut self,
        cmd: &vk::CommandBuffer,
        render_pass: &vk::RenderPass,
        framebuffer: &vk::Framebuffer,
        extent: Extent2D,
        clear_values: &[ClearValue],
    ) {
        let clear_values: Vec<vk::ClearValue> = clear_values
            .iter()
            .map(|value| match *value {
                ClearValue::Color(float32) => vk::ClearValue {
                    color: vk::ClearColorValue { float32 },
                },
                ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
                },
            })
            .collect();

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(*render_pass)
            .framebuffer(*framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: conversion::extent(extent),
            })
            .clear_values(&clear_values);

        unsafe {
            self.device
                .cmd_begin_render_pass(*cmd, &begin_info, vk::SubpassContents::INLINE)
        };
    }

    fn cmd_end_render_pass(&mut self, cmd: &vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(*cmd) };
    }

    fn queue_submit(&mut self, submission: Submission<'_, Self>) -> BackendResult<()> {
        let command_buffers = [*submission.command_buffer];
        let (wait_semaphores, wait_stages) = match submission.wait {
            Some((semaphore, stage)) => (vec![*semaphore], vec![conversion::wait_stage(stage)]),
            None => (vec![], vec![]),
        };
        let signal_semaphores: Vec<vk::Semaphore> =
            submission.signal.into_iter().copied().collect();

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let fence = submission.fence.copied().unwrap_or_else(vk::Fence::null);
        Ok(unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info.build()], fence)
        }?)
    }

    fn queue_wait_idle(&mut self) -> BackendResult<()> {
        Ok(unsafe { self.device.queue_wait_idle(self.graphics_queue) }?)
    }

    fn device_wait_idle(&mut self) -> BackendResult<()> {
        Ok(unsafe { self.device.device_wait_idle() }?)
    }

    fn create_fence(&mut self, signaled: bool) -> BackendResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::builder().flags(flags);
        Ok(unsafe { self.device.create_fence(&fence_info, None) }?)
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_fence(&mut self, fence: &vk::Fence, timeout_ns: u64) -> BackendResult<()> {
        Ok(unsafe { self.device.wait_for_fences(&[*fence], true, timeout_ns) }?)
    }

    fn reset_fence(&mut self, fence: &vk::Fence) -> BackendResult<()> {
        Ok(unsafe { self.device.reset_fences(&[*fence]) }?)
    }

    fn fence_status(&mut self, fence: &vk::Fence) -> BackendResult<bool> {
        Ok(unsafe { self.device.get_fence_status(*fence) }?)
    }

    fn create_semaphore(&mut self) -> BackendResult<vk::Semaphore> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        Ok(unsafe { self.device.create_semaphore(&semaphore_info, None) }?)
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_swapchain(&mut self, info: &SwapchainCreateInfo) -> BackendResult<VulkanSwapchain> {
        self.create_swapchain_impl(info)
    }

    fn swapchain_desc(&self, swapchain: &VulkanSwapchain) -> SwapchainDesc {
        swapchain.desc
    }

    fn destroy_swapchain(&mut self, swapchain: VulkanSwapchain) {
        self.destroy_swapchain_impl(swapchain)
    }

    fn acquire_next_image(
        &mut self,
        swapchain: &VulkanSwapchain,
        timeout_ns: u64,
        signal: &vk::Semaphore,
    ) -> BackendResult<Option<AcquiredImage>> {
        self.acquire_next_image_impl(swapchain, timeout_ns, *signal)
    }

    fn queue_present(
        &mut self,
        swapchain: &VulkanSwapchain,
        image_index: u32,
        wait: &vk::Semaphore,
    ) -> BackendResult<PresentStatus> {
        self.queue_present_impl(swapchain, image_index, *wait)
    }

    fn create_render_pass(
        &mut self,
        color_format: TextureFormat,
        depth_format: Option<TextureFormat>,
    ) -> BackendResult<vk::RenderPass> {
        self.create_render_pass_impl(color_format, depth_format)
    }

    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(
        &mut self,
        render_pass: &vk::RenderPass,
        swapchain: &VulkanSwapchain,
        image_index: u32,
        depth: Option<&vk::ImageView>,
    ) -> BackendResult<vk::Framebuffer> {
        self.create_framebuffer_impl(*render_pass, swapchain, image_index, depth.copied())
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_shader_module(&mut self, words: &[u32]) -> BackendResult<vk::ShaderModule> {
        self.create_shader_module_impl(words)
    }

    fn destroy_shader_module(&mut self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) };
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            log::error!("Failed to wait for device idle: {}", e);
        }
        unsafe {
            // Frees the allocator's memory blocks; needs a live device
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
    }
}
