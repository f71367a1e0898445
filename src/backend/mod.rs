// Backend module - native API abstraction layer
//
// Design: the facade in `crate::Device` owns every native object and hands
// it back to the backend by reference for recording and by value for
// destruction. Backends never keep references to facade state.
//
// - `headless`: host-simulated GPU, always built, used by tests
// - `vulkan`: ash + gpu-allocator, behind the `vulkan` feature

use std::ptr::NonNull;

use crate::error::BackendError;
use crate::types::{
    AcquiredImage, BufferCreateInfo, ClearValue, DeviceLimits, Extent2D, PresentStatus,
    SamplerState, SwapchainCreateInfo, TextureCreateInfo, TextureFormat, WaitStage,
};

pub mod headless;
#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use headless::{HeadlessBackend, HeadlessConfig, HeadlessStats, LiveObjects};
#[cfg(feature = "vulkan")]
pub use vulkan::{Instance, Surface, VulkanBackend};

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// One region of a buffer-to-buffer copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRegion {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

/// Properties of a swapchain fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub image_count: u32,
    pub extent: Extent2D,
    pub format: TextureFormat,
}

/// A single queue submission of one command buffer.
pub struct Submission<'a, B: Backend + ?Sized> {
    pub command_buffer: &'a B::CommandBuffer,
    /// Semaphore to wait on, and the stage that waits.
    pub wait: Option<(&'a B::Semaphore, WaitStage)>,
    pub signal: Option<&'a B::Semaphore>,
    pub fence: Option<&'a B::Fence>,
}

/// Native operations the device facade is built on.
///
/// All calls come from the single thread that owns the `Device`.
pub trait Backend {
    type Buffer;
    type Image;
    type ImageView;
    type Sampler;
    type CommandPool;
    type CommandBuffer;
    type Fence;
    type Semaphore;
    type Swapchain;
    type RenderPass;
    type Framebuffer;
    type ShaderModule;

    fn name(&self) -> &'static str;
    fn limits(&self) -> DeviceLimits;
    /// Whether `format` can be used as an optimally tiled depth attachment.
    fn supports_depth_format(&self, format: TextureFormat) -> bool;

    // Buffers. Host-visible buffers come back with their persistent mapping.
    fn create_buffer(
        &mut self,
        info: &BufferCreateInfo,
    ) -> BackendResult<(Self::Buffer, Option<NonNull<u8>>)>;
    fn destroy_buffer(&mut self, buffer: Self::Buffer);

    // Images, views and samplers
    fn create_image(&mut self, info: &TextureCreateInfo) -> BackendResult<Self::Image>;
    fn destroy_image(&mut self, image: Self::Image);
    fn create_image_view(
        &mut self,
        image: &Self::Image,
        info: &TextureCreateInfo,
    ) -> BackendResult<Self::ImageView>;
    fn destroy_image_view(&mut self, view: Self::ImageView);
    fn create_sampler(&mut self, state: &SamplerState) -> BackendResult<Self::Sampler>;
    fn destroy_sampler(&mut self, sampler: Self::Sampler);

    // Command pools and buffers
    fn create_command_pool(&mut self) -> BackendResult<Self::CommandPool>;
    fn destroy_command_pool(&mut self, pool: Self::CommandPool);
    fn allocate_command_buffer(
        &mut self,
        pool: &Self::CommandPool,
    ) -> BackendResult<Self::CommandBuffer>;
    fn free_command_buffer(&mut self, pool: &Self::CommandPool, cmd: Self::CommandBuffer);
    fn reset_command_buffer(&mut self, cmd: &Self::CommandBuffer) -> BackendResult<()>;
    fn begin_command_buffer(&mut self, cmd: &Self::CommandBuffer, one_time: bool)
        -> BackendResult<()>;
    fn end_command_buffer(&mut self, cmd: &Self::CommandBuffer) -> BackendResult<()>;

    // Recording
    fn cmd_copy_buffer(
        &mut self,
        cmd: &Self::CommandBuffer,
        src: &Self::Buffer,
        dst: &Self::Buffer,
        regions: &[CopyRegion],
    );
    fn cmd_begin_render_pass(
        &mut self,
        cmd: &Self::CommandBuffer,
        render_pass: &Self::RenderPass,
        framebuffer: &Self::Framebuffer,
        extent: Extent2D,
        clear_values: &[ClearValue],
    );
    fn cmd_end_render_pass(&mut self, cmd: &Self::CommandBuffer);

    // Queues
    fn queue_submit(&mut self, submission: Submission<'_, Self>) -> BackendResult<()>;
    fn queue_wait_idle(&mut self) -> BackendResult<()>;
    fn device_wait_idle(&mut self) -> BackendResult<()>;

    // Synchronization
    fn create_fence(&mut self, signaled: bool) -> BackendResult<Self::Fence>;
    fn destroy_fence(&mut self, fence: Self::Fence);
    fn wait_fence(&mut self, fence: &Self::Fence, timeout_ns: u64) -> BackendResult<()>;
    fn reset_fence(&mut self, fence: &Self::Fence) -> BackendResult<()>;
    fn fence_status(&mut self, fence: &Self::Fence) -> BackendResult<bool>;
    fn create_semaphore(&mut self) -> BackendResult<Self::Semaphore>;
    fn destroy_semaphore(&mut self, semaphore: Self::Semaphore);

    // Presentation
    fn create_swapchain(&mut self, info: &SwapchainCreateInfo) -> BackendResult<Self::Swapchain>;
    fn swapchain_desc(&self, swapchain: &Self::Swapchain) -> SwapchainDesc;
    fn destroy_swapchain(&mut self, swapchain: Self::Swapchain);
    /// `Ok(None)` when the swapchain is out of date.
    fn acquire_next_image(
        &mut self,
        swapchain: &Self::Swapchain,
        timeout_ns: u64,
        signal: &Self::Semaphore,
    ) -> BackendResult<Option<AcquiredImage>>;
    fn queue_present(
        &mut self,
        swapchain: &Self::Swapchain,
        image_index: u32,
        wait: &Self::Semaphore,
    ) -> BackendResult<PresentStatus>;

    // Render passes, framebuffers, shaders
    fn create_render_pass(
        &mut self,
        color_format: TextureFormat,
        depth_format: Option<TextureFormat>,
    ) -> BackendResult<Self::RenderPass>;
    fn destroy_render_pass(&mut self, render_pass: Self::RenderPass);
    fn create_framebuffer(
        &mut self,
        render_pass: &Self::RenderPass,
        swapchain: &Self::Swapchain,
        image_index: u32,
        depth: Option<&Self::ImageView>,
    ) -> BackendResult<Self::Framebuffer>;
    fn destroy_framebuffer(&mut self, framebuffer: Self::Framebuffer);
    fn create_shader_module(&mut self, words: &[u32]) -> BackendResult<Self::ShaderModule>;
    fn destroy_shader_module(&mut self, module: Self::ShaderModule);
}
