//! Host-simulated GPU backend.
//!
//! Nothing runs on a real device. Buffer memory is host memory and queue
//! work goes into a FIFO that only executes when the host waits: on a fence,
//! on queue or device idle, or when image acquisition needs a presented image
//! back. Because execution is deferred, any host-side reuse of a resource
//! that is still queued is observable and reported.
//!
//! Misuse that a real driver would leave undefined is reported instead:
//! - resetting, beginning or re-submitting a pending command buffer
//! - signaling a binary semaphore that is already signaled
//! - waiting on a semaphore or fence that nothing will ever signal
//! - destroying a buffer a queued submission still reads or writes

use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;

use super::{Backend, BackendResult, CopyRegion, Submission, SwapchainDesc};
use crate::error::BackendError;
use crate::types::{
    AcquiredImage, BufferCreateInfo, ClearValue, DeviceLimits, Extent2D, PresentStatus,
    SamplerState, SwapchainCreateInfo, TextureCreateInfo, TextureFormat,
};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Simulated device capabilities and fault injection.
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    pub swapchain_image_count: u32,
    /// Fixed surface size. `None` lets the swapchain take the requested size.
    pub surface_extent: Option<Extent2D>,
    pub surface_format: TextureFormat,
    pub sampler_anisotropy: bool,
    pub max_sampler_anisotropy: f32,
    /// Formats usable as depth attachments.
    pub depth_formats: Vec<TextureFormat>,
    /// Image creation succeeds for these formats but view creation fails.
    pub unsupported_view_formats: Vec<TextureFormat>,
    /// Total bytes of buffer and image memory before allocations fail.
    pub device_memory_budget: Option<u64>,
    /// Framebuffer creation fails for this swapchain image index.
    pub fail_framebuffer_at: Option<u32>,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            swapchain_image_count: 3,
            surface_extent: None,
            surface_format: TextureFormat::Bgra8Srgb,
            sampler_anisotropy: true,
            max_sampler_anisotropy: 16.0,
            depth_formats: vec![
                TextureFormat::D32Sfloat,
                TextureFormat::D32SfloatS8Uint,
                TextureFormat::D24UnormS8Uint,
            ],
            unsupported_view_formats: Vec::new(),
            device_memory_budget: None,
            fail_framebuffer_at: None,
        }
    }
}

/// Counters of simulated GPU activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub buffers_created: u64,
    /// Queue submissions accepted.
    pub submissions: u64,
    /// Queue submissions that have run to completion.
    pub executed_submissions: u64,
    pub presents: u64,
    /// Copy commands executed.
    pub buffer_copies: u64,
    /// Render passes executed.
    pub render_passes: u64,
    pub queue_idle_waits: u64,
    pub fence_waits: u64,
}

/// Number of live native objects per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveObjects {
    pub buffers: usize,
    pub images: usize,
    pub image_views: usize,
    pub samplers: usize,
    pub command_pools: usize,
    pub command_buffers: usize,
    pub fences: usize,
    pub semaphores: usize,
    pub swapchains: usize,
    pub render_passes: usize,
    pub framebuffers: usize,
    pub shader_modules: usize,
}

impl LiveObjects {
    pub fn total(&self) -> usize {
        self.buffers
            + self.images
            + self.image_views
            + self.samplers
            + self.command_pools
            + self.command_buffers
            + self.fences
            + self.semaphores
            + self.swapchains
            + self.render_passes
            + self.framebuffers
            + self.shader_modules
    }
}

macro_rules! native_id {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Debug, PartialEq, Eq, Hash)]
            pub struct $name(u64);
        )*
    };
}

native_id!(
    HeadlessBuffer,
    HeadlessImage,
    HeadlessImageView,
    HeadlessSampler,
    HeadlessCommandPool,
    HeadlessCommandBuffer,
    HeadlessFence,
    HeadlessSemaphore,
    HeadlessSwapchain,
    HeadlessRenderPass,
    HeadlessFramebuffer,
    HeadlessShaderModule,
);

// Zero-initialized heap block addressed only through its raw pointer, so the
// mapped pointer handed to the facade stays valid while the queue copies.
struct HostMemory {
    ptr: NonNull<u8>,
    len: usize,
}

impl HostMemory {
    /// `None` when the block cannot be addressed or the host refuses it.
    fn try_zeroed(size: u64) -> Option<Self> {
        let len = usize::try_from(size).ok().filter(|&len| len <= isize::MAX as usize)?;
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len).ok()?;
        bytes.resize(len, 0u8);
        let ptr = NonNull::from(Box::leak(bytes.into_boxed_slice())).cast::<u8>();
        Some(Self { ptr, len })
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
        unsafe { drop(Box::from_raw(slice)) };
    }
}

struct BufferState {
    memory: HostMemory,
    size: u64,
}

struct ImageState {
    bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Initial,
    Recording,
    Executable,
    Pending,
    Invalid,
}

enum Command {
    Copy {
        src: u64,
        dst: u64,
        regions: Vec<CopyRegion>,
    },
    BeginRenderPass,
    EndRenderPass,
}

struct CommandBufferState {
    pool: u64,
    state: RecordState,
    one_time: bool,
    in_render_pass: bool,
    commands: Vec<Command>,
    // Recording commands cannot fail; misuse is reported at end.
    errors: Vec<String>,
}

impl CommandBufferState {
    fn record(&mut self, command: Command) {
        if self.state != RecordState::Recording {
            self.errors
                .push(format!("command recorded in state {:?}", self.state));
        }
        self.commands.push(command);
    }

    fn reset(&mut self) {
        self.state = RecordState::Initial;
        self.in_render_pass = false;
        self.commands.clear();
        self.errors.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Unsignaled,
    Pending,
    Signaled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageSlot {
    Available,
    Acquired,
    Presenting,
}

struct SwapchainState {
    images: Vec<ImageSlot>,
    extent: Extent2D,
    format: TextureFormat,
    next: usize,
    out_of_date: bool,
    suboptimal: bool,
}

struct RenderPassState {
    depth: bool,
}

struct FramebufferState {
    render_pass: u64,
    extent: Extent2D,
}

enum QueueOp {
    Submit { cmd: u64, fence: Option<u64> },
    Present { swapchain: u64, image: usize },
}

/// Host-simulated GPU.
pub struct HeadlessBackend {
    config: HeadlessConfig,
    next_id: u64,
    device_memory_used: u64,

    buffers: HashMap<u64, BufferState>,
    images: HashMap<u64, ImageState>,
    image_views: HashMap<u64, u64>,
    samplers: HashMap<u64, SamplerState>,
    command_pools: HashMap<u64, usize>,
    command_buffers: HashMap<u64, CommandBufferState>,
    fences: HashMap<u64, FenceState>,
    // true once signaled (or a queued operation will signal it) and not yet waited on
    semaphores: HashMap<u64, bool>,
    swapchains: HashMap<u64, SwapchainState>,
    render_passes: HashMap<u64, RenderPassState>,
    framebuffers: HashMap<u64, FramebufferState>,
    shader_modules: HashMap<u64, usize>,

    queue: VecDeque<QueueOp>,
    stats: HeadlessStats,
}

impl HeadlessBackend {
    pub fn new(config: HeadlessConfig) -> Self {
        log::debug!("HeadlessBackend: created with {:?}", config);
        Self {
            config,
            next_id: 1,
            device_memory_used: 0,
            buffers: HashMap::new(),
            images: HashMap::new(),
            image_views: HashMap::new(),
            samplers: HashMap::new(),
            command_pools: HashMap::new(),
            command_buffers: HashMap::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            swapchains: HashMap::new(),
            render_passes: HashMap::new(),
            framebuffers: HashMap::new(),
            shader_modules: HashMap::new(),
            queue: VecDeque::new(),
            stats: HeadlessStats::default(),
        }
    }

    pub fn config(&self) -> &HeadlessConfig {
        &self.config
    }

    pub fn stats(&self) -> HeadlessStats {
        self.stats
    }

    pub fn live_objects(&self) -> LiveObjects {
        LiveObjects {
            buffers: self.buffers.len(),
            images: self.images.len(),
            image_views: self.image_views.len(),
            samplers: self.samplers.len(),
            command_pools: self.command_pools.len(),
            command_buffers: self.command_buffers.len(),
            fences: self.fences.len(),
            semaphores: self.semaphores.len(),
            swapchains: self.swapchains.len(),
            render_passes: self.render_passes.len(),
            framebuffers: self.framebuffers.len(),
            shader_modules: self.shader_modules.len(),
        }
    }

    pub fn device_memory_used(&self) -> u64 {
        self.device_memory_used
    }

    /// Operations submitted but not yet executed.
    pub fn pending_operations(&self) -> usize {
        self.queue.len()
    }

    /// Current contents of a buffer, as the GPU would see them.
    pub fn read_buffer(&self, buffer: &HeadlessBuffer) -> &[u8] {
        self.buffer_state(buffer.0).memory.as_slice()
    }

    /// Resize the surface. Every live swapchain becomes out of date.
    pub fn resize_surface(&mut self, extent: Extent2D) {
        log::debug!("HeadlessBackend: surface resized to {}x{}", extent.width, extent.height);
        self.config.surface_extent = Some(extent);
        for swapchain in self.swapchains.values_mut() {
            swapchain.out_of_date = true;
        }
    }

    /// Report every live swapchain as suboptimal from now on.
    pub fn mark_swapchains_suboptimal(&mut self) {
        for swapchain in self.swapchains.values_mut() {
            swapchain.suboptimal = true;
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn reserve_device_memory(&mut self, bytes: u64) -> BackendResult<()> {
        let used = self
            .device_memory_used
            .checked_add(bytes)
            .ok_or(BackendError::OutOfDeviceMemory)?;
        if self.config.device_memory_budget.is_some_and(|budget| used > budget) {
            return Err(BackendError::OutOfDeviceMemory);
        }
        self.device_memory_used = used;
        Ok(())
    }

    fn buffer_state(&self, id: u64) -> &BufferState {
        self.buffers
            .get(&id)
            .unwrap_or_else(|| panic!("unknown headless buffer {}", id))
    }

    fn command_buffer_state(&mut self, id: u64) -> &mut CommandBufferState {
        self.command_buffers
            .get_mut(&id)
            .unwrap_or_else(|| panic!("unknown headless command buffer {}", id))
    }

    fn queued_use_of_buffer(&self, buffer: u64) -> bool {
        self.queue.iter().any(|op| match op {
            QueueOp::Submit { cmd, .. } => self.command_buffers[cmd].commands.iter().any(|c| {
                matches!(c, Command::Copy { src, dst, .. } if *src == buffer || *dst == buffer)
            }),
            QueueOp::Present { .. } => false,
        })
    }

    fn execute_next(&mut self) -> bool {
        let Some(op) = self.queue.pop_front() else {
            return false;
        };

        match op {
            QueueOp::Submit { cmd, fence } => {
                let state = self
                    .command_buffers
                    .get_mut(&cmd)
                    .unwrap_or_else(|| panic!("command buffer {} freed while pending", cmd));

                for command in &state.commands {
                    match command {
                        Command::Copy { src, dst, regions } => {
                            let src = &self.buffers[src].memory;
                            let dst = &self.buffers[dst].memory;
                            for region in regions {
                                // Source and destination may be the same buffer.
                                unsafe {
                                    std::ptr::copy(
                                        src.ptr.as_ptr().add(region.src_offset as usize),
                                        dst.ptr.as_ptr().add(region.dst_offset as usize),
                                        region.size as usize,
                                    );
                                }
                            }
                            self.stats.buffer_copies += 1;
                        }
                        Command::BeginRenderPass => self.stats.render_passes += 1,
                        Command::EndRenderPass => {}
                    }
                }

                state.state = if state.one_time {
                    RecordState::Invalid
                } else {
                    RecordState::Executable
                };

                if let Some(fence) = fence {
                    if let Some(state) = self.fences.get_mut(&fence) {
                        *state = FenceState::Signaled;
                    }
                }
                self.stats.executed_submissions += 1;
            }
            QueueOp::Present { swapchain, image } => {
                if let Some(swapchain) = self.swapchains.get_mut(&swapchain) {
                    swapchain.images[image] = ImageSlot::Available;
                }
            }
        }
        true
    }

    fn drain_queue(&mut self) {
        while self.execute_next() {}
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}

impl Backend for HeadlessBackend {
    type Buffer = HeadlessBuffer;
    type Image = HeadlessImage;
    type ImageView = HeadlessImageView;
    type Sampler = HeadlessSampler;
    type CommandPool = HeadlessCommandPool;
    type CommandBuffer = HeadlessCommandBuffer;
    type Fence = HeadlessFence;
    type Semaphore = HeadlessSemaphore;
    type Swapchain = HeadlessSwapchain;
    type RenderPass = HeadlessRenderPass;
    type Framebuffer = HeadlessFramebuffer;
    type ShaderModule = HeadlessShaderModule;

    fn name(&self) -> &'static str {
        "Headless Backend"
    }

    fn limits(&self) -> DeviceLimits {
        DeviceLimits {
            sampler_anisotropy: self.config.sampler_anisotropy,
            max_sampler_anisotropy: self.config.max_sampler_anisotropy,
        }
    }

    fn supports_depth_format(&self, format: TextureFormat) -> bool {
        self.config.depth_formats.contains(&format)
    }

    fn create_buffer(
        &mut self,
        info: &BufferCreateInfo,
    ) -> BackendResult<(HeadlessBuffer, Option<NonNull<u8>>)> {
        self.reserve_device_memory(info.size)?;
        let Some(memory) = HostMemory::try_zeroed(info.size) else {
            self.device_memory_used -= info.size;
            return Err(BackendError::OutOfDeviceMemory);
        };

        let id = self.next_id();
        let mapped = info.memory_type.is_host_visible().then_some(memory.ptr);
        log::trace!(
            "HeadlessBackend: creating buffer {} ({} bytes, {:?})",
            id,
            info.size,
            info.memory_type
        );

        self.buffers.insert(
            id,
            BufferState {
                memory,
                size: info.size,
            },
        );
        self.stats.buffers_created += 1;
        Ok((HeadlessBuffer(id), mapped))
    }

    fn destroy_buffer(&mut self, buffer: HeadlessBuffer) {
        assert!(
            !self.queued_use_of_buffer(buffer.0),
            "buffer {} destroyed while a pending submission uses it",
            buffer.0
        );
        if let Some(state) = self.buffers.remove(&buffer.0) {
            self.device_memory_used -= state.size;
        }
    }

    fn create_image(&mut self, info: &TextureCreateInfo) -> BackendResult<HeadlessImage> {
        let mut bytes = 0u64;
        let (mut width, mut height) = (u64::from(info.width), u64::from(info.height));
        for _ in 0..info.mip_levels {
            bytes += width * height * u64::from(info.format.bytes_per_pixel());
            width = (width / 2).max(1);
            height = (height / 2).max(1);
        }
        bytes *= u64::from(info.texture_type.array_layers());
        self.reserve_device_memory(bytes)?;

        let id = self.next_id();
        log::trace!(
            "HeadlessBackend: creating image {} ({}x{}, {:?}, {} bytes)",
            id,
            info.width,
            info.height,
            info.format,
            bytes
        );
        self.images.insert(id, ImageState { bytes });
        Ok(HeadlessImage(id))
    }

    fn destroy_image(&mut self, image: HeadlessImage) {
        assert!(
            !self.image_views.values().any(|&owner| owner == image.0),
            "image {} destroyed before its views",
            image.0
        );
        if let Some(state) = self.images.remove(&image.0) {
            self.device_memory_used -= state.bytes;
        }
    }

    fn create_image_view(
        &mut self,
        image: &HeadlessImage,
        info: &TextureCreateInfo,
    ) -> BackendResult<HeadlessImageView> {
        if self.config.unsupported_view_formats.contains(&info.format) {
            return Err(BackendError::UnsupportedFormat(info.format));
        }
        let id = self.next_id();
        self.image_views.insert(id, image.0);
        Ok(HeadlessImageView(id))
    }

    fn destroy_image_view(&mut self, view: HeadlessImageView) {
        self.image_views.remove(&view.0);
    }

    fn create_sampler(&mut self, state: &SamplerState) -> BackendResult<HeadlessSampler> {
        let id = self.next_id();
        self.samplers.insert(id, *state);
        Ok(HeadlessSampler(id))
    }

    fn destroy_sampler(&mut self, sampler: HeadlessSampler) {
        self.samplers.remove(&sampler.0);
    }

    fn create_command_pool(&mut self) -> BackendResult<HeadlessCommandPool> {
        let id = self.next_id();
        self.command_pools.insert(id, 0);
        Ok(HeadlessCommandPool(id))
    }

    fn destroy_command_pool(&mut self, pool: HeadlessCommandPool) {
        if let Some(live) = self.command_pools.remove(&pool.0) {
            assert_eq!(live, 0, "command pool destroyed with live command buffers");
        }
    }

    fn allocate_command_buffer(
        &mut self,
        pool: &HeadlessCommandPool,
    ) -> BackendResult<HeadlessCommandBuffer> {
        let id = self.next_id();
        *self
            .command_pools
            .get_mut(&pool.0)
            .unwrap_or_else(|| panic!("unknown headless command pool {}", pool.0)) += 1;
        self.command_buffers.insert(
            id,
            CommandBufferState {
                pool: pool.0,
                state: RecordState::Initial,
                one_time: false,
                in_render_pass: false,
                commands: Vec::new(),
                errors: Vec::new(),
            },
        );
        Ok(HeadlessCommandBuffer(id))
    }

    fn free_command_buffer(&mut self, pool: &HeadlessCommandPool, cmd: HeadlessCommandBuffer) {
        let state = self.command_buffer_state(cmd.0);
        assert_eq!(state.pool, pool.0, "command buffer freed to the wrong pool");
        assert_ne!(
            state.state,
            RecordState::Pending,
            "command buffer {} freed while pending",
            cmd.0
        );
        self.command_buffers.remove(&cmd.0);
        if let Some(live) = self.command_pools.get_mut(&pool.0) {
            *live -= 1;
        }
    }

    fn reset_command_buffer(&mut self, cmd: &HeadlessCommandBuffer) -> BackendResult<()> {
        let state = self.command_buffer_state(cmd.0);
        if state.state == RecordState::Pending {
            return Err(BackendError::InvalidUsage(format!(
                "command buffer {} reset while its submission is pending",
                cmd.0
            )));
        }
        state.reset();
        Ok(())
    }

    fn begin_command_buffer(
        &mut self,
        cmd: &HeadlessCommandBuffer,
        one_time: bool,
    ) -> BackendResult<()> {
        let state = self.command_buffer_state(cmd.0);
        match state.state {
            RecordState::Pending => Err(BackendError::InvalidUsage(format!(
                "command buffer {} begun while its submission is pending",
                cmd.0
            ))),
            RecordState::Recording => Err(BackendError::InvalidUsage(format!(
                "command buffer {} is already recording",
                cmd.0
            ))),
            _ => {
                // Pools allow per-buffer reset, so begin resets implicitly.
                state.reset();
                state.state = RecordState::Recording;
                state.one_time = one_time;
                Ok(())
            }
        }
    }

    fn end_command_buffer(&mut self, cmd: &HeadlessCommandBuffer) -> BackendResult<()> {
        let state = self.command_buffer_state(cmd.0);
        if state.state != RecordState::Recording {
            return Err(BackendError::InvalidUsage(format!(
                "command buffer {} ended in state {:?}",
                cmd.0, state.state
            )));
        }
        if state.in_render_pass {
            state.errors.push("render pass still open".to_string());
        }
        if !state.errors.is_empty() {
            state.state = RecordState::Invalid;
            return Err(BackendError::InvalidUsage(state.errors.join("; ")));
        }
        state.state = RecordState::Executable;
        Ok(())
    }

    fn cmd_copy_buffer(
        &mut self,
        cmd: &HeadlessCommandBuffer,
        src: &HeadlessBuffer,
        dst: &HeadlessBuffer,
        regions: &[CopyRegion],
    ) {
        let src_size = self.buffer_state(src.0).size;
        let dst_size = self.buffer_state(dst.0).size;
        let out_of_range = regions.iter().any(|r| {
            r.src_offset + r.size > src_size || r.dst_offset + r.size > dst_size
        });

        let state = self.command_buffer_state(cmd.0);
        if state.in_render_pass {
            state.errors.push("buffer copy inside a render pass".to_string());
        }
        if out_of_range {
            state.errors.push("buffer copy region out of range".to_string());
        }
        state.record(Command::Copy {
            src: src.0,
            dst: dst.0,
            regions: regions.to_vec(),
        });
    }

    fn cmd_begin_render_pass(
        &mut self,
        cmd: &HeadlessCommandBuffer,
        render_pass: &HeadlessRenderPass,
        framebuffer: &HeadlessFramebuffer,
        extent: Extent2D,
        clear_values: &[ClearValue],
    ) {
        let mut errors = Vec::new();
        match self.framebuffers.get(&framebuffer.0) {
            Some(fb) if fb.render_pass != render_pass.0 => {
                errors.push("framebuffer was created for another render pass".to_string())
            }
            Some(fb) if fb.extent != extent => {
                errors.push("render area does not match the framebuffer".to_string())
            }
            Some(_) => {}
            None => errors.push(format!("unknown framebuffer {}", framebuffer.0)),
        }
        let expected = match self.render_passes.get(&render_pass.0) {
            Some(pass) if pass.depth => 2,
            _ => 1,
        };
        if clear_values.len() != expected {
            errors.push(format!(
                "{} clear values for {} attachments",
                clear_values.len(),
                expected
            ));
        }

        let state = self.command_buffer_state(cmd.0);
        if state.in_render_pass {
            errors.push("render pass begun inside a render pass".to_string());
        }
        state.errors.extend(errors);
        state.in_render_pass = true;
        state.record(Command::BeginRenderPass);
    }

    fn cmd_end_render_pass(&mut self, cmd: &HeadlessCommandBuffer) {
        let state = self.command_buffer_state(cmd.0);
        if !state.in_render_pass {
            state.errors.push("render pass ended without being begun".to_string());
        }
        state.in_render_pass = false;
        state.record(Command::EndRenderPass);
    }

    fn queue_submit(&mut self, submission: Submission<'_, Self>) -> BackendResult<()> {
        let cmd = submission.command_buffer.0;
        let state = self.command_buffer_state(cmd).state;
        if state != RecordState::Executable {
            return Err(BackendError::InvalidUsage(format!(
                "command buffer {} submitted in state {:?}",
                cmd, state
            )));
        }

        if let Some((semaphore, _stage)) = submission.wait {
            if !self.semaphores[&semaphore.0] {
                return Err(BackendError::Deadlock(format!(
                    "submission waits on semaphore {} that nothing will signal",
                    semaphore.0
                )));
            }
        }
        if let Some(semaphore) = submission.signal {
            if self.semaphores[&semaphore.0] {
                return Err(BackendError::InvalidUsage(format!(
                    "semaphore {} signaled twice without a wait",
                    semaphore.0
                )));
            }
        }
        if let Some(fence) = submission.fence {
            let state = self.fences[&fence.0];
            if state != FenceState::Unsignaled {
                return Err(BackendError::InvalidUsage(format!(
                    "fence {} submitted in state {:?}",
                    fence.0, state
                )));
            }
        }

        if let Some((semaphore, _)) = submission.wait {
            self.semaphores.insert(semaphore.0, false);
        }
        if let Some(semaphore) = submission.signal {
            self.semaphores.insert(semaphore.0, true);
        }
        if let Some(fence) = submission.fence {
            self.fences.insert(fence.0, FenceState::Pending);
        }
        self.command_buffer_state(cmd).state = RecordState::Pending;

        self.queue.push_back(QueueOp::Submit {
            cmd,
            fence: submission.fence.map(|f| f.0),
        });
        self.stats.submissions += 1;
        Ok(())
    }

    fn queue_wait_idle(&mut self) -> BackendResult<()> {
        self.stats.queue_idle_waits += 1;
        self.drain_queue();
        Ok(())
    }

    fn device_wait_idle(&mut self) -> BackendResult<()> {
        self.drain_queue();
        Ok(())
    }

    fn create_fence(&mut self, signaled: bool) -> BackendResult<HeadlessFence> {
        let id = self.next_id();
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        self.fences.insert(id, state);
        Ok(HeadlessFence(id))
    }

    fn destroy_fence(&mut self, fence: HeadlessFence) {
        assert_ne!(
            self.fences.remove(&fence.0),
            Some(FenceState::Pending),
            "fence {} destroyed while pending",
            fence.0
        );
    }

    fn wait_fence(&mut self, fence: &HeadlessFence, timeout_ns: u64) -> BackendResult<()> {
        self.stats.fence_waits += 1;
        loop {
            let state = self.fences[&fence.0];
            match state {
                FenceState::Signaled => return Ok(()),
                FenceState::Pending if timeout_ns == 0 => return Err(BackendError::Timeout),
                FenceState::Pending if self.execute_next() => {}
                _ => {
                    return Err(BackendError::Deadlock(format!(
                        "fence {} is unsignaled and no pending submission signals it",
                        fence.0
                    )))
                }
            }
        }
    }

    fn reset_fence(&mut self, fence: &HeadlessFence) -> BackendResult<()> {
        let state = self.fences[&fence.0];
        if state == FenceState::Pending {
            return Err(BackendError::InvalidUsage(format!(
                "fence {} reset while its submission is pending",
                fence.0
            )));
        }
        self.fences.insert(fence.0, FenceState::Unsignaled);
        Ok(())
    }

    fn fence_status(&mut self, fence: &HeadlessFence) -> BackendResult<bool> {
        Ok(self.fences[&fence.0] == FenceState::Signaled)
    }

    fn create_semaphore(&mut self) -> BackendResult<HeadlessSemaphore> {
        let id = self.next_id();
        self.semaphores.insert(id, false);
        Ok(HeadlessSemaphore(id))
    }

    fn destroy_semaphore(&mut self, semaphore: HeadlessSemaphore) {
        self.semaphores.remove(&semaphore.0);
    }

    fn create_swapchain(&mut self, info: &SwapchainCreateInfo) -> BackendResult<HeadlessSwapchain> {
        if !self.swapchains.is_empty() {
            return Err(BackendError::InvalidUsage(
                "surface already has a live swapchain".to_string(),
            ));
        }
        let extent = self
            .config
            .surface_extent
            .unwrap_or(Extent2D::new(info.width, info.height));
        if extent.width == 0 || extent.height == 0 {
            return Err(BackendError::InvalidUsage(format!(
                "swapchain extent {}x{} is empty",
                extent.width, extent.height
            )));
        }

        let id = self.next_id();
        log::trace!(
            "HeadlessBackend: creating swapchain {} ({}x{}, {} images)",
            id,
            extent.width,
            extent.height,
            self.config.swapchain_image_count
        );
        self.swapchains.insert(
            id,
            SwapchainState {
                images: vec![ImageSlot::Available; self.config.swapchain_image_count as usize],
                extent,
                format: self.config.surface_format,
                next: 0,
                out_of_date: false,
                suboptimal: false,
            },
        );
        Ok(HeadlessSwapchain(id))
    }

    fn swapchain_desc(&self, swapchain: &HeadlessSwapchain) -> SwapchainDesc {
        let state = &self.swapchains[&swapchain.0];
        SwapchainDesc {
            image_count: state.images.len() as u32,
            extent: state.extent,
            format: state.format,
        }
    }

    fn destroy_swapchain(&mut self, swapchain: HeadlessSwapchain) {
        // The presentation engine retires queued presents of a destroyed swapchain.
        self.queue.retain(
            |op| !matches!(op, QueueOp::Present { swapchain: id, .. } if *id == swapchain.0),
        );
        self.swapchains.remove(&swapchain.0);
    }

    fn acquire_next_image(
        &mut self,
        swapchain: &HeadlessSwapchain,
        _timeout_ns: u64,
        signal: &HeadlessSemaphore,
    ) -> BackendResult<Option<AcquiredImage>> {
        if self.swapchains[&swapchain.0].out_of_date {
            return Ok(None);
        }
        if self.semaphores[&signal.0] {
            return Err(BackendError::InvalidUsage(format!(
                "acquire signals semaphore {} which is already signaled",
                signal.0
            )));
        }

        let find_available = |state: &SwapchainState| {
            let count = state.images.len();
            (0..count)
                .map(|offset| (state.next + offset) % count)
                .find(|&i| state.images[i] == ImageSlot::Available)
        };

        let mut index = find_available(&self.swapchains[&swapchain.0]);
        if index.is_none() {
            // Presentation engine holds every image: wait for queued presents.
            self.drain_queue();
            index = find_available(&self.swapchains[&swapchain.0]);
        }
        let Some(index) = index else {
            return Err(BackendError::Deadlock(
                "every swapchain image is acquired and none is being presented".to_string(),
            ));
        };

        let state = self
            .swapchains
            .get_mut(&swapchain.0)
            .unwrap_or_else(|| panic!("unknown headless swapchain {}", swapchain.0));
        state.images[index] = ImageSlot::Acquired;
        state.next = (index + 1) % state.images.len();
        let suboptimal = state.suboptimal;
        self.semaphores.insert(signal.0, true);

        Ok(Some(AcquiredImage {
            index: index as u32,
            suboptimal,
        }))
    }

    fn queue_present(
        &mut self,
        swapchain: &HeadlessSwapchain,
        image_index: u32,
        wait: &HeadlessSemaphore,
    ) -> BackendResult<PresentStatus> {
        let index = image_index as usize;
        let slot = self.swapchains[&swapchain.0].images[index];
        if slot != ImageSlot::Acquired {
            return Err(BackendError::InvalidUsage(format!(
                "image {} presented in state {:?}",
                image_index, slot
            )));
        }
        if !self.semaphores[&wait.0] {
            return Err(BackendError::Deadlock(format!(
                "present waits on semaphore {} that nothing will signal",
                wait.0
            )));
        }
        self.semaphores.insert(wait.0, false);

        let state = self
            .swapchains
            .get_mut(&swapchain.0)
            .unwrap_or_else(|| panic!("unknown headless swapchain {}", swapchain.0));
        if state.out_of_date {
            state.images[index] = ImageSlot::Available;
            return Ok(PresentStatus::OutOfDate);
        }
        state.images[index] = ImageSlot::Presenting;
        let suboptimal = state.suboptimal;

        self.queue.push_back(QueueOp::Present {
            swapchain: swapchain.0,
            image: index,
        });
        self.stats.presents += 1;

        Ok(if suboptimal {
            PresentStatus::Suboptimal
        } else {
            PresentStatus::Optimal
        })
    }

    fn create_render_pass(
        &mut self,
        _color_format: TextureFormat,
        depth_format: Option<TextureFormat>,
    ) -> BackendResult<HeadlessRenderPass> {
        if let Some(format) = depth_format {
            if !self.supports_depth_format(format) {
                return Err(BackendError::UnsupportedFormat(format));
            }
        }
        let id = self.next_id();
        self.render_passes.insert(
            id,
            RenderPassState {
                depth: depth_format.is_some(),
            },
        );
        Ok(HeadlessRenderPass(id))
    }

    fn destroy_render_pass(&mut self, render_pass: HeadlessRenderPass) {
        self.render_passes.remove(&render_pass.0);
    }

    fn create_framebuffer(
        &mut self,
        render_pass: &HeadlessRenderPass,
        swapchain: &HeadlessSwapchain,
        image_index: u32,
        _depth: Option<&HeadlessImageView>,
    ) -> BackendResult<HeadlessFramebuffer> {
        if self.config.fail_framebuffer_at == Some(image_index) {
            return Err(BackendError::OutOfDeviceMemory);
        }
        let extent = self.swapchains[&swapchain.0].extent;
        let id = self.next_id();
        self.framebuffers.insert(
            id,
            FramebufferState {
                render_pass: render_pass.0,
                extent,
            },
        );
        Ok(HeadlessFramebuffer(id))
    }

    fn destroy_framebuffer(&mut self, framebuffer: HeadlessFramebuffer) {
        self.framebuffers.remove(&framebuffer.0);
    }

    fn create_shader_module(&mut self, words: &[u32]) -> BackendResult<HeadlessShaderModule> {
        if words.first() != Some(&SPIRV_MAGIC) {
            return Err(BackendError::InvalidUsage(
                "shader code does not start with the SPIR-V magic number".to_string(),
            ));
        }
        let id = self.next_id();
        self.shader_modules.insert(id, words.len());
        Ok(HeadlessShaderModule(id))
    }

    fn destroy_shader_module(&mut self, module: HeadlessShaderModule) {
        self.shader_modules.remove(&module.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryType, PresentMode, WaitStage};
    use rstest::rstest;

    fn buffer(backend: &mut HeadlessBackend, size: u64, memory_type: MemoryType) -> HeadlessBuffer {
        let info = BufferCreateInfo::new(size, memory_type, Default::default());
        backend.create_buffer(&info).unwrap().0
    }

    fn submit(backend: &mut HeadlessBackend, cmd: &HeadlessCommandBuffer, fence: &HeadlessFence) {
        backend
            .queue_submit(Submission {
                command_buffer: cmd,
                wait: None,
                signal: None,
                fence: Some(fence),
            })
            .unwrap();
    }

    #[test]
    fn only_host_visible_buffers_are_mapped() {
        let mut backend = HeadlessBackend::default();
        let info = BufferCreateInfo::new(16, MemoryType::GpuOnly, Default::default());
        assert!(backend.create_buffer(&info).unwrap().1.is_none());
        let info = BufferCreateInfo::new(16, MemoryType::Staging, Default::default());
        assert!(backend.create_buffer(&info).unwrap().1.is_some());
    }

    #[test]
    fn copies_run_only_when_the_host_waits() {
        let mut backend = HeadlessBackend::default();
        let info = BufferCreateInfo::new(4, MemoryType::Staging, Default::default());
        let (src, mapped) = backend.create_buffer(&info).unwrap();
        let dst = buffer(&mut backend, 4, MemoryType::GpuOnly);
        unsafe { mapped.unwrap().as_ptr().copy_from_nonoverlapping([1, 2, 3, 4].as_ptr(), 4) };

        let pool = backend.create_command_pool().unwrap();
        let cmd = backend.allocate_command_buffer(&pool).unwrap();
        let fence = backend.create_fence(false).unwrap();
        backend.begin_command_buffer(&cmd, true).unwrap();
        let region = CopyRegion {
            src_offset: 0,
            dst_offset: 0,
            size: 4,
        };
        backend.cmd_copy_buffer(&cmd, &src, &dst, &[region]);
        backend.end_command_buffer(&cmd).unwrap();
        submit(&mut backend, &cmd, &fence);

        assert_eq!(backend.read_buffer(&dst), &[0, 0, 0, 0]);
        assert_eq!(backend.pending_operations(), 1);

        backend.wait_fence(&fence, u64::MAX).unwrap();
        assert_eq!(backend.read_buffer(&dst), &[1, 2, 3, 4]);
        assert_eq!(backend.stats().buffer_copies, 1);
    }

    #[test]
    fn pending_command_buffer_cannot_be_reset() {
        let mut backend = HeadlessBackend::default();
        let pool = backend.create_command_pool().unwrap();
        let cmd = backend.allocate_command_buffer(&pool).unwrap();
        let fence = backend.create_fence(false).unwrap();
        backend.begin_command_buffer(&cmd, false).unwrap();
        backend.end_command_buffer(&cmd).unwrap();
        submit(&mut backend, &cmd, &fence);

        assert!(matches!(
            backend.reset_command_buffer(&cmd),
            Err(BackendError::InvalidUsage(_))
        ));
        assert!(matches!(
            backend.reset_fence(&fence),
            Err(BackendError::InvalidUsage(_))
        ));

        backend.wait_fence(&fence, u64::MAX).unwrap();
        backend.reset_command_buffer(&cmd).unwrap();
    }

    #[test]
    fn unsignaled_fence_wait_is_a_deadlock() {
        let mut backend = HeadlessBackend::default();
        let fence = backend.create_fence(false).unwrap();
        assert!(matches!(
            backend.wait_fence(&fence, u64::MAX),
            Err(BackendError::Deadlock(_))
        ));
        let fence = backend.create_fence(true).unwrap();
        backend.wait_fence(&fence, u64::MAX).unwrap();
    }

    #[test]
    fn semaphore_signaled_twice_is_rejected() {
        let mut backend = HeadlessBackend::default();
        let info = SwapchainCreateInfo {
            width: 64,
            height: 64,
            present_mode: PresentMode::Fifo,
        };
        let swapchain = backend.create_swapchain(&info).unwrap();
        let semaphore = backend.create_semaphore().unwrap();

        backend
            .acquire_next_image(&swapchain, u64::MAX, &semaphore)
            .unwrap()
            .unwrap();
        assert!(matches!(
            backend.acquire_next_image(&swapchain, u64::MAX, &semaphore),
            Err(BackendError::InvalidUsage(_))
        ));
    }

    #[test]
    fn submit_waiting_on_unsignaled_semaphore_is_a_deadlock() {
        let mut backend = HeadlessBackend::default();
        let pool = backend.create_command_pool().unwrap();
        let cmd = backend.allocate_command_buffer(&pool).unwrap();
        let semaphore = backend.create_semaphore().unwrap();
        backend.begin_command_buffer(&cmd, false).unwrap();
        backend.end_command_buffer(&cmd).unwrap();

        let result = backend.queue_submit(Submission {
            command_buffer: &cmd,
            wait: Some((&semaphore, WaitStage::ColorAttachmentOutput)),
            signal: None,
            fence: None,
        });
        assert!(matches!(result, Err(BackendError::Deadlock(_))));
    }

    #[test]
    fn acquiring_every_image_without_presenting_deadlocks() {
        let mut backend = HeadlessBackend::new(HeadlessConfig {
            swapchain_image_count: 2,
            ..Default::default()
        });
        let info = SwapchainCreateInfo {
            width: 8,
            height: 8,
            present_mode: PresentMode::Fifo,
        };
        let swapchain = backend.create_swapchain(&info).unwrap();
        let semaphores: Vec<_> = (0..3).map(|_| backend.create_semaphore().unwrap()).collect();

        for semaphore in &semaphores[..2] {
            backend
                .acquire_next_image(&swapchain, u64::MAX, semaphore)
                .unwrap()
                .unwrap();
        }
        assert!(matches!(
            backend.acquire_next_image(&swapchain, u64::MAX, &semaphores[2]),
            Err(BackendError::Deadlock(_))
        ));
    }

    #[test]
    fn resized_surface_makes_swapchain_out_of_date() {
        let mut backend = HeadlessBackend::default();
        let info = SwapchainCreateInfo {
            width: 8,
            height: 8,
            present_mode: PresentMode::Fifo,
        };
        let swapchain = backend.create_swapchain(&info).unwrap();
        let semaphore = backend.create_semaphore().unwrap();

        backend.resize_surface(Extent2D::new(16, 16));
        assert_eq!(
            backend
                .acquire_next_image(&swapchain, u64::MAX, &semaphore)
                .unwrap(),
            None
        );

        backend.destroy_swapchain(swapchain);
        let swapchain = backend.create_swapchain(&info).unwrap();
        assert_eq!(backend.swapchain_desc(&swapchain).extent, Extent2D::new(16, 16));
    }

    #[test]
    fn budget_limits_device_memory() {
        let mut backend = HeadlessBackend::new(HeadlessConfig {
            device_memory_budget: Some(100),
            ..Default::default()
        });
        let first = buffer(&mut backend, 64, MemoryType::GpuOnly);
        let info = BufferCreateInfo::new(64, MemoryType::Staging, Default::default());
        assert_eq!(
            backend.create_buffer(&info).err(),
            Some(BackendError::OutOfDeviceMemory)
        );
        backend.destroy_buffer(first);
        assert_eq!(backend.device_memory_used(), 0);
        assert!(backend.create_buffer(&info).is_ok());
    }

    #[rstest]
    #[case::beyond_address_space(u64::MAX)]
    #[case::beyond_isize(isize::MAX as u64 + 1)]
    fn unaddressable_buffer_is_out_of_memory(#[case] size: u64) {
        let mut backend = HeadlessBackend::default();
        let info = BufferCreateInfo::new(size, MemoryType::CpuToGpu, Default::default());
        assert_eq!(
            backend.create_buffer(&info).err(),
            Some(BackendError::OutOfDeviceMemory)
        );
        assert_eq!(backend.device_memory_used(), 0);
        assert_eq!(backend.live_objects().buffers, 0);
    }

    #[test]
    fn shader_modules_need_spirv_magic() {
        let mut backend = HeadlessBackend::default();
        assert!(backend.create_shader_module(&[SPIRV_MAGIC, 0x0001_0000]).is_ok());
        assert!(backend.create_shader_module(&[0xdead_beef]).is_err());
        assert!(backend.create_shader_module(&[]).is_err());
    }
}
