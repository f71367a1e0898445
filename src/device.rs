// Device facade - owns the backend and every handle arena
//
// Each concern (buffers, textures, sync, ...) adds its own `impl Device`
// block in its module. This file holds construction, teardown and the
// bookkeeping they share.

use crate::backend::{Backend, HeadlessBackend, HeadlessConfig};
use crate::buffer::Buffer;
use crate::command::{CommandBuffer, CommandPool};
use crate::error::{BackendError, Result};
use crate::handle::HandlePool;
use crate::library::{HookAlloc, Swarm};
use crate::shader::Shader;
use crate::swapchain::{Framebuffer, RenderPass, Swapchain};
use crate::texture::{Sampler, Texture};
use crate::types::TextureFormat;

/// Candidate depth formats, most precise first.
pub const DEPTH_FORMAT_CANDIDATES: [TextureFormat; 3] = [
    TextureFormat::D32Sfloat,
    TextureFormat::D32SfloatS8Uint,
    TextureFormat::D24UnormS8Uint,
];

/// Counters for the buffer transfer paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// `update_buffer` calls served by a direct write into mapped memory.
    pub host_writes: u64,
    /// Temporary staging buffers created by `update_buffer`.
    pub staging_buffers: u64,
    pub staging_bytes: u64,
    /// Single-use command buffers submitted by `copy_buffer`/`copy_buffers`.
    pub gpu_copy_submissions: u64,
    pub queue_idle_waits: u64,
}

/// A logical GPU device and everything created from it.
///
/// Single-threaded: every call takes `&mut self` and no internal locking is
/// done. Resources are returned as owned handles; dropping the `Device`
/// destroys whatever is still alive and logs a warning for it.
pub struct Device<B: Backend> {
    pub(crate) swarm: Swarm,
    pub(crate) backend: B,

    pub(crate) buffers: HandlePool<Buffer<B>>,
    pub(crate) textures: HandlePool<Texture<B>>,
    pub(crate) samplers: HandlePool<Sampler<B>>,
    pub(crate) command_pools: HandlePool<CommandPool<B>>,
    pub(crate) command_buffers: HandlePool<CommandBuffer<B>>,
    pub(crate) fences: HandlePool<B::Fence>,
    pub(crate) semaphores: HandlePool<B::Semaphore>,
    pub(crate) swapchains: HandlePool<Swapchain<B>>,
    pub(crate) render_passes: HandlePool<RenderPass<B>>,
    pub(crate) framebuffers: HandlePool<Framebuffer<B>>,
    pub(crate) shaders: HandlePool<Shader<B>>,

    pub(crate) transfer_stats: TransferStats,
}

impl<B: Backend> Device<B> {
    /// Wrap an already created backend.
    ///
    /// # Panics
    /// If `swarm` is not initialized.
    pub fn from_backend(swarm: Swarm, backend: B) -> Self {
        swarm.assert_initialized();
        log::info!("Device created on {}", backend.name());

        Self {
            swarm,
            backend,
            buffers: HandlePool::new("buffer"),
            textures: HandlePool::new("texture"),
            samplers: HandlePool::new("sampler"),
            command_pools: HandlePool::new("command pool"),
            command_buffers: HandlePool::new("command buffer"),
            fences: HandlePool::new("fence"),
            semaphores: HandlePool::new("semaphore"),
            swapchains: HandlePool::new("swapchain"),
            render_passes: HandlePool::new("render pass"),
            framebuffers: HandlePool::new("framebuffer"),
            shaders: HandlePool::new("shader"),
            transfer_stats: TransferStats::default(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn swarm(&self) -> &Swarm {
        &self.swarm
    }

    /// Block until all queued GPU work has finished.
    pub fn wait_idle(&mut self) -> Result<()> {
        self.backend.device_wait_idle()?;
        Ok(())
    }

    /// First supported depth attachment format among D32, D32S8 and D24S8.
    pub fn depth_format(&self) -> Result<TextureFormat> {
        DEPTH_FORMAT_CANDIDATES
            .into_iter()
            .find(|&format| self.backend.supports_depth_format(format))
            .ok_or_else(|| BackendError::UnsupportedFormat(TextureFormat::D32Sfloat).into())
    }

    pub fn transfer_stats(&self) -> TransferStats {
        self.transfer_stats
    }

    /// Reserve memory for an object through the allocation hooks.
    ///
    /// Done before the native object is created, so a hook failure never
    /// strands a native object.
    ///
    /// # Panics
    /// If the library is not initialized.
    pub(crate) fn reserve<T>(&self) -> Result<HookAlloc<T>> {
        HookAlloc::new(self.swarm.hooks())
    }

    /// # Panics
    /// If the library is not initialized.
    pub(crate) fn check_initialized(&self) {
        self.swarm.assert_initialized();
    }

    fn release_leaked(&mut self) {
        fn warn_leaks<T>(pool: &mut HandlePool<T>) -> Vec<T> {
            let leaked: Vec<T> = pool.drain().into_iter().map(|(_, value)| value).collect();
            if !leaked.is_empty() {
                log::warn!("{} {} handle(s) still alive at device drop", leaked.len(), pool.kind());
            }
            leaked
        }

        for framebuffer in warn_leaks(&mut self.framebuffers) {
            for native in framebuffer.natives {
                self.backend.destroy_framebuffer(native);
            }
        }
        for render_pass in warn_leaks(&mut self.render_passes) {
            self.backend.destroy_render_pass(render_pass.native);
        }
        for swapchain in warn_leaks(&mut self.swapchains) {
            self.backend.destroy_swapchain(swapchain.native);
        }
        for shader in warn_leaks(&mut self.shaders) {
            self.backend.destroy_shader_module(shader.native);
        }
        for sampler in warn_leaks(&mut self.samplers) {
            self.backend.destroy_sampler(sampler.native);
        }
        for texture in warn_leaks(&mut self.textures) {
            self.backend.destroy_image_view(texture.view);
            self.backend.destroy_image(texture.image);
        }
        for buffer in warn_leaks(&mut self.buffers) {
            self.backend.destroy_buffer(buffer.native);
        }

        // Command buffers go back to their pool before the pool is destroyed.
        let pools = self.command_pools.drain();
        if !pools.is_empty() {
            log::warn!("{} command pool handle(s) still alive at device drop", pools.len());
        }
        for cmd in warn_leaks(&mut self.command_buffers) {
            if let Some((_, pool)) = pools.iter().find(|(id, _)| *id == cmd.pool) {
                self.backend.free_command_buffer(&pool.native, cmd.native);
            }
        }
        for (_, pool) in pools {
            self.backend.destroy_command_pool(pool.native);
        }

        for semaphore in warn_leaks(&mut self.semaphores) {
            self.backend.destroy_semaphore(semaphore);
        }
        for fence in warn_leaks(&mut self.fences) {
            self.backend.destroy_fence(fence);
        }
    }
}

impl Device<HeadlessBackend> {
    /// Device on the host-simulated backend.
    ///
    /// # Panics
    /// If `swarm` is not initialized.
    pub fn headless(swarm: Swarm, config: HeadlessConfig) -> Self {
        Self::from_backend(swarm, HeadlessBackend::new(config))
    }
}

#[cfg(feature = "vulkan")]
impl Device<crate::backend::VulkanBackend> {
    /// Select a physical device for `surface` and create the logical device,
    /// its queues and the memory allocator.
    ///
    /// # Panics
    /// If `swarm` is not initialized.
    pub fn new(
        swarm: Swarm,
        instance: &crate::backend::Instance,
        surface: crate::backend::Surface,
        info: &crate::types::DeviceCreateInfo,
    ) -> anyhow::Result<Self> {
        swarm.assert_initialized();
        let backend = crate::backend::VulkanBackend::new(instance, surface, info)?;
        Ok(Self::from_backend(swarm, backend))
    }
}

impl<B: Backend> Drop for Device<B> {
    fn drop(&mut self) {
        log::info!("Destroying device...");

        if let Err(e) = self.backend.device_wait_idle() {
            log::error!("Failed to wait for device idle: {}", e);
        }
        self.release_leaked();
    }
}

impl<B: Backend> std::fmt::Debug for Device<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("backend", &self.backend.name())
            .field("buffers", &self.buffers.len())
            .field("textures", &self.textures.len())
            .field("swapchains", &self.swapchains.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BufferCreateInfo, BufferUsage, MemoryType};

    #[test]
    fn depth_format_prefers_d32() {
        let device = Device::headless(Swarm::with_default_hooks(), HeadlessConfig::default());
        assert_eq!(device.depth_format().unwrap(), TextureFormat::D32Sfloat);

        let device = Device::headless(
            Swarm::with_default_hooks(),
            HeadlessConfig {
                depth_formats: vec![TextureFormat::D24UnormS8Uint],
                ..Default::default()
            },
        );
        assert_eq!(device.depth_format().unwrap(), TextureFormat::D24UnormS8Uint);

        let device = Device::headless(
            Swarm::with_default_hooks(),
            HeadlessConfig {
                depth_formats: Vec::new(),
                ..Default::default()
            },
        );
        assert!(device.depth_format().is_err());
    }

    #[test]
    fn drop_releases_leaked_handles() {
        let mut device = Device::headless(Swarm::with_default_hooks(), HeadlessConfig::default());
        let pool = device.create_command_pool().unwrap();
        let _cmd = device.create_command_buffer(&pool).unwrap();
        let info = BufferCreateInfo::new(64, MemoryType::GpuOnly, BufferUsage::VERTEX);
        let _buffer = device.create_buffer(&info).unwrap();
        let _fence = device.create_fence().unwrap();
        drop(device);
    }

    #[test]
    #[should_panic(expected = "swarm library is not initialized")]
    fn device_requires_initialized_library() {
        Device::headless(Swarm::new(), HeadlessConfig::default());
    }
}
