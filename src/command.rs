// Command pools and command buffers
//
// Pools are bound to the graphics queue family and allow per-buffer reset,
// so a frame's command buffer is reset and re-recorded rather than
// reallocated.

use crate::backend::Backend;
use crate::device::Device;
use crate::error::Result;
use crate::frame::FrameStage;
use crate::handle::{CommandBufferHandle, CommandPoolHandle, RawHandle};

pub(crate) struct CommandPool<B: Backend> {
    pub(crate) native: B::CommandPool,
    pub(crate) live_buffers: usize,
}

pub(crate) struct CommandBuffer<B: Backend> {
    pub(crate) native: B::CommandBuffer,
    pub(crate) pool: RawHandle,
    pub(crate) frame: FrameStage,
}

impl<B: Backend> Device<B> {
    pub fn create_command_pool(&mut self) -> Result<CommandPoolHandle> {
        let slot = self.reserve::<CommandPool<B>>()?;
        let native = self.backend.create_command_pool()?;
        log::debug!("Created command pool");

        let raw = self.command_pools.insert(slot.write(CommandPool {
            native,
            live_buffers: 0,
        }));
        Ok(CommandPoolHandle(raw))
    }

    /// # Panics
    /// If command buffers allocated from the pool are still alive.
    pub fn destroy_command_pool(&mut self, pool: CommandPoolHandle) {
        self.check_initialized();
        let live = self.command_pools.get(pool.0).live_buffers;
        assert_eq!(live, 0, "command pool destroyed with {} live command buffer(s)", live);

        let pool = self.command_pools.remove(pool.0);
        self.backend.destroy_command_pool(pool.native);
    }

    /// Allocate a primary command buffer from `pool`.
    pub fn create_command_buffer(
        &mut self,
        pool: &CommandPoolHandle,
    ) -> Result<CommandBufferHandle> {
        let slot = self.reserve::<CommandBuffer<B>>()?;
        let entry = self.command_pools.get_mut(pool.0);
        let native = self.backend.allocate_command_buffer(&entry.native)?;
        entry.live_buffers += 1;

        let raw = self.command_buffers.insert(slot.write(CommandBuffer {
            native,
            pool: pool.0,
            frame: FrameStage::Idle,
        }));
        Ok(CommandBufferHandle(raw))
    }

    /// Free a command buffer back to the pool it came from.
    ///
    /// # Panics
    /// If `cmd` was allocated from a different pool.
    pub fn destroy_command_buffer(&mut self, pool: &CommandPoolHandle, cmd: CommandBufferHandle) {
        self.check_initialized();
        assert_eq!(
            self.command_buffers.get(cmd.0).pool,
            pool.0,
            "command buffer freed to a pool it was not allocated from"
        );

        let cmd = self.command_buffers.remove(cmd.0);
        let entry = self.command_pools.get_mut(pool.0);
        self.backend.free_command_buffer(&entry.native, cmd.native);
        entry.live_buffers -= 1;
    }

    /// Native command buffer, for recording draw commands inside a frame.
    pub fn raw_command_buffer(&self, cmd: &CommandBufferHandle) -> &B::CommandBuffer {
        &self.command_buffers.get(cmd.0).native
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessConfig;
    use crate::library::Swarm;

    #[test]
    fn command_buffers_are_tied_to_their_pool() {
        let mut device = Device::headless(Swarm::with_default_hooks(), HeadlessConfig::default());
        let pool = device.create_command_pool().unwrap();
        let a = device.create_command_buffer(&pool).unwrap();
        let b = device.create_command_buffer(&pool).unwrap();
        assert_eq!(device.backend().live_objects().command_buffers, 2);

        device.destroy_command_buffer(&pool, a);
        device.destroy_command_buffer(&pool, b);
        device.destroy_command_pool(pool);
        assert_eq!(device.backend().live_objects().total(), 0);
    }

    #[test]
    #[should_panic(expected = "command pool destroyed with 1 live command buffer(s)")]
    fn pool_with_live_buffers_cannot_be_destroyed() {
        let mut device = Device::headless(Swarm::with_default_hooks(), HeadlessConfig::default());
        let pool = device.create_command_pool().unwrap();
        let _cmd = device.create_command_buffer(&pool).unwrap();
        device.destroy_command_pool(pool);
    }

    #[test]
    #[should_panic(expected = "not allocated from")]
    fn freeing_to_the_wrong_pool_panics() {
        let mut device = Device::headless(Swarm::with_default_hooks(), HeadlessConfig::default());
        let first = device.create_command_pool().unwrap();
        let second = device.create_command_pool().unwrap();
        let cmd = device.create_command_buffer(&first).unwrap();
        device.destroy_command_buffer(&second, cmd);
    }
}
