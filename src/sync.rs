// Synchronization primitives
//
// Fences: GPU -> host completion signal
// Semaphores: GPU -> GPU ordering, never waited on by the host

use crate::backend::Backend;
use crate::device::Device;
use crate::error::Result;
use crate::handle::{FenceHandle, SemaphoreHandle};

impl<B: Backend> Device<B> {
    /// Create a fence in the signaled state, so the first wait on it returns
    /// immediately.
    pub fn create_fence(&mut self) -> Result<FenceHandle> {
        let slot = self.reserve::<B::Fence>()?;
        let native = self.backend.create_fence(true)?;
        Ok(FenceHandle(self.fences.insert(slot.write(native))))
    }

    pub fn destroy_fence(&mut self, fence: FenceHandle) {
        self.check_initialized();
        let native = self.fences.remove(fence.0);
        self.backend.destroy_fence(native);
    }

    /// Block until the fence is signaled. There is no timeout.
    pub fn wait_fence(&mut self, fence: &FenceHandle) -> Result<()> {
        let native = self.fences.get(fence.0);
        self.backend.wait_fence(native, u64::MAX)?;
        Ok(())
    }

    pub fn reset_fence(&mut self, fence: &FenceHandle) -> Result<()> {
        let native = self.fences.get(fence.0);
        self.backend.reset_fence(native)?;
        Ok(())
    }

    /// Non-blocking status query.
    pub fn fence_signaled(&mut self, fence: &FenceHandle) -> Result<bool> {
        let native = self.fences.get(fence.0);
        Ok(self.backend.fence_status(native)?)
    }

    /// Create an unsignaled binary semaphore.
    pub fn create_semaphore(&mut self) -> Result<SemaphoreHandle> {
        let slot = self.reserve::<B::Semaphore>()?;
        let native = self.backend.create_semaphore()?;
        Ok(SemaphoreHandle(self.semaphores.insert(slot.write(native))))
    }

    pub fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) {
        self.check_initialized();
        let native = self.semaphores.remove(semaphore.0);
        self.backend.destroy_semaphore(native);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessConfig;
    use crate::library::Swarm;

    #[test]
    fn fence_starts_signaled() {
        let mut device = Device::headless(Swarm::with_default_hooks(), HeadlessConfig::default());
        let fence = device.create_fence().unwrap();
        assert!(device.fence_signaled(&fence).unwrap());
        device.wait_fence(&fence).unwrap();

        device.reset_fence(&fence).unwrap();
        assert!(!device.fence_signaled(&fence).unwrap());
        device.destroy_fence(fence);
    }
}
