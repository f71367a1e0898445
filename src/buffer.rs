// Buffer manager - creation, host writes and GPU copies
//
// Transfer paths:
// - host-visible destination: memcpy into the persistent mapping, no GPU work
// - device-local destination: temporary staging buffer + synchronous GPU copy
//
// Copies submit a single-use command buffer and wait for the whole queue to
// go idle. That is a coarse barrier meant for setup-time uploads.

use std::ptr::NonNull;

use crate::backend::{Backend, CopyRegion, Submission};
use crate::device::Device;
use crate::error::{BackendError, Error, Result};
use crate::handle::{BufferHandle, CommandPoolHandle};
use crate::types::{BufferCreateInfo, BufferUsage, MemoryType};

pub(crate) struct Buffer<B: Backend> {
    pub(crate) native: B::Buffer,
    pub(crate) info: BufferCreateInfo,
    // Some <=> memory type is host visible
    pub(crate) mapped: Option<NonNull<u8>>,
}

/// One buffer-to-buffer copy for [`Device::copy_buffers`].
#[derive(Debug, Clone, Copy)]
pub struct BufferCopy<'a> {
    pub src: &'a BufferHandle,
    pub dst: &'a BufferHandle,
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

impl<'a> BufferCopy<'a> {
    /// Copy `size` bytes from the start of `src` to the start of `dst`.
    pub fn whole(src: &'a BufferHandle, dst: &'a BufferHandle, size: u64) -> Self {
        Self {
            src,
            dst,
            src_offset: 0,
            dst_offset: 0,
            size,
        }
    }
}

fn range_fits(offset: u64, size: u64, buffer_size: u64) -> bool {
    offset
        .checked_add(size)
        .is_some_and(|end| end <= buffer_size)
}

impl<B: Backend> Device<B> {
    /// Create a buffer with the residency class and usage in `info`.
    ///
    /// Host-visible classes come back persistently mapped.
    ///
    /// # Panics
    /// If the library is not initialized or `info.size` is zero.
    pub fn create_buffer(&mut self, info: &BufferCreateInfo) -> Result<BufferHandle> {
        assert!(info.size > 0, "buffer size must be non-zero");
        let slot = self.reserve::<Buffer<B>>()?;

        let (native, mapped) = self.backend.create_buffer(info)?;
        debug_assert_eq!(mapped.is_some(), info.memory_type.is_host_visible());
        log::debug!(
            "Created buffer: {} bytes, {:?}, {:?}",
            info.size,
            info.memory_type,
            info.usage
        );

        let raw = self.buffers.insert(slot.write(Buffer {
            native,
            info: *info,
            mapped,
        }));
        Ok(BufferHandle(raw))
    }

    /// Destroy a buffer. The handle is consumed.
    ///
    /// # Panics
    /// If the library is not initialized or the handle is stale.
    pub fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.check_initialized();
        let buffer = self.buffers.remove(buffer.0);
        self.backend.destroy_buffer(buffer.native);
    }

    pub fn buffer_info(&self, buffer: &BufferHandle) -> &BufferCreateInfo {
        &self.buffers.get(buffer.0).info
    }

    /// Persistent host mapping. `None` for [`MemoryType::GpuOnly`].
    pub fn mapped_ptr(&self, buffer: &BufferHandle) -> Option<NonNull<u8>> {
        self.buffers.get(buffer.0).mapped
    }

    /// Native buffer object, for code that records its own commands.
    pub fn raw_buffer(&self, buffer: &BufferHandle) -> &B::Buffer {
        &self.buffers.get(buffer.0).native
    }

    /// Write `data` to the start of `buffer`.
    ///
    /// Host-visible buffers are written directly. Device-local buffers go
    /// through a temporary staging buffer and a GPU copy; the call returns
    /// once the copy has completed and the staging buffer is gone.
    ///
    /// # Panics
    /// If `data` is empty or larger than the buffer.
    pub fn update_buffer(
        &mut self,
        pool: &CommandPoolHandle,
        buffer: &BufferHandle,
        data: &[u8],
    ) -> Result<()> {
        self.check_initialized();
        let (size, mapped) = {
            let dst = self.buffers.get(buffer.0);
            (dst.info.size, dst.mapped)
        };
        assert!(
            !data.is_empty() && data.len() as u64 <= size,
            "update of {} bytes into a {}-byte buffer",
            data.len(),
            size
        );

        if let Some(ptr) = mapped {
            unsafe { ptr.as_ptr().copy_from_nonoverlapping(data.as_ptr(), data.len()) };
            self.transfer_stats.host_writes += 1;
            return Ok(());
        }

        debug_assert!(
            self.buffers
                .get(buffer.0)
                .info
                .usage
                .contains(BufferUsage::TRANSFER_DST),
            "device-local buffer updated without TRANSFER_DST usage"
        );
        log::debug!("Staging {} bytes into device-local buffer", data.len());

        let staging_info = BufferCreateInfo::new(
            data.len() as u64,
            MemoryType::Staging,
            BufferUsage::TRANSFER_SRC,
        );
        let staging = self.create_buffer(&staging_info)?;
        self.transfer_stats.staging_buffers += 1;
        self.transfer_stats.staging_bytes += data.len() as u64;

        let result = match self.mapped_ptr(&staging) {
            Some(ptr) => {
                unsafe { ptr.as_ptr().copy_from_nonoverlapping(data.as_ptr(), data.len()) };
                self.copy_buffer(pool, &staging, buffer, data.len() as u64)
            }
            None => Err(Error::Backend(BackendError::Native(
                "staging buffer is not host visible".to_string(),
            ))),
        };

        self.destroy_buffer(staging);
        result
    }

    /// Copy `size` bytes from the start of `src` to the start of `dst` on
    /// the GPU, blocking until the graphics queue is idle.
    ///
    /// # Panics
    /// If `size` is zero or exceeds either buffer.
    pub fn copy_buffer(
        &mut self,
        pool: &CommandPoolHandle,
        src: &BufferHandle,
        dst: &BufferHandle,
        size: u64,
    ) -> Result<()> {
        self.copy_buffers(pool, &[BufferCopy::whole(src, dst, size)])
    }

    /// Record every copy into one single-use command buffer, submit it and
    /// block until the graphics queue is idle.
    ///
    /// # Panics
    /// If any copy is empty or out of range for its buffers.
    pub fn copy_buffers(
        &mut self,
        pool: &CommandPoolHandle,
        copies: &[BufferCopy<'_>],
    ) -> Result<()> {
        self.check_initialized();
        if copies.is_empty() {
            return Ok(());
        }
        for copy in copies {
            let src_size = self.buffers.get(copy.src.0).info.size;
            let dst_size = self.buffers.get(copy.dst.0).info.size;
            assert!(
                copy.size > 0
                    && range_fits(copy.src_offset, copy.size, src_size)
                    && range_fits(copy.dst_offset, copy.size, dst_size),
                "copy of {} bytes out of range ({}-byte source, {}-byte destination)",
                copy.size,
                src_size,
                dst_size
            );
        }

        let cmd = {
            let native_pool = &self.command_pools.get(pool.0).native;
            self.backend.allocate_command_buffer(native_pool)?
        };
        let result = self.submit_copies(&cmd, copies);

        let native_pool = &self.command_pools.get(pool.0).native;
        self.backend.free_command_buffer(native_pool, cmd);
        result
    }

    fn submit_copies(&mut self, cmd: &B::CommandBuffer, copies: &[BufferCopy<'_>]) -> Result<()> {
        self.backend.begin_command_buffer(cmd, true)?;
        for copy in copies {
            let region = CopyRegion {
                src_offset: copy.src_offset,
                dst_offset: copy.dst_offset,
                size: copy.size,
            };
            self.backend.cmd_copy_buffer(
                cmd,
                &self.buffers.get(copy.src.0).native,
                &self.buffers.get(copy.dst.0).native,
                &[region],
            );
        }
        self.backend.end_command_buffer(cmd)?;

        self.backend.queue_submit(Submission {
            command_buffer: cmd,
            wait: None,
            signal: None,
            fence: None,
        })?;
        self.transfer_stats.gpu_copy_submissions += 1;

        // Waits for everything on the queue, not just this copy.
        self.backend.queue_wait_idle()?;
        self.transfer_stats.queue_idle_waits += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessConfig;
    use crate::library::Swarm;
    use rstest::rstest;

    fn device() -> Device<crate::backend::HeadlessBackend> {
        Device::headless(Swarm::with_default_hooks(), HeadlessConfig::default())
    }

    #[test]
    fn batched_copies_share_one_submission() {
        let mut device = device();
        let pool = device.create_command_pool().unwrap();
        let usage = BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST;
        let src = device
            .create_buffer(&BufferCreateInfo::new(8, MemoryType::CpuToGpu, usage))
            .unwrap();
        let a = device
            .create_buffer(&BufferCreateInfo::new(4, MemoryType::GpuToCpu, usage))
            .unwrap();
        let b = device
            .create_buffer(&BufferCreateInfo::new(4, MemoryType::GpuToCpu, usage))
            .unwrap();
        device
            .update_buffer(&pool, &src, &[1, 2, 3, 4, 5, 6, 7, 8])
            .unwrap();

        let copies = [
            BufferCopy::whole(&src, &a, 4),
            BufferCopy {
                src: &src,
                dst: &b,
                src_offset: 4,
                dst_offset: 0,
                size: 4,
            },
        ];
        device.copy_buffers(&pool, &copies).unwrap();

        assert_eq!(device.backend().read_buffer(device.raw_buffer(&a)), &[1, 2, 3, 4]);
        assert_eq!(device.backend().read_buffer(device.raw_buffer(&b)), &[5, 6, 7, 8]);
        assert_eq!(device.transfer_stats().gpu_copy_submissions, 1);
        assert_eq!(device.backend().stats().buffer_copies, 2);
        assert_eq!(device.backend().live_objects().command_buffers, 0);
    }

    #[rstest]
    #[case::larger_than_destination(0, 0, 16)]
    #[case::source_offset_past_end(12, 0, 8)]
    #[case::source_offset_overflows(u64::MAX, 0, 4)]
    #[case::destination_offset_overflows(0, u64::MAX, 4)]
    #[case::size_overflows(4, 0, u64::MAX)]
    #[case::empty(0, 0, 0)]
    #[should_panic(expected = "out of range")]
    fn copy_outside_either_buffer_panics(
        #[case] src_offset: u64,
        #[case] dst_offset: u64,
        #[case] size: u64,
    ) {
        let mut device = device();
        let pool = device.create_command_pool().unwrap();
        let src = device
            .create_buffer(&BufferCreateInfo::new(
                16,
                MemoryType::Staging,
                BufferUsage::TRANSFER_SRC,
            ))
            .unwrap();
        let dst = device
            .create_buffer(&BufferCreateInfo::new(
                8,
                MemoryType::GpuOnly,
                BufferUsage::TRANSFER_DST,
            ))
            .unwrap();
        let copy = BufferCopy {
            src: &src,
            dst: &dst,
            src_offset,
            dst_offset,
            size,
        };
        let _ = device.copy_buffers(&pool, &[copy]);
    }

    #[test]
    #[should_panic(expected = "update of 9 bytes into a 8-byte buffer")]
    fn update_never_grows_a_buffer() {
        let mut device = device();
        let pool = device.create_command_pool().unwrap();
        let buffer = device
            .create_buffer(&BufferCreateInfo::new(8, MemoryType::CpuToGpu, BufferUsage::UNIFORM))
            .unwrap();
        let _ = device.update_buffer(&pool, &buffer, &[0; 9]);
    }
}
