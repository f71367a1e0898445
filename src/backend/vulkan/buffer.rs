// Buffer creation through gpu-allocator
//
// Device-local buffers get a dedicated allocation. Host-visible buffers are
// sub-allocated and stay persistently mapped until destroyed.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use std::ptr::NonNull;

use super::{conversion, VulkanBackend};
use crate::backend::{BackendResult, CopyRegion};
use crate::error::BackendError;
use crate::types::{BufferCreateInfo, MemoryType};

pub struct VulkanBuffer {
    pub(super) raw: vk::Buffer,
    pub(super) allocation: Allocation,
}

impl VulkanBuffer {
    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }
}

impl VulkanBackend {
    pub(super) fn create_buffer_impl(
        &mut self,
        info: &BufferCreateInfo,
    ) -> BackendResult<(VulkanBuffer, Option<NonNull<u8>>)> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(info.size)
            .usage(conversion::buffer_usage(info.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let raw = unsafe { self.device.create_buffer(&buffer_info, None) }?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(raw) };

        let allocation_scheme = if info.memory_type == MemoryType::GpuOnly {
            AllocationScheme::DedicatedBuffer(raw)
        } else {
            AllocationScheme::GpuAllocatorManaged
        };
        let allocation = match self.allocator.allocate(&AllocationCreateDesc {
            name: "swarm buffer",
            requirements,
            location: conversion::memory_location(info.memory_type),
            linear: true,
            allocation_scheme,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(raw, None) };
                return Err(e.into());
            }
        };

        let mapped = if info.memory_type.is_host_visible() {
            allocation.mapped_ptr().map(|ptr| ptr.cast::<u8>())
        } else {
            None
        };
        let bound = unsafe {
            self.device
                .bind_buffer_memory(raw, allocation.memory(), allocation.offset())
        };

        let result = match bound {
            Err(e) => Err(BackendError::from(e)),
            Ok(()) if info.memory_type.is_host_visible() && mapped.is_none() => Err(
                BackendError::Native("host-visible allocation came back unmapped".into()),
            ),
            Ok(()) => Ok(()),
        };
        if let Err(e) = result {
            self.free_allocation(allocation);
            unsafe { self.device.destroy_buffer(raw, None) };
            return Err(e);
        }

        Ok((VulkanBuffer { raw, allocation }, mapped))
    }

    pub(super) fn destroy_buffer_impl(&mut self, buffer: VulkanBuffer) {
        unsafe { self.device.destroy_buffer(buffer.raw, None) };
        self.free_allocation(buffer.allocation);
    }

    pub(super) fn free_allocation(&mut self, allocation: Allocation) {
        if let Err(e) = self.allocator.free(allocation) {
            log::error!("Failed to free GPU allocation: {}", e);
        }
    }

    pub(super) fn cmd_copy_buffer_impl(
        &mut self,
        cmd: vk::CommandBuffer,
        src: &VulkanBuffer,
        dst: &VulkanBuffer,
        regions: &[CopyRegion],
    ) {
        let regions: Vec<vk::BufferCopy> = regions
            .iter()
            .map(|region| vk::BufferCopy {
                src_offset: region.src_offset,
                dst_offset: region.dst_offset,
                size: region.size,
            })
            .collect();
        unsafe { self.device.cmd_copy_buffer(cmd, src.raw, dst.raw, &regions) };
    }
}
