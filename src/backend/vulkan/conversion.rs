// Conversions between swarm types and Vulkan enums

use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::error::BackendError;
use crate::types::{
    AddressMode, BufferUsage, Extent2D, Filter, MemoryType, PresentMode, TextureFormat,
    TextureType, TextureUsage, WaitStage,
};

impl From<vk::Result> for BackendError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => BackendError::OutOfHostMemory,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => BackendError::OutOfDeviceMemory,
            vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
            vk::Result::ERROR_SURFACE_LOST_KHR => BackendError::SurfaceLost,
            vk::Result::TIMEOUT => BackendError::Timeout,
            other => BackendError::Native(format!("{:?}", other)),
        }
    }
}

impl From<gpu_allocator::AllocationError> for BackendError {
    fn from(error: gpu_allocator::AllocationError) -> Self {
        match error {
            gpu_allocator::AllocationError::OutOfMemory => BackendError::OutOfDeviceMemory,
            other => BackendError::Native(other.to_string()),
        }
    }
}

pub(super) fn memory_location(memory_type: MemoryType) -> MemoryLocation {
    match memory_type {
        MemoryType::GpuOnly => MemoryLocation::GpuOnly,
        MemoryType::CpuToGpu | MemoryType::Staging => MemoryLocation::CpuToGpu,
        MemoryType::GpuToCpu => MemoryLocation::GpuToCpu,
    }
}

pub(super) fn buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    for (ours, theirs) in [
        (BufferUsage::VERTEX, vk::BufferUsageFlags::VERTEX_BUFFER),
        (BufferUsage::INDEX, vk::BufferUsageFlags::INDEX_BUFFER),
        (BufferUsage::UNIFORM, vk::BufferUsageFlags::UNIFORM_BUFFER),
        (BufferUsage::STORAGE, vk::BufferUsageFlags::STORAGE_BUFFER),
        (BufferUsage::TRANSFER_SRC, vk::BufferUsageFlags::TRANSFER_SRC),
        (BufferUsage::TRANSFER_DST, vk::BufferUsageFlags::TRANSFER_DST),
        (BufferUsage::INDIRECT, vk::BufferUsageFlags::INDIRECT_BUFFER),
    ] {
        if usage.contains(ours) {
            flags |= theirs;
        }
    }
    flags
}

pub(super) fn texture_usage(usage: TextureUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    for (ours, theirs) in [
        (TextureUsage::TRANSFER_SRC, vk::ImageUsageFlags::TRANSFER_SRC),
        (TextureUsage::TRANSFER_DST, vk::ImageUsageFlags::TRANSFER_DST),
        (TextureUsage::SAMPLED, vk::ImageUsageFlags::SAMPLED),
        (TextureUsage::COLOR_ATTACHMENT, vk::ImageUsageFlags::COLOR_ATTACHMENT),
        (
            TextureUsage::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        ),
    ] {
        if usage.contains(ours) {
            flags |= theirs;
        }
    }
    flags
}

pub(super) fn format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::Rgba16Sfloat => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::D32Sfloat => vk::Format::D32_SFLOAT,
        TextureFormat::D32SfloatS8Uint => vk::Format::D32_SFLOAT_S8_UINT,
        TextureFormat::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
    }
}

/// Swapchain formats we know how to describe; anything else is rejected.
pub(super) fn texture_format(format: vk::Format) -> Option<TextureFormat> {
    Some(match format {
        vk::Format::R8G8B8A8_UNORM => TextureFormat::Rgba8Unorm,
        vk::Format::R8G8B8A8_SRGB => TextureFormat::Rgba8Srgb,
        vk::Format::B8G8R8A8_UNORM => TextureFormat::Bgra8Unorm,
        vk::Format::B8G8R8A8_SRGB => TextureFormat::Bgra8Srgb,
        vk::Format::R16G16B16A16_SFLOAT => TextureFormat::Rgba16Sfloat,
        _ => return None,
    })
}

pub(super) fn aspect_mask(format: TextureFormat) -> vk::ImageAspectFlags {
    match format {
        TextureFormat::D32Sfloat => vk::ImageAspectFlags::DEPTH,
        TextureFormat::D32SfloatS8Uint | TextureFormat::D24UnormS8Uint => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

pub(super) fn view_type(texture_type: TextureType) -> vk::ImageViewType {
    match texture_type {
        TextureType::Texture2D => vk::ImageViewType::TYPE_2D,
        TextureType::Cube => vk::ImageViewType::CUBE,
    }
}

pub(super) fn filter(filter: Filter) -> vk::Filter {
    match filter {
        Filter::Nearest => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

pub(super) fn address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
    }
}

pub(super) fn present_mode(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
    }
}

pub(super) fn wait_stage(stage: WaitStage) -> vk::PipelineStageFlags {
    match stage {
        WaitStage::ColorAttachmentOutput => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        WaitStage::Transfer => vk::PipelineStageFlags::TRANSFER,
    }
}

pub(super) fn extent(extent: Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: extent.width,
        height: extent.height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_visible_types_map_to_cpu_locations() {
        assert_eq!(memory_location(MemoryType::GpuOnly), MemoryLocation::GpuOnly);
        assert_eq!(memory_location(MemoryType::Staging), MemoryLocation::CpuToGpu);
        assert_eq!(memory_location(MemoryType::GpuToCpu), MemoryLocation::GpuToCpu);
    }

    #[test]
    fn depth_stencil_formats_get_both_aspects() {
        assert_eq!(aspect_mask(TextureFormat::D32Sfloat), vk::ImageAspectFlags::DEPTH);
        assert!(aspect_mask(TextureFormat::D24UnormS8Uint).contains(vk::ImageAspectFlags::STENCIL));
        assert_eq!(aspect_mask(TextureFormat::Rgba8Srgb), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn buffer_usage_bits_translate() {
        let flags = buffer_usage(BufferUsage::VERTEX | BufferUsage::TRANSFER_DST);
        assert_eq!(
            flags,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        );
    }
}
