// Images, image views and samplers

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::{conversion, VulkanBackend};
use crate::backend::BackendResult;
use crate::error::BackendError;
use crate::types::{SamplerState, TextureCreateInfo, TextureFormat, TextureType};

pub struct VulkanImage {
    pub(super) raw: vk::Image,
    pub(super) allocation: Allocation,
}

impl VulkanImage {
    pub fn raw(&self) -> vk::Image {
        self.raw
    }
}

impl VulkanBackend {
    pub(super) fn supports_depth_format_impl(&self, format: TextureFormat) -> bool {
        let props = unsafe {
            self.instance
                .raw
                .get_physical_device_format_properties(
                    self.physical_device,
                    conversion::format(format),
                )
        };
        props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    }

    pub(super) fn create_image_impl(
        &mut self,
        info: &TextureCreateInfo,
    ) -> BackendResult<VulkanImage> {
        let flags = match info.texture_type {
            TextureType::Texture2D => vk::ImageCreateFlags::empty(),
            TextureType::Cube => vk::ImageCreateFlags::CUBE_COMPATIBLE,
        };
        let image_info = vk::ImageCreateInfo::builder()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: info.width,
                height: info.height,
                depth: 1,
            })
            .mip_levels(info.mip_levels)
            .array_layers(info.texture_type.array_layers())
            .format(conversion::format(info.format))
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(conversion::texture_usage(info.usage))
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let raw = match unsafe { self.device.create_image(&image_info, None) } {
            Ok(raw) => raw,
            Err(vk::Result::ERROR_FORMAT_NOT_SUPPORTED) => {
                return Err(BackendError::UnsupportedFormat(info.format))
            }
            Err(e) => return Err(e.into()),
        };
        let requirements = unsafe { self.device.get_image_memory_requirements(raw) };

        let allocation = match self.allocator.allocate(&AllocationCreateDesc {
            name: "swarm texture",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::DedicatedImage(raw),
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(raw, None) };
                return Err(e.into());
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_image_memory(raw, allocation.memory(), allocation.offset())
        } {
            self.free_allocation(allocation);
            unsafe { self.device.destroy_image(raw, None) };
            return Err(e.into());
        }

        Ok(VulkanImage { raw, allocation })
    }

    pub(super) fn destroy_image_impl(&mut self, image: VulkanImage) {
        unsafe { self.device.destroy_image(image.raw, None) };
        self.free_allocation(image.allocation);
    }

    pub(super) fn create_image_view_impl(
        &mut self,
        image: &VulkanImage,
        info: &TextureCreateInfo,
    ) -> BackendResult<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image.raw)
            .view_type(conversion::view_type(info.texture_type))
            .format(conversion::format(info.format))
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: conversion::aspect_mask(info.format),
                base_mip_level: 0,
                level_count: info.mip_levels,
                base_array_layer: 0,
                layer_count: info.texture_type.array_layers(),
            });

        Ok(unsafe { self.device.create_image_view(&view_info, None) }?)
    }

    pub(super) fn create_sampler_impl(
        &mut self,
        state: &SamplerState,
    ) -> BackendResult<vk::Sampler> {
        let [u, v, w] = state.address_modes;
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(conversion::filter(state.mag_filter))
            .min_filter(conversion::filter(state.min_filter))
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(conversion::address_mode(u))
            .address_mode_v(conversion::address_mode(v))
            .address_mode_w(conversion::address_mode(w))
            .anisotropy_enable(state.anisotropy_enable)
            .max_anisotropy(state.max_anisotropy)
            .compare_enable(false)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false);

        Ok(unsafe { self.device.create_sampler(&sampler_info, None) }?)
    }
}
