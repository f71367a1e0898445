// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.

use ash::vk;

use super::{conversion, VulkanBackend};
use crate::backend::{BackendResult, SwapchainDesc};
use crate::error::BackendError;
use crate::types::{AcquiredImage, Extent2D, PresentStatus, SwapchainCreateInfo};

pub struct VulkanSwapchain {
    pub(super) raw: vk::SwapchainKHR,
    pub(super) image_views: Vec<vk::ImageView>,
    pub(super) desc: SwapchainDesc,
}

impl VulkanBackend {
    pub(super) fn create_swapchain_impl(
        &mut self,
        info: &SwapchainCreateInfo,
    ) -> BackendResult<VulkanSwapchain> {
        let surface_loader = &self.instance.surface_loader;
        let surface = self.surface.raw;

        // Query surface capabilities, formats and present modes
        let surface_caps = unsafe {
            surface_loader.get_physical_device_surface_capabilities(self.physical_device, surface)
        }?;
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(self.physical_device, surface)
        }?;
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(self.physical_device, surface)
        }?;

        // Prefer SRGB, otherwise the first format we can describe
        let (surface_format, format) = formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| formats.iter().find(|f| conversion::texture_format(f.format).is_some()))
            .and_then(|f| conversion::texture_format(f.format).map(|format| (*f, format)))
            .ok_or_else(|| {
                BackendError::Native("surface offers no supported color format".into())
            })?;

        // FIFO is always supported
        let requested = conversion::present_mode(info.present_mode);
        let present_mode = if present_modes.contains(&requested) {
            requested
        } else {
            log::warn!("Present mode {:?} not supported, using FIFO", requested);
            vk::PresentModeKHR::FIFO
        };
        log::info!("Present mode: {:?}", present_mode);

        let extent = if surface_caps.current_extent.width != u32::MAX {
            surface_caps.current_extent
        } else {
            vk::Extent2D {
                width: info.width.clamp(
                    surface_caps.min_image_extent.width,
                    surface_caps.max_image_extent.width,
                ),
                height: info.height.clamp(
                    surface_caps.min_image_extent.height,
                    surface_caps.max_image_extent.height,
                ),
            }
        };
        if extent.width == 0 || extent.height == 0 {
            return Err(BackendError::InvalidUsage(
                "surface has a zero extent (window minimized?)".into(),
            ));
        }

        // One more than the minimum so the driver never blocks us on acquire
        let mut image_count = surface_caps.min_image_count + 1;
        if surface_caps.max_image_count > 0 && image_count > surface_caps.max_image_count {
            image_count = surface_caps.max_image_count;
        }

        let queue_families = [self.graphics_family, self.present_family];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);
        create_info = if self.graphics_family == self.present_family {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_families)
        };

        let raw = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }?;

        let images = match unsafe { self.swapchain_loader.get_swapchain_images(raw) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { self.swapchain_loader.destroy_swapchain(raw, None) };
                return Err(e.into());
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            match unsafe { self.device.create_image_view(&view_info, None) } {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    unsafe {
                        for view in image_views {
                            self.device.destroy_image_view(view, None);
                        }
                        self.swapchain_loader.destroy_swapchain(raw, None);
                    }
                    return Err(e.into());
                }
            }
        }

        Ok(VulkanSwapchain {
            raw,
            desc: SwapchainDesc {
                image_count: images.len() as u32,
                extent: Extent2D::new(extent.width, extent.height),
                format,
            },
            image_views,
        })
    }

    pub(super) fn destroy_swapchain_impl(&mut self, swapchain: VulkanSwapchain) {
        unsafe {
            for view in swapchain.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(swapchain.raw, None);
        }
    }

    pub(super) fn acquire_next_image_impl(
        &mut self,
        swapchain: &VulkanSwapchain,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> BackendResult<Option<AcquiredImage>> {
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain.raw, timeout_ns, signal, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => Ok(Some(AcquiredImage { index, suboptimal })),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub(super) fn queue_present_impl(
        &mut self,
        swapchain: &VulkanSwapchain,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> BackendResult<PresentStatus> {
        let wait_semaphores = [wait];
        let swapchains = [swapchain.raw];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.swapchain_loader
                .queue_present(self.present_queue, &present_info)
        };

        match result {
            Ok(false) => Ok(PresentStatus::Optimal),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }
}
