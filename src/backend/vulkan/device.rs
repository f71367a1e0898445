// Physical device selection and logical device creation
//
// A device qualifies when it has a graphics queue, can present to the
// surface and supports VK_KHR_swapchain. Among those, discrete GPUs rank
// first unless the caller asked otherwise.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use std::collections::BTreeSet;
use std::ffi::CStr;

use super::instance::InstanceShared;
use crate::types::DeviceLimits;

pub(super) struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub graphics_family: u32,
    pub present_family: u32,
    pub name: String,
    pub limits: DeviceLimits,
}

pub(super) fn pick_physical_device(
    instance: &InstanceShared,
    surface: vk::SurfaceKHR,
    prefer_discrete_gpu: bool,
) -> Result<SelectedDevice> {
    let devices = unsafe { instance.raw.enumerate_physical_devices() }
        .context("Failed to enumerate physical devices")?;

    if devices.is_empty() {
        anyhow::bail!("No Vulkan-capable GPU found");
    }

    // Score each device
    let mut best: Option<(u32, SelectedDevice)> = None;

    for device in devices {
        let props = unsafe { instance.raw.get_physical_device_properties(device) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        if !supports_swapchain(instance, device)? {
            log::debug!("Skipping {}: no VK_KHR_swapchain", name);
            continue;
        }
        let Some((graphics_family, present_family)) =
            find_queue_families(instance, device, surface)?
        else {
            log::debug!("Skipping {}: no graphics or present queue", name);
            continue;
        };

        let (preferred, other) = if prefer_discrete_gpu {
            (vk::PhysicalDeviceType::DISCRETE_GPU, vk::PhysicalDeviceType::INTEGRATED_GPU)
        } else {
            (vk::PhysicalDeviceType::INTEGRATED_GPU, vk::PhysicalDeviceType::DISCRETE_GPU)
        };
        let mut score = match props.device_type {
            t if t == preferred => 1000,
            t if t == other => 100,
            _ => 1,
        };
        // One queue for both is simpler to share resources across
        if graphics_family == present_family {
            score += 10;
        }

        let features = unsafe { instance.raw.get_physical_device_features(device) };
        let limits = DeviceLimits {
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
            max_sampler_anisotropy: props.limits.max_sampler_anisotropy,
        };

        if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
            best = Some((
                score,
                SelectedDevice {
                    physical_device: device,
                    graphics_family,
                    present_family,
                    name,
                    limits,
                },
            ));
        }
    }

    let (_, selected) = best.context("No GPU can present to this surface")?;
    log::info!("Selected GPU: {}", selected.name);
    Ok(selected)
}

fn supports_swapchain(instance: &InstanceShared, device: vk::PhysicalDevice) -> Result<bool> {
    let extensions = unsafe { instance.raw.enumerate_device_extension_properties(device) }
        .context("Failed to enumerate device extensions")?;
    Ok(extensions.iter().any(|ext| {
        (unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }) == khr::Swapchain::name()
    }))
}

/// Graphics family, and a family that can present to `surface` (the same
/// one when possible).
fn find_queue_families(
    instance: &InstanceShared,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<Option<(u32, u32)>> {
    let families = unsafe { instance.raw.get_physical_device_queue_family_properties(device) };

    let mut graphics = None;
    let mut present = None;
    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        let supports_present = unsafe {
            instance
                .surface_loader
                .get_physical_device_surface_support(device, index, surface)
        }
        .context("Failed to query surface support")?;
        let supports_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);

        if supports_graphics && supports_present {
            return Ok(Some((index, index)));
        }
        if supports_graphics && graphics.is_none() {
            graphics = Some(index);
        }
        if supports_present && present.is_none() {
            present = Some(index);
        }
    }

    Ok(graphics.zip(present))
}

pub(super) fn create_logical_device(
    instance: &InstanceShared,
    selected: &SelectedDevice,
) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
    let queue_priorities = [1.0];
    let families: BTreeSet<u32> = [selected.graphics_family, selected.present_family].into();
    let queue_create_infos: Vec<_> = families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
                .build()
        })
        .collect();

    let extensions = [khr::Swapchain::name().as_ptr()];
    let features = vk::PhysicalDeviceFeatures::builder()
        .sampler_anisotropy(selected.limits.sampler_anisotropy)
        .build();

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    let device = unsafe {
        instance
            .raw
            .create_device(selected.physical_device, &create_info, None)
    }
    .context("Failed to create logical device")?;

    let graphics_queue = unsafe { device.get_device_queue(selected.graphics_family, 0) };
    let present_queue = unsafe { device.get_device_queue(selected.present_family, 0) };

    Ok((device, graphics_queue, present_queue))
}

pub(super) fn create_allocator(
    instance: &InstanceShared,
    physical_device: vk::PhysicalDevice,
    device: &ash::Device,
) -> Result<Allocator> {
    let allocator = Allocator::new(&AllocatorCreateDesc {
        instance: instance.raw.clone(),
        device: device.clone(),
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: Default::default(),
    })
    .context("Failed to create memory allocator")?;

    Ok(allocator)
}
