#![allow(dead_code)]

use swarm::{
    Device, Extent2D, FramebufferHandle, HeadlessBackend, HeadlessConfig, PresentMode,
    RenderPassCreateInfo, RenderPassHandle, Swarm, SwapchainCreateInfo, SwapchainHandle,
    TextureCreateInfo, TextureHandle, TextureUsage,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn headless(config: HeadlessConfig) -> Device<HeadlessBackend> {
    init_logging();
    Device::headless(Swarm::with_default_hooks(), config)
}

pub fn swapchain_info(width: u32, height: u32) -> SwapchainCreateInfo {
    SwapchainCreateInfo {
        width,
        height,
        present_mode: PresentMode::Fifo,
    }
}

/// Swapchain plus everything drawn into it.
pub struct Targets {
    pub swapchain: SwapchainHandle,
    pub render_pass: RenderPassHandle,
    pub depth: TextureHandle,
    pub framebuffer: FramebufferHandle,
}

fn create_depth(device: &mut Device<HeadlessBackend>, extent: Extent2D) -> TextureHandle {
    let format = device.depth_format().unwrap();
    device
        .create_texture(&TextureCreateInfo {
            format,
            usage: TextureUsage::DEPTH_STENCIL_ATTACHMENT,
            width: extent.width,
            height: extent.height,
            ..Default::default()
        })
        .unwrap()
}

pub fn create_targets(device: &mut Device<HeadlessBackend>, width: u32, height: u32) -> Targets {
    let swapchain = device.create_swapchain(&swapchain_info(width, height)).unwrap();
    let depth_format = device.depth_format().unwrap();
    let render_pass = device
        .create_render_pass(
            &swapchain,
            &RenderPassCreateInfo {
                depth_format: Some(depth_format),
                clear_color: [0.1, 0.2, 0.8, 1.0],
                clear_depth: 1.0,
            },
        )
        .unwrap();
    let extent = device.swapchain_extent(&swapchain);
    let depth = create_depth(device, extent);
    let framebuffer = device
        .create_framebuffer(&swapchain, &render_pass, Some(&depth))
        .unwrap();

    Targets {
        swapchain,
        render_pass,
        depth,
        framebuffer,
    }
}

/// Recreate the swapchain and the size-dependent targets. The render pass
/// survives since the color format does not change.
pub fn recreate_targets(
    device: &mut Device<HeadlessBackend>,
    targets: Targets,
    width: u32,
    height: u32,
) -> Targets {
    let Targets {
        swapchain,
        render_pass,
        depth,
        framebuffer,
    } = targets;
    device.destroy_framebuffer(framebuffer);
    device.destroy_texture(depth);

    let swapchain = device
        .recreate_swapchain(swapchain, &swapchain_info(width, height))
        .unwrap();
    let extent = device.swapchain_extent(&swapchain);
    let depth = create_depth(device, extent);
    let framebuffer = device
        .create_framebuffer(&swapchain, &render_pass, Some(&depth))
        .unwrap();

    Targets {
        swapchain,
        render_pass,
        depth,
        framebuffer,
    }
}

pub fn destroy_targets(device: &mut Device<HeadlessBackend>, targets: Targets) {
    device.destroy_framebuffer(targets.framebuffer);
    device.destroy_texture(targets.depth);
    device.destroy_render_pass(targets.render_pass);
    device.destroy_swapchain(targets.swapchain);
}
