// =============================================================================
// HEADLESS DEMO - Frame loop without a window
// =============================================================================
//
// FRAME FLOW:
// 1. Load swarm.toml (or defaults) and set up logging
// 2. Create a headless device, upload a vertex buffer through staging
// 3. Build swapchain -> render pass -> depth texture -> framebuffers
// 4. Draw frames through the FrameOrchestrator
// 5. Halfway through, the "window" is resized and the targets are rebuilt
//
// Run with `RUST_LOG=debug cargo run --example headless` to see every step.
//
// =============================================================================

use anyhow::{Context, Result};
use swarm::{
    BufferCreateInfo, BufferUsage, Config, Device, Extent2D, FrameOrchestrator, FrameOutcome,
    FrameTargets, FramebufferHandle, HeadlessBackend, HeadlessConfig, MemoryType,
    RenderPassHandle, Swarm, SwapchainHandle, TextureCreateInfo, TextureHandle, TextureUsage,
};

const FRAMES: u64 = 120;

fn main() -> Result<()> {
    let config = Config::load();
    init_logging();
    log::info!("Starting headless demo");
    log::info!(
        "Swapchain: {}x{} ({}), {} frame(s) in flight",
        config.swapchain.width,
        config.swapchain.height,
        config.swapchain.present_mode,
        config.frame.frames_in_flight
    );

    let swarm = Swarm::with_default_hooks();
    let mut device = Device::headless(swarm.clone(), HeadlessConfig::default());

    upload_triangle(&mut device)?;

    let mut targets = Targets::new(&mut device, &config)?;
    let mut frames = FrameOrchestrator::with_frames_in_flight(
        &mut device,
        &targets.swapchain,
        config.frame.frames_in_flight,
    )
    .context("Failed to create frame resources")?;

    for frame in 0..FRAMES {
        if frame == FRAMES / 2 {
            let extent = Extent2D::new(config.swapchain.width * 2, config.swapchain.height * 2);
            log::info!("Simulating window resize to {}x{}", extent.width, extent.height);
            device.backend_mut().resize_surface(extent);
        }

        let outcome = frames.draw(&mut device, &targets.frame_targets(), |_, _, ctx| {
            log::trace!("Recording frame {} into image {}", ctx.frame_number, ctx.image_index);
        })?;

        if outcome.needs_recreate() {
            if outcome == FrameOutcome::Skipped {
                log::debug!("Frame {} skipped, swapchain out of date", frame);
            }
            targets = targets.recreate(&mut device, &config)?;
            frames.resize(&mut device, &targets.swapchain)?;
        }
    }

    device.wait_idle()?;
    let stats = device.backend().stats();
    log::info!(
        "Drew {} frames: {} submissions, {} presents, {} render passes",
        frames.frame_number(),
        stats.submissions,
        stats.presents,
        stats.render_passes
    );

    frames.destroy(&mut device);
    targets.destroy(&mut device);
    drop(device);
    swarm.shutdown();
    Ok(())
}

fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();
    builder.init();
}

fn upload_triangle(device: &mut Device<HeadlessBackend>) -> Result<()> {
    #[rustfmt::skip]
    let vertices: [f32; 15] = [
        // x,    y,   r,   g,   b
         0.0, -0.5, 1.0, 0.0, 0.0,
         0.5,  0.5, 0.0, 1.0, 0.0,
        -0.5,  0.5, 0.0, 0.0, 1.0,
    ];
    let bytes: Vec<u8> = vertices.iter().flat_map(|v| v.to_le_bytes()).collect();

    let pool = device.create_command_pool()?;
    let buffer = device.create_buffer(&BufferCreateInfo::new(
        bytes.len() as u64,
        MemoryType::GpuOnly,
        BufferUsage::VERTEX | BufferUsage::TRANSFER_DST,
    ))?;
    let result = device.update_buffer(&pool, &buffer, &bytes);
    log::info!("Uploaded {} vertex bytes: {:?}", bytes.len(), device.transfer_stats());

    device.destroy_buffer(buffer);
    device.destroy_command_pool(pool);
    Ok(result?)
}

/// Everything that depends on the swapchain extent.
struct Targets {
    swapchain: SwapchainHandle,
    render_pass: RenderPassHandle,
    depth: TextureHandle,
    framebuffer: FramebufferHandle,
}

impl Targets {
    fn new(device: &mut Device<HeadlessBackend>, config: &Config) -> Result<Self> {
        let swapchain = device
            .create_swapchain(&config.swapchain_info())
            .context("Failed to create swapchain")?;
        let depth_format = device.depth_format()?;
        let render_pass =
            device.create_render_pass(&swapchain, &config.render_pass_info(Some(depth_format)))?;
        let depth = create_depth(device, &swapchain)?;
        let framebuffer = device.create_framebuffer(&swapchain, &render_pass, Some(&depth))?;

        Ok(Self {
            swapchain,
            render_pass,
            depth,
            framebuffer,
        })
    }

    fn frame_targets(&self) -> FrameTargets<'_> {
        FrameTargets {
            swapchain: &self.swapchain,
            render_pass: &self.render_pass,
            framebuffer: &self.framebuffer,
        }
    }

    /// Rebuild the swapchain and the size-dependent targets. The render pass
    /// survives since the color format does not change.
    fn recreate(self, device: &mut Device<HeadlessBackend>, config: &Config) -> Result<Self> {
        let Self {
            swapchain,
            render_pass,
            depth,
            framebuffer,
        } = self;
        device.destroy_framebuffer(framebuffer);
        device.destroy_texture(depth);

        let swapchain = device
            .recreate_swapchain(swapchain, &config.swapchain_info())
            .context("Failed to recreate swapchain")?;
        let depth = create_depth(device, &swapchain)?;
        let framebuffer = device.create_framebuffer(&swapchain, &render_pass, Some(&depth))?;
        log::info!("Swapchain recreated at {:?}", device.swapchain_extent(&swapchain));

        Ok(Self {
            swapchain,
            render_pass,
            depth,
            framebuffer,
        })
    }

    fn destroy(self, device: &mut Device<HeadlessBackend>) {
        device.destroy_framebuffer(self.framebuffer);
        device.destroy_texture(self.depth);
        device.destroy_render_pass(self.render_pass);
        device.destroy_swapchain(self.swapchain);
    }
}

fn create_depth(
    device: &mut Device<HeadlessBackend>,
    swapchain: &SwapchainHandle,
) -> Result<TextureHandle> {
    let extent = device.swapchain_extent(swapchain);
    let format = device.depth_format()?;
    let texture = device.create_texture(&TextureCreateInfo {
        format,
        usage: TextureUsage::DEPTH_STENCIL_ATTACHMENT,
        width: extent.width,
        height: extent.height,
        ..Default::default()
    })?;
    Ok(texture)
}
