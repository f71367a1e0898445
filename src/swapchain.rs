// Swapchain, render pass and framebuffers
//
// The swapchain's image count is fixed at creation. Framebuffers are made
// one per swapchain image, so they have to be rebuilt whenever the
// swapchain is recreated.

use crate::backend::{Backend, SwapchainDesc};
use crate::device::Device;
use crate::error::Result;
use crate::handle::{FramebufferHandle, RenderPassHandle, SwapchainHandle, TextureHandle};
use crate::types::{ClearValue, Extent2D, RenderPassCreateInfo, SwapchainCreateInfo, TextureFormat};

pub(crate) struct Swapchain<B: Backend> {
    pub(crate) native: B::Swapchain,
    pub(crate) desc: SwapchainDesc,
    pub(crate) info: SwapchainCreateInfo,
}

pub(crate) struct RenderPass<B: Backend> {
    pub(crate) native: B::RenderPass,
    pub(crate) color_format: TextureFormat,
    pub(crate) depth_format: Option<TextureFormat>,
    /// Color first, then depth when present.
    pub(crate) clear_values: Vec<ClearValue>,
}

pub(crate) struct Framebuffer<B: Backend> {
    /// Indexed by swapchain image.
    pub(crate) natives: Vec<B::Framebuffer>,
    pub(crate) extent: Extent2D,
}

impl<B: Backend> Device<B> {
    pub fn create_swapchain(&mut self, info: &SwapchainCreateInfo) -> Result<SwapchainHandle> {
        let slot = self.reserve::<Swapchain<B>>()?;
        let native = self.backend.create_swapchain(info)?;
        let desc = self.backend.swapchain_desc(&native);
        log::info!(
            "Created swapchain: {}x{}, {} images, {:?}",
            desc.extent.width,
            desc.extent.height,
            desc.image_count,
            desc.format
        );

        let raw = self.swapchains.insert(slot.write(Swapchain {
            native,
            desc,
            info: *info,
        }));
        Ok(SwapchainHandle(raw))
    }

    pub fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) {
        self.check_initialized();
        let swapchain = self.swapchains.remove(swapchain.0);
        self.backend.destroy_swapchain(swapchain.native);
    }

    /// Replace a swapchain after a resize or an out-of-date report.
    ///
    /// Waits for the device to go idle and destroys the old swapchain before
    /// creating the new one, since a surface has one swapchain at a time.
    /// The old handle is consumed even if creation fails. Framebuffers built
    /// on the old swapchain must be recreated.
    pub fn recreate_swapchain(
        &mut self,
        swapchain: SwapchainHandle,
        info: &SwapchainCreateInfo,
    ) -> Result<SwapchainHandle> {
        self.wait_idle()?;
        self.destroy_swapchain(swapchain);
        self.create_swapchain(info)
    }

    pub fn swapchain_image_count(&self, swapchain: &SwapchainHandle) -> u32 {
        self.swapchains.get(swapchain.0).desc.image_count
    }

    pub fn swapchain_extent(&self, swapchain: &SwapchainHandle) -> Extent2D {
        self.swapchains.get(swapchain.0).desc.extent
    }

    pub fn swapchain_format(&self, swapchain: &SwapchainHandle) -> TextureFormat {
        self.swapchains.get(swapchain.0).desc.format
    }

    /// The create info the swapchain was built from.
    pub fn swapchain_info(&self, swapchain: &SwapchainHandle) -> &SwapchainCreateInfo {
        &self.swapchains.get(swapchain.0).info
    }

    /// Single-subpass render pass: one color attachment in the swapchain
    /// format, presented at the end, plus an optional depth attachment.
    ///
    /// # Panics
    /// If `info.depth_format` is not a depth format.
    pub fn create_render_pass(
        &mut self,
        swapchain: &SwapchainHandle,
        info: &RenderPassCreateInfo,
    ) -> Result<RenderPassHandle> {
        if let Some(format) = info.depth_format {
            assert!(format.is_depth(), "{:?} is not a depth format", format);
        }
        let slot = self.reserve::<RenderPass<B>>()?;
        let color_format = self.swapchains.get(swapchain.0).desc.format;
        let native = self.backend.create_render_pass(color_format, info.depth_format)?;

        let mut clear_values = vec![ClearValue::Color(info.clear_color)];
        if info.depth_format.is_some() {
            clear_values.push(ClearValue::DepthStencil {
                depth: info.clear_depth,
                stencil: 0,
            });
        }

        let raw = self.render_passes.insert(slot.write(RenderPass {
            native,
            color_format,
            depth_format: info.depth_format,
            clear_values,
        }));
        Ok(RenderPassHandle(raw))
    }

    pub fn destroy_render_pass(&mut self, render_pass: RenderPassHandle) {
        self.check_initialized();
        let render_pass = self.render_passes.remove(render_pass.0);
        self.backend.destroy_render_pass(render_pass.native);
    }

    /// Clear values recorded when a frame begins this render pass.
    pub fn render_pass_clear_values(&self, render_pass: &RenderPassHandle) -> &[ClearValue] {
        &self.render_passes.get(render_pass.0).clear_values
    }

    /// One framebuffer per swapchain image, each pairing that image's view
    /// with the shared depth attachment.
    ///
    /// If creation fails part-way, the framebuffers already made are
    /// destroyed before the error is returned.
    ///
    /// # Panics
    /// If `depth` does not match the render pass depth format or the
    /// swapchain extent, or the render pass was made for another format.
    pub fn create_framebuffer(
        &mut self,
        swapchain: &SwapchainHandle,
        render_pass: &RenderPassHandle,
        depth: Option<&TextureHandle>,
    ) -> Result<FramebufferHandle> {
        let slot = self.reserve::<Framebuffer<B>>()?;

        let sc = self.swapchains.get(swapchain.0);
        let pass = self.render_passes.get(render_pass.0);
        assert_eq!(
            pass.color_format, sc.desc.format,
            "render pass color format does not match the swapchain"
        );

        let depth_view = match (pass.depth_format, depth) {
            (None, None) => None,
            (Some(format), Some(texture)) => {
                let texture = self.textures.get(texture.0);
                assert_eq!(texture.info.format, format, "depth texture format mismatch");
                assert_eq!(
                    Extent2D::new(texture.info.width, texture.info.height),
                    sc.desc.extent,
                    "depth texture extent does not match the swapchain"
                );
                Some(&texture.view)
            }
            (Some(_), None) => {
                panic!("render pass has a depth attachment but no depth texture was given")
            }
            (None, Some(_)) => panic!("depth texture given for a render pass without depth"),
        };

        let mut natives = Vec::with_capacity(sc.desc.image_count as usize);
        for index in 0..sc.desc.image_count {
            match self
                .backend
                .create_framebuffer(&pass.native, &sc.native, index, depth_view)
            {
                Ok(native) => natives.push(native),
                Err(e) => {
                    log::debug!(
                        "Framebuffer {} failed, releasing {} created",
                        index,
                        natives.len()
                    );
                    for native in natives {
                        self.backend.destroy_framebuffer(native);
                    }
                    return Err(e.into());
                }
            }
        }

        let extent = sc.desc.extent;
        let raw = self.framebuffers.insert(slot.write(Framebuffer { natives, extent }));
        Ok(FramebufferHandle(raw))
    }

    pub fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.check_initialized();
        let framebuffer = self.framebuffers.remove(framebuffer.0);
        for native in framebuffer.natives {
            self.backend.destroy_framebuffer(native);
        }
    }

    /// Number of native framebuffers, one per swapchain image.
    pub fn framebuffer_count(&self, framebuffer: &FramebufferHandle) -> usize {
        self.framebuffers.get(framebuffer.0).natives.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessConfig;
    use crate::library::Swarm;
    use crate::types::{PresentMode, TextureCreateInfo, TextureUsage};

    const SWAPCHAIN: SwapchainCreateInfo = SwapchainCreateInfo {
        width: 320,
        height: 240,
        present_mode: PresentMode::Fifo,
    };

    #[test]
    fn render_pass_records_clear_values() {
        let mut device = Device::headless(Swarm::with_default_hooks(), HeadlessConfig::default());
        let swapchain = device.create_swapchain(&SWAPCHAIN).unwrap();
        let info = RenderPassCreateInfo {
            depth_format: Some(TextureFormat::D32Sfloat),
            clear_color: [0.1, 0.2, 0.3, 1.0],
            clear_depth: 1.0,
        };
        let pass = device.create_render_pass(&swapchain, &info).unwrap();
        assert_eq!(
            device.render_pass_clear_values(&pass),
            &[
                ClearValue::Color([0.1, 0.2, 0.3, 1.0]),
                ClearValue::DepthStencil {
                    depth: 1.0,
                    stencil: 0
                },
            ]
        );
    }

    #[test]
    fn failed_framebuffer_releases_the_ones_already_made() {
        let mut device = Device::headless(
            Swarm::with_default_hooks(),
            HeadlessConfig {
                fail_framebuffer_at: Some(2),
                ..Default::default()
            },
        );
        let swapchain = device.create_swapchain(&SWAPCHAIN).unwrap();
        let pass = device
            .create_render_pass(
                &swapchain,
                &RenderPassCreateInfo {
                    depth_format: None,
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(device.create_framebuffer(&swapchain, &pass, None).is_err());
        assert_eq!(device.backend().live_objects().framebuffers, 0);
    }

    #[test]
    #[should_panic(expected = "depth texture extent does not match the swapchain")]
    fn depth_texture_must_match_swapchain_extent() {
        let mut device = Device::headless(Swarm::with_default_hooks(), HeadlessConfig::default());
        let swapchain = device.create_swapchain(&SWAPCHAIN).unwrap();
        let pass = device
            .create_render_pass(&swapchain, &RenderPassCreateInfo::default())
            .unwrap();
        let depth = device
            .create_texture(&TextureCreateInfo {
                format: TextureFormat::D32Sfloat,
                usage: TextureUsage::DEPTH_STENCIL_ATTACHMENT,
                width: 64,
                height: 64,
                ..Default::default()
            })
            .unwrap();
        let _ = device.create_framebuffer(&swapchain, &pass, Some(&depth));
    }
}
