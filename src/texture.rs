// Texture and sampler manager

use crate::backend::Backend;
use crate::device::Device;
use crate::error::Result;
use crate::handle::{SamplerHandle, TextureHandle};
use crate::types::{DeviceLimits, SamplerCreateInfo, SamplerState, TextureCreateInfo, TextureType};

pub(crate) struct Texture<B: Backend> {
    pub(crate) image: B::Image,
    pub(crate) view: B::ImageView,
    pub(crate) info: TextureCreateInfo,
}

pub(crate) struct Sampler<B: Backend> {
    pub(crate) native: B::Sampler,
    pub(crate) state: SamplerState,
}

/// Apply device limits to a sampler request.
///
/// Anisotropic filtering is never enabled, whatever the request asks for.
/// The native limit still carries the device maximum.
pub(crate) fn resolve_sampler_state(
    info: &SamplerCreateInfo,
    limits: &DeviceLimits,
) -> SamplerState {
    SamplerState {
        mag_filter: info.mag_filter,
        min_filter: info.min_filter,
        address_modes: [info.address_mode_u, info.address_mode_v, info.address_mode_w],
        anisotropy_enable: false,
        max_anisotropy: limits.max_sampler_anisotropy,
    }
}

impl<B: Backend> Device<B> {
    /// Create a device-local image with a default view over every mip level
    /// and array layer.
    ///
    /// Cube textures get six layers. If the view cannot be created the image
    /// is released before the error is returned.
    ///
    /// # Panics
    /// On a zero extent or mip count, or a non-square cube.
    pub fn create_texture(&mut self, info: &TextureCreateInfo) -> Result<TextureHandle> {
        assert!(
            info.width > 0 && info.height > 0 && info.mip_levels > 0,
            "texture extent and mip count must be non-zero"
        );
        assert!(
            info.texture_type != TextureType::Cube || info.width == info.height,
            "cube texture faces must be square"
        );
        let slot = self.reserve::<Texture<B>>()?;

        let image = self.backend.create_image(info)?;
        let view = match self.backend.create_image_view(&image, info) {
            Ok(view) => view,
            Err(e) => {
                self.backend.destroy_image(image);
                return Err(e.into());
            }
        };
        log::debug!(
            "Created texture: {}x{} {:?} {:?}, {} mip(s)",
            info.width,
            info.height,
            info.texture_type,
            info.format,
            info.mip_levels
        );

        let raw = self.textures.insert(slot.write(Texture {
            image,
            view,
            info: *info,
        }));
        Ok(TextureHandle(raw))
    }

    pub fn destroy_texture(&mut self, texture: TextureHandle) {
        self.check_initialized();
        let texture = self.textures.remove(texture.0);
        self.backend.destroy_image_view(texture.view);
        self.backend.destroy_image(texture.image);
    }

    pub fn texture_info(&self, texture: &TextureHandle) -> &TextureCreateInfo {
        &self.textures.get(texture.0).info
    }

    pub fn create_sampler(&mut self, info: &SamplerCreateInfo) -> Result<SamplerHandle> {
        let slot = self.reserve::<Sampler<B>>()?;
        let state = resolve_sampler_state(info, &self.backend.limits());
        let native = self.backend.create_sampler(&state)?;

        let raw = self.samplers.insert(slot.write(Sampler { native, state }));
        Ok(SamplerHandle(raw))
    }

    pub fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.check_initialized();
        let sampler = self.samplers.remove(sampler.0);
        self.backend.destroy_sampler(sampler.native);
    }

    /// Sampler state as created, after device limits were applied.
    pub fn sampler_state(&self, sampler: &SamplerHandle) -> &SamplerState {
        &self.samplers.get(sampler.0).state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const LIMITS: DeviceLimits = DeviceLimits {
        sampler_anisotropy: true,
        max_sampler_anisotropy: 16.0,
    };

    #[rstest]
    #[case::default_request(1.0, LIMITS, 16.0)]
    #[case::within_limit(8.0, LIMITS, 16.0)]
    #[case::above_limit(64.0, LIMITS, 16.0)]
    #[case::unsupported(
        8.0,
        DeviceLimits { sampler_anisotropy: false, max_sampler_anisotropy: 1.0 },
        1.0
    )]
    fn anisotropy_stays_disabled_at_the_device_limit(
        #[case] requested: f32,
        #[case] limits: DeviceLimits,
        #[case] level: f32,
    ) {
        let info = SamplerCreateInfo {
            max_anisotropy: requested,
            ..Default::default()
        };
        let state = resolve_sampler_state(&info, &limits);
        assert!(!state.anisotropy_enable);
        assert_eq!(state.max_anisotropy, level);
    }
}
