mod common;

use swarm::{
    AddressMode, BackendError, Error, Filter, HeadlessConfig, SamplerCreateInfo, TextureCreateInfo,
    TextureFormat, TextureType, TextureUsage,
};

use common::headless;

#[test]
fn cube_texture_reserves_six_faces() {
    let mut device = headless(HeadlessConfig::default());
    let face = TextureCreateInfo {
        width: 16,
        height: 16,
        ..Default::default()
    };
    let flat = device.create_texture(&face).unwrap();
    let flat_bytes = device.backend().device_memory_used();

    let cube = device
        .create_texture(&TextureCreateInfo {
            texture_type: TextureType::Cube,
            ..face
        })
        .unwrap();

    assert_eq!(flat_bytes, 16 * 16 * 4);
    assert_eq!(device.backend().device_memory_used(), flat_bytes * 7);
    assert_eq!(device.texture_info(&cube).texture_type.array_layers(), 6);

    device.destroy_texture(cube);
    device.destroy_texture(flat);
    assert_eq!(device.backend().device_memory_used(), 0);
}

#[test]
fn mip_chain_is_accounted_down_to_one_texel() {
    let mut device = headless(HeadlessConfig::default());
    let texture = device
        .create_texture(&TextureCreateInfo {
            width: 4,
            height: 4,
            mip_levels: 3,
            ..Default::default()
        })
        .unwrap();

    // 4x4 + 2x2 + 1x1 texels, 4 bytes each.
    assert_eq!(device.backend().device_memory_used(), (16 + 4 + 1) * 4);
    device.destroy_texture(texture);
}

#[test]
fn failed_view_releases_the_image() {
    let mut device = headless(HeadlessConfig {
        unsupported_view_formats: vec![TextureFormat::Rgba16Sfloat],
        ..Default::default()
    });

    let err = device
        .create_texture(&TextureCreateInfo {
            format: TextureFormat::Rgba16Sfloat,
            usage: TextureUsage::COLOR_ATTACHMENT | TextureUsage::SAMPLED,
            width: 64,
            height: 64,
            ..Default::default()
        })
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Backend(BackendError::UnsupportedFormat(TextureFormat::Rgba16Sfloat))
    ));
    let live = device.backend().live_objects();
    assert_eq!(live.images, 0);
    assert_eq!(live.image_views, 0);
    assert_eq!(device.backend().device_memory_used(), 0);
}

#[test]
fn exhausted_device_memory_is_reported() {
    let mut device = headless(HeadlessConfig {
        device_memory_budget: Some(64 * 64 * 4),
        ..Default::default()
    });
    let info = TextureCreateInfo {
        width: 64,
        height: 64,
        ..Default::default()
    };
    let first = device.create_texture(&info).unwrap();

    let err = device.create_texture(&info).unwrap_err();
    assert!(matches!(err, Error::Backend(BackendError::OutOfDeviceMemory)));
    assert_eq!(device.backend().live_objects().images, 1);

    device.destroy_texture(first);
    let second = device.create_texture(&info).unwrap();
    device.destroy_texture(second);
}

#[test]
fn sampler_keeps_anisotropy_off_whatever_is_requested() {
    let mut device = headless(HeadlessConfig {
        max_sampler_anisotropy: 4.0,
        ..Default::default()
    });
    let sampler = device
        .create_sampler(&SamplerCreateInfo {
            mag_filter: Filter::Nearest,
            address_mode_u: AddressMode::ClampToEdge,
            max_anisotropy: 16.0,
            ..Default::default()
        })
        .unwrap();

    let state = device.sampler_state(&sampler);
    assert!(!state.anisotropy_enable);
    assert_eq!(state.max_anisotropy, 4.0);
    assert_eq!(state.mag_filter, Filter::Nearest);
    assert_eq!(state.min_filter, Filter::Linear);
    assert_eq!(
        state.address_modes,
        [AddressMode::ClampToEdge, AddressMode::Repeat, AddressMode::Repeat]
    );

    device.destroy_sampler(sampler);
}

#[test]
fn sampler_on_a_device_without_anisotropy_uses_its_limit() {
    let mut device = headless(HeadlessConfig {
        sampler_anisotropy: false,
        max_sampler_anisotropy: 1.0,
        ..Default::default()
    });
    let sampler = device
        .create_sampler(&SamplerCreateInfo {
            max_anisotropy: 8.0,
            ..Default::default()
        })
        .unwrap();

    let state = device.sampler_state(&sampler);
    assert!(!state.anisotropy_enable);
    assert_eq!(state.max_anisotropy, 1.0);
    device.destroy_sampler(sampler);
}

#[test]
#[should_panic(expected = "cube texture faces must be square")]
fn non_square_cube_panics() {
    let mut device = headless(HeadlessConfig::default());
    let _ = device.create_texture(&TextureCreateInfo {
        texture_type: TextureType::Cube,
        width: 32,
        height: 16,
        ..Default::default()
    });
}
