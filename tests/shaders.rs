mod common;

use std::fs;

use swarm::{BackendError, Error, HeadlessConfig, ShaderCreateInfo, ShaderStage};

use common::headless;

const TRIANGLE_VERT: [u8; 12] = [
    0x03, 0x02, 0x23, 0x07, // magic
    0x00, 0x00, 0x01, 0x00, // version 1.0
    0x00, 0x00, 0x00, 0x00,
];

#[test]
fn spv_file_becomes_a_shader_module() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("triangle.vert.spv");
    fs::write(&path, TRIANGLE_VERT).unwrap();

    let mut device = headless(HeadlessConfig::default());
    let shader = device
        .create_shader(&ShaderCreateInfo {
            path,
            stage: ShaderStage::Vertex,
        })
        .unwrap();

    assert_eq!(device.shader_stage(&shader), ShaderStage::Vertex);
    assert_eq!(device.backend().live_objects().shader_modules, 1);
    device.destroy_shader(shader);
    assert_eq!(device.backend().live_objects().shader_modules, 0);
}

#[test]
fn non_spv_extension_is_rejected_before_reading() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("triangle.frag");
    fs::write(&path, TRIANGLE_VERT).unwrap();

    let mut device = headless(HeadlessConfig::default());
    let err = device
        .create_shader(&ShaderCreateInfo {
            path,
            stage: ShaderStage::Fragment,
        })
        .unwrap_err();
    assert!(matches!(err, Error::ShaderExtension(_)));
}

#[test]
fn missing_file_reports_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.spv");

    let mut device = headless(HeadlessConfig::default());
    let err = device
        .create_shader(&ShaderCreateInfo {
            path: path.clone(),
            stage: ShaderStage::Fragment,
        })
        .unwrap_err();
    match err {
        Error::ShaderIo { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("expected an io error, got {:?}", other),
    }
}

#[test]
fn truncated_bytecode_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("truncated.spv");
    fs::write(&path, &TRIANGLE_VERT[..10]).unwrap();

    let mut device = headless(HeadlessConfig::default());
    let err = device
        .create_shader(&ShaderCreateInfo {
            path,
            stage: ShaderStage::Vertex,
        })
        .unwrap_err();
    assert!(matches!(err, Error::ShaderSize(10)));
    assert_eq!(device.backend().live_objects().shader_modules, 0);
}

#[test]
fn driver_rejection_surfaces_as_a_backend_error() {
    let mut device = headless(HeadlessConfig::default());
    let err = device
        .create_shader_from_words(&[0xdead_beef], ShaderStage::Vertex)
        .unwrap_err();
    assert!(matches!(err, Error::Backend(BackendError::InvalidUsage(_))));
}
