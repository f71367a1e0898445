// Shader module loading
//
// Shaders are loaded as precompiled SPIR-V. Bytecode is a stream of 32-bit
// little-endian words, so a file whose length is not a multiple of 4 is
// rejected before it reaches the driver.

use std::path::Path;

use crate::backend::Backend;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::handle::ShaderHandle;
use crate::types::{ShaderCreateInfo, ShaderStage};

/// File extension accepted by [`Device::create_shader`].
pub const SHADER_EXTENSION: &str = "spv";

pub(crate) struct Shader<B: Backend> {
    pub(crate) native: B::ShaderModule,
    pub(crate) stage: ShaderStage,
}

/// Convert SPIR-V bytes to words without assuming the buffer is aligned.
pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::ShaderSize(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        .collect())
}

fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(SHADER_EXTENSION) {
        return Err(Error::ShaderExtension(path.to_path_buf()));
    }
    let bytes = std::fs::read(path).map_err(|source| Error::ShaderIo {
        path: path.to_path_buf(),
        source,
    })?;
    spirv_words(&bytes)
}

impl<B: Backend> Device<B> {
    /// Load a `.spv` file and create a shader module from it.
    pub fn create_shader(&mut self, info: &ShaderCreateInfo) -> Result<ShaderHandle> {
        self.check_initialized();
        let words = read_spirv(&info.path)?;
        log::debug!("Loaded shader {:?} ({} words)", info.path, words.len());
        self.create_shader_from_words(&words, info.stage)
    }

    /// Create a shader module from SPIR-V already in memory.
    pub fn create_shader_from_words(
        &mut self,
        words: &[u32],
        stage: ShaderStage,
    ) -> Result<ShaderHandle> {
        let slot = self.reserve::<Shader<B>>()?;
        let native = self.backend.create_shader_module(words)?;

        let raw = self.shaders.insert(slot.write(Shader { native, stage }));
        Ok(ShaderHandle(raw))
    }

    pub fn destroy_shader(&mut self, shader: ShaderHandle) {
        self.check_initialized();
        let shader = self.shaders.remove(shader.0);
        self.backend.destroy_shader_module(shader.native);
    }

    pub fn shader_stage(&self, shader: &ShaderHandle) -> ShaderStage {
        self.shaders.get(shader.0).stage
    }

    /// Native shader module, for pipeline creation.
    pub fn raw_shader_module(&self, shader: &ShaderHandle) -> &B::ShaderModule {
        &self.shaders.get(shader.0).native
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_are_little_endian() {
        let words = spirv_words(&[0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00]).unwrap();
        assert_eq!(words, vec![0x0723_0203, 0x0001_0000]);
    }

    #[test]
    fn partial_word_is_rejected() {
        assert!(matches!(spirv_words(&[1, 2, 3]), Err(Error::ShaderSize(3))));
    }

    #[test]
    fn only_spv_files_are_loaded() {
        let err = read_spirv(Path::new("shaders/triangle.vert")).unwrap_err();
        assert!(matches!(err, Error::ShaderExtension(_)));

        let err = read_spirv(Path::new("does/not/exist.spv")).unwrap_err();
        assert!(matches!(err, Error::ShaderIo { .. }));
    }
}
