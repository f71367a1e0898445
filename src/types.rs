//! Plain data types: flag sets, enums and create-info structs.

use bitflags::bitflags;
use std::path::PathBuf;

bitflags! {
    /// How a buffer will be used by the GPU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const TRANSFER_SRC = 1 << 4;
        const TRANSFER_DST = 1 << 5;
        const INDIRECT = 1 << 6;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// How a texture will be used by the GPU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const COLOR_ATTACHMENT = 1 << 3;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 4;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::SAMPLED
    }
}

/// Memory residency class of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryType {
    /// Device-local, never mapped. Written through a staging copy.
    #[default]
    GpuOnly,
    /// Host-visible, persistently mapped, sequential writes.
    CpuToGpu,
    /// Host-visible, persistently mapped, random access for readback.
    GpuToCpu,
    /// Host-visible, persistently mapped, short-lived transfer source.
    Staging,
}

impl MemoryType {
    /// Whether buffers of this class carry a mapped host pointer.
    pub fn is_host_visible(self) -> bool {
        !matches!(self, MemoryType::GpuOnly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureType {
    #[default]
    Texture2D,
    /// Six array layers, cube-compatible.
    Cube,
}

impl TextureType {
    pub fn array_layers(self) -> u32 {
        match self {
            TextureType::Texture2D => 1,
            TextureType::Cube => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    #[default]
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    Bgra8Srgb,
    Rgba16Sfloat,
    D32Sfloat,
    D32SfloatS8Uint,
    D24UnormS8Uint,
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        matches!(
            self,
            TextureFormat::D32Sfloat
                | TextureFormat::D32SfloatS8Uint
                | TextureFormat::D24UnormS8Uint
        )
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::Rgba16Sfloat | TextureFormat::D32SfloatS8Uint => 8,
            _ => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    Repeat,
    ClampToEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresentMode {
    /// No vsync, may tear.
    Immediate,
    /// No vsync, no tearing.
    Mailbox,
    /// Vsync. Always supported.
    #[default]
    Fifo,
    FifoRelaxed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

/// Pipeline stage a submission waits at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitStage {
    ColorAttachmentOutput,
    Transfer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceCreateInfo {
    pub application_name: String,
    pub application_version: u32,
    /// Enable the validation layer and debug messenger.
    pub debug: bool,
}

impl Default for InstanceCreateInfo {
    fn default() -> Self {
        Self {
            application_name: "swarm".to_string(),
            application_version: 0,
            debug: cfg!(debug_assertions),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceCreateInfo {
    /// Rank discrete GPUs above integrated ones.
    pub prefer_discrete_gpu: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferCreateInfo {
    pub size: u64,
    pub memory_type: MemoryType,
    pub usage: BufferUsage,
}

impl BufferCreateInfo {
    pub fn new(size: u64, memory_type: MemoryType, usage: BufferUsage) -> Self {
        Self {
            size,
            memory_type,
            usage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureCreateInfo {
    pub texture_type: TextureType,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
}

impl Default for TextureCreateInfo {
    fn default() -> Self {
        Self {
            texture_type: TextureType::Texture2D,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST,
            width: 1,
            height: 1,
            mip_levels: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerCreateInfo {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    /// Requested anisotropy. Anisotropic filtering stays disabled whatever
    /// is requested; the native limit is set to the device maximum.
    pub max_anisotropy: f32,
}

impl Default for SamplerCreateInfo {
    fn default() -> Self {
        Self {
            mag_filter: Filter::Linear,
            min_filter: Filter::Linear,
            address_mode_u: AddressMode::Repeat,
            address_mode_v: AddressMode::Repeat,
            address_mode_w: AddressMode::Repeat,
            max_anisotropy: 1.0,
        }
    }
}

/// Sampler state after device limits have been applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerState {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub address_modes: [AddressMode; 3],
    pub anisotropy_enable: bool,
    pub max_anisotropy: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwapchainCreateInfo {
    /// Used only when the surface leaves the extent to the swapchain.
    pub width: u32,
    pub height: u32,
    pub present_mode: PresentMode,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPassCreateInfo {
    pub depth_format: Option<TextureFormat>,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
}

impl Default for RenderPassCreateInfo {
    fn default() -> Self {
        Self {
            depth_format: Some(TextureFormat::D32Sfloat),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            clear_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderCreateInfo {
    pub path: PathBuf,
    pub stage: ShaderStage,
}

/// Swapchain image handed out by acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AcquiredImage {
    pub index: u32,
    /// The swapchain still works but no longer matches the surface exactly.
    pub suboptimal: bool,
}

/// Result of queueing an image for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresentStatus {
    Optimal,
    /// Presented, but the swapchain should be recreated.
    Suboptimal,
    /// Not presented: the swapchain must be recreated.
    OutOfDate,
}

impl PresentStatus {
    pub fn needs_recreate(self) -> bool {
        !matches!(self, PresentStatus::Optimal)
    }
}

/// Device limits the core needs to clamp requests against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceLimits {
    pub sampler_anisotropy: bool,
    pub max_sampler_anisotropy: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_usage_composes() {
        let usage = BufferUsage::VERTEX | BufferUsage::TRANSFER_DST;
        assert!(usage.contains(BufferUsage::TRANSFER_DST));
        assert!(!usage.contains(BufferUsage::INDEX));
        assert_eq!(usage & BufferUsage::VERTEX, BufferUsage::VERTEX);
        assert!((usage & BufferUsage::UNIFORM).is_empty());
    }

    #[test]
    fn only_gpu_only_is_device_local() {
        assert!(!MemoryType::GpuOnly.is_host_visible());
        assert!(MemoryType::CpuToGpu.is_host_visible());
        assert!(MemoryType::GpuToCpu.is_host_visible());
        assert!(MemoryType::Staging.is_host_visible());
    }

    #[test]
    fn depth_formats() {
        assert!(TextureFormat::D32Sfloat.is_depth());
        assert!(TextureFormat::D24UnormS8Uint.is_depth());
        assert!(!TextureFormat::Bgra8Srgb.is_depth());
        assert_eq!(TextureType::Cube.array_layers(), 6);
    }
}
