// =============================================================================
// SWARM - Handle-based Vulkan facade
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Swarm (library state, allocation hooks)                        │
// │    └── Device<B: Backend> (handle arenas, single owning thread) │
// │          ├── Buffers / textures / samplers                      │
// │          ├── Command pools + command buffers                    │
// │          ├── Fences + semaphores                                │
// │          └── Swapchain -> render pass -> framebuffers           │
// │                └── FrameOrchestrator (one frame per draw call)  │
// └─────────────────────────────────────────────────────────────────┘
//
// Backends: `VulkanBackend` (ash + gpu-allocator) talks to a real GPU,
// `HeadlessBackend` simulates one in host memory and checks usage.
//
// =============================================================================

//! Handle-based facade over Vulkan.
//!
//! Create a [`Swarm`], initialize it, then build a [`Device`] on a backend.
//! Every object the device creates is returned as a typed handle that is
//! consumed when the object is destroyed.
//!
//! ```
//! use swarm::{BufferCreateInfo, BufferUsage, Device, HeadlessConfig, MemoryType, Swarm};
//!
//! let swarm = Swarm::with_default_hooks();
//! let mut device = Device::headless(swarm, HeadlessConfig::default());
//! let pool = device.create_command_pool().unwrap();
//!
//! let usage = BufferUsage::VERTEX | BufferUsage::TRANSFER_DST;
//! let info = BufferCreateInfo::new(64, MemoryType::GpuOnly, usage);
//! let buffer = device.create_buffer(&info).unwrap();
//! device.update_buffer(&pool, &buffer, &[1u8; 64]).unwrap();
//!
//! device.destroy_buffer(buffer);
//! device.destroy_command_pool(pool);
//! ```

pub mod backend;
pub mod buffer;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod handle;
pub mod library;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod types;

pub use backend::{Backend, HeadlessBackend, HeadlessConfig, HeadlessStats, LiveObjects};
#[cfg(feature = "vulkan")]
pub use backend::{Instance, Surface, VulkanBackend};
pub use buffer::BufferCopy;
pub use config::Config;
pub use device::{Device, TransferStats};
pub use error::{BackendError, Error, FrameError, Result};
pub use frame::{
    BeginFrameInfo, FrameContext, FrameOrchestrator, FrameOutcome, FrameSync, FrameTargets,
    SubmitFrameInfo, DEFAULT_FRAMES_IN_FLIGHT,
};
pub use handle::{
    BufferHandle, CommandBufferHandle, CommandPoolHandle, FenceHandle, FramebufferHandle,
    RenderPassHandle, SamplerHandle, SemaphoreHandle, ShaderHandle, SwapchainHandle, TextureHandle,
};
pub use library::{AllocHooks, Swarm};
pub use surface::SurfaceCreateInfo;
pub use types::*;
