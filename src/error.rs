// Error types
//
// Three tiers:
// - contract violations panic (stale handles, uninitialized library, bad sizes)
// - resource failures come back as `Error` from every `create_*`
// - per-frame failures come back as `FrameError` and are not recoverable

use std::path::PathBuf;

use crate::types::TextureFormat;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure reported by a backend's native call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("out of host memory")]
    OutOfHostMemory,
    #[error("out of device memory")]
    OutOfDeviceMemory,
    #[error("device lost")]
    DeviceLost,
    #[error("surface lost")]
    SurfaceLost,
    #[error("format {0:?} is not supported for this use")]
    UnsupportedFormat(TextureFormat),
    #[error("invalid usage: {0}")]
    InvalidUsage(String),
    #[error("wait can never complete: {0}")]
    Deadlock(String),
    #[error("timed out")]
    Timeout,
    #[error("native call failed: {0}")]
    Native(String),
}

/// Resource creation and transfer errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("allocation hook returned null for {size} bytes")]
    OutOfHostMemory { size: usize },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("shader {0:?} is not a .spv file")]
    ShaderExtension(PathBuf),

    #[error("failed to read shader {path:?}")]
    ShaderIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shader bytecode is {0} bytes, not a whole number of 32-bit words")]
    ShaderSize(usize),

    #[error("unsupported window system: {0}")]
    UnsupportedSurface(String),
}

/// Failure inside the per-frame state machine.
///
/// Unrecoverable: once recording has begun, a failure means host or driver
/// exhaustion (or device loss). Abort the frame and tear down the device;
/// retrying the same frame is not supported.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("failed waiting for in-flight fence: {0}")]
    WaitFence(BackendError),
    #[error("failed to acquire swapchain image: {0}")]
    Acquire(BackendError),
    #[error("failed to reset frame resources: {0}")]
    Reset(BackendError),
    #[error("failed to begin recording command buffer: {0}")]
    BeginRecording(BackendError),
    #[error("failed to record command buffer: {0}")]
    EndRecording(BackendError),
    #[error("failed to submit draw command buffer: {0}")]
    Submit(BackendError),
    #[error("failed to present swapchain image: {0}")]
    Present(BackendError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::from(BackendError::OutOfDeviceMemory);
        assert_eq!(err.to_string(), "out of device memory");

        let err = FrameError::EndRecording(BackendError::DeviceLost);
        assert_eq!(err.to_string(), "failed to record command buffer: device lost");
    }
}
