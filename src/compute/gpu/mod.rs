//! GPU execution backend.
//!
//! Runs generated kernels as full-screen fragment passes over a pair of
//! ping-pong RGBA8 render targets using WebGPU (wgpu).

mod backend;
mod context;
mod target;
mod validate;

pub use backend::GpuBackend;
pub use context::GpuContext;
pub use validate::validate_wgsl;

/// Error type for backend operations.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,

    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("Buffer mapping failed: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),

    #[error("Read-back was interrupted before the staging buffer was mapped")]
    ReadbackInterrupted,

    #[error("Failed to allocate {width}x{height} render targets: {reason}")]
    ResourceAllocation { width: u32, height: u32, reason: String },

    #[error("Shader failed to compile:\n{message}")]
    ShaderCompile { message: String, wgsl: String },

    #[error("Shader failed validation:\n{message}")]
    ShaderLink { message: String, wgsl: String },

    #[error("Backend has been released")]
    BackendReleased,

    #[error("Backend has not been configured with a grid shape")]
    NotConfigured,
}
