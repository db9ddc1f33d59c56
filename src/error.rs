use thiserror::Error;

use crate::gpu::FramebufferStatus;

/// Errors raised by a [`GraphicsDevice`](crate::gpu::GraphicsDevice) backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("presentation surface was lost or is outdated")]
    SurfaceLost,
    #[error("timed out acquiring the next surface texture")]
    SurfaceTimeout,
    #[error("the GPU is out of memory")]
    OutOfMemory,
    #[error("shader compilation failed: {0}")]
    ShaderCompilation(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

/// Errors raised while configuring or running the render pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("framebuffer `{label}` is incomplete ({status:?})")]
    IncompleteFramebuffer {
        label: &'static str,
        status: FramebufferStatus,
    },
    #[error("invalid render target size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("post-process surface has not been configured")]
    NotConfigured,
    #[error("effect pass `{label}` would sample the buffer it writes")]
    FeedbackLoop { label: &'static str },
    #[error("invalid shadow settings: {0}")]
    InvalidShadowSettings(&'static str),
    #[error("failed to build program `{label}`: {source}")]
    Program {
        label: &'static str,
        #[source]
        source: DeviceError,
    },
    #[error(transparent)]
    Device(#[from] DeviceError),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
