use thiserror::Error;
use vulkanite::vk;

/// Everything that can go wrong inside a [`GpuContext`](crate::GpuContext).
///
/// Initialization failures (`Loader`, `NoPhysicalDevice`, `NoGraphicsQueue`,
/// `NoSurfaceFormat`, `Vulkan` during `GpuContext::new`) have no degraded mode;
/// callers are expected to treat them as fatal.
#[derive(Error, Debug)]
pub enum GpuError {
    #[error("Vulkan call failed: {0:?}")]
    Vulkan(vk::Status),

    #[error("failed to load the Vulkan library: {0}")]
    Loader(String),

    #[error("window handle is unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("unsupported windowing platform for surface creation")]
    UnsupportedPlatform,

    #[error("no Vulkan physical device is available")]
    NoPhysicalDevice,

    #[error("no queue family supports graphics")]
    NoGraphicsQueue,

    #[error("the surface reports no formats")]
    NoSurfaceFormat,

    #[error("the surface has a zero-sized extent")]
    ZeroExtent,

    #[error("invalid {kind} handle {raw:#x}")]
    InvalidHandle { kind: &'static str, raw: u64 },

    #[error("the swap chain is out of date and must be rebuilt")]
    SwapchainOutOfDate,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("the GPU device was lost")]
    DeviceLost,

    #[error("{operation} is not allowed while the frame is {state}")]
    FrameState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("push constants [{offset}, {end}) exceed the {limit} byte range")]
    PushConstantRange { offset: u32, end: u32, limit: u32 },

    #[error("no graphics pipeline is bound")]
    NoBoundPipeline,

    #[error("buffers cannot be created from empty data")]
    EmptyBuffer,

    #[error("invalid SPIR-V: {0}")]
    InvalidShader(&'static str),

    #[error("invalid pipeline description: {0}")]
    InvalidPipeline(String),

    #[error("failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<vk::Status> for GpuError {
    fn from(status: vk::Status) -> Self {
        match status {
            vk::Status::ErrorDeviceLost => GpuError::DeviceLost,
            vk::Status::ErrorOutOfDateKHR => GpuError::SwapchainOutOfDate,
            status => GpuError::Vulkan(status),
        }
    }
}

pub type Result<T> = std::result::Result<T, GpuError>;
