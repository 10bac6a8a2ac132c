mod commands;
mod config;
mod context;
mod device;
mod error;
mod frame;
mod immediate;
mod instance;
mod pipeline;
mod registry;
mod swapchain;
mod upload;
mod utils;

pub use commands::{check_push_constant_range, flip_viewport, viewport_scissor};
pub use config::ContextConfig;
pub use context::GpuContext;
pub use device::{VulkanDevice, find_queue_family_index};
pub use error::{GpuError, Result};
pub use frame::{FRAMES_IN_FLIGHT, FramePacer, FramePhase, FrameQueue};
pub use immediate::{BlockingImmediate, ImmediateSubmit};
pub use instance::{InstanceFactory, SharedInstance, surface_extensions};
pub use pipeline::{
    BlendMode, FixedFunctionState, GraphicsPipelineDesc, MAX_PUSH_CONSTANT_SIZE,
    PipelineResource, VertexAttribute, VertexInputLayout, spirv_words, vertex_input_layout,
};
pub use registry::{BufferHandle, HandleExt, PipelineHandle, Registry, ShaderHandle};
pub use swapchain::{
    ImageSyncCounts, PREFERRED_SURFACE_FORMATS, choose_extent, choose_surface_format, needs_rebuild,
};
pub use upload::{BufferDesc, BufferResource};

pub use vulkanite::vk;
