//! Vulkan backend
//!
//! Organised bottom-up: errors and instance setup, the device context,
//! memory and resources, synchronisation, then swapchain presentation.

/// Error type shared by the backend
pub mod error;
/// Instance creation and validation-layer plumbing
pub mod instance;
/// GLFW window and surface creation
pub mod window;
/// Physical/logical device selection and the shared device context
pub mod context;
/// Live object accounting
pub mod live_objects;
/// Device memory allocation
pub mod memory;
/// Command buffer lifecycle and recording
pub mod commands;
/// Buffers and their typed specialisations
pub mod buffer;
/// Images, views and layout transitions
pub mod image;
/// Host pixel model and PNG codec boundary
pub mod pixels;
/// Sampled textures with optional mip chains
pub mod texture;
/// Samplers
pub mod sampler;
/// Render passes and framebuffers
pub mod render_pass;
/// Offscreen render targets and depth buffers
pub mod attachment;
/// Semaphores, fences and the frames-in-flight ring
pub mod sync;
/// Swapchain, its image views and shared depth image
pub mod swapchain;
/// Acquire/submit/present loop for one window
pub mod presenter;
/// SPIR-V shader modules
pub mod shader;
/// Pipeline layouts and pipelines
pub mod pipeline;
/// Vertex input descriptions
pub mod vertex_layout;

pub use attachment::{Attachment, AttachmentKind, DepthBuffer};
pub use buffer::{
    Buffer, BufferUsage, IndexBuffer, IndexElement, StorageBuffer, StorageVertexBuffer, UniformBuffer, VertexBuffer,
};
pub use commands::{ActiveRenderPass, CommandRecorder, OneShotCommands};
pub use context::{DeviceContext, PhysicalDeviceInfo, QueueFamilyIndices};
pub use error::{ErrorKind, VkResultExt, VulkanError, VulkanResult};
pub use image::{Image, ImageDesc};
pub use instance::VulkanInstance;
pub use live_objects::{LiveObjectSnapshot, LiveObjects, ObjectKind};
pub use memory::MemoryObject;
pub use pipeline::{
    BlendMode, ComputePipeline, DescriptorSetLayout, GraphicsPipeline, GraphicsPipelineDesc, PipelineLayout,
};
pub use pixels::{ChannelTy, Channels, PixelData};
pub use presenter::{FrameStatus, Presenter};
pub use render_pass::{AttachmentSpec, Framebuffer, RenderPass};
pub use sampler::{Sampler, SamplerConfig};
pub use shader::{ShaderModule, ShaderSet, ShaderStage};
pub use swapchain::{Swapchain, SwapchainConfig};
pub use sync::{Fence, FrameRing, FrameSlot, Semaphore};
pub use texture::{Texture, Texture1D, Texture2D, TextureOptions};
pub use vertex_layout::{VertexInput, VertexLayout};
pub use window::Window;
