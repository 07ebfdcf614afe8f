//! # GPU Core
//!
//! A thin layer over Vulkan that owns device selection, memory, buffers,
//! textures, swapchains and frame synchronisation, leaving scene and shading
//! logic to the application.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gpu_core::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GpuConfig::default();
//!     let mut window = Window::new(&config.window.title, config.window.width, config.window.height, true)?;
//!     let ctx = DeviceContext::new(&mut window, &config)?;
//!     let mut presenter = Presenter::new(&ctx, window.framebuffer_size(), config.swapchain_config())?;
//!
//!     while !window.should_close() {
//!         window.poll_events();
//!         if presenter.acquire()? == FrameStatus::NeedsReshape {
//!             let (width, height) = window.wait_while_minimized();
//!             presenter.reshape(width, height)?;
//!             continue;
//!         }
//!         let recorder = presenter.begin_frame()?;
//!         presenter.submit(recorder)?;
//!         presenter.present()?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod render;

/// Common imports for users of the crate
pub mod prelude {
    pub use crate::{
        config::Config,
        core::config::GpuConfig,
        foundation::logging,
        render::vulkan::{
            Buffer, BufferUsage, DeviceContext, FrameStatus, IndexBuffer, PixelData, Presenter, Sampler,
            SamplerConfig, Texture2D, TextureOptions, UniformBuffer, VertexBuffer, VulkanError, VulkanResult, Window,
        },
    };
}
