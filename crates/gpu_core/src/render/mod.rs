//! # Rendering
//!
//! GPU resource and frame-lifecycle management. The only backend is Vulkan;
//! everything below borrows a [`vulkan::DeviceContext`] so resources cannot
//! outlive the device that created them.

pub mod vulkan;

pub use vulkan::{DeviceContext, FrameStatus, Presenter, VulkanError, VulkanResult, Window};
