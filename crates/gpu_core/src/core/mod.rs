//! # Core Module
//!
//! Shared configuration for the GPU layer and the applications built on it.

pub mod config;

pub use config::{GpuConfig, ValidationConfig, WindowConfig};
pub use crate::config::{Config, ConfigError};
