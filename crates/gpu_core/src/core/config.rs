//! # GPU Configuration
//!
//! Everything the GPU layer reads at start-up: application identity, window
//! parameters, frame pacing, validation-layer policy and the shader directory.
//!
//! ## File formats
//!
//! [`GpuConfig`] implements [`Config`], so it loads from and saves to `.toml`
//! or `.ron`. Missing fields take their defaults, which keeps small override
//! files short:
//!
//! ```toml
//! application_name = "Clear Demo"
//! max_frames_in_flight = 3
//!
//! [window]
//! width = 1280
//! height = 720
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use crate::config::{Config, ConfigError};
use crate::render::vulkan::swapchain::SwapchainConfig;

/// Largest supported number of frames in flight
pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

/// Window creation parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Title bar text
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
    /// Whether the user may resize the window
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "GPU Core".to_string(),
            width: 800,
            height: 600,
            resizable: true,
        }
    }
}

/// Validation-layer policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Enable the validation layers; `None` enables them in debug builds only
    pub enabled: Option<bool>,
    /// Validation errors tolerated before submissions fail
    pub max_errors: u32,
    /// Validation warnings tolerated before submissions fail
    pub max_warnings: u32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            max_errors: 0,
            max_warnings: 100,
        }
    }
}

/// Top-level configuration of the GPU layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Default log filter, overridable through `RUST_LOG`
    pub log_level: String,
    /// Window parameters
    pub window: WindowConfig,
    /// Frames the CPU may record ahead of the GPU
    pub max_frames_in_flight: usize,
    /// Validation-layer policy
    pub validation: ValidationConfig,
    /// Give the window a depth buffer
    pub depth: bool,
    /// Give the window a stencil buffer
    pub stencil: bool,
    /// Directory holding compiled `.spv` shader modules
    pub shader_dir: PathBuf,
}

impl GpuConfig {
    /// Create a configuration with defaults for `app_name`
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            application_version: (1, 0, 0),
            log_level: "info".to_string(),
            window: WindowConfig::default(),
            max_frames_in_flight: 2,
            validation: ValidationConfig::default(),
            depth: true,
            stencil: false,
            shader_dir: PathBuf::from("shaders"),
        }
    }

    /// Set maximum frames in flight
    pub fn with_max_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    /// Enable or disable validation layers explicitly
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validation.enabled = Some(enabled);
        self
    }

    /// Whether validation layers should be enabled in this build
    pub fn validation_enabled(&self) -> bool {
        self.validation.enabled.unwrap_or(cfg!(debug_assertions))
    }

    /// Swapchain parameters derived from this configuration
    pub fn swapchain_config(&self) -> SwapchainConfig {
        SwapchainConfig {
            frames_in_flight: self.max_frames_in_flight,
            depth: self.depth,
            stencil: self.stencil,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }

        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.max_frames_in_flight) {
            return Err(ConfigError::Invalid(format!(
                "Max frames in flight must be between 1 and {MAX_FRAMES_IN_FLIGHT}, got {}",
                self.max_frames_in_flight
            )));
        }

        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "Window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }

        Ok(())
    }
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self::new("GPU Core Application")
    }
}

impl Config for GpuConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GpuConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_frames_in_flight, 2);
        assert_eq!(config.validation_enabled(), cfg!(debug_assertions));
    }

    #[test]
    fn test_frames_in_flight_range() {
        assert!(GpuConfig::default().with_max_frames_in_flight(0).validate().is_err());
        assert!(GpuConfig::default().with_max_frames_in_flight(1).validate().is_ok());
        assert!(GpuConfig::default().with_max_frames_in_flight(8).validate().is_ok());
        assert!(matches!(
            GpuConfig::default().with_max_frames_in_flight(9).validate(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_explicit_validation_overrides_build_type() {
        assert!(GpuConfig::default().with_validation(true).validation_enabled());
        assert!(!GpuConfig::default().with_validation(false).validation_enabled());
    }

    #[test]
    fn test_swapchain_config() {
        let mut config = GpuConfig::default().with_max_frames_in_flight(3);
        config.stencil = true;
        let swapchain = config.swapchain_config();
        assert_eq!(swapchain.frames_in_flight, 3);
        assert!(swapchain.depth);
        assert!(swapchain.stencil);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: GpuConfig = toml::from_str(
            r#"
            application_name = "Partial"
            max_frames_in_flight = 3

            [window]
            width = 1280
            "#,
        )
        .unwrap();
        assert_eq!(config.application_name, "Partial");
        assert_eq!(config.max_frames_in_flight, 3);
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, WindowConfig::default().height);
        assert_eq!(config.validation, ValidationConfig::default());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = std::env::temp_dir();
        let mut config = GpuConfig::new("Round Trip").with_validation(false);
        config.window.title = "Round Trip".to_string();
        config.shader_dir = PathBuf::from("assets/shaders");

        for name in ["gpu_core_config_test.toml", "gpu_core_config_test.ron"] {
            let path = dir.join(format!("{}_{name}", std::process::id()));
            config.save_to_file(&path).unwrap();
            let loaded = GpuConfig::load_from_file(&path).unwrap();
            assert_eq!(loaded, config);
            std::fs::remove_file(&path).unwrap();
        }
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let path = std::env::temp_dir().join("gpu_core_config_definitely_missing.toml");
        assert_eq!(GpuConfig::load_or_default(&path).unwrap(), GpuConfig::default());
    }
}
