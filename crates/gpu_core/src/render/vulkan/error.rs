//! Vulkan error types
//!
//! Every failure in the GPU layer is fatal at the point of detection: nothing
//! in this crate retries. Errors carry the source location that raised them so
//! the top-level handler can print a file/line tagged diagnostic.

use ash::vk;
use std::fmt;
use std::panic::Location;
use std::path::PathBuf;
use thiserror::Error;

/// What went wrong
#[derive(Error, Debug)]
pub enum ErrorKind {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Setup/configuration error: no device, extension, memory type or format
    #[error("Setup failed: {0}")]
    Setup(String),

    /// A host copy would write outside the owning allocation
    #[error("Copy of {size} bytes at offset {offset} overflows {capacity}-byte allocation")]
    OutOfBounds {
        /// Byte offset of the copy destination
        offset: u64,
        /// Number of bytes to copy
        size: u64,
        /// Size of the memory object
        capacity: u64,
    },

    /// A resource was requested in a configuration it cannot support
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Validation layers reported more messages than the configured limit
    #[error("Validation layer limit exceeded: {errors} errors, {warnings} warnings")]
    Validation {
        /// Errors seen so far
        errors: u32,
        /// Warnings seen so far
        warnings: u32,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// File access failed (shader binaries, images)
    #[error("Failed to access {path:?}: {source}")]
    Io {
        /// Path that could not be read or written
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Window system failure
    #[error("Window error: {0}")]
    Window(String),
}

/// Error raised by the GPU layer, tagged with the location that detected it
#[derive(Debug)]
pub struct VulkanError {
    kind: ErrorKind,
    location: &'static Location<'static>,
}

impl VulkanError {
    /// Create an error at the caller's location
    #[track_caller]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            location: Location::caller(),
        }
    }

    /// Setup/configuration error at the caller's location
    #[track_caller]
    pub fn setup(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Setup(reason.into()))
    }

    /// Precondition error at the caller's location
    #[track_caller]
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Precondition(reason.into()))
    }

    /// Invalid-operation error at the caller's location
    #[track_caller]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidOperation(reason.into()))
    }

    /// The error category
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Source file and line that raised the error
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

impl fmt::Display for VulkanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}] {}", self.location.file(), self.location.line(), self.kind)
    }
}

impl std::error::Error for VulkanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ErrorKind> for VulkanError {
    #[track_caller]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Converts raw `ash` results into located [`VulkanError`]s
pub trait VkResultExt<T> {
    /// Map a `vk::Result` failure to [`ErrorKind::Api`] tagged with the caller's location
    fn vk_check(self) -> VulkanResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    #[track_caller]
    fn vk_check(self) -> VulkanResult<T> {
        match self {
            Ok(value) => Ok(value),
            Err(result) => Err(VulkanError::new(ErrorKind::Api(result))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_records_caller_location() {
        let line = line!() + 1;
        let error = VulkanError::setup("no device");
        assert_eq!(error.location().line(), line);
        assert!(error.location().file().ends_with("error.rs"));
    }

    #[test]
    fn test_display_is_file_line_tagged() {
        let error = VulkanError::new(ErrorKind::OutOfBounds { offset: 8, size: 16, capacity: 16 });
        let text = error.to_string();
        assert!(text.starts_with('['));
        assert!(text.contains("error.rs:"));
        assert!(text.contains("overflows 16-byte allocation"));
    }

    #[test]
    fn test_vk_check_maps_api_errors() {
        let failed: Result<u32, vk::Result> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let error = failed.vk_check().unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)));

        let ok: Result<u32, vk::Result> = Ok(7);
        assert_eq!(ok.vk_check().unwrap(), 7);
    }
}
