//! Vulkan instance and validation-layer plumbing
//!
//! The validation counters are owned by the instance and handed to the debug
//! messenger through its user-data pointer, so two contexts never share them.

use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry, Instance};
use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::atomic::{AtomicU32, Ordering};

use super::error::{ErrorKind, VkResultExt, VulkanError, VulkanResult};
use super::window::Window;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Per-instance tally of validation-layer messages
#[derive(Debug)]
pub struct ValidationCounters {
    errors: AtomicU32,
    warnings: AtomicU32,
    max_errors: u32,
    max_warnings: u32,
}

impl ValidationCounters {
    /// Create counters that trip once more than the given number of messages arrive
    pub fn new(max_errors: u32, max_warnings: u32) -> Self {
        Self {
            errors: AtomicU32::new(0),
            warnings: AtomicU32::new(0),
            max_errors,
            max_warnings,
        }
    }

    /// Count one message of the given severity
    pub fn record(&self, severity: vk::DebugUtilsMessageSeverityFlagsEXT) {
        if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            self.errors.fetch_add(1, Ordering::Relaxed);
        } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            self.warnings.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Errors seen so far
    pub fn errors(&self) -> u32 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Warnings seen so far
    pub fn warnings(&self) -> u32 {
        self.warnings.load(Ordering::Relaxed)
    }

    /// Fail once either counter has passed its threshold
    #[track_caller]
    pub fn check(&self) -> VulkanResult<()> {
        let (errors, warnings) = (self.errors(), self.warnings());
        if errors > self.max_errors || warnings > self.max_warnings {
            return Err(VulkanError::new(ErrorKind::Validation { errors, warnings }));
        }
        Ok(())
    }
}

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    // Referenced by the messenger's user-data pointer; must outlive it
    counters: Box<ValidationCounters>,
}

impl VulkanInstance {
    /// Create a new Vulkan instance, optionally with validation layers
    pub fn new(
        window: &Window,
        app_name: &str,
        app_version: (u32, u32, u32),
        enable_validation: bool,
        counters: ValidationCounters,
    ) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::setup(format!("Failed to load Vulkan: {e:?}")))?;

        let app_name_cstr = CString::new(app_name)
            .map_err(|_| VulkanError::setup("Application name contains a NUL byte"))?;
        let (major, minor, patch) = app_version;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(c"gpu_core")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        let available_extensions = entry
            .enumerate_instance_extension_properties(None)
            .vk_check()?;
        let has_extension = |name: &CStr| {
            available_extensions.iter().any(|ext| {
                (unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }) == name
            })
        };

        let required_extensions = window.required_instance_extensions()?;
        let cstr_extensions: Vec<CString> = required_extensions
            .into_iter()
            .map(|ext| CString::new(ext).map_err(|_| VulkanError::setup("Extension name contains a NUL byte")))
            .collect::<VulkanResult<_>>()?;
        let mut extensions: Vec<*const c_char> = cstr_extensions.iter().map(|ext| ext.as_ptr()).collect();

        let mut flags = vk::InstanceCreateFlags::empty();
        if has_extension(vk::KhrPortabilityEnumerationFn::name()) {
            extensions.push(vk::KhrPortabilityEnumerationFn::name().as_ptr());
            flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        }

        let validation = enable_validation && Self::validation_layer_available(&entry)?;
        if enable_validation && !validation {
            log::warn!("{VALIDATION_LAYER:?} requested but not installed; continuing without it");
        }
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names_ptrs: Vec<*const c_char> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .flags(flags)
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None) }.vk_check()?;

        let counters = Box::new(counters);
        let debug_utils = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils, &counters) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        log::info!(
            "Created Vulkan instance for '{}' (validation {})",
            app_name,
            if validation { "on" } else { "off" }
        );

        Ok(Self {
            entry,
            instance,
            debug_utils,
            counters,
        })
    }

    fn validation_layer_available(entry: &Entry) -> VulkanResult<bool> {
        let layers = entry.enumerate_instance_layer_properties().vk_check()?;
        Ok(layers.iter().any(|layer| {
            let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            name == VALIDATION_LAYER
        }))
    }

    fn setup_debug_messenger(
        debug_utils: &DebugUtils,
        counters: &ValidationCounters,
    ) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback))
            .user_data(counters as *const ValidationCounters as *mut c_void);

        unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }.vk_check()
    }

    /// Validation counters for this instance
    pub fn counters(&self) -> &ValidationCounters {
        &self.counters
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() || (*callback_data).p_message.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr((*callback_data).p_message).to_string_lossy()
    };

    if let Some(counters) = (user_data as *const ValidationCounters).as_ref() {
        counters.record(message_severity);
    }

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_trip_after_threshold() {
        let counters = ValidationCounters::new(1, 2);
        counters.record(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR);
        assert!(counters.check().is_ok());

        counters.record(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR);
        let error = counters.check().unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::Validation { errors: 2, warnings: 0 }));
    }

    #[test]
    fn test_counters_track_warnings_separately() {
        let counters = ValidationCounters::new(0, 2);
        counters.record(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING);
        counters.record(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING);
        counters.record(vk::DebugUtilsMessageSeverityFlagsEXT::INFO);
        assert_eq!(counters.warnings(), 2);
        assert_eq!(counters.errors(), 0);
        assert!(counters.check().is_ok());

        counters.record(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING);
        assert!(counters.check().is_err());
    }

    #[test]
    fn test_callback_counts_through_user_data() {
        let first = ValidationCounters::new(10, 10);
        let second = ValidationCounters::new(10, 10);
        let message = CString::new("test message").unwrap();
        let data = vk::DebugUtilsMessengerCallbackDataEXT {
            p_message: message.as_ptr(),
            ..Default::default()
        };

        unsafe {
            debug_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                &data,
                &first as *const ValidationCounters as *mut c_void,
            );
        }

        assert_eq!(first.errors(), 1);
        assert_eq!(second.errors(), 0);
    }
}
