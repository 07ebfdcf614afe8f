//! Vulkan device context
//!
//! Selects a physical device, discovers queue families, creates the logical
//! device with its queues and owns the command pool used for one-shot and
//! per-frame command buffers. Every GPU resource in this crate borrows the
//! context, so the borrow checker enforces that the context outlives them.

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Instance};
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr};

use super::error::{VkResultExt, VulkanError, VulkanResult};
use super::instance::{ValidationCounters, VulkanInstance};
use super::live_objects::LiveObjects;
use super::memory::find_memory_type;
use super::window::Window;
use crate::core::config::GpuConfig;

/// Queue families used by the context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// First family with graphics support
    pub graphics: u32,
    /// First family able to present to the target surface
    pub present: u32,
    /// First family with compute support, if any
    pub compute: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scan queue families once, recording the first graphics, present and compute family
    ///
    /// Returns `None` unless both graphics and present families exist.
    pub fn discover<F>(families: &[vk::QueueFamilyProperties], mut supports_present: F) -> VulkanResult<Option<Self>>
    where
        F: FnMut(u32) -> VulkanResult<bool>,
    {
        let mut graphics = None;
        let mut present = None;
        let mut compute = None;

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            if family.queue_count == 0 {
                continue;
            }
            if graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics = Some(index);
            }
            if compute.is_none() && family.queue_flags.contains(vk::QueueFlags::COMPUTE) {
                compute = Some(index);
            }
            if present.is_none() && supports_present(index)? {
                present = Some(index);
            }
        }

        Ok(match (graphics, present) {
            (Some(graphics), Some(present)) => Some(Self {
                graphics,
                present,
                compute,
            }),
            _ => None,
        })
    }

    /// Distinct family indices, one queue is created per entry
    pub fn unique(&self) -> BTreeSet<u32> {
        [Some(self.graphics), Some(self.present), self.compute]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Features every selected device must offer
pub fn required_features() -> vk::PhysicalDeviceFeatures {
    vk::PhysicalDeviceFeatures::builder()
        .fill_mode_non_solid(true)
        .sampler_anisotropy(true)
        .build()
}

/// Whether `features` covers [`required_features`]
pub fn supports_required_features(features: &vk::PhysicalDeviceFeatures) -> bool {
    features.fill_mode_non_solid == vk::TRUE && features.sampler_anisotropy == vk::TRUE
}

/// Pick a device: discrete first, then integrated, then any suitable one
///
/// `candidates` holds each device's type and whether it satisfies every requirement.
pub fn pick_device(candidates: &[(vk::PhysicalDeviceType, bool)]) -> Option<usize> {
    let find = |wanted: Option<vk::PhysicalDeviceType>| {
        candidates
            .iter()
            .position(|&(ty, suitable)| suitable && wanted.map_or(true, |w| w == ty))
    };
    find(Some(vk::PhysicalDeviceType::DISCRETE_GPU))
        .or_else(|| find(Some(vk::PhysicalDeviceType::INTEGRATED_GPU)))
        .or_else(|| find(None))
}

/// Device extensions to enable given what the device offers
///
/// The swapchain extension is mandatory; the portability subset is enabled when present.
pub fn select_device_extensions(available: &[&CStr]) -> VulkanResult<Vec<&'static CStr>> {
    let swapchain = SwapchainLoader::name();
    if !available.contains(&swapchain) {
        return Err(VulkanError::setup("Device does not support VK_KHR_swapchain"));
    }
    let mut extensions = vec![swapchain];
    let portability = vk::KhrPortabilitySubsetFn::name();
    if available.contains(&portability) {
        extensions.push(portability);
    }
    Ok(extensions)
}

/// Whether `props` offers `features` under `tiling`
pub fn format_satisfies(
    props: &vk::FormatProperties,
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> bool {
    match tiling {
        vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
        vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
        _ => false,
    }
}

/// First candidate whose properties satisfy the request, or `vk::Format::UNDEFINED`
pub fn choose_format<F>(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    mut properties_of: F,
) -> vk::Format
where
    F: FnMut(vk::Format) -> vk::FormatProperties,
{
    candidates
        .iter()
        .copied()
        .find(|&format| format_satisfies(&properties_of(format), tiling, features))
        .unwrap_or(vk::Format::UNDEFINED)
}

/// Selected physical device and what was learned about it
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue family assignment
    pub queue_families: QueueFamilyIndices,
    /// Device extensions that will be enabled
    pub extensions: Vec<&'static CStr>,
}

impl PhysicalDeviceInfo {
    /// Select the best device able to render and present to `surface`
    pub fn select(instance: &Instance, surface: vk::SurfaceKHR, surface_loader: &Surface) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices() }.vk_check()?;

        let mut evaluated = Vec::with_capacity(devices.len());
        for device in devices {
            let info = Self::evaluate(instance, device, surface, surface_loader)?;
            evaluated.push((device, info));
        }

        let candidates: Vec<_> = evaluated
            .iter()
            .map(|(device, info)| {
                let ty = unsafe { instance.get_physical_device_properties(*device) }.device_type;
                (ty, info.is_some())
            })
            .collect();

        let chosen = pick_device(&candidates)
            .ok_or_else(|| VulkanError::setup("No suitable GPU found"))?;
        let (_, info) = evaluated.swap_remove(chosen);
        let info = info.ok_or_else(|| VulkanError::setup("No suitable GPU found"))?;

        log::info!(
            "Selected GPU: {} ({:?}), queues {:?}",
            info.name(),
            info.properties.device_type,
            info.queue_families
        );
        Ok(info)
    }

    fn evaluate(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Option<Self>> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();

        if !supports_required_features(&features) {
            log::debug!("Skipping {name}: missing non-solid fill or anisotropic sampling");
            return Ok(None);
        }

        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let queue_families = QueueFamilyIndices::discover(&families, |index| {
            unsafe { surface_loader.get_physical_device_surface_support(device, index, surface) }.vk_check()
        })?;
        let Some(queue_families) = queue_families else {
            log::debug!("Skipping {name}: no graphics+present queue families");
            return Ok(None);
        };

        let available = unsafe { instance.enumerate_device_extension_properties(device) }.vk_check()?;
        let names: Vec<&CStr> = available
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
            .collect();
        let Ok(extensions) = select_device_extensions(&names) else {
            log::debug!("Skipping {name}: no swapchain support");
            return Ok(None);
        };

        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

        Ok(Some(Self {
            device,
            properties,
            memory_properties,
            queue_families,
            extensions,
        }))
    }

    /// Human-readable device name
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

/// Application-lifetime owner of the Vulkan device and its queues
pub struct DeviceContext {
    device: Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    compute_queue: Option<vk::Queue>,
    command_pool: vk::CommandPool,
    swapchain_loader: SwapchainLoader,
    physical_device: PhysicalDeviceInfo,
    surface: vk::SurfaceKHR,
    surface_loader: Surface,
    live_objects: LiveObjects,
    instance: VulkanInstance,
}

impl DeviceContext {
    /// Create the instance, surface and logical device for `window`
    pub fn new(window: &mut Window, config: &GpuConfig) -> VulkanResult<Self> {
        let counters = ValidationCounters::new(
            config.validation.max_errors,
            config.validation.max_warnings,
        );
        let instance = VulkanInstance::new(
            window,
            &config.application_name,
            config.application_version,
            config.validation_enabled(),
            counters,
        )?;

        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let surface = window.create_surface(instance.instance.handle())?;

        let physical_device = match PhysicalDeviceInfo::select(&instance.instance, surface, &surface_loader) {
            Ok(info) => info,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        let device = match Self::create_logical_device(&instance.instance, &physical_device) {
            Ok(device) => device,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        let families = physical_device.queue_families;
        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };
        let compute_queue = families
            .compute
            .map(|family| unsafe { device.get_device_queue(family, 0) });

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(families.graphics);
        let command_pool = match unsafe { device.create_command_pool(&pool_info, None) }.vk_check() {
            Ok(pool) => pool,
            Err(e) => {
                unsafe {
                    device.destroy_device(None);
                    surface_loader.destroy_surface(surface, None);
                }
                return Err(e);
            }
        };

        let swapchain_loader = SwapchainLoader::new(&instance.instance, &device);

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            compute_queue,
            command_pool,
            swapchain_loader,
            physical_device,
            surface,
            surface_loader,
            live_objects: LiveObjects::default(),
            instance,
        })
    }

    fn create_logical_device(instance: &Instance, info: &PhysicalDeviceInfo) -> VulkanResult<Device> {
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = info
            .queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extension_ptrs: Vec<*const c_char> = info.extensions.iter().map(|ext| ext.as_ptr()).collect();
        let features = required_features();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&features);

        unsafe { instance.create_device(info.device, &create_info, None) }.vk_check()
    }

    /// Logical device
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Selected physical device
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Queue family assignment
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.physical_device.queue_families
    }

    /// Graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Presentation queue
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Compute queue, when the device has a compute family
    pub fn compute_queue(&self) -> Option<vk::Queue> {
        self.compute_queue
    }

    /// Command pool on the graphics family
    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// Window surface the swapchain presents to
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Surface extension loader
    pub fn surface_loader(&self) -> &Surface {
        &self.surface_loader
    }

    /// Swapchain extension loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.swapchain_loader
    }

    /// Live object counters for this context
    pub fn live_objects(&self) -> &LiveObjects {
        &self.live_objects
    }

    /// Largest anisotropy the device allows
    pub fn max_sampler_anisotropy(&self) -> f32 {
        self.physical_device.properties.limits.max_sampler_anisotropy
    }

    /// Fail if validation layers have reported more messages than allowed
    #[track_caller]
    pub fn check_validation(&self) -> VulkanResult<()> {
        self.instance.counters().check()
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle() }.vk_check()
    }

    /// Memory type index for `type_bits` with at least `properties`
    #[track_caller]
    pub fn find_memory(&self, type_bits: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        find_memory_type(&self.physical_device.memory_properties, type_bits, properties).ok_or_else(|| {
            VulkanError::setup(format!(
                "No memory type in {type_bits:#b} provides {properties:?}"
            ))
        })
    }

    /// Format properties reported by the device
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance()
                .get_physical_device_format_properties(self.physical_device.device, format)
        }
    }

    /// First candidate supporting `features` with `tiling`, or `vk::Format::UNDEFINED`
    pub fn find_best_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> vk::Format {
        choose_format(candidates, tiling, features, |format| self.format_properties(format))
    }

    /// Like [`DeviceContext::find_best_format`] but fatal when nothing qualifies
    #[track_caller]
    pub fn require_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> VulkanResult<vk::Format> {
        match self.find_best_format(candidates, tiling, features) {
            vk::Format::UNDEFINED => Err(VulkanError::setup(format!(
                "None of {candidates:?} supports {features:?} with {tiling:?} tiling"
            ))),
            format => Ok(format),
        }
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
        log::debug!("Device context destroyed; live objects at exit: {}", self.live_objects.snapshot());
        // `instance` drops after this, destroying the messenger and the instance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_discover_prefers_first_matching_families() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::discover(&families, |i| Ok(i >= 1))
            .unwrap()
            .unwrap();
        assert_eq!(indices.graphics, 1);
        assert_eq!(indices.present, 1);
        assert_eq!(indices.compute, Some(1));
        assert_eq!(indices.unique().into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_discover_requires_graphics_and_present() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(QueueFamilyIndices::discover(&families, |_| Ok(false)).unwrap().is_none());

        let families = [family(vk::QueueFlags::COMPUTE)];
        assert!(QueueFamilyIndices::discover(&families, |_| Ok(true)).unwrap().is_none());
    }

    #[test]
    fn test_discover_compute_is_optional() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let indices = QueueFamilyIndices::discover(&families, |i| Ok(i == 1))
            .unwrap()
            .unwrap();
        assert_eq!(indices.compute, None);
        assert_eq!(indices.unique().into_iter().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_discover_propagates_present_query_errors() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let result = QueueFamilyIndices::discover(&families, |_| {
            Err(VulkanError::setup("surface lost"))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_pick_device_priority() {
        use vk::PhysicalDeviceType as T;
        assert_eq!(pick_device(&[(T::CPU, true), (T::INTEGRATED_GPU, true), (T::DISCRETE_GPU, true)]), Some(2));
        assert_eq!(pick_device(&[(T::CPU, true), (T::INTEGRATED_GPU, true), (T::DISCRETE_GPU, false)]), Some(1));
        assert_eq!(pick_device(&[(T::VIRTUAL_GPU, true), (T::INTEGRATED_GPU, false)]), Some(0));
        assert_eq!(pick_device(&[(T::DISCRETE_GPU, false)]), None);
        assert_eq!(pick_device(&[]), None);
    }

    #[test]
    fn test_required_features() {
        let mut features = vk::PhysicalDeviceFeatures::default();
        assert!(!supports_required_features(&features));
        features.sampler_anisotropy = vk::TRUE;
        assert!(!supports_required_features(&features));
        features.fill_mode_non_solid = vk::TRUE;
        assert!(supports_required_features(&features));
        assert!(supports_required_features(&required_features()));
    }

    #[test]
    fn test_device_extensions() {
        let swapchain = SwapchainLoader::name();
        let portability = vk::KhrPortabilitySubsetFn::name();

        assert!(select_device_extensions(&[portability]).is_err());
        assert_eq!(select_device_extensions(&[swapchain]).unwrap(), vec![swapchain]);
        assert_eq!(
            select_device_extensions(&[portability, swapchain]).unwrap(),
            vec![swapchain, portability]
        );
    }

    #[test]
    fn test_choose_format_returns_first_supported_candidate() {
        let depth = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        let props = |format: vk::Format| match format {
            vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM => vk::FormatProperties {
                optimal_tiling_features: depth,
                ..Default::default()
            },
            _ => vk::FormatProperties::default(),
        };
        let candidates = [
            vk::Format::D32_SFLOAT,
            vk::Format::D24_UNORM_S8_UINT,
            vk::Format::D16_UNORM,
        ];

        assert_eq!(
            choose_format(&candidates, vk::ImageTiling::OPTIMAL, depth, props),
            vk::Format::D24_UNORM_S8_UINT
        );
        assert_eq!(
            choose_format(&candidates, vk::ImageTiling::LINEAR, depth, props),
            vk::Format::UNDEFINED
        );
        assert_eq!(
            choose_format(&[], vk::ImageTiling::OPTIMAL, depth, props),
            vk::Format::UNDEFINED
        );
    }
}
