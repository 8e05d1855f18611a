// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation (+ validation layer and debug messenger in debug builds)
// - Window surface
// - Physical device selection (first GPU with graphics + present + swapchain)
// - Logical device + graphics/present queues

use anyhow::{Context, Result};
use ash::{vk, Entry};
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;
use winit::window::Window;

use super::surface::{self, Surface};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Device extensions without which the renderer cannot run
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [ash::khr::swapchain::NAME];

const PORTABILITY_ENUMERATION: &CStr = c"VK_KHR_portability_enumeration";
const PORTABILITY_SUBSET: &CStr = c"VK_KHR_portability_subset";

/// Queue families discovered on a physical device
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scan queue families for graphics and present support.
    ///
    /// A family that does both wins; otherwise the first graphics family and the
    /// first presenting family are paired.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut can_present: impl FnMut(u32) -> Result<bool>,
    ) -> Result<Self> {
        let mut indices = Self::default();

        for (i, family) in families.iter().enumerate() {
            let index = i as u32;
            let graphics = family.queue_count > 0
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let present = can_present(index)?;

            if graphics && present {
                return Ok(Self {
                    graphics: Some(index),
                    present: Some(index),
                });
            }
            if graphics && indices.graphics.is_none() {
                indices.graphics = Some(index);
            }
            if present && indices.present.is_none() {
                indices.present = Some(index);
            }
        }

        Ok(indices)
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Distinct families, one queue is created per entry
    pub fn unique(&self) -> Vec<u32> {
        let mut families: Vec<u32> = self.graphics.into_iter().chain(self.present).collect();
        families.dedup();
        families
    }
}

/// Names from `required` that do not appear in `available`
pub fn missing_names<'a, 'b>(
    required: &[&'a CStr],
    available: impl IntoIterator<Item = &'b CStr>,
) -> Vec<&'a CStr> {
    let available: Vec<&CStr> = available.into_iter().collect();
    required
        .iter()
        .copied()
        .filter(|name| !available.contains(name))
        .collect()
}

/// Instance-level objects: the loaded library, the instance and the debug
/// messenger.
///
/// Dropping destroys them in reverse creation order, so an early return from
/// `VulkanDevice::new` releases whatever had already been created.
pub struct InstanceContext {
    pub instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub entry: Entry,
}

impl InstanceContext {
    pub fn new(window: &Window, app_name: &str, enable_validation: bool) -> Result<Self> {
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        if enable_validation && !Self::validation_layer_available(&entry)? {
            anyhow::bail!("Validation layers requested, but not available");
        }

        let instance = Self::create_instance(&entry, window, app_name, enable_validation)?;
        let mut context = Self {
            instance,
            debug_utils: None,
            entry,
        };

        if enable_validation {
            let messenger = Self::setup_debug_messenger(&context.entry, &context.instance)?;
            context.debug_utils = Some(messenger);
        }

        Ok(context)
    }

    fn validation_layer_available(entry: &Entry) -> Result<bool> {
        let layers = unsafe { entry.enumerate_instance_layer_properties() }
            .context("Failed to enumerate instance layers")?;

        let missing = missing_names(
            &[VALIDATION_LAYER],
            layers.iter().filter_map(|layer| layer.layer_name_as_c_str().ok()),
        );
        Ok(missing.is_empty())
    }

    fn create_instance(
        entry: &Entry,
        window: &Window,
        app_name: &str,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 1))
            .engine_name(c"Atom3D")
            .engine_version(vk::make_api_version(0, 0, 1, 1))
            .api_version(vk::API_VERSION_1_3);

        let available = unsafe { entry.enumerate_instance_extension_properties(None) }
            .context("Failed to enumerate instance extensions")?;
        let available_names: Vec<&CStr> = available
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .collect();

        let mut extensions = surface::required_instance_extensions(window)?;
        if enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        // MoltenVK only shows up when portability enumeration is requested
        let mut flags = vk::InstanceCreateFlags::empty();
        if available_names.contains(&PORTABILITY_ENUMERATION) {
            extensions.push(PORTABILITY_ENUMERATION.as_ptr());
            flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        }

        log_extension_status(&extensions, &available_names);

        let layer_names: Vec<*const c_char> = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        // Chained so instance creation and destruction are validated too
        let mut debug_info = debug_messenger_info();

        let mut create_info = vk::InstanceCreateInfo::default()
            .flags(flags)
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);
        if enable_validation {
            create_info = create_info.push_next(&mut debug_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let messenger = unsafe {
            debug_utils.create_debug_utils_messenger(&debug_messenger_info(), None)
        }
        .context("Failed to set up debug messenger")?;

        Ok((debug_utils, messenger))
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Vulkan device wrapper with automatic cleanup.
///
/// Also owns the instance and the window surface, since device selection
/// depends on which queue families can present to that surface.
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,

    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
    pub present_queue: vk::Queue,
    pub present_queue_family: u32,

    // Dropped after the logical device, in this order
    pub surface: Surface,
    pub context: InstanceContext,
}

impl VulkanDevice {
    /// Create the Vulkan context for `window`
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `enable_validation` - Enable Khronos validation + debug messenger
    pub fn new(window: &Window, app_name: &str, enable_validation: bool) -> Result<Arc<Self>> {
        Self::with_extensions(window, app_name, enable_validation, &REQUIRED_DEVICE_EXTENSIONS)
    }

    /// Same as `new`, but a GPU must expose every extension in `device_extensions`
    pub fn with_extensions(
        window: &Window,
        app_name: &str,
        enable_validation: bool,
        device_extensions: &[&CStr],
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        let context = InstanceContext::new(window, app_name, enable_validation)?;
        let surface = Surface::new(&context.entry, &context.instance, window)?;

        let (physical_device, families) =
            Self::pick_physical_device(&context.instance, &surface, device_extensions)?;
        let (graphics_queue_family, present_queue_family) = match families {
            QueueFamilyIndices {
                graphics: Some(graphics),
                present: Some(present),
            } => (graphics, present),
            _ => anyhow::bail!("Selected GPU lacks a graphics or present queue"),
        };

        let device = Self::create_logical_device(
            &context.instance,
            physical_device,
            &families,
            device_extensions,
        )?;
        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_queue_family, 0) };

        let properties = unsafe { context.instance.get_physical_device_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy())
                .unwrap_or_default()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={}, present={}",
            graphics_queue_family,
            present_queue_family
        );

        Ok(Arc::new(Self {
            device,
            physical_device,
            graphics_queue,
            graphics_queue_family,
            present_queue,
            present_queue_family,
            surface,
            context,
        }))
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.context.instance
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface: &Surface,
        device_extensions: &[&CStr],
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            anyhow::bail!("No GPUs with Vulkan support");
        }

        // First suitable device wins
        for device in devices {
            if let Some(families) =
                Self::check_suitability(instance, surface, device, device_extensions)?
            {
                return Ok((device, families));
            }
        }

        anyhow::bail!("Failed to find a suitable GPU")
    }

    /// Queue families of `device` if it can drive the renderer, None otherwise
    fn check_suitability(
        instance: &ash::Instance,
        surface: &Surface,
        device: vk::PhysicalDevice,
        device_extensions: &[&CStr],
    ) -> Result<Option<QueueFamilyIndices>> {
        let props = unsafe { instance.get_physical_device_properties(device) };
        let name = props
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };
        let families = QueueFamilyIndices::find(&queue_families, |family| {
            surface.supports_present(device, family)
        })?;
        if !families.is_complete() {
            log::info!("Skipping {}: no graphics/present queue family", name);
            return Ok(None);
        }

        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
            .context("Failed to enumerate device extensions")?;
        let missing = missing_names(
            device_extensions,
            extensions.iter().filter_map(|ext| ext.extension_name_as_c_str().ok()),
        );
        if !missing.is_empty() {
            log::info!("Skipping {}: missing extensions {:?}", name, missing);
            return Ok(None);
        }

        let support = surface.support(device)?;
        if support.formats.is_empty() || support.present_modes.is_empty() {
            log::info!("Skipping {}: surface has no formats or present modes", name);
            return Ok(None);
        }

        Ok(Some(families))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: &QueueFamilyIndices,
        device_extensions: &[&CStr],
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let mut extensions: Vec<*const c_char> =
            device_extensions.iter().map(|name| name.as_ptr()).collect();

        // Portability drivers require the subset extension whenever they expose it
        let available = unsafe { instance.enumerate_device_extension_properties(physical_device) }
            .context("Failed to enumerate device extensions")?;
        if available
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .any(|name| name == PORTABILITY_SUBSET)
        {
            extensions.push(PORTABILITY_SUBSET.as_ptr());
        }

        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        Ok(device)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Surface, messenger and instance follow as fields
        unsafe { self.device.destroy_device(None) };
    }
}

fn debug_messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

fn log_extension_status(enabled: &[*const c_char], available: &[&CStr]) {
    log::info!("Enabled instance extensions:");
    for &ext in enabled {
        // Every pointer comes from a 'static CStr
        let name = unsafe { CStr::from_ptr(ext) };
        log::info!("\t{}", name.to_string_lossy());
    }

    log::debug!("Available instance extensions:");
    for name in available {
        log::debug!("\t{}", name.to_string_lossy());
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[Vulkan] {}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[Vulkan] {}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::info!("[Vulkan] {}", message),
        _ => log::debug!("[Vulkan] {}", message),
    }

    vk::FALSE
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
    fn prefers_family_with_graphics_and_present() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
        ];
        let indices = QueueFamilyIndices::find(&families, |i| Ok(i != 0)).unwrap();
        assert_eq!(indices.graphics, Some(2));
        assert_eq!(indices.present, Some(2));
        assert_eq!(indices.unique(), vec![2]);
    }

    #[test]
    fn pairs_separate_graphics_and_present_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = QueueFamilyIndices::find(&families, |i| Ok(i == 1)).unwrap();
        assert!(indices.is_complete());
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(1));
        assert_eq!(indices.unique(), vec![0, 1]);
    }

    #[test]
    fn incomplete_without_present_support() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(false)).unwrap();
        assert!(!indices.is_complete());
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, None);
    }

    #[test]
    fn empty_family_is_not_a_graphics_family() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let indices = QueueFamilyIndices::find(&[empty], |_| Ok(true)).unwrap();
        assert_eq!(indices.graphics, None);
        assert_eq!(indices.present, Some(0));
    }

    #[test]
    fn present_query_errors_propagate() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let result = QueueFamilyIndices::find(&families, |_| anyhow::bail!("surface lost"));
        assert!(result.is_err());
    }

    #[test]
    fn missing_names_reports_absent_extensions() {
        let available = [c"VK_KHR_swapchain", c"VK_KHR_maintenance1"];
        assert!(missing_names(&REQUIRED_DEVICE_EXTENSIONS, available).is_empty());

        let missing = missing_names(&REQUIRED_DEVICE_EXTENSIONS, [c"VK_KHR_maintenance1"]);
        assert_eq!(missing, vec![ash::khr::swapchain::NAME]);
    }

    #[test]
    fn validation_layer_lookup_is_exact() {
        let layers = [c"VK_LAYER_KHRONOS_validation_extra", c"VK_LAYER_LUNARG_api_dump"];
        assert_eq!(missing_names(&[VALIDATION_LAYER], layers), vec![VALIDATION_LAYER]);
        assert!(missing_names(&[VALIDATION_LAYER], [VALIDATION_LAYER]).is_empty());
    }
}
