//! Instance, physical device selection and logical device.

use std::collections::HashSet;
use std::ffi::{c_char, CStr, CString};

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};

use super::vk_error;
use crate::render::device::{DeviceError, DeviceResult};

fn init_error(message: impl Into<String>) -> DeviceError {
    DeviceError::InitializationFailed(message.into())
}

fn c_string(value: &str) -> DeviceResult<CString> {
    CString::new(value).map_err(|e| init_error(format!("invalid name {value:?}: {e}")))
}

/// Vulkan instance with an optional validation messenger
pub struct VulkanInstance {
    /// Loaded entry points
    pub entry: Entry,
    /// Instance handle
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create an instance enabling `extensions`, plus validation when asked
    pub fn new(application: &str, extensions: &[String], enable_validation: bool) -> DeviceResult<Self> {
        let entry = unsafe { Entry::load() }.map_err(|e| init_error(format!("failed to load Vulkan: {e}")))?;

        let app_name = c_string(application)?;
        let engine_name = c_string("Lumen")?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let extension_names = extensions
            .iter()
            .map(|ext| c_string(ext))
            .collect::<DeviceResult<Vec<_>>>()?;
        let mut extension_ptrs: Vec<*const c_char> = extension_names.iter().map(|ext| ext.as_ptr()).collect();

        let layer_names = if enable_validation {
            extension_ptrs.push(DebugUtils::name().as_ptr());
            vec![c_string("VK_LAYER_KHRONOS_validation")?]
        } else {
            Vec::new()
        };
        let layer_ptrs: Vec<*const c_char> = layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance =
            unsafe { entry.create_instance(&create_info, None) }.map_err(|e| vk_error("create_instance", e))?;

        let debug = if enable_validation {
            let utils = DebugUtils::new(&entry, &instance);
            match Self::create_messenger(&utils) {
                Ok(messenger) => Some((utils, messenger)),
                Err(error) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(error);
                }
            }
        } else {
            None
        };

        log::info!(
            "Vulkan instance created with {} extensions, validation {}",
            extension_ptrs.len(),
            if enable_validation { "on" } else { "off" }
        );
        Ok(Self { entry, instance, debug })
    }

    fn create_messenger(utils: &DebugUtils) -> DeviceResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe { utils.create_debug_utils_messenger(&create_info, None) }
            .map_err(|e| vk_error("create_debug_utils_messenger", e))
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((utils, messenger)) = self.debug.take() {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }
    vk::FALSE
}

/// Selected GPU and its queue families
#[derive(Debug, Clone)]
pub struct PhysicalDeviceInfo {
    /// Physical device handle
    pub device: vk::PhysicalDevice,
    /// Device name as reported by the driver
    pub name: String,
    /// Memory heaps and types
    pub memory: vk::PhysicalDeviceMemoryProperties,
    /// Graphics queue family
    pub graphics_family: u32,
    /// Presentation queue family
    pub present_family: u32,
}

impl PhysicalDeviceInfo {
    /// First device with graphics, presentation and swapchain support
    pub fn select(instance: &Instance, surface: vk::SurfaceKHR, surface_loader: &Surface) -> DeviceResult<Self> {
        let devices =
            unsafe { instance.enumerate_physical_devices() }.map_err(|e| vk_error("enumerate_physical_devices", e))?;

        for device in devices {
            match Self::evaluate(instance, device, surface, surface_loader) {
                Ok(Some(info)) => {
                    log::info!("Selected GPU: {}", info.name);
                    return Ok(info);
                }
                Ok(None) => {}
                Err(error) => log::warn!("Skipping GPU: {}", error),
            }
        }
        Err(init_error("no suitable GPU found"))
    }

    fn evaluate(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> DeviceResult<Option<Self>> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut graphics_family = None;
        let mut present_family = None;
        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            if graphics_family.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics_family = Some(index);
            }
            let supports_present = unsafe {
                surface_loader.get_physical_device_surface_support(device, index, surface)
            }
            .map_err(|e| vk_error("get_physical_device_surface_support", e))?;
            if present_family.is_none() && supports_present {
                present_family = Some(index);
            }
            if graphics_family.is_some() && present_family.is_some() {
                break;
            }
        }
        let (Some(graphics_family), Some(present_family)) = (graphics_family, present_family) else {
            log::debug!("{} lacks graphics or present queues", name);
            return Ok(None);
        };

        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
            .map_err(|e| vk_error("enumerate_device_extension_properties", e))?;
        let has_swapchain = extensions
            .iter()
            .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == SwapchainLoader::name());
        if !has_swapchain {
            log::debug!("{} lacks {:?}", name, SwapchainLoader::name());
            return Ok(None);
        }

        let memory = unsafe { instance.get_physical_device_memory_properties(device) };
        Ok(Some(Self {
            device,
            name,
            memory,
            graphics_family,
            present_family,
        }))
    }
}

/// Logical device with its queues
pub struct LogicalDevice {
    /// Device handle
    pub device: Device,
    /// Graphics queue
    pub graphics_queue: vk::Queue,
    /// Presentation queue
    pub present_queue: vk::Queue,
    /// Swapchain extension functions
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create the device with one graphics and one presentation queue
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> DeviceResult<Self> {
        let families: HashSet<u32> = [physical.graphics_family, physical.present_family].into_iter().collect();
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extensions = [SwapchainLoader::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical.device, &create_info, None) }
            .map_err(|e| vk_error("create_device", e))?;
        let graphics_queue = unsafe { device.get_device_queue(physical.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(physical.present_family, 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}
