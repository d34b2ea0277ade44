//! Vulkan implementation of [`GpuDevice`](super::GpuDevice).
//!
//! Raw `ash` calls live here and nowhere else. Each submodule wraps one
//! group of Vulkan objects:
//!
//! - [`context`]: instance, debug messenger, physical and logical device
//! - [`swapchain`]: presentation targets, depth buffer, render pass, framebuffers
//! - [`resources`]: buffers, textures, samplers and per-program pipelines
//! - [`device`]: the [`VulkanDevice`] itself, which translates recorded
//!   [`GpuCommand`](super::GpuCommand) lists into command buffers at submit time

#![allow(unsafe_code)]

pub mod context;
pub mod device;
pub mod resources;
pub mod swapchain;

use ash::vk;

use super::device::DeviceError;

pub use device::VulkanDevice;

/// Map a failed Vulkan call to a [`DeviceError`]
pub(crate) fn vk_error(operation: &'static str, result: vk::Result) -> DeviceError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => DeviceError::Lost(format!("{operation}: {result:?}")),
        other => DeviceError::api(operation, format!("{other:?}")),
    }
}

/// Index of a memory type allowed by `type_filter` with all of `properties`
pub(crate) fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32, DeviceError> {
    (0..memory.memory_type_count)
        .find(|&i| {
            type_filter & (1 << i) != 0 && memory.memory_types[i as usize].property_flags.contains(properties)
        })
        .ok_or(DeviceError::NoSuitableMemoryType)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lost_maps_to_lost() {
        assert!(matches!(
            vk_error("queue_submit", vk::Result::ERROR_DEVICE_LOST),
            DeviceError::Lost(_)
        ));
        assert!(matches!(
            vk_error("queue_submit", vk::Result::ERROR_OUT_OF_HOST_MEMORY),
            DeviceError::Api { operation: "queue_submit", .. }
        ));
    }

    #[test]
    fn memory_type_respects_filter_and_flags() {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        memory.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        memory.memory_types[1].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        memory.memory_types[2].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;

        let host = vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert_eq!(find_memory_type(&memory, 0b111, host), Ok(1));
        assert_eq!(find_memory_type(&memory, 0b100, host), Ok(2));
        assert_eq!(
            find_memory_type(&memory, 0b001, host),
            Err(DeviceError::NoSuitableMemoryType)
        );
    }
}
