use std::ffi::{CStr, c_char};

use vma::{Allocator, AllocatorCreateInfo};
use vulkanite::vk::{rs::*, *};

use crate::error::{GpuError, Result};

const DEVICE_EXTENSIONS: [&CStr; 2] = [c"VK_KHR_swapchain", c"VK_KHR_push_descriptor"];

/// Logical device, its single graphics queue and the memory allocator bound to it.
pub struct VulkanDevice {
    pub physical_device: PhysicalDevice,
    pub device: Device,
    pub graphics_queue: Queue,
    pub queue_family_index: u32,
    pub allocator: Allocator,
}

impl VulkanDevice {
    pub fn new(instance: &Instance) -> Result<Self> {
        // First enumerated device wins, no scoring.
        let physical_devices: Vec<PhysicalDevice> = instance.enumerate_physical_devices()?;
        let physical_device = *physical_devices
            .first()
            .ok_or(GpuError::NoPhysicalDevice)?;

        let queue_families: Vec<QueueFamilyProperties> =
            physical_device.get_queue_family_properties();
        let queue_family_index = find_queue_family_index(&queue_families, QueueFlags::Graphics)
            .ok_or(GpuError::NoGraphicsQueue)?;

        let queue_priorities = [1.0];
        let queue_create_infos = [DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities)];

        let extension_names: Vec<*const c_char> = DEVICE_EXTENSIONS
            .iter()
            .map(|extension| extension.as_ptr())
            .collect();

        let mut physical_device_features13 = PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let device_create_info = DeviceCreateInfo {
            enabled_extension_count: extension_names.len() as _,
            pp_enabled_extension_names: extension_names.as_ptr(),
            ..Default::default()
        }
        .queue_create_infos(&queue_create_infos)
        .push_next(&mut physical_device_features13);

        let device = physical_device.create_device(&device_create_info)?;
        let graphics_queue = device.get_queue(queue_family_index, 0);

        let allocator_create_info = AllocatorCreateInfo::new(instance, &device, physical_device);
        let allocator = unsafe { Allocator::new(allocator_create_info) }?;

        log::info!("Logical device created (graphics queue family {queue_family_index})");

        Ok(Self {
            physical_device,
            device,
            graphics_queue,
            queue_family_index,
            allocator,
        })
    }

    #[inline(always)]
    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()?;

        Ok(())
    }

    /// Releases the allocator and the logical device. Every object created from them must
    /// already be gone.
    pub unsafe fn destroy(self) {
        unsafe {
            self.allocator.drop();
            self.device.destroy();
        }
    }
}

/// Linear scan over the queue families; the first one carrying all of `flags` wins.
pub fn find_queue_family_index(families: &[QueueFamilyProperties], flags: QueueFlags) -> Option<u32> {
    families
        .iter()
        .position(|family| family.queue_count > 0 && family.queue_flags.contains(flags))
        .map(|index| index as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(queue_flags: QueueFlags, queue_count: u32) -> QueueFamilyProperties {
        QueueFamilyProperties {
            queue_flags,
            queue_count,
            ..Default::default()
        }
    }

    #[test]
    fn first_graphics_family_wins() {
        let families = [
            family(QueueFlags::Transfer, 2),
            family(QueueFlags::Graphics | QueueFlags::Compute, 1),
            family(QueueFlags::Graphics, 4),
        ];

        assert_eq!(
            find_queue_family_index(&families, QueueFlags::Graphics),
            Some(1)
        );
    }

    #[test]
    fn missing_graphics_family_is_none() {
        let families = [
            family(QueueFlags::Transfer, 1),
            family(QueueFlags::Compute, 1),
        ];

        assert_eq!(find_queue_family_index(&families, QueueFlags::Graphics), None);
        assert_eq!(find_queue_family_index(&[], QueueFlags::Graphics), None);
    }

    #[test]
    fn empty_families_are_skipped() {
        let families = [family(QueueFlags::Graphics, 0), family(QueueFlags::Graphics, 1)];

        assert_eq!(
            find_queue_family_index(&families, QueueFlags::Graphics),
            Some(1)
        );
    }
}
