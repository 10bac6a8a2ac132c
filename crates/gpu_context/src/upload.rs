use vma::{Alloc as _, Allocation, AllocationCreateFlags, AllocationCreateInfo, Allocator, MemoryUsage};
use vulkanite::{
    Handle,
    vk::{rs::*, *},
};

use crate::{
    error::{GpuError, Result},
    immediate::ImmediateSubmit,
};

pub struct BufferDesc<'a> {
    pub data: &'a [u8],
    pub usage: BufferUsageFlags,
}

/// Device-local buffer created fully populated.
pub struct BufferResource {
    pub buffer: Buffer,
    pub allocation: Allocation,
    pub usage: BufferUsageFlags,
    pub size: DeviceSize,
}

impl BufferResource {
    pub unsafe fn destroy(mut self, allocator: &Allocator) {
        unsafe {
            allocator.destroy_buffer(*self.buffer, &mut self.allocation);
        }
    }
}

/// Copies `desc.data` into a new device-local buffer through a temporary staging buffer.
///
/// Blocks until the copy has completed, so the buffer can be bound right away.
pub fn upload_buffer(
    allocator: &Allocator,
    immediate: &mut dyn ImmediateSubmit,
    desc: &BufferDesc,
) -> Result<BufferResource> {
    if desc.data.is_empty() {
        return Err(GpuError::EmptyBuffer);
    }

    let size = desc.data.len() as DeviceSize;

    let (buffer, allocation) = create_allocated_buffer(
        allocator,
        size,
        desc.usage | BufferUsageFlags::TransferDst,
        AllocationCreateInfo {
            usage: MemoryUsage::AutoPreferDevice,
            ..Default::default()
        },
    )?;
    let destination = BufferResource {
        buffer,
        allocation,
        usage: desc.usage,
        size,
    };

    if let Err(error) = stage_and_copy(allocator, immediate, desc.data, destination.buffer) {
        unsafe { destination.destroy(allocator) };
        return Err(error);
    }

    Ok(destination)
}

fn stage_and_copy(
    allocator: &Allocator,
    immediate: &mut dyn ImmediateSubmit,
    data: &[u8],
    destination: Buffer,
) -> Result<()> {
    let size = data.len() as DeviceSize;

    let (staging_buffer, mut staging_allocation) = create_allocated_buffer(
        allocator,
        size,
        BufferUsageFlags::TransferSrc,
        staging_allocation_info(),
    )?;

    let result = (|| {
        unsafe {
            let p_mapped_memory = allocator.map_memory(staging_allocation)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), p_mapped_memory as _, data.len());
            allocator.unmap_memory(staging_allocation);
        }

        let regions_to_copy = [BufferCopy {
            size,
            ..Default::default()
        }];

        immediate.submit(&mut |command_buffer| {
            command_buffer.copy_buffer(staging_buffer, destination, &regions_to_copy);
        })
    })();

    unsafe {
        allocator.destroy_buffer(*staging_buffer, &mut staging_allocation);
    }

    result
}

/// Host-written staging memory. Required to be coherent, so writes through the mapping
/// are visible to the transfer without a flush.
pub(crate) fn staging_allocation_info() -> AllocationCreateInfo {
    AllocationCreateInfo {
        flags: AllocationCreateFlags::Mapped | AllocationCreateFlags::HostAccessSequentialWrite,
        usage: MemoryUsage::AutoPreferHost,
        required_flags: MemoryPropertyFlags::HostVisible | MemoryPropertyFlags::HostCoherent,
        ..Default::default()
    }
}

pub(crate) fn create_allocated_buffer(
    allocator: &Allocator,
    size: DeviceSize,
    usage: BufferUsageFlags,
    allocation_create_info: AllocationCreateInfo,
) -> Result<(Buffer, Allocation)> {
    let buffer_create_info = BufferCreateInfo {
        size,
        usage,
        sharing_mode: SharingMode::Exclusive,
        ..Default::default()
    };

    let (buffer, allocation) =
        unsafe { allocator.create_buffer(&buffer_create_info, &allocation_create_info) }?;

    Ok((Buffer::from_inner(buffer), allocation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ContextConfig,
        device::VulkanDevice,
        immediate::BlockingImmediate,
        instance::{self, SURFACE_EXTENSION},
    };

    #[test]
    fn staging_memory_is_host_visible_and_coherent() {
        let info = staging_allocation_info();

        assert_eq!(
            info.required_flags,
            MemoryPropertyFlags::HostVisible | MemoryPropertyFlags::HostCoherent
        );
    }

    #[test]
    #[ignore = "needs a Vulkan device"]
    fn uploaded_bytes_read_back_unchanged() {
        let config = ContextConfig {
            validation: false,
            ..Default::default()
        };
        let Ok(instance) = instance::create_instance(&config, &[SURFACE_EXTENSION]) else {
            return;
        };
        let vulkan_device = match VulkanDevice::new(&instance) {
            Ok(vulkan_device) => vulkan_device,
            Err(_) => {
                unsafe { instance.destroy() };
                return;
            }
        };
        let allocator = &vulkan_device.allocator;
        let mut immediate = BlockingImmediate::new(
            vulkan_device.device,
            vulkan_device.graphics_queue,
            vulkan_device.queue_family_index,
        )
        .unwrap();

        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let uploaded = upload_buffer(
            allocator,
            &mut immediate,
            &BufferDesc {
                data: &data,
                usage: BufferUsageFlags::VertexBuffer | BufferUsageFlags::TransferSrc,
            },
        )
        .unwrap();
        assert_eq!(uploaded.size, data.len() as DeviceSize);

        let (readback, mut readback_allocation) = create_allocated_buffer(
            allocator,
            uploaded.size,
            BufferUsageFlags::TransferDst,
            AllocationCreateInfo {
                flags: AllocationCreateFlags::Mapped | AllocationCreateFlags::HostAccessRandom,
                usage: MemoryUsage::AutoPreferHost,
                required_flags: MemoryPropertyFlags::HostVisible | MemoryPropertyFlags::HostCoherent,
                ..Default::default()
            },
        )
        .unwrap();

        let regions_to_copy = [BufferCopy {
            size: uploaded.size,
            ..Default::default()
        }];
        immediate
            .submit(&mut |command_buffer| {
                command_buffer.copy_buffer(uploaded.buffer, readback, &regions_to_copy);
            })
            .unwrap();

        let read_back = unsafe {
            let p_mapped_memory = allocator.map_memory(readback_allocation).unwrap();
            let bytes = std::slice::from_raw_parts(p_mapped_memory as *const u8, data.len()).to_vec();
            allocator.unmap_memory(readback_allocation);
            bytes
        };
        assert_eq!(read_back, data);

        unsafe {
            allocator.destroy_buffer(*readback, &mut readback_allocation);
            uploaded.destroy(allocator);
            immediate.destroy();
            vulkan_device.destroy();
            instance.destroy();
        }
    }
}
