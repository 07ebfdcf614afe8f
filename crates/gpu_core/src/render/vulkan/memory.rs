//! Device memory selection and dedicated allocations
//!
//! Every buffer and image gets exactly one allocation of its own. There is no
//! pooling or sub-allocation.

use ash::vk;

use super::context::DeviceContext;
use super::error::{ErrorKind, VkResultExt, VulkanError, VulkanResult};
use super::live_objects::ObjectKind;

/// Find the lowest memory type allowed by `type_bits` whose flags include `required`
///
/// Returns `None` when no type qualifies; callers treat that as fatal.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count).find(|&i| {
        (type_bits >> i) & 1 == 1
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

/// Round `size` up to a power-of-two `alignment`
pub fn aligned_size(size: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment <= 1 {
        return size;
    }
    (size + alignment - 1) & !(alignment - 1)
}

/// Reject host copies that would leave `[0, capacity)`
#[track_caller]
pub fn check_copy_range(offset: u64, size: u64, capacity: u64) -> VulkanResult<()> {
    match offset.checked_add(size) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(VulkanError::new(ErrorKind::OutOfBounds { offset, size, capacity })),
    }
}

/// A single device-memory allocation owned by one buffer or image
pub struct MemoryObject<'ctx> {
    ctx: &'ctx DeviceContext,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    properties: vk::MemoryPropertyFlags,
}

impl<'ctx> MemoryObject<'ctx> {
    /// Allocate memory satisfying `requirements` with at least `properties`
    pub fn allocate(
        ctx: &'ctx DeviceContext,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let memory_type_index = ctx.find_memory(requirements.memory_type_bits, properties)?;
        let size = aligned_size(requirements.size, requirements.alignment);

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { ctx.device().allocate_memory(&alloc_info, None) }.vk_check()?;
        ctx.live_objects().created(ObjectKind::Allocation);

        log::debug!(
            "Allocated {} bytes from memory type {} ({:?})",
            size,
            memory_type_index,
            properties
        );

        Ok(Self {
            ctx,
            memory,
            size,
            properties,
        })
    }

    /// Copy `src` into the allocation starting at `offset`
    ///
    /// The whole range must lie inside the allocation and the memory must be host visible.
    pub fn copy_to(&self, src: &[u8], offset: vk::DeviceSize) -> VulkanResult<()> {
        check_copy_range(offset, src.len() as u64, self.size)?;
        if !self.is_host_visible() {
            return Err(VulkanError::precondition(
                "host copy into memory that is not host visible",
            ));
        }
        if src.is_empty() {
            return Ok(());
        }

        let device = self.ctx.device();
        unsafe {
            let ptr = device
                .map_memory(self.memory, offset, src.len() as u64, vk::MemoryMapFlags::empty())
                .vk_check()?;
            let dst = std::slice::from_raw_parts_mut(ptr.cast::<u8>(), src.len());
            dst.copy_from_slice(src);
            device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Whether the CPU can map this memory
    pub fn is_host_visible(&self) -> bool {
        self.properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    /// Allocation size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Raw memory handle
    pub fn handle(&self) -> vk::DeviceMemory {
        self.memory
    }
}

impl Drop for MemoryObject<'_> {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device().free_memory(self.memory, None);
        }
        self.ctx.live_objects().destroyed(ObjectKind::Allocation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        props
    }

    const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    #[test]
    fn test_find_memory_type_picks_lowest_matching_index() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HOST,
            HOST | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);
        assert_eq!(find_memory_type(&props, 0b111, HOST), Some(1));
        assert_eq!(find_memory_type(&props, 0b100, HOST), Some(2));
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(0)
        );
    }

    #[test]
    fn test_find_memory_type_respects_type_bits() {
        let props = memory_properties(&[HOST, vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert_eq!(find_memory_type(&props, 0b10, HOST), None);
        assert_eq!(find_memory_type(&props, 0, vk::MemoryPropertyFlags::empty()), None);
    }

    #[test]
    fn test_find_memory_type_requires_superset() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);
        assert_eq!(find_memory_type(&props, 0b1, HOST), None);
        assert_eq!(
            find_memory_type(&props, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Some(0)
        );
    }

    #[test]
    fn test_find_memory_type_matches_brute_force() {
        let flags = [
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HOST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | HOST,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ];
        let props = memory_properties(&flags);
        let wanted = [
            vk::MemoryPropertyFlags::empty(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HOST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | HOST,
        ];
        for type_bits in 0..16u32 {
            for required in wanted {
                let expected = (0..flags.len())
                    .find(|&i| type_bits & (1 << i) != 0 && flags[i].contains(required))
                    .map(|i| i as u32);
                let found = find_memory_type(&props, type_bits, required);
                assert_eq!(found, expected, "bits {type_bits:#b} props {required:?}");
                if let Some(i) = found {
                    assert_eq!((type_bits >> i) & 1, 1);
                    assert!(props.memory_types[i as usize].property_flags.contains(required));
                }
            }
        }
    }

    #[test]
    fn test_aligned_size() {
        assert_eq!(aligned_size(0, 256), 0);
        assert_eq!(aligned_size(1, 256), 256);
        assert_eq!(aligned_size(256, 256), 256);
        assert_eq!(aligned_size(257, 256), 512);
        assert_eq!(aligned_size(100, 1), 100);
        assert_eq!(aligned_size(100, 0), 100);
        for size in [1u64, 3, 64, 65, 1000, 4096] {
            for align in [4u64, 16, 64, 256] {
                let rounded = aligned_size(size, align);
                assert!(rounded >= size);
                assert_eq!(rounded % align, 0);
                assert!(rounded - size < align);
            }
        }
    }

    #[test]
    fn test_check_copy_range() {
        assert!(check_copy_range(0, 16, 16).is_ok());
        assert!(check_copy_range(8, 8, 16).is_ok());
        assert!(check_copy_range(16, 0, 16).is_ok());

        let error = check_copy_range(8, 9, 16).unwrap_err();
        assert!(matches!(
            error.kind(),
            ErrorKind::OutOfBounds { offset: 8, size: 9, capacity: 16 }
        ));
        assert!(check_copy_range(17, 0, 16).is_err());
        assert!(check_copy_range(u64::MAX, 2, 16).is_err());
    }
}
