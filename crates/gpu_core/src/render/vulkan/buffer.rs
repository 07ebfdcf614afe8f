//! Buffer management for vertex data, indices, uniforms and storage
//!
//! Every buffer owns one buffer object and one dedicated memory allocation.
//! Host-visible buffers use coherent memory so writes need no explicit flush;
//! device-local buffers are filled through a transient staging buffer.
//!
//! The typed wrappers ([`VertexBuffer`], [`IndexBuffer`], [`UniformBuffer`],
//! [`StorageBuffer`], [`StorageVertexBuffer`]) differ only in their usage tag
//! and in whether they hand out a descriptor-info view for shader binding.

use ash::vk;
use bytemuck::Pod;
use std::marker::PhantomData;
use std::mem::size_of;

use super::commands::copy_buffer;
use super::context::DeviceContext;
use super::error::{ErrorKind, VkResultExt, VulkanError, VulkanResult};
use super::live_objects::ObjectKind;
use super::memory::MemoryObject;

/// What a buffer is bound as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Vertex input
    Vertex,
    /// Index input
    Index,
    /// Uniform block
    Uniform,
    /// Shader storage block
    Storage,
    /// Storage block that is also consumed as vertex input
    StorageVertex,
    /// Transfer source for uploads
    Staging,
}

impl BufferUsage {
    /// Vulkan usage flags for this kind of buffer
    pub fn flags(self) -> vk::BufferUsageFlags {
        match self {
            Self::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            Self::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            Self::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            Self::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
            Self::StorageVertex => vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::VERTEX_BUFFER,
            Self::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// Whether buffers of this kind are bound through descriptor sets
    pub fn is_descriptor_bound(self) -> bool {
        matches!(self, Self::Uniform | Self::Storage | Self::StorageVertex)
    }

    /// Descriptor type used when binding this kind of buffer
    pub fn descriptor_type(self) -> Option<vk::DescriptorType> {
        match self {
            Self::Uniform => Some(vk::DescriptorType::UNIFORM_BUFFER),
            Self::Storage | Self::StorageVertex => Some(vk::DescriptorType::STORAGE_BUFFER),
            _ => None,
        }
    }
}

/// Memory for buffers the CPU writes directly
pub const HOST_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Byte size of `count` elements of `T`, rejecting overflow and empty buffers
#[track_caller]
pub fn byte_size_of<T>(count: usize) -> VulkanResult<vk::DeviceSize> {
    let bytes = size_of::<T>()
        .checked_mul(count)
        .ok_or_else(|| VulkanError::precondition(format!("{count} elements overflow a buffer size")))?;
    if bytes == 0 {
        return Err(VulkanError::precondition("Buffers must hold at least one byte"));
    }
    Ok(bytes as vk::DeviceSize)
}

/// A buffer object bound to its own memory allocation
pub struct Buffer<'ctx> {
    ctx: &'ctx DeviceContext,
    buffer: vk::Buffer,
    size: vk::DeviceSize,
    usage: BufferUsage,
    // Freed after the buffer is destroyed in `Drop`
    memory: MemoryObject<'ctx>,
}

impl<'ctx> Buffer<'ctx> {
    /// Create a buffer of `size` bytes with extra usage flags and memory properties
    pub fn new(
        ctx: &'ctx DeviceContext,
        usage: BufferUsage,
        extra_usage: vk::BufferUsageFlags,
        size: vk::DeviceSize,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::precondition("Buffers must hold at least one byte"));
        }

        let device = ctx.device();
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage.flags() | extra_usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None) }.vk_check()?;
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let bound = MemoryObject::allocate(ctx, requirements, properties).and_then(|memory| {
            unsafe { device.bind_buffer_memory(buffer, memory.handle(), 0) }.vk_check()?;
            Ok(memory)
        });
        let memory = match bound {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        ctx.live_objects().created(ObjectKind::Buffer);

        log::debug!("Created {usage:?} buffer: {size} bytes ({} allocated)", memory.size());

        Ok(Self {
            ctx,
            buffer,
            size,
            usage,
            memory,
        })
    }

    /// Host-visible, host-coherent buffer of `size` bytes
    pub fn host_visible(ctx: &'ctx DeviceContext, usage: BufferUsage, size: vk::DeviceSize) -> VulkanResult<Self> {
        Self::new(ctx, usage, vk::BufferUsageFlags::empty(), size, HOST_MEMORY)
    }

    /// Host-visible buffer initialized with `bytes`
    pub fn with_data(ctx: &'ctx DeviceContext, usage: BufferUsage, bytes: &[u8]) -> VulkanResult<Self> {
        let buffer = Self::host_visible(ctx, usage, bytes.len() as vk::DeviceSize)?;
        buffer.copy_to(bytes, 0)?;
        Ok(buffer)
    }

    /// Device-local buffer filled from `bytes` through a staging buffer
    pub fn device_local(ctx: &'ctx DeviceContext, usage: BufferUsage, bytes: &[u8]) -> VulkanResult<Self> {
        let staging = Self::with_data(ctx, BufferUsage::Staging, bytes)?;
        let buffer = Self::new(
            ctx,
            usage,
            vk::BufferUsageFlags::TRANSFER_DST,
            staging.size,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        copy_buffer(ctx, staging.handle(), buffer.handle(), staging.size)?;
        Ok(buffer)
    }

    /// Copy `bytes` into the buffer at `offset`
    ///
    /// Fails if the range leaves the allocation or the memory is not host visible.
    pub fn copy_to(&self, bytes: &[u8], offset: vk::DeviceSize) -> VulkanResult<()> {
        self.memory.copy_to(bytes, offset)
    }

    /// Copy `elements` over the slots starting at element index `first`
    pub fn copy_elements<T: Pod>(&self, elements: &[T], first: usize) -> VulkanResult<()> {
        let offset = element_offset::<T>(first, self.memory.size())?;
        self.memory.copy_to(bytemuck::cast_slice(elements), offset)
    }

    /// Descriptor view over the whole buffer
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: self.size,
        }
    }

    /// Raw buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Requested size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Size of the backing allocation in bytes
    pub fn allocation_size(&self) -> vk::DeviceSize {
        self.memory.size()
    }

    /// Usage tag
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer<'_> {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_buffer(self.buffer, None) };
        self.ctx.live_objects().destroyed(ObjectKind::Buffer);
    }
}

/// Byte offset of element `first`, rejected when it does not fit in `capacity`
fn element_offset<T>(first: usize, capacity: vk::DeviceSize) -> VulkanResult<vk::DeviceSize> {
    first
        .checked_mul(size_of::<T>())
        .and_then(|bytes| vk::DeviceSize::try_from(bytes).ok())
        .filter(|&offset| offset <= capacity)
        .ok_or_else(|| {
            VulkanError::new(ErrorKind::OutOfBounds {
                offset: vk::DeviceSize::MAX,
                size: size_of::<T>() as vk::DeviceSize,
                capacity,
            })
        })
}

/// Vertex buffer of `V` elements
pub struct VertexBuffer<'ctx, V: Pod> {
    buffer: Buffer<'ctx>,
    count: u32,
    _marker: PhantomData<V>,
}

impl<'ctx, V: Pod> VertexBuffer<'ctx, V> {
    /// Host-visible vertex buffer holding `vertices`
    pub fn new(ctx: &'ctx DeviceContext, vertices: &[V]) -> VulkanResult<Self> {
        byte_size_of::<V>(vertices.len())?;
        let buffer = Buffer::with_data(ctx, BufferUsage::Vertex, bytemuck::cast_slice(vertices))?;
        Ok(Self::wrap(buffer, vertices.len()))
    }

    /// Device-local vertex buffer uploaded through a staging buffer
    pub fn device_local(ctx: &'ctx DeviceContext, vertices: &[V]) -> VulkanResult<Self> {
        byte_size_of::<V>(vertices.len())?;
        let buffer = Buffer::device_local(ctx, BufferUsage::Vertex, bytemuck::cast_slice(vertices))?;
        Ok(Self::wrap(buffer, vertices.len()))
    }

    fn wrap(buffer: Buffer<'ctx>, count: usize) -> Self {
        Self {
            buffer,
            count: count as u32,
            _marker: PhantomData,
        }
    }

    /// Overwrite vertices starting at index `first`
    pub fn update(&self, vertices: &[V], first: usize) -> VulkanResult<()> {
        self.buffer.copy_elements(vertices, first)
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> u32 {
        self.count
    }

    /// Raw buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Underlying untyped buffer
    pub fn buffer(&self) -> &Buffer<'ctx> {
        &self.buffer
    }
}

/// Element types usable in an index buffer
pub trait IndexElement: Pod {
    /// Matching Vulkan index type
    const INDEX_TYPE: vk::IndexType;
}

impl IndexElement for u16 {
    const INDEX_TYPE: vk::IndexType = vk::IndexType::UINT16;
}

impl IndexElement for u32 {
    const INDEX_TYPE: vk::IndexType = vk::IndexType::UINT32;
}

/// Index buffer of `u16` or `u32` indices
pub struct IndexBuffer<'ctx, I: IndexElement> {
    buffer: Buffer<'ctx>,
    count: u32,
    _marker: PhantomData<I>,
}

impl<'ctx, I: IndexElement> IndexBuffer<'ctx, I> {
    /// Host-visible index buffer holding `indices`
    pub fn new(ctx: &'ctx DeviceContext, indices: &[I]) -> VulkanResult<Self> {
        byte_size_of::<I>(indices.len())?;
        let buffer = Buffer::with_data(ctx, BufferUsage::Index, bytemuck::cast_slice(indices))?;
        Ok(Self::wrap(buffer, indices.len()))
    }

    /// Device-local index buffer uploaded through a staging buffer
    pub fn device_local(ctx: &'ctx DeviceContext, indices: &[I]) -> VulkanResult<Self> {
        byte_size_of::<I>(indices.len())?;
        let buffer = Buffer::device_local(ctx, BufferUsage::Index, bytemuck::cast_slice(indices))?;
        Ok(Self::wrap(buffer, indices.len()))
    }

    fn wrap(buffer: Buffer<'ctx>, count: usize) -> Self {
        Self {
            buffer,
            count: count as u32,
            _marker: PhantomData,
        }
    }

    /// Overwrite indices starting at position `first`
    pub fn update(&self, indices: &[I], first: usize) -> VulkanResult<()> {
        self.buffer.copy_elements(indices, first)
    }

    /// Number of indices
    pub fn index_count(&self) -> u32 {
        self.count
    }

    /// Index type to bind with
    pub fn index_type(&self) -> vk::IndexType {
        I::INDEX_TYPE
    }

    /// Raw buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }
}

/// Uniform buffer holding one `T`
pub struct UniformBuffer<'ctx, T: Pod> {
    buffer: Buffer<'ctx>,
    _marker: PhantomData<T>,
}

impl<'ctx, T: Pod> UniformBuffer<'ctx, T> {
    /// Host-visible uniform buffer sized for one `T`
    pub fn new(ctx: &'ctx DeviceContext) -> VulkanResult<Self> {
        let size = byte_size_of::<T>(1)?;
        Ok(Self {
            buffer: Buffer::host_visible(ctx, BufferUsage::Uniform, size)?,
            _marker: PhantomData,
        })
    }

    /// Uniform buffer initialized with `value`
    pub fn with_value(ctx: &'ctx DeviceContext, value: &T) -> VulkanResult<Self> {
        let uniform = Self::new(ctx)?;
        uniform.update(value)?;
        Ok(uniform)
    }

    /// Overwrite the uniform contents
    pub fn update(&self, value: &T) -> VulkanResult<()> {
        self.buffer.copy_to(bytemuck::bytes_of(value), 0)
    }

    /// Descriptor view over the whole block
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        self.buffer.descriptor_info()
    }

    /// Raw buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }
}

/// Storage buffer holding `len` elements of `T`
pub struct StorageBuffer<'ctx, T: Pod> {
    buffer: Buffer<'ctx>,
    len: usize,
    _marker: PhantomData<T>,
}

impl<'ctx, T: Pod> StorageBuffer<'ctx, T> {
    /// Host-visible storage buffer with room for `len` elements
    pub fn new(ctx: &'ctx DeviceContext, len: usize) -> VulkanResult<Self> {
        let size = byte_size_of::<T>(len)?;
        Ok(Self {
            buffer: Buffer::host_visible(ctx, BufferUsage::Storage, size)?,
            len,
            _marker: PhantomData,
        })
    }

    /// Host-visible storage buffer initialized with `elements`
    pub fn from_slice(ctx: &'ctx DeviceContext, elements: &[T]) -> VulkanResult<Self> {
        let storage = Self::new(ctx, elements.len())?;
        storage.update(elements, 0)?;
        Ok(storage)
    }

    /// Overwrite elements starting at index `first`
    pub fn update(&self, elements: &[T], first: usize) -> VulkanResult<()> {
        self.buffer.copy_elements(elements, first)
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; empty storage buffers cannot be created
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Descriptor view over the whole buffer
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        self.buffer.descriptor_info()
    }

    /// Raw buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }
}

/// Storage buffer that is also bound as vertex input, e.g. compute-written particles
pub struct StorageVertexBuffer<'ctx, V: Pod> {
    buffer: Buffer<'ctx>,
    count: u32,
    _marker: PhantomData<V>,
}

impl<'ctx, V: Pod> StorageVertexBuffer<'ctx, V> {
    /// Host-visible buffer initialized with `vertices`
    pub fn from_slice(ctx: &'ctx DeviceContext, vertices: &[V]) -> VulkanResult<Self> {
        byte_size_of::<V>(vertices.len())?;
        let buffer = Buffer::with_data(ctx, BufferUsage::StorageVertex, bytemuck::cast_slice(vertices))?;
        Ok(Self {
            buffer,
            count: vertices.len() as u32,
            _marker: PhantomData,
        })
    }

    /// Overwrite vertices starting at index `first`
    pub fn update(&self, vertices: &[V], first: usize) -> VulkanResult<()> {
        self.buffer.copy_elements(vertices, first)
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> u32 {
        self.count
    }

    /// Descriptor view for binding as storage
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        self.buffer.descriptor_info()
    }

    /// Raw buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_flags() {
        assert_eq!(BufferUsage::Vertex.flags(), vk::BufferUsageFlags::VERTEX_BUFFER);
        assert_eq!(BufferUsage::Staging.flags(), vk::BufferUsageFlags::TRANSFER_SRC);
        let storage_vertex = BufferUsage::StorageVertex.flags();
        assert!(storage_vertex.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
        assert!(storage_vertex.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
    }

    #[test]
    fn test_descriptor_bound_usages() {
        assert!(BufferUsage::Uniform.is_descriptor_bound());
        assert!(BufferUsage::Storage.is_descriptor_bound());
        assert!(!BufferUsage::Vertex.is_descriptor_bound());
        assert!(!BufferUsage::Index.is_descriptor_bound());
        assert_eq!(
            BufferUsage::Uniform.descriptor_type(),
            Some(vk::DescriptorType::UNIFORM_BUFFER)
        );
        assert_eq!(
            BufferUsage::StorageVertex.descriptor_type(),
            Some(vk::DescriptorType::STORAGE_BUFFER)
        );
        assert_eq!(BufferUsage::Staging.descriptor_type(), None);
    }

    #[test]
    fn test_byte_size_of() {
        assert_eq!(byte_size_of::<[f32; 3]>(4).unwrap(), 48);
        assert_eq!(byte_size_of::<u16>(1).unwrap(), 2);
        assert!(byte_size_of::<u32>(0).is_err());
        assert!(byte_size_of::<()>(10).is_err());
        assert!(byte_size_of::<u64>(usize::MAX).is_err());
    }

    #[test]
    fn test_element_offsets() {
        assert_eq!(element_offset::<u32>(0, 16).unwrap(), 0);
        assert_eq!(element_offset::<u32>(3, 16).unwrap(), 12);
        assert_eq!(element_offset::<[f32; 4]>(2, 64).unwrap(), 32);
        assert_eq!(element_offset::<u32>(4, 16).unwrap(), 16);
    }

    #[test]
    fn test_element_offset_overflow_is_rejected() {
        let error = element_offset::<u64>(usize::MAX / 8 + 1, 16).unwrap_err();
        assert!(matches!(
            error.kind(),
            ErrorKind::OutOfBounds { capacity: 16, .. }
        ));
        assert!(element_offset::<u32>(5, 16).is_err());
    }

    #[test]
    fn test_index_types() {
        assert_eq!(<u16 as IndexElement>::INDEX_TYPE, vk::IndexType::UINT16);
        assert_eq!(<u32 as IndexElement>::INDEX_TYPE, vk::IndexType::UINT32);
    }

    #[test]
    fn test_host_memory_is_coherent() {
        assert!(HOST_MEMORY.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
        assert!(HOST_MEMORY.contains(vk::MemoryPropertyFlags::HOST_COHERENT));
    }
}
