//! Device-local images with a full-mip view
//!
//! [`Image`] is the building block shared by textures, depth buffers and
//! attachments. Layout transitions are recorded as barriers whose access and
//! stage masks come from [`transition_masks`].

use ash::{vk, Device};
use std::ops::Range;

use super::commands::run_one_shot;
use super::context::DeviceContext;
use super::error::{VkResultExt, VulkanError, VulkanResult};
use super::live_objects::ObjectKind;
use super::memory::MemoryObject;

/// Parameters for creating an [`Image`]
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// 1D or 2D
    pub image_type: vk::ImageType,
    /// View type matching `image_type`
    pub view_type: vk::ImageViewType,
    /// Dimensions; unused axes are 1
    pub extent: vk::Extent3D,
    /// Pixel format
    pub format: vk::Format,
    /// Number of mip levels
    pub mip_levels: u32,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Aspect covered by the view
    pub aspect: vk::ImageAspectFlags,
}

impl ImageDesc {
    /// Single-layer 2D image
    pub fn new_2d(
        width: u32,
        height: u32,
        format: vk::Format,
        mip_levels: u32,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            view_type: vk::ImageViewType::TYPE_2D,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            format,
            mip_levels,
            usage,
            aspect: aspect_for_format(format),
        }
    }

    /// Single-layer 1D image
    pub fn new_1d(width: u32, format: vk::Format, mip_levels: u32, usage: vk::ImageUsageFlags) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_1D,
            view_type: vk::ImageViewType::TYPE_1D,
            extent: vk::Extent3D {
                width,
                height: 1,
                depth: 1,
            },
            ..Self::new_2d(width, 1, format, mip_levels, usage)
        }
    }
}

/// Whether `format` has a depth component
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Whether `format` has a stencil component
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Aspect mask a view of `format` should cover
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    let mut aspect = vk::ImageAspectFlags::empty();
    if is_depth_format(format) {
        aspect |= vk::ImageAspectFlags::DEPTH;
    }
    if has_stencil_component(format) {
        aspect |= vk::ImageAspectFlags::STENCIL;
    }
    if aspect.is_empty() {
        vk::ImageAspectFlags::COLOR
    } else {
        aspect
    }
}

/// Access and stage masks for one layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    /// Accesses that must complete before the transition
    pub src_access: vk::AccessFlags,
    /// Accesses that wait for the transition
    pub dst_access: vk::AccessFlags,
    /// Stage producing `src_access`
    pub src_stage: vk::PipelineStageFlags,
    /// Stage consuming `dst_access`
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier masks for the layout transitions this crate performs
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Option<TransitionMasks> {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    let (src_access, dst_access, src_stage, dst_stage) = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => (A::empty(), A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER),
        (L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => {
            (A::TRANSFER_WRITE, A::TRANSFER_READ, S::TRANSFER, S::TRANSFER)
        }
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_WRITE, A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER)
        }
        (L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_READ, A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER)
        }
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
            A::empty(),
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            S::TOP_OF_PIPE,
            S::EARLY_FRAGMENT_TESTS,
        ),
        (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => (
            A::empty(),
            A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
            S::TOP_OF_PIPE,
            S::COLOR_ATTACHMENT_OUTPUT,
        ),
        (L::UNDEFINED, L::GENERAL) => (
            A::empty(),
            A::SHADER_READ | A::SHADER_WRITE,
            S::TOP_OF_PIPE,
            S::COMPUTE_SHADER,
        ),
        _ => return None,
    };

    Some(TransitionMasks {
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    })
}

/// Record a layout transition of `mips` on `image`
#[allow(clippy::too_many_arguments)]
pub fn cmd_transition_layout(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    mips: Range<u32>,
) -> VulkanResult<()> {
    let masks = transition_masks(old, new)
        .ok_or_else(|| VulkanError::invalid(format!("Unsupported layout transition {old:?} -> {new:?}")))?;

    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: mips.start,
            level_count: mips.end - mips.start,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access);

    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer,
            masks.src_stage,
            masks.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier.build()],
        );
    }
    Ok(())
}

/// Record a copy of a tightly packed buffer into mip level 0 of `image`
pub fn cmd_copy_buffer_to_image(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    buffer: vk::Buffer,
    image: vk::Image,
    extent: vk::Extent3D,
) {
    let region = vk::BufferImageCopy::builder()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .image_extent(extent);

    unsafe {
        device.cmd_copy_buffer_to_image(
            command_buffer,
            buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region.build()],
        );
    }
}

/// Image + full-mip view + dedicated device-local memory
pub struct Image<'ctx> {
    ctx: &'ctx DeviceContext,
    image: vk::Image,
    view: vk::ImageView,
    desc: ImageDesc,
    // Freed after image and view are destroyed in `Drop`
    memory: MemoryObject<'ctx>,
}

impl<'ctx> Image<'ctx> {
    /// Create the image, bind device-local memory and create its view
    pub fn new(ctx: &'ctx DeviceContext, desc: ImageDesc) -> VulkanResult<Self> {
        if desc.mip_levels == 0 || desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(VulkanError::precondition(format!(
                "Image needs a non-empty extent and at least one mip level, got {:?} with {} levels",
                desc.extent, desc.mip_levels
            )));
        }

        let device = ctx.device();
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(desc.image_type)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.create_image(&image_info, None) }.vk_check()?;
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let bound = MemoryObject::allocate(ctx, requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL).and_then(
            |memory| {
                unsafe { device.bind_image_memory(image, memory.handle(), 0) }.vk_check()?;
                Ok(memory)
            },
        );
        let memory = match bound {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view = match create_image_view(device, image, desc.view_type, desc.format, desc.aspect, desc.mip_levels) {
            Ok(view) => view,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        ctx.live_objects().created(ObjectKind::Image);
        ctx.live_objects().created(ObjectKind::ImageView);
        log::debug!(
            "Created {:?} image {}x{} {:?} with {} mip levels",
            desc.image_type,
            desc.extent.width,
            desc.extent.height,
            desc.format,
            desc.mip_levels
        );

        Ok(Self {
            ctx,
            image,
            view,
            desc,
            memory,
        })
    }

    /// Transition every mip level between layouts and wait for completion
    pub fn transition_layout(&self, old: vk::ImageLayout, new: vk::ImageLayout) -> VulkanResult<()> {
        run_one_shot(self.ctx, |device, command_buffer| {
            cmd_transition_layout(
                device,
                command_buffer,
                self.image,
                self.desc.aspect,
                old,
                new,
                0..self.desc.mip_levels,
            )
        })
    }

    /// Raw image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// View covering every mip level
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Pixel format
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    /// Image dimensions
    pub fn extent(&self) -> vk::Extent3D {
        self.desc.extent
    }

    /// Number of mip levels
    pub fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }

    /// Creation parameters
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    /// Size of the backing allocation in bytes
    pub fn allocation_size(&self) -> vk::DeviceSize {
        self.memory.size()
    }
}

impl Drop for Image<'_> {
    fn drop(&mut self) {
        let device = self.ctx.device();
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
        }
        self.ctx.live_objects().destroyed(ObjectKind::ImageView);
        self.ctx.live_objects().destroyed(ObjectKind::Image);
    }
}

/// Create a view over `mip_levels` levels of `image`
pub fn create_image_view(
    device: &Device,
    image: vk::Image,
    view_type: vk::ImageViewType,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    mip_levels: u32,
) -> VulkanResult<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(view_type)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&view_info, None) }.vk_check()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspect_for_format() {
        assert_eq!(aspect_for_format(vk::Format::R8G8B8A8_SRGB), vk::ImageAspectFlags::COLOR);
        assert_eq!(aspect_for_format(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_for_format(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_for_format(vk::Format::S8_UINT), vk::ImageAspectFlags::STENCIL);
    }

    #[test]
    fn test_image_desc_1d_is_flat() {
        let desc = ImageDesc::new_1d(256, vk::Format::R8G8B8A8_UNORM, 9, vk::ImageUsageFlags::SAMPLED);
        assert_eq!(desc.image_type, vk::ImageType::TYPE_1D);
        assert_eq!(desc.view_type, vk::ImageViewType::TYPE_1D);
        assert_eq!((desc.extent.width, desc.extent.height, desc.extent.depth), (256, 1, 1));
        assert_eq!(desc.mip_levels, 9);
    }

    #[test]
    fn test_upload_transitions_are_supported() {
        use vk::ImageLayout as L;
        let upload = transition_masks(L::UNDEFINED, L::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(upload.src_access, vk::AccessFlags::empty());
        assert_eq!(upload.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(upload.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);

        let finish = transition_masks(L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(finish.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(finish.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(finish.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_mip_chain_transitions_chain_together() {
        use vk::ImageLayout as L;
        let to_src = transition_masks(L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL).unwrap();
        let to_read = transition_masks(L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(to_src.dst_access, to_read.src_access);
        assert_eq!(to_src.dst_stage, to_read.src_stage);
    }

    #[test]
    fn test_unknown_transition_is_rejected() {
        assert!(transition_masks(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR
        )
        .is_none());
    }
}
