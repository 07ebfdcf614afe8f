//! Sampled textures with optional GPU-generated mip chains
//!
//! Pixels reach device-local memory through a transient staging buffer and a
//! blocking one-shot submission. When mipmaps are requested, level 0 is
//! uploaded and every further level is produced by a linear blit from the one
//! above it. Mipmapped textures must have power-of-two dimensions and a format
//! the device can blit with linear filtering; both are checked before any GPU
//! work is recorded.
//!
//! The sampler used to read a texture belongs to the caller, so one sampler can
//! serve many textures.

use ash::{vk, Device};
use std::marker::PhantomData;
use std::path::Path;

use super::buffer::{Buffer, BufferUsage};
use super::commands::run_one_shot;
use super::context::{format_satisfies, DeviceContext};
use super::error::{VulkanError, VulkanResult};
use super::image::{cmd_copy_buffer_to_image, cmd_transition_layout, Image, ImageDesc};
use super::pixels::PixelData;
use super::sampler::Sampler;

/// Whether `n` is a non-zero power of two
pub fn is_pow2(n: u32) -> bool {
    n.is_power_of_two()
}

/// `floor(log2(max(width, height))) + 1`
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    let largest = width.max(height);
    if largest == 0 {
        return 0;
    }
    u32::BITS - largest.leading_zeros()
}

/// Extent of every level in a chain of `levels`, each axis halving down to 1
pub fn mip_extents(width: u32, height: u32, levels: u32) -> Vec<(u32, u32)> {
    let mut extents = Vec::with_capacity(levels as usize);
    let (mut w, mut h) = (width, height);
    for _ in 0..levels {
        extents.push((w, h));
        w = (w >> 1).max(1);
        h = (h >> 1).max(1);
    }
    extents
}

/// Number of mip levels to create, failing for non-power-of-two mip chains
#[track_caller]
pub fn plan_mip_levels(width: u32, height: u32, mipmaps: bool) -> VulkanResult<u32> {
    if !mipmaps {
        return Ok(1);
    }
    if !is_pow2(width) || !is_pow2(height) {
        return Err(VulkanError::precondition(format!(
            "Mipmaps need power-of-two dimensions, got {width}x{height}"
        )));
    }
    Ok(mip_level_count(width, height))
}

/// Format features a mipmapped texture needs for its blits
pub const MIP_BLIT_FEATURES: vk::FormatFeatureFlags = vk::FormatFeatureFlags::from_raw(
    vk::FormatFeatureFlags::BLIT_SRC.as_raw()
        | vk::FormatFeatureFlags::BLIT_DST.as_raw()
        | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR.as_raw(),
);

/// Image dimensionality of a texture
pub trait TextureDimension {
    /// Vulkan image type
    const IMAGE_TYPE: vk::ImageType;
    /// Vulkan view type
    const VIEW_TYPE: vk::ImageViewType;
    /// Whether the pixel height must be exactly one row
    const SINGLE_ROW: bool;
}

/// One-dimensional textures
pub struct Dim1;

/// Two-dimensional textures
pub struct Dim2;

impl TextureDimension for Dim1 {
    const IMAGE_TYPE: vk::ImageType = vk::ImageType::TYPE_1D;
    const VIEW_TYPE: vk::ImageViewType = vk::ImageViewType::TYPE_1D;
    const SINGLE_ROW: bool = true;
}

impl TextureDimension for Dim2 {
    const IMAGE_TYPE: vk::ImageType = vk::ImageType::TYPE_2D;
    const VIEW_TYPE: vk::ImageViewType = vk::ImageViewType::TYPE_2D;
    const SINGLE_ROW: bool = false;
}

/// How a texture is built from its pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureOptions {
    /// Generate a full mip chain
    pub mipmaps: bool,
    /// Interpret 8-bit colour as sRGB
    pub srgb: bool,
}

impl Default for TextureOptions {
    fn default() -> Self {
        Self {
            mipmaps: false,
            srgb: true,
        }
    }
}

/// Sampled texture in shader-read-only layout
pub struct Texture<'ctx, D: TextureDimension> {
    image: Image<'ctx>,
    _dimension: PhantomData<D>,
}

/// 1D texture
pub type Texture1D<'ctx> = Texture<'ctx, Dim1>;

/// 2D texture
pub type Texture2D<'ctx> = Texture<'ctx, Dim2>;

impl<'ctx, D: TextureDimension> Texture<'ctx, D> {
    /// Upload `pixels` into a new device-local texture
    pub fn new(ctx: &'ctx DeviceContext, pixels: &PixelData, options: TextureOptions) -> VulkanResult<Self> {
        let (width, height) = (pixels.width(), pixels.height());
        if D::SINGLE_ROW && height != 1 {
            return Err(VulkanError::precondition(format!(
                "1D textures need a single row of pixels, got {width}x{height}"
            )));
        }

        let format = pixels.format(options.srgb);
        let mip_levels = plan_mip_levels(width, height, options.mipmaps)?;
        if mip_levels > 1 {
            let properties = ctx.format_properties(format);
            if !format_satisfies(&properties, vk::ImageTiling::OPTIMAL, MIP_BLIT_FEATURES) {
                return Err(VulkanError::precondition(format!(
                    "{format:?} does not support linear-filtered blits for mipmap generation"
                )));
            }
        }

        let mut usage = vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED;
        if mip_levels > 1 {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        let desc = ImageDesc {
            image_type: D::IMAGE_TYPE,
            view_type: D::VIEW_TYPE,
            ..ImageDesc::new_2d(width, height, format, mip_levels, usage)
        };
        let image = Image::new(ctx, desc)?;

        let staging = Buffer::with_data(ctx, BufferUsage::Staging, pixels.bytes())?;
        run_one_shot(ctx, |device, command_buffer| {
            cmd_transition_layout(
                device,
                command_buffer,
                image.handle(),
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                0..mip_levels,
            )?;
            cmd_copy_buffer_to_image(device, command_buffer, staging.handle(), image.handle(), image.extent());
            if mip_levels > 1 {
                cmd_generate_mipmaps(device, command_buffer, image.handle(), width, height, mip_levels)
            } else {
                cmd_transition_layout(
                    device,
                    command_buffer,
                    image.handle(),
                    vk::ImageAspectFlags::COLOR,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    0..1,
                )
            }
        })?;
        drop(staging);

        log::debug!("Uploaded {width}x{height} {format:?} texture with {mip_levels} mip levels");

        Ok(Self {
            image,
            _dimension: PhantomData,
        })
    }

    /// Decode a PNG file and upload it
    pub fn from_png(ctx: &'ctx DeviceContext, path: impl AsRef<Path>, options: TextureOptions) -> VulkanResult<Self> {
        let pixels = PixelData::load_png(path)?;
        Self::new(ctx, &pixels, options)
    }

    /// Descriptor for sampling this texture with `sampler`
    pub fn descriptor_info(&self, sampler: &Sampler<'_>) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: sampler.handle(),
            image_view: self.image.view(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    /// Underlying image
    pub fn image(&self) -> &Image<'ctx> {
        &self.image
    }

    /// View over every mip level
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    /// Pixel format
    pub fn format(&self) -> vk::Format {
        self.image.format()
    }

    /// Number of mip levels
    pub fn mip_levels(&self) -> u32 {
        self.image.mip_levels()
    }

    /// Width and height of level 0
    pub fn size(&self) -> (u32, u32) {
        let extent = self.image.extent();
        (extent.width, extent.height)
    }
}

/// Record blits producing levels `1..levels` from level 0
///
/// Every level must be in `TRANSFER_DST_OPTIMAL`; all levels end in `SHADER_READ_ONLY_OPTIMAL`.
fn cmd_generate_mipmaps(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    width: u32,
    height: u32,
    levels: u32,
) -> VulkanResult<()> {
    let color = vk::ImageAspectFlags::COLOR;
    let extents = mip_extents(width, height, levels);

    for (level, pair) in (1..levels).zip(extents.windows(2)) {
        let (src, dst) = (pair[0], pair[1]);
        cmd_transition_layout(
            device,
            command_buffer,
            image,
            color,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            level - 1..level,
        )?;

        let blit = vk::ImageBlit::builder()
            .src_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: src.0 as i32,
                    y: src.1 as i32,
                    z: 1,
                },
            ])
            .src_subresource(vk::ImageSubresourceLayers {
                aspect_mask: color,
                mip_level: level - 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .dst_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: dst.0 as i32,
                    y: dst.1 as i32,
                    z: 1,
                },
            ])
            .dst_subresource(vk::ImageSubresourceLayers {
                aspect_mask: color,
                mip_level: level,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe {
            device.cmd_blit_image(
                command_buffer,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit.build()],
                vk::Filter::LINEAR,
            );
        }

        cmd_transition_layout(
            device,
            command_buffer,
            image,
            color,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            level - 1..level,
        )?;
    }

    // The last level was only ever written to
    cmd_transition_layout(
        device,
        command_buffer,
        image,
        color,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        levels - 1..levels,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::error::ErrorKind;

    #[test]
    fn test_mip_level_count_matches_log2() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(2, 1), 2);
        assert_eq!(mip_level_count(256, 256), 9);
        assert_eq!(mip_level_count(1024, 16), 11);
        for shift in 0..16 {
            let size = 1u32 << shift;
            let expected = (f64::from(size)).log2().floor() as u32 + 1;
            assert_eq!(mip_level_count(size, 1), expected);
            assert_eq!(mip_level_count(1, size), expected);
        }
    }

    #[test]
    fn test_is_pow2() {
        assert!(is_pow2(1));
        assert!(is_pow2(512));
        assert!(!is_pow2(0));
        assert!(!is_pow2(3));
        assert!(!is_pow2(640));
    }

    #[test]
    fn test_mip_extents_halve_to_one() {
        assert_eq!(
            mip_extents(8, 2, 4),
            vec![(8, 2), (4, 1), (2, 1), (1, 1)]
        );
        let extents = mip_extents(256, 256, mip_level_count(256, 256));
        assert_eq!(extents.first(), Some(&(256, 256)));
        assert_eq!(extents.last(), Some(&(1, 1)));
    }

    #[test]
    fn test_plan_mip_levels() {
        assert_eq!(plan_mip_levels(640, 480, false).unwrap(), 1);
        assert_eq!(plan_mip_levels(64, 16, true).unwrap(), 7);

        let error = plan_mip_levels(64, 48, true).unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::Precondition(_)));
        assert!(plan_mip_levels(48, 64, true).is_err());
    }

    #[test]
    fn test_mip_blit_features_require_linear_filter() {
        assert!(MIP_BLIT_FEATURES.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR));
        let nearest_only = vk::FormatProperties {
            optimal_tiling_features: vk::FormatFeatureFlags::BLIT_SRC | vk::FormatFeatureFlags::BLIT_DST,
            ..Default::default()
        };
        assert!(!format_satisfies(&nearest_only, vk::ImageTiling::OPTIMAL, MIP_BLIT_FEATURES));
    }

    #[test]
    fn test_dimension_constants() {
        assert_eq!(Dim1::IMAGE_TYPE, vk::ImageType::TYPE_1D);
        assert_eq!(Dim2::VIEW_TYPE, vk::ImageViewType::TYPE_2D);
        assert!(Dim1::SINGLE_ROW);
        assert!(!Dim2::SINGLE_ROW);
    }
}
