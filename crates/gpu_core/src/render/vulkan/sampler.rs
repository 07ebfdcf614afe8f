//! Texture samplers

use ash::vk;

use super::context::DeviceContext;
use super::error::{VkResultExt, VulkanResult};
use super::live_objects::ObjectKind;

/// Named sampler parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerConfig {
    /// Magnification filter
    pub mag_filter: vk::Filter,
    /// Minification filter
    pub min_filter: vk::Filter,
    /// Filtering between mip levels
    pub mipmap_mode: vk::SamplerMipmapMode,
    /// Addressing along U
    pub address_mode_u: vk::SamplerAddressMode,
    /// Addressing along V
    pub address_mode_v: vk::SamplerAddressMode,
    /// Addressing along W
    pub address_mode_w: vk::SamplerAddressMode,
    /// Colour outside the image for border addressing
    pub border_color: vk::BorderColor,
    /// Requested anisotropy; `None` disables it. Clamped to the device limit.
    pub max_anisotropy: Option<f32>,
    /// Lowest mip level sampled
    pub min_lod: f32,
    /// Highest mip level sampled
    pub max_lod: f32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            border_color: vk::BorderColor::INT_OPAQUE_BLACK,
            max_anisotropy: Some(16.0),
            min_lod: 0.0,
            max_lod: vk::LOD_CLAMP_NONE,
        }
    }
}

impl SamplerConfig {
    /// Nearest-neighbour sampling clamped to the edge, no mipmaps
    pub fn nearest_clamped() -> Self {
        Self {
            mag_filter: vk::Filter::NEAREST,
            min_filter: vk::Filter::NEAREST,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            max_anisotropy: None,
            max_lod: 0.0,
            ..Self::default()
        }
    }

    /// Sampler for reading depth attachments
    ///
    /// Comparison is left disabled, so depth reads return raw depth values rather
    /// than shadow-test results.
    pub fn depth() -> Self {
        Self {
            address_mode_u: vk::SamplerAddressMode::CLAMP_TO_BORDER,
            address_mode_v: vk::SamplerAddressMode::CLAMP_TO_BORDER,
            address_mode_w: vk::SamplerAddressMode::CLAMP_TO_BORDER,
            border_color: vk::BorderColor::FLOAT_OPAQUE_WHITE,
            max_anisotropy: None,
            max_lod: 0.0,
            ..Self::default()
        }
    }

    /// Anisotropy actually applied given the device limit
    pub fn effective_anisotropy(&self, device_limit: f32) -> Option<f32> {
        self.max_anisotropy
            .map(|requested| requested.clamp(1.0, device_limit.max(1.0)))
    }

    fn create_info(&self, device_limit: f32) -> vk::SamplerCreateInfo {
        let anisotropy = self.effective_anisotropy(device_limit);
        vk::SamplerCreateInfo::builder()
            .mag_filter(self.mag_filter)
            .min_filter(self.min_filter)
            .mipmap_mode(self.mipmap_mode)
            .address_mode_u(self.address_mode_u)
            .address_mode_v(self.address_mode_v)
            .address_mode_w(self.address_mode_w)
            .border_color(self.border_color)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(self.min_lod)
            .max_lod(self.max_lod)
            .mip_lod_bias(0.0)
            .unnormalized_coordinates(false)
            .build()
    }
}

/// RAII sampler
pub struct Sampler<'ctx> {
    ctx: &'ctx DeviceContext,
    sampler: vk::Sampler,
}

impl<'ctx> Sampler<'ctx> {
    /// Create a sampler from `config`
    pub fn new(ctx: &'ctx DeviceContext, config: &SamplerConfig) -> VulkanResult<Self> {
        let create_info = config.create_info(ctx.max_sampler_anisotropy());
        let sampler = unsafe { ctx.device().create_sampler(&create_info, None) }.vk_check()?;
        ctx.live_objects().created(ObjectKind::Sampler);
        Ok(Self { ctx, sampler })
    }

    /// Raw sampler handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler<'_> {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_sampler(self.sampler, None) };
        self.ctx.live_objects().destroyed(ObjectKind::Sampler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anisotropy_is_clamped_to_device_limit() {
        let config = SamplerConfig::default();
        assert_eq!(config.effective_anisotropy(8.0), Some(8.0));
        assert_eq!(config.effective_anisotropy(16.0), Some(16.0));
        assert_eq!(SamplerConfig::nearest_clamped().effective_anisotropy(16.0), None);
    }

    #[test]
    fn test_depth_sampler_disables_comparison() {
        let info = SamplerConfig::depth().create_info(16.0);
        assert_eq!(info.compare_enable, vk::FALSE);
        assert_eq!(info.anisotropy_enable, vk::FALSE);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::CLAMP_TO_BORDER);
    }

    #[test]
    fn test_create_info_copies_named_fields() {
        let config = SamplerConfig {
            address_mode_v: vk::SamplerAddressMode::MIRRORED_REPEAT,
            border_color: vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
            ..SamplerConfig::nearest_clamped()
        };
        let info = config.create_info(4.0);
        assert_eq!(info.mag_filter, vk::Filter::NEAREST);
        assert_eq!(info.address_mode_v, vk::SamplerAddressMode::MIRRORED_REPEAT);
        assert_eq!(info.border_color, vk::BorderColor::FLOAT_TRANSPARENT_BLACK);
        assert_eq!(info.max_lod, 0.0);
    }
}
