//! Offscreen render targets
//!
//! An [`Attachment`] is a single-mip image that one pass renders into and a
//! later pass samples. It owns the sampler matching its role. Depth samplers
//! keep comparison disabled, so shadow-map style hardware depth tests are not
//! available through them.

use ash::vk;

use super::context::DeviceContext;
use super::error::{VulkanError, VulkanResult};
use super::image::{Image, ImageDesc};
use super::render_pass::{AttachmentSpec, Framebuffer, RenderPass};
use super::sampler::{Sampler, SamplerConfig};

/// Depth formats in order of preference
pub const DEPTH_FORMATS: [vk::Format; 4] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

/// Combined depth/stencil formats in order of preference
pub const DEPTH_STENCIL_FORMATS: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
];

/// Candidate formats for a depth and/or stencil request; empty when neither is wanted
pub fn depth_format_candidates(depth: bool, stencil: bool) -> &'static [vk::Format] {
    match (depth, stencil) {
        (_, true) => &DEPTH_STENCIL_FORMATS,
        (true, false) => &DEPTH_FORMATS,
        (false, false) => &[],
    }
}

/// What an attachment stores
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    /// Colour data
    Color,
    /// Depth (and possibly stencil) data
    Depth,
}

impl AttachmentKind {
    fn usage(self) -> vk::ImageUsageFlags {
        match self {
            Self::Color => vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            Self::Depth => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        }
    }

    fn sampler_config(self) -> SamplerConfig {
        match self {
            Self::Color => SamplerConfig {
                address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
                address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
                address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
                max_anisotropy: None,
                max_lod: 0.0,
                ..SamplerConfig::default()
            },
            Self::Depth => SamplerConfig::depth(),
        }
    }

    /// Layout the attachment is sampled in after its pass
    pub fn read_layout(self) -> vk::ImageLayout {
        match self {
            Self::Color => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Self::Depth => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        }
    }
}

/// Render target that is sampled afterwards
pub struct Attachment<'ctx> {
    ctx: &'ctx DeviceContext,
    kind: AttachmentKind,
    sampler: Sampler<'ctx>,
    image: Image<'ctx>,
}

impl<'ctx> Attachment<'ctx> {
    /// Create a `width` x `height` attachment of `format`
    pub fn new(
        ctx: &'ctx DeviceContext,
        kind: AttachmentKind,
        width: u32,
        height: u32,
        format: vk::Format,
    ) -> VulkanResult<Self> {
        let image = Image::new(ctx, ImageDesc::new_2d(width, height, format, 1, kind.usage()))?;
        let sampler = Sampler::new(ctx, &kind.sampler_config())?;
        Ok(Self {
            ctx,
            kind,
            sampler,
            image,
        })
    }

    /// Colour attachment
    pub fn color(ctx: &'ctx DeviceContext, width: u32, height: u32, format: vk::Format) -> VulkanResult<Self> {
        Self::new(ctx, AttachmentKind::Color, width, height, format)
    }

    /// Depth attachment
    pub fn depth(ctx: &'ctx DeviceContext, width: u32, height: u32, format: vk::Format) -> VulkanResult<Self> {
        Self::new(ctx, AttachmentKind::Depth, width, height, format)
    }

    /// How this attachment is declared in a render pass
    pub fn spec(&self) -> AttachmentSpec {
        match self.kind {
            AttachmentKind::Color => AttachmentSpec::sampled_color(self.image.format()),
            AttachmentKind::Depth => AttachmentSpec::depth(self.image.format(), true),
        }
    }

    /// Framebuffer rendering into just this attachment
    pub fn framebuffer(&self, render_pass: &RenderPass<'_>) -> VulkanResult<Framebuffer<'ctx>> {
        Self::framebuffer_for(self.ctx, render_pass, &[self])
    }

    /// Framebuffer over several attachments of identical size, in render-pass order
    pub fn framebuffer_for(
        ctx: &'ctx DeviceContext,
        render_pass: &RenderPass<'_>,
        attachments: &[&Attachment<'_>],
    ) -> VulkanResult<Framebuffer<'ctx>> {
        let first = attachments
            .first()
            .ok_or_else(|| VulkanError::invalid("Framebuffer needs at least one attachment"))?;
        let extent = first.extent();
        if attachments.iter().any(|attachment| attachment.extent() != extent) {
            return Err(VulkanError::invalid("Framebuffer attachments differ in size"));
        }
        let views: Vec<vk::ImageView> = attachments.iter().map(|attachment| attachment.view()).collect();
        Framebuffer::new(ctx, render_pass, &views, extent)
    }

    /// Descriptor for sampling this attachment with its own sampler
    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler.handle(),
            image_view: self.image.view(),
            image_layout: self.kind.read_layout(),
        }
    }

    /// Attachment kind
    pub fn kind(&self) -> AttachmentKind {
        self.kind
    }

    /// Image view
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    /// Pixel format
    pub fn format(&self) -> vk::Format {
        self.image.format()
    }

    /// Size in pixels
    pub fn extent(&self) -> vk::Extent2D {
        let extent = self.image.extent();
        vk::Extent2D {
            width: extent.width,
            height: extent.height,
        }
    }

    /// Sampler owned by this attachment
    pub fn sampler(&self) -> &Sampler<'ctx> {
        &self.sampler
    }
}

/// Sampled depth target with a device-chosen format
pub struct DepthBuffer<'ctx> {
    attachment: Attachment<'ctx>,
}

impl<'ctx> DepthBuffer<'ctx> {
    /// Create a depth buffer, choosing the first supported format from the candidates
    pub fn new(ctx: &'ctx DeviceContext, width: u32, height: u32, stencil: bool) -> VulkanResult<Self> {
        let format = ctx.require_format(
            depth_format_candidates(true, stencil),
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT | vk::FormatFeatureFlags::SAMPLED_IMAGE,
        )?;
        log::debug!("Depth buffer {width}x{height} using {format:?}");
        Ok(Self {
            attachment: Attachment::depth(ctx, width, height, format)?,
        })
    }

    /// How the depth buffer is declared in a render pass
    pub fn spec(&self) -> AttachmentSpec {
        self.attachment.spec()
    }

    /// Framebuffer rendering depth only
    pub fn framebuffer(&self, render_pass: &RenderPass<'_>) -> VulkanResult<Framebuffer<'ctx>> {
        self.attachment.framebuffer(render_pass)
    }

    /// Descriptor for sampling raw depth values
    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        self.attachment.descriptor_info()
    }

    /// Underlying attachment
    pub fn attachment(&self) -> &Attachment<'ctx> {
        &self.attachment
    }

    /// Chosen depth format
    pub fn format(&self) -> vk::Format {
        self.attachment.format()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::image::{has_stencil_component, is_depth_format};

    #[test]
    fn test_depth_candidates() {
        assert!(depth_format_candidates(false, false).is_empty());
        assert_eq!(depth_format_candidates(true, false)[0], vk::Format::D32_SFLOAT);
        assert!(depth_format_candidates(true, true)
            .iter()
            .all(|&f| is_depth_format(f) && has_stencil_component(f)));
        assert_eq!(depth_format_candidates(false, true), depth_format_candidates(true, true));
        assert!(DEPTH_FORMATS.iter().all(|&f| is_depth_format(f)));
    }

    #[test]
    fn test_kind_usage_and_layouts() {
        assert!(AttachmentKind::Color.usage().contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert!(AttachmentKind::Depth.usage().contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
        assert!(AttachmentKind::Depth.usage().contains(vk::ImageUsageFlags::SAMPLED));
        assert_eq!(
            AttachmentKind::Depth.read_layout(),
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn test_depth_sampler_role() {
        let config = AttachmentKind::Depth.sampler_config();
        assert_eq!(config, SamplerConfig::depth());
        assert_eq!(config.max_anisotropy, None);
    }
}
