//! Render pass and framebuffer management
//!
//! Render passes here always have one graphics subpass writing every colour
//! attachment plus an optional depth/stencil attachment placed last.

use ash::vk;

use super::context::DeviceContext;
use super::error::{VkResultExt, VulkanError, VulkanResult};
use super::image::has_stencil_component;
use super::live_objects::ObjectKind;

/// One attachment slot of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentSpec {
    /// Pixel format
    pub format: vk::Format,
    /// What happens to existing contents at the start of the pass
    pub load_op: vk::AttachmentLoadOp,
    /// Whether contents survive the pass
    pub store_op: vk::AttachmentStoreOp,
    /// Layout the attachment is left in
    pub final_layout: vk::ImageLayout,
}

impl AttachmentSpec {
    /// Cleared colour target handed to the presentation engine afterwards
    pub fn present(format: vk::Format) -> Self {
        Self {
            format,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    /// Cleared colour target sampled by a later pass
    pub fn sampled_color(format: vk::Format) -> Self {
        Self {
            final_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ..Self::present(format)
        }
    }

    /// Cleared depth target; stored and left readable when `sampled`
    pub fn depth(format: vk::Format, sampled: bool) -> Self {
        Self {
            format,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: if sampled {
                vk::AttachmentStoreOp::STORE
            } else {
                vk::AttachmentStoreOp::DONT_CARE
            },
            final_layout: if sampled {
                vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
            } else {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            },
        }
    }

    fn description(&self, stencil: bool) -> vk::AttachmentDescription {
        let (stencil_load, stencil_store) = if stencil {
            (self.load_op, self.store_op)
        } else {
            (vk::AttachmentLoadOp::DONT_CARE, vk::AttachmentStoreOp::DONT_CARE)
        };
        vk::AttachmentDescription::builder()
            .format(self.format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .stencil_load_op(stencil_load)
            .stencil_store_op(stencil_store)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(self.final_layout)
            .build()
    }
}

/// Attachment descriptions and subpass references for a single-subpass pass
#[derive(Debug, Clone)]
pub struct SubpassLayout {
    /// Colour attachments first, then depth
    pub attachments: Vec<vk::AttachmentDescription>,
    /// References to the colour attachments
    pub color_refs: Vec<vk::AttachmentReference>,
    /// Reference to the depth attachment, if any
    pub depth_ref: Option<vk::AttachmentReference>,
}

/// Lay out `colors` followed by `depth`
pub fn single_subpass_layout(colors: &[AttachmentSpec], depth: Option<&AttachmentSpec>) -> SubpassLayout {
    let mut attachments: Vec<_> = colors.iter().map(|color| color.description(false)).collect();
    let color_refs = (0..colors.len() as u32)
        .map(|attachment| vk::AttachmentReference {
            attachment,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        })
        .collect();

    let depth_ref = depth.map(|spec| {
        attachments.push(spec.description(has_stencil_component(spec.format)));
        vk::AttachmentReference {
            attachment: colors.len() as u32,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    });

    SubpassLayout {
        attachments,
        color_refs,
        depth_ref,
    }
}

/// Dependency ordering earlier submissions against this pass's attachment writes
///
/// With a depth attachment the source scope includes the late fragment tests
/// and their depth writes, so a pass that clears the shared depth image waits
/// for the previous frame's depth writes to finish.
fn external_dependency(has_depth: bool) -> vk::SubpassDependency {
    let mut src_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    let mut dst_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    let mut src_access = vk::AccessFlags::empty();
    let mut dst_access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    if has_depth {
        src_stages |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        dst_stages |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        src_access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        dst_access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }

    vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(src_stages)
        .src_access_mask(src_access)
        .dst_stage_mask(dst_stages)
        .dst_access_mask(dst_access)
        .build()
}

/// Render pass wrapper with RAII cleanup
pub struct RenderPass<'ctx> {
    ctx: &'ctx DeviceContext,
    render_pass: vk::RenderPass,
    color_count: usize,
    has_depth: bool,
}

impl<'ctx> RenderPass<'ctx> {
    /// Build a pass with one graphics subpass
    pub fn single_subpass(
        ctx: &'ctx DeviceContext,
        colors: &[AttachmentSpec],
        depth: Option<AttachmentSpec>,
    ) -> VulkanResult<Self> {
        if colors.is_empty() && depth.is_none() {
            return Err(VulkanError::precondition("A render pass needs at least one attachment"));
        }

        let layout = single_subpass_layout(colors, depth.as_ref());
        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&layout.color_refs);
        if let Some(depth_ref) = layout.depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }
        let subpasses = [subpass.build()];

        let dependencies = [external_dependency(layout.depth_ref.is_some())];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&layout.attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { ctx.device().create_render_pass(&create_info, None) }.vk_check()?;

        Ok(Self {
            ctx,
            render_pass,
            color_count: colors.len(),
            has_depth: depth.is_some(),
        })
    }

    /// Raw render pass handle
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Number of colour attachments
    pub fn color_attachment_count(&self) -> usize {
        self.color_count
    }

    /// Whether the pass has a depth/stencil attachment
    pub fn has_depth(&self) -> bool {
        self.has_depth
    }
}

impl Drop for RenderPass<'_> {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_render_pass(self.render_pass, None) };
    }
}

/// Framebuffer wrapper with RAII cleanup
pub struct Framebuffer<'ctx> {
    ctx: &'ctx DeviceContext,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl<'ctx> Framebuffer<'ctx> {
    /// Create a framebuffer binding `attachments` in render-pass order
    pub fn new(
        ctx: &'ctx DeviceContext,
        render_pass: &RenderPass<'_>,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let expected = render_pass.color_attachment_count() + usize::from(render_pass.has_depth());
        if attachments.len() != expected {
            return Err(VulkanError::invalid(format!(
                "Render pass expects {expected} attachments, got {}",
                attachments.len()
            )));
        }

        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass.handle())
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { ctx.device().create_framebuffer(&create_info, None) }.vk_check()?;
        ctx.live_objects().created(ObjectKind::Framebuffer);

        Ok(Self {
            ctx,
            framebuffer,
            extent,
        })
    }

    /// Raw framebuffer handle
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    /// Framebuffer size
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer<'_> {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_framebuffer(self.framebuffer, None) };
        self.ctx.live_objects().destroyed(ObjectKind::Framebuffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_attachment_follows_colors() {
        let colors = [
            AttachmentSpec::sampled_color(vk::Format::R16G16B16A16_SFLOAT),
            AttachmentSpec::sampled_color(vk::Format::R8G8B8A8_UNORM),
        ];
        let depth = AttachmentSpec::depth(vk::Format::D32_SFLOAT, false);
        let layout = single_subpass_layout(&colors, Some(&depth));

        assert_eq!(layout.attachments.len(), 3);
        assert_eq!(layout.color_refs.iter().map(|r| r.attachment).collect::<Vec<_>>(), vec![0, 1]);
        let depth_ref = layout.depth_ref.unwrap();
        assert_eq!(depth_ref.attachment, 2);
        assert_eq!(depth_ref.layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(layout.attachments[2].format, vk::Format::D32_SFLOAT);
    }

    #[test]
    fn test_depth_pass_waits_for_previous_depth_writes() {
        let dependency = external_dependency(true);
        assert_eq!(dependency.src_subpass, vk::SUBPASS_EXTERNAL);
        assert!(dependency.src_stage_mask.contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS));
        assert!(dependency.src_access_mask.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert!(dependency.dst_stage_mask.contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
        assert!(dependency.dst_access_mask.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn test_color_only_dependency() {
        let dependency = external_dependency(false);
        assert_eq!(dependency.src_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert!(dependency.src_access_mask.is_empty());
        assert_eq!(dependency.dst_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn test_present_pass_without_depth() {
        let layout = single_subpass_layout(&[AttachmentSpec::present(vk::Format::B8G8R8A8_SRGB)], None);
        assert_eq!(layout.attachments.len(), 1);
        assert!(layout.depth_ref.is_none());
        assert_eq!(layout.attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(layout.attachments[0].load_op, vk::AttachmentLoadOp::CLEAR);
    }

    #[test]
    fn test_stencil_ops_only_for_stencil_formats() {
        let depth_only = single_subpass_layout(&[], Some(&AttachmentSpec::depth(vk::Format::D32_SFLOAT, true)));
        assert_eq!(depth_only.attachments[0].stencil_load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(depth_only.attachments[0].store_op, vk::AttachmentStoreOp::STORE);

        let stencil = single_subpass_layout(
            &[],
            Some(&AttachmentSpec::depth(vk::Format::D24_UNORM_S8_UINT, false)),
        );
        assert_eq!(stencil.attachments[0].stencil_load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(stencil.depth_ref.unwrap().attachment, 0);
    }
}
