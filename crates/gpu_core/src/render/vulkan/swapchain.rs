//! Swapchain management
//!
//! Selection policy (surface format, present mode, extent, image count) lives
//! in free functions so it can be exercised without a surface. The swapchain
//! owns one view per image and at most one depth/stencil image shared by all
//! of them. The depth image is written by every frame slot. Frame slots do not
//! wait on each other's fences, so the render pass's external subpass
//! dependency orders each pass's depth clear after the late fragment tests of
//! earlier submissions on the same queue. One depth image per swapchain stays
//! the policy; per-slot depth images would remove that serialisation.

use ash::vk;

use super::attachment::depth_format_candidates;
use super::context::DeviceContext;
use super::error::{VkResultExt, VulkanError, VulkanResult};
use super::image::{create_image_view, Image, ImageDesc};
use super::live_objects::ObjectKind;
use super::render_pass::{AttachmentSpec, Framebuffer, RenderPass};

/// Prefer BGRA8 sRGB with a non-linear sRGB colour space, else the first format offered
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
}

/// Present modes in order of preference for a number of frames in flight
///
/// One frame in flight favours latency; two balance latency and tearing; three
/// or more favour smooth, vsynced pacing.
pub fn present_mode_preference(frames_in_flight: usize) -> &'static [vk::PresentModeKHR] {
    use vk::PresentModeKHR as P;
    match frames_in_flight {
        0 | 1 => &[P::IMMEDIATE, P::MAILBOX, P::FIFO],
        2 => &[P::MAILBOX, P::FIFO_RELAXED, P::FIFO],
        _ => &[P::FIFO, P::MAILBOX, P::FIFO_RELAXED],
    }
}

/// First preferred mode the surface supports; FIFO is always available
pub fn choose_present_mode(available: &[vk::PresentModeKHR], frames_in_flight: usize) -> vk::PresentModeKHR {
    present_mode_preference(frames_in_flight)
        .iter()
        .copied()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Surface-defined extent, or the framebuffer size clamped to the surface limits
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer_size: (u32, u32)) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: framebuffer_size
            .0
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: framebuffer_size
            .1
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum, clamped to the maximum when the surface has one
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

/// Attachments per swapchain framebuffer: colour plus an optional depth/stencil
pub fn num_attachments(depth: bool, stencil: bool) -> usize {
    1 + usize::from(depth || stencil)
}

/// Swapchain creation parameters, kept across reshapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainConfig {
    /// Frames in flight; steers present-mode choice
    pub frames_in_flight: usize,
    /// Request a depth buffer
    pub depth: bool,
    /// Request a stencil buffer
    pub stencil: bool,
}

/// Window swapchain with image views and an optional shared depth/stencil image
pub struct Swapchain<'ctx> {
    ctx: &'ctx DeviceContext,
    config: SwapchainConfig,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    depth_stencil: Option<Image<'ctx>>,
    framebuffers: Vec<Framebuffer<'ctx>>,
}

impl<'ctx> Swapchain<'ctx> {
    /// Create a swapchain for the context's surface
    pub fn new(ctx: &'ctx DeviceContext, framebuffer_size: (u32, u32), config: SwapchainConfig) -> VulkanResult<Self> {
        let mut swapchain = Self {
            ctx,
            config,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            views: Vec::new(),
            surface_format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            depth_stencil: None,
            framebuffers: Vec::new(),
        };
        // On failure `Drop` releases whatever was created
        swapchain.create_resources(framebuffer_size)?;
        Ok(swapchain)
    }

    fn create_resources(&mut self, framebuffer_size: (u32, u32)) -> VulkanResult<()> {
        let ctx = self.ctx;
        let device = ctx.device();
        let physical_device = ctx.physical_device().device;
        let surface = ctx.surface();
        let surface_loader = ctx.surface_loader();

        let (caps, formats, present_modes) = unsafe {
            (
                surface_loader
                    .get_physical_device_surface_capabilities(physical_device, surface)
                    .vk_check()?,
                surface_loader
                    .get_physical_device_surface_formats(physical_device, surface)
                    .vk_check()?,
                surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)
                    .vk_check()?,
            )
        };

        let surface_format =
            choose_surface_format(&formats).ok_or_else(|| VulkanError::setup("Surface reports no formats"))?;
        let present_mode = choose_present_mode(&present_modes, self.config.frames_in_flight);
        let extent = choose_extent(&caps, framebuffer_size);
        let image_count = choose_image_count(&caps);

        let families = ctx.queue_families();
        let family_indices = [families.graphics, families.present];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());
        create_info = if families.graphics == families.present {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let loader = ctx.swapchain_loader();
        self.swapchain = unsafe { loader.create_swapchain(&create_info, None) }.vk_check()?;
        self.images = unsafe { loader.get_swapchain_images(self.swapchain) }.vk_check()?;
        self.surface_format = surface_format;
        self.present_mode = present_mode;
        self.extent = extent;

        for &image in &self.images {
            let view = create_image_view(
                device,
                image,
                vk::ImageViewType::TYPE_2D,
                surface_format.format,
                vk::ImageAspectFlags::COLOR,
                1,
            )?;
            self.views.push(view);
            ctx.live_objects().created(ObjectKind::ImageView);
        }

        if self.config.depth || self.config.stencil {
            let format = ctx.find_best_format(
                depth_format_candidates(self.config.depth, self.config.stencil),
                vk::ImageTiling::OPTIMAL,
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            );
            if format == vk::Format::UNDEFINED {
                log::warn!("No supported depth/stencil format; swapchain has colour only");
            } else {
                let desc = ImageDesc::new_2d(
                    extent.width,
                    extent.height,
                    format,
                    1,
                    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                );
                self.depth_stencil = Some(Image::new(ctx, desc)?);
            }
        }

        log::info!(
            "Swapchain {}x{}: {} images, {:?}/{:?}, {:?}, depth {:?}",
            extent.width,
            extent.height,
            self.images.len(),
            surface_format.format,
            surface_format.color_space,
            present_mode,
            self.depth_format()
        );
        Ok(())
    }

    fn destroy_resources(&mut self) {
        self.framebuffers.clear();
        self.depth_stencil = None;
        let device = self.ctx.device();
        for view in self.views.drain(..) {
            unsafe { device.destroy_image_view(view, None) };
            self.ctx.live_objects().destroyed(ObjectKind::ImageView);
        }
        self.images.clear();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { self.ctx.swapchain_loader().destroy_swapchain(self.swapchain, None) };
            self.swapchain = vk::SwapchainKHR::null();
        }
    }

    /// Tear everything down and rebuild at the new size with the same configuration
    ///
    /// Framebuffers are dropped; call [`Swapchain::create_framebuffers`] again.
    pub fn reshape(&mut self, width: u32, height: u32) -> VulkanResult<()> {
        self.ctx.wait_idle()?;
        self.destroy_resources();
        self.create_resources((width, height))
    }

    /// Colour attachment as declared in a presenting render pass
    pub fn color_spec(&self) -> AttachmentSpec {
        AttachmentSpec::present(self.surface_format.format)
    }

    /// Depth attachment as declared in a presenting render pass
    pub fn depth_spec(&self) -> Option<AttachmentSpec> {
        self.depth_format().map(|format| AttachmentSpec::depth(format, false))
    }

    /// Render pass compatible with this swapchain's framebuffers
    pub fn create_render_pass(&self) -> VulkanResult<RenderPass<'ctx>> {
        RenderPass::single_subpass(self.ctx, &[self.color_spec()], self.depth_spec())
    }

    /// Create one framebuffer per swapchain image for `render_pass`
    pub fn create_framebuffers(&mut self, render_pass: &RenderPass<'_>) -> VulkanResult<()> {
        self.framebuffers.clear();
        let depth_view = self.depth_stencil.as_ref().map(Image::view);
        for &view in &self.views {
            let attachments: Vec<vk::ImageView> = std::iter::once(view).chain(depth_view).collect();
            let framebuffer = Framebuffer::new(self.ctx, render_pass, &attachments, self.extent)?;
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    /// Framebuffer for swapchain image `index`, once created
    pub fn framebuffer(&self, index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(index as usize).map(Framebuffer::handle)
    }

    /// Attachments per framebuffer
    pub fn num_attachments(&self) -> usize {
        1 + usize::from(self.depth_stencil.is_some())
    }

    /// Raw swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Number of swapchain images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Swapchain images, owned by the presentation engine
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// One view per swapchain image
    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    /// Colour format
    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    /// Colour format and colour space
    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    /// Chosen present mode
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Image size
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Format of the shared depth/stencil image
    pub fn depth_format(&self) -> Option<vk::Format> {
        self.depth_stencil.as_ref().map(Image::format)
    }

    /// Shared depth/stencil image
    pub fn depth_image(&self) -> Option<&Image<'ctx>> {
        self.depth_stencil.as_ref()
    }

    /// Creation parameters
    pub fn config(&self) -> SwapchainConfig {
        self.config
    }
}

impl Drop for Swapchain<'_> {
    fn drop(&mut self) {
        let _ = self.ctx.wait_idle();
        self.destroy_resources();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn test_surface_format_prefers_bgra_srgb() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_surface_format_falls_back_to_first() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_present_mode_follows_frames_in_flight() {
        use vk::PresentModeKHR as P;
        let all = [P::FIFO, P::FIFO_RELAXED, P::MAILBOX, P::IMMEDIATE];
        assert_eq!(choose_present_mode(&all, 1), P::IMMEDIATE);
        assert_eq!(choose_present_mode(&all, 2), P::MAILBOX);
        assert_eq!(choose_present_mode(&all, 3), P::FIFO);

        assert_eq!(choose_present_mode(&[P::FIFO, P::MAILBOX], 1), P::MAILBOX);
        assert_eq!(choose_present_mode(&[P::FIFO, P::FIFO_RELAXED], 2), P::FIFO_RELAXED);
        assert_eq!(choose_present_mode(&[P::FIFO], 2), P::FIFO);
        assert_eq!(choose_present_mode(&[], 1), P::FIFO);
    }

    #[test]
    fn test_extent_uses_current_extent_when_defined() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: 800, height: 600 },
            ..Default::default()
        };
        assert_eq!(choose_extent(&caps, (1920, 1080)), vk::Extent2D { width: 800, height: 600 });
    }

    #[test]
    fn test_extent_clamps_framebuffer_size() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 64, height: 64 },
            max_image_extent: vk::Extent2D { width: 1024, height: 768 },
            ..Default::default()
        };
        assert_eq!(choose_extent(&caps, (1920, 32)), vk::Extent2D { width: 1024, height: 64 });
        assert_eq!(choose_extent(&caps, (500, 400)), vk::Extent2D { width: 500, height: 400 });
    }

    #[test]
    fn test_image_count() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 3);
        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);
        caps.max_image_count = 8;
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn test_num_attachments() {
        assert_eq!(num_attachments(false, false), 1);
        assert_eq!(num_attachments(true, false), 2);
        assert_eq!(num_attachments(false, true), 2);
        assert_eq!(num_attachments(true, true), 2);
    }
}
