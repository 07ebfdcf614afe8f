//! Per-window frame loop: acquire, record, submit, present
//!
//! An out-of-date or suboptimal swapchain is reported as
//! [`FrameStatus::NeedsReshape`] rather than as an error; the caller is
//! expected to call [`Presenter::reshape`] with the new framebuffer size.

use ash::vk;

use super::commands::CommandRecorder;
use super::context::DeviceContext;
use super::error::{ErrorKind, VulkanError, VulkanResult};
use super::render_pass::{AttachmentSpec, RenderPass};
use super::swapchain::{Swapchain, SwapchainConfig};
use super::sync::FrameRing;

/// Outcome of acquiring or presenting a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Carry on
    Ready,
    /// The swapchain no longer matches the surface
    NeedsReshape,
}

/// Map an acquire result to the acquired index and whether the swapchain is suboptimal
pub fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> VulkanResult<Option<(u32, bool)>> {
    match result {
        Ok(acquired) => Ok(Some(acquired)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
        Err(e) => Err(VulkanError::new(ErrorKind::Api(e))),
    }
}

/// Map a present result to a frame status
pub fn classify_present(result: Result<bool, vk::Result>) -> VulkanResult<FrameStatus> {
    match result {
        Ok(false) => Ok(FrameStatus::Ready),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(FrameStatus::NeedsReshape),
        Err(e) => Err(VulkanError::new(ErrorKind::Api(e))),
    }
}

/// Reshape is only valid between frames
///
/// An acquired image leaves the slot's `image_available` semaphore signaled
/// until a submit waits on it, so reshaping then would reuse a signaled
/// semaphore on the next acquire.
pub fn check_reshape_allowed(acquired: Option<u32>) -> VulkanResult<()> {
    match acquired {
        None => Ok(()),
        Some(index) => Err(VulkanError::invalid(format!(
            "Cannot reshape while swapchain image {index} is acquired; submit and present it first"
        ))),
    }
}

/// Swapchain, its render pass and the frame ring of one window
pub struct Presenter<'ctx> {
    ctx: &'ctx DeviceContext,
    frames: FrameRing<'ctx>,
    swapchain: Swapchain<'ctx>,
    render_pass: RenderPass<'ctx>,
    pass_specs: (AttachmentSpec, Option<AttachmentSpec>),
    suboptimal: bool,
}

impl<'ctx> Presenter<'ctx> {
    /// Build the swapchain, a presenting render pass, framebuffers and frame slots
    pub fn new(ctx: &'ctx DeviceContext, framebuffer_size: (u32, u32), config: SwapchainConfig) -> VulkanResult<Self> {
        let mut swapchain = Swapchain::new(ctx, framebuffer_size, config)?;
        let render_pass = swapchain.create_render_pass()?;
        swapchain.create_framebuffers(&render_pass)?;
        let frames = FrameRing::new(ctx, config.frames_in_flight)?;
        let pass_specs = (swapchain.color_spec(), swapchain.depth_spec());

        Ok(Self {
            ctx,
            frames,
            swapchain,
            render_pass,
            pass_specs,
            suboptimal: false,
        })
    }

    /// Wait for the current slot and acquire the next swapchain image
    pub fn acquire(&mut self) -> VulkanResult<FrameStatus> {
        self.frames.wait_current()?;

        let result = unsafe {
            self.ctx.swapchain_loader().acquire_next_image(
                self.swapchain.handle(),
                u64::MAX,
                self.frames.current().image_available.handle(),
                vk::Fence::null(),
            )
        };

        match classify_acquire(result)? {
            Some((index, suboptimal)) => {
                self.frames.set_image_index(Some(index));
                self.suboptimal |= suboptimal;
                Ok(FrameStatus::Ready)
            }
            None => {
                self.frames.set_image_index(None);
                Ok(FrameStatus::NeedsReshape)
            }
        }
    }

    /// Reset the current slot's command buffer and start recording
    pub fn begin_frame(&mut self) -> VulkanResult<CommandRecorder<'ctx>> {
        self.frames.begin_recording()
    }

    /// Finish recording and submit the frame
    pub fn submit(&mut self, recorder: CommandRecorder<'_>) -> VulkanResult<()> {
        recorder.end()?;
        self.frames.submit(self.ctx.graphics_queue())?;
        self.ctx.check_validation()
    }

    /// Present the acquired image once rendering has finished, then advance the ring
    pub fn present(&mut self) -> VulkanResult<FrameStatus> {
        let slot = self.frames.current();
        let image_index = slot
            .image_index
            .ok_or_else(|| VulkanError::invalid("Present called without an acquired image"))?;

        let wait_semaphores = [slot.render_finished.handle()];
        let swapchains = [self.swapchain.handle()];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.ctx
                .swapchain_loader()
                .queue_present(self.ctx.present_queue(), &present_info)
        };
        self.frames.set_image_index(None);
        self.frames.advance();

        let status = classify_present(result)?;
        if std::mem::take(&mut self.suboptimal) {
            return Ok(FrameStatus::NeedsReshape);
        }
        Ok(status)
    }

    /// Rebuild the swapchain and framebuffers at a new size
    ///
    /// Valid before the first acquire, after an acquire that returned
    /// [`FrameStatus::NeedsReshape`], or after [`Presenter::present`].
    pub fn reshape(&mut self, width: u32, height: u32) -> VulkanResult<()> {
        check_reshape_allowed(self.frames.current().image_index)?;
        self.swapchain.reshape(width, height)?;
        let specs = (self.swapchain.color_spec(), self.swapchain.depth_spec());
        if specs != self.pass_specs {
            log::info!("Swapchain formats changed; rebuilding render pass");
            self.render_pass = self.swapchain.create_render_pass()?;
            self.pass_specs = specs;
        }
        self.swapchain.create_framebuffers(&self.render_pass)?;
        self.suboptimal = false;
        Ok(())
    }

    /// Framebuffer of the image acquired for the current slot
    pub fn current_framebuffer(&self) -> VulkanResult<vk::Framebuffer> {
        self.frames
            .current()
            .image_index
            .and_then(|index| self.swapchain.framebuffer(index))
            .ok_or_else(|| VulkanError::invalid("No swapchain image acquired for this frame"))
    }

    /// Clear values matching the render pass attachments
    pub fn clear_values(&self, color: [f32; 4]) -> Vec<vk::ClearValue> {
        let mut values = vec![vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        }];
        if self.pass_specs.1.is_some() {
            values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });
        }
        values
    }

    /// Presenting render pass
    pub fn render_pass(&self) -> &RenderPass<'ctx> {
        &self.render_pass
    }

    /// Swapchain
    pub fn swapchain(&self) -> &Swapchain<'ctx> {
        &self.swapchain
    }

    /// Frame slots
    pub fn frames(&self) -> &FrameRing<'ctx> {
        &self.frames
    }

    /// Current swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_acquire() {
        assert_eq!(classify_acquire(Ok((2, false))).unwrap(), Some((2, false)));
        assert_eq!(classify_acquire(Ok((0, true))).unwrap(), Some((0, true)));
        assert_eq!(classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(), None);

        let error = classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::Api(vk::Result::ERROR_DEVICE_LOST)));
    }

    #[test]
    fn test_classify_present() {
        assert_eq!(classify_present(Ok(false)).unwrap(), FrameStatus::Ready);
        assert_eq!(classify_present(Ok(true)).unwrap(), FrameStatus::NeedsReshape);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            FrameStatus::NeedsReshape
        );
        assert!(classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }

    #[test]
    fn test_reshape_rejected_while_image_acquired() {
        assert!(check_reshape_allowed(None).is_ok());

        let error = check_reshape_allowed(Some(1)).unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::InvalidOperation(_)));
    }
}
