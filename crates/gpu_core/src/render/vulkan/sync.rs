//! Vulkan synchronization primitives and the frames-in-flight ring
//!
//! Each frame slot owns a command buffer, an `image_available` semaphore, a
//! `render_finished` semaphore and an `in_flight` fence. A slot moves through
//!
//! ```text
//! Idle --begin_recording--> Recording --submitted--> Submitted --fence_signaled--> Idle
//! ```
//!
//! Fences are created signaled, so every slot starts Idle and the first wait
//! returns immediately. A slot's command buffer is only reset once its fence
//! has been observed signaled, which bounds the CPU to at most `frames` frames
//! ahead of the GPU.

use ash::vk;

use super::commands::{allocate_command_buffers, free_command_buffers, CommandRecorder};
use super::context::DeviceContext;
use super::error::{VkResultExt, VulkanError, VulkanResult};

/// Binary semaphore
pub struct Semaphore<'ctx> {
    ctx: &'ctx DeviceContext,
    semaphore: vk::Semaphore,
}

impl<'ctx> Semaphore<'ctx> {
    /// Create an unsignaled semaphore
    pub fn new(ctx: &'ctx DeviceContext) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { ctx.device().create_semaphore(&create_info, None) }.vk_check()?;
        Ok(Self { ctx, semaphore })
    }

    /// Raw semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore<'_> {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_semaphore(self.semaphore, None) };
    }
}

/// CPU-observable fence
pub struct Fence<'ctx> {
    ctx: &'ctx DeviceContext,
    fence: vk::Fence,
}

impl<'ctx> Fence<'ctx> {
    /// Create a fence, optionally already signaled
    pub fn new(ctx: &'ctx DeviceContext, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { ctx.device().create_fence(&create_info, None) }.vk_check()?;
        Ok(Self { ctx, fence })
    }

    /// Block until the fence is signaled
    pub fn wait(&self) -> VulkanResult<()> {
        unsafe { self.ctx.device().wait_for_fences(&[self.fence], true, u64::MAX) }.vk_check()
    }

    /// Return the fence to the unsignaled state
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe { self.ctx.device().reset_fences(&[self.fence]) }.vk_check()
    }

    /// Whether the fence is currently signaled
    pub fn is_signaled(&self) -> VulkanResult<bool> {
        unsafe { self.ctx.device().get_fence_status(self.fence) }.vk_check()
    }

    /// Raw fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence<'_> {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_fence(self.fence, None) };
    }
}

/// Lifecycle state of a frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Fence signaled, no work pending
    Idle,
    /// Command buffer reset and being recorded
    Recording,
    /// Fence reset, GPU executing
    Submitted,
}

/// Slot bookkeeping for the frame ring, independent of any device
#[derive(Debug, Clone)]
pub struct FrameTracker {
    states: Vec<SlotState>,
    current: usize,
}

impl FrameTracker {
    /// Track `frames` slots, all Idle
    pub fn new(frames: usize) -> VulkanResult<Self> {
        if frames == 0 {
            return Err(VulkanError::precondition("At least one frame in flight is required"));
        }
        Ok(Self {
            states: vec![SlotState::Idle; frames],
            current: 0,
        })
    }

    /// Slot used for the frame being prepared
    pub fn current(&self) -> usize {
        self.current
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Always false; a tracker has at least one slot
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// State of `slot`, or `None` past the last slot
    pub fn state(&self, slot: usize) -> Option<SlotState> {
        self.states.get(slot).copied()
    }

    /// Slots whose fence is unsignaled
    pub fn in_flight(&self) -> usize {
        self.states
            .iter()
            .filter(|&&state| state == SlotState::Submitted)
            .count()
    }

    /// The current slot's fence has been observed signaled
    pub fn fence_signaled(&mut self) {
        let slot = &mut self.states[self.current];
        if *slot == SlotState::Submitted {
            *slot = SlotState::Idle;
        }
    }

    /// The current slot's command buffer is about to be reset
    #[track_caller]
    pub fn begin_recording(&mut self) -> VulkanResult<()> {
        let current = self.current;
        match self.states[current] {
            SlotState::Idle => {
                self.states[current] = SlotState::Recording;
                Ok(())
            }
            state => Err(VulkanError::invalid(format!(
                "Frame slot {current} cannot start recording while {state:?}"
            ))),
        }
    }

    /// The current slot's work was submitted with its fence
    #[track_caller]
    pub fn submitted(&mut self) -> VulkanResult<()> {
        let current = self.current;
        match self.states[current] {
            SlotState::Recording => {
                self.states[current] = SlotState::Submitted;
                Ok(())
            }
            state => Err(VulkanError::invalid(format!(
                "Frame slot {current} cannot be submitted while {state:?}"
            ))),
        }
    }

    /// Move on to the next slot
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.states.len();
    }
}

/// One frame slot's command buffer and synchronization objects
pub struct FrameSlot<'ctx> {
    /// Command buffer recorded for this slot
    pub command_buffer: vk::CommandBuffer,
    /// Signaled when the acquired swapchain image is ready
    pub image_available: Semaphore<'ctx>,
    /// Signaled when this slot's rendering is done
    pub render_finished: Semaphore<'ctx>,
    /// Signaled when the GPU has finished this slot's submission
    pub in_flight: Fence<'ctx>,
    /// Swapchain image most recently acquired for this slot, `None` if none
    pub image_index: Option<u32>,
}

/// Fixed ring of frame slots bounding CPU/GPU overlap
pub struct FrameRing<'ctx> {
    ctx: &'ctx DeviceContext,
    slots: Vec<FrameSlot<'ctx>>,
    tracker: FrameTracker,
}

impl<'ctx> FrameRing<'ctx> {
    /// Create `frames` slots with pre-signaled fences
    pub fn new(ctx: &'ctx DeviceContext, frames: usize) -> VulkanResult<Self> {
        let tracker = FrameTracker::new(frames)?;
        let command_buffers = allocate_command_buffers(ctx, frames as u32)?;

        let mut slots = Vec::with_capacity(frames);
        for &command_buffer in &command_buffers {
            let slot = Semaphore::new(ctx).and_then(|image_available| {
                Ok(FrameSlot {
                    command_buffer,
                    image_available,
                    render_finished: Semaphore::new(ctx)?,
                    in_flight: Fence::new(ctx, true)?,
                    image_index: None,
                })
            });
            match slot {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    free_command_buffers(ctx, &command_buffers);
                    return Err(e);
                }
            }
        }

        log::debug!("Created frame ring with {frames} slots");
        Ok(Self { ctx, slots, tracker })
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false; a ring has at least one slot
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Index of the current slot
    pub fn current_index(&self) -> usize {
        self.tracker.current()
    }

    /// The current slot
    pub fn current(&self) -> &FrameSlot<'ctx> {
        &self.slots[self.tracker.current()]
    }

    /// Slot bookkeeping
    pub fn tracker(&self) -> &FrameTracker {
        &self.tracker
    }

    /// Block until the current slot's previous submission has finished
    pub fn wait_current(&mut self) -> VulkanResult<()> {
        self.current().in_flight.wait()?;
        self.tracker.fence_signaled();
        Ok(())
    }

    /// Record the swapchain image acquired for the current slot
    pub fn set_image_index(&mut self, image_index: Option<u32>) {
        let current = self.tracker.current();
        self.slots[current].image_index = image_index;
    }

    /// Reset the current slot's command buffer and begin recording into it
    pub fn begin_recording(&mut self) -> VulkanResult<CommandRecorder<'ctx>> {
        self.tracker.begin_recording()?;
        let device = self.ctx.device();
        let command_buffer = self.current().command_buffer;
        unsafe { device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty()) }.vk_check()?;
        CommandRecorder::begin(device, command_buffer, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
    }

    /// Submit the current slot's recorded command buffer to `queue`
    ///
    /// Waits on `image_available` at colour-attachment output, signals
    /// `render_finished` and the slot's fence.
    pub fn submit(&mut self, queue: vk::Queue) -> VulkanResult<()> {
        let slot = self.current();
        let wait_semaphores = [slot.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [slot.render_finished.handle()];
        let command_buffers = [slot.command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        slot.in_flight.reset()?;
        unsafe {
            self.ctx
                .device()
                .queue_submit(queue, &[submit_info.build()], slot.in_flight.handle())
        }
        .vk_check()?;
        self.tracker.submitted()
    }

    /// Move to the next slot
    pub fn advance(&mut self) {
        self.tracker.advance();
    }
}

impl Drop for FrameRing<'_> {
    fn drop(&mut self) {
        let _ = self.ctx.wait_idle();
        let command_buffers: Vec<_> = self.slots.iter().map(|slot| slot.command_buffer).collect();
        free_command_buffers(self.ctx, &command_buffers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_start_idle() {
        let tracker = FrameTracker::new(3).unwrap();
        assert_eq!(tracker.len(), 3);
        assert!((0..3).all(|slot| tracker.state(slot) == Some(SlotState::Idle)));
        assert_eq!(tracker.state(3), None);
        assert_eq!(tracker.in_flight(), 0);
        assert!(FrameTracker::new(0).is_err());
    }

    #[test]
    fn test_frame_lifecycle() {
        let mut tracker = FrameTracker::new(2).unwrap();
        tracker.fence_signaled();
        tracker.begin_recording().unwrap();
        assert_eq!(tracker.state(0), Some(SlotState::Recording));
        tracker.submitted().unwrap();
        assert_eq!(tracker.state(0), Some(SlotState::Submitted));
        tracker.advance();
        assert_eq!(tracker.current(), 1);

        tracker.fence_signaled();
        tracker.begin_recording().unwrap();
        tracker.submitted().unwrap();
        assert_eq!(tracker.in_flight(), 2);
        tracker.advance();
        assert_eq!(tracker.current(), 0);

        tracker.fence_signaled();
        assert_eq!(tracker.state(0), Some(SlotState::Idle));
        assert_eq!(tracker.in_flight(), 1);
    }

    #[test]
    fn test_no_reset_while_fence_unsignaled() {
        let mut tracker = FrameTracker::new(1).unwrap();
        tracker.begin_recording().unwrap();
        tracker.submitted().unwrap();
        tracker.advance();

        assert!(tracker.begin_recording().is_err());
        tracker.fence_signaled();
        assert!(tracker.begin_recording().is_ok());
    }

    #[test]
    fn test_submit_requires_recording() {
        let mut tracker = FrameTracker::new(2).unwrap();
        assert!(tracker.submitted().is_err());
        tracker.begin_recording().unwrap();
        assert!(tracker.begin_recording().is_err());
    }

    #[test]
    fn test_in_flight_never_exceeds_ring_size() {
        for frames in 1..=4 {
            let mut tracker = FrameTracker::new(frames).unwrap();
            for _ in 0..(frames * 5) {
                tracker.fence_signaled();
                tracker.begin_recording().unwrap();
                tracker.submitted().unwrap();
                assert!(tracker.in_flight() <= frames);
                tracker.advance();
            }
        }
    }
}
