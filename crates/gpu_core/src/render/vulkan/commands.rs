//! Command buffer management
//!
//! One-shot helpers for blocking transfer work, plus a recorder with an RAII
//! render-pass scope for per-frame command buffers. One-shot submissions wait
//! for the graphics queue to go idle before returning.

use ash::{vk, Device};

use super::context::DeviceContext;
use super::error::{VkResultExt, VulkanError, VulkanResult};

/// Allocate `count` primary command buffers from the context's pool
pub fn allocate_command_buffers(ctx: &DeviceContext, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(ctx.command_pool())
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);

    unsafe { ctx.device().allocate_command_buffers(&alloc_info) }.vk_check()
}

/// Return command buffers to the context's pool
pub fn free_command_buffers(ctx: &DeviceContext, command_buffers: &[vk::CommandBuffer]) {
    if command_buffers.is_empty() {
        return;
    }
    unsafe {
        ctx.device()
            .free_command_buffers(ctx.command_pool(), command_buffers);
    }
}

/// Start recording into `command_buffer`
pub fn begin_command_buffer(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> VulkanResult<()> {
    let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
    unsafe { device.begin_command_buffer(command_buffer, &begin_info) }.vk_check()
}

/// Finish recording into `command_buffer`
pub fn end_command_buffer(device: &Device, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
    unsafe { device.end_command_buffer(command_buffer) }.vk_check()
}

/// Submit a recorded command buffer to the graphics queue and block until it completes
pub fn submit_and_wait(ctx: &DeviceContext, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
    let command_buffers = [command_buffer];
    let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

    unsafe {
        ctx.device()
            .queue_submit(ctx.graphics_queue(), &[submit_info.build()], vk::Fence::null())
            .vk_check()?;
        ctx.device().queue_wait_idle(ctx.graphics_queue()).vk_check()?;
    }
    ctx.check_validation()
}

/// A single-use command buffer that is freed when dropped
pub struct OneShotCommands<'ctx> {
    ctx: &'ctx DeviceContext,
    command_buffer: vk::CommandBuffer,
}

impl<'ctx> OneShotCommands<'ctx> {
    /// Allocate a command buffer and begin recording with `ONE_TIME_SUBMIT`
    pub fn begin(ctx: &'ctx DeviceContext) -> VulkanResult<Self> {
        let command_buffer = allocate_command_buffers(ctx, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::invalid("Command pool returned no command buffer"))?;
        let commands = Self { ctx, command_buffer };
        begin_command_buffer(
            ctx.device(),
            command_buffer,
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        )?;
        Ok(commands)
    }

    /// Command buffer being recorded
    pub fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// End recording, submit and wait for completion
    pub fn submit_and_wait(self) -> VulkanResult<()> {
        end_command_buffer(self.ctx.device(), self.command_buffer)?;
        submit_and_wait(self.ctx, self.command_buffer)
    }
}

impl Drop for OneShotCommands<'_> {
    fn drop(&mut self) {
        free_command_buffers(self.ctx, &[self.command_buffer]);
    }
}

/// Record `record` into a one-shot command buffer, submit it and wait
pub fn run_one_shot<F>(ctx: &DeviceContext, record: F) -> VulkanResult<()>
where
    F: FnOnce(&Device, vk::CommandBuffer) -> VulkanResult<()>,
{
    let commands = OneShotCommands::begin(ctx)?;
    record(ctx.device(), commands.handle())?;
    commands.submit_and_wait()
}

/// Blocking copy of `size` bytes from the start of `src` to the start of `dst`
pub fn copy_buffer(ctx: &DeviceContext, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> VulkanResult<()> {
    run_one_shot(ctx, |device, command_buffer| {
        let region = vk::BufferCopy::builder().src_offset(0).dst_offset(0).size(size);
        unsafe { device.cmd_copy_buffer(command_buffer, src, dst, &[region.build()]) };
        Ok(())
    })
}

/// Viewport covering `extent` with the standard 0..1 depth range
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Scissor rectangle covering `extent`
pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Records into a command buffer the caller already owns
pub struct CommandRecorder<'a> {
    device: &'a Device,
    command_buffer: vk::CommandBuffer,
    recording: bool,
}

impl<'a> CommandRecorder<'a> {
    /// Begin recording into `command_buffer`
    pub fn begin(
        device: &'a Device,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> VulkanResult<Self> {
        begin_command_buffer(device, command_buffer, flags)?;
        Ok(Self {
            device,
            command_buffer,
            recording: true,
        })
    }

    /// Command buffer being recorded
    pub fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Begin a render pass with inline contents
    pub fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    ) -> VulkanResult<ActiveRenderPass<'_, 'a>> {
        if !self.recording {
            return Err(VulkanError::invalid("Command buffer not recording"));
        }

        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);

        unsafe {
            self.device.cmd_begin_render_pass(
                self.command_buffer,
                &render_pass_begin,
                vk::SubpassContents::INLINE,
            );
        }

        Ok(ActiveRenderPass { recorder: self })
    }

    /// Record a pipeline barrier
    pub fn pipeline_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        buffer_barriers: &[vk::BufferMemoryBarrier],
        image_barriers: &[vk::ImageMemoryBarrier],
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                buffer_barriers,
                image_barriers,
            );
        }
    }

    /// Bind a compute pipeline
    pub fn bind_compute_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(self.command_buffer, vk::PipelineBindPoint::COMPUTE, pipeline);
        }
    }

    /// Bind descriptor sets for the compute bind point
    pub fn bind_compute_descriptor_sets(&mut self, layout: vk::PipelineLayout, sets: &[vk::DescriptorSet]) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                layout,
                0,
                sets,
                &[],
            );
        }
    }

    /// Dispatch compute work groups
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(self.command_buffer, x, y, z) };
    }

    /// End command recording
    pub fn end(mut self) -> VulkanResult<vk::CommandBuffer> {
        if !self.recording {
            return Err(VulkanError::invalid("Command buffer not recording"));
        }
        end_command_buffer(self.device, self.command_buffer)?;
        self.recording = false;
        Ok(self.command_buffer)
    }
}

/// Render pass scope; the pass ends when this is dropped
pub struct ActiveRenderPass<'r, 'a> {
    recorder: &'r mut CommandRecorder<'a>,
}

impl ActiveRenderPass<'_, '_> {
    /// Set viewport 0
    pub fn set_viewport(&mut self, viewport: vk::Viewport) {
        unsafe {
            self.recorder
                .device
                .cmd_set_viewport(self.recorder.command_buffer, 0, &[viewport]);
        }
    }

    /// Set scissor 0
    pub fn set_scissor(&mut self, scissor: vk::Rect2D) {
        unsafe {
            self.recorder
                .device
                .cmd_set_scissor(self.recorder.command_buffer, 0, &[scissor]);
        }
    }

    /// Bind a graphics pipeline
    pub fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.recorder.device.cmd_bind_pipeline(
                self.recorder.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
    }

    /// Bind descriptor sets starting at set 0
    pub fn bind_descriptor_sets(&mut self, layout: vk::PipelineLayout, sets: &[vk::DescriptorSet]) {
        unsafe {
            self.recorder.device.cmd_bind_descriptor_sets(
                self.recorder.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                sets,
                &[],
            );
        }
    }

    /// Bind vertex buffers
    pub fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        unsafe {
            self.recorder.device.cmd_bind_vertex_buffers(
                self.recorder.command_buffer,
                first_binding,
                buffers,
                offsets,
            );
        }
    }

    /// Bind an index buffer
    pub fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe {
            self.recorder.device.cmd_bind_index_buffer(
                self.recorder.command_buffer,
                buffer,
                offset,
                index_type,
            );
        }
    }

    /// Push constants to shaders
    pub fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        unsafe {
            self.recorder.device.cmd_push_constants(
                self.recorder.command_buffer,
                layout,
                stages,
                offset,
                data,
            );
        }
    }

    /// Non-indexed draw
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.recorder.device.cmd_draw(
                self.recorder.command_buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    /// Indexed draw
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.recorder.device.cmd_draw_indexed(
                self.recorder.command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }
}

impl Drop for ActiveRenderPass<'_, '_> {
    fn drop(&mut self) {
        unsafe {
            self.recorder
                .device
                .cmd_end_render_pass(self.recorder.command_buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_viewport_and_scissor_cover_extent() {
        let extent = vk::Extent2D { width: 800, height: 600 };
        let viewport = full_viewport(extent);
        assert_eq!((viewport.width, viewport.height), (800.0, 600.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));

        let scissor = full_scissor(extent);
        assert_eq!(scissor.offset.x, 0);
        assert_eq!(scissor.extent, extent);
    }
}
