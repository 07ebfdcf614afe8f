//! Pipeline layouts, graphics pipelines and compute pipelines
//!
//! A [`GraphicsPipelineDesc`] gathers the fixed-function state that differs
//! between pipelines. Viewport and scissor are always dynamic so pipelines
//! survive swapchain reshapes; everything else is baked in at creation.

use ash::vk;

use super::context::DeviceContext;
use super::error::{VkResultExt, VulkanError, VulkanResult};
use super::render_pass::RenderPass;
use super::shader::{ShaderModule, ShaderSet, ShaderStage};
use super::vertex_layout::VertexInput;

/// Descriptor set layout wrapper with RAII cleanup
pub struct DescriptorSetLayout<'ctx> {
    ctx: &'ctx DeviceContext,
    layout: vk::DescriptorSetLayout,
}

impl<'ctx> DescriptorSetLayout<'ctx> {
    /// Create a layout from its bindings
    pub fn new(ctx: &'ctx DeviceContext, bindings: &[vk::DescriptorSetLayoutBinding]) -> VulkanResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
        let layout = unsafe { ctx.device().create_descriptor_set_layout(&create_info, None) }.vk_check()?;
        Ok(Self { ctx, layout })
    }

    /// Raw layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout<'_> {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_descriptor_set_layout(self.layout, None) };
    }
}

/// Binding of a single descriptor of `ty` visible to `stages`
pub fn layout_binding(
    binding: u32,
    ty: vk::DescriptorType,
    stages: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding {
    vk::DescriptorSetLayoutBinding::builder()
        .binding(binding)
        .descriptor_type(ty)
        .descriptor_count(1)
        .stage_flags(stages)
        .build()
}

/// Pipeline layout wrapper with RAII cleanup
pub struct PipelineLayout<'ctx> {
    ctx: &'ctx DeviceContext,
    layout: vk::PipelineLayout,
}

impl<'ctx> PipelineLayout<'ctx> {
    /// Create a layout from descriptor set layouts and push-constant ranges
    pub fn new(
        ctx: &'ctx DeviceContext,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constants: &[vk::PushConstantRange],
    ) -> VulkanResult<Self> {
        let max_push = ctx.physical_device().properties.limits.max_push_constants_size;
        if let Some(range) = push_constants.iter().find(|range| range.offset + range.size > max_push) {
            return Err(VulkanError::precondition(format!(
                "Push constant range {}..{} exceeds device limit of {max_push} bytes",
                range.offset,
                range.offset + range.size
            )));
        }

        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constants);
        let layout = unsafe { ctx.device().create_pipeline_layout(&create_info, None) }.vk_check()?;
        Ok(Self { ctx, layout })
    }

    /// Layout with no descriptors or push constants
    pub fn empty(ctx: &'ctx DeviceContext) -> VulkanResult<Self> {
        Self::new(ctx, &[], &[])
    }

    /// Raw layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout<'_> {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_pipeline_layout(self.layout, None) };
    }
}

/// How fragment output is combined with the attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    /// Overwrite
    #[default]
    Opaque,
    /// Standard non-premultiplied alpha blending
    Alpha,
    /// Add source to destination
    Additive,
}

impl BlendMode {
    /// Per-attachment blend state
    pub fn attachment_state(self) -> vk::PipelineColorBlendAttachmentState {
        let builder = vk::PipelineColorBlendAttachmentState::builder().color_write_mask(vk::ColorComponentFlags::RGBA);
        match self {
            Self::Opaque => builder.blend_enable(false),
            Self::Alpha => builder
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .alpha_blend_op(vk::BlendOp::ADD),
            Self::Additive => builder
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::ONE)
                .dst_color_blend_factor(vk::BlendFactor::ONE)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE)
                .alpha_blend_op(vk::BlendOp::ADD),
        }
        .build()
    }
}

/// Fixed-function state of a graphics pipeline
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    /// Vertex buffer bindings and attributes
    pub vertex_input: VertexInput,
    /// Primitive topology; must be `PATCH_LIST` when tessellating
    pub topology: vk::PrimitiveTopology,
    /// Fill, line or point rasterization
    pub polygon_mode: vk::PolygonMode,
    /// Face culling
    pub cull_mode: vk::CullModeFlags,
    /// Winding of front faces
    pub front_face: vk::FrontFace,
    /// Rasterized line width
    pub line_width: f32,
    /// Test fragments against the depth attachment
    pub depth_test: bool,
    /// Write passing fragments' depth
    pub depth_write: bool,
    /// Depth comparison
    pub depth_compare: vk::CompareOp,
    /// Blend applied to every colour attachment
    pub blend: BlendMode,
    /// Dynamic states; viewport and scissor are always added
    pub dynamic_states: Vec<vk::DynamicState>,
    /// Control points per patch when tessellation stages are present
    pub patch_control_points: Option<u32>,
    /// Subpass the pipeline is used in
    pub subpass: u32,
}

impl Default for GraphicsPipelineDesc {
    fn default() -> Self {
        Self {
            vertex_input: VertexInput::empty(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS,
            blend: BlendMode::Opaque,
            dynamic_states: Vec::new(),
            patch_control_points: None,
            subpass: 0,
        }
    }
}

impl GraphicsPipelineDesc {
    /// Dynamic states with viewport and scissor guaranteed, without duplicates
    pub fn all_dynamic_states(&self) -> Vec<vk::DynamicState> {
        let mut states = vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        for &state in &self.dynamic_states {
            if !states.contains(&state) {
                states.push(state);
            }
        }
        states
    }

    /// Check that the state is consistent with the shader stages present
    pub fn check(&self, tessellated: bool) -> VulkanResult<()> {
        let patches = self.topology == vk::PrimitiveTopology::PATCH_LIST;
        match (tessellated, patches, self.patch_control_points) {
            (true, true, Some(points)) if points > 0 => Ok(()),
            (true, true, _) => Err(VulkanError::precondition("Tessellation needs a non-zero patch size")),
            (true, false, _) => Err(VulkanError::precondition("Tessellation stages need PATCH_LIST topology")),
            (false, true, _) => Err(VulkanError::precondition("PATCH_LIST topology needs tessellation stages")),
            (false, false, _) => Ok(()),
        }
    }
}

/// Graphics pipeline wrapper with RAII cleanup
pub struct GraphicsPipeline<'ctx> {
    ctx: &'ctx DeviceContext,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl<'ctx> GraphicsPipeline<'ctx> {
    /// Build a pipeline for `render_pass` from `shaders` and `desc`
    pub fn new(
        ctx: &'ctx DeviceContext,
        render_pass: &RenderPass<'_>,
        shaders: &ShaderSet<'_>,
        layout: &PipelineLayout<'_>,
        desc: &GraphicsPipelineDesc,
    ) -> VulkanResult<Self> {
        if shaders.get(ShaderStage::Vertex).is_none() {
            return Err(VulkanError::precondition("Graphics pipeline needs a vertex shader"));
        }
        let tessellated = shaders.has_tessellation();
        desc.check(tessellated)?;

        let stages = shaders.graphics_stage_infos();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&desc.vertex_input.bindings)
            .vertex_attribute_descriptions(&desc.vertex_input.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(desc.topology)
            .primitive_restart_enable(false);

        let tessellation = vk::PipelineTessellationStateCreateInfo::builder()
            .patch_control_points(desc.patch_control_points.unwrap_or(0));

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(desc.polygon_mode)
            .line_width(desc.line_width)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(desc.depth_compare)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let blend_attachments = vec![desc.blend.attachment_state(); render_pass.color_attachment_count()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let dynamic_states = desc.all_dynamic_states();
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(render_pass.handle())
            .subpass(desc.subpass);
        if tessellated {
            pipeline_info = pipeline_info.tessellation_state(&tessellation);
        }
        if render_pass.has_depth() {
            pipeline_info = pipeline_info.depth_stencil_state(&depth_stencil);
        }

        let pipelines = unsafe {
            ctx.device()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
        }
        .map_err(|(_, e)| e)
        .vk_check()?;
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::invalid("Driver returned no graphics pipeline"))?;

        log::debug!("Created graphics pipeline with {} stages", stages.len());
        Ok(Self {
            ctx,
            pipeline,
            layout: layout.handle(),
        })
    }

    /// Raw pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Layout the pipeline was built with
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline<'_> {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_pipeline(self.pipeline, None) };
    }
}

/// Compute pipeline wrapper with RAII cleanup
pub struct ComputePipeline<'ctx> {
    ctx: &'ctx DeviceContext,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl<'ctx> ComputePipeline<'ctx> {
    /// Build a compute pipeline from a compute-stage module
    pub fn new(ctx: &'ctx DeviceContext, shader: &ShaderModule<'_>, layout: &PipelineLayout<'_>) -> VulkanResult<Self> {
        if shader.stage() != ShaderStage::Compute {
            return Err(VulkanError::precondition(format!(
                "Compute pipeline needs a compute shader, got {:?}",
                shader.stage()
            )));
        }

        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(shader.stage_info())
            .layout(layout.handle());

        let pipelines = unsafe {
            ctx.device()
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
        }
        .map_err(|(_, e)| e)
        .vk_check()?;
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::invalid("Driver returned no compute pipeline"))?;

        Ok(Self {
            ctx,
            pipeline,
            layout: layout.handle(),
        })
    }

    /// Build a compute pipeline from the compute stage of a shader set
    pub fn from_set(ctx: &'ctx DeviceContext, shaders: &ShaderSet<'_>, layout: &PipelineLayout<'_>) -> VulkanResult<Self> {
        let shader = shaders
            .get(ShaderStage::Compute)
            .ok_or_else(|| VulkanError::precondition("Shader set has no compute stage"))?;
        Self::new(ctx, shader, layout)
    }

    /// Raw pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Layout the pipeline was built with
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for ComputePipeline<'_> {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_pipeline(self.pipeline, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_and_scissor_always_dynamic() {
        let desc = GraphicsPipelineDesc {
            dynamic_states: vec![vk::DynamicState::LINE_WIDTH, vk::DynamicState::SCISSOR],
            ..GraphicsPipelineDesc::default()
        };
        assert_eq!(
            desc.all_dynamic_states(),
            vec![
                vk::DynamicState::VIEWPORT,
                vk::DynamicState::SCISSOR,
                vk::DynamicState::LINE_WIDTH
            ]
        );
    }

    #[test]
    fn test_tessellation_consistency() {
        let plain = GraphicsPipelineDesc::default();
        assert!(plain.check(false).is_ok());
        assert!(plain.check(true).is_err());

        let mut patches = GraphicsPipelineDesc {
            topology: vk::PrimitiveTopology::PATCH_LIST,
            patch_control_points: Some(3),
            ..GraphicsPipelineDesc::default()
        };
        assert!(patches.check(true).is_ok());
        assert!(patches.check(false).is_err());

        patches.patch_control_points = None;
        assert!(patches.check(true).is_err());
    }

    #[test]
    fn test_blend_modes() {
        assert_eq!(BlendMode::default(), BlendMode::Opaque);
        assert_eq!(BlendMode::Opaque.attachment_state().blend_enable, vk::FALSE);

        let alpha = BlendMode::Alpha.attachment_state();
        assert_eq!(alpha.blend_enable, vk::TRUE);
        assert_eq!(alpha.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
        assert_eq!(alpha.color_write_mask, vk::ColorComponentFlags::RGBA);

        assert_eq!(BlendMode::Additive.attachment_state().dst_color_blend_factor, vk::BlendFactor::ONE);
    }

    #[test]
    fn test_layout_binding() {
        let binding = layout_binding(
            2,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        );
        assert_eq!(binding.binding, 2);
        assert_eq!(binding.descriptor_count, 1);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }
}
