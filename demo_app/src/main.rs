//! Clear-screen demo
//!
//! Opens a window, uploads a mipmapped checkerboard texture and a triangle's
//! vertices, then clears the swapchain every frame with a colour that cycles
//! over time. When the build script could compile `resources/shaders` (a
//! Vulkan SDK with glslc is installed) the triangle is drawn on top.

use ash::vk;
use glfw::{Action, Key, WindowEvent};
use gpu_core::prelude::*;
use gpu_core::render::vulkan::commands::{full_scissor, full_viewport};
use gpu_core::render::vulkan::{
    GraphicsPipeline, GraphicsPipelineDesc, PipelineLayout, RenderPass, ShaderSet, VertexInput, VertexLayout,
};
use std::path::Path;

const CONFIG_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/demo.toml");

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct ColoredVertex {
    position: [f32; 2],
    color: [f32; 3],
}

impl VertexLayout for ColoredVertex {
    const ATTRIBUTES: &'static [(vk::Format, u32)] =
        &[(vk::Format::R32G32_SFLOAT, 0), (vk::Format::R32G32B32_SFLOAT, 8)];
}

const TRIANGLE: [ColoredVertex; 3] = [
    ColoredVertex {
        position: [0.0, -0.5],
        color: [1.0, 0.2, 0.2],
    },
    ColoredVertex {
        position: [0.5, 0.5],
        color: [0.2, 1.0, 0.2],
    },
    ColoredVertex {
        position: [-0.5, 0.5],
        color: [0.2, 0.2, 1.0],
    },
];

/// Background colour at `time` seconds, each channel on its own phase
fn clear_color(time: f64) -> [f32; 4] {
    let phase = |offset: f64| (0.5 + 0.5 * (time * 0.7 + offset).sin()) as f32;
    [phase(0.0), phase(2.094), phase(4.189), 1.0]
}

/// Pipeline for the optional triangle, rebuilt if the presenter's render pass changes
struct TrianglePass<'ctx> {
    shaders: ShaderSet<'ctx>,
    layout: PipelineLayout<'ctx>,
    pipeline: GraphicsPipeline<'ctx>,
    render_pass: vk::RenderPass,
}

impl<'ctx> TrianglePass<'ctx> {
    fn load(ctx: &'ctx DeviceContext, config: &GpuConfig, render_pass: &RenderPass<'_>) -> Option<Self> {
        let shaders = match ShaderSet::load(ctx, &config.shader_dir, "quad") {
            Ok(shaders) => shaders,
            Err(e) => {
                log::warn!("Triangle disabled: {e}");
                return None;
            }
        };
        let build = || -> VulkanResult<Self> {
            let layout = PipelineLayout::empty(ctx)?;
            let pipeline = GraphicsPipeline::new(ctx, render_pass, &shaders, &layout, &Self::desc())?;
            Ok(Self {
                shaders,
                layout,
                pipeline,
                render_pass: render_pass.handle(),
            })
        };
        match build() {
            Ok(pass) => Some(pass),
            Err(e) => {
                log::warn!("Triangle disabled: {e}");
                None
            }
        }
    }

    fn desc() -> GraphicsPipelineDesc {
        GraphicsPipelineDesc {
            vertex_input: VertexInput::of::<ColoredVertex>(),
            cull_mode: vk::CullModeFlags::NONE,
            ..GraphicsPipelineDesc::default()
        }
    }

    fn ensure_compatible(&mut self, ctx: &'ctx DeviceContext, render_pass: &RenderPass<'_>) -> VulkanResult<()> {
        if self.render_pass != render_pass.handle() {
            self.pipeline = GraphicsPipeline::new(ctx, render_pass, &self.shaders, &self.layout, &Self::desc())?;
            self.render_pass = render_pass.handle();
        }
        Ok(())
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = GpuConfig::load_or_default(CONFIG_PATH)?;
    logging::init(&config.log_level);
    config.validate()?;
    if config.shader_dir.is_relative() {
        config.shader_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join(&config.shader_dir);
    }

    let mut window = Window::new(
        &config.window.title,
        config.window.width,
        config.window.height,
        config.window.resizable,
    )?;
    let ctx = DeviceContext::new(&mut window, &config)?;
    log::info!("Running on {}", ctx.physical_device().name());

    let mut presenter = Presenter::new(&ctx, window.framebuffer_size(), config.swapchain_config())?;

    let checkerboard = PixelData::checkerboard(256, 32, [40, 40, 40, 255], [220, 220, 220, 255])?;
    let texture = Texture2D::new(
        &ctx,
        &checkerboard,
        TextureOptions {
            mipmaps: true,
            ..TextureOptions::default()
        },
    )?;
    let sampler = Sampler::new(&ctx, &SamplerConfig::default())?;
    log::debug!("Texture descriptor: {:?}", texture.descriptor_info(&sampler));
    log::info!(
        "Uploaded {}x{} checkerboard with {} mip levels",
        texture.size().0,
        texture.size().1,
        texture.mip_levels()
    );

    let vertices = VertexBuffer::device_local(&ctx, &TRIANGLE)?;
    let mut triangle = TrianglePass::load(&ctx, &config, presenter.render_pass());

    while !window.should_close() {
        for event in window.poll_events() {
            if let WindowEvent::Key(Key::Escape, _, Action::Press, _) = event {
                window.set_should_close(true);
            }
        }

        if window.take_resized() || presenter.acquire()? == FrameStatus::NeedsReshape {
            let (width, height) = window.wait_while_minimized();
            if window.should_close() {
                break;
            }
            presenter.reshape(width, height)?;
            if let Some(pass) = triangle.as_mut() {
                pass.ensure_compatible(&ctx, presenter.render_pass())?;
            }
            continue;
        }

        let extent = presenter.extent();
        let clear_values = presenter.clear_values(clear_color(window.time()));
        let framebuffer = presenter.current_framebuffer()?;
        let mut recorder = presenter.begin_frame()?;
        {
            let mut pass = recorder.begin_render_pass(
                presenter.render_pass().handle(),
                framebuffer,
                full_scissor(extent),
                &clear_values,
            )?;
            if let Some(triangle) = triangle.as_ref() {
                pass.bind_pipeline(triangle.pipeline.handle());
                pass.set_viewport(full_viewport(extent));
                pass.set_scissor(full_scissor(extent));
                pass.bind_vertex_buffers(0, &[vertices.handle()], &[0]);
                pass.draw(vertices.vertex_count(), 1, 0, 0);
            }
        }
        presenter.submit(recorder)?;

        if presenter.present()? == FrameStatus::NeedsReshape {
            let (width, height) = window.wait_while_minimized();
            if !window.should_close() {
                presenter.reshape(width, height)?;
                if let Some(pass) = triangle.as_mut() {
                    pass.ensure_compatible(&ctx, presenter.render_pass())?;
                }
            }
        }
    }

    ctx.wait_idle()?;
    log::info!("Live objects at shutdown: {}", ctx.live_objects().snapshot());
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        logging::init("info");
        log::error!("{e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_color_in_range() {
        for step in 0..100 {
            let color = clear_color(f64::from(step) * 0.37);
            assert!(color[..3].iter().all(|c| (0.0..=1.0).contains(c)));
            assert_eq!(color[3], 1.0);
        }
    }

    #[test]
    fn test_vertex_layout() {
        let binding = ColoredVertex::binding_description(0);
        assert_eq!(binding.stride as usize, std::mem::size_of::<ColoredVertex>());
        assert_eq!(ColoredVertex::attribute_descriptions(0)[1].offset, 8);
    }
}
