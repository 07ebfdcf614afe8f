//! GLFW-based window management for Vulkan rendering
//!
//! Owns the GLFW library handle and one window configured without a client API,
//! and produces the Vulkan surface the device context presents to.

use ash::vk;

use super::error::{ErrorKind, VulkanError, VulkanResult};

/// GLFW window wrapper
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    resized: bool,
}

impl Window {
    /// Create a window with no OpenGL context
    pub fn new(title: &str, width: u32, height: u32, resizable: bool) -> VulkanResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|e| VulkanError::new(ErrorKind::Window(format!("GLFW initialization failed: {e:?}"))))?;

        if !glfw.vulkan_supported() {
            return Err(VulkanError::setup("GLFW reports no Vulkan loader"));
        }

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(resizable));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or_else(|| VulkanError::new(ErrorKind::Window("Window creation failed".to_string())))?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        Ok(Self {
            glfw,
            window,
            events,
            resized: false,
        })
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Request or cancel window closure
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Process pending events and return them
    ///
    /// Framebuffer resizes are latched and reported by [`Window::take_resized`].
    pub fn poll_events(&mut self) -> Vec<glfw::WindowEvent> {
        self.glfw.poll_events();
        let events: Vec<_> = glfw::flush_messages(&self.events).map(|(_, event)| event).collect();
        if events.iter().any(|event| matches!(event, glfw::WindowEvent::FramebufferSize(..))) {
            self.resized = true;
        }
        events
    }

    /// Return and clear the resize latch
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    /// Block while the framebuffer has zero area (minimized window)
    pub fn wait_while_minimized(&mut self) -> (u32, u32) {
        let mut size = self.framebuffer_size();
        while (size.0 == 0 || size.1 == 0) && !self.should_close() {
            self.glfw.wait_events();
            size = self.framebuffer_size();
        }
        size
    }

    /// Current framebuffer size in pixels
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }

    /// Seconds since GLFW was initialized
    pub fn time(&self) -> f64 {
        self.glfw.get_time()
    }

    /// Required Vulkan instance extensions for presenting to this window
    pub fn required_instance_extensions(&self) -> VulkanResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| VulkanError::setup("GLFW could not report required instance extensions"))
    }

    /// Create a Vulkan surface for this window
    pub fn create_surface(&mut self, instance: vk::Instance) -> VulkanResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(VulkanError::new(ErrorKind::Api(result)))
        }
    }
}
