//! GLFW window with a Vulkan surface.

use ash::vk;
use thiserror::Error;

use super::WindowHost;
use crate::core::config::WindowConfig;
use crate::render::device::Extent;

/// Window errors
#[derive(Debug, Error)]
pub enum WindowError {
    /// GLFW could not start
    #[error("GLFW initialization failed: {0}")]
    InitializationFailed(String),

    /// The native window could not be created
    #[error("window creation failed")]
    CreationFailed,

    /// Vulkan is not usable through GLFW
    #[error("GLFW error: {0}")]
    Glfw(String),
}

/// Window result alias
pub type WindowResult<T> = Result<T, WindowError>;

/// GLFW window without a client API, ready for a Vulkan surface
pub struct GlfwWindow {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    pending_resize: Option<Extent>,
}

impl std::fmt::Debug for GlfwWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlfwWindow")
            .field("size", &self.client_dimensions())
            .finish_non_exhaustive()
    }
}

impl GlfwWindow {
    /// Open a window as described by `config`
    pub fn new(config: &WindowConfig) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|e| WindowError::InitializationFailed(e.to_string()))?;
        if !glfw.vulkan_supported() {
            return Err(WindowError::Glfw("Vulkan is not supported".to_string()));
        }

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(config.resizable));

        let (mut window, events) = glfw
            .create_window(config.width, config.height, &config.title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        log::info!("Opened window '{}' at {}x{}", config.title, config.width, config.height);
        Ok(Self {
            glfw,
            window,
            events,
            pending_resize: None,
        })
    }

    /// Instance extensions GLFW needs for surface creation
    pub fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::Glfw("no Vulkan instance extensions reported".to_string()))
    }

    /// Create a surface for `instance`
    pub fn create_surface(&self, instance: vk::Instance) -> WindowResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);
        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::Glfw(format!("surface creation failed: {result:?}")))
        }
    }
}

impl WindowHost for GlfwWindow {
    fn client_dimensions(&self) -> Extent {
        let (width, height) = self.window.get_framebuffer_size();
        Extent::new(width.max(0) as u32, height.max(0) as u32)
    }

    fn poll_events(&mut self) {
        self.glfw.poll_events();
        for (_, event) in glfw::flush_messages(&self.events) {
            match event {
                glfw::WindowEvent::FramebufferSize(width, height) => {
                    self.pending_resize = Some(Extent::new(width.max(0) as u32, height.max(0) as u32));
                }
                glfw::WindowEvent::Close => self.window.set_should_close(true),
                _ => {}
            }
        }
    }

    fn take_resize(&mut self) -> Option<Extent> {
        self.pending_resize.take()
    }

    fn should_close(&self) -> bool {
        self.window.should_close()
    }

    fn request_close(&mut self) {
        self.window.set_should_close(true);
    }
}
