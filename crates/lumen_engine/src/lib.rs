//! # Lumen Engine
//!
//! A small real-time rendering engine built around two pieces:
//!
//! - **Frame pipeline**: rotating frame slots whose command lists are only
//!   rewritten once a monotonic device fence confirms the GPU finished them.
//! - **Scene graph**: an arena forest of named nodes whose world transforms
//!   are cached and lazily recomputed behind dirty flags.
//!
//! Nodes carry [`Behavior`](scene::Behavior)s; shader, texture and mesh
//! behaviors record draw commands that [`RenderDispatch`](render::RenderDispatch)
//! submits once per frame.
//!
//! The default build runs against [`HeadlessDevice`](render::headless::HeadlessDevice).
//! The `vulkan` feature adds a Vulkan device and a GLFW window.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lumen_engine::prelude::*;
//! use lumen_engine::render::headless::HeadlessDevice;
//!
//! fn main() -> Result<(), EngineError> {
//!     let config = EngineConfig::default();
//!     let device = Arc::new(HeadlessDevice::new(Extent::new(750, 450), 2));
//!     let window = HeadlessWindow::new(Extent::new(750, 450)).closing_after(60);
//!     let mut engine = Engine::new(config, device, Some(Box::new(window)))?;
//!
//!     let shader = engine.context().load_shader("default", "Shader/Default", ResourceLayout::textured())?;
//!     let texture = engine.context().load_texture("test", "Texture/Test")?;
//!     spawn_textured_mesh(&mut engine.lock_scene(), "quad", shader, texture, Mesh::quad())?;
//!
//!     engine.run();
//!     Ok(())
//! }
//! ```

pub mod assets;
pub mod core;
pub mod foundation;
pub mod render;
pub mod scene;
pub mod window;

mod engine;

pub use engine::{Engine, EngineError, EngineResult};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        assets::{ImageData, ShaderLoader, TextureLoader},
        core::{fatal::abort_with_diagnostic, Config, EngineConfig, EngineContext},
        foundation::{
            logging::{self, LoggingConfig},
            math::{Mat4, Vec3},
            version::Version,
        },
        render::{
            spawn_textured_mesh, Extent, GpuDevice, Mesh, ResourceLayout, SamplerFilter, ShaderBinding,
            TextureBinding, Vertex,
        },
        scene::{Behavior, NodeId, SceneGraph},
        window::{HeadlessWindow, WindowHost},
        Engine, EngineError,
    };
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::assets::loader::SPIRV_MAGIC;
    use crate::assets::{ImageData, MemoryShaderLoader, MemoryTextureLoader};
    use crate::core::config::EngineConfig;
    use crate::core::context::EngineContext;
    use crate::render::device::{Extent, GpuDevice};
    use crate::render::headless::HeadlessDevice;
    use crate::render::shader::ShaderStage;

    fn default_shaders() -> MemoryShaderLoader {
        let words = vec![SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        MemoryShaderLoader::new()
            .with_stage("lumen", "Shader/Default", ShaderStage::Vertex, words.clone())
            .with_stage("lumen", "Shader/Default", ShaderStage::Pixel, words)
    }

    /// Two-target headless device with a context holding in-memory assets:
    /// `Shader/Default` and an 8x8 `Texture/Test` in the `lumen` domain.
    pub fn headless_engine() -> (Arc<HeadlessDevice>, Arc<EngineContext>) {
        engine_with_shaders(default_shaders())
    }

    /// Like [`headless_engine`] with custom shader sources
    pub fn engine_with_shaders(shaders: MemoryShaderLoader) -> (Arc<HeadlessDevice>, Arc<EngineContext>) {
        let device = Arc::new(HeadlessDevice::new(Extent::new(750, 450), 2));
        let textures = MemoryTextureLoader::new().with_image(
            "lumen",
            "Texture/Test",
            ImageData::checkerboard(8, 8, 2, [255, 255, 255, 255], [255, 0, 255, 255]),
        );
        let gpu: Arc<dyn GpuDevice> = device.clone();
        let context = EngineContext::new(gpu, &EngineConfig::default(), Box::new(shaders), Box::new(textures));
        (device, Arc::new(context))
    }
}
