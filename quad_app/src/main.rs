//! Quad demo
//!
//! Opens a window and draws a textured square with a smaller spinning
//! square parented to it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lumen_engine::assets::{FileShaderLoader, FileTextureLoader, LoadResult};
use lumen_engine::core::{ConfigError, EngineContext};
use lumen_engine::prelude::*;
use lumen_engine::render::device::DeviceError;
use lumen_engine::render::vulkan::VulkanDevice;
use lumen_engine::scene::{BehaviorResult, UpdateContext};
use lumen_engine::window::glfw_window::{GlfwWindow, WindowError};
use thiserror::Error;

const CONFIG_FILE: &str = "quad_demo.toml";

#[derive(Debug, Error)]
enum DemoError {
    #[error("failed to read {path}: {source}")]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    #[error(transparent)]
    Window(#[from] WindowError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<lumen_engine::scene::SceneError> for DemoError {
    fn from(error: lumen_engine::scene::SceneError) -> Self {
        Self::Engine(error.into())
    }
}

/// Falls back to a checkerboard when a texture file is missing or broken
struct FallbackTextureLoader {
    files: FileTextureLoader,
}

impl TextureLoader for FallbackTextureLoader {
    fn load(&self, name: &str, domain: &str) -> LoadResult<ImageData> {
        match self.files.load(name, domain) {
            Ok(image) => Ok(image),
            Err(e) => {
                log::warn!("Using checkerboard for {}/{}: {}", domain, name, e);
                Ok(ImageData::checkerboard(64, 64, 8, [255, 255, 255, 255], [255, 0, 255, 255]))
            }
        }
    }
}

/// Spins its node around the z axis
struct Spin {
    degrees_per_second: f32,
}

impl Behavior for Spin {
    fn update(&mut self, ctx: &mut UpdateContext<'_>) -> BehaviorResult<()> {
        ctx.transform
            .rotate(Vec3::new(0.0, 0.0, self.degrees_per_second * ctx.delta_seconds));
        Ok(())
    }
}

fn manifest_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

fn load_config(dir: &Path) -> Result<EngineConfig, DemoError> {
    let path = dir.join(CONFIG_FILE);
    let mut config = if path.exists() {
        EngineConfig::load_from_file(&path).map_err(|source| DemoError::Config {
            path: path.display().to_string(),
            source,
        })?
    } else {
        log::info!("{} not found, using defaults", path.display());
        EngineConfig::default()
    };
    config.assets.root = dir.join(&config.assets.root).display().to_string();
    Ok(config)
}

fn build_scene(engine: &Engine) -> Result<(), DemoError> {
    let context = engine.context();
    let shader = context
        .load_shader("default", "Shader/Default", ResourceLayout::textured())
        .map_err(EngineError::from)?;
    let texture = context
        .load_texture("test", "Texture/Test")
        .map_err(EngineError::from)?;

    let mut scene = engine.lock_scene();
    let square = spawn_textured_mesh(&mut scene, "square", shader.clone(), texture.clone(), Mesh::quad())?;
    scene.set_scale(square, Vec3::new(0.6, 0.6, 1.0))?;

    let orbiter = spawn_textured_mesh(&mut scene, "orbiter", shader, texture, Mesh::quad())?;
    scene.add_child(square, orbiter)?;
    scene.set_position(orbiter, Vec3::new(0.9, 0.0, 0.0))?;
    scene.set_scale(orbiter, Vec3::new(0.35, 0.35, 1.0))?;
    scene.add_behavior(orbiter, Spin { degrees_per_second: 90.0 })?;
    scene.add_behavior(square, Spin { degrees_per_second: -20.0 })?;

    log::info!("Scene ready with {} nodes", scene.len());
    Ok(())
}

fn start() -> Result<Engine, DemoError> {
    let dir = manifest_dir();
    let config = load_config(&dir)?;

    let window = GlfwWindow::new(&config.window)?;
    let device: Arc<dyn GpuDevice> = Arc::new(VulkanDevice::new(&window, &config)?);

    let root = config.assets.root.clone();
    let context = EngineContext::new(
        device,
        &config,
        Box::new(FileShaderLoader::new(&root)),
        Box::new(FallbackTextureLoader {
            files: FileTextureLoader::new(&root),
        }),
    );
    let engine = Engine::with_context(config, Arc::new(context), Some(Box::new(window)))?;
    build_scene(&engine)?;
    Ok(engine)
}

fn main() {
    logging::init(LoggingConfig::default());

    match start() {
        Ok(mut engine) => engine.run(),
        Err(e) => abort_with_diagnostic(&e),
    }
}
