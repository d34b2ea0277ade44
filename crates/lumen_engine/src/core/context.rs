//! Engine services shared by the pipeline, the scene and behaviors.
//!
//! One [`EngineContext`] is built at startup and passed around as
//! `Arc<EngineContext>`. It owns the device, settings, the descriptor
//! registry, the shader and texture libraries and the asset loaders.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::config::{AssetConfig, EngineConfig, RendererConfig};
use super::settings::{keys, Settings};
use crate::assets::{FileShaderLoader, FileTextureLoader, ShaderLoader, TextureLoader};
use crate::render::descriptor::{DescriptorRegistry, ResourceLayout};
use crate::render::device::GpuDevice;
use crate::render::library::Library;
use crate::render::shader::{ShaderProgram, ShaderResult};
use crate::render::texture::{GpuTexture, TextureResult};

/// Unregistered resources still referenced by scene nodes
#[derive(Default)]
struct Retired {
    shaders: Vec<Arc<ShaderProgram>>,
    textures: Vec<Arc<GpuTexture>>,
}

fn take_unshared<T>(items: &mut Vec<Arc<T>>) -> Vec<Arc<T>> {
    let (unshared, shared) = std::mem::take(items)
        .into_iter()
        .partition(|item| Arc::strong_count(item) == 1);
    *items = shared;
    unshared
}

/// Shared engine services
pub struct EngineContext {
    device: Arc<dyn GpuDevice>,
    settings: RwLock<Settings>,
    descriptors: Mutex<DescriptorRegistry>,
    shaders: Mutex<Library<ShaderProgram>>,
    textures: Mutex<Library<GpuTexture>>,
    retired: Mutex<Retired>,
    shader_loader: Box<dyn ShaderLoader>,
    texture_loader: Box<dyn TextureLoader>,
    renderer: RendererConfig,
    assets: AssetConfig,
    cleaned_up: AtomicBool,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("renderer", &self.renderer)
            .field("assets", &self.assets)
            .finish_non_exhaustive()
    }
}

impl EngineContext {
    /// Context with explicit loaders
    pub fn new(
        device: Arc<dyn GpuDevice>,
        config: &EngineConfig,
        shader_loader: Box<dyn ShaderLoader>,
        texture_loader: Box<dyn TextureLoader>,
    ) -> Self {
        Self {
            device,
            settings: RwLock::new(Settings::from_config(config)),
            descriptors: Mutex::new(DescriptorRegistry::new()),
            shaders: Mutex::new(Library::new("shader")),
            textures: Mutex::new(Library::new("texture")),
            retired: Mutex::new(Retired::default()),
            shader_loader,
            texture_loader,
            renderer: config.renderer.clone(),
            assets: config.assets.clone(),
            cleaned_up: AtomicBool::new(false),
        }
    }

    /// Context loading assets from `config.assets.root` on disk
    pub fn with_file_loaders(device: Arc<dyn GpuDevice>, config: &EngineConfig) -> Self {
        let root = config.assets.root.clone();
        Self::new(
            device,
            config,
            Box::new(FileShaderLoader::new(&root)),
            Box::new(FileTextureLoader::new(&root)),
        )
    }

    /// The graphics device
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    /// Read access to settings
    pub fn settings(&self) -> RwLockReadGuard<'_, Settings> {
        self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write access to settings
    pub fn settings_mut(&self) -> RwLockWriteGuard<'_, Settings> {
        self.settings.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The descriptor registry
    pub fn descriptors(&self) -> MutexGuard<'_, DescriptorRegistry> {
        self.descriptors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shader bytecode source
    pub fn shader_loader(&self) -> &dyn ShaderLoader {
        self.shader_loader.as_ref()
    }

    /// Image source
    pub fn texture_loader(&self) -> &dyn TextureLoader {
        self.texture_loader.as_ref()
    }

    /// Renderer settings the context was built with
    pub fn renderer_config(&self) -> &RendererConfig {
        &self.renderer
    }

    /// Asset domain used when none is given
    pub fn default_domain(&self) -> String {
        match self.settings().get::<String>(keys::DEFAULT_DOMAIN) {
            Ok(domain) if !domain.is_empty() => domain,
            Ok(_) => self.assets.default_domain.clone(),
            Err(e) => {
                log::warn!("{}, using '{}'", e, self.assets.default_domain);
                self.assets.default_domain.clone()
            }
        }
    }

    fn shader_library(&self) -> MutexGuard<'_, Library<ShaderProgram>> {
        self.shaders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn texture_library(&self) -> MutexGuard<'_, Library<GpuTexture>> {
        self.textures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn retired(&self) -> MutexGuard<'_, Retired> {
        self.retired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release retired resources no node holds any more. The device is
    /// drained first since a frame in flight may still read them.
    fn release_unused(&self) {
        let (shaders, textures) = {
            let mut retired = self.retired();
            (take_unshared(&mut retired.shaders), take_unshared(&mut retired.textures))
        };
        if shaders.is_empty() && textures.is_empty() {
            return;
        }
        if let Err(e) = self.device.wait_idle() {
            log::warn!("Device did not go idle before releasing resources: {}", e);
        }
        for program in shaders {
            program.release(self);
        }
        for texture in textures {
            texture.release(self.device.as_ref());
        }
    }

    /// Remove `name` from the shader library.
    ///
    /// The program is released once no node binds it any more, at the
    /// latest during [`EngineContext::clean_up`]. Returns whether `name`
    /// was registered.
    pub fn unregister_shader(&self, name: &str) -> bool {
        let Some(program) = self.shader_library().unregister(name) else {
            return false;
        };
        log::debug!("Unregistered shader '{}'", name);
        self.retired().shaders.push(program);
        self.release_unused();
        true
    }

    /// Remove `name` from the texture library.
    ///
    /// Released like [`EngineContext::unregister_shader`].
    pub fn unregister_texture(&self, name: &str) -> bool {
        let Some(texture) = self.texture_library().unregister(name) else {
            return false;
        };
        log::debug!("Unregistered texture '{}'", name);
        self.retired().textures.push(texture);
        self.release_unused();
        true
    }

    /// Load `local_path` from the default domain and register it as `name`.
    ///
    /// Returns the registered program if `name` is already loaded.
    pub fn load_shader(&self, name: &str, local_path: &str, layout: ResourceLayout) -> ShaderResult<Arc<ShaderProgram>> {
        if let Some(existing) = self.shader(name) {
            return Ok(existing);
        }

        let program = ShaderProgram::load(self, name, local_path, &self.default_domain(), layout)?;
        let registered = self.shader_library().register(name, program);
        match registered {
            Ok(program) => Ok(program),
            Err((existing, duplicate)) => {
                duplicate.release(self);
                Ok(existing)
            }
        }
    }

    /// Registered program
    pub fn shader(&self, name: &str) -> Option<Arc<ShaderProgram>> {
        self.shader_library().get(name)
    }

    /// Load `local_path` from the default domain and register it as `name`.
    ///
    /// Returns the registered texture if `name` is already loaded.
    pub fn load_texture(&self, name: &str, local_path: &str) -> TextureResult<Arc<GpuTexture>> {
        if let Some(existing) = self.texture(name) {
            return Ok(existing);
        }

        let texture = GpuTexture::load(self, name, local_path, &self.default_domain())?;
        let registered = self.texture_library().register(name, texture);
        match registered {
            Ok(texture) => Ok(texture),
            Err((existing, duplicate)) => {
                duplicate.release(self.device.as_ref());
                Ok(existing)
            }
        }
    }

    /// Registered texture
    pub fn texture(&self, name: &str) -> Option<Arc<GpuTexture>> {
        self.texture_library().get(name)
    }

    /// Release every library resource. Later calls do nothing.
    pub fn clean_up(&self) {
        if self.cleaned_up.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.device.wait_idle() {
            log::warn!("Device did not go idle before clean up: {}", e);
        }

        let mut shaders = std::mem::replace(&mut *self.shader_library(), Library::new("shader"));
        shaders.clean_up(|_, program| program.release(self));
        self.texture_library()
            .clean_up(|_, texture| texture.release(self.device.as_ref()));

        let retired = std::mem::take(&mut *self.retired());
        for program in retired.shaders {
            program.release(self);
        }
        for texture in retired.textures {
            texture.release(self.device.as_ref());
        }
        log::info!("Engine context cleaned up");
    }

    /// Whether [`EngineContext::clean_up`] has run
    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::headless_engine;

    #[test]
    fn default_domain_comes_from_settings() {
        let (_device, engine) = headless_engine();
        assert_eq!(engine.default_domain(), "lumen");

        engine.settings_mut().set(keys::DEFAULT_DOMAIN, "mods".to_string());
        assert_eq!(engine.default_domain(), "mods");

        engine.settings_mut().set(keys::DEFAULT_DOMAIN, 42_u32);
        assert_eq!(engine.default_domain(), "lumen");
    }

    #[test]
    fn libraries_load_once_and_release_on_clean_up() {
        let (device, engine) = headless_engine();
        let first = engine
            .load_shader("default", "Shader/Default", ResourceLayout::textured())
            .unwrap();
        let second = engine
            .load_shader("default", "Shader/Default", ResourceLayout::textured())
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        engine.load_texture("test", "Texture/Test").unwrap();
        assert_eq!(device.live_resources(), (1, 0, 1));

        engine.clean_up();
        engine.clean_up();
        assert!(engine.is_cleaned_up());
        assert_eq!(device.live_resources(), (0, 0, 0));
        assert!(engine.shader("default").is_none());
        assert!(engine.descriptors().is_empty());
    }

    #[test]
    fn unregistering_releases_unused_resources() {
        let (device, engine) = headless_engine();
        engine
            .load_shader("default", "Shader/Default", ResourceLayout::textured())
            .unwrap();
        engine.load_texture("test", "Texture/Test").unwrap();
        assert_eq!(device.live_resources(), (1, 0, 1));

        assert!(engine.unregister_texture("test"));
        assert!(!engine.unregister_texture("test"));
        assert!(engine.texture("test").is_none());
        assert_eq!(device.live_resources(), (1, 0, 0));

        assert!(engine.unregister_shader("default"));
        assert_eq!(device.live_resources(), (0, 0, 0));
        assert!(engine.descriptors().is_empty());
    }

    #[test]
    fn unregistered_shader_stays_alive_while_a_node_binds_it() {
        use crate::render::mesh::{spawn_textured_mesh, Mesh};
        use crate::scene::graph::SceneGraph;

        let (device, engine) = headless_engine();
        let shader = engine
            .load_shader("default", "Shader/Default", ResourceLayout::textured())
            .unwrap();
        let texture = engine.load_texture("test", "Texture/Test").unwrap();
        let mut scene = SceneGraph::new(engine.clone());
        let id = spawn_textured_mesh(&mut scene, "quad", shader, texture, Mesh::quad()).unwrap();

        assert!(engine.unregister_shader("default"));
        assert!(engine.shader("default").is_none());
        assert_eq!(device.live_resources().0, 1);

        scene.destroy_node(id).unwrap();
        assert!(engine.unregister_texture("test"));
        assert_eq!(device.live_resources(), (0, 0, 0));
    }

    #[test]
    fn clean_up_releases_retired_resources() {
        let (device, engine) = headless_engine();
        let shader = engine
            .load_shader("default", "Shader/Default", ResourceLayout::textured())
            .unwrap();
        assert!(engine.unregister_shader("default"));
        assert_eq!(device.live_resources().0, 1);

        drop(shader);
        engine.clean_up();
        assert_eq!(device.live_resources(), (0, 0, 0));
    }
}
