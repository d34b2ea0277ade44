//! Engine facade: startup ordering and the main loop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::assets::LoadError;
use crate::core::config::{ConfigError, EngineConfig};
use crate::core::context::EngineContext;
use crate::core::fatal;
use crate::core::settings::SettingsError;
use crate::render::descriptor::DescriptorError;
use crate::render::device::{DeviceError, Extent, GpuDevice};
use crate::render::dispatch::{DispatchError, FrameStats, RenderDispatch};
use crate::render::frame::FrameError;
use crate::render::shader::ShaderError;
use crate::render::texture::TextureError;
use crate::scene::behavior::BehaviorError;
use crate::scene::graph::{SceneError, SceneGraph};
use crate::window::{TickRegistry, UpdateLoop, WindowHost};

/// Top-level engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Settings read with the wrong type
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Frame pipeline failure
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Scene failure
    #[error("scene error: {0}")]
    Scene(#[from] SceneError),

    /// Behavior failure outside the scene
    #[error(transparent)]
    Behavior(#[from] BehaviorError),

    /// Shader failure
    #[error("shader error: {0}")]
    Shader(#[from] ShaderError),

    /// Texture failure
    #[error("texture error: {0}")]
    Texture(#[from] TextureError),

    /// Asset loading failure
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Resource table failure
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// Device failure
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// `run` needs a window
    #[error("no window to run in")]
    NoWindow,

    /// Update thread could not be spawned
    #[error("failed to start update thread: {0}")]
    UpdateThread(#[from] std::io::Error),
}

impl From<DispatchError> for EngineError {
    fn from(error: DispatchError) -> Self {
        match error {
            DispatchError::Frame(e) => Self::Frame(e),
            DispatchError::Scene(e) => Self::Scene(e),
        }
    }
}

impl EngineError {
    /// Whether the engine cannot continue.
    ///
    /// Device failures and configuration errors (a behavior missing its
    /// siblings, a required shader stage) are fatal. Lookups that found
    /// nothing and asset loads are recoverable.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Settings(_)
            | Self::Load(_)
            | Self::Texture(TextureError::Load(_) | TextureError::NotFound(_))
            | Self::Shader(ShaderError::NotFound(_)) => false,
            Self::Scene(e) => matches!(e, SceneError::Behavior { .. }),
            _ => true,
        }
    }
}

/// Engine result alias
pub type EngineResult<T> = Result<T, EngineError>;

/// Owns the engine context, the scene and the render dispatch
pub struct Engine {
    config: EngineConfig,
    context: Arc<EngineContext>,
    scene: Arc<Mutex<SceneGraph>>,
    dispatch: RenderDispatch,
    window: Option<Box<dyn WindowHost>>,
    ticks: Arc<TickRegistry>,
    update_loop: Option<UpdateLoop>,
    update_failure: Arc<Mutex<Option<SceneError>>>,
    cleaned_up: bool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("application", &self.config.application.name)
            .field("dispatch", &self.dispatch)
            .field("has_window", &self.window.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine loading assets from `config.assets.root`
    pub fn new(
        config: EngineConfig,
        device: Arc<dyn GpuDevice>,
        window: Option<Box<dyn WindowHost>>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let context = Arc::new(EngineContext::with_file_loaders(device, &config));
        Self::with_context(config, context, window)
    }

    /// Engine over an existing context
    pub fn with_context(
        config: EngineConfig,
        context: Arc<EngineContext>,
        window: Option<Box<dyn WindowHost>>,
    ) -> EngineResult<Self> {
        config.validate()?;
        log::info!(
            "Starting {} {}",
            config.application.name,
            context.settings().application_version()
        );

        let dispatch = RenderDispatch::new(context.device().clone(), &config.renderer)?;
        let scene = Arc::new(Mutex::new(SceneGraph::new(context.clone())));

        Ok(Self {
            config,
            context,
            scene,
            dispatch,
            window,
            ticks: Arc::new(TickRegistry::new()),
            update_loop: None,
            update_failure: Arc::new(Mutex::new(None)),
            cleaned_up: false,
        })
    }

    /// Configuration the engine started with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared engine services
    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    /// Shared scene graph
    pub fn scene(&self) -> Arc<Mutex<SceneGraph>> {
        self.scene.clone()
    }

    /// Lock the scene graph
    pub fn lock_scene(&self) -> MutexGuard<'_, SceneGraph> {
        self.scene.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Per-tick callbacks run by the update thread
    pub fn ticks(&self) -> &Arc<TickRegistry> {
        &self.ticks
    }

    /// Run scene behaviors once on the calling thread
    pub fn update(&self, delta_seconds: f32) -> EngineResult<()> {
        self.lock_scene().update(delta_seconds)?;
        Ok(())
    }

    /// Record, submit and present one frame
    pub fn render(&mut self) -> EngineResult<FrameStats> {
        Ok(self.dispatch.tick(&self.scene)?)
    }

    /// Rebuild the surface at `extent`; zero-area sizes are ignored
    pub fn resize(&mut self, extent: Extent) -> EngineResult<bool> {
        Ok(self.dispatch.resize(extent)?)
    }

    /// Start the update thread, which updates the scene every tick.
    ///
    /// Does nothing when it is already running. The first scene failure
    /// stops scene updates and is reported by [`Engine::check_update_thread`].
    pub fn start_update_thread(&mut self) -> EngineResult<()> {
        if self.update_loop.is_some() {
            return Ok(());
        }

        let scene = self.scene.clone();
        let failure = self.update_failure.clone();
        self.ticks.add_update_function(move |delta_seconds| {
            // Never hold `failure` while taking the scene lock
            if failure.lock().unwrap_or_else(PoisonError::into_inner).is_some() {
                return;
            }
            let result = scene
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .update(delta_seconds);
            if let Err(e) = result {
                log::error!("Scene update failed: {}", e);
                failure
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get_or_insert(e);
            }
        });

        self.update_loop = Some(UpdateLoop::start(self.ticks.clone(), UpdateLoop::DEFAULT_INTERVAL)?);
        Ok(())
    }

    /// Error raised on the update thread, if any
    pub fn check_update_thread(&self) -> EngineResult<()> {
        match self
            .update_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn stop_update_thread(&mut self) {
        if let Some(mut update_loop) = self.update_loop.take() {
            update_loop.stop();
        }
    }

    /// Render frames until the window closes, returning how many were drawn.
    ///
    /// Recoverable errors are logged and the loop continues; the first fatal
    /// error is returned.
    pub fn run_frames(&mut self) -> EngineResult<u64> {
        if self.window.is_none() {
            return Err(EngineError::NoWindow);
        }
        self.start_update_thread()?;

        let mut frames = 0;
        loop {
            let Some(window) = self.window.as_mut() else {
                return Err(EngineError::NoWindow);
            };
            if window.should_close() {
                break;
            }
            window.poll_events();
            let resized = window.take_resize();
            let minimized = window.client_dimensions().is_empty();

            self.check_update_thread()?;
            let result = match resized {
                Some(extent) => self.resize(extent).map(|_| ()),
                None => Ok(()),
            }
            .and_then(|()| if minimized { Ok(()) } else { self.render().map(|_| ()) });

            match result {
                Ok(()) if !minimized => frames += 1,
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => log::warn!("Frame skipped: {}", e),
            }
        }

        self.stop_update_thread();
        log::info!("Main loop finished after {} frames", frames);
        Ok(frames)
    }

    /// Run until the window closes, then clean up.
    ///
    /// A fatal error is logged with its cause chain and ends the process.
    pub fn run(&mut self) {
        if let Err(e) = self.run_frames() {
            self.stop_update_thread();
            fatal::abort_with_diagnostic(&e);
        }
        self.clean_up();
    }

    /// Stop the update thread, drain the device and release every resource.
    /// Later calls do nothing.
    pub fn clean_up(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        self.stop_update_thread();

        if let Err(e) = self.dispatch.clean_up() {
            log::error!("Frame pipeline clean up failed: {}", e);
        }
        self.lock_scene().clean_up();
        self.context.clean_up();
        log::info!("Engine shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.clean_up();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::descriptor::ResourceLayout;
    use crate::render::headless::{DeviceEvent, HeadlessDevice};
    use crate::render::mesh::{spawn_textured_mesh, Mesh};
    use crate::scene::behavior::{Behavior, BehaviorResult, UpdateContext};
    use crate::test_support::headless_engine;
    use crate::window::HeadlessWindow;
    use std::time::{Duration, Instant};

    fn engine(window: Option<HeadlessWindow>) -> (Arc<HeadlessDevice>, Engine) {
        let (device, context) = headless_engine();
        let window = window.map(|w| Box::new(w) as Box<dyn WindowHost>);
        let engine = Engine::with_context(EngineConfig::default(), context, window).unwrap();
        (device, engine)
    }

    fn add_quad(engine: &Engine) {
        let shader = engine
            .context()
            .load_shader("default", "Shader/Default", ResourceLayout::textured())
            .unwrap();
        let texture = engine.context().load_texture("test", "Texture/Test").unwrap();
        spawn_textured_mesh(&mut engine.lock_scene(), "quad", shader, texture, Mesh::quad()).unwrap();
    }

    #[test]
    fn run_frames_renders_until_the_window_closes() {
        let window = HeadlessWindow::new(Extent::new(750, 450))
            .closing_after(4)
            .resize_at(2, Extent::new(0, 0))
            .resize_at(3, Extent::new(320, 200));
        let (device, mut engine) = engine(Some(window));
        add_quad(&engine);

        assert_eq!(engine.run_frames().unwrap(), 3);
        let events = device.events();
        assert!(events.contains(&DeviceEvent::TargetsRecreated(Extent::new(320, 200))));
        assert!(!events.contains(&DeviceEvent::TargetsRecreated(Extent::new(0, 0))));

        engine.clean_up();
        assert_eq!(device.live_resources(), (0, 0, 0));
        assert!(engine.lock_scene().is_empty());
    }

    #[test]
    fn run_without_window_is_an_error() {
        let (_device, mut engine) = engine(None);
        assert!(matches!(engine.run_frames(), Err(EngineError::NoWindow)));
    }

    #[test]
    fn device_loss_is_fatal() {
        let (device, mut engine) = engine(Some(HeadlessWindow::new(Extent::new(10, 10)).closing_after(5)));
        device.simulate_device_loss("removed");
        let err = engine.run_frames().unwrap_err();
        assert!(matches!(err, EngineError::Frame(FrameError::DeviceLost(_))));
        assert!(err.is_fatal());
    }

    #[test]
    fn error_classification() {
        assert!(!EngineError::from(SceneError::NameNotFound("x".into())).is_fatal());
        assert!(!EngineError::from(LoadError::NotFound("x".into())).is_fatal());
        assert!(EngineError::from(ShaderError::RequiredStageMissing {
            shader: "s".into(),
            stage: crate::render::shader::ShaderStage::Pixel,
        })
        .is_fatal());
        assert!(EngineError::from(SceneError::Behavior {
            node: "n".into(),
            source: BehaviorError::NotInitialized("Mesh"),
        })
        .is_fatal());
    }

    struct Failing;

    impl Behavior for Failing {
        fn update(&mut self, _ctx: &mut UpdateContext<'_>) -> BehaviorResult<()> {
            Err(BehaviorError::NotInitialized("Failing"))
        }
    }

    #[test]
    fn update_thread_failures_are_reported() {
        let (_device, mut engine) = engine(None);
        {
            let mut scene = engine.lock_scene();
            let id = scene.create_node("bad").unwrap();
            scene.add_behavior(id, Failing).unwrap();
        }
        engine.start_update_thread().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.check_update_thread().is_ok() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let err = engine.check_update_thread().unwrap_err();
        assert!(err.is_fatal());
        engine.clean_up();
    }

    #[test]
    fn checking_the_update_thread_while_holding_the_scene_does_not_block() {
        let (_device, mut engine) = engine(None);
        {
            let mut scene = engine.lock_scene();
            let id = scene.create_node("spinning").unwrap();
            scene.rotate(id, crate::foundation::math::Vec3::new(0.0, 0.0, 1.0)).unwrap();
        }
        engine.start_update_thread().unwrap();

        // A deadlock cannot be unwound from the test thread, so a watchdog
        // ends the process instead of letting the run hang.
        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let watchdog = {
            let finished = finished.clone();
            std::thread::spawn(move || {
                let deadline = Instant::now() + Duration::from_secs(10);
                while !finished.load(std::sync::atomic::Ordering::SeqCst) {
                    if Instant::now() > deadline {
                        eprintln!("scene holder blocked on the update thread");
                        std::process::abort();
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
            })
        };

        for _ in 0..50 {
            let _scene = engine.lock_scene();
            std::thread::sleep(Duration::from_millis(20));
            engine.check_update_thread().unwrap();
        }
        finished.store(true, std::sync::atomic::Ordering::SeqCst);
        watchdog.join().unwrap();
        engine.clean_up();
    }
}
