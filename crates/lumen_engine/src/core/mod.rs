//! Configuration, runtime settings, shared engine services and the fatal
//! error path.

pub mod config;
pub mod context;
pub mod fatal;
pub mod settings;

pub use config::{ApplicationConfig, AssetConfig, Config, ConfigError, EngineConfig, RendererConfig, WindowConfig};
pub use context::EngineContext;
pub use settings::{Settings, SettingsError};
