//! # Engine Configuration
//!
//! Startup configuration for the window, the frame pipeline and asset
//! lookup. Config files may be TOML or RON; the format is picked from the
//! file extension.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::foundation::version::Version;

/// Load/save support shared by every config struct.
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from a `.toml` or `.ron` file
    fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
            ConfigFormat::Ron => ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
        }
    }

    /// Save configuration to a `.toml` or `.ron` file
    fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => {
                toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
            }
            ConfigFormat::Ron => ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?,
        };

        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Toml,
    Ron,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("ron") => Ok(Self::Ron),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value failed validation
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Application metadata passed to the graphics device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Human readable application name
    pub name: String,
    /// Application version
    pub version: Version,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Lumen*".to_string(),
            version: Version::new(0, 0, 9),
        }
    }
}

/// Window creation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial client width in pixels
    pub width: u32,
    /// Initial client height in pixels
    pub height: u32,
    /// Allow the user to resize the window
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Lumen".to_string(),
            width: 750,
            height: 450,
            resizable: true,
        }
    }
}

impl WindowConfig {
    /// Set window title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set initial client size
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// Frame pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Number of rotating frame slots requested from the surface
    pub frames_in_flight: usize,
    /// Color the target is cleared to at the start of each frame
    pub clear_color: [f32; 4],
    /// Depth clear value
    pub clear_depth: f32,
    /// Wait for vertical blank when presenting
    pub vsync: bool,
    /// Enable device validation layers, `None` means "debug builds only"
    pub enable_validation: Option<bool>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            clear_color: [0.0, 0.45, 0.75, 1.0],
            clear_depth: 1.0,
            vsync: true,
            enable_validation: None,
        }
    }
}

impl RendererConfig {
    /// Set number of frame slots
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Set clear color
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }
}

/// Asset lookup configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Root directory all asset domains live under
    pub root: String,
    /// Domain used when a caller does not name one
    pub default_domain: String,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            root: "assets".to_string(),
            default_domain: "lumen".to_string(),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Application metadata
    pub application: ApplicationConfig,
    /// Window parameters
    pub window: WindowConfig,
    /// Frame pipeline parameters
    pub renderer: RendererConfig,
    /// Asset lookup
    pub assets: AssetConfig,
}

impl Config for EngineConfig {}

impl EngineConfig {
    /// Set window configuration
    pub fn with_window(mut self, window: WindowConfig) -> Self {
        self.window = window;
        self
    }

    /// Set renderer configuration
    pub fn with_renderer(mut self, renderer: RendererConfig) -> Self {
        self.renderer = renderer;
        self
    }

    /// Set asset configuration
    pub fn with_assets(mut self, assets: AssetConfig) -> Self {
        self.assets = assets;
        self
    }

    /// Check values that would otherwise fail deep inside startup
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.renderer.frames_in_flight == 0 {
            return Err(ConfigError::Invalid("frames_in_flight must be at least 1".to_string()));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "window size {}x{} has zero area",
                self.window.width, self.window.height
            )));
        }
        if self.assets.default_domain.is_empty() {
            return Err(ConfigError::Invalid("default asset domain is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("lumen_config_{}_{}", std::process::id(), name))
    }

    #[test]
    fn defaults_match_startup_parameters() {
        let config = EngineConfig::default();
        assert_eq!(config.renderer.frames_in_flight, 2);
        assert_eq!((config.window.width, config.window.height), (750, 450));
        assert_eq!(config.application.version.to_string(), "0.0.9");
        assert_eq!(config.assets.default_domain, "lumen");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_and_ron_round_trip_through_files() {
        let config = EngineConfig::default()
            .with_window(WindowConfig::default().with_title("round trip").with_size(800, 600))
            .with_renderer(RendererConfig::default().with_clear_color([1.0, 0.0, 0.0, 1.0]));

        for name in ["engine.toml", "engine.ron"] {
            let path = scratch_path(name);
            config.save_to_file(&path).unwrap();
            let loaded = EngineConfig::load_from_file(&path).unwrap();
            std::fs::remove_file(&path).ok();
            assert_eq!(loaded, config);
        }
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config: EngineConfig = toml::from_str("[window]\ntitle = \"partial\"\nwidth = 640\nheight = 480\nresizable = false\n").unwrap();
        assert_eq!(config.window.width, 640);
        assert_eq!(config.renderer, RendererConfig::default());
        assert_eq!(config.assets.root, "assets");
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = EngineConfig::default().save_to_file(scratch_path("engine.json")).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }

    #[test]
    fn zero_frames_fails_validation() {
        let config = EngineConfig::default().with_renderer(RendererConfig::default().with_frames_in_flight(0));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
