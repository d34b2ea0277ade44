//! Typed key/value store for runtime settings.
//!
//! Values are stored type-erased; reading a key back with a different type
//! than it was stored with is an error, while reading a missing key yields
//! the type's default.

use std::any::{type_name, Any};
use std::collections::HashMap;

use thiserror::Error;

use super::config::EngineConfig;
use crate::foundation::version::Version;

/// Well-known setting keys populated at startup
pub mod keys {
    /// `String`: application name
    pub const DEFAULT_APPLICATION_NAME: &str = "default_application_name";
    /// `Version`: application version
    pub const DEFAULT_APPLICATION_VERSION: &str = "default_application_version";
    /// `(u32, u32)`: initial client dimensions
    pub const DEFAULT_WINDOW_DIMENSIONS: &str = "default_window_dimensions";
    /// `String`: asset domain used when none is given
    pub const DEFAULT_DOMAIN: &str = "default_domain";
}

/// Settings errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    /// Key exists but holds a value of another type
    #[error("setting '{key}' is not a {requested}")]
    TypeMismatch {
        /// Offending key
        key: String,
        /// Type the caller asked for
        requested: &'static str,
    },
}

struct Entry {
    value: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// Runtime settings store
#[derive(Default)]
pub struct Settings {
    entries: HashMap<String, Entry>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (key, entry) in &self.entries {
            map.entry(key, &entry.type_name);
        }
        map.finish()
    }
}

impl Settings {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the startup keys filled from `config`
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut settings = Self::new();
        settings.set(keys::DEFAULT_APPLICATION_NAME, config.application.name.clone());
        settings.set(keys::DEFAULT_APPLICATION_VERSION, config.application.version);
        settings.set(keys::DEFAULT_WINDOW_DIMENSIONS, (config.window.width, config.window.height));
        settings.set(keys::DEFAULT_DOMAIN, config.assets.default_domain.clone());
        settings
    }

    /// Store `value` under `key`, replacing any previous value of any type
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(
            key.into(),
            Entry {
                value: Box::new(value),
                type_name: type_name::<T>(),
            },
        );
    }

    /// Read `key` as `T`, or `T::default()` when the key is absent
    pub fn get<T: Any + Clone + Default>(&self, key: &str) -> Result<T, SettingsError> {
        match self.entries.get(key) {
            None => Ok(T::default()),
            Some(entry) => entry
                .value
                .downcast_ref::<T>()
                .cloned()
                .ok_or_else(|| SettingsError::TypeMismatch {
                    key: key.to_string(),
                    requested: type_name::<T>(),
                }),
        }
    }

    /// Whether `key` has been set
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove `key`, returning whether it existed
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Application version, falling back to [`Version::DEFAULT`]
    pub fn application_version(&self) -> Version {
        if self.contains(keys::DEFAULT_APPLICATION_VERSION) {
            self.get(keys::DEFAULT_APPLICATION_VERSION).unwrap_or(Version::DEFAULT)
        } else {
            Version::DEFAULT
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_yields_default() {
        let settings = Settings::new();
        assert_eq!(settings.get::<u32>("absent"), Ok(0));
        assert_eq!(settings.get::<String>("absent"), Ok(String::new()));
    }

    #[test]
    fn wrong_type_is_a_mismatch() {
        let mut settings = Settings::new();
        settings.set("fov", 60.0_f32);
        assert_eq!(settings.get::<f32>("fov"), Ok(60.0));
        assert!(matches!(
            settings.get::<u32>("fov"),
            Err(SettingsError::TypeMismatch { ref key, .. }) if key == "fov"
        ));
    }

    #[test]
    fn startup_keys_come_from_config() {
        let settings = Settings::from_config(&EngineConfig::default());
        assert_eq!(settings.get::<String>(keys::DEFAULT_APPLICATION_NAME).unwrap(), "Lumen*");
        assert_eq!(settings.get::<(u32, u32)>(keys::DEFAULT_WINDOW_DIMENSIONS).unwrap(), (750, 450));
        assert_eq!(settings.get::<String>(keys::DEFAULT_DOMAIN).unwrap(), "lumen");
        assert_eq!(settings.application_version(), Version::new(0, 0, 9));
    }

    #[test]
    fn set_replaces_value_and_type() {
        let mut settings = Settings::new();
        settings.set("k", 1_i32);
        settings.set("k", "text".to_string());
        assert_eq!(settings.get::<String>("k").unwrap(), "text");
        assert!(settings.remove("k"));
        assert!(!settings.contains("k"));
    }
}
