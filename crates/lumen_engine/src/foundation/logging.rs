//! Logging setup on top of the `log` facade.

use std::sync::Once;

pub use log::{debug, error, info, trace, warn};

/// Logger configuration.
///
/// `filter` uses the `env_logger` filter syntax (for example
/// `"info"` or `"lumen_engine=debug"`). When it is `None` the `RUST_LOG`
/// environment variable is consulted, falling back to `info`.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Explicit filter directives
    pub filter: Option<String>,
    /// ANSI coloring behavior
    pub write_style: env_logger::WriteStyle,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            write_style: env_logger::WriteStyle::Auto,
        }
    }
}

impl LoggingConfig {
    /// Use the given filter directives
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

static INIT: Once = Once::new();

/// Initialize the global logger. Later calls are ignored.
pub fn init(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        if let Some(filter) = config.filter {
            builder.parse_filters(&filter);
        } else if let Ok(filter) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filter);
        } else {
            builder.filter_level(log::LevelFilter::Info);
        }

        builder.write_style(config.write_style);

        // try_init: a test harness may already have installed a logger
        if builder.try_init().is_ok() {
            log::debug!("logging initialized");
        }
    });
}
