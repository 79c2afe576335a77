//! # beacon-logging
//!
//! Installs the process-wide `tracing` subscriber.
//!
//! The filter comes from `RUST_LOG` when set, otherwise from the configured
//! level plus any per-module directives. Output is either human-readable or
//! one JSON object per event. A panic hook routes panics through `tracing` so
//! they land in the same stream as everything else.

#![deny(unsafe_code)]

use beacon_settings::{LogFormat, LoggingSettings};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Errors from subscriber installation.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The configured filter directive did not parse.
    #[error("invalid log filter '{directive}': {reason}")]
    Filter {
        /// The directive that was rejected.
        directive: String,
        /// Parser message.
        reason: String,
    },
    /// A global subscriber was already installed.
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Subscriber configuration.
#[derive(Clone, Debug, Default)]
pub struct LoggingConfig {
    /// Default level, e.g. `info`.
    pub level: String,
    /// Per-module overrides, e.g. `("beacon_server", "debug")`.
    pub module_levels: Vec<(String, String)>,
    /// Output format.
    pub format: LogFormat,
}

impl From<&LoggingSettings> for LoggingConfig {
    fn from(settings: &LoggingSettings) -> Self {
        Self {
            level: settings.level.clone(),
            module_levels: Vec::new(),
            format: settings.format,
        }
    }
}

impl LoggingConfig {
    /// Add a per-module override.
    #[must_use]
    pub fn with_module_level(mut self, module: impl Into<String>, level: impl Into<String>) -> Self {
        self.module_levels.push((module.into(), level.into()));
        self
    }
}

/// Render the filter directive for a config.
pub fn build_filter(config: &LoggingConfig) -> String {
    let mut filter = if config.level.trim().is_empty() {
        "info".to_string()
    } else {
        config.level.trim().to_lowercase()
    };
    for (module, level) in &config.module_levels {
        filter.push(',');
        filter.push_str(module);
        filter.push('=');
        filter.push_str(&level.to_lowercase());
    }
    filter
}

fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = build_filter(config);
    EnvFilter::try_new(&directive).map_err(|e| LoggingError::Filter {
        directive,
        reason: e.to_string(),
    })
}

/// Install the global subscriber. Call once at startup.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = env_filter(config)?;

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    install_panic_hook();
    Ok(())
}

/// Log panics through `tracing` before running the default hook.
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<non-string panic payload>".to_string());
        tracing::error!(%location, %payload, "panic");
        default_hook(info);
    }));
}
