//! Logging setup for the sqlpush binary
//!
//! Progress and diagnostics go through `tracing`; the subscriber writes to
//! stderr so that stdout only carries command output (summaries, JSON
//! reports, statement listings).

use std::fmt;
use std::io;
use std::str::FromStr;

use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ConfigError;
use crate::error::{CoreError, CoreResult};

/// Output format of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::invalid_value("log_format", s, "text or json")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    pub format: LogFormat,
    /// Include file and line number information
    pub include_location: bool,
    /// Include the event target (module path)
    pub include_target: bool,
    /// Environment filter (supports complex filters like "sqlpush=debug,sqlx=warn")
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            include_location: false,
            include_target: false,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    /// Debug output for our crates, sqlx kept at warn
    pub fn verbose() -> Self {
        Self {
            level: "debug".to_string(),
            format: LogFormat::Text,
            include_location: true,
            include_target: true,
            env_filter: Some(
                "sqlpush=debug,sqlpush_core=debug,sqlpush_migrate=debug,sqlx=warn".to_string(),
            ),
        }
    }

    /// Machine readable output
    pub fn json() -> Self {
        Self {
            format: LogFormat::Json,
            include_target: true,
            ..Self::default()
        }
    }

    pub fn with_level<S: Into<String>>(mut self, level: S) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set environment filter
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Filter directive used when `RUST_LOG` is not set
    pub fn directive(&self) -> &str {
        self.env_filter.as_deref().unwrap_or(&self.level)
    }
}

/// Initialize logging. `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> CoreResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directive()))
        .map_err(|e| CoreError::logging(format!("invalid log filter: {}", e)))?;

    let layer = Layer::new()
        .with_writer(io::stderr)
        .with_target(config.include_target)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init(),
    };
    result.map_err(|e| CoreError::logging(e.to_string()))?;

    tracing::debug!(
        target: "sqlpush::logging",
        "Logging initialized (level: {}, format: {})",
        config.directive(),
        config.format
    );
    Ok(())
}
