//! Logging setup shared by the binaries.
//!
//! Logs go to stderr so that entity output on stdout stays machine readable.
//! `RUST_LOG` overrides the default level when set.

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("failed to parse env filter: {0}")]
    EnvFilter(#[from] tracing_subscriber::filter::ParseError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level for this workspace's crates when `RUST_LOG` is not set.
    pub default_level: Level,
    pub format: LogFormat,
    pub include_target: bool,
    /// Explicit filter directive; wins over both `RUST_LOG` and `default_level`.
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_level: Level::INFO,
            format: LogFormat::Compact,
            include_target: false,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    #[must_use]
    pub fn verbose() -> Self {
        Self {
            default_level: Level::DEBUG,
            include_target: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    fn filter(&self) -> Result<EnvFilter, LoggingError> {
        if let Some(directive) = &self.env_filter {
            return Ok(EnvFilter::try_new(directive)?);
        }
        Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = self.default_level;
            EnvFilter::new(format!("sensors={level},sensors_core={level}"))
        }))
    }
}

/// Install the global subscriber. Call once, early in `main`.
pub fn init_tracing(config: LoggingConfig) -> Result<(), LoggingError> {
    let filter = config.filter()?;

    match config.format {
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(config.include_target);
            tracing::subscriber::set_global_default(tracing_subscriber::registry().with(filter).with(layer))?;
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_target(config.include_target);
            tracing::subscriber::set_global_default(tracing_subscriber::registry().with(filter).with(layer))?;
        }
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(config.include_target);
            tracing::subscriber::set_global_default(tracing_subscriber::registry().with(filter).with(layer))?;
        }
    }

    Ok(())
}
