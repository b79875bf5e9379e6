use thiserror::Error;

/// Validation failures for a platform's configuration section.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing required option '{0}'")]
    Missing(&'static str),

    #[error("Option '{option}' must not be empty")]
    Empty { option: &'static str },

    #[error("Invalid latitude {0}: must be between -90 and 90")]
    Latitude(f64),

    #[error("Invalid longitude {0}: must be between -180 and 180")]
    Longitude(f64),

    #[error("Invalid value '{value}' for '{option}'. Allowed values: {allowed}")]
    NotInSet {
        option: &'static str,
        value: String,
        allowed: String,
    },

    #[error("Option '{option}' is out of range ({min}..={max}): {value}")]
    OutOfRange {
        option: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
}

/// Reasons a platform refused to set up. Nothing is registered with the host
/// when one of these is returned.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Invalid {platform} configuration: {source}")]
    Config {
        platform: &'static str,
        #[source]
        source: ConfigError,
    },

    #[error("No [{0}] section configured.\nHint: run `sensors configure {0}` first.")]
    NotConfigured(&'static str),

    #[error("Error while connecting to {service}: {source:#}")]
    Connect {
        service: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl SetupError {
    pub fn config(platform: &'static str, source: ConfigError) -> Self {
        Self::Config { platform, source }
    }

    pub fn connect(service: &'static str, source: anyhow::Error) -> Self {
        Self::Connect { service, source }
    }

    /// Emit the error once, at the point setup gives up.
    pub fn logged(self) -> Self {
        tracing::error!("{self}");
        self
    }
}
