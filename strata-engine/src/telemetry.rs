//! Tracing subscriber initialization
//!
//! Library crates only emit `tracing` events. Binaries and hosts that want
//! them printed call [`init_tracing`] once at startup.

use strata_core::{ConfigError, StrataResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "strata=info";

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" | "text" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives
    pub filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: DEFAULT_FILTER.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Read `STRATA_LOG_FORMAT` (`json` or `pretty`) and `RUST_LOG`.
    pub fn from_env() -> Self {
        Self::from_values(
            std::env::var("STRATA_LOG_FORMAT").ok().as_deref(),
            std::env::var("RUST_LOG").ok(),
        )
    }

    fn from_values(format: Option<&str>, filter: Option<String>) -> Self {
        let format = match format {
            Some(value) => LogFormat::parse(value).unwrap_or_else(|| {
                eprintln!("Unknown STRATA_LOG_FORMAT {:?}, using pretty", value);
                LogFormat::Pretty
            }),
            None => LogFormat::Pretty,
        };
        Self {
            format,
            filter: filter
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FILTER.to_string()),
        }
    }
}

/// Install the global subscriber.
///
/// Fails if a global subscriber is already set; callers that may run twice
/// (tests, embedded hosts) can ignore the error.
pub fn init_tracing(config: &TelemetryConfig) -> StrataResult<()> {
    let env_filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|e| {
        eprintln!("Invalid log filter {:?} ({}), using {}", config.filter, e, DEFAULT_FILTER);
        EnvFilter::new(DEFAULT_FILTER)
    });

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    result.map_err(|e| ConfigError::InvalidValue {
        field: "tracing".to_string(),
        value: format!("{:?}", config.format),
        reason: format!("Failed to init subscriber: {}", e),
    })?;

    tracing::debug!(format = ?config.format, filter = %config.filter, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TelemetryConfig::from_values(None, None);
        assert_eq!(config, TelemetryConfig::default());
        assert_eq!(config.filter, "strata=info");
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(TelemetryConfig::from_values(Some("JSON"), None).format, LogFormat::Json);
        assert_eq!(TelemetryConfig::from_values(Some("pretty"), None).format, LogFormat::Pretty);
        assert_eq!(TelemetryConfig::from_values(Some("xml"), None).format, LogFormat::Pretty);
    }

    #[test]
    fn test_filter_override() {
        let config = TelemetryConfig::from_values(None, Some("strata_gate=debug".to_string()));
        assert_eq!(config.filter, "strata_gate=debug");
        let blank = TelemetryConfig::from_values(None, Some("  ".to_string()));
        assert_eq!(blank.filter, DEFAULT_FILTER);
    }

    #[test]
    fn test_second_init_fails() {
        let config = TelemetryConfig::default();
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
