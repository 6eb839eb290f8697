//! Tracing subscriber setup.
//!
//! The engine only emits `tracing` events; hosts that already install a
//! subscriber can skip this module entirely.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "canopy_engine=debug,canopy_storage=debug,info";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Line format
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "canopy-engine".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl TelemetryConfig {
    /// Read `CANOPY_SERVICE_NAME` and `CANOPY_LOG_FORMAT` (`json` or `pretty`).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let format = match std::env::var("CANOPY_LOG_FORMAT")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str()
        {
            "pretty" | "text" => LogFormat::Pretty,
            _ => defaults.format,
        };
        Self {
            service_name: std::env::var("CANOPY_SERVICE_NAME").unwrap_or(defaults.service_name),
            format,
        }
    }
}

/// Error returned when a global subscriber is already installed.
#[derive(Debug, thiserror::Error)]
#[error("Failed to init subscriber: {0}")]
pub struct TelemetryError(String);

/// Install the global tracing subscriber.
///
/// Call once at startup. A second call returns an error and leaves the first
/// subscriber in place.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    result.map_err(|e| TelemetryError(e.to_string()))?;

    tracing::info!(
        service_name = config.service_name,
        format = ?config.format,
        "Telemetry initialized"
    );

    Ok(())
}
