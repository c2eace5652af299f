//! Structured logging bootstrap for the knowledge-base grounding engine.
//!
//! Hosts call [`init_telemetry`] once at startup. Tests call
//! [`init_test_telemetry`], which is idempotent and routes output through the
//! test harness writer.
//!
//! ```rust,ignore
//! use kb_telemetry::{LogFormat, TelemetryConfig, init_telemetry};
//!
//! init_telemetry(&TelemetryConfig {
//!     service_name: "proposal-api".into(),
//!     filter: "info,kb_rag=debug".into(),
//!     format: LogFormat::Json,
//! })?;
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directive could not be parsed.
    #[error("invalid log filter '{directive}': {message}")]
    InvalidFilter {
        /// The directive that failed to parse.
        directive: String,
        /// Parser message.
        message: String,
    },

    /// A global subscriber was already installed for this process.
    #[error("telemetry already initialized: {0}")]
    AlreadyInitialized(String),

    /// The requested log format name is unknown.
    #[error("unknown log format '{0}' (expected pretty, compact or json)")]
    UnknownFormat(String),
}

/// Output format of the fmt subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human readable output.
    Pretty,
    /// Single-line human readable output.
    #[default]
    Compact,
    /// One JSON object per event, for log shippers.
    Json,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(TelemetryError::UnknownFormat(s.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}

/// Settings for [`init_telemetry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Recorded on the startup event so shipped logs can be attributed.
    pub service_name: String,
    /// Default filter directive, used when `RUST_LOG` is not set.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "kb-rag".to_string(),
            filter: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Parse a filter directive such as `info,kb_rag=debug`.
pub fn parse_filter(directive: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(directive).map_err(|e| TelemetryError::InvalidFilter {
        directive: directive.to_string(),
        message: e.to_string(),
    })
}

/// Install the global fmt subscriber.
///
/// `RUST_LOG` takes precedence over `config.filter` when it is set.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidFilter`] for an unparsable directive and
/// [`TelemetryError::AlreadyInitialized`] when a global subscriber exists.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let directive = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| config.filter.clone());
    let filter = parse_filter(&directive)?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
    installed.map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;

    info!(
        service = %config.service_name,
        format = %config.format,
        filter = %directive,
        "telemetry initialized"
    );
    Ok(())
}

/// Install a debug-level subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_telemetry() {
    let filter = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "debug".to_string());
    let Ok(filter) = parse_filter(&filter) else {
        return;
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}
