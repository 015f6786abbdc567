//! Tracing subscriber setup.
//!
//! The crate only emits `tracing` events. Applications that do not bring
//! their own subscriber can call [`init_logging`] once at startup.
//!
//! The filter is taken from `VOLTAGE_OPCUA_LOG`, then `RUST_LOG`, then the
//! mode's default level.

use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::error::{OpcUaError, Result};

/// Environment variable holding the filter directive.
pub const LOG_ENV: &str = "VOLTAGE_OPCUA_LOG";

/// Logging mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggingMode {
    /// No subscriber installed
    Silent,
    /// Single-line stderr output at `info`
    #[default]
    Compact,
    /// Source locations and thread ids at `debug`
    Verbose,
}

impl LoggingMode {
    /// Filter level used when no environment override is set.
    pub const fn default_level(&self) -> &'static str {
        match self {
            Self::Silent => "off",
            Self::Compact => "info",
            Self::Verbose => "debug",
        }
    }
}

/// Install a global subscriber for the given mode.
///
/// ```rust,ignore
/// voltage_opcua::logging::init_logging(LoggingMode::Compact)?;
/// ```
///
/// Fails with [`OpcUaError::Logging`] if a global subscriber is already set.
pub fn init_logging(mode: LoggingMode) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Compact => Registry::default()
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .compact(),
            )
            .with(env_filter(mode))
            .try_init()
            .map_err(|e| OpcUaError::Logging(e.to_string())),
        LoggingMode::Verbose => Registry::default()
            .with(
                fmt::layer()
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(env_filter(mode))
            .try_init()
            .map_err(|e| OpcUaError::Logging(e.to_string())),
    }
}

/// Check if a global subscriber has been installed.
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}

fn env_filter(mode: LoggingMode) -> EnvFilter {
    filter_directive(
        std::env::var(LOG_ENV).ok(),
        std::env::var("RUST_LOG").ok(),
        mode,
    )
    .parse()
    .unwrap_or_else(|_| EnvFilter::new(mode.default_level()))
}

fn filter_directive(own: Option<String>, rust_log: Option<String>, mode: LoggingMode) -> String {
    own.or(rust_log)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| mode.default_level().to_string())
}
