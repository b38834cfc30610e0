//! Logging setup and the server lifecycle events.

use std::env;
use std::net::SocketAddr;

use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub const ENV_LOG_LEVEL: &str = "OGD_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "OGD_LOG_FORMAT";
pub const ENV_LOG_TARGET: &str = "OGD_LOG_TARGET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" | "text" => Some(Self::Pretty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Reads `OGD_LOG_*`; unset or unparseable values keep their defaults.
pub fn logging_config_from_env() -> LoggingConfig {
    let defaults = LoggingConfig::default();
    let var = |key: &str| env::var(key).ok();

    LoggingConfig {
        level: var(ENV_LOG_LEVEL)
            .map(|raw| raw.trim().to_string())
            .filter(|level| !level.is_empty())
            .unwrap_or(defaults.level),
        format: var(ENV_LOG_FORMAT)
            .as_deref()
            .and_then(LogFormat::parse)
            .unwrap_or(defaults.format),
        include_target: var(ENV_LOG_TARGET)
            .as_deref()
            .and_then(parse_flag)
            .unwrap_or(defaults.include_target),
    }
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.include_target)
        .with_ansi(config.format == LogFormat::Pretty);

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

pub fn log_app_start(config: &LoggingConfig) {
    info!(
        component = "dashboard_server",
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_app_bind(bound_addr: SocketAddr) {
    info!(
        component = "dashboard_server",
        event = "app.bind",
        bind_addr = %bound_addr,
        route = "/dashboard"
    );
}

pub fn log_source_selected(source: &str, reason: Option<&str>, years: &[i32]) {
    match reason {
        Some(reason) => info!(
            component = "dashboard_server",
            event = "source.selected",
            source,
            reason,
            years = ?years
        ),
        None => info!(
            component = "dashboard_server",
            event = "source.selected",
            source,
            years = ?years
        ),
    }
}

pub fn log_dataset_ready(observations: usize, loaded_years: &[i32], failed_years: &[i32]) {
    if failed_years.is_empty() {
        info!(
            component = "dashboard_server",
            event = "dataset.ready",
            observations,
            loaded_years = ?loaded_years
        );
    } else {
        warn!(
            component = "dashboard_server",
            event = "dataset.ready.partial",
            observations,
            loaded_years = ?loaded_years,
            failed_years = ?failed_years
        );
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
