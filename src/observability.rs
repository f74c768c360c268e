//! Logging setup for the screener server and its lifecycle events.

use std::env;
use std::net::SocketAddr;
use std::path::Path;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ScreenerConfig;
use crate::snapshot::{latest_capture_time, SnapshotPair};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
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

/// Reads `COINDASH_LOG_LEVEL`, `COINDASH_LOG_FORMAT` and `COINDASH_LOG_TARGET`.
/// Unparseable values keep the default.
pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Some(level) = env::var("COINDASH_LOG_LEVEL")
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
    {
        config.level = level;
    }

    if let Some(format) = env::var("COINDASH_LOG_FORMAT")
        .ok()
        .and_then(|raw| parse_log_format(&raw))
    {
        config.format = format;
    }

    if let Some(include_target) = env::var("COINDASH_LOG_TARGET")
        .ok()
        .and_then(|raw| parse_bool(&raw))
    {
        config.include_target = include_target;
    }

    config
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_ansi(matches!(config.format, LogFormat::Pretty));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

pub fn log_app_start(config: &LoggingConfig) {
    info!(
        component = "screener_server",
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

/// Logs the listening address with the screener routes it serves.
pub fn log_app_bind(bound_addr: SocketAddr, routes: &[&str]) {
    info!(
        component = "screener_server",
        event = "app.bind",
        bind_addr = %bound_addr,
        route_count = routes.len(),
        routes = %routes.join(",")
    );
}

/// Records the effective trade-plan defaults and indicator thresholds after any override
/// file was applied.
pub fn log_screener_config(cfg: &ScreenerConfig) {
    info!(
        component = "screener_server",
        event = "config.screener.loaded",
        target_pct = cfg.target_pct,
        stop_loss_pct = cfg.stop_loss_pct,
        buy_above = cfg.indicator.buy_above,
        sell_below = cfg.indicator.sell_below,
        day_pivot = cfg.indicator.day_pivot,
        top_movers_limit = cfg.top_movers_limit
    );
}

/// Where the served snapshot pair came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOrigin<'a> {
    Files {
        live: &'a Path,
        historical: &'a Path,
    },
    Demo {
        reason: &'static str,
    },
}

pub fn log_source_selected(origin: SnapshotOrigin<'_>, pair: &SnapshotPair) {
    let live_rows = pair.live.len();
    let historical_rows = pair.historical.len();
    let captured_at = latest_capture_time(&pair.historical).map(|ts| ts.to_rfc3339());

    match origin {
        SnapshotOrigin::Files { live, historical } => info!(
            component = "screener_server",
            event = "source.selected",
            source = "files",
            live_path = %live.display(),
            historical_path = %historical.display(),
            live_rows,
            historical_rows,
            captured_at = captured_at.as_deref().unwrap_or("unknown")
        ),
        SnapshotOrigin::Demo { reason } => info!(
            component = "screener_server",
            event = "source.selected",
            source = "demo",
            reason,
            live_rows,
            historical_rows,
            captured_at = captured_at.as_deref().unwrap_or("unknown")
        ),
    }
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        _ => None,
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::with_env_vars;

    const LOG_KEYS: [&str; 3] = [
        "COINDASH_LOG_LEVEL",
        "COINDASH_LOG_FORMAT",
        "COINDASH_LOG_TARGET",
    ];

    #[test]
    fn defaults_when_env_missing() {
        let vars: Vec<(&str, Option<&str>)> = LOG_KEYS.iter().map(|key| (*key, None)).collect();
        let cfg = with_env_vars(&vars, logging_config_from_env);

        assert_eq!(cfg, LoggingConfig::default());
    }

    #[test]
    fn parses_json_and_level_and_target_from_env() {
        let cfg = with_env_vars(
            &[
                ("COINDASH_LOG_LEVEL", Some("coindash=debug")),
                ("COINDASH_LOG_FORMAT", Some("JSON")),
                ("COINDASH_LOG_TARGET", Some("off")),
            ],
            logging_config_from_env,
        );

        assert_eq!(cfg.level, "coindash=debug");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(!cfg.include_target);
    }

    #[test]
    fn invalid_format_or_target_falls_back_to_defaults() {
        let cfg = with_env_vars(
            &[
                ("COINDASH_LOG_LEVEL", Some("   ")),
                ("COINDASH_LOG_FORMAT", Some("yaml")),
                ("COINDASH_LOG_TARGET", Some("maybe")),
            ],
            logging_config_from_env,
        );

        assert_eq!(cfg, LoggingConfig::default());
    }

    #[test]
    fn bool_words() {
        assert_eq!(parse_bool(" Yes "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("y"), None);
    }
}
