//! Engine thresholds and server settings.

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::filters::BucketBoundaries;
use crate::metrics::{IndicatorThresholds, DEFAULT_STOP_LOSS_PCT, DEFAULT_TARGET_PCT};
use crate::observability::parse_bool;

pub const DEFAULT_TOP_MOVERS_LIMIT: usize = 10;
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const LIVE_SNAPSHOT_VAR: &str = "COINDASH_LIVE_SNAPSHOT";
pub const HISTORICAL_SNAPSHOT_VAR: &str = "COINDASH_HISTORICAL_SNAPSHOT";

/// Tunable constants of the screener. Defaults are the fixed screener literals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenerConfig {
    pub target_pct: f64,
    pub stop_loss_pct: f64,
    pub indicator: IndicatorThresholds,
    pub buckets: BucketBoundaries,
    pub top_movers_limit: usize,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            target_pct: DEFAULT_TARGET_PCT,
            stop_loss_pct: DEFAULT_STOP_LOSS_PCT,
            indicator: IndicatorThresholds::default(),
            buckets: BucketBoundaries::default(),
            top_movers_limit: DEFAULT_TOP_MOVERS_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub live_snapshot: Option<PathBuf>,
    pub historical_snapshot: Option<PathBuf>,
    pub use_demo: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid bind address '{0}'")]
    InvalidBindAddr(String),
    #[error("invalid screener config: {0}")]
    Invalid(String),
    #[error("{set} is set but {missing} is not; snapshot files are loaded as a pair")]
    MissingSnapshotPath {
        set: &'static str,
        missing: &'static str,
    },
}

impl ScreenerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.target_pct.is_finite() || self.target_pct < 0.0 {
            return Err(ConfigError::Invalid(
                "target_pct must be a finite value >= 0".to_string(),
            ));
        }
        if !self.stop_loss_pct.is_finite() || !(0.0..100.0).contains(&self.stop_loss_pct) {
            return Err(ConfigError::Invalid(
                "stop_loss_pct must be within [0, 100)".to_string(),
            ));
        }
        if self.indicator.sell_below > self.indicator.buy_above {
            return Err(ConfigError::Invalid(
                "indicator.sell_below must not exceed indicator.buy_above".to_string(),
            ));
        }

        let b = &self.buckets;
        for (name, lower, upper) in [
            ("volatility", b.volatility_low_below, b.volatility_high_above),
            ("volume", b.volume_low_below, b.volume_high_above),
            ("market_cap", b.market_cap_small_below, b.market_cap_large_above),
        ] {
            if !(lower.is_finite() && upper.is_finite()) || lower > upper {
                return Err(ConfigError::Invalid(format!(
                    "{name} bucket boundaries must be finite and ordered"
                )));
            }
        }

        if self.top_movers_limit == 0 {
            return Err(ConfigError::Invalid(
                "top_movers_limit must be >= 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Reads a JSON config file; omitted keys keep their defaults.
pub fn screener_config_from_file(path: &Path) -> Result<ScreenerConfig, ConfigError> {
    let cfg: ScreenerConfig = serde_json::from_str(&fs::read_to_string(path)?)?;
    cfg.validate()?;

    info!(
        component = "config",
        event = "config.screener.loaded",
        path = %path.display(),
        target_pct = cfg.target_pct,
        stop_loss_pct = cfg.stop_loss_pct
    );

    Ok(cfg)
}

/// Uses `COINDASH_SCREENER_CONFIG` when set, else the defaults.
pub fn screener_config_from_env() -> Result<ScreenerConfig, ConfigError> {
    match env::var("COINDASH_SCREENER_CONFIG") {
        Ok(path) if !path.trim().is_empty() => screener_config_from_file(Path::new(path.trim())),
        _ => Ok(ScreenerConfig::default()),
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_addr = env::var("COINDASH_SCREENER_ADDR")
            .ok()
            .filter(|raw| !raw.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = raw_addr
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddr(raw_addr.clone()))?;

        let cfg = Self {
            bind_addr,
            live_snapshot: path_from_env(LIVE_SNAPSHOT_VAR),
            historical_snapshot: path_from_env(HISTORICAL_SNAPSHOT_VAR),
            use_demo: env::var("COINDASH_USE_DEMO")
                .ok()
                .and_then(|raw| parse_bool(&raw))
                .unwrap_or(false),
        };
        cfg.check_snapshot_pair()?;
        Ok(cfg)
    }

    /// One snapshot path without the other is a misconfiguration unless demo data was
    /// requested explicitly.
    fn check_snapshot_pair(&self) -> Result<(), ConfigError> {
        if self.use_demo {
            return Ok(());
        }
        match (&self.live_snapshot, &self.historical_snapshot) {
            (Some(_), None) => Err(ConfigError::MissingSnapshotPath {
                set: LIVE_SNAPSHOT_VAR,
                missing: HISTORICAL_SNAPSHOT_VAR,
            }),
            (None, Some(_)) => Err(ConfigError::MissingSnapshotPath {
                set: HISTORICAL_SNAPSHOT_VAR,
                missing: LIVE_SNAPSHOT_VAR,
            }),
            _ => Ok(()),
        }
    }

    /// Both snapshot paths, unless demo data was requested.
    pub fn snapshot_paths(&self) -> Option<(&Path, &Path)> {
        if self.use_demo {
            return None;
        }
        match (&self.live_snapshot, &self.historical_snapshot) {
            (Some(live), Some(historical)) => Some((live.as_path(), historical.as_path())),
            _ => None,
        }
    }
}

fn path_from_env(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
}
