//! Per-row derived metrics: target / stop-loss levels, the trade indicator label, and
//! risk/reward arithmetic.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TARGET_PCT: f64 = 5.0;
pub const DEFAULT_STOP_LOSS_PCT: f64 = 3.0;

const MIN_PLAN_PCT: f64 = 0.1;
const MAX_PLAN_PCT: f64 = 100.0;

/// Heuristic three-way label from short-horizon momentum.
///
/// This is a fixed-threshold classifier over the live 1h change, the stored 1h change
/// and the 24h change. It is a display hint, not a trading signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Indicator {
    Buy,
    Sell,
    Hold,
}

impl Indicator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorThresholds {
    /// Both 1h changes must exceed this for BUY.
    pub buy_above: f64,
    /// Both 1h changes must fall below this for SELL.
    pub sell_below: f64,
    /// 24h change must be above (BUY) or below (SELL) this.
    pub day_pivot: f64,
}

impl Default for IndicatorThresholds {
    fn default() -> Self {
        Self {
            buy_above: 0.2,
            sell_below: -0.5,
            day_pivot: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetStop {
    pub target_price: f64,
    pub stop_loss_price: f64,
    pub target_pct: f64,
    pub stop_loss_pct: f64,
}

impl TargetStop {
    pub const ZERO: Self = Self {
        target_price: 0.0,
        stop_loss_price: 0.0,
        target_pct: 0.0,
        stop_loss_pct: 0.0,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradePlan {
    pub current_price: f64,
    pub target_pct: f64,
    pub stop_loss_pct: f64,
    pub target_price: f64,
    pub stop_loss_price: f64,
    pub potential_profit: f64,
    pub potential_loss: f64,
    pub risk_reward: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricsError {
    #[error("risk/reward undefined: current price {price} equals the stop-loss price")]
    DivisionByZero { price: f64 },
    #[error("non-finite input to {0}")]
    NonFiniteInput(&'static str),
    #[error("{field} must be within [{min}, {max}], got {value}")]
    PercentOutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("current price must be positive, got {0}")]
    InvalidPrice(f64),
}

/// Target and stop-loss levels around the current price.
///
/// A missing, negative or non-finite price yields [`TargetStop::ZERO`].
pub fn compute_target_stop(
    current_price: Option<f64>,
    target_pct: f64,
    stop_loss_pct: f64,
) -> TargetStop {
    let Some(price) = current_price.filter(|p| p.is_finite() && *p >= 0.0) else {
        return TargetStop::ZERO;
    };
    if !target_pct.is_finite() || !stop_loss_pct.is_finite() {
        return TargetStop::ZERO;
    }

    TargetStop {
        target_price: price * (1.0 + target_pct / 100.0),
        stop_loss_price: price * (1.0 - stop_loss_pct / 100.0),
        target_pct,
        stop_loss_pct,
    }
}

pub fn compute_indicator(
    live_change_1h: Option<f64>,
    stored_change_1h: Option<f64>,
    change_24h: Option<f64>,
) -> Indicator {
    compute_indicator_with(
        live_change_1h,
        stored_change_1h,
        change_24h,
        &IndicatorThresholds::default(),
    )
}

/// Missing or non-finite inputs count as `0.0`, which routes to HOLD under the default
/// thresholds.
pub fn compute_indicator_with(
    live_change_1h: Option<f64>,
    stored_change_1h: Option<f64>,
    change_24h: Option<f64>,
    thresholds: &IndicatorThresholds,
) -> Indicator {
    let live = neutral(live_change_1h);
    let stored = neutral(stored_change_1h);
    let day = neutral(change_24h);

    if stored > thresholds.buy_above && live > thresholds.buy_above && day > thresholds.day_pivot
    {
        Indicator::Buy
    } else if stored < thresholds.sell_below
        && live < thresholds.sell_below
        && day < thresholds.day_pivot
    {
        Indicator::Sell
    } else {
        Indicator::Hold
    }
}

pub fn risk_reward_ratio(
    target_price: f64,
    current_price: f64,
    stop_loss_price: f64,
) -> Result<f64, MetricsError> {
    if !(target_price.is_finite() && current_price.is_finite() && stop_loss_price.is_finite()) {
        return Err(MetricsError::NonFiniteInput("risk_reward_ratio"));
    }

    let risk = current_price - stop_loss_price;
    if risk == 0.0 {
        return Err(MetricsError::DivisionByZero {
            price: current_price,
        });
    }

    Ok((target_price - current_price) / risk)
}

/// Custom target / stop-loss calculator for a single coin.
pub fn trade_plan(
    current_price: f64,
    target_pct: f64,
    stop_loss_pct: f64,
) -> Result<TradePlan, MetricsError> {
    if !current_price.is_finite() || current_price <= 0.0 {
        return Err(MetricsError::InvalidPrice(current_price));
    }
    check_plan_pct("target_pct", target_pct)?;
    check_plan_pct("stop_loss_pct", stop_loss_pct)?;

    let levels = compute_target_stop(Some(current_price), target_pct, stop_loss_pct);
    let risk_reward = risk_reward_ratio(
        levels.target_price,
        current_price,
        levels.stop_loss_price,
    )?;

    Ok(TradePlan {
        current_price,
        target_pct,
        stop_loss_pct,
        target_price: levels.target_price,
        stop_loss_price: levels.stop_loss_price,
        potential_profit: levels.target_price - current_price,
        potential_loss: current_price - levels.stop_loss_price,
        risk_reward,
    })
}

fn check_plan_pct(field: &'static str, value: f64) -> Result<(), MetricsError> {
    if value.is_finite() && (MIN_PLAN_PCT..=MAX_PLAN_PCT).contains(&value) {
        Ok(())
    } else {
        Err(MetricsError::PercentOutOfRange {
            field,
            value,
            min: MIN_PLAN_PCT,
            max: MAX_PLAN_PCT,
        })
    }
}

fn neutral(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}
