//! Conjunctive row predicates applied in a fixed canonical order.
//!
//! Every predicate is an independent per-row test, so the surviving set does not depend on
//! stage order; the canonical order only fixes the diagnostic output (`StageReport`).
//! A predicate whose column is absent from every row of the input set is skipped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::merge::MergedRow;
use crate::snapshot::{CoinSnapshotRow, Timeframe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignFilter {
    #[default]
    All,
    Positive,
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityBucket {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeBucket {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketCapBucket {
    Small,
    Mid,
    Large,
}

/// Live 1h change versus the stored 1h change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    LiveAboveStored,
    LiveBelowStored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignColumn {
    Change1h,
    Change24h,
    Change7d,
    Change14d,
    Change30d,
    Change200d,
    Change1y,
    MarketCapChange24h,
}

impl SignColumn {
    pub const ALL: [SignColumn; 8] = [
        Self::Change1h,
        Self::Change24h,
        Self::Change7d,
        Self::Change14d,
        Self::Change30d,
        Self::Change200d,
        Self::Change1y,
        Self::MarketCapChange24h,
    ];

    pub fn for_timeframe(timeframe: Timeframe) -> Self {
        match timeframe {
            Timeframe::H1 => Self::Change1h,
            Timeframe::H24 => Self::Change24h,
            Timeframe::D7 => Self::Change7d,
            Timeframe::D14 => Self::Change14d,
            Timeframe::D30 => Self::Change30d,
            Timeframe::D200 => Self::Change200d,
            Timeframe::Y1 => Self::Change1y,
        }
    }

    pub fn value(self, coin: &CoinSnapshotRow) -> Option<f64> {
        match self {
            Self::Change1h => coin.change_1h,
            Self::Change24h => coin.change_24h,
            Self::Change7d => coin.change_7d,
            Self::Change14d => coin.change_14d,
            Self::Change30d => coin.change_30d,
            Self::Change200d => coin.change_200d,
            Self::Change1y => coin.change_1y,
            Self::MarketCapChange24h => coin.market_cap_change_percentage_24h,
        }
    }

    /// Query-string key for this column.
    pub fn query_key(self) -> &'static str {
        match self {
            Self::Change1h => "change_1h",
            Self::Change24h => "change_24h",
            Self::Change7d => "change_7d",
            Self::Change14d => "change_14d",
            Self::Change30d => "change_30d",
            Self::Change200d => "change_200d",
            Self::Change1y => "change_1y",
            Self::MarketCapChange24h => "mcap_change_24h",
        }
    }
}

/// Fixed bucket boundaries. Currency amounts are INR: ₹100Cr = 1e10, ₹500Cr = 5e10,
/// ₹1,000Cr = 1e11, ₹10,000Cr = 1e12.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketBoundaries {
    pub volatility_low_below: f64,
    pub volatility_high_above: f64,
    pub volume_low_below: f64,
    pub volume_high_above: f64,
    pub market_cap_small_below: f64,
    pub market_cap_large_above: f64,
}

impl Default for BucketBoundaries {
    fn default() -> Self {
        Self {
            volatility_low_below: 1.0,
            volatility_high_above: 5.0,
            volume_low_below: 1e10,
            volume_high_above: 5e10,
            market_cap_small_below: 1e11,
            market_cap_large_above: 1e12,
        }
    }
}

/// Active predicate parameters for one invocation. `None` / absent entries mean "All".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    pub rank_ceiling: Option<u32>,
    pub price_floor: Option<f64>,
    pub price_ceiling: Option<f64>,
    pub volatility: Option<VolatilityBucket>,
    pub volume: Option<VolumeBucket>,
    pub market_cap: Option<MarketCapBucket>,
    pub signs: BTreeMap<SignColumn, SignFilter>,
    pub comparison: Option<Comparison>,
}

impl FilterSpec {
    pub fn sign(&self, column: SignColumn) -> SignFilter {
        self.signs.get(&column).copied().unwrap_or_default()
    }

    pub fn with_sign(mut self, column: SignColumn, filter: SignFilter) -> Self {
        self.signs.insert(column, filter);
        self
    }

    /// Parses the string-typed form submitted by a UI or query string. Malformed entries
    /// are reported and leave their stage inactive; the remaining entries still apply.
    pub fn from_raw(raw: &RawFilterQuery) -> ParsedFilterSpec {
        let mut errors = Vec::new();
        let mut spec = FilterSpec {
            rank_ceiling: parse_optional(
                "rank_max",
                raw.rank_max.as_deref(),
                parse_rank_ceiling,
                &mut errors,
            ),
            price_floor: parse_optional(
                "price_min",
                raw.price_min.as_deref(),
                |raw| parse_price_bound("price_min", raw),
                &mut errors,
            ),
            price_ceiling: parse_optional(
                "price_max",
                raw.price_max.as_deref(),
                |raw| parse_price_bound("price_max", raw),
                &mut errors,
            ),
            volatility: parse_choice(
                "volatility",
                raw.volatility.as_deref(),
                volatility_from_choice,
                &mut errors,
            ),
            volume: parse_choice(
                "volume",
                raw.volume.as_deref(),
                volume_from_choice,
                &mut errors,
            ),
            market_cap: parse_choice(
                "market_cap",
                raw.market_cap.as_deref(),
                market_cap_from_choice,
                &mut errors,
            ),
            signs: BTreeMap::new(),
            comparison: parse_choice(
                "compare",
                raw.compare.as_deref(),
                comparison_from_choice,
                &mut errors,
            ),
        };

        for column in SignColumn::ALL {
            if let Some(filter) = parse_choice(
                column.query_key(),
                raw.sign_value(column),
                sign_from_choice,
                &mut errors,
            ) {
                spec.signs.insert(column, filter);
            }
        }

        for error in &errors {
            warn!(
                component = "filters",
                event = "filters.input.invalid",
                error = %error
            );
        }

        ParsedFilterSpec { spec, errors }
    }
}

/// Filter parameters exactly as a user typed or selected them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawFilterQuery {
    pub rank_max: Option<String>,
    pub price_min: Option<String>,
    pub price_max: Option<String>,
    pub volatility: Option<String>,
    pub volume: Option<String>,
    pub market_cap: Option<String>,
    pub change_1h: Option<String>,
    pub change_24h: Option<String>,
    pub change_7d: Option<String>,
    pub change_14d: Option<String>,
    pub change_30d: Option<String>,
    pub change_200d: Option<String>,
    pub change_1y: Option<String>,
    pub mcap_change_24h: Option<String>,
    pub compare: Option<String>,
}

impl RawFilterQuery {
    fn sign_value(&self, column: SignColumn) -> Option<&str> {
        match column {
            SignColumn::Change1h => self.change_1h.as_deref(),
            SignColumn::Change24h => self.change_24h.as_deref(),
            SignColumn::Change7d => self.change_7d.as_deref(),
            SignColumn::Change14d => self.change_14d.as_deref(),
            SignColumn::Change30d => self.change_30d.as_deref(),
            SignColumn::Change200d => self.change_200d.as_deref(),
            SignColumn::Change1y => self.change_1y.as_deref(),
            SignColumn::MarketCapChange24h => self.mcap_change_24h.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFilterSpec {
    pub spec: FilterSpec,
    pub errors: Vec<FilterInputError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterInputError {
    #[error("invalid number for {field}: '{value}'")]
    InvalidNumber { field: &'static str, value: String },
    #[error("invalid choice for {field}: '{value}'")]
    InvalidChoice { field: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStage {
    RankCeiling,
    PriceFloor,
    PriceCeiling,
    Volatility,
    Volume,
    MarketCap,
    Sign(SignColumn),
    Comparison,
}

impl FilterStage {
    /// rank, price bounds, buckets, per-column signs, then live-vs-stored comparison.
    pub fn canonical_order() -> Vec<FilterStage> {
        let mut stages = vec![
            Self::RankCeiling,
            Self::PriceFloor,
            Self::PriceCeiling,
            Self::Volatility,
            Self::Volume,
            Self::MarketCap,
        ];
        stages.extend(SignColumn::ALL.into_iter().map(Self::Sign));
        stages.push(Self::Comparison);
        stages
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Applied,
    Inactive,
    SkippedMissingColumn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: FilterStage,
    pub outcome: StageOutcome,
    pub rows_before: usize,
    pub rows_after: usize,
}

pub fn classify_volatility(change_24h: f64, bounds: &BucketBoundaries) -> VolatilityBucket {
    let magnitude = change_24h.abs();
    if magnitude < bounds.volatility_low_below {
        VolatilityBucket::Low
    } else if magnitude <= bounds.volatility_high_above {
        VolatilityBucket::Medium
    } else {
        VolatilityBucket::High
    }
}

pub fn classify_volume(total_volume: f64, bounds: &BucketBoundaries) -> VolumeBucket {
    if total_volume < bounds.volume_low_below {
        VolumeBucket::Low
    } else if total_volume <= bounds.volume_high_above {
        VolumeBucket::Medium
    } else {
        VolumeBucket::High
    }
}

pub fn classify_market_cap(market_cap: f64, bounds: &BucketBoundaries) -> MarketCapBucket {
    if market_cap < bounds.market_cap_small_below {
        MarketCapBucket::Small
    } else if market_cap <= bounds.market_cap_large_above {
        MarketCapBucket::Mid
    } else {
        MarketCapBucket::Large
    }
}

pub fn apply_filter_chain(
    rows: Vec<MergedRow>,
    spec: &FilterSpec,
    bounds: &BucketBoundaries,
) -> (Vec<MergedRow>, Vec<StageReport>) {
    apply_stages(rows, &FilterStage::canonical_order(), spec, bounds)
}

/// Runs `stages` in the given order. Column presence is decided once, on the input set.
pub fn apply_stages(
    rows: Vec<MergedRow>,
    stages: &[FilterStage],
    spec: &FilterSpec,
    bounds: &BucketBoundaries,
) -> (Vec<MergedRow>, Vec<StageReport>) {
    let present: Vec<bool> = stages
        .iter()
        .map(|stage| column_present(*stage, &rows))
        .collect();

    let mut rows = rows;
    let mut reports = Vec::with_capacity(stages.len());
    let mut emptied_reported = false;

    for (stage, present) in stages.iter().copied().zip(present) {
        let rows_before = rows.len();
        let outcome = if !stage_active(stage, spec) {
            StageOutcome::Inactive
        } else if !present {
            StageOutcome::SkippedMissingColumn
        } else {
            rows.retain(|row| row_passes(stage, spec, bounds, row));
            StageOutcome::Applied
        };

        debug!(
            component = "filters",
            event = "filters.stage.applied",
            stage = ?stage,
            outcome = ?outcome,
            rows_before,
            rows_after = rows.len()
        );

        if rows_before > 0 && rows.is_empty() && !emptied_reported {
            emptied_reported = true;
            info!(
                component = "filters",
                event = "filters.chain.emptied",
                stage = ?stage,
                rows_before
            );
        }

        reports.push(StageReport {
            stage,
            outcome,
            rows_before,
            rows_after: rows.len(),
        });
    }

    (rows, reports)
}

/// Highest rank present in the snapshot; the natural default for the rank ceiling.
pub fn default_rank_ceiling(rows: &[CoinSnapshotRow]) -> Option<u32> {
    rows.iter().filter_map(|row| row.market_cap_rank).max()
}

/// Lowest and highest present price, for seeding price-bound inputs.
pub fn price_range(rows: &[CoinSnapshotRow]) -> Option<(f64, f64)> {
    rows.iter()
        .filter_map(|row| row.current_price.filter(|p| p.is_finite()))
        .fold(None, |acc, price| match acc {
            None => Some((price, price)),
            Some((lo, hi)) => Some((lo.min(price), hi.max(price))),
        })
}

/// Empty input means "no bound"; `,` separators are accepted.
pub fn parse_price_bound(field: &'static str, raw: &str) -> Result<Option<f64>, FilterInputError> {
    let cleaned = raw.trim().replace(',', "");
    if cleaned.is_empty() {
        return Ok(None);
    }

    match cleaned.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        _ => Err(FilterInputError::InvalidNumber {
            field,
            value: raw.to_string(),
        }),
    }
}

fn parse_rank_ceiling(raw: &str) -> Result<Option<u32>, FilterInputError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    trimmed
        .parse::<u32>()
        .map(Some)
        .map_err(|_| FilterInputError::InvalidNumber {
            field: "rank_max",
            value: raw.to_string(),
        })
}

fn parse_optional<T>(
    field: &'static str,
    raw: Option<&str>,
    parse: impl Fn(&str) -> Result<Option<T>, FilterInputError>,
    errors: &mut Vec<FilterInputError>,
) -> Option<T> {
    let raw = raw?;
    match parse(raw) {
        Ok(value) => value,
        Err(error) => {
            debug!(component = "filters", event = "filters.input.rejected", field);
            errors.push(error);
            None
        }
    }
}

fn parse_choice<T>(
    field: &'static str,
    raw: Option<&str>,
    from_choice: fn(&str) -> Option<T>,
    errors: &mut Vec<FilterInputError>,
) -> Option<T> {
    let raw = raw?;
    let normalized = raw.trim().to_ascii_lowercase();
    if normalized.is_empty() || normalized == "all" {
        return None;
    }

    match from_choice(&normalized) {
        Some(value) => Some(value),
        None => {
            errors.push(FilterInputError::InvalidChoice {
                field,
                value: raw.to_string(),
            });
            None
        }
    }
}

fn sign_from_choice(raw: &str) -> Option<SignFilter> {
    match raw {
        "positive" | "pos" | ">0" => Some(SignFilter::Positive),
        "negative" | "neg" | "<0" => Some(SignFilter::Negative),
        _ => None,
    }
}

fn volatility_from_choice(raw: &str) -> Option<VolatilityBucket> {
    match raw {
        "low" => Some(VolatilityBucket::Low),
        "medium" => Some(VolatilityBucket::Medium),
        "high" => Some(VolatilityBucket::High),
        _ => None,
    }
}

fn volume_from_choice(raw: &str) -> Option<VolumeBucket> {
    match raw {
        "low" => Some(VolumeBucket::Low),
        "medium" => Some(VolumeBucket::Medium),
        "high" => Some(VolumeBucket::High),
        _ => None,
    }
}

fn market_cap_from_choice(raw: &str) -> Option<MarketCapBucket> {
    match raw {
        "small" => Some(MarketCapBucket::Small),
        "mid" => Some(MarketCapBucket::Mid),
        "large" => Some(MarketCapBucket::Large),
        _ => None,
    }
}

fn comparison_from_choice(raw: &str) -> Option<Comparison> {
    match raw {
        "live_above_stored" | "above" | "gt" => Some(Comparison::LiveAboveStored),
        "live_below_stored" | "below" | "lt" => Some(Comparison::LiveBelowStored),
        _ => None,
    }
}

fn stage_active(stage: FilterStage, spec: &FilterSpec) -> bool {
    match stage {
        FilterStage::RankCeiling => spec.rank_ceiling.is_some(),
        FilterStage::PriceFloor => spec.price_floor.is_some(),
        FilterStage::PriceCeiling => spec.price_ceiling.is_some(),
        FilterStage::Volatility => spec.volatility.is_some(),
        FilterStage::Volume => spec.volume.is_some(),
        FilterStage::MarketCap => spec.market_cap.is_some(),
        FilterStage::Sign(column) => spec.sign(column) != SignFilter::All,
        FilterStage::Comparison => spec.comparison.is_some(),
    }
}

fn column_present(stage: FilterStage, rows: &[MergedRow]) -> bool {
    match stage {
        FilterStage::RankCeiling => rows.iter().any(|row| row.coin.market_cap_rank.is_some()),
        FilterStage::PriceFloor | FilterStage::PriceCeiling => {
            rows.iter().any(|row| row.coin.current_price.is_some())
        }
        FilterStage::Volatility => rows.iter().any(|row| row.coin.volatility_change().is_some()),
        FilterStage::Volume => rows.iter().any(|row| row.coin.total_volume.is_some()),
        FilterStage::MarketCap => rows.iter().any(|row| row.coin.market_cap.is_some()),
        FilterStage::Sign(column) => rows.iter().any(|row| column.value(&row.coin).is_some()),
        FilterStage::Comparison => {
            rows.iter().any(|row| row.coin.change_1h.is_some())
                && rows.iter().any(|row| row.stored_change_1h.is_some())
        }
    }
}

// Rows lacking a finite value for an active predicate are excluded.
fn row_passes(
    stage: FilterStage,
    spec: &FilterSpec,
    bounds: &BucketBoundaries,
    row: &MergedRow,
) -> bool {
    let coin = &row.coin;
    match stage {
        FilterStage::RankCeiling => match spec.rank_ceiling {
            Some(ceiling) => coin.market_cap_rank.is_some_and(|rank| rank <= ceiling),
            None => true,
        },
        FilterStage::PriceFloor => match spec.price_floor {
            Some(floor) => finite(coin.current_price).is_some_and(|price| price >= floor),
            None => true,
        },
        FilterStage::PriceCeiling => match spec.price_ceiling {
            Some(ceiling) => finite(coin.current_price).is_some_and(|price| price <= ceiling),
            None => true,
        },
        FilterStage::Volatility => match spec.volatility {
            Some(bucket) => finite(coin.volatility_change())
                .is_some_and(|change| classify_volatility(change, bounds) == bucket),
            None => true,
        },
        FilterStage::Volume => match spec.volume {
            Some(bucket) => finite(coin.total_volume)
                .is_some_and(|volume| classify_volume(volume, bounds) == bucket),
            None => true,
        },
        FilterStage::MarketCap => match spec.market_cap {
            Some(bucket) => finite(coin.market_cap)
                .is_some_and(|cap| classify_market_cap(cap, bounds) == bucket),
            None => true,
        },
        FilterStage::Sign(column) => match spec.sign(column) {
            SignFilter::All => true,
            SignFilter::Positive => finite(column.value(coin)).is_some_and(|v| v > 0.0),
            SignFilter::Negative => finite(column.value(coin)).is_some_and(|v| v < 0.0),
        },
        FilterStage::Comparison => {
            let (Some(live), Some(stored)) = (finite(coin.change_1h), finite(row.stored_change_1h))
            else {
                return spec.comparison.is_none();
            };
            match spec.comparison {
                Some(Comparison::LiveAboveStored) => live > stored,
                Some(Comparison::LiveBelowStored) => live < stored,
                None => true,
            }
        }
    }
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}
