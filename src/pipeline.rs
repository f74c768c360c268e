//! Merge → filter chain → derived metrics → formatting, plus summary aggregates.
//!
//! A run is a pure function of its inputs: identical snapshot pairs and filter specs give
//! identical output, however stale the snapshots are.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ScreenerConfig;
use crate::filters::{apply_filter_chain, FilterSpec, StageReport};
use crate::format::{
    digit_count_before_decimal, format_currency, format_percent, format_percent_label,
};
use crate::merge::{merge_historical, MergedRow};
use crate::metrics::{compute_indicator_with, compute_target_stop, Indicator};
use crate::snapshot::{latest_capture_time, CoinSnapshotRow, HistoricalChangeRow, Timeframe};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilteredRow {
    #[serde(flatten)]
    pub coin: CoinSnapshotRow,
    pub stored_change_1h: Option<f64>,
    pub stored_at: Option<DateTime<Utc>>,
    pub indicator: Indicator,
    pub target_price: f64,
    pub stop_loss_price: f64,
    pub target_pct: f64,
    pub stop_loss_pct: f64,
    pub target_pct_label: String,
    pub stop_loss_pct_label: String,
    pub formatted_price: String,
    pub formatted_market_cap: String,
    pub formatted_target: String,
    pub formatted_stop_loss: String,
    pub market_cap_digits: u32,
    pub display_change_1h: f64,
    pub display_stored_change_1h: f64,
    pub display_change_24h: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl Sentiment {
    fn compare(up: f64, down: f64) -> Self {
        match up.partial_cmp(&down) {
            Some(Ordering::Greater) => Self::Bullish,
            Some(Ordering::Less) => Self::Bearish,
            _ => Self::Neutral,
        }
    }
}

/// Means over rows carrying a value; `0.0` when none do.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ChangeAverages {
    pub change_1h: f64,
    pub change_24h: f64,
    pub change_7d: f64,
    pub change_14d: f64,
    pub change_30d: f64,
    pub change_200d: f64,
    pub change_1y: f64,
    pub stored_change_1h: f64,
}

impl ChangeAverages {
    pub fn get(&self, timeframe: Timeframe) -> f64 {
        match timeframe {
            Timeframe::H1 => self.change_1h,
            Timeframe::H24 => self.change_24h,
            Timeframe::D7 => self.change_7d,
            Timeframe::D14 => self.change_14d,
            Timeframe::D30 => self.change_30d,
            Timeframe::D200 => self.change_200d,
            Timeframe::Y1 => self.change_1y,
        }
    }
}

/// Live versus stored 1h averages across the whole merged snapshot, before filtering.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MarketSentiment {
    pub live_avg_1h: f64,
    pub stored_avg_1h: f64,
    pub sentiment: Sentiment,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SummaryStats {
    pub row_count: usize,
    pub positive_24h: usize,
    pub negative_24h: usize,
    pub day_sentiment: Sentiment,
    pub averages: ChangeAverages,
    pub market: MarketSentiment,
    pub latest_snapshot_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Rank,
    Name,
    Price,
    MarketCap,
    Volume,
    Change(Timeframe),
}

impl SortKey {
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "rank" => Some(Self::Rank),
            "name" => Some(Self::Name),
            "price" => Some(Self::Price),
            "market_cap" => Some(Self::MarketCap),
            "volume" => Some(Self::Volume),
            other => other
                .strip_prefix("change_")
                .and_then(Timeframe::parse)
                .map(Self::Change),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Output ordering. Rows lacking the sort value always go last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SortOrder {
    pub key: SortKey,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PipelineOutput {
    pub view: Vec<FilteredRow>,
    pub stats: SummaryStats,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopMovers {
    pub timeframe: Timeframe,
    pub gainers: Vec<FilteredRow>,
    pub losers: Vec<FilteredRow>,
}

pub fn run_pipeline(
    live: &[CoinSnapshotRow],
    historical: &[HistoricalChangeRow],
    spec: &FilterSpec,
) -> PipelineOutput {
    run_pipeline_with_config(
        live,
        historical,
        spec,
        &ScreenerConfig::default(),
        SortOrder::default(),
    )
}

pub fn run_pipeline_with_config(
    live: &[CoinSnapshotRow],
    historical: &[HistoricalChangeRow],
    spec: &FilterSpec,
    cfg: &ScreenerConfig,
    sort: SortOrder,
) -> PipelineOutput {
    info!(
        component = "pipeline",
        event = "pipeline.run.start",
        live_rows = live.len(),
        historical_rows = historical.len(),
        sort_key = ?sort.key,
        sort_direction = ?sort.direction
    );

    if live.is_empty() || historical.is_empty() {
        info!(
            component = "pipeline",
            event = "pipeline.run.empty_input",
            live_rows = live.len(),
            historical_rows = historical.len()
        );
        return PipelineOutput::default();
    }

    let merged = merge_historical(live, historical);
    let market = market_sentiment(&merged);
    let (kept, stages) = apply_filter_chain(merged, spec, &cfg.buckets);

    let mut view: Vec<FilteredRow> = kept.into_iter().map(|row| annotate(row, cfg)).collect();
    sort_rows(&mut view, sort);

    let stats = SummaryStats {
        market,
        latest_snapshot_at: latest_capture_time(historical),
        ..summarize(&view)
    };

    info!(
        component = "pipeline",
        event = "pipeline.run.finish",
        rows = stats.row_count,
        positive_24h = stats.positive_24h,
        negative_24h = stats.negative_24h,
        day_sentiment = ?stats.day_sentiment
    );

    PipelineOutput { view, stats, stages }
}

/// Derived metrics first, display formatting last.
pub fn annotate(row: MergedRow, cfg: &ScreenerConfig) -> FilteredRow {
    let MergedRow {
        coin,
        stored_change_1h,
        stored_at,
    } = row;

    let levels = compute_target_stop(coin.current_price, cfg.target_pct, cfg.stop_loss_pct);
    let indicator = compute_indicator_with(
        coin.change_1h,
        stored_change_1h,
        coin.change_24h,
        &cfg.indicator,
    );

    FilteredRow {
        indicator,
        target_price: levels.target_price,
        stop_loss_price: levels.stop_loss_price,
        target_pct: levels.target_pct,
        stop_loss_pct: levels.stop_loss_pct,
        target_pct_label: format_percent_label(levels.target_pct),
        stop_loss_pct_label: format_percent_label(levels.stop_loss_pct),
        formatted_price: format_currency(coin.current_price),
        formatted_market_cap: format_currency(coin.market_cap),
        formatted_target: format_currency(Some(levels.target_price)),
        formatted_stop_loss: format_currency(Some(levels.stop_loss_price)),
        market_cap_digits: digit_count_before_decimal(coin.market_cap),
        display_change_1h: format_percent(coin.change_1h),
        display_stored_change_1h: format_percent(stored_change_1h),
        display_change_24h: format_percent(coin.change_24h),
        coin,
        stored_change_1h,
        stored_at,
    }
}

pub fn summarize(view: &[FilteredRow]) -> SummaryStats {
    let positive_24h = view
        .iter()
        .filter(|row| row.coin.change_24h.is_some_and(|v| v > 0.0))
        .count();
    let negative_24h = view
        .iter()
        .filter(|row| row.coin.change_24h.is_some_and(|v| v < 0.0))
        .count();

    let averages = ChangeAverages {
        change_1h: mean(view.iter().map(|row| row.coin.change_1h)),
        change_24h: mean(view.iter().map(|row| row.coin.change_24h)),
        change_7d: mean(view.iter().map(|row| row.coin.change_7d)),
        change_14d: mean(view.iter().map(|row| row.coin.change_14d)),
        change_30d: mean(view.iter().map(|row| row.coin.change_30d)),
        change_200d: mean(view.iter().map(|row| row.coin.change_200d)),
        change_1y: mean(view.iter().map(|row| row.coin.change_1y)),
        stored_change_1h: mean(view.iter().map(|row| row.stored_change_1h)),
    };

    SummaryStats {
        row_count: view.len(),
        positive_24h,
        negative_24h,
        day_sentiment: Sentiment::compare(positive_24h as f64, negative_24h as f64),
        averages,
        market: MarketSentiment::default(),
        latest_snapshot_at: None,
    }
}

pub fn sort_rows(rows: &mut [FilteredRow], order: SortOrder) {
    rows.sort_by(|a, b| compare_rows(a, b, order));
}

/// Strongest gainers (descending) and losers (ascending) for one timeframe.
pub fn top_movers(view: &[FilteredRow], timeframe: Timeframe, limit: usize) -> TopMovers {
    let movers = |keep: fn(f64) -> bool, direction: SortDirection| {
        let mut rows: Vec<FilteredRow> = view
            .iter()
            .filter(|row| {
                row.coin
                    .change(timeframe)
                    .filter(|v| v.is_finite())
                    .is_some_and(keep)
            })
            .cloned()
            .collect();
        sort_rows(
            &mut rows,
            SortOrder {
                key: SortKey::Change(timeframe),
                direction,
            },
        );
        rows.truncate(limit);
        rows
    };

    TopMovers {
        timeframe,
        gainers: movers(|v| v > 0.0, SortDirection::Descending),
        losers: movers(|v| v < 0.0, SortDirection::Ascending),
    }
}

fn market_sentiment(merged: &[MergedRow]) -> MarketSentiment {
    let live_avg_1h = mean(merged.iter().map(|row| row.coin.change_1h));
    let stored_avg_1h = mean(merged.iter().map(|row| row.stored_change_1h));
    MarketSentiment {
        live_avg_1h,
        stored_avg_1h,
        sentiment: Sentiment::compare(live_avg_1h, stored_avg_1h),
    }
}

fn mean(values: impl Iterator<Item = Option<f64>>) -> f64 {
    let (sum, count) = values
        .flatten()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn compare_rows(a: &FilteredRow, b: &FilteredRow, order: SortOrder) -> Ordering {
    match order.key {
        SortKey::Name => directed(
            a.coin
                .name
                .to_lowercase()
                .cmp(&b.coin.name.to_lowercase()),
            order.direction,
        ),
        SortKey::Rank => compare_present(
            a.coin.market_cap_rank.map(f64::from),
            b.coin.market_cap_rank.map(f64::from),
            order.direction,
        ),
        SortKey::Price => compare_present(a.coin.current_price, b.coin.current_price, order.direction),
        SortKey::MarketCap => compare_present(a.coin.market_cap, b.coin.market_cap, order.direction),
        SortKey::Volume => compare_present(a.coin.total_volume, b.coin.total_volume, order.direction),
        SortKey::Change(timeframe) => compare_present(
            a.coin.change(timeframe),
            b.coin.change(timeframe),
            order.direction,
        ),
    }
}

fn compare_present(a: Option<f64>, b: Option<f64>, direction: SortDirection) -> Ordering {
    let a = a.filter(|v| v.is_finite());
    let b = b.filter(|v| v.is_finite());
    match (a, b) {
        (Some(x), Some(y)) => directed(x.total_cmp(&y), direction),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn directed(ordering: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Ascending => ordering,
        SortDirection::Descending => ordering.reverse(),
    }
}
