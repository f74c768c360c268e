//! Coindash screener core crate.
//!
//! Current implemented scope:
//! - live/stored snapshot decoding and the stored-1h merge
//! - the ordered filter chain, derived metrics and display formatting
//! - summary aggregates, top movers and the trade-plan calculator
//! - futures reverse percent changes
//! - the JSON screener routes served by `screener_server`

mod config;
mod filters;
mod format;
mod merge;
mod metrics;
mod observability;
mod pipeline;
mod reverse_change;
mod screener;
mod snapshot;
#[cfg(test)]
mod test_support;

pub use config::{
    screener_config_from_env, screener_config_from_file, ConfigError, ScreenerConfig,
    ServerConfig, DEFAULT_BIND_ADDR, DEFAULT_TOP_MOVERS_LIMIT, HISTORICAL_SNAPSHOT_VAR,
    LIVE_SNAPSHOT_VAR,
};
pub use filters::{
    apply_filter_chain, apply_stages, classify_market_cap, classify_volatility, classify_volume,
    default_rank_ceiling, parse_price_bound, price_range, BucketBoundaries, Comparison,
    FilterInputError, FilterSpec, FilterStage, MarketCapBucket, ParsedFilterSpec,
    RawFilterQuery, SignColumn, SignFilter, StageOutcome, StageReport, VolatilityBucket,
    VolumeBucket,
};
pub use format::{
    digit_count_before_decimal, format_currency, format_ist_timestamp, format_percent,
    format_percent_label, CURRENCY_PREFIX, ZERO_CURRENCY,
};
pub use merge::{merge_historical, MergedRow};
pub use metrics::{
    compute_indicator, compute_indicator_with, compute_target_stop, risk_reward_ratio,
    trade_plan, Indicator, IndicatorThresholds, MetricsError, TargetStop, TradePlan,
    DEFAULT_STOP_LOSS_PCT, DEFAULT_TARGET_PCT,
};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_screener_config, log_source_selected,
    logging_config_from_env, LogFormat, LoggingConfig, LoggingInitError, SnapshotOrigin,
};
pub use pipeline::{
    annotate, run_pipeline, run_pipeline_with_config, sort_rows, summarize, top_movers,
    ChangeAverages, FilteredRow, MarketSentiment, PipelineOutput, Sentiment, SortDirection,
    SortKey, SortOrder, SummaryStats, TopMovers,
};
pub use reverse_change::{
    compute_reverse_changes, compute_reverse_changes_with_report, FuturesCloseRow,
    ReverseChangeReport, ReverseChangeRow,
};
pub use screener::{
    demo_snapshot, screener_router, screener_router_with_config, ApiError, InMemorySnapshotSource,
    SnapshotSource, SCREENER_ROUTES,
};
pub use snapshot::{
    capture_time_from_value, latest_capture_time, load_snapshot_pair, parse_capture_time,
    parse_historical_snapshot, parse_market_snapshot, CoinSnapshotRow, HistoricalChangeRow, SnapshotError, SnapshotPair,
    Timeframe,
};
