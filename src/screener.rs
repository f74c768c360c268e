//! Screener HTTP routes over a swappable snapshot source.

use std::sync::{Arc, PoisonError, RwLock};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::config::ScreenerConfig;
use crate::filters::{
    apply_filter_chain, default_rank_ceiling, price_range, FilterInputError, FilterSpec,
    RawFilterQuery, StageReport,
};
use crate::format::{format_currency, format_ist_timestamp};
use crate::merge::merge_historical;
use crate::metrics::{trade_plan, MetricsError, TradePlan};
use crate::pipeline::{
    run_pipeline_with_config, top_movers, FilteredRow, SortDirection, SortKey, SortOrder,
    SummaryStats, TopMovers,
};
use crate::reverse_change::{
    compute_reverse_changes_with_report, FuturesCloseRow, ReverseChangeReport, ReverseChangeRow,
};
use crate::snapshot::{CoinSnapshotRow, HistoricalChangeRow, SnapshotPair, Timeframe};

pub trait SnapshotSource: Send + Sync + 'static {
    fn snapshot(&self) -> SnapshotPair;
}

/// Holds one snapshot pair; refreshes replace it wholesale.
#[derive(Clone)]
pub struct InMemorySnapshotSource {
    inner: Arc<RwLock<SnapshotPair>>,
}

impl InMemorySnapshotSource {
    pub fn new(snapshot: SnapshotPair) -> Self {
        Self {
            inner: Arc::new(RwLock::new(snapshot)),
        }
    }

    pub fn demo() -> Self {
        Self::new(demo_snapshot())
    }

    pub fn replace_snapshot(&self, snapshot: SnapshotPair) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = snapshot;
    }
}

impl SnapshotSource for InMemorySnapshotSource {
    fn snapshot(&self) -> SnapshotPair {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unprocessable(String),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unprocessable(_) | Self::Metrics(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViewQuery {
    #[serde(flatten)]
    pub filters: RawFilterQuery,
    pub sort: Option<String>,
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewResponse {
    pub rows: Vec<FilteredRow>,
    pub stats: SummaryStats,
    pub stages: Vec<StageReport>,
    pub input_errors: Vec<FilterInputError>,
    pub snapshot_label: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MoversQuery {
    #[serde(flatten)]
    pub filters: RawFilterQuery,
    pub timeframe: Option<String>,
    pub limit: Option<String>,
}

/// Filter parameters narrow the lookup to the same view `/screener/view` would return.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanQuery {
    #[serde(flatten)]
    pub filters: RawFilterQuery,
    pub id: Option<String>,
    pub target_pct: Option<String>,
    pub stop_loss_pct: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanResponse {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub plan: TradePlan,
    pub formatted_price: String,
    pub formatted_target: String,
    pub formatted_stop_loss: String,
    pub input_errors: Vec<FilterInputError>,
}

/// Seed values for the rank and price inputs of a filter form.
#[derive(Debug, Clone, Serialize)]
pub struct BoundsResponse {
    pub rank_ceiling: Option<u32>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReverseChangeResponse {
    pub rows: Vec<ReverseChangeRow>,
    pub report: ReverseChangeReport,
}

/// Paths served by [`screener_router_with_config`].
pub const SCREENER_ROUTES: [&str; 5] = [
    VIEW_ROUTE,
    MOVERS_ROUTE,
    PLAN_ROUTE,
    BOUNDS_ROUTE,
    REVERSE_CHANGES_ROUTE,
];

const VIEW_ROUTE: &str = "/screener/view";
const MOVERS_ROUTE: &str = "/screener/movers";
const PLAN_ROUTE: &str = "/screener/plan";
const BOUNDS_ROUTE: &str = "/screener/bounds";
const REVERSE_CHANGES_ROUTE: &str = "/screener/reverse-changes";

pub fn screener_router(source: Arc<dyn SnapshotSource>) -> Router {
    screener_router_with_config(source, ScreenerConfig::default())
}

pub fn screener_router_with_config(
    source: Arc<dyn SnapshotSource>,
    cfg: ScreenerConfig,
) -> Router {
    Router::new()
        .route(VIEW_ROUTE, get(get_view))
        .route(MOVERS_ROUTE, get(get_movers))
        .route(PLAN_ROUTE, get(get_plan))
        .route(BOUNDS_ROUTE, get(get_bounds))
        .route(REVERSE_CHANGES_ROUTE, post(post_reverse_changes))
        .with_state(ScreenerAppState {
            source,
            cfg: Arc::new(cfg),
        })
}

/// Fixed sample pair used when no snapshot files are configured.
pub fn demo_snapshot() -> SnapshotPair {
    let captured = Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).single();
    let earlier = Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 0).single();

    let live = vec![
        demo_coin(
            ("bitcoin", "Bitcoin", "btc"),
            Some(1),
            [Some(5_800_000.0), Some(1.15e14), Some(2.5e12)],
            [Some(0.35), Some(1.8), Some(4.2), Some(6.1), Some(9.5), Some(35.0), Some(80.0)],
            Some(1.7),
        ),
        demo_coin(
            ("ethereum", "Ethereum", "eth"),
            Some(2),
            [Some(310_000.0), Some(3.7e13), Some(1.4e12)],
            [Some(-0.7), Some(-2.4), Some(-5.0), Some(-3.2), Some(2.1), Some(12.0), Some(30.5)],
            Some(-2.2),
        ),
        demo_coin(
            ("tether", "Tether", "usdt"),
            Some(3),
            [Some(87.5), Some(1.0e13), Some(4.0e12)],
            [Some(0.01), Some(-0.02), Some(0.01), Some(0.0), Some(-0.01), Some(0.1), Some(0.2)],
            Some(0.3),
        ),
        demo_coin(
            ("solana", "Solana", "sol"),
            Some(5),
            [Some(14_500.0), Some(6.8e12), Some(2.9e11)],
            [Some(0.9), Some(6.3), Some(11.4), Some(15.0), Some(22.7), Some(-8.0), Some(140.0)],
            Some(6.0),
        ),
        demo_coin(
            ("dogecoin", "Dogecoin", "doge"),
            Some(8),
            [Some(14.2), Some(2.1e12), Some(1.2e11)],
            [Some(-0.2), Some(-5.5), Some(-9.1), Some(-4.4), Some(3.3), Some(-20.0), Some(55.0)],
            Some(-5.1),
        ),
        demo_coin(
            ("cardano", "Cardano", "ada"),
            Some(10),
            [Some(52.3), Some(1.85e12), Some(4.6e10)],
            [Some(-0.6), Some(-1.1), Some(-2.8), Some(-6.5), Some(-10.2), Some(-25.0), Some(-12.0)],
            Some(-1.0),
        ),
        demo_coin(
            ("chainlink", "Chainlink", "link"),
            Some(14),
            [Some(1_250.0), Some(7.8e11), Some(3.1e10)],
            [Some(0.05), Some(3.2), Some(7.7), Some(1.2), Some(-4.0), Some(18.0), Some(42.0)],
            Some(3.0),
        ),
        demo_coin(
            ("pepe", "Pepe", "pepe"),
            Some(40),
            [Some(0.0009), Some(3.6e11), Some(9.5e10)],
            [Some(1.4), Some(12.7), Some(25.0), Some(31.0), Some(48.0), Some(210.0), None],
            Some(12.1),
        ),
    ];

    let historical = vec![
        stored("bitcoin", -0.4, earlier),
        stored("bitcoin", 0.25, captured),
        stored("ethereum", -0.9, captured),
        stored("tether", 0.0, captured),
        stored("solana", 0.4, captured),
        stored("dogecoin", 0.1, captured),
        stored("cardano", -0.8, captured),
        stored("pepe", 1.1, captured),
    ];

    SnapshotPair { live, historical }
}

fn demo_coin(
    (id, name, symbol): (&str, &str, &str),
    rank: Option<u32>,
    [price, market_cap, volume]: [Option<f64>; 3],
    changes: [Option<f64>; 7],
    market_cap_change_24h: Option<f64>,
) -> CoinSnapshotRow {
    let mut coin = CoinSnapshotRow {
        market_cap_rank: rank,
        current_price: price,
        market_cap,
        total_volume: volume,
        price_change_percentage_24h: changes[1],
        market_cap_change_percentage_24h: market_cap_change_24h,
        ..CoinSnapshotRow::new(id, name, symbol)
    };
    for (timeframe, value) in Timeframe::ALL.into_iter().zip(changes) {
        coin.set_change(timeframe, value);
    }
    coin
}

fn stored(id: &str, change_1h: f64, timestamp: Option<DateTime<Utc>>) -> HistoricalChangeRow {
    HistoricalChangeRow {
        timestamp,
        ..HistoricalChangeRow::new(id, Some(change_1h))
    }
}

#[derive(Clone)]
struct ScreenerAppState {
    source: Arc<dyn SnapshotSource>,
    cfg: Arc<ScreenerConfig>,
}

async fn get_view(
    State(state): State<ScreenerAppState>,
    Query(query): Query<ViewQuery>,
) -> Json<ViewResponse> {
    let parsed = FilterSpec::from_raw(&query.filters);
    let mut input_errors = parsed.errors;
    let sort = parse_sort_order(query.sort.as_deref(), query.dir.as_deref(), &mut input_errors);

    let snapshot = state.source.snapshot();
    let output = run_pipeline_with_config(
        &snapshot.live,
        &snapshot.historical,
        &parsed.spec,
        &state.cfg,
        sort,
    );

    info!(
        component = "screener_server",
        event = "http.view.request",
        rows = output.view.len(),
        input_errors = input_errors.len()
    );

    Json(ViewResponse {
        snapshot_label: output.stats.latest_snapshot_at.map(format_ist_timestamp),
        rows: output.view,
        stats: output.stats,
        stages: output.stages,
        input_errors,
    })
}

async fn get_movers(
    State(state): State<ScreenerAppState>,
    Query(query): Query<MoversQuery>,
) -> Result<Json<TopMovers>, ApiError> {
    let timeframe = match query.timeframe.as_deref().map(str::trim) {
        None | Some("") => Timeframe::H24,
        Some(raw) => Timeframe::parse(raw)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown timeframe '{raw}'")))?,
    };
    let limit = match query.limit.as_deref().map(str::trim) {
        None | Some("") => state.cfg.top_movers_limit,
        Some(raw) => raw
            .parse::<usize>()
            .ok()
            .filter(|limit| *limit > 0)
            .ok_or_else(|| ApiError::BadRequest(format!("invalid limit '{raw}'")))?,
    };

    let parsed = FilterSpec::from_raw(&query.filters);
    let snapshot = state.source.snapshot();
    let output = run_pipeline_with_config(
        &snapshot.live,
        &snapshot.historical,
        &parsed.spec,
        &state.cfg,
        SortOrder::default(),
    );

    Ok(Json(top_movers(&output.view, timeframe, limit)))
}

async fn get_plan(
    State(state): State<ScreenerAppState>,
    Query(query): Query<PlanQuery>,
) -> Result<Json<PlanResponse>, ApiError> {
    let id = query
        .id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing coin id".to_string()))?;
    let target_pct = parse_pct("target_pct", query.target_pct.as_deref(), state.cfg.target_pct)?;
    let stop_loss_pct = parse_pct(
        "stop_loss_pct",
        query.stop_loss_pct.as_deref(),
        state.cfg.stop_loss_pct,
    )?;

    let parsed = FilterSpec::from_raw(&query.filters);

    let snapshot = state.source.snapshot();
    if !snapshot.live.iter().any(|coin| coin.id == id) {
        return Err(ApiError::NotFound(format!("unknown coin '{id}'")));
    }
    let (view, _) = apply_filter_chain(
        merge_historical(&snapshot.live, &snapshot.historical),
        &parsed.spec,
        &state.cfg.buckets,
    );
    let coin = view
        .into_iter()
        .map(|row| row.coin)
        .find(|coin| coin.id == id)
        .ok_or_else(|| ApiError::NotFound(format!("coin '{id}' is not in the filtered view")))?;
    let price = coin
        .current_price
        .ok_or_else(|| ApiError::Unprocessable(format!("coin '{id}' has no current price")))?;

    let plan = trade_plan(price, target_pct, stop_loss_pct)?;

    Ok(Json(PlanResponse {
        formatted_price: format_currency(Some(plan.current_price)),
        formatted_target: format_currency(Some(plan.target_price)),
        formatted_stop_loss: format_currency(Some(plan.stop_loss_price)),
        id: coin.id,
        name: coin.name,
        symbol: coin.symbol,
        plan,
        input_errors: parsed.errors,
    }))
}

async fn get_bounds(State(state): State<ScreenerAppState>) -> Json<BoundsResponse> {
    let snapshot = state.source.snapshot();
    let range = price_range(&snapshot.live);
    Json(BoundsResponse {
        rank_ceiling: default_rank_ceiling(&snapshot.live),
        price_min: range.map(|(lo, _)| lo),
        price_max: range.map(|(_, hi)| hi),
    })
}

async fn post_reverse_changes(
    Json(rows): Json<Vec<FuturesCloseRow>>,
) -> Json<ReverseChangeResponse> {
    let (rows, report) = compute_reverse_changes_with_report(&rows);
    Json(ReverseChangeResponse { rows, report })
}

fn parse_sort_order(
    sort: Option<&str>,
    dir: Option<&str>,
    errors: &mut Vec<FilterInputError>,
) -> SortOrder {
    let mut order = SortOrder::default();

    if let Some(raw) = sort.filter(|raw| !raw.trim().is_empty()) {
        match SortKey::parse(raw) {
            Some(key) => order.key = key,
            None => errors.push(FilterInputError::InvalidChoice {
                field: "sort",
                value: raw.to_string(),
            }),
        }
    }

    if let Some(raw) = dir.filter(|raw| !raw.trim().is_empty()) {
        match raw.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => order.direction = SortDirection::Ascending,
            "desc" | "descending" => order.direction = SortDirection::Descending,
            _ => errors.push(FilterInputError::InvalidChoice {
                field: "dir",
                value: raw.to_string(),
            }),
        }
    }

    order
}

fn parse_pct(field: &str, raw: Option<&str>, default: f64) -> Result<f64, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(raw) => raw
            .parse::<f64>()
            .map_err(|_| ApiError::BadRequest(format!("invalid number for {field}: '{raw}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Indicator;
    use crate::pipeline::run_pipeline;

    #[test]
    fn demo_snapshot_has_unique_live_ids_and_one_unmatched_coin() {
        let demo = demo_snapshot();
        let mut ids: Vec<&str> = demo.live.iter().map(|coin| coin.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), demo.live.len());

        let output = run_pipeline(&demo.live, &demo.historical, &FilterSpec::default());
        assert_eq!(output.view.len(), demo.live.len());
        let unmatched: Vec<&str> = output
            .view
            .iter()
            .filter(|row| row.stored_change_1h.is_none())
            .map(|row| row.coin.id.as_str())
            .collect();
        assert_eq!(unmatched, vec!["chainlink"]);
    }

    #[test]
    fn demo_snapshot_covers_every_indicator() {
        let demo = demo_snapshot();
        let output = run_pipeline(&demo.live, &demo.historical, &FilterSpec::default());
        let label = |id: &str| {
            output
                .view
                .iter()
                .find(|row| row.coin.id == id)
                .map(|row| row.indicator)
        };

        assert_eq!(label("bitcoin"), Some(Indicator::Buy));
        assert_eq!(label("ethereum"), Some(Indicator::Sell));
        assert_eq!(label("tether"), Some(Indicator::Hold));
    }

    #[test]
    fn replace_snapshot_swaps_the_whole_pair() {
        let source = InMemorySnapshotSource::demo();
        source.replace_snapshot(SnapshotPair::default());
        assert_eq!(source.snapshot(), SnapshotPair::default());
    }

    #[test]
    fn sort_parsing_reports_bad_choices() {
        let mut errors = Vec::new();
        let order = parse_sort_order(Some("volume"), Some("desc"), &mut errors);
        assert_eq!(order.key, SortKey::Volume);
        assert_eq!(order.direction, SortDirection::Descending);
        assert!(errors.is_empty());

        let order = parse_sort_order(Some("hype"), Some("sideways"), &mut errors);
        assert_eq!(order, SortOrder::default());
        assert_eq!(errors.len(), 2);
    }
}
