use coindash::{
    apply_filter_chain, apply_stages, compute_indicator, compute_target_stop, demo_snapshot,
    format_currency, merge_historical, risk_reward_ratio, run_pipeline, top_movers,
    BucketBoundaries, CoinSnapshotRow, Comparison, FilterSpec, FilterStage, HistoricalChangeRow,
    Indicator, MergedRow, MetricsError, RawFilterQuery, Sentiment, SignColumn, SignFilter,
    StageOutcome, SummaryStats, Timeframe, VolumeBucket,
};
use regex::Regex;

fn ids<'a>(rows: impl IntoIterator<Item = &'a MergedRow>) -> Vec<String> {
    let mut out: Vec<String> = rows.into_iter().map(|row| row.coin.id.clone()).collect();
    out.sort();
    out
}

fn demo_merged() -> Vec<MergedRow> {
    let demo = demo_snapshot();
    merge_historical(&demo.live, &demo.historical)
}

fn momentum_spec() -> FilterSpec {
    FilterSpec {
        volume: Some(VolumeBucket::High),
        comparison: Some(Comparison::LiveAboveStored),
        ..FilterSpec::default()
    }
    .with_sign(SignColumn::Change24h, SignFilter::Positive)
    .with_sign(SignColumn::Change7d, SignFilter::Positive)
}

fn permutations(items: &[FilterStage]) -> Vec<Vec<FilterStage>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for idx in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(idx);
        for mut tail in permutations(&rest) {
            tail.insert(0, head);
            out.push(tail);
        }
    }
    out
}

#[test]
fn currency_output_has_grouped_shape_and_round_trips() {
    let shape = Regex::new(r"^₹ -?[0-9]{1,3}(,[0-9]{2,3})*\.[0-9]{2}$").expect("valid regex");
    let mut values: Vec<f64> = vec![
        0.0,
        0.0009,
        7.5,
        999.999,
        50_000.0,
        99_999.99,
        100_000.0,
        1_234_567.8,
        -2_500_000.25,
        98_765_432_109.87,
    ];
    for coin in demo_snapshot().live {
        values.extend(coin.current_price);
        values.extend(coin.market_cap);
    }

    for value in values {
        let text = format_currency(Some(value));
        assert!(shape.is_match(&text), "unexpected shape: {text}");

        let reparsed: f64 = text
            .trim_start_matches("₹ ")
            .replace(',', "")
            .parse()
            .expect("formatted currency should re-parse");
        assert!(
            (reparsed - value).abs() <= 0.01,
            "{value} formatted as {text}"
        );
    }
}

#[test]
fn currency_examples() {
    assert_eq!(format_currency(Some(50_000.0)), "₹ 50,000.00");
    assert_eq!(format_currency(Some(1_234_567.8)), "₹ 12,34,567.80");
    assert_eq!(format_currency(None), "₹ 0.00");
}

#[test]
fn indicator_and_target_stop_examples() {
    assert_eq!(compute_indicator(Some(0.3), Some(0.3), Some(1.0)), Indicator::Buy);
    assert_eq!(
        compute_indicator(Some(-0.6), Some(-0.6), Some(-1.0)),
        Indicator::Sell
    );
    assert_eq!(compute_indicator(Some(0.0), Some(0.0), Some(0.0)), Indicator::Hold);

    let levels = compute_target_stop(Some(100.0), 5.0, 3.0);
    assert!((levels.target_price - 105.0).abs() < 1e-9);
    assert!((levels.stop_loss_price - 97.0).abs() < 1e-9);
}

#[test]
fn risk_reward_with_zero_risk_is_an_error() {
    assert_eq!(
        risk_reward_ratio(105.0, 100.0, 100.0),
        Err(MetricsError::DivisionByZero { price: 100.0 })
    );
}

#[test]
fn filter_chain_is_idempotent() {
    let bounds = BucketBoundaries::default();
    let spec = FilterSpec {
        rank_ceiling: Some(20),
        price_floor: Some(10.0),
        ..momentum_spec()
    };

    let (once, _) = apply_filter_chain(demo_merged(), &spec, &bounds);
    let (twice, reports) = apply_filter_chain(once.clone(), &spec, &bounds);

    assert_eq!(once, twice);
    assert!(reports
        .iter()
        .all(|report| report.rows_before == report.rows_after));
}

#[test]
fn sign_bucket_and_comparison_order_does_not_matter() {
    let bounds = BucketBoundaries::default();
    let spec = momentum_spec();
    let movable = [
        FilterStage::Volume,
        FilterStage::Sign(SignColumn::Change24h),
        FilterStage::Sign(SignColumn::Change7d),
        FilterStage::Comparison,
    ];

    let (canonical, _) = apply_filter_chain(demo_merged(), &spec, &bounds);
    let expected = ids(&canonical);
    assert_eq!(expected, vec!["bitcoin", "pepe", "solana"]);

    for order in permutations(&movable) {
        let mut stages = vec![
            FilterStage::RankCeiling,
            FilterStage::PriceFloor,
            FilterStage::PriceCeiling,
        ];
        stages.extend(order.iter().copied());

        let (rows, _) = apply_stages(demo_merged(), &stages, &spec, &bounds);
        assert_eq!(ids(&rows), expected, "order {order:?}");
    }
}

#[test]
fn merge_keeps_every_live_row() {
    let demo = demo_snapshot();
    let historical_sets: Vec<Vec<HistoricalChangeRow>> = vec![
        Vec::new(),
        demo.historical.clone(),
        vec![HistoricalChangeRow::new("not-listed", Some(1.0))],
        demo.historical
            .iter()
            .chain(demo.historical.iter())
            .cloned()
            .collect(),
    ];

    for historical in &historical_sets {
        let merged = merge_historical(&demo.live, historical);
        assert_eq!(merged.len(), demo.live.len());
    }
}

#[test]
fn empty_input_gives_empty_view_and_zero_stats() {
    let demo = demo_snapshot();
    let output = run_pipeline(&[], &demo.historical, &momentum_spec());

    assert!(output.view.is_empty());
    assert!(output.stages.is_empty());
    assert_eq!(output.stats, SummaryStats::default());
    assert_eq!(output.stats.day_sentiment, Sentiment::Neutral);
}

#[test]
fn stage_reports_name_the_stage_that_emptied_the_set() {
    let demo = demo_snapshot();
    let spec = FilterSpec {
        price_floor: Some(1_000.0),
        price_ceiling: Some(10.0),
        ..FilterSpec::default()
    };

    let output = run_pipeline(&demo.live, &demo.historical, &spec);
    assert!(output.view.is_empty());
    assert_eq!(output.stats.row_count, 0);

    let emptied = output
        .stages
        .iter()
        .find(|report| report.rows_before > 0 && report.rows_after == 0)
        .expect("one stage should empty the set");
    assert_eq!(emptied.stage, FilterStage::PriceCeiling);
    assert_eq!(emptied.outcome, StageOutcome::Applied);
}

#[test]
fn absent_column_skips_its_stage() {
    let live = vec![
        CoinSnapshotRow {
            current_price: Some(10.0),
            ..CoinSnapshotRow::new("alpha", "Alpha", "alp")
        },
        CoinSnapshotRow {
            current_price: Some(20.0),
            ..CoinSnapshotRow::new("beta", "Beta", "bet")
        },
    ];
    let historical = vec![HistoricalChangeRow::new("alpha", Some(0.1))];
    let spec = FilterSpec {
        volume: Some(VolumeBucket::High),
        ..FilterSpec::default()
    };

    let output = run_pipeline(&live, &historical, &spec);
    assert_eq!(output.view.len(), 2);
    let volume = output
        .stages
        .iter()
        .find(|report| report.stage == FilterStage::Volume)
        .expect("volume stage reported");
    assert_eq!(volume.outcome, StageOutcome::SkippedMissingColumn);
}

#[test]
fn malformed_raw_input_keeps_other_filters_active() {
    let demo = demo_snapshot();
    let raw = RawFilterQuery {
        price_min: Some("abc".to_string()),
        change_24h: Some("negative".to_string()),
        ..RawFilterQuery::default()
    };

    let parsed = FilterSpec::from_raw(&raw);
    assert_eq!(parsed.errors.len(), 1);
    assert_eq!(parsed.spec.price_floor, None);

    let output = run_pipeline(&demo.live, &demo.historical, &parsed.spec);
    assert!(output
        .view
        .iter()
        .all(|row| row.coin.change_24h.is_some_and(|v| v < 0.0)));
    assert_eq!(output.stats.positive_24h, 0);
    assert_eq!(output.stats.day_sentiment, Sentiment::Bearish);
}

#[test]
fn market_sentiment_uses_the_unfiltered_snapshot() {
    let demo = demo_snapshot();
    let unfiltered = run_pipeline(&demo.live, &demo.historical, &FilterSpec::default());
    let narrowed = run_pipeline(
        &demo.live,
        &demo.historical,
        &FilterSpec::default().with_sign(SignColumn::Change1h, SignFilter::Negative),
    );

    assert!(narrowed.view.len() < unfiltered.view.len());
    assert_eq!(narrowed.stats.market, unfiltered.stats.market);
    assert!(unfiltered.stats.latest_snapshot_at.is_some());
}

#[test]
fn top_movers_are_ranked_by_magnitude() {
    let demo = demo_snapshot();
    let output = run_pipeline(&demo.live, &demo.historical, &FilterSpec::default());
    let movers = top_movers(&output.view, Timeframe::H24, 2);

    let gainers: Vec<&str> = movers.gainers.iter().map(|r| r.coin.id.as_str()).collect();
    let losers: Vec<&str> = movers.losers.iter().map(|r| r.coin.id.as_str()).collect();
    assert_eq!(gainers, vec!["pepe", "solana"]);
    assert_eq!(losers, vec!["dogecoin", "ethereum"]);
}
