//! Left join of the live market snapshot against stored 1h changes.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::snapshot::{CoinSnapshotRow, HistoricalChangeRow};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedRow {
    #[serde(flatten)]
    pub coin: CoinSnapshotRow,
    pub stored_change_1h: Option<f64>,
    pub stored_at: Option<DateTime<Utc>>,
}

impl MergedRow {
    pub fn unmatched(coin: CoinSnapshotRow) -> Self {
        Self {
            coin,
            stored_change_1h: None,
            stored_at: None,
        }
    }
}

/// Every live row appears exactly once in the output, in input order. When the stored
/// snapshot holds several rows for one id, the latest capture wins (ties go to the later
/// row).
pub fn merge_historical(
    live: &[CoinSnapshotRow],
    historical: &[HistoricalChangeRow],
) -> Vec<MergedRow> {
    let latest = latest_by_id(historical);
    let mut matched = 0usize;

    let rows: Vec<MergedRow> = live
        .iter()
        .map(|coin| match latest.get(coin.id.as_str()) {
            Some(stored) => {
                matched += 1;
                MergedRow {
                    coin: coin.clone(),
                    stored_change_1h: stored.change_1h,
                    stored_at: stored.timestamp,
                }
            }
            None => MergedRow::unmatched(coin.clone()),
        })
        .collect();

    debug!(
        component = "merge",
        event = "merge.completed",
        live_rows = live.len(),
        historical_rows = historical.len(),
        matched_rows = matched
    );

    rows
}

fn latest_by_id(historical: &[HistoricalChangeRow]) -> HashMap<&str, &HistoricalChangeRow> {
    let mut latest: HashMap<&str, &HistoricalChangeRow> = HashMap::new();
    for row in historical {
        match latest.entry(row.id.as_str()) {
            Entry::Occupied(mut entry) => {
                if row.timestamp >= entry.get().timestamp {
                    entry.insert(row);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(row);
            }
        }
    }
    latest
}
