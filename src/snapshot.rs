//! Market-data and stored-change snapshot rows.
//!
//! Field names follow the provider's `/coins/markets` payload so a fetched body can be
//! decoded as-is. Every numeric field is optional: upstream rows routinely omit rank,
//! price or individual change columns, and downstream code treats absence explicitly.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

/// Bare epoch numbers above this magnitude are read as milliseconds.
const EPOCH_MILLIS_ABOVE: f64 = 1e11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "24h")]
    H24,
    #[serde(rename = "7d")]
    D7,
    #[serde(rename = "14d")]
    D14,
    #[serde(rename = "30d")]
    D30,
    #[serde(rename = "200d")]
    D200,
    #[serde(rename = "1y")]
    Y1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 7] = [
        Self::H1,
        Self::H24,
        Self::D7,
        Self::D14,
        Self::D30,
        Self::D200,
        Self::Y1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::H1 => "1h",
            Self::H24 => "24h",
            Self::D7 => "7d",
            Self::D14 => "14d",
            Self::D30 => "30d",
            Self::D200 => "200d",
            Self::Y1 => "1y",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|timeframe| timeframe.as_str() == normalized)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinSnapshotRow {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default, deserialize_with = "deserialize_lenient_rank")]
    pub market_cap_rank: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub current_price: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub market_cap: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub total_volume: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub price_change_percentage_24h: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub market_cap_change_percentage_24h: Option<f64>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_f64",
        rename = "price_change_percentage_1h_in_currency"
    )]
    pub change_1h: Option<f64>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_f64",
        rename = "price_change_percentage_24h_in_currency"
    )]
    pub change_24h: Option<f64>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_f64",
        rename = "price_change_percentage_7d_in_currency"
    )]
    pub change_7d: Option<f64>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_f64",
        rename = "price_change_percentage_14d_in_currency"
    )]
    pub change_14d: Option<f64>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_f64",
        rename = "price_change_percentage_30d_in_currency"
    )]
    pub change_30d: Option<f64>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_f64",
        rename = "price_change_percentage_200d_in_currency"
    )]
    pub change_200d: Option<f64>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_f64",
        rename = "price_change_percentage_1y_in_currency"
    )]
    pub change_1y: Option<f64>,
}

impl CoinSnapshotRow {
    /// A row with only its identity filled in.
    pub fn new(id: impl Into<String>, name: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            symbol: symbol.into(),
            market_cap_rank: None,
            current_price: None,
            market_cap: None,
            total_volume: None,
            price_change_percentage_24h: None,
            market_cap_change_percentage_24h: None,
            change_1h: None,
            change_24h: None,
            change_7d: None,
            change_14d: None,
            change_30d: None,
            change_200d: None,
            change_1y: None,
        }
    }

    pub fn change(&self, timeframe: Timeframe) -> Option<f64> {
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

    pub fn set_change(&mut self, timeframe: Timeframe, value: Option<f64>) {
        let slot = match timeframe {
            Timeframe::H1 => &mut self.change_1h,
            Timeframe::H24 => &mut self.change_24h,
            Timeframe::D7 => &mut self.change_7d,
            Timeframe::D14 => &mut self.change_14d,
            Timeframe::D30 => &mut self.change_30d,
            Timeframe::D200 => &mut self.change_200d,
            Timeframe::Y1 => &mut self.change_1y,
        };
        *slot = value;
    }

    /// The 24h move used for volatility bucketing.
    pub fn volatility_change(&self) -> Option<f64> {
        self.price_change_percentage_24h.or(self.change_24h)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalChangeRow {
    pub id: String,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_f64",
        rename = "price_change_percentage_1h_in_currency"
    )]
    pub change_1h: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_capture_time")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl HistoricalChangeRow {
    pub fn new(id: impl Into<String>, change_1h: Option<f64>) -> Self {
        Self {
            id: id.into(),
            change_1h,
            timestamp: None,
        }
    }
}

/// One consistent pair of inputs for a rendering pass. Replaced wholesale on refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPair {
    pub live: Vec<CoinSnapshotRow>,
    pub historical: Vec<HistoricalChangeRow>,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("duplicate coin identifier '{0}' in market snapshot")]
    DuplicateIdentifier(String),
}

pub fn parse_market_snapshot(json: &str) -> Result<Vec<CoinSnapshotRow>, SnapshotError> {
    let rows: Vec<CoinSnapshotRow> = serde_json::from_str(json)?;

    let mut seen = HashSet::new();
    for row in &rows {
        if !seen.insert(row.id.as_str()) {
            return Err(SnapshotError::DuplicateIdentifier(row.id.clone()));
        }
    }

    info!(
        component = "snapshot",
        event = "snapshot.market.decoded",
        rows = rows.len()
    );

    Ok(rows)
}

pub fn parse_historical_snapshot(json: &str) -> Result<Vec<HistoricalChangeRow>, SnapshotError> {
    let rows: Vec<HistoricalChangeRow> = serde_json::from_str(json)?;

    info!(
        component = "snapshot",
        event = "snapshot.historical.decoded",
        rows = rows.len(),
        undated_rows = rows.iter().filter(|row| row.timestamp.is_none()).count()
    );

    Ok(rows)
}

pub fn load_snapshot_pair(
    live_path: &Path,
    historical_path: &Path,
) -> Result<SnapshotPair, SnapshotError> {
    let live = parse_market_snapshot(&fs::read_to_string(live_path)?)?;
    let historical = parse_historical_snapshot(&fs::read_to_string(historical_path)?)?;

    info!(
        component = "snapshot",
        event = "snapshot.pair.loaded",
        live_path = %live_path.display(),
        historical_path = %historical_path.display(),
        live_rows = live.len(),
        historical_rows = historical.len()
    );

    Ok(SnapshotPair { live, historical })
}

pub fn latest_capture_time(rows: &[HistoricalChangeRow]) -> Option<DateTime<Utc>> {
    rows.iter().filter_map(|row| row.timestamp).max()
}

/// Accepts RFC 3339, or a naive ISO date-time taken as UTC.
pub fn parse_capture_time(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .into_iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Reads a capture time from a stored row. Strings go through [`parse_capture_time`];
/// `{"$date": …}` wrappers hold a string, epoch milliseconds or `{"$numberLong": …}`;
/// a bare number is epoch seconds, or milliseconds when its magnitude exceeds
/// [`EPOCH_MILLIS_ABOVE`]. Anything else degrades to `None`.
pub fn capture_time_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => parse_capture_time(raw),
        Value::Number(_) => {
            let epoch = value.as_f64().filter(|v| v.is_finite())?;
            if epoch.abs() > EPOCH_MILLIS_ABOVE {
                DateTime::from_timestamp_millis(epoch as i64)
            } else {
                DateTime::from_timestamp(epoch as i64, 0)
            }
        }
        Value::Object(map) => match map.get("$date")? {
            Value::String(raw) => parse_capture_time(raw),
            Value::Number(millis) => DateTime::from_timestamp_millis(millis.as_i64()?),
            Value::Object(long) => long
                .get("$numberLong")
                .and_then(Value::as_str)
                .and_then(|raw| raw.trim().parse::<i64>().ok())
                .and_then(DateTime::from_timestamp_millis),
            _ => None,
        },
        _ => None,
    }
}

// Field-level decoders: a malformed value becomes `None` instead of failing the snapshot.

fn deserialize_capture_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(capture_time_from_value))
}

fn deserialize_lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(lenient_f64))
}

fn deserialize_lenient_rank<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(lenient_f64)
        .filter(|rank| rank.fract() == 0.0 && *rank >= 0.0 && *rank <= f64::from(u32::MAX))
        .map(|rank| rank as u32))
}

fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn decodes_provider_field_names_and_tolerates_nulls() {
        let json = r#"[
            {
                "id": "bitcoin",
                "name": "Bitcoin",
                "symbol": "btc",
                "market_cap_rank": 1,
                "current_price": 8512345.5,
                "market_cap": 168000000000000,
                "total_volume": 2500000000000,
                "price_change_percentage_24h": 1.2,
                "price_change_percentage_1h_in_currency": 0.31,
                "price_change_percentage_24h_in_currency": 1.25,
                "price_change_percentage_7d_in_currency": null,
                "image": "ignored"
            },
            { "id": "mystery", "market_cap_rank": null }
        ]"#;

        let rows = parse_market_snapshot(json).expect("payload should decode");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].market_cap_rank, Some(1));
        assert_eq!(rows[0].change(Timeframe::H1), Some(0.31));
        assert_eq!(rows[0].change(Timeframe::D7), None);
        assert_eq!(rows[0].volatility_change(), Some(1.2));
        assert_eq!(rows[1].name, "");
        assert_eq!(rows[1].current_price, None);
    }

    #[test]
    fn duplicate_identifiers_are_rejected() {
        let json = r#"[{"id":"eth"},{"id":"eth"}]"#;
        let err = parse_market_snapshot(json).expect_err("duplicate ids must fail");
        assert!(matches!(err, SnapshotError::DuplicateIdentifier(id) if id == "eth"));
    }

    #[test]
    fn capture_times_accept_offset_and_naive_forms() {
        let expected = Utc
            .with_ymd_and_hms(2025, 3, 4, 5, 6, 7)
            .single()
            .expect("valid datetime");

        assert_eq!(parse_capture_time("2025-03-04T05:06:07Z"), Some(expected));
        assert_eq!(
            parse_capture_time("2025-03-04T10:36:07+05:30"),
            Some(expected)
        );
        assert_eq!(parse_capture_time("2025-03-04T05:06:07"), Some(expected));
        assert_eq!(parse_capture_time("2025-03-04 05:06:07.000"), Some(expected));
        assert_eq!(parse_capture_time("yesterday"), None);
    }

    #[test]
    fn historical_rows_keep_bad_timestamps_as_absent() {
        let json = r#"[
            {"id":"bitcoin","price_change_percentage_1h_in_currency":0.4,"timestamp":"2025-01-01T00:00:00Z"},
            {"id":"ethereum","timestamp":"not-a-time"}
        ]"#;
        let rows = parse_historical_snapshot(json).expect("payload should decode");

        assert_eq!(rows[0].change_1h, Some(0.4));
        assert!(rows[0].timestamp.is_some());
        assert_eq!(rows[1].change_1h, None);
        assert_eq!(rows[1].timestamp, None);
        assert_eq!(latest_capture_time(&rows), rows[0].timestamp);
    }

    #[test]
    fn capture_times_accept_date_wrappers_and_epoch_numbers() {
        let expected = Utc
            .with_ymd_and_hms(2025, 3, 4, 5, 6, 7)
            .single()
            .expect("valid datetime");
        let json = r#"[
            {"id":"a","timestamp":{"$date":"2025-03-04T05:06:07Z"}},
            {"id":"b","timestamp":{"$date":1741064767000}},
            {"id":"c","timestamp":{"$date":{"$numberLong":"1741064767000"}}},
            {"id":"d","timestamp":1741064767},
            {"id":"e","timestamp":1741064767000},
            {"id":"f","timestamp":{"$oid":"65f0c0ffee"}},
            {"id":"g","timestamp":[2025,3,4]},
            {"id":"h","timestamp":true}
        ]"#;

        let rows = parse_historical_snapshot(json).expect("payload should decode");
        let times: Vec<Option<DateTime<Utc>>> = rows.iter().map(|row| row.timestamp).collect();
        assert_eq!(
            times,
            vec![
                Some(expected),
                Some(expected),
                Some(expected),
                Some(expected),
                Some(expected),
                None,
                None,
                None
            ]
        );
    }

    #[test]
    fn integral_float_ranks_decode_and_other_ranks_are_absent() {
        let json = r#"[
            {"id":"a","market_cap_rank":3.0},
            {"id":"b","market_cap_rank":2.5},
            {"id":"c","market_cap_rank":"x"},
            {"id":"d","market_cap_rank":-1},
            {"id":"e","market_cap_rank":1e12},
            {"id":"f","market_cap_rank":7}
        ]"#;

        let rows = parse_market_snapshot(json).expect("payload should decode");
        let ranks: Vec<Option<u32>> = rows.iter().map(|row| row.market_cap_rank).collect();
        assert_eq!(ranks, vec![Some(3), None, None, None, None, Some(7)]);
    }

    #[test]
    fn non_numeric_market_values_are_absent() {
        let json = r#"[{"id":"a","current_price":"12.5","total_volume":{"n":1},"market_cap":false}]"#;
        let rows = parse_market_snapshot(json).expect("payload should decode");

        assert_eq!(rows[0].current_price, Some(12.5));
        assert_eq!(rows[0].total_volume, None);
        assert_eq!(rows[0].market_cap, None);
    }

    #[test]
    fn timeframe_parse_round_trips_labels() {
        for timeframe in Timeframe::ALL {
            assert_eq!(Timeframe::parse(timeframe.as_str()), Some(timeframe));
        }
        assert_eq!(Timeframe::parse(" 24H "), Some(Timeframe::H24));
        assert_eq!(Timeframe::parse("2h"), None);
    }
}
