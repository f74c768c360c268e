//! Percent change of each futures close against the next-longer resolution's close.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Close prices per resolution. Exports that label columns `1m_close`, `5m_close` and so on
/// decode into the same fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuturesCloseRow {
    pub symbol: String,
    #[serde(default, alias = "1m_close")]
    pub close_1m: Option<f64>,
    #[serde(default, alias = "5m_close")]
    pub close_5m: Option<f64>,
    #[serde(default, alias = "15m_close")]
    pub close_15m: Option<f64>,
    #[serde(default, alias = "1h_close")]
    pub close_1h: Option<f64>,
    #[serde(default, alias = "4h_close")]
    pub close_4h: Option<f64>,
    #[serde(default, alias = "1d_close")]
    pub close_1d: Option<f64>,
}

/// `change_1m` compares the 1m close to the 5m close, `change_5m` the 5m close to the
/// 15m close, and so on up to `change_4h` against the daily close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseChangeRow {
    pub symbol: String,
    pub change_1m: Option<f64>,
    pub change_5m: Option<f64>,
    pub change_15m: Option<f64>,
    pub change_1h: Option<f64>,
    pub change_4h: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReverseChangeReport {
    pub input_rows: u64,
    pub complete_rows: u64,
    pub undefined_cells: u64,
}

impl ReverseChangeRow {
    fn cells(&self) -> [Option<f64>; 5] {
        [
            self.change_1m,
            self.change_5m,
            self.change_15m,
            self.change_1h,
            self.change_4h,
        ]
    }
}

pub fn compute_reverse_changes(rows: &[FuturesCloseRow]) -> Vec<ReverseChangeRow> {
    compute_reverse_changes_with_report(rows).0
}

pub fn compute_reverse_changes_with_report(
    rows: &[FuturesCloseRow],
) -> (Vec<ReverseChangeRow>, ReverseChangeReport) {
    let mut report = ReverseChangeReport {
        input_rows: rows.len() as u64,
        ..ReverseChangeReport::default()
    };

    let out: Vec<ReverseChangeRow> = rows
        .iter()
        .map(|row| {
            let changed = ReverseChangeRow {
                symbol: row.symbol.clone(),
                change_1m: percent_change(row.close_1m, row.close_5m),
                change_5m: percent_change(row.close_5m, row.close_15m),
                change_15m: percent_change(row.close_15m, row.close_1h),
                change_1h: percent_change(row.close_1h, row.close_4h),
                change_4h: percent_change(row.close_4h, row.close_1d),
            };
            let undefined = changed.cells().iter().filter(|c| c.is_none()).count() as u64;
            if undefined == 0 {
                report.complete_rows += 1;
            }
            report.undefined_cells += undefined;
            changed
        })
        .collect();

    debug!(
        component = "reverse_change",
        event = "reverse_change.computed",
        input_rows = report.input_rows,
        complete_rows = report.complete_rows,
        undefined_cells = report.undefined_cells
    );

    (out, report)
}

fn percent_change(current: Option<f64>, reference: Option<f64>) -> Option<f64> {
    let current = current.filter(|v| v.is_finite())?;
    let reference = reference.filter(|v| v.is_finite() && *v != 0.0)?;
    let change = (current - reference) / reference * 100.0;
    change.is_finite().then_some(change)
}
