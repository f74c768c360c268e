//! Display formatting for table cells.
//!
//! All helpers are total: a missing or non-finite input produces the documented neutral
//! value instead of an error, because upstream fields are frequently absent.

use chrono::{DateTime, Utc};
use chrono_tz::Asia::Kolkata;

pub const CURRENCY_PREFIX: &str = "₹";
pub const ZERO_CURRENCY: &str = "₹ 0.00";

/// Rounded amounts at or above this use lakh/crore grouping.
const INDIAN_GROUPING_FROM: f64 = 100_000.0;

/// Formats an INR amount.
///
/// Below one lakh the integer part uses plain thousands grouping (`₹ 50,000.00`); from one
/// lakh up the Indian system applies: the last three digits, then groups of two
/// (`₹ 12,34,567.80`).
pub fn format_currency(value: Option<f64>) -> String {
    let Some(num) = value.filter(|v| v.is_finite()) else {
        return ZERO_CURRENCY.to_string();
    };

    let fixed = format!("{:.2}", num.abs());
    let (int_part, dec_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    // Pick the grouping from the rounded amount so 99,999.996 lands in lakh grouping.
    let rounded: f64 = fixed.parse().unwrap_or(num.abs());
    let grouped = if rounded < INDIAN_GROUPING_FROM {
        group_digits(int_part, 3)
    } else {
        group_digits(int_part, 2)
    };
    let sign = if num < 0.0 && fixed != "0.00" { "-" } else { "" };

    format!("{CURRENCY_PREFIX} {sign}{grouped}.{dec_part}")
}

/// Rounds a percentage to two decimals; missing input is `0.0`.
pub fn format_percent(value: Option<f64>) -> f64 {
    match value.filter(|v| v.is_finite()) {
        Some(v) => (v * 100.0).round() / 100.0,
        None => 0.0,
    }
}

pub fn digit_count_before_decimal(value: Option<f64>) -> u32 {
    match value.filter(|v| v.is_finite()) {
        Some(v) => format!("{:.0}", v.abs().trunc()).len() as u32,
        None => 0,
    }
}

pub fn format_percent_label(value: f64) -> String {
    format!("{value:.1}%")
}

pub fn format_ist_timestamp(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Kolkata)
        .format("%B %-d, %Y – %I:%M:%S %p IST")
        .to_string()
}

// Last three digits form one group; everything before is split every `lead_group` digits.
fn group_digits(digits: &str, lead_group: usize) -> String {
    if digits.len() <= 3 {
        return digits.to_string();
    }

    let (lead, last3) = digits.split_at(digits.len() - 3);
    let mut groups = Vec::new();
    let mut end = lead.len();
    while end > 0 {
        let start = end.saturating_sub(lead_group);
        groups.push(&lead[start..end]);
        end = start;
    }
    groups.reverse();
    groups.push(last3);
    groups.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn currency_below_one_lakh_uses_thousands_grouping() {
        assert_eq!(format_currency(Some(50_000.0)), "₹ 50,000.00");
        assert_eq!(format_currency(Some(99_999.5)), "₹ 99,999.50");
        assert_eq!(format_currency(Some(999.0)), "₹ 999.00");
        assert_eq!(format_currency(Some(0.456)), "₹ 0.46");
    }

    #[test]
    fn rounding_up_to_one_lakh_switches_grouping() {
        assert_eq!(format_currency(Some(99_999.996)), "₹ 1,00,000.00");
        assert_eq!(format_currency(Some(-99_999.999)), "₹ -1,00,000.00");
        assert_eq!(format_currency(Some(99_999.994)), "₹ 99,999.99");
    }

    #[test]
    fn currency_from_one_lakh_uses_indian_grouping() {
        assert_eq!(format_currency(Some(1_234_567.8)), "₹ 12,34,567.80");
        assert_eq!(format_currency(Some(100_000.0)), "₹ 1,00,000.00");
        assert_eq!(
            format_currency(Some(10_000_000_000.0)),
            "₹ 10,00,00,00,000.00"
        );
    }

    #[test]
    fn currency_handles_sign_and_missing_values() {
        assert_eq!(format_currency(Some(-2_500_000.0)), "₹ -25,00,000.00");
        assert_eq!(format_currency(Some(-0.001)), "₹ 0.00");
        assert_eq!(format_currency(None), ZERO_CURRENCY);
        assert_eq!(format_currency(Some(f64::NAN)), ZERO_CURRENCY);
        assert_eq!(format_currency(Some(f64::INFINITY)), ZERO_CURRENCY);
    }

    #[test]
    fn percent_rounding_and_defaults() {
        assert_eq!(format_percent(Some(1.23456)), 1.23);
        assert_eq!(format_percent(Some(-0.678)), -0.68);
        assert_eq!(format_percent(None), 0.0);
        assert_eq!(format_percent(Some(f64::NAN)), 0.0);
        assert_eq!(format_percent_label(5.0), "5.0%");
        assert_eq!(format_percent_label(2.76), "2.8%");
    }

    #[test]
    fn digit_count_uses_truncated_magnitude() {
        assert_eq!(digit_count_before_decimal(Some(12_345.99)), 5);
        assert_eq!(digit_count_before_decimal(Some(-987.1)), 3);
        assert_eq!(digit_count_before_decimal(Some(0.5)), 1);
        assert_eq!(digit_count_before_decimal(Some(1e12)), 13);
        assert_eq!(digit_count_before_decimal(None), 0);
    }

    #[test]
    fn ist_label_shifts_utc_by_five_thirty() {
        let ts = Utc
            .with_ymd_and_hms(2025, 1, 1, 9, 45, 0)
            .single()
            .expect("valid datetime");
        assert_eq!(
            format_ist_timestamp(ts),
            "January 1, 2025 – 03:15:00 PM IST"
        );
    }
}
