//! Human-readable report lines and kind tables

// Unit scaling works in f64
#![allow(clippy::cast_precision_loss)]

use super::kinds::KindSummary;
use super::statistics::AggregateResult;
use crate::domain::Unit;
use std::fmt::Write as _;

/// Shown in place of a value when there is no data
pub const NO_DATA: &str = "n/a";

const TIME_SCALES: &[(f64, &str)] = &[
    (3_600e9, "h"),
    (60e9, "min"),
    (1e9, "s"),
    (1e6, "ms"),
    (1e3, "µs"),
    (1.0, "ns"),
];

const BYTE_SCALES: &[(f64, &str)] = &[
    (1_073_741_824.0, "GiB"),
    (1_048_576.0, "MiB"),
    (1_024.0, "KiB"),
    (1.0, "B"),
];

/// One-line human-readable report
///
/// `# of events: 3, avg: 20 ns, stddev: 8.165 ns`
#[must_use]
pub fn report_line(result: &AggregateResult) -> String {
    format!(
        "# of events: {}, avg: {}, stddev: {}",
        result.count,
        format_optional(result.mean, result.unit),
        format_optional(result.stddev, result.unit)
    )
}

fn format_optional(value: Option<f64>, unit: Unit) -> String {
    value.map_or_else(|| NO_DATA.to_string(), |v| format_quantity(v, unit))
}

/// Format a base-unit value with an automatically chosen display unit
#[must_use]
pub fn format_quantity(value: f64, unit: Unit) -> String {
    match unit {
        Unit::Plain => format_number(value),
        Unit::Nanoseconds => scaled(value, TIME_SCALES),
        Unit::EpochNanoseconds => format!("{:.3} s since epoch", value / 1e9),
        Unit::Bytes => scaled(value, BYTE_SCALES),
        Unit::Fraction => format!("{} %", format_number(value * 100.0)),
        Unit::Hertz => format!("{} Hz", format_number(value)),
    }
}

/// Largest scale not exceeding the magnitude; the last scale covers the rest
fn scaled(value: f64, scales: &[(f64, &str)]) -> String {
    let magnitude = value.abs();
    let (factor, suffix) = scales
        .iter()
        .find(|(factor, _)| magnitude >= *factor)
        .or_else(|| scales.last())
        .copied()
        .unwrap_or((1.0, ""));
    format!("{} {suffix}", format_number(value / factor))
}

/// At most three decimals, trailing zeros dropped
fn format_number(value: f64) -> String {
    let text = format!("{value:.3}");
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Kind summary as an aligned table
#[must_use]
pub fn kind_table(summaries: &[KindSummary]) -> String {
    let width = summaries.iter().map(|s| s.kind.len()).max().unwrap_or(0).max("KIND".len());
    let mut out = format!("{:<width$}  {:>10}  {:>7}\n", "KIND", "COUNT", "SHARE");
    for s in summaries {
        let _ = writeln!(out, "{:<width$}  {:>10}  {:>6.1}%", s.kind, s.count, s.percentage);
    }
    out
}
