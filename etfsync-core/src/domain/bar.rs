//! Bar: one trading day for one instrument, and the fixed column schema.
//!
//! Downstream readers address columns by position, so the field order of
//! [`Bar`], [`BAR_HEADER`] and [`Bar::from_fields`] is a single contract.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of columns in a stored bar row.
pub const BAR_FIELD_COUNT: usize = 11;

/// Store header, in column order: date, open, close, high, low, volume,
/// turnover, amplitude, percent change, change amount, turnover rate.
pub const BAR_HEADER: [&str; BAR_FIELD_COUNT] = [
    "日期", "开盘", "收盘", "最高", "最低", "成交量", "成交额", "振幅", "涨跌幅", "涨跌额", "换手率",
];

/// Date format used on disk and by every provider.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("expected {expected} fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },

    #[error("invalid value '{value}' in column {column}")]
    InvalidField { column: &'static str, value: String },

    #[error("dates not strictly increasing: {next} follows {previous}")]
    NotIncreasing { previous: NaiveDate, next: NaiveDate },

    #[error("unexpected header: {0}")]
    Header(String),
}

/// Daily bar. Field order matches [`BAR_HEADER`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: u64,
    pub turnover: f64,
    /// Intraday range as a percentage of the previous close.
    pub amplitude: f64,
    pub pct_change: f64,
    pub change: f64,
    pub turnover_rate: f64,
}

impl Bar {
    /// Parse one row of exactly eleven fields in schema order.
    pub fn from_fields<S: AsRef<str>>(fields: &[S]) -> Result<Self, SchemaError> {
        if fields.len() != BAR_FIELD_COUNT {
            return Err(SchemaError::FieldCount {
                expected: BAR_FIELD_COUNT,
                actual: fields.len(),
            });
        }

        // Placeholders such as `-` for a missing turnover rate are rejected
        // rather than zero-filled; such rows need manual attention.
        let field = |i: usize| fields[i].as_ref().trim();
        let float = |i: usize| -> Result<f64, SchemaError> {
            field(i).parse::<f64>().map_err(|_| SchemaError::InvalidField {
                column: BAR_HEADER[i],
                value: field(i).to_string(),
            })
        };

        let date = NaiveDate::parse_from_str(field(0), DATE_FORMAT).map_err(|_| {
            SchemaError::InvalidField {
                column: BAR_HEADER[0],
                value: field(0).to_string(),
            }
        })?;
        let volume = parse_volume(field(5)).ok_or_else(|| SchemaError::InvalidField {
            column: BAR_HEADER[5],
            value: field(5).to_string(),
        })?;

        Ok(Self {
            date,
            open: float(1)?,
            close: float(2)?,
            high: float(3)?,
            low: float(4)?,
            volume,
            turnover: float(6)?,
            amplitude: float(7)?,
            pct_change: float(8)?,
            change: float(9)?,
            turnover_rate: float(10)?,
        })
    }
}

/// Volumes are whole lots, but some exports write them as `12345.0`.
fn parse_volume(raw: &str) -> Option<u64> {
    if let Ok(v) = raw.parse::<u64>() {
        return Some(v);
    }
    let f = raw.parse::<f64>().ok()?;
    (f.is_finite() && f >= 0.0 && f.fract() == 0.0).then_some(f as u64)
}

/// Check that bar dates are strictly increasing (sorted, no duplicates).
pub fn check_strictly_increasing(bars: &[Bar]) -> Result<(), SchemaError> {
    for pair in bars.windows(2) {
        if pair[1].date <= pair[0].date {
            return Err(SchemaError::NotIncreasing {
                previous: pair[0].date,
                next: pair[1].date,
            });
        }
    }
    Ok(())
}

/// Check a header row against [`BAR_HEADER`], tolerating a UTF-8 BOM.
pub fn check_header<S: AsRef<str>>(header: &[S]) -> Result<(), SchemaError> {
    let matches = header.len() == BAR_FIELD_COUNT
        && header
            .iter()
            .zip(BAR_HEADER.iter())
            .enumerate()
            .all(|(i, (actual, expected))| {
                let actual = actual.as_ref().trim();
                let actual = if i == 0 {
                    actual.trim_start_matches('\u{feff}')
                } else {
                    actual
                };
                actual == *expected
            });

    if matches {
        Ok(())
    } else {
        let joined: Vec<&str> = header.iter().map(|h| h.as_ref()).collect();
        Err(SchemaError::Header(joined.join(",")))
    }
}
