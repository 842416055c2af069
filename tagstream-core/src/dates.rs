//! Timestamp formatting, input parsing and value rounding.
//!
//! Tags are stored with backend wall-clock times, so everything here works on
//! `NaiveDateTime`. Inputs arrive either in one of the configured formats or
//! as an Excel serial day number (`45292.5`), which spreadsheet clients send.

use chrono::{DateTime, NaiveDateTime};

use crate::error::{Result, StoreError};

/// Format used for SQL placeholders and cache keys.
pub const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Excel serial day of 1970-01-01.
const EXCEL_UNIX_EPOCH_DAYS: f64 = 25569.0;

/// Formats tried when no list is configured.
pub const DEFAULT_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d.%m.%Y %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

pub fn format_canonical(date: NaiveDateTime) -> String {
    date.format(CANONICAL_FORMAT).to_string()
}

/// Parses a timestamp as a backend would print it.
pub fn parse_canonical(input: &str) -> Option<NaiveDateTime> {
    let input = input.trim();
    DEFAULT_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
}

/// Parses a request date: a `:`-free input is an Excel serial day number,
/// anything else is tried against `formats` in order.
pub fn parse_date<S: AsRef<str>>(input: &str, formats: &[S]) -> Result<NaiveDateTime> {
    let input = input.trim();
    if input.is_empty() {
        return Err(StoreError::InvalidDate);
    }
    if !input.contains(':') {
        return parse_excel_serial(input);
    }
    let parsed = if formats.is_empty() {
        parse_canonical(input)
    } else {
        formats
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt.as_ref()).ok())
    };
    parsed.ok_or(StoreError::InvalidDate)
}

/// Converts an Excel serial day number (comma or dot decimal separator).
pub fn parse_excel_serial(input: &str) -> Result<NaiveDateTime> {
    let serial: f64 = input
        .trim()
        .replacen(',', ".", 1)
        .parse()
        .map_err(|_| StoreError::NotAFloat)?;
    let unix_secs = ((serial - EXCEL_UNIX_EPOCH_DAYS) * 86400.0).round() as i64;
    DateTime::from_timestamp(unix_secs, 0)
        .map(|dt| dt.naive_utc())
        .ok_or(StoreError::InvalidDate)
}

/// Rounds to `precision` decimal places.
pub fn round(value: f32, precision: u32) -> f32 {
    let factor = 10f64.powi(precision as i32);
    ((value as f64 * factor).round() / factor) as f32
}

/// Rounds and renders with a decimal comma, the historian's legacy text form.
pub fn round_and_format(value: f32, precision: u32) -> String {
    format!("{:.*}", precision as usize, round(value, precision)).replace('.', ",")
}
