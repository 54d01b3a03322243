//! Scan-wide meta fields: backtest window, candle resolution, fee.
//!
//! `meta` is not subject to expansion. Its four reserved keys become the
//! top-level request fields of every generated configuration; any other key
//! is carried into each configuration's controller config.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ParamMap;
use super::error::SweepError;

/// Keys in `meta` that map to request fields rather than controller config.
pub const RESERVED_META_KEYS: [&str; 4] = ["start", "end", "resolution", "fee"];

/// Calendar date format accepted for `start` and `end`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Time of day (UTC) attached to the calendar dates.
pub const WINDOW_TIME_OF_DAY: NaiveTime = NaiveTime::MIN;

fn default_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 11).unwrap_or_default()
}

fn default_end() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 13).unwrap_or_default()
}

fn default_resolution() -> String {
    "3m".to_string()
}

const fn default_fee() -> f64 {
    0.001
}

/// Whether `key` is one of the reserved meta keys.
#[must_use]
pub fn is_reserved(key: &str) -> bool {
    RESERVED_META_KEYS.contains(&key)
}

/// Parsed `meta` section.
#[derive(Debug, Clone, PartialEq)]
pub struct Meta {
    /// First day of the backtest window.
    pub start: NaiveDate,
    /// Day the backtest window ends.
    pub end: NaiveDate,
    /// Candle resolution, e.g. `1m` or `3m`.
    pub resolution: String,
    /// Trade cost as a fraction of notional.
    pub fee: f64,
    /// Non-reserved keys, copied into every configuration.
    pub extra: ParamMap,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            start: default_start(),
            end: default_end(),
            resolution: default_resolution(),
            fee: default_fee(),
            extra: ParamMap::new(),
        }
    }
}

/// Resolved request-level fields shared by one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Window start, Unix seconds.
    pub start_time: i64,
    /// Window end, Unix seconds.
    pub end_time: i64,
}

impl Meta {
    /// Parse a `meta` mapping, filling absent fields with defaults.
    pub fn from_map(map: &ParamMap) -> Result<Self, SweepError> {
        let mut meta = Self::default();
        meta.merge(map)?;
        meta.check_window(None)?;
        Ok(meta)
    }

    /// Overlay `map` onto this meta. Reserved keys replace fields, others
    /// land in `extra`. The window is not re-checked.
    pub fn merge(&mut self, map: &ParamMap) -> Result<(), SweepError> {
        for (key, value) in map {
            if !self.set(key, value)? {
                self.extra.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    /// Set a reserved field. Returns `false` when `key` is not reserved.
    pub fn set(&mut self, key: &str, value: &Value) -> Result<bool, SweepError> {
        match key {
            "start" => self.start = parse_date(key, value)?,
            "end" => self.end = parse_date(key, value)?,
            "resolution" => self.resolution = parse_resolution(value)?,
            "fee" => self.fee = parse_fee(value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Reject windows where `start` is not strictly before `end`.
    pub fn check_window(&self, context: Option<&str>) -> Result<(), SweepError> {
        if self.start < self.end {
            Ok(())
        } else {
            Err(SweepError::InvalidWindow {
                start: self.start.format(DATE_FORMAT).to_string(),
                end: self.end.format(DATE_FORMAT).to_string(),
                context: context.map(str::to_string),
            })
        }
    }

    /// Absolute window boundaries at the fixed UTC time of day.
    #[must_use]
    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            start_time: self.start.and_time(WINDOW_TIME_OF_DAY).and_utc().timestamp(),
            end_time: self.end.and_time(WINDOW_TIME_OF_DAY).and_utc().timestamp(),
        }
    }

    /// JSON value of a reserved field, as it would appear in a sweep file.
    #[must_use]
    pub fn reserved_value(&self, key: &str) -> Option<Value> {
        match key {
            "start" => Some(Value::String(self.start.format(DATE_FORMAT).to_string())),
            "end" => Some(Value::String(self.end.format(DATE_FORMAT).to_string())),
            "resolution" => Some(Value::String(self.resolution.clone())),
            "fee" => Some(serde_json::json!(self.fee)),
            _ => None,
        }
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> SweepError {
    SweepError::InvalidMeta {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn parse_date(field: &str, value: &Value) -> Result<NaiveDate, SweepError> {
    let Value::String(text) = value else {
        return Err(invalid(field, format!("expected a YYYY-MM-DD date, got {value}")));
    };
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
        .map_err(|e| invalid(field, format!("'{text}' is not a YYYY-MM-DD date ({e})")))
}

fn parse_resolution(value: &Value) -> Result<String, SweepError> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => return Err(invalid("resolution", format!("expected a string, got {other}"))),
    };
    if text.is_empty() {
        return Err(invalid("resolution", "must not be empty"));
    }
    Ok(text)
}

fn parse_fee(value: &Value) -> Result<f64, SweepError> {
    let fee = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid("fee", format!("expected a number, got {value}")))?;

    if !fee.is_finite() || fee < 0.0 {
        return Err(invalid("fee", format!("must be a finite non-negative number, got {fee}")));
    }
    Ok(fee)
}
