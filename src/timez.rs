//! Date parsing and timing helpers.
//!
//! Feeds publish dates in whatever format their generator prefers, so
//! [`parse_datetime`] tries the common ones in turn and normalizes to UTC.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::{AppError, Result};

pub const HUMAN_DATETIME: &str = "%a %b %d %H:%M:%S %Y %z";
pub const HUMAN_DATE: &str = "%b %d, %Y";
pub const HUMAN_TIME: &str = "%I:%M:%S %p";
pub const JSON_DATETIME: &str = "%Y-%m-%dT%H:%M:%S%.fZ";
pub const ISO8601_DATETIME: &str = "%Y-%m-%dT%H:%M:%S%z";
pub const ISO8601_DATE: &str = "%Y-%m-%d";
pub const ISO8601_TIME: &str = "%H:%M:%S";
pub const COMMON_DATETIME: &str = "%d/%b/%Y:%H:%M:%S %z";

const OFFSET_FORMATS: &[&str] = &[
    ISO8601_DATETIME,
    HUMAN_DATETIME,
    COMMON_DATETIME,
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S %z",
];

const NAIVE_FORMATS: &[&str] = &[
    JSON_DATETIME,
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Parses `value` with `format` and returns the instant in UTC.
///
/// Formats containing `%z` honour the offset in the string; anything else
/// is taken to already be UTC.
pub fn strptimez(value: &str, format: &str) -> Result<DateTime<Utc>> {
    let parsed = if format.contains("%z") {
        DateTime::parse_from_str(value, format).map(|dt| dt.with_timezone(&Utc))
    } else {
        NaiveDateTime::parse_from_str(value, format).map(|naive| naive.and_utc())
    };
    parsed.map_err(|e| AppError::InvalidDate(format!("{value:?} as {format:?}: {e}")))
}

/// Lenient parser for the date strings found in feeds and in the store.
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }

    OFFSET_FORMATS
        .iter()
        .chain(NAIVE_FORMATS)
        .find_map(|format| strptimez(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, ISO8601_DATE)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
}

/// Renders a duration the way run summaries print it.
pub fn humanizedelta(delta: Duration) -> String {
    let total = delta.as_secs();
    if total < 60 {
        return format!("{:.3} seconds", delta.as_secs_f64());
    }

    let units = [
        (total / 86_400, "day"),
        ((total % 86_400) / 3_600, "hour"),
        ((total % 3_600) / 60, "minute"),
        (total % 60, "second"),
    ];

    units
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| {
            let plural = if *value == 1 { "" } else { "s" };
            format!("{value} {unit}{plural}")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Wall clock timer for a single run.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    started: Instant,
    stopped: Option<Instant>,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            stopped: None,
        }
    }

    pub fn stop(&mut self) {
        if self.stopped.is_none() {
            self.stopped = Some(Instant::now());
        }
    }

    pub fn is_running(&self) -> bool {
        self.stopped.is_none()
    }

    pub fn elapsed(&self) -> Duration {
        self.stopped
            .unwrap_or_else(Instant::now)
            .duration_since(self.started)
    }
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&humanizedelta(self.elapsed()))
    }
}
