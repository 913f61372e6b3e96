//! Timestamps and time windows

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Timestamp representing a point in time with nanosecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Nanoseconds since Unix epoch
    nanos: i64,
}

impl Timestamp {
    pub const MIN: Timestamp = Timestamp { nanos: i64::MIN };
    pub const MAX: Timestamp = Timestamp { nanos: i64::MAX };

    /// Create a timestamp from nanoseconds since Unix epoch
    pub fn from_nanos(nanos: i64) -> Self {
        Self { nanos }
    }

    /// Create a timestamp from milliseconds since Unix epoch
    pub fn from_millis(millis: i64) -> Self {
        Self {
            nanos: millis * 1_000_000,
        }
    }

    /// Create a timestamp from seconds since Unix epoch
    pub fn from_secs(secs: i64) -> Self {
        Self {
            nanos: secs * NANOS_PER_SEC,
        }
    }

    /// Create a timestamp from fractional seconds, rounded to the nearest nanosecond
    pub fn from_secs_f64(secs: f64) -> Self {
        Self {
            nanos: (secs * NANOS_PER_SEC as f64).round() as i64,
        }
    }

    /// Get current timestamp
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    /// Get nanoseconds since Unix epoch
    pub fn as_nanos(&self) -> i64 {
        self.nanos
    }

    /// Get seconds since Unix epoch (floored)
    pub fn as_secs(&self) -> i64 {
        self.nanos.div_euclid(NANOS_PER_SEC)
    }

    /// Get fractional seconds since Unix epoch
    pub fn as_secs_f64(&self) -> f64 {
        self.nanos as f64 / NANOS_PER_SEC as f64
    }

    /// Convert to chrono DateTime
    pub fn to_datetime(&self) -> DateTime<Utc> {
        let subsec = self.nanos.rem_euclid(NANOS_PER_SEC) as u32;
        DateTime::from_timestamp(self.as_secs(), subsec).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Add duration in nanoseconds
    pub fn add_nanos(&self, nanos: i64) -> Self {
        Self {
            nanos: self.nanos.saturating_add(nanos),
        }
    }

    /// Subtract duration in nanoseconds
    pub fn sub_nanos(&self, nanos: i64) -> Self {
        Self {
            nanos: self.nanos.saturating_sub(nanos),
        }
    }

    /// Add fractional seconds
    pub fn add_secs_f64(&self, secs: f64) -> Self {
        self.add_nanos((secs * NANOS_PER_SEC as f64).round() as i64)
    }

    /// Signed distance `self - earlier` in fractional seconds
    pub fn seconds_since(&self, earlier: Timestamp) -> f64 {
        (self.nanos as i128 - earlier.nanos as i128) as f64 / NANOS_PER_SEC as f64
    }

    /// Parse the time formats accepted by FDSN web services.
    ///
    /// Accepts a bare date (`2012-01-01`), a date-time with optional
    /// fractional seconds (`2005-10-06T07:21:59.850000`), either with or
    /// without a trailing `Z`, and full RFC 3339 with an offset.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
            return Some(Self::from(dt.with_timezone(&Utc)));
        }
        let naive = input.strip_suffix('Z').unwrap_or(input);
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(naive, format) {
                return Some(Self::from(dt.and_utc()));
            }
        }
        NaiveDate::parse_from_str(naive, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| Self::from(dt.and_utc()))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.to_datetime().to_rfc3339_opts(SecondsFormat::Micros, true)
        )
    }
}

impl From<DateTime<Utc>> for Timestamp {
    /// Dates outside the nanosecond range (before 1677, after 2262) saturate
    /// to [`Timestamp::MIN`] / [`Timestamp::MAX`].
    fn from(dt: DateTime<Utc>) -> Self {
        match dt.timestamp_nanos_opt() {
            Some(nanos) => Self { nanos },
            None if dt.timestamp() < 0 => Self::MIN,
            None => Self::MAX,
        }
    }
}

impl From<std::time::SystemTime> for Timestamp {
    fn from(t: std::time::SystemTime) -> Self {
        match t.duration_since(std::time::UNIX_EPOCH) {
            Ok(d) => Self::from_nanos(d.as_nanos() as i64),
            Err(e) => Self::from_nanos(-(e.duration().as_nanos() as i64)),
        }
    }
}

/// Closed time window `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeWindow {
    /// Create a window; `start` must not be after `end`
    pub fn new(start: Timestamp, end: Timestamp) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Window covering all representable time
    pub fn unbounded() -> Self {
        Self {
            start: Timestamp::MIN,
            end: Timestamp::MAX,
        }
    }

    /// Closed-interval overlap: boundary-touching intervals overlap
    pub fn overlaps(&self, start: Timestamp, end: Timestamp) -> bool {
        start <= self.end && end >= self.start
    }

    /// Check if a timestamp is within this window
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Intersection with `[start, end]`, if any
    pub fn intersect(&self, start: Timestamp, end: Timestamp) -> Option<TimeWindow> {
        TimeWindow::new(self.start.max(start), self.end.min(end))
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}
