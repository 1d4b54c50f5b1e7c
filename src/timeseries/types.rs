//! Shared value types for the Time-Series Engine (§3, §4.4).

use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A windowing unit from the fixed set `{1m, 5m, 15m, 30m, 60m, 1d, 1w, 1M}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Granularity {
    M1,
    M5,
    M15,
    M30,
    M60,
    D1,
    W1,
    Mo1,
}

/// 1970-01-01T00:00:00Z is a Thursday; Monday of that week is 1969-12-29,
/// 3 days earlier.
const MONDAY_OFFSET_MS: i64 = 3 * 24 * 60 * 60_000;

impl Granularity {
    pub const ALL: [Granularity; 8] = [
        Granularity::M1,
        Granularity::M5,
        Granularity::M15,
        Granularity::M30,
        Granularity::M60,
        Granularity::D1,
        Granularity::W1,
        Granularity::Mo1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::M1 => "1m",
            Granularity::M5 => "5m",
            Granularity::M15 => "15m",
            Granularity::M30 => "30m",
            Granularity::M60 => "60m",
            Granularity::D1 => "1d",
            Granularity::W1 => "1w",
            Granularity::Mo1 => "1M",
        }
    }

    fn minutes(&self) -> Option<i64> {
        match self {
            Granularity::M1 => Some(1),
            Granularity::M5 => Some(5),
            Granularity::M15 => Some(15),
            Granularity::M30 => Some(30),
            Granularity::M60 => Some(60),
            Granularity::D1 => Some(24 * 60),
            Granularity::W1 => Some(7 * 24 * 60),
            Granularity::Mo1 => None,
        }
    }

    /// `floor(timestamp, granularity)`: 1m/5m/.../60m/1d all divide evenly
    /// into a day, so plain epoch-millisecond modulo gives the correct
    /// wall-clock boundary. `1w` needs a correction first: the Unix epoch
    /// (1970-01-01) is a Thursday, not a Monday, so flooring epoch
    /// milliseconds directly against a 7-day window yields Thursday
    /// boundaries. Shift by `MONDAY_OFFSET_MS` (epoch day 0 is 3 days past
    /// Monday) before flooring and shift back after, so weeks start Monday
    /// 00:00 UTC. Months have variable length and are floored via the
    /// calendar.
    pub fn floor(&self, timestamp_ms: i64) -> i64 {
        match self {
            Granularity::W1 => {
                let window = 7 * 24 * 60 * 60_000;
                (timestamp_ms - MONDAY_OFFSET_MS).div_euclid(window) * window + MONDAY_OFFSET_MS
            }
            _ => match self.minutes() {
                Some(minutes) => {
                    let window = minutes * 60_000;
                    timestamp_ms.div_euclid(window) * window
                }
                None => {
                    let date = millis_to_datetime(timestamp_ms).date_naive();
                    let month_start = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap();
                    datetime_millis(month_start)
                }
            },
        }
    }

    /// `endTime` for a bar whose `startTime` is `start` (already
    /// granularity-aligned).
    pub fn bucket_end(&self, start_ms: i64) -> i64 {
        match self.minutes() {
            Some(minutes) => start_ms + minutes * 60_000,
            None => {
                let date = millis_to_datetime(start_ms).date_naive();
                let (year, month) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                datetime_millis(NaiveDate::from_ymd_opt(year, month, 1).unwrap())
            }
        }
    }
}

fn millis_to_datetime(ms: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
}

fn datetime_millis(date: NaiveDate) -> i64 {
    let naive = NaiveDateTime::new(date, chrono::NaiveTime::MIN);
    Utc.from_utc_datetime(&naive).timestamp_millis()
}

/// Continuous series carry a real-valued observation (price); Discrete
/// series carry a countable quantity (e.g. an order count) and fall back to
/// `value` for `volume` when `volume` is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Continuous,
    Discrete,
}

/// Computed bar metrics a series may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Metric {
    Open,
    High,
    Low,
    Close,
    Volume,
    Vwap,
}

/// What a query should synthesize for a granularity bucket with no ingested
/// point (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingPolicy {
    UsePrevious,
    UseZero,
}

/// One ingested observation (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: i64,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl DataPoint {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self {
            timestamp,
            value,
            volume: None,
            metadata: None,
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Volume contribution per §4.4: the explicit `volume` field, or
    /// `value` itself for a Discrete series lacking one.
    fn effective_volume(&self, data_type: DataType) -> f64 {
        self.volume
            .unwrap_or(if data_type == DataType::Discrete {
                self.value
            } else {
                0.0
            })
    }
}

/// A closed or open aggregation bucket (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedBar {
    pub series_id: String,
    pub granularity: Granularity,
    pub start_time: i64,
    pub end_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub vwap: f64,
    pub point_count: u64,
}

/// Parameters for `createSeries` (§4.4).
#[derive(Debug, Clone)]
pub struct SeriesDefinition {
    pub id: String,
    pub name: String,
    pub data_type: DataType,
    pub granularities: BTreeSet<Granularity>,
    pub metrics: BTreeSet<Metric>,
    pub missing_policy: MissingPolicy,
}

/// Incremental accumulator backing the currently-open bar for one
/// granularity. Folding a point is O(1).
#[derive(Debug, Clone)]
pub(crate) struct BarAccumulator {
    pub start_time: i64,
    pub end_time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    value_volume_sum: f64,
    volume_sum: f64,
    point_count: u64,
}

impl BarAccumulator {
    pub(crate) fn start(start_time: i64, end_time: i64, point: &DataPoint, data_type: DataType) -> Self {
        let mut acc = Self {
            start_time,
            end_time,
            open: point.value,
            high: point.value,
            low: point.value,
            close: point.value,
            value_volume_sum: 0.0,
            volume_sum: 0.0,
            point_count: 0,
        };
        acc.fold(point, data_type);
        acc
    }

    pub(crate) fn fold(&mut self, point: &DataPoint, data_type: DataType) {
        if self.point_count == 0 {
            self.open = point.value;
            self.high = point.value;
            self.low = point.value;
        } else {
            self.high = self.high.max(point.value);
            self.low = self.low.min(point.value);
        }
        self.close = point.value;
        let volume = point.effective_volume(data_type);
        self.volume_sum += volume;
        self.value_volume_sum += point.value * volume;
        self.point_count += 1;
    }

    pub(crate) fn to_bar(&self, series_id: &str, granularity: Granularity) -> AggregatedBar {
        let vwap = if self.volume_sum > 0.0 {
            self.value_volume_sum / self.volume_sum
        } else {
            self.close
        };
        AggregatedBar {
            series_id: series_id.to_string(),
            granularity,
            start_time: self.start_time,
            end_time: self.end_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume_sum,
            vwap,
            point_count: self.point_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granularity_strings_match_spec() {
        assert_eq!(Granularity::M1.as_str(), "1m");
        assert_eq!(Granularity::Mo1.as_str(), "1M");
    }

    #[test]
    fn minute_floor_aligns_to_wall_clock() {
        let ts = chrono::DateTime::parse_from_rfc3339("2026-01-05T09:37:42Z")
            .unwrap()
            .timestamp_millis();
        let floored = Granularity::M5.floor(ts);
        let expected = chrono::DateTime::parse_from_rfc3339("2026-01-05T09:35:00Z")
            .unwrap()
            .timestamp_millis();
        assert_eq!(floored, expected);
    }

    #[test]
    fn week_floor_aligns_to_monday_not_epoch_thursday() {
        // 2026-01-07 is a Wednesday; the containing week starts Monday
        // 2026-01-05T00:00:00Z.
        let ts = chrono::DateTime::parse_from_rfc3339("2026-01-07T15:00:00Z")
            .unwrap()
            .timestamp_millis();
        let floored = Granularity::W1.floor(ts);
        let expected = chrono::DateTime::parse_from_rfc3339("2026-01-05T00:00:00Z")
            .unwrap()
            .timestamp_millis();
        assert_eq!(floored, expected);
    }

    #[test]
    fn month_floor_uses_calendar() {
        let ts = chrono::DateTime::parse_from_rfc3339("2026-02-17T09:37:42Z")
            .unwrap()
            .timestamp_millis();
        let floored = Granularity::Mo1.floor(ts);
        let expected = chrono::DateTime::parse_from_rfc3339("2026-02-01T00:00:00Z")
            .unwrap()
            .timestamp_millis();
        assert_eq!(floored, expected);
        let end = Granularity::Mo1.bucket_end(floored);
        let expected_end = chrono::DateTime::parse_from_rfc3339("2026-03-01T00:00:00Z")
            .unwrap()
            .timestamp_millis();
        assert_eq!(end, expected_end);
    }
}
