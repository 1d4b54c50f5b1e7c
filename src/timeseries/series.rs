//! A single append-only `Series` and its per-granularity aggregation state.

use super::types::{
    AggregatedBar, BarAccumulator, DataPoint, DataType, Granularity, Metric, MissingPolicy,
    SeriesDefinition,
};
use crate::error::TimeSeriesError;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone)]
struct GranularityState {
    closed_bars: Vec<AggregatedBar>,
    open_bar: Option<BarAccumulator>,
}

impl GranularityState {
    fn new() -> Self {
        Self {
            closed_bars: Vec::new(),
            open_bar: None,
        }
    }
}

/// A named append-only data stream with multi-granularity aggregation (§3).
#[derive(Debug, Clone)]
pub struct Series {
    pub id: String,
    pub name: String,
    pub data_type: DataType,
    pub granularities: BTreeSet<Granularity>,
    pub metrics: BTreeSet<Metric>,
    pub missing_policy: MissingPolicy,
    last_point_ts: Option<i64>,
    per_granularity: HashMap<Granularity, GranularityState>,
}

impl Series {
    pub(crate) fn new(def: SeriesDefinition) -> Self {
        let per_granularity = def
            .granularities
            .iter()
            .map(|g| (*g, GranularityState::new()))
            .collect();
        Self {
            id: def.id,
            name: def.name,
            data_type: def.data_type,
            granularities: def.granularities,
            metrics: def.metrics,
            missing_policy: def.missing_policy,
            last_point_ts: None,
            per_granularity,
        }
    }

    pub fn latest_timestamp(&self) -> Option<i64> {
        self.last_point_ts
    }

    /// Append one observation, folding it into every configured
    /// granularity's open bar. O(|granularities|) per call (§4.4).
    pub(crate) fn add_data_point(&mut self, point: DataPoint) -> Result<(), TimeSeriesError> {
        if let Some(last) = self.last_point_ts {
            if point.timestamp < last {
                return Err(TimeSeriesError::OutOfOrder {
                    id: self.id.clone(),
                    point_ts: point.timestamp,
                    last_ts: last,
                });
            }
        }
        for granularity in self.granularities.clone() {
            let bucket_start = granularity.floor(point.timestamp);
            let state = self
                .per_granularity
                .get_mut(&granularity)
                .expect("granularity state initialized for every configured granularity");
            match &mut state.open_bar {
                Some(open) if open.start_time == bucket_start => {
                    open.fold(&point, self.data_type);
                }
                Some(open) => {
                    state.closed_bars.push(open.to_bar(&self.id, granularity));
                    state.open_bar = Some(BarAccumulator::start(
                        bucket_start,
                        granularity.bucket_end(bucket_start),
                        &point,
                        self.data_type,
                    ));
                }
                None => {
                    state.open_bar = Some(BarAccumulator::start(
                        bucket_start,
                        granularity.bucket_end(bucket_start),
                        &point,
                        self.data_type,
                    ));
                }
            }
        }
        self.last_point_ts = Some(point.timestamp);
        Ok(())
    }

    fn require_granularity(&self, granularity: Granularity) -> Result<(), TimeSeriesError> {
        if self.granularities.contains(&granularity) {
            Ok(())
        } else {
            Err(TimeSeriesError::GranularityNotConfigured {
                id: self.id.clone(),
                granularity: granularity.as_str(),
            })
        }
    }

    /// All bars (closed, then the open one if present) for a granularity,
    /// in ascending `startTime` order.
    fn all_bars(&self, granularity: Granularity) -> Vec<AggregatedBar> {
        let state = match self.per_granularity.get(&granularity) {
            Some(s) => s,
            None => return Vec::new(),
        };
        let mut bars = state.closed_bars.clone();
        if let Some(open) = &state.open_bar {
            bars.push(open.to_bar(&self.id, granularity));
        }
        bars
    }

    pub(crate) fn get_latest(
        &self,
        granularity: Granularity,
    ) -> Result<Option<AggregatedBar>, TimeSeriesError> {
        self.require_granularity(granularity)?;
        let state = self.per_granularity.get(&granularity).unwrap();
        if let Some(open) = &state.open_bar {
            return Ok(Some(open.to_bar(&self.id, granularity)));
        }
        Ok(state.closed_bars.last().cloned())
    }

    /// `queryAggregatedData` (§4.4): returns bars whose `startTime` falls in
    /// `[start_time, end_time)`. When `dense` is requested, missing
    /// granularity buckets in the window are synthesized per
    /// `missing_policy`; otherwise `UsePrevious` still fabricates bars (the
    /// policy's default behavior) while `UseZero` simply omits them.
    pub(crate) fn query_aggregated(
        &self,
        granularity: Granularity,
        start_time: i64,
        end_time: i64,
        dense: bool,
    ) -> Result<Vec<AggregatedBar>, TimeSeriesError> {
        self.require_granularity(granularity)?;
        if start_time >= end_time {
            return Err(TimeSeriesError::InvalidRange {
                start: start_time,
                end: end_time,
            });
        }
        let bars = self.all_bars(granularity);
        let in_range: Vec<AggregatedBar> = bars
            .iter()
            .filter(|b| b.start_time >= start_time && b.start_time < end_time)
            .cloned()
            .collect();

        let needs_fill = matches!(self.missing_policy, MissingPolicy::UsePrevious) || dense;
        if !needs_fill {
            return Ok(in_range);
        }

        let mut by_start: HashMap<i64, AggregatedBar> =
            in_range.iter().cloned().map(|b| (b.start_time, b)).collect();
        let first_bucket = granularity.floor(start_time);
        let mut cursor = first_bucket;
        let mut previous_close: Option<AggregatedBar> = bars
            .iter()
            .filter(|b| b.start_time < first_bucket)
            .last()
            .cloned();
        let mut result = Vec::new();
        while cursor < end_time {
            if let Some(bar) = by_start.remove(&cursor) {
                previous_close = Some(bar.clone());
                result.push(bar);
            } else {
                match self.missing_policy {
                    MissingPolicy::UsePrevious => {
                        if let Some(prev) = &previous_close {
                            let fabricated = AggregatedBar {
                                series_id: self.id.clone(),
                                granularity,
                                start_time: cursor,
                                end_time: granularity.bucket_end(cursor),
                                open: prev.close,
                                high: prev.close,
                                low: prev.close,
                                close: prev.close,
                                volume: 0.0,
                                vwap: prev.close,
                                point_count: 0,
                            };
                            result.push(fabricated);
                        }
                        // else: no prior bar exists, omit per §4.4.
                    }
                    MissingPolicy::UseZero => {
                        if dense {
                            result.push(AggregatedBar {
                                series_id: self.id.clone(),
                                granularity,
                                start_time: cursor,
                                end_time: granularity.bucket_end(cursor),
                                open: 0.0,
                                high: 0.0,
                                low: 0.0,
                                close: 0.0,
                                volume: 0.0,
                                vwap: 0.0,
                                point_count: 0,
                            });
                        }
                        // else: omit per §4.4.
                    }
                }
            }
            cursor = granularity.bucket_end(cursor);
        }
        Ok(result)
    }

    pub(crate) fn clear(&mut self) {
        for state in self.per_granularity.values_mut() {
            state.closed_bars.clear();
            state.open_bar = None;
        }
    }

    /// Preserve any bar whose `endTime > cutoff` (§9 Open Question,
    /// resolved per spec.md's own stated default).
    pub(crate) fn clear_before(&mut self, cutoff: i64) {
        for state in self.per_granularity.values_mut() {
            state.closed_bars.retain(|b| b.end_time > cutoff);
            if let Some(open) = &state.open_bar {
                if open.end_time <= cutoff {
                    state.open_bar = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeseries::types::Metric;

    fn ts(s: &str) -> i64 {
        chrono::DateTime::parse_from_rfc3339(s)
            .unwrap()
            .timestamp_millis()
    }

    fn s1() -> Series {
        let def = SeriesDefinition {
            id: "S1".to_string(),
            name: "S1".to_string(),
            data_type: DataType::Continuous,
            granularities: [Granularity::M1].into_iter().collect(),
            metrics: [
                Metric::Open,
                Metric::High,
                Metric::Low,
                Metric::Close,
                Metric::Volume,
                Metric::Vwap,
            ]
            .into_iter()
            .collect(),
            missing_policy: MissingPolicy::UsePrevious,
        };
        Series::new(def)
    }

    #[test]
    fn aggregation_round_trip_scenario() {
        let mut s = s1();
        let t0 = ts("2026-01-05T09:30:00Z");
        s.add_data_point(DataPoint::new(t0, 100.0).with_volume(10.0))
            .unwrap();
        s.add_data_point(DataPoint::new(t0 + 20_000, 102.0).with_volume(5.0))
            .unwrap();
        s.add_data_point(DataPoint::new(t0 + 59_000, 99.0).with_volume(15.0))
            .unwrap();
        s.add_data_point(DataPoint::new(t0 + 60_000, 101.0).with_volume(20.0))
            .unwrap();

        let bars = s
            .query_aggregated(Granularity::M1, t0, t0 + 120_000, false)
            .unwrap();
        assert_eq!(bars.len(), 2);
        let b0 = &bars[0];
        assert_eq!(b0.start_time, t0);
        assert_eq!(b0.open, 100.0);
        assert_eq!(b0.high, 102.0);
        assert_eq!(b0.low, 99.0);
        assert_eq!(b0.close, 99.0);
        assert_eq!(b0.volume, 30.0);
        assert!((b0.vwap - 100.05).abs() < 1e-9);
        assert_eq!(b0.point_count, 3);

        let b1 = &bars[1];
        assert_eq!(b1.start_time, t0 + 60_000);
        assert_eq!(b1.open, 101.0);
        assert_eq!(b1.close, 101.0);
        assert_eq!(b1.volume, 20.0);
        assert_eq!(b1.point_count, 1);
    }

    #[test]
    fn out_of_order_point_is_rejected() {
        let mut s = s1();
        let t0 = ts("2026-01-05T09:30:00Z");
        s.add_data_point(DataPoint::new(t0 + 60_000, 101.0)).unwrap();
        let err = s.add_data_point(DataPoint::new(t0 + 30_000, 50.0)).unwrap_err();
        assert!(matches!(err, TimeSeriesError::OutOfOrder { .. }));
        // No mutation: still exactly the one bar from the first point.
        let bars = s
            .query_aggregated(Granularity::M1, t0, t0 + 120_000, false)
            .unwrap();
        assert_eq!(bars.len(), 1);
    }

    #[test]
    fn use_previous_fills_gaps_with_prior_close() {
        let mut s = s1();
        let t0 = ts("2026-01-05T09:30:00Z");
        s.add_data_point(DataPoint::new(t0, 100.0).with_volume(1.0))
            .unwrap();
        s.add_data_point(DataPoint::new(t0 + 120_000, 110.0).with_volume(1.0))
            .unwrap();
        let bars = s
            .query_aggregated(Granularity::M1, t0, t0 + 180_000, false)
            .unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[1].close, 100.0);
        assert_eq!(bars[1].point_count, 0);
        assert_eq!(bars[1].volume, 0.0);
    }

    #[test]
    fn clear_before_preserves_bar_overlapping_cutoff() {
        let mut s = s1();
        let t0 = ts("2026-01-05T09:30:00Z");
        for i in 0..5 {
            s.add_data_point(DataPoint::new(t0 + i * 60_000, 100.0 + i as f64))
                .unwrap();
        }
        let cutoff = t0 + 2 * 60_000 + 30_000; // mid-way through bar index 2
        s.clear_before(cutoff);
        let bars = s
            .query_aggregated(Granularity::M1, t0, t0 + 300_000, false)
            .unwrap();
        assert!(bars.iter().all(|b| b.end_time > cutoff));
        assert!(bars.iter().any(|b| b.start_time == t0 + 2 * 60_000));
    }
}
