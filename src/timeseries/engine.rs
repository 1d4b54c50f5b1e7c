//! `TimeSeriesEngine` (§4.4): one per exchange, owns every series by id.

use super::series::Series;
use super::types::{AggregatedBar, DataPoint, Granularity, SeriesDefinition};
use crate::error::TimeSeriesError;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Parameters for `queryAggregatedData`.
#[derive(Debug, Clone)]
pub struct AggregatedQuery {
    pub series_id: String,
    pub granularity: Granularity,
    pub start_time: i64,
    pub end_time: i64,
    /// When `true`, missing buckets are synthesized even under `UseZero`
    /// (§4.4: "or, when the caller requests dense output, return a bar with
    /// all numeric metrics 0").
    pub dense: bool,
}

/// Append-only ingestion and multi-granularity aggregation for every series
/// belonging to one exchange.
#[derive(Debug, Default)]
pub struct TimeSeriesEngine {
    series: HashMap<String, Series>,
}

impl TimeSeriesEngine {
    pub fn new() -> Self {
        Self {
            series: HashMap::new(),
        }
    }

    pub fn create_series(&mut self, definition: SeriesDefinition) -> Result<(), TimeSeriesError> {
        if self.series.contains_key(&definition.id) {
            return Err(TimeSeriesError::DuplicateSeries { id: definition.id });
        }
        debug!(series_id = %definition.id, "created series");
        self.series
            .insert(definition.id.clone(), Series::new(definition));
        Ok(())
    }

    pub fn remove_series(&mut self, id: &str) -> Result<(), TimeSeriesError> {
        self.series
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| TimeSeriesError::SeriesNotFound { id: id.to_string() })
    }

    pub fn contains_series(&self, id: &str) -> bool {
        self.series.contains_key(id)
    }

    pub fn add_data_point(&mut self, series_id: &str, point: DataPoint) -> Result<(), TimeSeriesError> {
        let series = self
            .series
            .get_mut(series_id)
            .ok_or_else(|| TimeSeriesError::SeriesNotFound {
                id: series_id.to_string(),
            })?;
        let result = series.add_data_point(point);
        if let Err(e) = &result {
            warn!(series_id, error = %e, "rejected out-of-order data point");
        }
        result
    }

    pub fn query_aggregated_data(
        &self,
        query: AggregatedQuery,
    ) -> Result<Vec<AggregatedBar>, TimeSeriesError> {
        let series =
            self.series
                .get(&query.series_id)
                .ok_or_else(|| TimeSeriesError::SeriesNotFound {
                    id: query.series_id.clone(),
                })?;
        series.query_aggregated(query.granularity, query.start_time, query.end_time, query.dense)
    }

    pub fn get_latest_data(
        &self,
        series_id: &str,
        granularity: Granularity,
    ) -> Result<Option<AggregatedBar>, TimeSeriesError> {
        let series = self
            .series
            .get(series_id)
            .ok_or_else(|| TimeSeriesError::SeriesNotFound {
                id: series_id.to_string(),
            })?;
        series.get_latest(granularity)
    }

    pub fn clear_aggregated_data(&mut self, series_id: &str) -> Result<(), TimeSeriesError> {
        let series = self
            .series
            .get_mut(series_id)
            .ok_or_else(|| TimeSeriesError::SeriesNotFound {
                id: series_id.to_string(),
            })?;
        series.clear();
        Ok(())
    }

    pub fn clear_aggregated_data_before(
        &mut self,
        series_id: &str,
        cutoff: i64,
    ) -> Result<(), TimeSeriesError> {
        let series = self
            .series
            .get_mut(series_id)
            .ok_or_else(|| TimeSeriesError::SeriesNotFound {
                id: series_id.to_string(),
            })?;
        series.clear_before(cutoff);
        Ok(())
    }

    pub fn series_ids(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeseries::types::{DataType, Metric, MissingPolicy};

    fn def(id: &str) -> SeriesDefinition {
        SeriesDefinition {
            id: id.to_string(),
            name: id.to_string(),
            data_type: DataType::Continuous,
            granularities: [Granularity::M1].into_iter().collect(),
            metrics: [Metric::Open, Metric::Close].into_iter().collect(),
            missing_policy: MissingPolicy::UseZero,
        }
    }

    #[test]
    fn duplicate_series_rejected() {
        let mut engine = TimeSeriesEngine::new();
        engine.create_series(def("S1")).unwrap();
        let err = engine.create_series(def("S1")).unwrap_err();
        assert!(matches!(err, TimeSeriesError::DuplicateSeries { .. }));
    }

    #[test]
    fn unknown_series_errors_on_every_operation() {
        let mut engine = TimeSeriesEngine::new();
        assert!(matches!(
            engine.add_data_point("missing", DataPoint::new(0, 1.0)),
            Err(TimeSeriesError::SeriesNotFound { .. })
        ));
        assert!(matches!(
            engine.clear_aggregated_data("missing"),
            Err(TimeSeriesError::SeriesNotFound { .. })
        ));
    }

    #[test]
    fn query_includes_open_bar_in_range() {
        let mut engine = TimeSeriesEngine::new();
        engine.create_series(def("S1")).unwrap();
        engine
            .add_data_point("S1", DataPoint::new(0, 10.0))
            .unwrap();
        let bars = engine
            .query_aggregated_data(AggregatedQuery {
                series_id: "S1".to_string(),
                granularity: Granularity::M1,
                start_time: 0,
                end_time: 60_000,
                dense: false,
            })
            .unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].point_count, 1);
    }
}
