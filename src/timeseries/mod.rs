//! Time-Series Engine (§4.4): append-only ingestion fanning out into
//! multiple granularity buckets with pluggable aggregation semantics and
//! missing-data policies.

mod engine;
mod series;
mod types;

pub use engine::{AggregatedQuery, TimeSeriesEngine};
pub use series::Series;
pub use types::{
    AggregatedBar, DataPoint, DataType, Granularity, Metric, MissingPolicy, SeriesDefinition,
};
