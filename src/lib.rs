//! sim-core: headless simulation core for a stock-market training platform.
//!
//! Composes a generic game-object lifecycle kernel, a per-exchange simulated
//! clock, a time-series aggregation engine, the domain entities that ride on
//! top of them (exchange/stock/trader), and a worker-pool job runner that
//! turns a template id into a live, running environment.
//!
//! The HTTP/WebSocket surface, template-store persistence, auth, and CLI
//! plumbing are external collaborators and live outside this crate; see
//! `runner::TemplateStore` for the seam they plug into.

pub mod clock;
pub mod config;
pub mod entities;
pub mod error;
pub mod lifecycle;
pub mod runner;
pub mod timeseries;

pub use clock::{DayInterval, DayMinute, SimulatedClock, TimeState};
pub use config::{IntervalSpec, SimConfig, TradingIntervalsFile};
pub use entities::{
    AITraderInstance, ExchangeInstance, ExchangeParams, ExchangeShared, RiskProfile,
    StockInstance, StockParams, StockSnapshot, TraderParams, TraderSnapshot,
};
pub use error::{ClockError, LifecycleError, RunnerError, TemplateError, TimeSeriesError};
pub use lifecycle::{
    ConstructFn, CountsByState, GameObject, Kernel, KernelHandle, KernelStatus, ObjectFault,
    ObjectId, ObjectState, DEFAULT_MAX_ERRORS,
};
pub use runner::{
    EnvironmentDetails, EnvironmentExport, EnvironmentSummary, ExchangeTemplate,
    InMemoryTemplateStore, InstantiationTask, JobRunner, KernelDriver, PerformanceMetrics,
    RuntimeState, StockTemplate, TaskStage, TemplateStore, TraderTemplate,
};
pub use timeseries::{
    AggregatedBar, AggregatedQuery, DataPoint, DataType, Granularity, Metric, MissingPolicy,
    Series, SeriesDefinition, TimeSeriesEngine,
};
