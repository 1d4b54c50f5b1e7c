//! Crate-wide error types.
//!
//! Each component gets its own error enum rather than a single catch-all —
//! callers that only touch the time-series engine shouldn't have to match on
//! worker-pool variants. `anyhow::Result` is reserved for the orchestration
//! seams (task submission, template loading) the way the teacher uses it in
//! `main.rs` and `backtest_v2::orchestrator` over concrete inner errors.

use std::fmt;

/// Errors raised by the Lifecycle Kernel (`createObject`/`destroyObject`/...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// `destroyObject`/`pauseObject`/`resumeObject` referenced an id the
    /// kernel has never seen (or has already fully retired and dropped).
    UnknownObject { id: u64 },
    /// The kernel is stopped; `createObject` refuses new enrollments.
    KernelStopped,
    /// `pauseObject`/`resumeObject` attempted on an object not in the
    /// required source state.
    InvalidTransition {
        id: u64,
        from: &'static str,
        to: &'static str,
    },
    /// A lifecycle method raised a fault; carried for callers that inspect
    /// per-object fault history rather than just logging it.
    ObjectFault {
        id: u64,
        phase: &'static str,
        cause: String,
    },
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownObject { id } => write!(f, "unknown object id {id}"),
            Self::KernelStopped => write!(f, "kernel is stopped"),
            Self::InvalidTransition { id, from, to } => {
                write!(f, "object {id}: invalid transition {from} -> {to}")
            }
            Self::ObjectFault { id, phase, cause } => {
                write!(f, "object {id} faulted during {phase}: {cause}")
            }
        }
    }
}

impl std::error::Error for LifecycleError {}

/// Errors raised by `SimulatedClock` operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    /// `setAcceleration` received a value outside `[0.1, 1000]`.
    InvalidAcceleration { value_milli: i64 },
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAcceleration { value_milli } => write!(
                f,
                "acceleration {:.3} outside allowed range [0.1, 1000]",
                *value_milli as f64 / 1000.0
            ),
        }
    }
}

impl std::error::Error for ClockError {}

/// Errors raised by the Time-Series Engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeSeriesError {
    /// `createSeries` named an id that already exists.
    DuplicateSeries { id: String },
    /// Referenced a series id the engine does not hold.
    SeriesNotFound { id: String },
    /// `addDataPoint` timestamp was older than the series' latest point.
    OutOfOrder {
        id: String,
        point_ts: i64,
        last_ts: i64,
    },
    /// A query named a granularity the series was not configured with.
    GranularityNotConfigured { id: String, granularity: &'static str },
    /// `queryAggregatedData` received `startTime >= endTime`.
    InvalidRange { start: i64, end: i64 },
}

impl fmt::Display for TimeSeriesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateSeries { id } => write!(f, "series '{id}' already exists"),
            Self::SeriesNotFound { id } => write!(f, "series '{id}' not found"),
            Self::OutOfOrder {
                id,
                point_ts,
                last_ts,
            } => write!(
                f,
                "series '{id}': point timestamp {point_ts} is before latest {last_ts}"
            ),
            Self::GranularityNotConfigured { id, granularity } => write!(
                f,
                "series '{id}' has no '{granularity}' granularity configured"
            ),
            Self::InvalidRange { start, end } => {
                write!(f, "invalid query range [{start}, {end})")
            }
        }
    }
}

impl std::error::Error for TimeSeriesError {}

/// Errors raised by the Instantiation Job Runner and its `TemplateStore`
/// collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    /// `createEnvironment` was submitted with a missing `templateId`/`userId`.
    InvalidInput { reason: String },
    /// `templateId`, `requestId`, or `environmentId` did not resolve.
    NotFound { what: &'static str, id: String },
    /// The worker's deadline elapsed before the task reached a terminal
    /// stage.
    Timeout { request_id: String },
    /// The caller (or an internal watchdog) cancelled the task.
    Cancelled { request_id: String },
    /// The `TemplateStore` reported a transient failure; retries have been
    /// exhausted.
    TransientStoreError { reason: String, attempts: u32 },
    /// A construct command could not be delivered to (or answered by) the
    /// kernel thread — the kernel has been dropped or stopped permanently.
    KernelUnavailable,
    /// A programming invariant was violated (e.g. the kernel rejected an
    /// operation its own lifecycle should have made impossible). Distinct
    /// from the other variants in that it indicates a bug rather than an
    /// expected runtime condition.
    Fatal { reason: String },
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { reason } => write!(f, "invalid input: {reason}"),
            Self::NotFound { what, id } => write!(f, "{what} '{id}' not found"),
            Self::Timeout { request_id } => write!(f, "task {request_id} timed out"),
            Self::Cancelled { request_id } => write!(f, "task {request_id} cancelled"),
            Self::TransientStoreError { reason, attempts } => write!(
                f,
                "template store error after {attempts} attempt(s): {reason}"
            ),
            Self::KernelUnavailable => write!(f, "kernel unavailable"),
            Self::Fatal { reason } => write!(f, "fatal: {reason}"),
        }
    }
}

impl std::error::Error for RunnerError {}

/// Errors a `TemplateStore` implementation may raise. Distinguishes
/// retryable failures from definite not-found so the runner's retry policy
/// (§4.6: creation-stage failures never retry, store fetches retry up to
/// `WORKER_RETRY_ATTEMPTS`) can dispatch on it directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    NotFound { id: String },
    Transient { reason: String },
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "template '{id}' not found"),
            Self::Transient { reason } => write!(f, "transient template store error: {reason}"),
        }
    }
}

impl std::error::Error for TemplateError {}
