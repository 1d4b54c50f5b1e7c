//! The Instantiation Job Runner: a worker pool that executes each
//! environment-creation request as a staged, cancellable, progress-reporting
//! task, then exposes the resulting environment through a small read API.

use super::driver::KernelDriver;
use super::registry::{EnvironmentDetails, EnvironmentRecord, EnvironmentRegistry, EnvironmentSummary};
use super::task::{InstantiationTask, TaskStage};
use super::template::{ExchangeTemplate, StockTemplate, TemplateStore, TraderTemplate};
use crate::clock::{DayInterval, DayMinute};
use crate::config::{IntervalSpec, SimConfig, TradingIntervalsFile};
use crate::entities::{
    AITraderInstance, ExchangeInstance, ExchangeParams, ExchangeShared, RiskProfile, StockInstance,
    StockParams, StockSnapshot, TraderParams, TraderSnapshot,
};
use crate::error::{RunnerError, TemplateError, TimeSeriesError};
use crate::lifecycle::{GameObject, Kernel, ObjectId};
use crate::timeseries::{AggregatedBar, AggregatedQuery, Granularity};
use chrono::Utc;
use parking_lot::{Mutex as PLMutex, RwLock as PLRwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

fn lifecycle_err(e: crate::error::LifecycleError) -> RunnerError {
    RunnerError::Fatal { reason: e.to_string() }
}

fn timeseries_err(e: TimeSeriesError) -> RunnerError {
    match e {
        TimeSeriesError::SeriesNotFound { id } => RunnerError::NotFound { what: "series", id },
        TimeSeriesError::InvalidRange { start, end } => {
            RunnerError::InvalidInput { reason: format!("invalid range [{start}, {end})") }
        }
        TimeSeriesError::GranularityNotConfigured { id, granularity } => RunnerError::InvalidInput {
            reason: format!("series '{id}' has no '{granularity}' granularity configured"),
        },
        TimeSeriesError::OutOfOrder { id, point_ts, last_ts } => RunnerError::InvalidInput {
            reason: format!("series '{id}': point {point_ts} is before latest {last_ts}"),
        },
        TimeSeriesError::DuplicateSeries { id } => {
            RunnerError::Fatal { reason: format!("duplicate series '{id}'") }
        }
    }
}

fn to_day_intervals(specs: &[IntervalSpec]) -> Vec<DayInterval> {
    specs
        .iter()
        .filter_map(|spec| {
            let start = DayMinute::parse(&spec.start)?;
            let end = DayMinute::parse(&spec.end)?;
            Some(DayInterval::new(spec.name.clone(), start, end))
        })
        .collect()
}

/// Creates an object on the kernel thread and recovers a handle the factory
/// closure produced alongside it (an `Arc<ExchangeShared>`, or a snapshot
/// Arc) — `Kernel::create_object`'s factory signature only returns the boxed
/// trait object, so the handle is threaded out through a short-lived slot.
fn create_object_with_handle<T, H>(
    kernel: &mut Kernel,
    build: impl FnOnce(ObjectId) -> (T, H),
) -> Result<(ObjectId, H), crate::error::LifecycleError>
where
    T: GameObject + 'static,
{
    let slot: Arc<std::sync::Mutex<Option<H>>> = Arc::new(std::sync::Mutex::new(None));
    let slot2 = slot.clone();
    let id = kernel.create_object(move |id| {
        let (instance, handle) = build(id);
        *slot2.lock().unwrap() = Some(handle);
        Box::new(instance) as Box<dyn GameObject>
    })?;
    let handle = slot.lock().unwrap().take().expect("factory always populates the handle slot");
    Ok((id, handle))
}

fn bucket_one(bars: &[AggregatedBar], start_time: i64, interval_ms: i64, bucket_count: usize) -> Vec<f64> {
    let mut buckets = vec![0.0f64; bucket_count.max(1)];
    for bar in bars {
        if bar.start_time < start_time {
            continue;
        }
        let idx = ((bar.start_time - start_time) / interval_ms) as usize;
        if let Some(slot) = buckets.get_mut(idx) {
            *slot += bar.volume;
        }
    }
    buckets
}

fn sum_vecs(mut a: Vec<f64>, b: Vec<f64>) -> Vec<f64> {
    for (x, y) in a.iter_mut().zip(b.into_iter()) {
        *x += y;
    }
    a
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub object_count: usize,
    pub total_ticks: u64,
    pub uptime_seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeState {
    pub traders: Vec<TraderSnapshot>,
    pub stocks: Vec<StockSnapshot>,
    pub performance_metrics: PerformanceMetrics,
    pub statistics: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentExport {
    pub exported_at: chrono::DateTime<Utc>,
    pub environment: EnvironmentSummary,
    pub runtime_state: RuntimeState,
}

struct Inner {
    config: SimConfig,
    trading_intervals: TradingIntervalsFile,
    driver: KernelDriver,
    store: Arc<dyn TemplateStore>,
    registry: EnvironmentRegistry,
    tasks: PLMutex<HashMap<String, InstantiationTask>>,
    cancelled: PLMutex<HashSet<String>>,
    pool_slots: Semaphore,
    concurrency: Semaphore,
}

/// Cheap to clone: every method call operates through a shared `Arc<Inner>`,
/// the same way the teacher's `PooledVault` is handed out by value to every
/// task that needs it.
#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<Inner>,
}

impl JobRunner {
    pub fn new(config: SimConfig, trading_intervals: TradingIntervalsFile, store: Arc<dyn TemplateStore>) -> Self {
        let driver = KernelDriver::spawn(config.kernel_fps, crate::lifecycle::DEFAULT_MAX_ERRORS);
        let pool_slots = Semaphore::new(config.worker_pool_size);
        let concurrency = Semaphore::new(config.worker_max_concurrent.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                trading_intervals,
                driver,
                store,
                registry: EnvironmentRegistry::new(),
                tasks: PLMutex::new(HashMap::new()),
                cancelled: PLMutex::new(HashSet::new()),
                pool_slots,
                concurrency,
            }),
        }
    }

    fn update_task(&self, request_id: &str, f: impl FnOnce(&mut InstantiationTask)) {
        if let Some(task) = self.inner.tasks.lock().get_mut(request_id) {
            f(task);
        }
    }

    fn is_cancelled(&self, request_id: &str) -> bool {
        self.inner.cancelled.lock().contains(request_id)
    }

    async fn post_to_kernel<T, F>(&self, f: F) -> Result<T, RunnerError>
    where
        F: FnOnce(&mut Kernel) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let cmd: crate::lifecycle::ConstructFn = Box::new(move |kernel: &mut Kernel| {
            let result = f(kernel);
            let _ = tx.send(result);
        });
        self.inner
            .driver
            .handle()
            .post(cmd)
            .map_err(|_| RunnerError::KernelUnavailable)?;
        rx.await.map_err(|_| RunnerError::KernelUnavailable)
    }

    // ---- createEnvironment / getCreationProgress / cancelCreation ----

    pub async fn create_environment(&self, template_id: String, user_id: String) -> Result<String, RunnerError> {
        if template_id.trim().is_empty() {
            return Err(RunnerError::InvalidInput { reason: "templateId is required".to_string() });
        }
        if user_id.trim().is_empty() {
            return Err(RunnerError::InvalidInput { reason: "userId is required".to_string() });
        }
        let request_id = Uuid::new_v4().to_string();
        let task = InstantiationTask::new(request_id.clone(), template_id.clone(), user_id.clone(), Utc::now());
        self.inner.tasks.lock().insert(request_id.clone(), task);

        let runner = self.clone();
        let rid = request_id.clone();
        tokio::spawn(async move {
            runner.run_task(rid, template_id, user_id).await;
        });
        Ok(request_id)
    }

    pub fn get_creation_progress(&self, request_id: &str) -> Option<InstantiationTask> {
        self.inner.tasks.lock().get(request_id).cloned()
    }

    pub fn cancel_creation(&self, request_id: &str) -> Result<(), RunnerError> {
        let terminal = match self.inner.tasks.lock().get(request_id) {
            Some(task) => task.stage.is_terminal(),
            None => return Err(RunnerError::NotFound { what: "task", id: request_id.to_string() }),
        };
        if terminal {
            return Err(RunnerError::InvalidInput {
                reason: format!("task '{request_id}' has already reached a terminal stage"),
            });
        }
        self.inner.cancelled.lock().insert(request_id.to_string());
        Ok(())
    }

    async fn run_task(&self, request_id: String, template_id: String, user_id: String) {
        let Ok(_pool_permit) = self.inner.pool_slots.acquire().await else {
            return;
        };
        if self.is_cancelled(&request_id) {
            self.update_task(&request_id, |t| t.fail("cancelled before a worker became available", Utc::now()));
            self.inner.cancelled.lock().remove(&request_id);
            return;
        }
        self.update_task(&request_id, |t| t.advance(TaskStage::Initializing, 5, "reserved worker"));

        let timeout = Duration::from_millis(self.inner.config.worker_timeout_ms);
        let outcome = tokio::time::timeout(timeout, self.execute(&request_id, &template_id, &user_id)).await;

        match outcome {
            Ok(Ok(environment_id)) => {
                info!(request_id, environment_id, "environment created");
                self.update_task(&request_id, |t| t.complete(environment_id, Utc::now()));
            }
            Ok(Err(err)) => {
                warn!(request_id, error = %err, "environment creation failed");
                self.update_task(&request_id, |t| t.fail(err.to_string(), Utc::now()));
            }
            Err(_elapsed) => {
                warn!(request_id, "environment creation timed out");
                self.update_task(&request_id, |t| {
                    t.fail(RunnerError::Timeout { request_id: request_id.clone() }.to_string(), Utc::now())
                });
            }
        }
        self.inner.cancelled.lock().remove(&request_id);
    }

    async fn fetch_with_retry<T, F, Fut>(&self, request_id: &str, mut f: F) -> Result<T, RunnerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TemplateError>>,
    {
        let mut attempts = 0u32;
        loop {
            if self.is_cancelled(request_id) {
                return Err(RunnerError::Cancelled { request_id: request_id.to_string() });
            }
            attempts += 1;
            match f().await {
                Ok(value) => return Ok(value),
                Err(TemplateError::NotFound { id }) => {
                    return Err(RunnerError::NotFound { what: "template", id });
                }
                Err(TemplateError::Transient { reason }) => {
                    if attempts >= self.inner.config.worker_retry_attempts {
                        return Err(RunnerError::TransientStoreError { reason, attempts });
                    }
                }
            }
        }
    }

    async fn execute(&self, request_id: &str, template_id: &str, user_id: &str) -> Result<ObjectId, RunnerError> {
        let _concurrency_permit = self
            .inner
            .concurrency
            .acquire()
            .await
            .map_err(|_| RunnerError::KernelUnavailable)?;

        self.update_task(request_id, |t| t.advance(TaskStage::ReadingTemplates, 10, "fetching exchange template"));
        let store = self.inner.store.clone();
        let tid = template_id.to_string();
        let exchange_template = self
            .fetch_with_retry(request_id, || {
                let store = store.clone();
                let tid = tid.clone();
                async move { store.fetch_exchange_template(&tid).await }
            })
            .await?;

        if self.is_cancelled(request_id) {
            return Err(RunnerError::Cancelled { request_id: request_id.to_string() });
        }

        let trader_ids = exchange_template.trader_template_ids.clone();
        let stock_ids = exchange_template.stock_template_ids.clone();
        let total = (trader_ids.len() + stock_ids.len()).max(1) as u32;

        let mut trader_templates = Vec::with_capacity(trader_ids.len());
        for (i, tid) in trader_ids.iter().enumerate() {
            if self.is_cancelled(request_id) {
                return Err(RunnerError::Cancelled { request_id: request_id.to_string() });
            }
            let store = self.inner.store.clone();
            let tid_owned = tid.clone();
            let template = self
                .fetch_with_retry(request_id, || {
                    let store = store.clone();
                    let tid = tid_owned.clone();
                    async move { store.fetch_trader_template(&tid).await }
                })
                .await?;
            trader_templates.push(template);
            let pct = 10 + (((i + 1) as u32 * 60) / total).min(60);
            self.update_task(request_id, |t| {
                t.advance(TaskStage::ReadingTemplates, pct as u8, "fetching trader templates")
            });
        }

        let mut stock_templates = Vec::with_capacity(stock_ids.len());
        for (i, sid) in stock_ids.iter().enumerate() {
            if self.is_cancelled(request_id) {
                return Err(RunnerError::Cancelled { request_id: request_id.to_string() });
            }
            let store = self.inner.store.clone();
            let sid_owned = sid.clone();
            let template = self
                .fetch_with_retry(request_id, || {
                    let store = store.clone();
                    let sid = sid_owned.clone();
                    async move { store.fetch_stock_template(&sid).await }
                })
                .await?;
            stock_templates.push(template);
            let pct = 10 + (((trader_ids.len() + i + 1) as u32 * 60) / total).min(60);
            self.update_task(request_id, |t| {
                t.advance(TaskStage::ReadingTemplates, pct as u8, "fetching stock templates")
            });
        }

        if self.is_cancelled(request_id) {
            return Err(RunnerError::Cancelled { request_id: request_id.to_string() });
        }

        self.update_task(request_id, |t| t.advance(TaskStage::CreatingObjects, 70, "creating exchange"));
        self.create_objects(request_id, user_id, exchange_template, trader_templates, stock_templates)
            .await
    }

    async fn rollback(&self, trader_ids: Vec<ObjectId>, stock_ids: Vec<ObjectId>, exchange_id: Option<ObjectId>) {
        let _ = self
            .post_to_kernel(move |kernel| {
                for id in trader_ids.into_iter().rev() {
                    let _ = kernel.destroy_object(id);
                }
                for id in stock_ids.into_iter().rev() {
                    let _ = kernel.destroy_object(id);
                }
                if let Some(id) = exchange_id {
                    let _ = kernel.destroy_object(id);
                }
            })
            .await;
    }

    async fn create_objects(
        &self,
        request_id: &str,
        user_id: &str,
        exchange_template: ExchangeTemplate,
        trader_templates: Vec<TraderTemplate>,
        stock_templates: Vec<StockTemplate>,
    ) -> Result<ObjectId, RunnerError> {
        let cfg = &self.inner.config;
        let (open_h, open_m) = cfg.exchange_initial_time;
        let market_open = DayMinute(open_h * 60 + open_m);
        let acceleration = cfg.exchange_time_acceleration;
        let trading_intervals = to_day_intervals(&self.inner.trading_intervals.trading_intervals);
        let non_trading_intervals = to_day_intervals(&self.inner.trading_intervals.non_trading_intervals);
        let exchange_name = exchange_template.name.clone();

        let exchange_params = ExchangeParams {
            name: exchange_template.name,
            description: exchange_template.description,
            market_open,
            acceleration,
            trading_intervals,
            non_trading_intervals,
            now: Utc::now(),
        };
        let kernel_handle = self.inner.driver.handle();

        let (environment_id, exchange_shared): (ObjectId, Arc<ExchangeShared>) = self
            .post_to_kernel(move |kernel| {
                create_object_with_handle(kernel, move |id| {
                    let instance = ExchangeInstance::new(id, kernel_handle, exchange_params);
                    let shared = instance.shared.clone();
                    (instance, shared)
                })
            })
            .await?
            .map_err(lifecycle_err)?;

        self.update_task(request_id, |t| t.advance(TaskStage::CreatingObjects, 75, "creating stocks"));

        let total_objects = (stock_templates.len() + trader_templates.len()).max(1) as u32;
        let mut created_stock_ids: Vec<ObjectId> = Vec::new();
        let mut created_trader_ids: Vec<ObjectId> = Vec::new();
        let mut stock_snapshots: Vec<Arc<PLRwLock<StockSnapshot>>> = Vec::new();
        let mut trader_snapshots: Vec<Arc<PLRwLock<TraderSnapshot>>> = Vec::new();
        let stock_symbols: Vec<String> = stock_templates.iter().map(|t| t.symbol.clone()).collect();

        for (i, template) in stock_templates.into_iter().enumerate() {
            if self.is_cancelled(request_id) {
                self.rollback(created_trader_ids, created_stock_ids, Some(environment_id)).await;
                return Err(RunnerError::Cancelled { request_id: request_id.to_string() });
            }
            let params = StockParams {
                symbol: template.symbol,
                company_name: template.company_name,
                category: template.category,
                issue_price: template.issue_price,
                total_shares: template.total_shares,
            };
            let exchange_for_factory = exchange_shared.clone();
            let created = self
                .post_to_kernel(move |kernel| {
                    create_object_with_handle(kernel, move |id| StockInstance::new(id, exchange_for_factory, params))
                })
                .await;
            match created {
                Ok(Ok((stock_id, snapshot))) => {
                    exchange_shared.stock_ids.write().insert(stock_id);
                    created_stock_ids.push(stock_id);
                    stock_snapshots.push(snapshot);
                    let pct = 75 + (((i + 1) as u32 * 15) / total_objects).min(15);
                    self.update_task(request_id, |t| {
                        t.advance(TaskStage::CreatingObjects, pct as u8, "creating stocks")
                    });
                }
                Ok(Err(e)) => {
                    self.rollback(created_trader_ids, created_stock_ids, Some(environment_id)).await;
                    return Err(lifecycle_err(e));
                }
                Err(e) => {
                    self.rollback(created_trader_ids, created_stock_ids, Some(environment_id)).await;
                    return Err(e);
                }
            }
        }

        for (i, template) in trader_templates.into_iter().enumerate() {
            if self.is_cancelled(request_id) {
                self.rollback(created_trader_ids, created_stock_ids, Some(environment_id)).await;
                return Err(RunnerError::Cancelled { request_id: request_id.to_string() });
            }
            let params = TraderParams {
                display_name: template.name,
                risk_profile: template.risk_profile,
                watch_symbols: stock_symbols.clone(),
            };
            let exchange_for_factory = exchange_shared.clone();
            let created = self
                .post_to_kernel(move |kernel| {
                    create_object_with_handle(kernel, move |id| AITraderInstance::new(id, exchange_for_factory, params))
                })
                .await;
            match created {
                Ok(Ok((trader_id, snapshot))) => {
                    exchange_shared.trader_ids.write().insert(trader_id);
                    created_trader_ids.push(trader_id);
                    trader_snapshots.push(snapshot);
                    let pct = 75 + (((stock_symbols.len() + i + 1) as u32 * 15) / total_objects).min(15);
                    self.update_task(request_id, |t| {
                        t.advance(TaskStage::CreatingObjects, pct.clamp(75, 99) as u8, "creating traders")
                    });
                }
                Ok(Err(e)) => {
                    self.rollback(created_trader_ids, created_stock_ids, Some(environment_id)).await;
                    return Err(lifecycle_err(e));
                }
                Err(e) => {
                    self.rollback(created_trader_ids, created_stock_ids, Some(environment_id)).await;
                    return Err(e);
                }
            }
        }

        self.update_task(request_id, |t| t.advance(TaskStage::CreatingObjects, 99, "wiring complete"));

        self.inner.registry.insert(EnvironmentRecord {
            environment_id,
            user_id: user_id.to_string(),
            name: exchange_name,
            created_at: Utc::now(),
            exchange: exchange_shared,
            stocks: stock_snapshots,
            traders: trader_snapshots,
        });

        Ok(environment_id)
    }

    // ---- listEnvironments / getEnvironmentDetails / destroyEnvironment ----

    pub fn list_environments(&self, user_id: &str) -> Vec<EnvironmentSummary> {
        self.inner.registry.list(user_id)
    }

    pub fn get_environment_details(&self, environment_id: ObjectId, user_id: &str) -> Result<EnvironmentDetails, RunnerError> {
        self.inner
            .registry
            .details(environment_id, user_id)
            .ok_or_else(|| RunnerError::NotFound { what: "environment", id: environment_id.to_string() })
    }

    pub async fn destroy_environment(&self, environment_id: ObjectId, user_id: &str) -> Result<(), RunnerError> {
        if !self.inner.registry.owns(environment_id, user_id) {
            return Err(RunnerError::NotFound { what: "environment", id: environment_id.to_string() });
        }
        self.post_to_kernel(move |kernel| {
            let _ = kernel.destroy_object(environment_id);
        })
        .await?;
        self.inner.registry.remove(environment_id);
        Ok(())
    }

    pub async fn export_environment(&self, environment_id: ObjectId, user_id: &str) -> Result<EnvironmentExport, RunnerError> {
        let details = self
            .inner
            .registry
            .details(environment_id, user_id)
            .ok_or_else(|| RunnerError::NotFound { what: "environment", id: environment_id.to_string() })?;
        let status = self.post_to_kernel(|kernel: &mut Kernel| kernel.get_status()).await?;
        Ok(EnvironmentExport {
            exported_at: Utc::now(),
            environment: details.summary,
            runtime_state: RuntimeState {
                traders: details.traders,
                stocks: details.stocks,
                performance_metrics: PerformanceMetrics {
                    object_count: status.object_count,
                    total_ticks: status.total_ticks,
                    uptime_seconds: status.uptime_seconds,
                },
                statistics: serde_json::json!({}),
            },
        })
    }

    // ---- queryKLine / queryVolumeTrend ----

    pub fn query_k_line(
        &self,
        environment_id: ObjectId,
        user_id: &str,
        symbol: &str,
        granularity: Granularity,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<AggregatedBar>, RunnerError> {
        let exchange = self
            .inner
            .registry
            .exchange_for(environment_id, user_id)
            .ok_or_else(|| RunnerError::NotFound { what: "environment", id: environment_id.to_string() })?;
        let series_id = format!("{}:{}:price", exchange.id, symbol);
        exchange
            .engine
            .read()
            .query_aggregated_data(AggregatedQuery {
                series_id,
                granularity,
                start_time,
                end_time,
                dense: false,
            })
            .map_err(timeseries_err)
    }

    pub fn query_volume_trend(
        &self,
        environment_id: ObjectId,
        user_id: &str,
        start_time: i64,
        end_time: i64,
        interval_ms: i64,
    ) -> Result<Vec<(i64, f64)>, RunnerError> {
        if interval_ms <= 0 || start_time >= end_time {
            return Err(RunnerError::InvalidInput { reason: "invalid time range or interval".to_string() });
        }
        let exchange = self
            .inner
            .registry
            .exchange_for(environment_id, user_id)
            .ok_or_else(|| RunnerError::NotFound { what: "environment", id: environment_id.to_string() })?;
        let details = self
            .inner
            .registry
            .details(environment_id, user_id)
            .ok_or_else(|| RunnerError::NotFound { what: "environment", id: environment_id.to_string() })?;

        let bucket_count = (((end_time - start_time) as f64) / interval_ms as f64).ceil() as usize;

        let per_stock_bars: Vec<Vec<AggregatedBar>> = {
            let engine = exchange.engine.read();
            details
                .stocks
                .iter()
                .map(|stock| {
                    engine
                        .query_aggregated_data(AggregatedQuery {
                            series_id: stock.volume_series.clone(),
                            granularity: Granularity::M1,
                            start_time,
                            end_time,
                            dense: false,
                        })
                        .unwrap_or_default()
                })
                .collect()
        };

        let buckets = if per_stock_bars.len() > 8 {
            use rayon::prelude::*;
            per_stock_bars
                .par_iter()
                .map(|bars| bucket_one(bars, start_time, interval_ms, bucket_count))
                .reduce(|| vec![0.0f64; bucket_count.max(1)], sum_vecs)
        } else {
            per_stock_bars
                .iter()
                .map(|bars| bucket_one(bars, start_time, interval_ms, bucket_count))
                .fold(vec![0.0f64; bucket_count.max(1)], sum_vecs)
        };

        Ok(buckets
            .into_iter()
            .enumerate()
            .map(|(i, v)| (start_time + i as i64 * interval_ms, v))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::template::InMemoryTemplateStore;

    fn store_with_one_of_each() -> InMemoryTemplateStore {
        InMemoryTemplateStore::new()
            .with_exchange(ExchangeTemplate {
                id: "ex1".to_string(),
                name: "Demo Exchange".to_string(),
                description: "test".to_string(),
                trader_template_ids: vec!["tr1".to_string()],
                stock_template_ids: vec!["st1".to_string()],
            })
            .with_trader(TraderTemplate {
                id: "tr1".to_string(),
                name: "Bot".to_string(),
                initial_capital: 10_000.0,
                risk_profile: RiskProfile::Moderate,
            })
            .with_stock(StockTemplate {
                id: "st1".to_string(),
                symbol: "ACME".to_string(),
                company_name: "Acme Corp".to_string(),
                category: "Tech".to_string(),
                issue_price: 10.0,
                total_shares: 1_000_000,
            })
    }

    fn test_config() -> SimConfig {
        let mut cfg = SimConfig::default();
        cfg.kernel_fps = 30;
        cfg.worker_timeout_ms = 5_000;
        cfg
    }

    #[tokio::test]
    async fn full_happy_path_creates_and_registers_environment() {
        let runner = JobRunner::new(
            test_config(),
            TradingIntervalsFile::defaults(),
            Arc::new(store_with_one_of_each()),
        );
        let request_id = runner
            .create_environment("ex1".to_string(), "alice".to_string())
            .await
            .unwrap();

        let mut task = None;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let t = runner.get_creation_progress(&request_id).unwrap();
            if t.stage.is_terminal() {
                task = Some(t);
                break;
            }
        }
        let task = task.expect("task did not reach a terminal stage in time");
        assert_eq!(task.stage, TaskStage::Complete);
        assert_eq!(task.percentage, 100);
        let env_id = task.environment_id.unwrap();

        let summaries = runner.list_environments("alice");
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].environment_id, env_id);

        let details = runner.get_environment_details(env_id, "alice").unwrap();
        assert_eq!(details.stocks.len(), 1);
        assert_eq!(details.traders.len(), 1);
    }

    #[tokio::test]
    async fn missing_trader_template_rolls_back_and_registers_nothing() {
        let store = store_with_one_of_each();
        // tr1 is never registered as a trader template -> NotFound at ReadingTemplates.
        let store = InMemoryTemplateStore::new()
            .with_exchange(ExchangeTemplate {
                id: "ex1".to_string(),
                name: "Demo".to_string(),
                description: String::new(),
                trader_template_ids: vec!["missing-trader".to_string()],
                stock_template_ids: vec!["st1".to_string()],
            })
            .with_stock(StockTemplate {
                id: "st1".to_string(),
                symbol: "ACME".to_string(),
                company_name: "Acme".to_string(),
                category: "Tech".to_string(),
                issue_price: 10.0,
                total_shares: 1000,
            });
        let _ = store_with_one_of_each();

        let runner = JobRunner::new(test_config(), TradingIntervalsFile::defaults(), Arc::new(store));
        let request_id = runner
            .create_environment("ex1".to_string(), "alice".to_string())
            .await
            .unwrap();

        let mut task = None;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let t = runner.get_creation_progress(&request_id).unwrap();
            if t.stage.is_terminal() {
                task = Some(t);
                break;
            }
        }
        let task = task.expect("task did not reach a terminal stage in time");
        assert_eq!(task.stage, TaskStage::Error);
        assert!(task.environment_id.is_none());
        assert!(runner.list_environments("alice").is_empty());
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_synchronously() {
        let runner = JobRunner::new(
            test_config(),
            TradingIntervalsFile::defaults(),
            Arc::new(InMemoryTemplateStore::new()),
        );
        assert!(matches!(
            runner.create_environment(String::new(), "alice".to_string()).await,
            Err(RunnerError::InvalidInput { .. })
        ));
    }
}
