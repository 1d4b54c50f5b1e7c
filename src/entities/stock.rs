//! `StockInstance` (§3, §4.5, §4.5.1): producer of price/volume series
//! data, gated by its exchange's clock.

use super::exchange::ExchangeShared;
use crate::clock::TimeState;
use crate::lifecycle::{GameObject, ObjectId, ObjectState};
use crate::timeseries::{DataPoint, DataType, Granularity, Metric, MissingPolicy, SeriesDefinition};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::warn;

/// Read-only snapshot of a stock's public fields, shared with external
/// readers (the job runner's environment registry) without going through the
/// kernel's `Box<dyn GameObject>` map — the same non-owning-handle discipline
/// `ExchangeShared` uses for its clock/engine.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockSnapshot {
    pub id: ObjectId,
    pub symbol: String,
    pub company_name: String,
    pub category: String,
    pub issue_price: f64,
    pub total_shares: u64,
    pub price: f64,
    pub price_series: String,
    pub volume_series: String,
}

const DEFAULT_EMIT_PERIOD_MS: i64 = 1_000;
const DEFAULT_PRICE_VOLATILITY: f64 = 0.01;
const DEFAULT_VOLUME_VOLATILITY: f64 = 0.5;
const DEFAULT_BASE_VOLUME: f64 = 1000.0;

const PRICE_GRANULARITIES: [Granularity; 8] = Granularity::ALL;

fn price_series_id(exchange_id: ObjectId, symbol: &str) -> String {
    format!("{exchange_id}:{symbol}:price")
}

fn volume_series_id(exchange_id: ObjectId, symbol: &str) -> String {
    format!("{exchange_id}:{symbol}:volume")
}

/// Construction parameters (from a stock template, §6).
pub struct StockParams {
    pub symbol: String,
    pub company_name: String,
    pub category: String,
    pub issue_price: f64,
    pub total_shares: u64,
}

pub struct StockInstance {
    id: ObjectId,
    state: ObjectState,
    symbol: String,
    company_name: String,
    category: String,
    issue_price: f64,
    total_shares: u64,
    price: f64,
    exchange: Arc<ExchangeShared>,
    price_series: String,
    volume_series: String,
    last_emitted_virtual_millis: i64,
    emit_period_ms: i64,
    price_volatility: f64,
    volume_volatility: f64,
    base_volume: f64,
    rng: StdRng,
    snapshot: Arc<RwLock<StockSnapshot>>,
}

impl StockInstance {
    /// Returns the instance plus a cloneable handle to its read-only
    /// snapshot, so callers (the job runner's registry) can hold one without
    /// reaching into the kernel's object map.
    pub fn new(
        id: ObjectId,
        exchange: Arc<ExchangeShared>,
        params: StockParams,
    ) -> (Self, Arc<RwLock<StockSnapshot>>) {
        let price_series = price_series_id(exchange.id, &params.symbol);
        let volume_series = volume_series_id(exchange.id, &params.symbol);
        let snapshot = Arc::new(RwLock::new(StockSnapshot {
            id,
            symbol: params.symbol.clone(),
            company_name: params.company_name.clone(),
            category: params.category.clone(),
            issue_price: params.issue_price,
            total_shares: params.total_shares,
            price: params.issue_price,
            price_series: price_series.clone(),
            volume_series: volume_series.clone(),
        }));
        let instance = Self {
            id,
            state: ObjectState::Ready,
            symbol: params.symbol,
            company_name: params.company_name,
            category: params.category,
            issue_price: params.issue_price,
            total_shares: params.total_shares,
            price: params.issue_price,
            exchange,
            price_series,
            volume_series,
            last_emitted_virtual_millis: i64::MIN,
            emit_period_ms: DEFAULT_EMIT_PERIOD_MS,
            price_volatility: DEFAULT_PRICE_VOLATILITY,
            volume_volatility: DEFAULT_VOLUME_VOLATILITY,
            base_volume: DEFAULT_BASE_VOLUME,
            rng: StdRng::from_entropy(),
            snapshot: snapshot.clone(),
        };
        (instance, snapshot)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn company_name(&self) -> &str {
        &self.company_name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn price_series_id(&self) -> &str {
        &self.price_series
    }

    pub fn volume_series_id(&self) -> &str {
        &self.volume_series
    }

    /// Standard-normal draw via Box-Muller, two independent uniform `(0,1]`
    /// inputs (§4.5.1).
    fn standard_normal(&mut self) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..=1.0);
        let u2: f64 = self.rng.gen_range(0.0..1.0);
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    fn next_price(&mut self, current: f64) -> f64 {
        let z = self.standard_normal();
        (current * (1.0 + self.price_volatility * z)).max(0.01)
    }

    fn generated_volume(&mut self) -> f64 {
        let z = self.standard_normal();
        (self.base_volume * (1.0 + self.volume_volatility * z))
            .floor()
            .max(1.0)
    }

    fn is_in_trading_interval(&self) -> bool {
        matches!(
            self.exchange.clock.read().get_time_state(),
            TimeState::Morning | TimeState::Afternoon
        )
    }

    fn append_point(&self, timestamp: i64, price: f64, volume: f64) {
        let mut engine = self.exchange.engine.write();
        if let Err(e) = engine.add_data_point(&self.price_series, DataPoint::new(timestamp, price)) {
            warn!(series = %self.price_series, error = %e, "dropped price point");
        }
        if let Err(e) = engine.add_data_point(
            &self.volume_series,
            DataPoint::new(timestamp, volume).with_volume(volume),
        ) {
            warn!(series = %self.volume_series, error = %e, "dropped volume point");
        }
    }
}

impl GameObject for StockInstance {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn state(&self) -> ObjectState {
        self.state
    }

    fn set_state(&mut self, state: ObjectState) {
        self.state = state;
    }

    fn on_begin_play(&mut self) -> Result<(), String> {
        let granularities: std::collections::BTreeSet<_> = PRICE_GRANULARITIES.into_iter().collect();
        {
            let mut engine = self.exchange.engine.write();
            engine
                .create_series(SeriesDefinition {
                    id: self.price_series.clone(),
                    name: format!("{} price", self.symbol),
                    data_type: DataType::Continuous,
                    granularities: granularities.clone(),
                    metrics: [Metric::Open, Metric::High, Metric::Low, Metric::Close, Metric::Vwap]
                        .into_iter()
                        .collect(),
                    missing_policy: MissingPolicy::UsePrevious,
                })
                .map_err(|e| e.to_string())?;
            engine
                .create_series(SeriesDefinition {
                    id: self.volume_series.clone(),
                    name: format!("{} volume", self.symbol),
                    data_type: DataType::Discrete,
                    granularities,
                    metrics: [Metric::Volume].into_iter().collect(),
                    missing_policy: MissingPolicy::UseZero,
                })
                .map_err(|e| e.to_string())?;
        }

        if self.is_in_trading_interval() {
            let timestamp = self.exchange.clock.read().virtual_time_millis();
            let volume = self.generated_volume();
            self.append_point(timestamp, self.issue_price, volume);
            self.last_emitted_virtual_millis = timestamp;
        }
        Ok(())
    }

    fn on_tick(&mut self, _delta_seconds: f64) -> Result<(), String> {
        if self.exchange.is_destroying_or_destroyed() {
            return Ok(());
        }
        if !self.is_in_trading_interval() {
            return Ok(());
        }
        let timestamp = self.exchange.clock.read().virtual_time_millis();
        if timestamp - self.last_emitted_virtual_millis < self.emit_period_ms {
            return Ok(());
        }
        let new_price = self.next_price(self.price);
        let volume = self.generated_volume();
        self.price = new_price;
        self.snapshot.write().price = new_price;
        self.append_point(timestamp, new_price, volume);
        self.last_emitted_virtual_millis = timestamp;
        Ok(())
    }

    fn on_destroy(&mut self) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{DayInterval, DayMinute, SimulatedClock};
    use crate::entities::exchange::ExchangeShared;
    use chrono::Utc;
    use parking_lot::RwLock as PLock;
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicU8;

    fn shared_at(now_millis: i64) -> Arc<ExchangeShared> {
        let clock = SimulatedClock::new(
            now_millis,
            1.0,
            vec![DayInterval::new(
                "morning",
                DayMinute::parse("09:30").unwrap(),
                DayMinute::parse("11:30").unwrap(),
            )],
            vec![],
        );
        Arc::new(ExchangeShared {
            id: 1,
            name: "X".to_string(),
            description: String::new(),
            created_at: Utc::now(),
            last_active_at: PLock::new(Utc::now()),
            clock: PLock::new(clock),
            engine: PLock::new(crate::timeseries::TimeSeriesEngine::new()),
            stock_ids: PLock::new(BTreeSet::new()),
            trader_ids: PLock::new(BTreeSet::new()),
            state: AtomicU8::new(0),
        })
    }

    fn ts(s: &str) -> i64 {
        chrono::DateTime::parse_from_rfc3339(s)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn begin_play_creates_series_and_initial_point_in_trading_hours() {
        let exchange = shared_at(ts("2026-01-05T09:30:00Z"));
        let (mut stock, _snapshot) = StockInstance::new(
            2,
            exchange.clone(),
            StockParams {
                symbol: "ACME".to_string(),
                company_name: "Acme".to_string(),
                category: "Tech".to_string(),
                issue_price: 10.0,
                total_shares: 1000,
            },
        );
        stock.on_begin_play().unwrap();
        assert!(exchange.engine.read().contains_series(stock.price_series_id()));
        assert!(exchange.engine.read().contains_series(stock.volume_series_id()));
        let latest = exchange
            .engine
            .read()
            .get_latest_data(stock.price_series_id(), Granularity::M1)
            .unwrap();
        assert!(latest.is_some());
    }

    #[test]
    fn begin_play_outside_trading_hours_creates_series_without_point() {
        let exchange = shared_at(ts("2026-01-05T20:00:00Z"));
        let (mut stock, _snapshot) = StockInstance::new(
            2,
            exchange.clone(),
            StockParams {
                symbol: "ACME".to_string(),
                company_name: "Acme".to_string(),
                category: "Tech".to_string(),
                issue_price: 10.0,
                total_shares: 1000,
            },
        );
        stock.on_begin_play().unwrap();
        let latest = exchange
            .engine
            .read()
            .get_latest_data(stock.price_series_id(), Granularity::M1)
            .unwrap();
        assert!(latest.is_none());
    }

    #[test]
    fn on_tick_no_ops_outside_trading_hours() {
        let exchange = shared_at(ts("2026-01-05T20:00:00Z"));
        let (mut stock, _snapshot) = StockInstance::new(
            2,
            exchange,
            StockParams {
                symbol: "ACME".to_string(),
                company_name: "Acme".to_string(),
                category: "Tech".to_string(),
                issue_price: 10.0,
                total_shares: 1000,
            },
        );
        stock.on_begin_play().unwrap();
        stock.on_tick(1.0).unwrap();
        assert_eq!(stock.price(), 10.0);
    }

    #[test]
    fn price_never_goes_non_positive() {
        let exchange = shared_at(ts("2026-01-05T09:30:00Z"));
        let (mut stock, _snapshot) = StockInstance::new(
            2,
            exchange,
            StockParams {
                symbol: "ACME".to_string(),
                company_name: "Acme".to_string(),
                category: "Tech".to_string(),
                issue_price: 10.0,
                total_shares: 1000,
            },
        );
        stock.price_volatility = 10.0; // force extreme moves
        for _ in 0..200 {
            let p = stock.next_price(stock.price);
            assert!(p >= 0.01);
        }
    }
}
