//! `AITraderInstance` (§3, §4.5): advisory-only, logs observations about the
//! exchange's stocks but never mutates any series. Its tick must never block
//! or fail the kernel's fault budget on transient read contention.

use super::exchange::ExchangeShared;
use crate::lifecycle::{GameObject, ObjectId, ObjectState};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace};

/// Read-only snapshot of a trader's public fields, shared with external
/// readers (the job runner's environment registry) the same way
/// `StockSnapshot` serves stocks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraderSnapshot {
    pub id: ObjectId,
    pub display_name: String,
    pub risk_profile: RiskProfile,
    pub watch_symbols: Vec<String>,
}

/// Trading-style label carried from a trader template. Advisory only — it
/// has no effect on series generation, it only shapes which symbols a
/// trader pays attention to and what it logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskProfile::Conservative => "conservative",
            RiskProfile::Moderate => "moderate",
            RiskProfile::Aggressive => "aggressive",
        }
    }

    /// How many ticks between observations; more aggressive traders watch
    /// more closely.
    fn observation_period_ticks(&self) -> u32 {
        match self {
            RiskProfile::Conservative => 30,
            RiskProfile::Moderate => 10,
            RiskProfile::Aggressive => 3,
        }
    }
}

pub struct TraderParams {
    pub display_name: String,
    pub risk_profile: RiskProfile,
    pub watch_symbols: Vec<String>,
}

pub struct AITraderInstance {
    id: ObjectId,
    state: ObjectState,
    display_name: String,
    risk_profile: RiskProfile,
    watch_symbols: Vec<String>,
    exchange: Arc<ExchangeShared>,
    ticks_since_observation: u32,
    snapshot: Arc<RwLock<TraderSnapshot>>,
}

impl AITraderInstance {
    pub fn new(
        id: ObjectId,
        exchange: Arc<ExchangeShared>,
        params: TraderParams,
    ) -> (Self, Arc<RwLock<TraderSnapshot>>) {
        let snapshot = Arc::new(RwLock::new(TraderSnapshot {
            id,
            display_name: params.display_name.clone(),
            risk_profile: params.risk_profile,
            watch_symbols: params.watch_symbols.clone(),
        }));
        let instance = Self {
            id,
            state: ObjectState::Ready,
            display_name: params.display_name,
            risk_profile: params.risk_profile,
            watch_symbols: params.watch_symbols,
            exchange,
            ticks_since_observation: 0,
            snapshot: snapshot.clone(),
        };
        (instance, snapshot)
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn risk_profile(&self) -> RiskProfile {
        self.risk_profile
    }

    fn observe(&self) {
        for symbol in &self.watch_symbols {
            let price_series = format!("{}:{}:price", self.exchange.id, symbol);
            let latest = self
                .exchange
                .engine
                .read()
                .get_latest_data(&price_series, crate::timeseries::Granularity::M1);
            match latest {
                Ok(Some(bar)) => trace!(
                    trader = %self.display_name,
                    risk_profile = self.risk_profile.as_str(),
                    symbol,
                    close = bar.close,
                    "trader observation"
                ),
                Ok(None) => {}
                Err(_) => {
                    // Series not created yet (stock hasn't had BeginPlay run against
                    // this exchange), nothing to observe this tick.
                }
            }
        }
    }
}

impl GameObject for AITraderInstance {
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
        debug!(trader = %self.display_name, "trader began play");
        Ok(())
    }

    fn on_tick(&mut self, _delta_seconds: f64) -> Result<(), String> {
        if self.exchange.is_destroying_or_destroyed() {
            return Ok(());
        }
        self.ticks_since_observation += 1;
        if self.ticks_since_observation >= self.risk_profile.observation_period_ticks() {
            self.ticks_since_observation = 0;
            self.observe();
        }
        Ok(())
    }

    fn on_destroy(&mut self) -> Result<(), String> {
        debug!(trader = %self.display_name, "trader destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use chrono::Utc;
    use parking_lot::RwLock as PLock;
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicU8;

    fn shared() -> Arc<ExchangeShared> {
        Arc::new(ExchangeShared {
            id: 1,
            name: "X".to_string(),
            description: String::new(),
            created_at: Utc::now(),
            last_active_at: PLock::new(Utc::now()),
            clock: PLock::new(SimulatedClock::new(0, 1.0, vec![], vec![])),
            engine: PLock::new(crate::timeseries::TimeSeriesEngine::new()),
            stock_ids: PLock::new(BTreeSet::new()),
            trader_ids: PLock::new(BTreeSet::new()),
            state: AtomicU8::new(0),
        })
    }

    #[test]
    fn observation_period_gates_how_often_it_looks() {
        let (mut trader, _snapshot) = AITraderInstance::new(
            2,
            shared(),
            TraderParams {
                display_name: "Bot".to_string(),
                risk_profile: RiskProfile::Conservative,
                watch_symbols: vec!["ACME".to_string()],
            },
        );
        for _ in 0..29 {
            trader.on_tick(1.0).unwrap();
        }
        assert_eq!(trader.ticks_since_observation, 29);
        trader.on_tick(1.0).unwrap();
        assert_eq!(trader.ticks_since_observation, 0);
    }

    #[test]
    fn tick_never_fails_even_with_no_series() {
        let (mut trader, _snapshot) = AITraderInstance::new(
            2,
            shared(),
            TraderParams {
                display_name: "Bot".to_string(),
                risk_profile: RiskProfile::Aggressive,
                watch_symbols: vec!["NOPE".to_string()],
            },
        );
        for _ in 0..10 {
            assert!(trader.on_tick(1.0).is_ok());
        }
    }
}
