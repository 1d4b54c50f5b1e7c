//! `ExchangeInstance` (§3, §4.5): owns a clock and a time-series engine,
//! cascades destruction to its stocks and traders.

use crate::clock::{DayInterval, DayMinute, SimulatedClock};
use crate::lifecycle::{GameObject, Kernel, KernelHandle, ObjectId, ObjectState};
use crate::timeseries::TimeSeriesEngine;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::debug;

fn state_to_u8(s: ObjectState) -> u8 {
    match s {
        ObjectState::Ready => 0,
        ObjectState::Active => 1,
        ObjectState::Paused => 2,
        ObjectState::Destroying => 3,
        ObjectState::Destroyed => 4,
    }
}

fn u8_to_state(v: u8) -> ObjectState {
    match v {
        0 => ObjectState::Ready,
        1 => ObjectState::Active,
        2 => ObjectState::Paused,
        3 => ObjectState::Destroying,
        _ => ObjectState::Destroyed,
    }
}

/// State shared between the `ExchangeInstance` GameObject wrapper and the
/// stocks/traders that hold a non-owning back-reference to it (§9: "cyclic
/// exchange<->child references... represent child -> parent as a
/// non-owning back-reference"). `state` is mirrored here via an atomic so
/// children can cheaply check "is my exchange destroying?" without going
/// through the kernel's id map.
pub struct ExchangeShared {
    pub id: ObjectId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: RwLock<DateTime<Utc>>,
    pub clock: RwLock<SimulatedClock>,
    pub engine: RwLock<TimeSeriesEngine>,
    pub stock_ids: RwLock<BTreeSet<ObjectId>>,
    pub trader_ids: RwLock<BTreeSet<ObjectId>>,
    pub(crate) state: AtomicU8,
}

impl ExchangeShared {
    pub fn state(&self) -> ObjectState {
        u8_to_state(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, s: ObjectState) {
        self.state.store(state_to_u8(s), Ordering::Release);
    }

    pub fn is_destroying_or_destroyed(&self) -> bool {
        matches!(self.state(), ObjectState::Destroying | ObjectState::Destroyed)
    }
}

/// Construction parameters for a new exchange (§6 env vars, §4.3
/// Initialization).
pub struct ExchangeParams {
    pub name: String,
    pub description: String,
    pub market_open: DayMinute,
    pub acceleration: f64,
    pub trading_intervals: Vec<DayInterval>,
    pub non_trading_intervals: Vec<DayInterval>,
    pub now: DateTime<Utc>,
}

pub struct ExchangeInstance {
    pub shared: Arc<ExchangeShared>,
    state: ObjectState,
    kernel: KernelHandle,
}

impl ExchangeInstance {
    /// All of the clock/engine setup spec.md §4.5 assigns to `onBeginPlay`
    /// happens here at construction — every input it needs (`now`, the
    /// configured intervals, the market-open time) is already available, so
    /// there is no externally visible difference between "construct then
    /// BeginPlay runs" and "BeginPlay configures a blank shell"; `onBeginPlay`
    /// below is a lightweight confirmation step (see DESIGN.md).
    pub fn new(id: ObjectId, kernel: KernelHandle, params: ExchangeParams) -> Self {
        let trading_days = [true, true, true, true, true, false, false];
        let initial_virtual_millis =
            SimulatedClock::initial_time_for(params.now, params.market_open, &trading_days);
        let clock = SimulatedClock::new(
            initial_virtual_millis,
            params.acceleration,
            params.trading_intervals,
            params.non_trading_intervals,
        );
        let shared = Arc::new(ExchangeShared {
            id,
            name: params.name,
            description: params.description,
            created_at: params.now,
            last_active_at: RwLock::new(params.now),
            clock: RwLock::new(clock),
            engine: RwLock::new(TimeSeriesEngine::new()),
            stock_ids: RwLock::new(BTreeSet::new()),
            trader_ids: RwLock::new(BTreeSet::new()),
            state: AtomicU8::new(state_to_u8(ObjectState::Ready)),
        });
        Self {
            shared,
            state: ObjectState::Ready,
            kernel,
        }
    }

    pub fn register_stock(&self, id: ObjectId) {
        self.shared.stock_ids.write().insert(id);
    }

    pub fn register_trader(&self, id: ObjectId) {
        self.shared.trader_ids.write().insert(id);
    }
}

impl GameObject for ExchangeInstance {
    fn id(&self) -> ObjectId {
        self.shared.id
    }

    fn state(&self) -> ObjectState {
        self.state
    }

    fn set_state(&mut self, state: ObjectState) {
        self.state = state;
        self.shared.set_state(state);
    }

    fn on_begin_play(&mut self) -> Result<(), String> {
        debug!(exchange_id = self.shared.id, name = %self.shared.name, "exchange began play");
        Ok(())
    }

    fn on_tick(&mut self, delta_seconds: f64) -> Result<(), String> {
        self.shared.clock.write().advance(delta_seconds);
        *self.shared.last_active_at.write() = Utc::now();
        Ok(())
    }

    fn on_destroy(&mut self) -> Result<(), String> {
        let stock_ids: Vec<ObjectId> = self.shared.stock_ids.read().iter().copied().collect();
        let trader_ids: Vec<ObjectId> = self.shared.trader_ids.read().iter().copied().collect();
        debug!(
            exchange_id = self.shared.id,
            stocks = stock_ids.len(),
            traders = trader_ids.len(),
            "exchange destroying, cascading to children"
        );
        // Children are owned through the kernel's id map, not through this
        // struct, so the cascade is posted as a construct command and
        // applied at the start of the next tick (§5).
        let _ = self.kernel.post(Box::new(move |k: &mut Kernel| {
            for id in stock_ids {
                let _ = k.destroy_object(id);
            }
            for id in trader_ids {
                let _ = k.destroy_object(id);
            }
        }));
        Ok(())
    }
}
