//! In-memory registry of live environments, backing the read API
//! (`listEnvironments`/`getEnvironmentDetails`/`destroyEnvironment`).
//!
//! Holds non-owning handles only: the `Arc<ExchangeShared>` and the stock/
//! trader snapshot handles. The kernel remains the sole owner of the actual
//! `GameObject`s; destroying an environment here only drops these handles
//! after posting the cascading destroy to the kernel.

use crate::entities::{ExchangeShared, StockSnapshot, TraderSnapshot};
use crate::lifecycle::ObjectId;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

pub struct EnvironmentRecord {
    pub environment_id: ObjectId,
    pub user_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub exchange: Arc<ExchangeShared>,
    pub stocks: Vec<Arc<RwLock<StockSnapshot>>>,
    pub traders: Vec<Arc<RwLock<TraderSnapshot>>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSummary {
    pub environment_id: ObjectId,
    pub name: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub stock_count: usize,
    pub trader_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentDetails {
    pub summary: EnvironmentSummary,
    pub stocks: Vec<StockSnapshot>,
    pub traders: Vec<TraderSnapshot>,
}

impl EnvironmentRecord {
    fn summary(&self) -> EnvironmentSummary {
        EnvironmentSummary {
            environment_id: self.environment_id,
            name: self.name.clone(),
            user_id: self.user_id.clone(),
            created_at: self.created_at,
            stock_count: self.stocks.len(),
            trader_count: self.traders.len(),
        }
    }

    fn details(&self) -> EnvironmentDetails {
        EnvironmentDetails {
            summary: self.summary(),
            stocks: self.stocks.iter().map(|s| s.read().clone()).collect(),
            traders: self.traders.iter().map(|t| t.read().clone()).collect(),
        }
    }
}

/// Keyed by `environmentId`, which is the owning `ExchangeInstance`'s
/// `ObjectId`.
#[derive(Default)]
pub struct EnvironmentRegistry {
    environments: RwLock<HashMap<ObjectId, EnvironmentRecord>>,
}

impl EnvironmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: EnvironmentRecord) {
        self.environments.write().insert(record.environment_id, record);
    }

    pub fn remove(&self, environment_id: ObjectId) -> Option<EnvironmentRecord> {
        self.environments.write().remove(&environment_id)
    }

    pub fn list(&self, user_id: &str) -> Vec<EnvironmentSummary> {
        self.environments
            .read()
            .values()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.summary())
            .collect()
    }

    pub fn details(&self, environment_id: ObjectId, user_id: &str) -> Option<EnvironmentDetails> {
        let environments = self.environments.read();
        let record = environments.get(&environment_id)?;
        if record.user_id != user_id {
            return None;
        }
        Some(record.details())
    }

    pub fn exchange_for(&self, environment_id: ObjectId, user_id: &str) -> Option<Arc<ExchangeShared>> {
        let environments = self.environments.read();
        let record = environments.get(&environment_id)?;
        if record.user_id != user_id {
            return None;
        }
        Some(record.exchange.clone())
    }

    pub fn owns(&self, environment_id: ObjectId, user_id: &str) -> bool {
        self.environments
            .read()
            .get(&environment_id)
            .map(|r| r.user_id == user_id)
            .unwrap_or(false)
    }
}
