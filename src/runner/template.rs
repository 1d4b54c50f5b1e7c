//! `TemplateStore` (§6): the external collaborator the job runner fetches
//! market-environment templates through. Only the trait boundary and an
//! in-memory implementation (for tests/demos) live in this crate — a real
//! persistence-backed store is out of scope (§1 Non-goals).

use crate::entities::RiskProfile;
use crate::error::TemplateError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct ExchangeTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub trader_template_ids: Vec<String>,
    pub stock_template_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TraderTemplate {
    pub id: String,
    pub name: String,
    pub initial_capital: f64,
    pub risk_profile: RiskProfile,
}

#[derive(Debug, Clone)]
pub struct StockTemplate {
    pub id: String,
    pub symbol: String,
    pub company_name: String,
    pub category: String,
    pub issue_price: f64,
    pub total_shares: u64,
}

/// Each call is idempotent and may fail with `TemplateError::NotFound` or
/// `TemplateError::Transient` (§6).
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn fetch_exchange_template(&self, id: &str) -> Result<ExchangeTemplate, TemplateError>;
    async fn fetch_trader_template(&self, id: &str) -> Result<TraderTemplate, TemplateError>;
    async fn fetch_stock_template(&self, id: &str) -> Result<StockTemplate, TemplateError>;
}

/// In-memory `TemplateStore` for tests and the `demos/` smoke harness.
/// Registering an id under `flaky_ids` makes the next fetch of that id
/// report `Transient` once, then succeed — useful for exercising the
/// runner's retry policy.
#[derive(Default)]
pub struct InMemoryTemplateStore {
    exchanges: HashMap<String, ExchangeTemplate>,
    traders: HashMap<String, TraderTemplate>,
    stocks: HashMap<String, StockTemplate>,
    flaky_remaining: Mutex<HashMap<String, u32>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exchange(mut self, template: ExchangeTemplate) -> Self {
        self.exchanges.insert(template.id.clone(), template);
        self
    }

    pub fn with_trader(mut self, template: TraderTemplate) -> Self {
        self.traders.insert(template.id.clone(), template);
        self
    }

    pub fn with_stock(mut self, template: StockTemplate) -> Self {
        self.stocks.insert(template.id.clone(), template);
        self
    }

    /// Make the next `flakes` fetches of `id` (any kind) fail transiently.
    pub fn with_flaky(self, id: &str, flakes: u32) -> Self {
        self.flaky_remaining.lock().unwrap().insert(id.to_string(), flakes);
        self
    }

    fn consume_flake(&self, id: &str) -> bool {
        let mut flaky = self.flaky_remaining.lock().unwrap();
        match flaky.get_mut(id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn fetch_exchange_template(&self, id: &str) -> Result<ExchangeTemplate, TemplateError> {
        if self.consume_flake(id) {
            return Err(TemplateError::Transient {
                reason: format!("simulated transient failure for '{id}'"),
            });
        }
        self.exchanges
            .get(id)
            .cloned()
            .ok_or_else(|| TemplateError::NotFound { id: id.to_string() })
    }

    async fn fetch_trader_template(&self, id: &str) -> Result<TraderTemplate, TemplateError> {
        if self.consume_flake(id) {
            return Err(TemplateError::Transient {
                reason: format!("simulated transient failure for '{id}'"),
            });
        }
        self.traders
            .get(id)
            .cloned()
            .ok_or_else(|| TemplateError::NotFound { id: id.to_string() })
    }

    async fn fetch_stock_template(&self, id: &str) -> Result<StockTemplate, TemplateError> {
        if self.consume_flake(id) {
            return Err(TemplateError::Transient {
                reason: format!("simulated transient failure for '{id}'"),
            });
        }
        self.stocks
            .get(id)
            .cloned()
            .ok_or_else(|| TemplateError::NotFound { id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_exchange() -> ExchangeTemplate {
        ExchangeTemplate {
            id: "ex1".to_string(),
            name: "Demo Exchange".to_string(),
            description: String::new(),
            trader_template_ids: vec!["tr1".to_string()],
            stock_template_ids: vec!["st1".to_string()],
        }
    }

    #[tokio::test]
    async fn fetch_returns_not_found_for_unknown_id() {
        let store = InMemoryTemplateStore::new();
        let err = store.fetch_exchange_template("missing").await.unwrap_err();
        assert!(matches!(err, TemplateError::NotFound { .. }));
    }

    #[tokio::test]
    async fn flaky_id_fails_then_succeeds() {
        let store = InMemoryTemplateStore::new()
            .with_exchange(sample_exchange())
            .with_flaky("ex1", 1);
        assert!(matches!(
            store.fetch_exchange_template("ex1").await,
            Err(TemplateError::Transient { .. })
        ));
        assert!(store.fetch_exchange_template("ex1").await.is_ok());
    }
}
