//! Simulation entities: Exchange, Stock, Trader (§3, §4.5).

pub mod exchange;
pub mod stock;
pub mod trader;

pub use exchange::{ExchangeInstance, ExchangeParams, ExchangeShared};
pub use stock::{StockInstance, StockParams, StockSnapshot};
pub use trader::{AITraderInstance, RiskProfile, TraderParams, TraderSnapshot};
