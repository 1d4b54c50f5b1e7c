//! Smoke-test harness: wires an in-memory `TemplateStore`, a kernel, and the
//! job runner together and drives one environment through its full
//! lifecycle. Doubles as a runnable usage example for the crate's read API
//! (§6) since the HTTP/WS surface that would normally call it is out of
//! scope (§1 Non-goals).

use sim_core::{
    ExchangeTemplate, Granularity, InMemoryTemplateStore, JobRunner, RiskProfile, SimConfig,
    StockTemplate, TaskStage, TraderTemplate, TradingIntervalsFile,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let store = InMemoryTemplateStore::new()
        .with_exchange(ExchangeTemplate {
            id: "demo-exchange".to_string(),
            name: "Demo Training Exchange".to_string(),
            description: "smoke-test environment".to_string(),
            trader_template_ids: vec!["trader-conservative".to_string(), "trader-aggressive".to_string()],
            stock_template_ids: vec!["stock-acme".to_string()],
        })
        .with_trader(TraderTemplate {
            id: "trader-conservative".to_string(),
            name: "Steady Eddie".to_string(),
            initial_capital: 100_000.0,
            risk_profile: RiskProfile::Conservative,
        })
        .with_trader(TraderTemplate {
            id: "trader-aggressive".to_string(),
            name: "YOLO Bot".to_string(),
            initial_capital: 25_000.0,
            risk_profile: RiskProfile::Aggressive,
        })
        .with_stock(StockTemplate {
            id: "stock-acme".to_string(),
            symbol: "ACME".to_string(),
            company_name: "Acme Corp".to_string(),
            category: "Industrials".to_string(),
            issue_price: 42.0,
            total_shares: 2_000_000,
        });

    let runner = JobRunner::new(SimConfig::from_env(), TradingIntervalsFile::defaults(), Arc::new(store));

    let request_id = runner
        .create_environment("demo-exchange".to_string(), "demo-user".to_string())
        .await
        .expect("templateId/userId are both present");
    println!("submitted creation request {request_id}");

    let task = loop {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let task = runner
            .get_creation_progress(&request_id)
            .expect("task was just submitted");
        println!("  stage={:?} percentage={} message={}", task.stage, task.percentage, task.message);
        if task.stage.is_terminal() {
            break task;
        }
    };

    let environment_id = match task.stage {
        TaskStage::Complete => task.environment_id.expect("complete task carries an environment id"),
        TaskStage::Error => {
            eprintln!("environment creation failed: {}", task.error.unwrap_or_default());
            return;
        }
        _ => unreachable!("loop only exits on a terminal stage"),
    };

    println!("environment {environment_id} created, letting it tick for a few seconds...");
    tokio::time::sleep(Duration::from_secs(3)).await;

    let details = runner
        .get_environment_details(environment_id, "demo-user")
        .expect("just-created environment belongs to demo-user");
    for stock in &details.stocks {
        println!("  {} last price={:.4}", stock.symbol, stock.price);
    }
    for trader in &details.traders {
        println!("  trader {} ({})", trader.display_name, trader.risk_profile.as_str());
    }

    let now_ms = chrono::Utc::now().timestamp_millis();
    let bars = runner
        .query_k_line(environment_id, "demo-user", "ACME", Granularity::M1, now_ms - 3_600_000, now_ms + 3_600_000)
        .expect("ACME's price series exists once the stock has run BeginPlay");
    println!("{} one-minute bars for ACME", bars.len());
    for bar in bars.iter().rev().take(3) {
        println!(
            "  [{}..{}) open={:.4} high={:.4} low={:.4} close={:.4} volume={:.1} vwap={:.4}",
            bar.start_time, bar.end_time, bar.open, bar.high, bar.low, bar.close, bar.volume, bar.vwap
        );
    }

    let export = runner
        .export_environment(environment_id, "demo-user")
        .await
        .expect("environment still exists");
    println!("exported environment snapshot at {}", export.exported_at);

    runner
        .destroy_environment(environment_id, "demo-user")
        .await
        .expect("environment still exists");
    println!("environment {environment_id} destroyed");
}
