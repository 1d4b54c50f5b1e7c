//! End-to-end coverage across the job runner, kernel, clock, and time-series
//! engine together — the individual components are unit-tested in their own
//! modules; this file exercises the full stack the way an external caller
//! (the HTTP/WS surface, per spec.md §1) would drive it.

use sim_core::{
    ExchangeTemplate, Granularity, InMemoryTemplateStore, JobRunner, RiskProfile, SimConfig,
    StockTemplate, TaskStage, TraderTemplate, TradingIntervalsFile,
};
use std::sync::Arc;
use std::time::Duration;

fn test_config() -> SimConfig {
    let mut cfg = SimConfig::default();
    cfg.kernel_fps = 60;
    cfg.worker_timeout_ms = 5_000;
    cfg
}

fn store_with_two_stocks() -> InMemoryTemplateStore {
    InMemoryTemplateStore::new()
        .with_exchange(ExchangeTemplate {
            id: "nasdaq-demo".to_string(),
            name: "Demo Exchange".to_string(),
            description: "integration test exchange".to_string(),
            trader_template_ids: vec!["trader-1".to_string()],
            stock_template_ids: vec!["stock-acme".to_string(), "stock-globex".to_string()],
        })
        .with_trader(TraderTemplate {
            id: "trader-1".to_string(),
            name: "Momentum Bot".to_string(),
            initial_capital: 50_000.0,
            risk_profile: RiskProfile::Aggressive,
        })
        .with_stock(StockTemplate {
            id: "stock-acme".to_string(),
            symbol: "ACME".to_string(),
            company_name: "Acme Corp".to_string(),
            category: "Industrials".to_string(),
            issue_price: 10.0,
            total_shares: 1_000_000,
        })
        .with_stock(StockTemplate {
            id: "stock-globex".to_string(),
            symbol: "GLBX".to_string(),
            company_name: "Globex Corp".to_string(),
            category: "Tech".to_string(),
            issue_price: 25.0,
            total_shares: 500_000,
        })
}

async fn await_terminal(runner: &JobRunner, request_id: &str) -> sim_core::InstantiationTask {
    for _ in 0..300 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let task = runner.get_creation_progress(request_id).unwrap();
        if task.stage.is_terminal() {
            return task;
        }
    }
    panic!("task {request_id} never reached a terminal stage");
}

/// Full lifecycle: submit -> progress monotonically advances to Complete(100)
/// -> environment shows up in listEnvironments/getEnvironmentDetails ->
/// ticking the kernel actually produces queryable k-line/volume-trend data ->
/// destroyEnvironment removes it.
#[tokio::test]
async fn create_tick_query_and_destroy_environment() {
    let runner = JobRunner::new(
        test_config(),
        TradingIntervalsFile::defaults(),
        Arc::new(store_with_two_stocks()),
    );

    let request_id = runner
        .create_environment("nasdaq-demo".to_string(), "alice".to_string())
        .await
        .unwrap();

    let task = await_terminal(&runner, &request_id).await;
    assert_eq!(task.stage, TaskStage::Complete);
    assert_eq!(task.percentage, 100);
    let environment_id = task.environment_id.expect("complete task carries an environment id");

    let summaries = runner.list_environments("alice");
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].stock_count, 2);
    assert_eq!(summaries[0].trader_count, 1);

    // Other users never see it.
    assert!(runner.list_environments("bob").is_empty());

    let details = runner.get_environment_details(environment_id, "alice").unwrap();
    assert_eq!(details.stocks.len(), 2);
    let acme = details.stocks.iter().find(|s| s.symbol == "ACME").unwrap();
    assert_eq!(acme.price, 10.0, "no ticks have run yet, price is still the issue price");

    // The kernel thread ticks independently in the background (§5); give it
    // enough wall-clock time at 60 fps, with stocks emitting every 1000ms of
    // *virtual* time, that the clock's default acceleration (1.0) plus
	// trading-hours gating produces at least one emitted point if "now" falls
	// inside a trading window, and at least the creation-time initial point
	// otherwise. Either way, querying the price series must succeed without
	// error (scenario-1-shaped read, just against live data instead of a
	// literal fixture).
    tokio::time::sleep(Duration::from_millis(500)).await;

    let now_ms = chrono::Utc::now().timestamp_millis();
    let bars = runner
        .query_k_line(environment_id, "alice", "ACME", Granularity::M1, 0, now_ms + 86_400_000)
        .unwrap();
    // The series always exists post-BeginPlay; whether it has bars depends on
    // whether "now" falls in a trading interval, but the query itself must
    // never error for a real environment/symbol.
    let _ = bars;

    let trend = runner
        .query_volume_trend(environment_id, "alice", 0, now_ms + 86_400_000, 60_000)
        .unwrap();
    assert!(!trend.is_empty());

    // Unknown symbol is a NotFound, not a panic.
    let err = runner
        .query_k_line(environment_id, "alice", "NOPE", Granularity::M1, 0, now_ms)
        .unwrap_err();
    assert!(matches!(err, sim_core::RunnerError::NotFound { .. }));

    runner.destroy_environment(environment_id, "alice").await.unwrap();
    assert!(runner.list_environments("alice").is_empty());
    assert!(runner.get_environment_details(environment_id, "alice").is_err());
}

/// Cancellation before the task reaches `CreatingObjects` must transition it
/// to a terminal `Error` and never register an environment (§4.6
/// Cancellation, §8 Rollback completeness).
#[tokio::test]
async fn cancel_creation_before_completion_prevents_registration() {
    let runner = JobRunner::new(
        test_config(),
        TradingIntervalsFile::defaults(),
        Arc::new(store_with_two_stocks()),
    );
    let request_id = runner
        .create_environment("nasdaq-demo".to_string(), "carol".to_string())
        .await
        .unwrap();

    // Racy by nature (cancellation is cooperative), but cancelling
    // immediately after submission should win against a store with no
    // artificial latency almost every time; if the task already completed,
    // cancel_creation correctly refuses it (tested separately) and we still
    // assert the invariant that always holds: no environment leaks under
    // Error, and Complete is internally consistent under happy-path.
    let _ = runner.cancel_creation(&request_id);

    let task = await_terminal(&runner, &request_id).await;
    match task.stage {
        TaskStage::Error => {
            assert!(task.environment_id.is_none());
            assert!(runner.list_environments("carol").is_empty());
        }
        TaskStage::Complete => {
            // Cancellation lost the race; the environment must still be
            // fully and correctly registered.
            assert!(task.environment_id.is_some());
        }
        other => panic!("unexpected non-terminal stage {other:?}"),
    }
}

/// `cancelCreation` on an already-terminal request must fail rather than
/// silently no-op, and must never be able to resurrect a destroyed task.
#[tokio::test]
async fn cancel_after_completion_is_rejected() {
    let runner = JobRunner::new(
        test_config(),
        TradingIntervalsFile::defaults(),
        Arc::new(store_with_two_stocks()),
    );
    let request_id = runner
        .create_environment("nasdaq-demo".to_string(), "dave".to_string())
        .await
        .unwrap();
    let task = await_terminal(&runner, &request_id).await;
    assert_eq!(task.stage, TaskStage::Complete);

    assert!(runner.cancel_creation(&request_id).is_err());
}

/// getCreationProgress/cancelCreation/getEnvironmentDetails on unknown ids
/// surface as errors, never panics.
#[tokio::test]
async fn unknown_ids_are_reported_not_panicked() {
    let runner = JobRunner::new(
        test_config(),
        TradingIntervalsFile::defaults(),
        Arc::new(store_with_two_stocks()),
    );
    assert!(runner.get_creation_progress("does-not-exist").is_none());
    assert!(runner.cancel_creation("does-not-exist").is_err());
    assert!(runner.get_environment_details(999_999, "alice").is_err());
}
