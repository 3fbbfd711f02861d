//! End-to-end Gateway scenarios: happy path, rate limiting, and retry-then-heal.

use std::sync::Arc;
use std::time::Duration;

use pantheon_core::pantheon::dual_store::{DualStore, InMemoryPrimaryStore};
use pantheon_core::pantheon::gateway::connector::ConnectorBudget;
use pantheon_core::pantheon::gateway::connectors::EchoConnector;
use pantheon_core::pantheon::gateway::Gateway;
use pantheon_core::pantheon::rate_limiter::RateLimitConfig;
use pantheon_core::PantheonError;
use tempfile::tempdir;

fn build_gateway() -> (Gateway, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("conversations.jsonl");
    let store = DualStore::open(Box::new(InMemoryPrimaryStore::new()), path, 100).unwrap();
    (Gateway::new(store), dir)
}

#[tokio::test]
async fn scenario_a_happy_path() {
    let (gateway, _dir) = build_gateway();
    gateway.register(Arc::new(EchoConnector::new()), ConnectorBudget { max_tokens: 512 }, None);

    let outcome = gateway.send("abc", "echo", "conv1", "user").await.unwrap();
    assert_eq!(outcome.record.response, "cba");
    assert_eq!(outcome.record.response_time_secs >= 0.0, true);

    let tail = gateway.store().tail("conv1", 10).await.unwrap();
    assert_eq!(tail.len(), 1);

    let snapshot = gateway.telemetry().snapshot();
    let echo_stats = snapshot.get("echo").expect("echo telemetry recorded");
    assert_eq!(echo_stats.successes, 1);
    assert_eq!(echo_stats.failures, 0);
}

#[tokio::test]
async fn scenario_b_rate_limit() {
    let (gateway, _dir) = build_gateway();
    gateway.register(
        Arc::new(EchoConnector::new()),
        ConnectorBudget { max_tokens: 512 },
        Some(RateLimitConfig { per_minute: 2, per_hour: 1000, per_day: 10000 }),
    );
    let gateway = gateway.with_rate_limit_wait(Duration::from_millis(100));

    assert!(gateway.send("one", "echo", "conv1", "user").await.is_ok());
    assert!(gateway.send("two", "echo", "conv1", "user").await.is_ok());

    let third = gateway.send("three", "echo", "conv1", "user").await;
    assert!(matches!(third, Err(PantheonError::RateLimited { .. })));
}

#[tokio::test]
async fn scenario_c_retry_then_heal() {
    let (gateway, _dir) = build_gateway();
    let connector = Arc::new(EchoConnector::new());
    connector.fail_next(2);
    gateway.register(connector, ConnectorBudget { max_tokens: 512 }, None);

    let outcome = gateway.send("abc", "echo", "conv1", "user").await.unwrap();
    assert_eq!(outcome.record.response, "cba");

    let snapshot = gateway.telemetry().snapshot();
    let echo_stats = snapshot.get("echo").expect("echo telemetry recorded");
    assert_eq!(echo_stats.successes, 1);
}
