//! End-to-end delivery flows against a mock endpoint.

mod common;

use common::{gateway, rule_for};
use fluxgate::domain::models::{
    ErrorCategory, Event, LogStatus, RateLimitPolicy, SourceKind, TriggerType,
};
use fluxgate::domain::ports::{DlqFilter, DlqRepository, ExecutionLogRepository, RuleRepository};
use serde_json::json;

fn event(n: u32) -> Event {
    Event::new(
        "tenant-100",
        "ORDER_CREATED",
        json!({"orderId": "A1", "total": 99.5}),
        SourceKind::RelationalPoll,
        "orders",
    )
    .with_source_offset(n.to_string())
}

#[tokio::test]
async fn success_writes_log_and_attempt_and_no_dlq() {
    let g = gateway().await;
    let mut server = mockito::Server::new_async().await;
    let hook = server.mock("POST", "/hook").with_status(200).with_body("ok").expect(1).create_async().await;

    let rule = rule_for(format!("{}/hook", server.url()));
    g.rules.create(&rule).await.unwrap();

    let logs = g.executor.deliver(&rule, &event(1), TriggerType::Event).await.unwrap();
    hook.assert_async().await;

    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, LogStatus::Success);
    assert_eq!(logs[0].attempt_count, 1);
    assert_eq!(logs[0].response.as_ref().unwrap().status, 200);

    let attempts = g.logs.attempts_for_log(logs[0].id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, Some(200));

    assert!(g.dlq.list(DlqFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn permanent_failure_goes_straight_to_dlq() {
    let g = gateway().await;
    let mut server = mockito::Server::new_async().await;
    let hook = server.mock("POST", "/hook").with_status(400).expect(1).create_async().await;

    let rule = rule_for(format!("{}/hook", server.url()));
    g.rules.create(&rule).await.unwrap();

    let logs = g.executor.deliver(&rule, &event(1), TriggerType::Event).await.unwrap();
    hook.assert_async().await;

    assert_eq!(logs[0].status, LogStatus::Failed);
    assert!(!logs[0].should_retry);
    assert_eq!(logs[0].error.as_ref().unwrap().category, ErrorCategory::Permanent);

    // One attempt only, one DLQ entry.
    assert_eq!(g.logs.attempts_for_log(logs[0].id).await.unwrap().len(), 1);
    let dlq = g.dlq.list(DlqFilter::default()).await.unwrap();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].log_id, logs[0].id);
    assert_eq!(dlq[0].category, ErrorCategory::Permanent);
    assert!(dlq[0].next_retry_at.is_some());
}

#[tokio::test]
async fn transient_failure_is_marked_retrying() {
    let g = gateway().await;
    let mut server = mockito::Server::new_async().await;
    server.mock("POST", "/hook").with_status(503).expect(1).create_async().await;

    let rule = rule_for(format!("{}/hook", server.url()));
    g.rules.create(&rule).await.unwrap();

    let logs = g.executor.deliver(&rule, &event(1), TriggerType::Event).await.unwrap();
    assert_eq!(logs[0].status, LogStatus::Retrying);
    assert!(logs[0].should_retry);
    assert_eq!(logs[0].error.as_ref().unwrap().category, ErrorCategory::Transient);

    // Not terminal yet: no DLQ entry.
    assert!(g.dlq.list(DlqFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn circuit_opens_after_threshold_and_skips() {
    let g = gateway().await;
    let mut server = mockito::Server::new_async().await;
    let hook = server.mock("POST", "/hook").with_status(503).expect(5).create_async().await;

    let mut rule = rule_for(format!("{}/hook", server.url()));
    rule.circuit_breaker = fluxgate::domain::models::CircuitBreakerPolicy {
        threshold: 5,
        open_ms: 60_000,
    };
    g.rules.create(&rule).await.unwrap();

    for n in 0..5 {
        let logs = g.executor.deliver(&rule, &event(n), TriggerType::Event).await.unwrap();
        assert_eq!(logs[0].status, LogStatus::Retrying);
    }

    // Sixth delivery is short-circuited without an HTTP call.
    let logs = g.executor.deliver(&rule, &event(6), TriggerType::Event).await.unwrap();
    assert_eq!(logs[0].status, LogStatus::Skipped);
    assert_eq!(logs[0].error.as_ref().unwrap().category, ErrorCategory::CircuitOpen);
    assert!(g.logs.attempts_for_log(logs[0].id).await.unwrap().is_empty());

    // Exactly five requests reached the endpoint.
    hook.assert_async().await;
}

#[tokio::test]
async fn rate_limited_rule_defers_without_burning_an_attempt() {
    let g = gateway().await;
    let mut server = mockito::Server::new_async().await;
    let hook = server.mock("POST", "/hook").with_status(200).expect(1).create_async().await;

    let mut rule = rule_for(format!("{}/hook", server.url()));
    rule.rate_limit = Some(RateLimitPolicy { capacity: 1, window_seconds: 60 });
    g.rules.create(&rule).await.unwrap();

    let logs = g.executor.deliver(&rule, &event(1), TriggerType::Event).await.unwrap();
    assert_eq!(logs[0].status, LogStatus::Success);

    // Bucket exhausted: the second delivery defers.
    let logs = g.executor.deliver(&rule, &event(2), TriggerType::Event).await.unwrap();
    assert_eq!(logs[0].status, LogStatus::Retrying);
    assert!(logs[0].should_retry);
    assert_eq!(logs[0].error.as_ref().unwrap().category, ErrorCategory::RateLimited);
    assert_eq!(logs[0].attempt_count, 0);

    hook.assert_async().await;
}

#[tokio::test]
async fn dedup_blocks_second_delivery_of_same_event() {
    let g = gateway().await;

    let e = event(7);
    let first = g.dedup.check_and_record(&e).await.unwrap();
    assert!(matches!(first, fluxgate::services::DedupOutcome::Fresh { .. }));

    let second = g.dedup.check_and_record(&e).await.unwrap();
    assert!(matches!(second, fluxgate::services::DedupOutcome::Duplicate { .. }));
}
