//! Supervisor tests: retry policy shape, breaker transitions, DLQ
//! round-trips, and the run() orchestration.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::common::create_test_db;
use crate::services::supervisor::{
    BreakerState, CircuitBreaker, CircuitBreakerConfig, DeadLetterQueue, ErrorSupervisor,
    RetryPolicy,
};
use crate::utils::{ErrorKind, IngestError};

#[test]
fn non_retryable_kinds_get_no_delay() {
    let policy = RetryPolicy::default();

    for error in [
        IngestError::auth("bad key"),
        IngestError::permission("forbidden"),
        IngestError::not_found("gone"),
        IngestError::validation("bad zip"),
        IngestError::internal("bug"),
        IngestError::parsing("bad json"),
        IngestError::extraction("no fields"),
    ] {
        assert_eq!(policy.delay_for(&error, 1), None, "{:?}", error.kind());
        assert!(!policy.is_retryable(&error));
    }
}

#[test]
fn retryable_kinds_follow_delay_tables() {
    let policy = RetryPolicy::new(4);

    let network = IngestError::network("connection reset");
    let first = policy.delay_for(&network, 1).expect("first retry");
    assert!(first >= Duration::from_secs(1) && first < Duration::from_secs(2));
    let second = policy.delay_for(&network, 2).expect("second retry");
    assert!(second >= Duration::from_secs(2) && second < Duration::from_secs(3));

    let timeout = IngestError::timeout("slow upstream");
    let first = policy.delay_for(&timeout, 1).expect("first retry");
    assert!(first >= Duration::from_secs(2) && first < Duration::from_secs(3));

    // Attempt budget exhausted.
    assert_eq!(policy.delay_for(&network, 4), None);
}

#[test]
fn rate_limit_honors_upstream_hint() {
    let policy = RetryPolicy::default();
    let hinted = IngestError::rate_limit("slow down", Some(Duration::from_secs(42)));

    let delay = policy.delay_for(&hinted, 1).expect("retryable");
    assert!(delay >= Duration::from_secs(42) && delay < Duration::from_secs(51));

    let unhinted = IngestError::rate_limit("slow down", None);
    let delay = policy.delay_for(&unhinted, 1).expect("retryable");
    assert!(delay >= Duration::from_secs(5) && delay < Duration::from_secs(7));
}

#[test]
fn breaker_walks_closed_open_half_open_closed() {
    let breaker = CircuitBreaker::new(
        "assessor_api",
        CircuitBreakerConfig {
            failure_threshold: 2,
            window: Duration::from_secs(60),
            cooldown: Duration::from_millis(50),
            max_cooldown: Duration::from_secs(10),
        },
    );

    assert_eq!(breaker.state(), BreakerState::Closed);
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Closed, "one failure under threshold");
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);

    let err = breaker.try_acquire().expect_err("open rejects");
    assert_eq!(err.kind(), ErrorKind::RateLimit);

    std::thread::sleep(Duration::from_millis(70));
    assert!(breaker.try_acquire().is_ok(), "cooldown expiry admits one probe");
    assert_eq!(breaker.state(), BreakerState::HalfOpen);
    assert!(breaker.try_acquire().is_err(), "second probe rejected");

    breaker.record_success();
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert!(breaker.try_acquire().is_ok());
}

#[test]
fn failed_probe_reopens_with_grown_cooldown() {
    let breaker = CircuitBreaker::new(
        "llm",
        CircuitBreakerConfig {
            failure_threshold: 1,
            window: Duration::from_secs(60),
            cooldown: Duration::from_millis(40),
            max_cooldown: Duration::from_secs(10),
        },
    );

    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);

    std::thread::sleep(Duration::from_millis(60));
    assert!(breaker.try_acquire().is_ok());
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open, "failed probe re-opens");

    // The grown cooldown (80ms) is not over after the original 40ms.
    std::thread::sleep(Duration::from_millis(50));
    assert!(breaker.try_acquire().is_err(), "cooldown doubled after failed probe");
}

#[tokio::test]
async fn dead_letter_queue_round_trips() {
    let pool = create_test_db().await;
    let dlq = DeadLetterQueue::new(pool);

    let error = IngestError::validation("missing zipcode");
    let id = dlq
        .enqueue(
            "pipeline",
            "corr-1",
            &error,
            Some(json!({"street": "1 Main St", "api_key": "should-not-survive"})),
            3,
            Utc::now() - ChronoDuration::minutes(5),
        )
        .await
        .expect("enqueue");

    let items = dlq.list(None).await.expect("list");
    assert_eq!(items.len(), 1);
    let item = &items[0];
    assert_eq!(item.id, id);
    assert_eq!(item.component, "pipeline");
    assert_eq!(item.error_kind, ErrorKind::Validation);
    assert_eq!(item.attempts, 3);
    assert!(!item.requeued);

    // Credentials never reach the DLQ.
    let payload = item.payload.as_ref().expect("payload kept");
    assert_eq!(payload["api_key"], "[REDACTED]");
    assert_eq!(payload["street"], "1 Main St");

    let requeued = dlq.requeue(&id).await.expect("requeue").expect("item found");
    assert!(requeued.requeued);
    assert!(dlq.requeue(&id).await.expect("requeue").is_none(), "second requeue is a no-op");
    assert!(dlq.requeue("nonexistent").await.expect("requeue").is_none());
}

#[tokio::test]
async fn dead_letter_purge_drops_old_items() {
    let pool = create_test_db().await;
    let dlq = DeadLetterQueue::new(pool);

    dlq.enqueue("pipeline", "corr-1", &IngestError::validation("old"), None, 1, Utc::now())
        .await
        .expect("enqueue");

    let purged = dlq.purge(Utc::now() - ChronoDuration::days(1)).await.expect("purge");
    assert_eq!(purged, 0, "fresh items survive");

    let purged = dlq.purge(Utc::now() + ChronoDuration::days(1)).await.expect("purge");
    assert_eq!(purged, 1);
    assert!(dlq.list(None).await.expect("list").is_empty());
}

async fn supervisor() -> ErrorSupervisor {
    let pool = create_test_db().await;
    ErrorSupervisor::new(
        RetryPolicy::new(3),
        CircuitBreakerConfig::default(),
        DeadLetterQueue::new(pool),
    )
}

#[tokio::test]
async fn run_retries_transients_until_success() {
    let supervisor = supervisor().await;
    let attempts = AtomicUsize::new(0);

    let result = supervisor
        .run("test_resource", "test", "corr-1", None, || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 1 {
                Err(IngestError::network("flaky"))
            } else {
                Ok("done")
            }
        })
        .await
        .expect("eventually succeeds");

    assert_eq!(result, "done");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(supervisor.dead_letters().list(None).await.expect("list").is_empty());
}

#[tokio::test]
async fn run_dead_letters_non_retryable_failures() {
    let supervisor = supervisor().await;
    let attempts = AtomicUsize::new(0);

    let err = supervisor
        .run(
            "test_resource",
            "test",
            "corr-2",
            Some(json!({"zip": "bad"})),
            || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(IngestError::validation("broken record"))
            },
        )
        .await
        .expect_err("fails");

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(attempts.load(Ordering::SeqCst), 1, "no retry for validation errors");

    let items = supervisor.dead_letters().list(None).await.expect("list");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].correlation_id, "corr-2");
}

#[tokio::test]
async fn synthesize_fallback_salvages_parsing_failures() {
    let supervisor = supervisor().await;

    let salvaged = supervisor
        .synthesize_fallback(
            &IngestError::extraction("llm gibberish"),
            Some("789 Oak Street, Phoenix, AZ 85033 $425,000"),
            "phoenix_mls",
        )
        .expect("salvageable");
    assert_eq!(salvaged.method, crate::services::ExtractionMethod::Fallback);
    assert!(salvaged.confidence <= 0.5);

    assert!(
        supervisor
            .synthesize_fallback(&IngestError::network("down"), Some("text"), "phoenix_mls")
            .is_none(),
        "only extraction/parsing failures synthesize"
    );
    assert!(
        supervisor
            .synthesize_fallback(&IngestError::extraction("x"), None, "phoenix_mls")
            .is_none(),
        "raw text required"
    );
}

#[test]
fn breakers_are_shared_per_resource() {
    let supervisor = futures_block_on_supervisor();
    let a = supervisor.breaker("llm");
    let b = supervisor.breaker("llm");
    let other = supervisor.breaker("assessor_api");

    assert!(Arc::ptr_eq(&a, &b), "same registry entry");
    assert!(!Arc::ptr_eq(&a, &other));
    assert_eq!(other.state(), BreakerState::Closed);
}

// Breaker registry needs no database; build the supervisor with a lazy
// pool on the current thread.
fn futures_block_on_supervisor() -> ErrorSupervisor {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    runtime.block_on(async {
        ErrorSupervisor::new(
            RetryPolicy::default(),
            CircuitBreakerConfig::default(),
            DeadLetterQueue::new(create_test_db().await),
        )
    })
}
