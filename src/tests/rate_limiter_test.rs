//! Rate limiter tests: sliding-window admission, safety margin, observer
//! delivery, and the degenerate zero-limit configuration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::services::rate_limiter::{RateLimitObserver, RateLimiter};

#[test]
fn effective_limit_applies_safety_margin() {
    let limiter = RateLimiter::new(1000, 0.10, Duration::from_secs(60));
    assert_eq!(limiter.effective_limit(), 900);

    let limiter = RateLimiter::new(5, 0.0, Duration::from_secs(60));
    assert_eq!(limiter.effective_limit(), 5);
}

#[tokio::test]
async fn admits_up_to_limit_then_returns_wait() {
    // requests_per_window=5, safety_margin=0, window=60s
    let limiter = RateLimiter::new(5, 0.0, Duration::from_secs(60));

    for call in 1..=5 {
        let wait = limiter.wait_if_needed("test_source");
        assert!(wait.is_zero(), "call {call} should be admitted");
    }

    let wait = limiter.wait_if_needed("test_source");
    assert!(!wait.is_zero(), "sixth call must wait");
    assert!(wait <= Duration::from_secs(60), "wait bounded by the window");
}

#[tokio::test]
async fn window_slides_and_admits_again() {
    let limiter = RateLimiter::new(2, 0.0, Duration::from_millis(100));

    assert!(limiter.wait_if_needed("src").is_zero());
    assert!(limiter.wait_if_needed("src").is_zero());
    let wait = limiter.wait_if_needed("src");
    assert!(!wait.is_zero());

    tokio::time::sleep(wait + Duration::from_millis(10)).await;
    assert!(limiter.wait_if_needed("src").is_zero(), "slot freed after the window slid");
}

#[tokio::test]
async fn sources_are_isolated() {
    let limiter = RateLimiter::new(1, 0.0, Duration::from_secs(60));

    assert!(limiter.wait_if_needed("source_a").is_zero());
    assert!(!limiter.wait_if_needed("source_a").is_zero());
    // A different source has its own window.
    assert!(limiter.wait_if_needed("source_b").is_zero());
}

#[tokio::test]
async fn degenerate_zero_limit_always_waits() {
    let limiter = RateLimiter::new(0, 0.0, Duration::from_secs(60));
    assert_eq!(limiter.effective_limit(), 0);

    for _ in 0..3 {
        let wait = limiter.wait_if_needed("src");
        assert!(wait >= Duration::from_secs(60));
    }
}

#[tokio::test]
async fn usage_snapshot_reflects_admissions() {
    let limiter = RateLimiter::new(10, 0.0, Duration::from_secs(60));
    limiter.wait_if_needed("src");
    limiter.wait_if_needed("src");

    let usage = limiter.current_usage("src");
    assert_eq!(usage.current_requests, 2);
    assert_eq!(usage.requests_remaining, 8);
    assert!(!usage.is_rate_limited);
    assert_eq!(usage.next_available_seconds, 0.0);

    let overall = limiter.current_usage_all();
    assert_eq!(overall.total_sources, 1);
    assert_eq!(overall.total_current_requests, 2);
}

#[tokio::test]
async fn reset_clears_history() {
    let limiter = RateLimiter::new(1, 0.0, Duration::from_secs(60));
    assert!(limiter.wait_if_needed("src").is_zero());
    assert!(!limiter.wait_if_needed("src").is_zero());

    limiter.reset("src");
    assert!(limiter.wait_if_needed("src").is_zero(), "admitted again after reset");
}

#[derive(Default)]
struct RecordingObserver {
    requests: AtomicUsize,
    hits: AtomicUsize,
    resets: AtomicUsize,
    events: Mutex<Vec<String>>,
}

#[async_trait]
impl RateLimitObserver for RecordingObserver {
    async fn on_request_made(&self, source: &str, _timestamp: DateTime<Utc>) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.events.lock().await.push(format!("request:{source}"));
    }

    async fn on_rate_limit_hit(&self, source: &str, _wait_time: Duration) {
        self.hits.fetch_add(1, Ordering::SeqCst);
        self.events.lock().await.push(format!("hit:{source}"));
    }

    async fn on_rate_limit_reset(&self, source: &str) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.events.lock().await.push(format!("reset:{source}"));
    }
}

#[tokio::test]
async fn observers_see_events_in_order() {
    let limiter = RateLimiter::new(1, 0.0, Duration::from_secs(60));
    let observer = Arc::new(RecordingObserver::default());
    limiter.add_observer(observer.clone());

    limiter.wait_if_needed("src");
    limiter.wait_if_needed("src");
    limiter.reset("src");

    // Delivery is asynchronous; give the forwarding task a beat.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(observer.requests.load(Ordering::SeqCst), 1);
    assert_eq!(observer.hits.load(Ordering::SeqCst), 1);
    assert_eq!(observer.resets.load(Ordering::SeqCst), 1);

    let events = observer.events.lock().await;
    assert_eq!(*events, vec!["request:src", "hit:src", "reset:src"]);
}

struct PanickingObserver;

#[async_trait]
impl RateLimitObserver for PanickingObserver {
    async fn on_request_made(&self, _source: &str, _timestamp: DateTime<Utc>) {
        panic!("observer bug");
    }

    async fn on_rate_limit_hit(&self, _source: &str, _wait_time: Duration) {}

    async fn on_rate_limit_reset(&self, _source: &str) {}
}

#[tokio::test]
async fn panicking_observer_does_not_affect_admission() {
    let limiter = RateLimiter::new(3, 0.0, Duration::from_secs(60));
    limiter.add_observer(Arc::new(PanickingObserver));
    let healthy = Arc::new(RecordingObserver::default());
    limiter.add_observer(healthy.clone());

    for _ in 0..3 {
        assert!(limiter.wait_if_needed("src").is_zero());
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The healthy observer still saw every admission.
    assert_eq!(healthy.requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn sliding_window_invariant_under_concurrency() {
    let limiter = Arc::new(RateLimiter::new(10, 0.0, Duration::from_secs(60)));

    let handles: Vec<_> = (0..40)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.wait_if_needed("src").is_zero() })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.expect("task join") {
            admitted += 1;
        }
    }

    // Never more admissions than the effective limit within one window.
    assert_eq!(admitted, 10);
}
