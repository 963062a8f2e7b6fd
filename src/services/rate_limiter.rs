//! Sliding-window rate limiter with observer fan-out.
//!
//! Admission is tracked per source tag over the most recent
//! `window_duration`, not calendar buckets. The configured limit is reduced
//! by a safety margin (1000 with 10% margin -> 900 effective). Observers
//! receive events on their own queues: delivery is concurrent across
//! observers, in order per observer, and an observer that stalls or panics
//! never affects admission.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Notifications published by the limiter.
#[async_trait]
pub trait RateLimitObserver: Send + Sync + 'static {
    async fn on_request_made(&self, source: &str, timestamp: DateTime<Utc>);
    async fn on_rate_limit_hit(&self, source: &str, wait_time: Duration);
    async fn on_rate_limit_reset(&self, source: &str);
}

#[derive(Debug, Clone)]
enum RateLimitEvent {
    RequestMade { source: String, timestamp: DateTime<Utc> },
    Hit { source: String, wait_time: Duration },
    Reset { source: String },
}

struct ObserverHandle {
    tx: mpsc::UnboundedSender<RateLimitEvent>,
}

/// Read-only usage snapshot for one source.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceUsage {
    pub source: String,
    pub current_requests: usize,
    pub effective_limit: usize,
    pub requests_remaining: usize,
    pub utilization_percent: f64,
    pub is_rate_limited: bool,
    pub next_available_seconds: f64,
}

/// Usage snapshot across all sources seen so far.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OverallUsage {
    pub total_sources: usize,
    pub total_current_requests: usize,
    pub effective_limit_per_source: usize,
    pub sources: Vec<String>,
}

pub struct RateLimiter {
    effective_limit: usize,
    window: Duration,
    /// Per-source admission timestamps within the window, oldest first.
    state: Mutex<HashMap<String, VecDeque<Instant>>>,
    /// Lifetime hit totals per source, for run reports
    hit_totals: Mutex<HashMap<String, u64>>,
    observers: RwLock<Vec<ObserverHandle>>,
}

impl RateLimiter {
    /// `requests_per_window` reduced by `safety_margin` (clamped to [0, 1))
    /// gives the effective limit. An effective limit of zero makes every
    /// call wait a full window.
    pub fn new(requests_per_window: u32, safety_margin: f64, window: Duration) -> Self {
        let margin = safety_margin.clamp(0.0, 0.999_999);
        let effective_limit = (requests_per_window as f64 * (1.0 - margin)).floor() as usize;

        tracing::info!(
            requests_per_window,
            safety_margin = margin,
            effective_limit,
            window_seconds = window.as_secs(),
            "rate limiter initialized"
        );

        Self {
            effective_limit,
            window,
            state: Mutex::new(HashMap::new()),
            hit_totals: Mutex::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn effective_limit(&self) -> usize {
        self.effective_limit
    }

    /// Register an observer. Events are forwarded through an unbounded
    /// queue drained by a dedicated task, which preserves per-observer
    /// ordering while keeping the admission path synchronous.
    pub fn add_observer(&self, observer: Arc<dyn RateLimitObserver>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<RateLimitEvent>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    RateLimitEvent::RequestMade { source, timestamp } => {
                        observer.on_request_made(&source, timestamp).await;
                    }
                    RateLimitEvent::Hit { source, wait_time } => {
                        observer.on_rate_limit_hit(&source, wait_time).await;
                    }
                    RateLimitEvent::Reset { source } => {
                        observer.on_rate_limit_reset(&source).await;
                    }
                }
            }
        });
        self.observers.write().expect("observer lock").push(ObserverHandle { tx });
    }

    fn publish(&self, event: RateLimitEvent) {
        let observers = self.observers.read().expect("observer lock");
        // A closed channel means the observer task panicked; skip it.
        for handle in observers.iter() {
            let _ = handle.tx.send(event.clone());
        }
    }

    /// Check admission for `source`.
    ///
    /// Returns `Duration::ZERO` and records the request when under the
    /// effective limit; otherwise returns how long until the oldest
    /// in-window timestamp ages out. The caller is responsible for
    /// sleeping; this method never blocks.
    pub fn wait_if_needed(&self, source: &str) -> Duration {
        let now = Instant::now();
        let wait = {
            let mut state = self.state.lock().expect("rate limiter lock");
            let requests = state.entry(source.to_string()).or_default();

            // Expire timestamps that fell out of the sliding window.
            while let Some(front) = requests.front() {
                if now.duration_since(*front) >= self.window {
                    requests.pop_front();
                } else {
                    break;
                }
            }

            if requests.len() < self.effective_limit {
                requests.push_back(now);
                Duration::ZERO
            } else if let Some(oldest) = requests.front() {
                self.window.saturating_sub(now.duration_since(*oldest))
            } else {
                // Degenerate configuration: effective limit of zero.
                self.window
            }
        };

        if wait.is_zero() {
            metrics::counter!("rate_limiter_requests_admitted_total", 1,
                "source" => source.to_string());
            self.publish(RateLimitEvent::RequestMade {
                source: source.to_string(),
                timestamp: Utc::now(),
            });
        } else {
            metrics::counter!("rate_limiter_hits_total", 1, "source" => source.to_string());
            *self
                .hit_totals
                .lock()
                .expect("rate limiter lock")
                .entry(source.to_string())
                .or_default() += 1;
            tracing::debug!(source, wait_seconds = wait.as_secs_f64(), "rate limit hit");
            self.publish(RateLimitEvent::Hit { source: source.to_string(), wait_time: wait });
        }
        wait
    }

    /// Lifetime count of rate-limit hits for a source.
    pub fn total_hits(&self, source: &str) -> u64 {
        self.hit_totals.lock().expect("rate limiter lock").get(source).copied().unwrap_or(0)
    }

    /// Admission gate that also performs the sleep. Loops because another
    /// caller may take the freed slot while we were waiting.
    pub async fn acquire(&self, source: &str) {
        loop {
            let wait = self.wait_if_needed(source);
            if wait.is_zero() {
                return;
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Read-only snapshot for one source.
    pub fn current_usage(&self, source: &str) -> SourceUsage {
        let now = Instant::now();
        let mut state = self.state.lock().expect("rate limiter lock");
        let requests = state.entry(source.to_string()).or_default();
        while let Some(front) = requests.front() {
            if now.duration_since(*front) >= self.window {
                requests.pop_front();
            } else {
                break;
            }
        }

        let current = requests.len();
        let limited = current >= self.effective_limit;
        let next_available = if limited {
            requests
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window)
                .as_secs_f64()
        } else {
            0.0
        };

        SourceUsage {
            source: source.to_string(),
            current_requests: current,
            effective_limit: self.effective_limit,
            requests_remaining: self.effective_limit.saturating_sub(current),
            utilization_percent: if self.effective_limit == 0 {
                100.0
            } else {
                current as f64 / self.effective_limit as f64 * 100.0
            },
            is_rate_limited: limited,
            next_available_seconds: next_available,
        }
    }

    /// Snapshot across every source seen so far.
    pub fn current_usage_all(&self) -> OverallUsage {
        let now = Instant::now();
        let mut state = self.state.lock().expect("rate limiter lock");
        let mut total = 0;
        let mut sources = Vec::with_capacity(state.len());
        for (source, requests) in state.iter_mut() {
            while let Some(front) = requests.front() {
                if now.duration_since(*front) >= self.window {
                    requests.pop_front();
                } else {
                    break;
                }
            }
            total += requests.len();
            sources.push(source.clone());
        }
        sources.sort();

        OverallUsage {
            total_sources: sources.len(),
            total_current_requests: total,
            effective_limit_per_source: self.effective_limit,
            sources,
        }
    }

    /// Drop all history for a source and notify observers.
    pub fn reset(&self, source: &str) {
        self.state.lock().expect("rate limiter lock").remove(source);
        tracing::debug!(source, "rate limit history reset");
        self.publish(RateLimitEvent::Reset { source: source.to_string() });
    }
}
