//! Per-resource circuit breaker.
//!
//! closed -> open on N consecutive failures within the window; open ->
//! half_open after the cooldown, admitting a single probe; probe success
//! closes, probe failure re-opens with exponentially grown cooldown.
//! An open breaker rejects without upstream contact, surfacing a
//! rate-limit-category "service unavailable" error.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::utils::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures within `window` that trip the breaker
    pub failure_threshold: u32,
    /// Failures older than this no longer count as consecutive
    pub window: Duration,
    pub cooldown: Duration,
    /// Ceiling for the exponential cooldown growth
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    first_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    current_cooldown: Duration,
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let current_cooldown = config.cooldown;
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                first_failure_at: None,
                opened_at: None,
                current_cooldown,
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock").state
    }

    /// Gate a call. `Ok` admits it (and reserves the probe slot when
    /// half-open); `Err` means the resource is shorted out.
    pub fn try_acquire(&self) -> Result<(), IngestError> {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed =
                    inner.opened_at.map(|at| at.elapsed()).unwrap_or(Duration::ZERO);
                if elapsed >= inner.current_cooldown {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    tracing::info!(breaker = %self.name, "cooldown expired, admitting probe");
                    Ok(())
                } else {
                    Err(self.open_error(inner.current_cooldown - elapsed))
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(self.open_error(Duration::ZERO))
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        if inner.state != BreakerState::Closed {
            tracing::info!(breaker = %self.name, "probe succeeded, closing");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.first_failure_at = None;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        inner.current_cooldown = self.config.cooldown;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        let now = Instant::now();

        match inner.state {
            BreakerState::HalfOpen => {
                // Probe failed: re-open and grow the cooldown.
                inner.current_cooldown =
                    (inner.current_cooldown * 2).min(self.config.max_cooldown);
                self.open(&mut inner, now);
                return;
            }
            BreakerState::Open => return,
            BreakerState::Closed => {}
        }

        // Failures only count as consecutive within the window.
        match inner.first_failure_at {
            Some(first) if now.duration_since(first) <= self.config.window => {
                inner.consecutive_failures += 1;
            }
            _ => {
                inner.first_failure_at = Some(now);
                inner.consecutive_failures = 1;
            }
        }

        if inner.consecutive_failures >= self.config.failure_threshold {
            self.open(&mut inner, now);
        }
    }

    fn open(&self, inner: &mut BreakerInner, now: Instant) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(now);
        inner.probe_in_flight = false;
        inner.consecutive_failures = 0;
        inner.first_failure_at = None;
        metrics::counter!("circuit_breaker_trips_total", 1, "resource" => self.name.clone());
        tracing::warn!(
            breaker = %self.name,
            cooldown_seconds = inner.current_cooldown.as_secs(),
            "circuit breaker opened"
        );
    }

    fn open_error(&self, remaining: Duration) -> IngestError {
        IngestError::rate_limit(
            format!("{} unavailable: circuit breaker open", self.name),
            (!remaining.is_zero()).then_some(remaining),
        )
    }
}
