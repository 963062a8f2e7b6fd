//! Cross-cutting error supervision.
//!
//! The supervisor owns no application state. It is a library of policies
//! (the typed retry table, a circuit-breaker registry keyed by resource
//! name, the dead-letter queue handle, and the fallback-synthesis rule)
//! passed by reference to every component that needs one.

mod circuit_breaker;
mod dead_letter;
mod retry;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use dead_letter::{DeadLetterItem, DeadLetterQueue};
pub use retry::RetryPolicy;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::services::processing::models::{ExtractionMethod, ExtractionResult};
use crate::utils::{ErrorKind, IngestError};

pub struct ErrorSupervisor {
    retry_policy: RetryPolicy,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    breaker_config: CircuitBreakerConfig,
    dlq: DeadLetterQueue,
}

impl ErrorSupervisor {
    pub fn new(
        retry_policy: RetryPolicy,
        breaker_config: CircuitBreakerConfig,
        dlq: DeadLetterQueue,
    ) -> Self {
        Self { retry_policy, breakers: DashMap::new(), breaker_config, dlq }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.dlq
    }

    /// Breaker for a logical resource ("llm", "assessor_api", ...);
    /// created on first use.
    pub fn breaker(&self, resource: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(resource.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(resource, self.breaker_config.clone()))
            })
            .clone()
    }

    /// Run `op` under the retry policy and the resource's circuit breaker.
    /// Exhausted or non-retryable failures are dead-lettered with the
    /// given payload before the error is returned.
    pub async fn run<T, F, Fut>(
        &self,
        resource: &str,
        component: &str,
        correlation_id: &str,
        payload: Option<Value>,
        op: F,
    ) -> Result<T, IngestError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, IngestError>>,
    {
        let breaker = self.breaker(resource);
        let first_attempt_at = Utc::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let outcome = match breaker.try_acquire() {
                Ok(()) => {
                    let result = op().await;
                    match &result {
                        Ok(_) => breaker.record_success(),
                        // Only infrastructure failures count against the
                        // resource; a validation or parsing error means it
                        // answered.
                        Err(e) if e.is_retryable() => breaker.record_failure(),
                        Err(_) => breaker.record_success(),
                    }
                    result
                }
                // Breaker-open: no upstream contact, no breaker bookkeeping.
                Err(open) => Err(open),
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match self.retry_policy.delay_for(&error, attempts) {
                Some(delay) => {
                    tracing::debug!(
                        resource,
                        component,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        kind = error.kind().as_str(),
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    self.dlq
                        .enqueue(component, correlation_id, &error, payload, attempts, first_attempt_at)
                        .await
                        .unwrap_or_else(|dlq_error| {
                            tracing::error!(component, error = %dlq_error,
                                "failed to dead-letter item");
                            String::new()
                        });
                    return Err(error);
                }
            }
        }
    }

    /// Fallback synthesis: when an item failed with `extraction` or
    /// `parsing` and the raw text is available, salvage a partial result
    /// via regex extraction at reduced confidence.
    pub fn synthesize_fallback(
        &self,
        error: &IngestError,
        raw_text: Option<&str>,
        source_tag: &str,
    ) -> Option<ExtractionResult> {
        if !matches!(error.kind(), ErrorKind::Extraction | ErrorKind::Parsing) {
            return None;
        }
        let fields = super::processing::extractor::fallback_extract(raw_text?)?;
        let confidence = (0.25 + 0.05 * fields.len() as f64).min(0.5);
        tracing::info!(source_tag, "synthesized fallback extraction for failed item");
        Some(ExtractionResult {
            fields: Value::Object(fields),
            method: ExtractionMethod::Fallback,
            confidence,
            source_tag: source_tag.to_string(),
        })
    }
}
