//! Batched processing pipeline: extraction -> adaptation -> validation.
//!
//! Items are independent: one failure never cancels peers, a batch of N
//! inputs always produces N results in input order, and in-flight work is
//! bounded by a semaphore. Per-item deadlines and shutdown cancellation
//! both resolve to failed results rather than errors.

use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore, watch};

use super::extractor::LlmExtractor;
use super::models::{PipelineInput, PipelineMetrics, PipelineResult};
use super::validation::Validator;
use crate::config::ProcessingConfig;
use crate::services::adapters::{MaricopaAdapter, PhoenixMlsAdapter, PropertyAdapter};
use crate::services::supervisor::ErrorSupervisor;
use crate::utils::{ErrorKind, IngestError};

#[derive(Default)]
struct MetricsInner {
    total_processed: u64,
    successful: u64,
    failed: u64,
    total_time_ms: u64,
    confidence_sum: f64,
    confidence_count: u64,
}

pub struct ProcessingPipeline {
    extractor: Arc<LlmExtractor>,
    maricopa_adapter: MaricopaAdapter,
    phoenix_mls_adapter: PhoenixMlsAdapter,
    supervisor: Arc<ErrorSupervisor>,
    config: ProcessingConfig,
    /// Caps in-flight items across all batches
    permits: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
    metrics: Mutex<MetricsInner>,
}

impl ProcessingPipeline {
    pub fn new(
        extractor: Arc<LlmExtractor>,
        maricopa_adapter: MaricopaAdapter,
        phoenix_mls_adapter: PhoenixMlsAdapter,
        supervisor: Arc<ErrorSupervisor>,
        config: ProcessingConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            extractor,
            maricopa_adapter,
            phoenix_mls_adapter,
            supervisor,
            config,
            permits,
            shutdown,
            metrics: Mutex::new(MetricsInner::default()),
        }
    }

    pub async fn process_html(&self, html: String, source_tag: &str) -> PipelineResult {
        self.process_one(PipelineInput::Html(html), source_tag).await
    }

    pub async fn process_json(&self, record: Value, source_tag: &str) -> PipelineResult {
        self.process_one(PipelineInput::Json(record), source_tag).await
    }

    /// Process a batch; the result vector corresponds one-to-one with the
    /// inputs.
    pub async fn process_batch(
        self: &Arc<Self>,
        items: Vec<PipelineInput>,
        source_tag: &str,
    ) -> Vec<PipelineResult> {
        let mut results = Vec::with_capacity(items.len());

        for chunk in items.chunks(self.config.batch_size.max(1)) {
            let handles: Vec<_> = chunk
                .iter()
                .cloned()
                .map(|item| {
                    let pipeline = Arc::clone(self);
                    let source_tag = source_tag.to_string();
                    tokio::spawn(async move { pipeline.process_one(item, &source_tag).await })
                })
                .collect();

            for handle in handles {
                results.push(handle.await.unwrap_or_else(|join_error| {
                    PipelineResult::failed(
                        ErrorKind::Internal,
                        format!("pipeline task failed: {join_error}"),
                        0,
                    )
                }));
            }
        }

        results
    }

    async fn process_one(&self, item: PipelineInput, source_tag: &str) -> PipelineResult {
        let started = Instant::now();

        if *self.shutdown.borrow() {
            let result = PipelineResult::failed(ErrorKind::Internal, "cancelled", 0);
            self.record(&result).await;
            return result;
        }

        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return PipelineResult::failed(ErrorKind::Internal, "pipeline closed", 0);
            }
        };

        let mut shutdown = self.shutdown.clone();
        let deadline = self.config.item_timeout();

        let result = tokio::select! {
            outcome = tokio::time::timeout(deadline, self.run_item(item, source_tag)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => PipelineResult::failed(
                        ErrorKind::Timeout,
                        "timeout",
                        started.elapsed().as_millis() as u64,
                    ),
                }
            }
            _ = shutdown.changed() => PipelineResult::failed(
                ErrorKind::Internal,
                "cancelled",
                started.elapsed().as_millis() as u64,
            ),
        };
        drop(permit);

        let mut result = result;
        result.processing_time_ms = started.elapsed().as_millis() as u64;
        self.record(&result).await;
        result
    }

    async fn run_item(&self, item: PipelineInput, source_tag: &str) -> PipelineResult {
        let correlation_id = uuid::Uuid::new_v4().to_string();

        let (property, extraction_method) = match item {
            PipelineInput::Json(record) => {
                let adapted = self
                    .supervisor
                    .run(
                        "adapter",
                        "pipeline",
                        &correlation_id,
                        Some(record.clone()),
                        || async { self.maricopa_adapter.adapt(&record) },
                    )
                    .await;
                match adapted {
                    Ok(property) => (property, None),
                    Err(e) => return failed_from(e),
                }
            }
            PipelineInput::Html(html) => {
                let extracted = self
                    .supervisor
                    .run("llm", "pipeline", &correlation_id, None, || async {
                        self.extractor.extract(&html, source_tag).await
                    })
                    .await;

                let extraction = match extracted {
                    Ok(extraction) => extraction,
                    Err(e) => {
                        // Last resort: salvage a partial record from the
                        // raw HTML before the item is declared dead.
                        match self.supervisor.synthesize_fallback(&e, Some(&html), source_tag) {
                            Some(salvaged) => salvaged,
                            None => return failed_from(e),
                        }
                    }
                };

                let method = extraction.method;
                match self
                    .phoenix_mls_adapter
                    .adapt_with_confidence(&extraction.fields, extraction.confidence)
                {
                    Ok(property) => (property, Some(method)),
                    Err(e) => return failed_from(e),
                }
            }
        };

        let validation = Validator::validate(&property);
        PipelineResult {
            is_valid: validation.is_valid,
            error: (!validation.is_valid).then(|| validation.errors.join("; ")),
            error_kind: (!validation.is_valid).then_some(ErrorKind::Validation),
            property: Some(property),
            validation: Some(validation),
            extraction_method,
            processing_time_ms: 0,
        }
    }

    async fn record(&self, result: &PipelineResult) {
        let mut metrics = self.metrics.lock().await;
        metrics.total_processed += 1;
        metrics.total_time_ms += result.processing_time_ms;
        if result.is_valid {
            metrics.successful += 1;
        } else {
            metrics.failed += 1;
        }
        if let Some(validation) = &result.validation {
            metrics.confidence_sum += validation.confidence_score;
            metrics.confidence_count += 1;
        }

        metrics::counter!("pipeline_items_total", 1,
            "outcome" => if result.is_valid { "ok" } else { "failed" });
        metrics::histogram!(
            "pipeline_item_duration_ms",
            result.processing_time_ms as f64
        );
    }

    /// Read-only metrics snapshot, computed on request.
    pub async fn metrics(&self) -> PipelineMetrics {
        let metrics = self.metrics.lock().await;
        PipelineMetrics {
            total_processed: metrics.total_processed,
            successful: metrics.successful,
            failed: metrics.failed,
            success_rate: if metrics.total_processed == 0 {
                0.0
            } else {
                metrics.successful as f64 / metrics.total_processed as f64
            },
            average_processing_time_ms: if metrics.total_processed == 0 {
                0.0
            } else {
                metrics.total_time_ms as f64 / metrics.total_processed as f64
            },
            average_confidence: if metrics.confidence_count == 0 {
                0.0
            } else {
                metrics.confidence_sum / metrics.confidence_count as f64
            },
        }
    }
}

fn failed_from(error: IngestError) -> PipelineResult {
    PipelineResult::failed(error.kind(), error.to_string(), 0)
}
