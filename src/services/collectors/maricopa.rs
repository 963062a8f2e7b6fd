//! Assessor API collection strategy.
//!
//! Pages through `search_by_zipcode` until exhaustion; each page's records
//! go through the pipeline as a batch and successes are upserted.

use async_trait::async_trait;
use std::sync::Arc;

use super::{Collector, store_results};
use crate::models::{CollectionRunMetrics, Property};
use crate::services::processing::{PipelineInput, ProcessingPipeline};
use crate::services::rate_limiter::RateLimiter;
use crate::services::repository::PropertyRepository;
use crate::services::sources::{MARICOPA_SOURCE, MaricopaClient};
use crate::services::supervisor::ErrorSupervisor;
use crate::utils::IngestError;

pub struct MaricopaCollector {
    client: Arc<MaricopaClient>,
    pipeline: Arc<ProcessingPipeline>,
    repository: Arc<PropertyRepository>,
    supervisor: Arc<ErrorSupervisor>,
    rate_limiter: Arc<RateLimiter>,
}

impl MaricopaCollector {
    pub fn new(
        client: Arc<MaricopaClient>,
        pipeline: Arc<ProcessingPipeline>,
        repository: Arc<PropertyRepository>,
        supervisor: Arc<ErrorSupervisor>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self { client, pipeline, repository, supervisor, rate_limiter }
    }

    /// Sweep sales recorded in the last `days_back` days across the metro
    /// and fold them into the store. Runs independently of the ZIP list;
    /// recorded as its own collection run.
    pub async fn collect_recent_sales(
        &self,
        days_back: u32,
    ) -> Result<CollectionRunMetrics, IngestError> {
        let mut metrics = CollectionRunMetrics::start(MARICOPA_SOURCE, Vec::new());
        let correlation_id = format!("{MARICOPA_SOURCE}:recent_sales:{days_back}");
        let hits_before = self.rate_limiter.total_hits(MARICOPA_SOURCE);

        let records = self
            .supervisor
            .run("assessor_api", "maricopa_collector", &correlation_id, None, || async {
                self.client.get_recent_sales(days_back).await
            })
            .await?;
        metrics.requests_made += 1;

        let batch: Vec<PipelineInput> = records.into_iter().map(PipelineInput::Json).collect();
        let results = self.pipeline.process_batch(batch, MARICOPA_SOURCE).await;

        for result in results {
            metrics.properties_collected += 1;
            match (&result.property, result.is_valid) {
                (Some(property), true) => {
                    *metrics.by_zipcode.entry(property.address.zipcode.clone()).or_default() += 1;
                    self.repository.upsert(property).await?;
                    metrics.properties_stored += 1;
                }
                _ => {
                    let error = IngestError::validation(
                        result
                            .error
                            .unwrap_or_else(|| "sale record failed processing".to_string()),
                    );
                    self.supervisor
                        .dead_letters()
                        .enqueue(
                            "maricopa_collector",
                            &correlation_id,
                            &error,
                            result.property.as_ref().and_then(|p| serde_json::to_value(p).ok()),
                            1,
                            chrono::Utc::now(),
                        )
                        .await?;
                    metrics.dead_lettered += 1;
                }
            }
        }

        metrics.rate_limit_hits +=
            self.rate_limiter.total_hits(MARICOPA_SOURCE).saturating_sub(hits_before);
        metrics.finished_at = Some(chrono::Utc::now());
        self.repository.record_collection_run(&metrics).await?;
        tracing::info!(
            days_back,
            collected = metrics.properties_collected,
            stored = metrics.properties_stored,
            "recent-sales sweep finished"
        );
        Ok(metrics)
    }
}

#[async_trait]
impl Collector for MaricopaCollector {
    fn source_name(&self) -> &'static str {
        MARICOPA_SOURCE
    }

    async fn collect_zipcode(
        &self,
        zipcode: &str,
        metrics: &mut CollectionRunMetrics,
    ) -> Result<(), IngestError> {
        let mut page = 1u32;
        let hits_before = self.rate_limiter.total_hits(MARICOPA_SOURCE);

        loop {
            let correlation_id = format!("{MARICOPA_SOURCE}:{zipcode}:p{page}");
            let records = self
                .supervisor
                .run("assessor_api", "maricopa_collector", &correlation_id, None, || async {
                    self.client.search_by_zipcode(zipcode, Some(page)).await
                })
                .await?;
            metrics.requests_made += 1;

            if records.is_empty() {
                break;
            }

            let batch: Vec<PipelineInput> =
                records.into_iter().map(PipelineInput::Json).collect();
            let results = self.pipeline.process_batch(batch, MARICOPA_SOURCE).await;
            store_results(
                results,
                "maricopa_collector",
                &self.repository,
                &self.supervisor,
                metrics,
                zipcode,
            )
            .await?;

            page += 1;
        }

        metrics.rate_limit_hits +=
            self.rate_limiter.total_hits(MARICOPA_SOURCE).saturating_sub(hits_before);
        Ok(())
    }

    async fn collect_detail(&self, apn: &str) -> Result<Option<Property>, IngestError> {
        let correlation_id = format!("{MARICOPA_SOURCE}:apn:{apn}");
        let raw = self
            .supervisor
            .run("assessor_api", "maricopa_collector", &correlation_id, None, || async {
                self.client.get_property_details(apn).await
            })
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let result = self.pipeline.process_json(raw, MARICOPA_SOURCE).await;
        match result.property {
            Some(property) if result.is_valid => {
                self.repository.upsert(&property).await?;
                Ok(Some(property))
            }
            _ => Err(IngestError::validation(
                result.error.unwrap_or_else(|| "detail record failed processing".to_string()),
            )),
        }
    }
}
