//! MLS scraping collection strategy.
//!
//! Listing fragments come out of the anti-bot scraper and go through the
//! pipeline's HTML path (extraction + adaptation + validation).

use async_trait::async_trait;
use std::sync::Arc;

use super::{Collector, store_results};
use crate::models::{CollectionRunMetrics, Property};
use crate::services::processing::{PipelineInput, ProcessingPipeline};
use crate::services::rate_limiter::RateLimiter;
use crate::services::repository::PropertyRepository;
use crate::services::scraper::{PHOENIX_MLS_SOURCE, PhoenixMlsScraper};
use crate::services::supervisor::ErrorSupervisor;
use crate::utils::IngestError;

pub struct PhoenixMlsCollector {
    scraper: Arc<PhoenixMlsScraper>,
    pipeline: Arc<ProcessingPipeline>,
    repository: Arc<PropertyRepository>,
    supervisor: Arc<ErrorSupervisor>,
    rate_limiter: Arc<RateLimiter>,
}

impl PhoenixMlsCollector {
    pub fn new(
        scraper: Arc<PhoenixMlsScraper>,
        pipeline: Arc<ProcessingPipeline>,
        repository: Arc<PropertyRepository>,
        supervisor: Arc<ErrorSupervisor>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self { scraper, pipeline, repository, supervisor, rate_limiter }
    }
}

#[async_trait]
impl Collector for PhoenixMlsCollector {
    fn source_name(&self) -> &'static str {
        PHOENIX_MLS_SOURCE
    }

    async fn collect_zipcode(
        &self,
        zipcode: &str,
        metrics: &mut CollectionRunMetrics,
    ) -> Result<(), IngestError> {
        let correlation_id = format!("{PHOENIX_MLS_SOURCE}:{zipcode}");
        let hits_before = self.rate_limiter.total_hits(PHOENIX_MLS_SOURCE);
        // The scraper does its own per-fetch recovery; the supervisor layer
        // on top retries whole-search transients and dead-letters the rest.
        let listings = self
            .supervisor
            .run("phoenix_mls", "phoenix_mls_collector", &correlation_id, None, || async {
                self.scraper.search_zipcode(zipcode).await
            })
            .await?;
        metrics.requests_made += 1;
        metrics.rate_limit_hits +=
            self.rate_limiter.total_hits(PHOENIX_MLS_SOURCE).saturating_sub(hits_before);

        if listings.is_empty() {
            tracing::info!(zipcode, "no MLS listings found");
            return Ok(());
        }

        let batch: Vec<PipelineInput> = listings.into_iter().map(PipelineInput::Html).collect();
        let results = self.pipeline.process_batch(batch, PHOENIX_MLS_SOURCE).await;
        store_results(
            results,
            "phoenix_mls_collector",
            &self.repository,
            &self.supervisor,
            metrics,
            zipcode,
        )
        .await
    }

    async fn collect_detail(&self, url: &str) -> Result<Option<Property>, IngestError> {
        let html = match self.scraper.fetch_detail(url).await {
            Ok(html) => html,
            Err(IngestError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let result = self.pipeline.process_html(html, PHOENIX_MLS_SOURCE).await;
        match result.property {
            Some(property) if result.is_valid => {
                self.repository.upsert(&property).await?;
                Ok(Some(property))
            }
            _ => Err(IngestError::validation(
                result.error.unwrap_or_else(|| "listing failed processing".to_string()),
            )),
        }
    }
}
