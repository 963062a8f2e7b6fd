//! Collection strategies.
//!
//! One collector per source, behind a common interface; the runner
//! validates configuration, iterates the configured ZIP codes, aborts a
//! run on fatal error kinds, and rolls finished runs into the daily
//! report. Composition over inheritance: each collector owns its client
//! or scraper plus the shared pipeline and repository handles.

mod maricopa;
mod phoenix_mls;

pub use maricopa::MaricopaCollector;
pub use phoenix_mls::PhoenixMlsCollector;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;

use crate::models::{CollectionRunMetrics, DailyReport, Property};
use crate::services::repository::PropertyRepository;
use crate::services::supervisor::ErrorSupervisor;
use crate::utils::{ErrorKind, IngestError};

/// Strategy interface over the heterogeneous sources.
#[async_trait]
pub trait Collector: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Collect, process, and store everything for one ZIP code,
    /// accumulating counters into `metrics`.
    async fn collect_zipcode(
        &self,
        zipcode: &str,
        metrics: &mut CollectionRunMetrics,
    ) -> Result<(), IngestError>;

    /// Collect one property by source-specific key (APN or listing URL).
    async fn collect_detail(&self, key: &str) -> Result<Option<Property>, IngestError>;
}

/// Error kinds that abort a collector run instead of moving on to the
/// next ZIP code.
fn is_fatal(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::Auth | ErrorKind::Permission | ErrorKind::Internal)
}

pub struct CollectorRunner {
    repository: Arc<PropertyRepository>,
    supervisor: Arc<ErrorSupervisor>,
    zipcodes: Vec<String>,
}

impl CollectorRunner {
    pub fn new(
        repository: Arc<PropertyRepository>,
        supervisor: Arc<ErrorSupervisor>,
        zipcodes: Vec<String>,
    ) -> Self {
        Self { repository, supervisor, zipcodes }
    }

    /// Preflight checks; a collector run never starts half-configured.
    pub async fn validate(&self) -> Result<(), IngestError> {
        if self.zipcodes.is_empty() {
            return Err(IngestError::validation("no ZIP codes configured for collection"));
        }
        for zipcode in &self.zipcodes {
            if !crate::utils::is_valid_zipcode(zipcode) {
                return Err(IngestError::validation(format!(
                    "invalid ZIP code configured: {zipcode}"
                )));
            }
        }
        self.supervisor.retry_policy().validate()?;
        self.repository
            .ping()
            .await
            .map_err(|e| IngestError::internal(format!("repository unreachable: {e}")))?;
        Ok(())
    }

    /// Run one collector over every configured ZIP code.
    pub async fn run_collector(&self, collector: &dyn Collector) -> CollectionRunMetrics {
        let mut metrics =
            CollectionRunMetrics::start(collector.source_name(), self.zipcodes.clone());
        tracing::info!(source = collector.source_name(), zipcodes = self.zipcodes.len(),
            "collection run starting");

        for zipcode in &self.zipcodes {
            match collector.collect_zipcode(zipcode, &mut metrics).await {
                Ok(()) => {}
                Err(e) if is_fatal(e.kind()) => {
                    metrics.failures += 1;
                    tracing::error!(
                        source = collector.source_name(),
                        zipcode,
                        kind = e.kind().as_str(),
                        error = %e,
                        "fatal error, aborting collection run"
                    );
                    break;
                }
                Err(e) => {
                    metrics.failures += 1;
                    tracing::warn!(source = collector.source_name(), zipcode, error = %e,
                        "zipcode collection failed, continuing");
                }
            }
        }

        metrics.finished_at = Some(Utc::now());
        if let Err(e) = self.repository.record_collection_run(&metrics).await {
            tracing::error!(error = %e, "failed to persist collection run");
        }
        metrics::counter!("collection_runs_total", 1,
            "source" => collector.source_name().to_string());
        metrics
    }

    /// Roll the day's recorded runs into one report; regenerating a day
    /// replaces the stored report.
    pub async fn build_daily_report(&self, date: NaiveDate) -> Result<DailyReport, IngestError> {
        let runs = self.repository.collection_runs_on(date).await?;
        let mut report = DailyReport::empty(date);

        let mut quality_sum = 0.0;
        let mut quality_count = 0u64;
        for run in &runs {
            *report.by_source.entry(run.source.clone()).or_default() += run.properties_collected;
            for (zipcode, count) in &run.by_zipcode {
                *report.by_zipcode.entry(zipcode.clone()).or_default() += count;
            }
            report.error_count += run.failures;
            report.warning_count += run.dead_lettered;
            report.requests_made += run.requests_made;
            report.rate_limit_hits += run.rate_limit_hits;
            report.total_duration_seconds += run.duration_seconds().unwrap_or(0.0);
            if let Some(avg) = run.average_quality {
                quality_sum += avg;
                quality_count += 1;
            }
        }
        report.average_quality =
            (quality_count > 0).then(|| quality_sum / quality_count as f64);
        report.price_stats = self.repository.price_statistics_all().await?;

        self.repository.upsert_daily_report(&report).await?;
        Ok(report)
    }
}

/// Shared post-pipeline handling: upsert valid results, dead-letter the
/// rest. Returns (stored, dead_lettered, quality scores).
pub(crate) async fn store_results(
    results: Vec<crate::services::processing::PipelineResult>,
    component: &str,
    repository: &PropertyRepository,
    supervisor: &ErrorSupervisor,
    metrics: &mut CollectionRunMetrics,
    zipcode: &str,
) -> Result<(), IngestError> {
    for result in results {
        metrics.properties_collected += 1;
        *metrics.by_zipcode.entry(zipcode.to_string()).or_default() += 1;

        if result.is_valid {
            let property = result.property.as_ref().expect("valid result carries a property");
            if let Some(meta) = property.sources.first() {
                let n = metrics.properties_collected as f64;
                let prev = metrics.average_quality.unwrap_or(0.0);
                metrics.average_quality = Some(prev + (meta.quality_score - prev) / n);
            }
            repository.upsert(property).await?;
            metrics.properties_stored += 1;
        } else {
            // Retryable failures were already retried inside the pipeline;
            // whatever reaches this point is terminal for the run.
            let error = IngestError::validation(
                result.error.clone().unwrap_or_else(|| "invalid pipeline result".to_string()),
            );
            let payload = result
                .property
                .as_ref()
                .and_then(|p| serde_json::to_value(p).ok());
            let correlation_id = uuid::Uuid::new_v4().to_string();
            supervisor
                .dead_letters()
                .enqueue(component, &correlation_id, &error, payload, 1, Utc::now())
                .await?;
            metrics.dead_lettered += 1;
        }
    }
    Ok(())
}
