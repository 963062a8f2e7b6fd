//! Saguaro Library
//!
//! This library contains all the core modules for the Saguaro ingestion
//! daemon: source clients, the anti-bot scraper, the processing pipeline,
//! error supervision, and the property repository.

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::Config;
pub use services::{
    CollectorRunner, ErrorSupervisor, ExtractionCache, LlmClient, LlmExtractor, MaricopaClient,
    MaricopaCollector, PhoenixMlsCollector, PhoenixMlsScraper, ProcessingPipeline,
    PropertyRepository, ProxyPool, RateLimiter, SessionStore, WorkQueue,
};
pub use utils::{ApiError, ApiResult, ErrorKind, IngestError};

/// Application shared state
///
/// Design Philosophy: Keep it simple - Rust's type system IS our DI
/// container. All services are wrapped in Arc for cheap cloning and
/// thread safety.
#[derive(Clone)]
pub struct AppState {
    pub work_queue: services::WorkQueue,
    pub pipeline: Arc<ProcessingPipeline>,
    pub repository: Arc<PropertyRepository>,
    pub extraction_cache: Arc<ExtractionCache>,
    pub llm_client: Arc<LlmClient>,

    pub prometheus: PrometheusHandle,
}
