//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::response::IntoResponse;
use std::sync::Arc;

use crate::AppState;

/// GET /metrics in text exposition format.
pub async fn scrape(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Pipeline gauges are snapshot-computed at scrape time; counters are
    // recorded at the call sites.
    let pipeline = state.pipeline.metrics().await;
    metrics::gauge!("pipeline_success_rate", pipeline.success_rate);
    metrics::gauge!("pipeline_average_processing_time_ms", pipeline.average_processing_time_ms);
    metrics::gauge!("pipeline_average_confidence", pipeline.average_confidence);
    metrics::gauge!("work_queue_occupancy", state.work_queue.occupancy());

    let cache = state.extraction_cache.stats();
    metrics::gauge!("extraction_cache_entries", cache.entries as f64);

    state.prometheus.render()
}
