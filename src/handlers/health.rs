//! Liveness and readiness endpoints.
//!
//! `/health` answers whether the service is accepting work at all;
//! `/health/llm` breaks readiness down per component (database, LLM,
//! queue, memory) with the overall status being the worst of them.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

/// GET /health
pub async fn liveness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.work_queue.is_accepting() {
        (StatusCode::OK, Json(HealthResponse { status: "healthy", service: "llm_processor" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse { status: "unhealthy", service: "llm_processor" }),
        )
    }
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: ComponentHealth,
    pub components: BTreeMap<&'static str, ComponentHealth>,
}

/// GET /health/llm
pub async fn readiness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut components = BTreeMap::new();

    components.insert(
        "database",
        match state.repository.ping().await {
            Ok(()) => ComponentHealth::Healthy,
            Err(_) => ComponentHealth::Unhealthy,
        },
    );

    components.insert(
        "llm",
        match state.llm_client.health_check().await {
            Ok(()) => ComponentHealth::Healthy,
            Err(_) => ComponentHealth::Unhealthy,
        },
    );

    let occupancy = state.work_queue.occupancy();
    components.insert(
        "queue",
        if !state.work_queue.is_accepting() || occupancy >= 1.0 {
            ComponentHealth::Unhealthy
        } else if occupancy >= 0.8 {
            ComponentHealth::Degraded
        } else {
            ComponentHealth::Healthy
        },
    );

    components.insert("memory", memory_health());

    let overall = components.values().copied().max().unwrap_or(ComponentHealth::Unhealthy);
    let status_code = if overall == ComponentHealth::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(ReadinessResponse { status: overall, components }))
}

/// Resident-set-size check via procfs; other platforms report healthy.
fn memory_health() -> ComponentHealth {
    const DEGRADED_KB: u64 = 1_500_000;
    const UNHEALTHY_KB: u64 = 3_000_000;

    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return ComponentHealth::Healthy;
    };
    let rss_kb = status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse::<u64>().ok());

    match rss_kb {
        Some(kb) if kb >= UNHEALTHY_KB => ComponentHealth::Unhealthy,
        Some(kb) if kb >= DEGRADED_KB => ComponentHealth::Degraded,
        _ => ComponentHealth::Healthy,
    }
}
