//! `/health`, `/health/ready`, `/health/live` endpoints (spec §6).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use once_cell::sync::Lazy;
use serde_json::json;

use crate::http::state::AppState;

static STARTED_AT: Lazy<Instant> = Lazy::new(Instant::now);
static READY_FAILURES: AtomicU64 = AtomicU64::new(0);

/// Aggregate health: cache health (if enabled) plus pool stats.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let pool_stats = state.pool.stats();
    let cache = state.cache.as_ref().map(|c| {
        json!({
            "health": c.health(),
            "warmed_up": c.warmed_up(),
            "hits": c.metrics().hits(),
            "misses": c.metrics().misses(),
            "refresh_errors": c.metrics().refresh_errors(),
        })
    });

    Json(json!({
        "cache": cache,
        "pool": pool_stats,
        "uptime_seconds": STARTED_AT.elapsed().as_secs(),
    }))
}

/// 200 iff the cache (when enabled) is warmed up and the pool is open;
/// 503 otherwise (spec §6 "readiness").
pub async fn health_ready(State(state): State<AppState>) -> impl IntoResponse {
    let cache_ready = state.cache.as_ref().map(|c| c.warmed_up()).unwrap_or(true);
    let pool_ready = state.pool.is_healthy();

    if cache_ready && pool_ready {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        READY_FAILURES.fetch_add(1, Ordering::Relaxed);
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "not ready" })))
    }
}

/// 200 as long as the process is running; reports uptime.
pub async fn health_live() -> impl IntoResponse {
    Json(json!({
        "status": "alive",
        "uptime_seconds": STARTED_AT.elapsed().as_secs(),
    }))
}
