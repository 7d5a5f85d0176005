use axum::extract::{Extension, State};
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::registry_summary;
use crate::request::RequestCtx;
use crate::server::AppState;

/// GET /health: public liveness snapshot.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /health/detailed: per-database ping results plus pool and registry
/// statistics.
pub async fn detailed_health(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<Arc<RequestCtx>>,
) -> Json<Value> {
    let checks = state.db.health_check().await;
    let healthy = checks.values().all(Option::is_none);
    let stats = state.db.stats().await;

    state
        .logging
        .logger("goodoo.http.health")
        .debug_ctx(&ctx.log_context(), "Detailed health check requested");

    let databases: Value = checks
        .into_iter()
        .map(|(name, error)| {
            let status = match error {
                None => json!({"status": "up"}),
                Some(message) => json!({"status": "down", "error": message}),
            };
            (name, status)
        })
        .collect::<serde_json::Map<String, Value>>()
        .into();

    Json(json!({
        "status": if healthy { "ok" } else { "degraded" },
        "timestamp": Utc::now(),
        "databases": databases,
        "pool": {
            "used": stats.pool.used,
            "idle": stats.pool.idle,
            "total": stats.pool.total,
            "max": stats.pool.max,
        },
        "models": registry_summary(&state.api),
    }))
}
