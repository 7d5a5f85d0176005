use axum::extract::{Extension, State};
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::AppError;
use crate::request::RequestCtx;
use crate::server::AppState;

/// GET /session
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<Arc<RequestCtx>>,
) -> Json<Value> {
    state
        .logging
        .logger("goodoo.http.session")
        .debug_ctx(&ctx.log_context(), "Session data requested");

    let (created_at, last_accessed, context) =
        ctx.with_session(|s| (s.created_at, s.last_accessed, s.context()));

    Json(json!({
        "sid": ctx.session_id(),
        "authenticated": ctx.is_authenticated(),
        "user_id": ctx.user_id(),
        "login": ctx.login(),
        "db": ctx.db_name(),
        "context": context,
        "created_at": created_at,
        "last_accessed": last_accessed,
    }))
}

/// POST /session/clear
pub async fn clear_session(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<Arc<RequestCtx>>,
) -> Json<Value> {
    state
        .logging
        .logger("goodoo.http.session")
        .info_ctx(&ctx.log_context(), "Session cleared by request");

    ctx.with_session(|session| session.clear());

    Json(json!({
        "success": true,
        "message": "Session cleared",
    }))
}

/// POST /session/set with `{key, value}`
pub async fn set_session(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<Arc<RequestCtx>>,
) -> Result<Json<Value>, AppError> {
    let key = ctx.param_str("key", "");
    if key.is_empty() {
        return Err(AppError::Validation("Key is required".to_string()));
    }
    let value = ctx.param("value").cloned().unwrap_or(Value::Null);

    ctx.with_session(|session| session.set(&key, value.clone()));

    state
        .logging
        .logger("goodoo.http.session")
        .debug_ctx(&ctx.log_context(), format!("Session data set: {}", key));

    Ok(Json(json!({
        "success": true,
        "key": key,
        "value": value,
    })))
}
