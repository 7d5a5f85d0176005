use axum::extract::{Extension, State};
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::AppError;
use crate::request::RequestCtx;
use crate::server::AppState;

/// GET /db/list
pub async fn list_databases(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<Arc<RequestCtx>>,
) -> Json<Value> {
    let databases = state.db.databases().await;

    state
        .logging
        .logger("goodoo.http.db")
        .info_ctx(&ctx.log_context(), "Database list requested");

    Json(json!({
        "databases": databases,
        "current": ctx.db_name(),
    }))
}

/// POST /db/set with `{database}`; switches the session binding.
pub async fn set_database(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<Arc<RequestCtx>>,
) -> Result<Json<Value>, AppError> {
    let database = ctx.param_str("database", "");
    if database.is_empty() {
        return Err(AppError::Validation("Database name is required".to_string()));
    }

    ctx.with_session(|session| session.set("db_name", Value::String(database.clone())));
    ctx.set_db_name(Some(database.clone()));

    state.logging.logger("goodoo.http.db").info_ctx(
        &ctx.log_context(),
        format!("Database changed to: {}", database),
    );

    Ok(Json(json!({
        "database": database,
        "message": "Database updated successfully",
    })))
}
