use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::{ApiCall, ApiResponse};
use crate::error::AppError;
use crate::request::RequestCtx;
use crate::server::AppState;

/// POST /api/call with a JSON `ApiCall` envelope.
pub async fn call_method(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<Arc<RequestCtx>>,
) -> Result<Response, AppError> {
    let call: ApiCall = serde_json::from_value(Value::Object(ctx.params.clone()))
        .map_err(|_| AppError::Validation("Invalid request format".to_string()))?;

    if call.model.is_empty() || call.method.is_empty() {
        return Err(AppError::Validation(
            "Model and method names are required".to_string(),
        ));
    }

    state.logging.logger("goodoo.http.rpc.request").info_ctx(
        &ctx.log_context(),
        format!("API call: {}.{}", call.model, call.method),
    );

    let response = state.api.execute_call(&ctx.call_context(), &call).await;
    Ok(envelope_response(response))
}

/// GET /api/models/{model}/methods
pub async fn get_model_methods(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<Arc<RequestCtx>>,
    Path(model): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.logging.logger("goodoo.http.rpc.request").info_ctx(
        &ctx.log_context(),
        format!("Getting methods for model: {}", model),
    );

    let methods = state
        .api
        .public_methods(&model)
        .ok_or_else(|| AppError::NotFound(format!("Model '{}'", model)))?;

    Ok(Json(json!({
        "model": model,
        "methods": methods,
    })))
}

/// GET /api/models/{model}/methods/{method}
pub async fn get_method_info(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<Arc<RequestCtx>>,
    Path((model, method)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    state.logging.logger("goodoo.http.rpc.request").info_ctx(
        &ctx.log_context(),
        format!("Getting info for method: {}.{}", model, method),
    );

    let info = state
        .api
        .method_info(&model, &method)
        .ok_or_else(|| AppError::NotFound(format!("Method '{}.{}'", model, method)))?;

    Ok(Json(info))
}

/// ANY /api/models/{model}/{method}: model-method URL dispatch.
pub async fn call_model_method(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<Arc<RequestCtx>>,
    Path((model, method)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let call = call_from_request(&ctx, model, method, Vec::new());

    state.logging.logger("goodoo.http.rpc.request").info_ctx(
        &ctx.log_context(),
        format!("URL API call: {}.{}", call.model, call.method),
    );

    let response = state.api.execute_call(&ctx.call_context(), &call).await;
    Ok(envelope_response(response))
}

/// ANY /api/models/{model}/{ids}/{method}: record-method URL dispatch;
/// `ids` is a comma-separated integer list.
pub async fn call_record_method(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<Arc<RequestCtx>>,
    Path((model, ids, method)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    let ids = parse_ids(&ids);
    if ids.is_empty() {
        return Err(AppError::Validation("Invalid IDs format".to_string()));
    }

    let call = call_from_request(&ctx, model, method, ids);

    state.logging.logger("goodoo.http.rpc.request").info_ctx(
        &ctx.log_context(),
        format!("Record API call: {}.{} on IDs {:?}", call.model, call.method, call.ids),
    );

    let response = state.api.execute_call(&ctx.call_context(), &call).await;
    Ok(envelope_response(response))
}

/// Build the call envelope from bound request parameters. GET uses the query
/// parameters as kwargs (minus the reserved `context`); POST reads `args`,
/// `kwargs` and `context` from the body.
fn call_from_request(ctx: &RequestCtx, model: String, method: String, ids: Vec<i64>) -> ApiCall {
    let mut call = ApiCall {
        model,
        method,
        ids,
        ..ApiCall::default()
    };

    if ctx.method == "GET" {
        for (key, value) in &ctx.params {
            if key == "context" {
                continue;
            }
            call.kwargs.insert(key.clone(), value.clone());
        }
    } else {
        if let Some(Value::Array(args)) = ctx.param("args") {
            call.args = args.clone();
        }
        if let Some(Value::Object(kwargs)) = ctx.param("kwargs") {
            call.kwargs = kwargs.clone();
        }
        if let Some(Value::Object(context)) = ctx.param("context") {
            call.context = context.clone();
        }
    }

    call
}

/// Comma-separated id list; whitespace and empty entries are tolerated,
/// non-numeric entries are dropped.
fn parse_ids(raw: &str) -> Vec<i64> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse().ok())
        .collect()
}

/// HTTP status for a dispatch envelope, by substring of the error message.
fn envelope_status(response: &ApiResponse) -> StatusCode {
    if response.success {
        return StatusCode::OK;
    }

    let error = response.error.as_deref().unwrap_or_default();
    if error.contains("Access denied") || error.contains("not accessible") {
        StatusCode::FORBIDDEN
    } else if error.contains("not found") {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::BAD_REQUEST
    }
}

fn envelope_response(response: ApiResponse) -> Response {
    let status = envelope_status(&response);
    (status, Json(response)).into_response()
}
