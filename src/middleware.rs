use axum::extract::{Request, State};
use axum::http::header::{HeaderValue, SET_COOKIE};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

use crate::error::AppError;
use crate::request::{bind_params, RequestCtx};
use crate::server::AppState;

/// Session cookie lifetime.
const COOKIE_MAX_AGE_SECS: u64 = 24 * 60 * 60;

/// Outermost middleware: bind parameters, attach the session, start the
/// perf counter, and on the way out flush the session, set the cookie when
/// owed and emit the request completion line with the perf footprint.
pub async fn request_context(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (mut req, params) = bind_params(req).await?;

    let ctx = RequestCtx::bind(
        req.method(),
        req.uri(),
        req.headers(),
        params,
        &state.settings,
        state.session_store.as_ref(),
    );
    req.extensions_mut().insert(ctx.clone());

    let logger = state.logging.logger("goodoo.http");
    logger.debug_ctx(
        &ctx.log_context(),
        format!("Request started: {} {}", ctx.method, ctx.path),
    );

    let mut response = next.run(req).await;

    // Cooperative save-on-response; failures are warnings, never request
    // failures.
    let save_result = ctx.with_session(|session| state.session_store.save(session));
    if let Err(err) = save_result {
        logger.warning_ctx(
            &ctx.log_context(),
            format!("Failed to save session: {}", err),
        );
    }

    if ctx.cookie_needed() {
        let cookie = session_cookie(
            &state.settings.session_cookie,
            &ctx.session_id(),
            ctx.secure,
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(SET_COOKIE, value);
        }
    }

    logger.info_ctx(
        &ctx.log_context(),
        format!(
            "{} {} - {}",
            ctx.method,
            ctx.path,
            response.status().as_u16()
        ),
    );

    Ok(response)
}

/// HttpOnly, SameSite=Lax, Secure iff the request arrived over TLS.
fn session_cookie(name: &str, sid: &str, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        name, sid, COOKIE_MAX_AGE_SECS
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Reject requests without an authenticated session.
pub async fn auth_required(req: Request, next: Next) -> Result<Response, AppError> {
    let ctx = request_ctx(&req)?;
    if !ctx.is_authenticated() {
        return Err(AppError::AuthenticationRequired(format!(
            "unauthenticated access to {}",
            ctx.path
        )));
    }
    Ok(next.run(req).await)
}

/// Reject requests with no database bound.
pub async fn db_required(req: Request, next: Next) -> Result<Response, AppError> {
    let ctx = request_ctx(&req)?;
    if ctx.db_name().is_none() {
        return Err(AppError::Validation("Database required".to_string()));
    }
    Ok(next.run(req).await)
}

/// Standard security headers on every response.
pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("x-xss-protection", HeaderValue::from_static("1; mode=block"));
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}

/// Fetch the request context installed by [`request_context`].
pub fn request_ctx(req: &Request) -> Result<Arc<RequestCtx>, AppError> {
    req.extensions()
        .get::<Arc<RequestCtx>>()
        .cloned()
        .ok_or_else(|| AppError::Internal("request context not bound".to_string()))
}
