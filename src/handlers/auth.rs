use async_trait::async_trait;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AppError;
use crate::request::RequestCtx;
use crate::server::AppState;

/// Credential verification collaborator. The server core does not own user
/// records; the composition root wires a backend.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn authenticate(
        &self,
        db: &str,
        login: &str,
        password: &str,
    ) -> Result<AuthenticatedUser, AppError>;
}

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub login: String,
    pub name: String,
    pub email: String,
    pub groups: Vec<String>,
}

/// In-memory backend seeded with the default admin account; used by the
/// default composition root and by tests.
pub struct StaticAuthBackend {
    users: HashMap<String, (String, AuthenticatedUser)>,
}

impl StaticAuthBackend {
    pub fn with_admin() -> Self {
        let mut backend = Self {
            users: HashMap::new(),
        };
        backend.add_user(
            "admin",
            "admin",
            AuthenticatedUser {
                user_id: 1,
                login: "admin".to_string(),
                name: "Administrator".to_string(),
                email: "admin@example.com".to_string(),
                groups: vec![
                    "base.group_user".to_string(),
                    "base.group_admin".to_string(),
                ],
            },
        );
        backend
    }

    pub fn add_user(&mut self, login: &str, password: &str, user: AuthenticatedUser) {
        self.users
            .insert(login.to_string(), (password.to_string(), user));
    }
}

#[async_trait]
impl AuthBackend for StaticAuthBackend {
    async fn authenticate(
        &self,
        _db: &str,
        login: &str,
        password: &str,
    ) -> Result<AuthenticatedUser, AppError> {
        match self.users.get(login) {
            Some((expected, user)) if expected == password => Ok(user.clone()),
            _ => Err(AppError::AuthenticationRequired(format!(
                "invalid credentials for '{}'",
                login
            ))),
        }
    }
}

/// POST /auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<Arc<RequestCtx>>,
) -> Result<Response, AppError> {
    let logger = state.logging.logger("goodoo.http.auth");

    let login = ctx.param_str("login", "");
    let password = ctx.param_str("password", "");
    let db = ctx.param_str("db", &ctx.db_name().unwrap_or_default());

    if login.is_empty() || password.is_empty() {
        logger.warning_ctx(&ctx.log_context(), "Login attempt with missing credentials");
        return Err(AppError::Validation("Login and password required".to_string()));
    }

    logger.info_ctx(
        &ctx.log_context(),
        format!("Login attempt for user: {} on database: {}", login, db),
    );

    let user = match state.auth.authenticate(&db, &login, &password).await {
        Ok(user) => user,
        Err(_) => {
            logger.warning_ctx(&ctx.log_context(), format!("Invalid credentials for: {}", login));
            let body = Json(json!({"success": false, "error": "Invalid credentials"}));
            return Ok((StatusCode::UNAUTHORIZED, body).into_response());
        }
    };

    ctx.authenticate(&db, &user.login, user.user_id, &user.groups);
    logger.info_ctx(
        &ctx.log_context(),
        format!("User {} successfully authenticated", user.login),
    );

    let body = Json(json!({
        "success": true,
        "user_id": user.user_id,
        "login": user.login,
        "name": user.name,
        "email": user.email,
        "db": db,
    }));
    Ok(body.into_response())
}

/// POST /auth/logout (GET also accepted)
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<Arc<RequestCtx>>,
) -> Result<Json<Value>, AppError> {
    if !ctx.is_authenticated() {
        return Err(AppError::Validation("Not authenticated".to_string()));
    }

    let old_login = ctx.login();
    ctx.logout(false);

    state.logging.logger("goodoo.http.auth").info_ctx(
        &ctx.log_context(),
        format!("User {} logged out", old_login),
    );

    Ok(Json(json!({
        "success": true,
        "message": "Logged out successfully",
    })))
}

/// GET /auth/session
pub async fn session_info(
    Extension(ctx): Extension<Arc<RequestCtx>>,
) -> Json<Value> {
    Json(json!({
        "authenticated": ctx.is_authenticated(),
        "user_id": ctx.user_id(),
        "login": ctx.login(),
        "db": ctx.db_name(),
        "session_id": ctx.session_id(),
        "context": ctx.with_session(|s| s.context()),
        "request_id": ctx.request_id,
    }))
}
