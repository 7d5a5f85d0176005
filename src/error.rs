use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application error types
#[derive(Debug)]
pub enum AppError {
    /// Bad input type or missing required field
    Validation(String),
    /// Unauthenticated access to an authenticated route
    AuthenticationRequired(String),
    /// Authenticated but disallowed (group gate, private method)
    AccessDenied(String),
    /// Unknown model, method or session
    NotFound(String),
    /// Pool cap reached and no idle connections
    PoolExhausted(String),
    /// Database unreachable
    StorageUnavailable(String),
    /// Unexpected handler error
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "Validation failed: {}", msg),
            Self::AuthenticationRequired(msg) => write!(f, "Authentication required: {}", msg),
            Self::AccessDenied(msg) => write!(f, "Access denied: {}", msg),
            Self::NotFound(msg) => write!(f, "{} not found", msg),
            Self::PoolExhausted(msg) => write!(f, "Connection pool exhausted: {}", msg),
            Self::StorageUnavailable(msg) => write!(f, "Database unavailable: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::AuthenticationRequired(_) => {
                (StatusCode::UNAUTHORIZED, "Authentication required".to_string())
            }
            Self::AccessDenied(_) => (StatusCode::FORBIDDEN, "Access denied".to_string()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, format!("{} not found", msg)),
            Self::PoolExhausted(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Connection pool exhausted".to_string())
            }
            Self::StorageUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Database unavailable".to_string())
            }
            // Full detail goes to logs, never to the client.
            Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "success": false,
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Short machine tag for log lines
pub fn error_kind(error: &AppError) -> &'static str {
    match error {
        AppError::Validation(_) => "validation",
        AppError::AuthenticationRequired(_) => "authentication_required",
        AppError::AccessDenied(_) => "access_denied",
        AppError::NotFound(_) => "not_found",
        AppError::PoolExhausted(_) => "pool_exhausted",
        AppError::StorageUnavailable(_) => "storage_unavailable",
        AppError::Internal(_) => "internal",
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::PoolExhausted(err.to_string()),
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) => Self::StorageUnavailable(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AppError::NotFound("Model 'partner'".to_string());
        assert_eq!(error.to_string(), "Model 'partner' not found");
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(error_kind(&AppError::AccessDenied("x".to_string())), "access_denied");
        assert_eq!(error_kind(&AppError::PoolExhausted("x".to_string())), "pool_exhausted");
    }

    #[tokio::test]
    async fn test_error_response_status() {
        let response = AppError::AuthenticationRequired("no session".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = AppError::PoolExhausted("max 2".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_internal_error_hides_detail() {
        use http_body_util::BodyExt;

        let response = AppError::Internal("/etc/secret.conf missing".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"], "Internal server error");
    }
}
