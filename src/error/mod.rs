use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;

/// Machine-readable error codes returned in the `code` field of the error
/// envelope. Clients branch on these rather than on `message` text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    AuthInvalid,
    AuthExpired,
    AuthMissing,
    Forbidden,
    NotFound,
    Validation,
    Conflict,
    RateLimited,
    Unavailable,
    Timeout,
    Internal,
}

impl ErrorCode {
    fn as_str(self) -> &'static str {
        match self {
            ErrorCode::AuthInvalid => "AUTH_INVALID",
            ErrorCode::AuthExpired => "AUTH_EXPIRED",
            ErrorCode::AuthMissing => "AUTH_MISSING",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::Unavailable => "UNAVAILABLE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    /// Whether a client may usefully retry the same request unmodified.
    /// Surfaced in the error envelope as `retryable` (spec §7).
    fn retryable(self) -> bool {
        matches!(self, ErrorCode::RateLimited | ErrorCode::Unavailable | ErrorCode::Timeout)
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(sqlx::Error),

    /// Token missing, malformed, or signature invalid.
    #[error("invalid credentials: {0}")]
    AuthInvalid(String),

    /// Token well-formed but past its `exp` claim — distinct from
    /// AuthInvalid so clients know to attempt a refresh rather than re-login.
    #[error("token expired")]
    AuthExpired,

    #[error("authentication required")]
    AuthMissing,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limited")]
    RateLimited,

    /// A backing store or the event bus is unreachable (spec §7). Callers
    /// must never leak this as a raw driver error.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// A store call exceeded its deadline (default 5s, spec §5).
    #[error("operation timed out")]
    Timeout,

    #[error("internal server error")]
    Internal,
}

/// Map sqlx errors to AppError, with special handling for unique-constraint
/// violations (PG error code 23505) so they surface as 409 Conflict rather
/// than 500 Internal Server Error.
impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.code().as_deref() == Some("23505") {
                let message = match db_err.constraint() {
                    Some(c) if c.contains("username") => "username already taken",
                    Some(c) if c.contains("email") => "email already registered",
                    Some(c) if c.contains("correlation") => "duplicate message",
                    _ => "resource already exists",
                };
                return AppError::Conflict(message.into());
            }
        }
        AppError::Database(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, ErrorCode, String) {
        match self {
            AppError::Database(e) => {
                tracing::error!("database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Internal,
                    "database error".into(),
                )
            }
            AppError::AuthInvalid(msg) => {
                (StatusCode::UNAUTHORIZED, ErrorCode::AuthInvalid, msg.clone())
            }
            AppError::AuthExpired => (
                StatusCode::UNAUTHORIZED,
                ErrorCode::AuthExpired,
                "token expired".into(),
            ),
            AppError::AuthMissing => (
                StatusCode::UNAUTHORIZED,
                ErrorCode::AuthMissing,
                "authentication required".into(),
            ),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::Validation, msg.clone())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorCode::NotFound, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, ErrorCode::Conflict, msg.clone()),
            AppError::Forbidden(msg) => {
                (StatusCode::FORBIDDEN, ErrorCode::Forbidden, msg.clone())
            }
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorCode::RateLimited,
                "too many requests".into(),
            ),
            AppError::Unavailable(msg) => {
                tracing::error!("service unavailable: {msg}");
                (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::Unavailable, msg.clone())
            }
            AppError::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                ErrorCode::Timeout,
                "operation timed out".into(),
            ),
            AppError::Internal => {
                tracing::error!("internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Internal,
                    "internal server error".into(),
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        let body = json!({
            "success": false,
            "message": message,
            "code": code.as_str(),
            "statusCode": status.as_u16(),
            "retryable": code.retryable(),
            "timestamp": Utc::now().to_rfc3339(),
        });

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Wraps a payload in the envelope every successful JSON response uses:
/// `{ success: true, data, timestamp }`.
pub fn ok_envelope<T: serde::Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "data": data,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// `IntoResponse` wrapper that applies the success envelope (spec §6.1) to a
/// handler's return value. Handlers return `AppResult<Envelope<T>>` rather
/// than `AppResult<Json<T>>` so every 2xx response carries `{ success,
/// data, timestamp }` without each call site building the envelope by hand.
pub struct Envelope<T>(pub T);

impl<T: serde::Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        ok_envelope(self.0).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::response::IntoResponse;
    use http_body_util::BodyExt;

    async fn body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn auth_invalid_returns_401_with_code() {
        let response = AppError::AuthInvalid("bad signature".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response.into_body()).await;
        assert_eq!(json["code"], "AUTH_INVALID");
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn auth_expired_is_distinct_from_auth_invalid() {
        let response = AppError::AuthExpired.into_response();
        let json = body_json(response.into_body()).await;
        assert_eq!(json["code"], "AUTH_EXPIRED");
    }

    #[tokio::test]
    async fn validation_error_returns_400() {
        let response = AppError::Validation("invalid input".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn not_found_error_returns_404() {
        let response = AppError::NotFound("user not found".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn conflict_error_returns_409() {
        let response = AppError::Conflict("already exists".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn rate_limited_returns_429() {
        let response = AppError::RateLimited.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn internal_error_returns_500() {
        let response = AppError::Internal.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn database_row_not_found_returns_500() {
        let response = AppError::Database(sqlx::Error::RowNotFound).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn error_body_has_envelope_shape() {
        let response = AppError::Forbidden("not a member".into()).into_response();
        let json = body_json(response.into_body()).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "not a member");
        assert!(json["timestamp"].is_string());
    }
}
