//! Application error types.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use ciam_core::auth::CiamError;
use thiserror::Error;
use tracing::{debug, error};

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0} is not allowed")]
    MethodNotAllowed(Method),

    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    #[error("Request canceled")]
    Canceled,

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m.clone()),
            AppError::Validation(m) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "validation_error", m.clone())
            }
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.clone()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.clone()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.clone()),
            AppError::MethodNotAllowed(method) => (
                StatusCode::METHOD_NOT_ALLOWED,
                "method_not_allowed",
                format!("{method} is not allowed"),
            ),
            AppError::TooManyRequests(m) => {
                (StatusCode::TOO_MANY_REQUESTS, "throttled", m.clone())
            }
            AppError::Canceled => (
                StatusCode::GATEWAY_TIMEOUT,
                "canceled",
                "request canceled".to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal error".to_string(),
            ),
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message,
        });
        (status, body).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        debug!(error = %rejection.body_text(), "request body rejected");
        AppError::BadRequest("request parsing error".into())
    }
}

impl From<CiamError> for AppError {
    fn from(e: CiamError) -> Self {
        match e {
            CiamError::Validation(m) => AppError::Validation(m),
            CiamError::Token(e) => {
                debug!(error = %e, "token rejected");
                AppError::Unauthorized("token is not valid".into())
            }
            CiamError::SecretMismatch | CiamError::NoSecretPending => {
                AppError::Forbidden("secret is wrong".into())
            }
            CiamError::UserDeactivated(user_id) => {
                debug!(%user_id, "deactivated user rejected");
                AppError::Forbidden("user was deactivated".into())
            }
            CiamError::EmailNotVerified => {
                AppError::Forbidden("user's email was not verified yet".into())
            }
            CiamError::UserNotFound(_) => AppError::NotFound("user not found".into()),
            CiamError::ApiKeyNotFound => AppError::Unauthorized("api key is not valid".into()),
            CiamError::DailyQuotaExceeded => AppError::Forbidden("quota exceeded".into()),
            CiamError::ThrottlingQuotaExceeded => {
                AppError::TooManyRequests("throttling quota exceeded".into())
            }
            e @ (CiamError::Repository(_) | CiamError::Mail(_)) => {
                error!(error = %e, "dependency failure");
                AppError::Internal(e.to_string())
            }
            CiamError::Canceled => AppError::Canceled,
        }
    }
}
