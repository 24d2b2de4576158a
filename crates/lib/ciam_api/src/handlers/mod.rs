//! Request handlers.

pub mod auth;
pub mod quotas;

use axum::extract::FromRequest;
use axum::http::Method;

use crate::error::AppError;

/// JSON body extractor whose rejection is an [`AppError`].
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// Fallback for unsupported methods on a known route.
pub async fn method_not_allowed(method: Method) -> AppError {
    AppError::MethodNotAllowed(method)
}
