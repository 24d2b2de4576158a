//! Request authentication and quota admission.
//!
//! A caller is identified by `Authorization: Bearer <access token>` or, when
//! no bearer token is sent, by a static `X-API-KEY` header. Handlers receive
//! the caller through the [`Authenticated`] and [`Admitted`] extractors.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, Method, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use ciam_core::auth::quota::QuotaUsage;
use ciam_core::models::auth::AuthenticatedUser;
use tracing::{debug, error};

use crate::AppState;
use crate::error::{AppError, AppResult};

/// Header carrying a static API key.
pub const API_KEY_HEADER: &str = "x-api-key";

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn api_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
}

/// Resolve the caller from request headers.
pub async fn resolve_user(state: &AppState, headers: &HeaderMap) -> AppResult<AuthenticatedUser> {
    if let Some(token) = bearer_token(headers) {
        return Ok(state.service.authenticate_access_token(token)?);
    }
    if let Some(key) = api_key(headers) {
        let cancel = state.shutdown.child_token();
        return Ok(state.service.authenticate_api_key(&cancel, key).await?);
    }
    Err(AppError::Forbidden("no authentication token provided".into()))
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct Authenticated(pub AuthenticatedUser);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> AppResult<Self> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(Self(user.clone()));
        }
        resolve_user(state, &parts.headers).await.map(Self)
    }
}

/// The authenticated caller together with the quota usage the request was
/// admitted under.
#[derive(Debug, Clone)]
pub struct Admitted(pub AuthenticatedUser, pub QuotaUsage);

impl FromRequestParts<AppState> for Admitted {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> AppResult<Self> {
        if let (Some(user), Some(usage)) = (
            parts.extensions.get::<AuthenticatedUser>(),
            parts.extensions.get::<QuotaUsage>(),
        ) {
            return Ok(Self(user.clone(), *usage));
        }
        let Authenticated(user) = Authenticated::from_request_parts(parts, state).await?;
        let cancel = state.shutdown.child_token();
        let usage = state.service.admit(&cancel, &user).await?;
        Ok(Self(user, usage))
    }
}

/// Axum middleware: authenticates the caller, rejects requests over quota,
/// and counts successful responses against the caller's quota.
pub async fn require_quota(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> AppResult<Response> {
    let user = resolve_user(&state, request.headers()).await?;
    let cancel = state.shutdown.child_token();
    let usage = state.service.admit(&cancel, &user).await?;

    request.extensions_mut().insert(user.clone());
    request.extensions_mut().insert(usage);
    let response = next.run(request).await;

    if response.status().is_success()
        && let Err(e) = state.service.record_successful_request(&cancel, &user).await
    {
        error!(user_id = %user.id, error = %e, "failed to record successful request");
    }
    Ok(response)
}

/// Axum middleware: only `POST` reaches the sign-in routes.
pub async fn require_post(request: Request, next: Next) -> AppResult<Response> {
    if request.method() != Method::POST {
        debug!(method = %request.method(), path = %request.uri().path(), "method rejected");
        return Err(AppError::MethodNotAllowed(request.method().clone()));
    }
    Ok(next.run(request).await)
}
