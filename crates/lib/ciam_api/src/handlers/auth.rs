//! Sign-in handlers.

use axum::{
    Json,
    extract::{OriginalUri, State},
};
use ciam_core::auth::CiamError;
use ciam_core::models::auth::TokenSet;
use tracing::debug;

use super::AppJson;
use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{
    AnonymSigninRequest, RefreshRequest, SecretConfirmationRequest, UserSigninInitRequest,
};

/// `POST /auth/anonym`: sign in by browser fingerprint.
pub async fn signin_anonym_handler(
    State(state): State<AppState>,
    AppJson(req): AppJson<AnonymSigninRequest>,
) -> AppResult<Json<TokenSet>> {
    let cancel = state.shutdown.child_token();
    let tokens = state
        .service
        .signin_anonym(&cancel, &req.fingerprint)
        .await?;
    Ok(Json(tokens))
}

/// `POST /auth/init`: email a one-time secret and return an ID token for the
/// confirmation step.
pub async fn signin_init_handler(
    State(state): State<AppState>,
    AppJson(req): AppJson<UserSigninInitRequest>,
) -> AppResult<Json<TokenSet>> {
    if req.email.is_empty() {
        return Err(AppError::Validation("email must be provided".into()));
    }
    let fingerprint = Some(req.fingerprint.as_str()).filter(|fp| !fp.is_empty());

    let cancel = state.shutdown.child_token();
    let id = state
        .service
        .signin_user_init(&cancel, &req.email, fingerprint)
        .await?;
    Ok(Json(TokenSet {
        id,
        access: None,
        refresh: None,
    }))
}

/// `POST /auth/confirm`: exchange the ID token and emailed secret for tokens.
pub async fn confirm_handler(
    State(state): State<AppState>,
    AppJson(req): AppJson<SecretConfirmationRequest>,
) -> AppResult<Json<TokenSet>> {
    if req.id_token.is_empty() || req.secret.is_empty() {
        return Err(AppError::Validation(
            "token and secret must be provided".into(),
        ));
    }
    let cancel = state.shutdown.child_token();
    let tokens = state
        .service
        .confirm_secret(&cancel, &req.id_token, &req.secret)
        .await?;
    Ok(Json(tokens))
}

/// `POST /auth/refresh`: issue fresh ID and access tokens.
pub async fn refresh_handler(
    State(state): State<AppState>,
    AppJson(req): AppJson<RefreshRequest>,
) -> AppResult<Json<TokenSet>> {
    if req.refresh_token.is_empty() {
        return Err(AppError::Validation("token must be provided".into()));
    }
    let cancel = state.shutdown.child_token();
    match state.service.refresh_tokens(&cancel, &req.refresh_token).await {
        Ok(tokens) => Ok(Json(tokens)),
        Err(CiamError::Token(e)) => {
            debug!(error = %e, "refresh token rejected");
            Err(AppError::Forbidden("token is not valid".into()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Unknown path under `/auth`.
pub async fn not_found_handler(OriginalUri(uri): OriginalUri) -> AppError {
    AppError::NotFound(format!("CIAM resource {} not found", uri.path()))
}
