//! Quota usage handler.

use axum::{Json, extract::State};
use ciam_core::auth::quota::QuotaUsage;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::Authenticated;

/// `GET /quotas`: current quota usage of the caller.
pub async fn quota_usage_handler(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
) -> AppResult<Json<QuotaUsage>> {
    let cancel = state.shutdown.child_token();
    let usage = state.service.quota_usage(&cancel, &user).await?;
    Ok(Json(usage))
}
