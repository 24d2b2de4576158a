//! # ciam_api
//!
//! HTTP edge for the diagramastext CIAM.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use ciam_core::auth::signin::SigninService;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::ApiConfig;
use crate::handlers::{auth, method_not_allowed, quotas};

/// Shared application state passed to all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Sign-in flows, token issuance and quota accounting.
    pub service: Arc<SigninService>,
    /// API configuration.
    pub config: ApiConfig,
    /// Cancelled on shutdown; handlers derive per-request tokens from it.
    pub shutdown: CancellationToken,
}

/// Builds the Axum router with the CIAM routes.
pub fn router(state: AppState) -> Router {
    router_with(state, Router::new())
}

/// Builds the Axum router with the CIAM routes plus `downstream` routes,
/// which are quota-gated with [`gated`].
pub fn router_with(state: AppState, downstream: Router<AppState>) -> Router {
    let cors = cors_layer(&state.config);

    let signin = Router::new()
        .route("/anonym", post(auth::signin_anonym_handler))
        .route("/init", post(auth::signin_init_handler))
        .route("/confirm", post(auth::confirm_handler))
        .route("/refresh", post(auth::refresh_handler))
        .fallback(auth::not_found_handler)
        .layer(axum::middleware::from_fn(middleware::auth::require_post));

    Router::new()
        .nest("/auth", signin)
        .route(
            "/quotas",
            get(quotas::quota_usage_handler).fallback(method_not_allowed),
        )
        .merge(gated(&state, downstream))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Require every request to `routes` to be authenticated and within quota.
/// Successful responses count against the caller's quota.
pub fn gated(state: &AppState, routes: Router<AppState>) -> Router<AppState> {
    if !routes.has_routes() {
        return routes;
    }
    routes.route_layer(axum::middleware::from_fn_with_state(
        state.clone(),
        middleware::auth::require_quota,
    ))
}

fn cors_layer(config: &ApiConfig) -> CorsLayer {
    let origin = match config.cors_allowed_origin.as_deref() {
        None => AllowOrigin::any(),
        Some(origin) => match HeaderValue::from_str(origin) {
            Ok(value) => AllowOrigin::exact(value),
            Err(e) => {
                warn!(origin, error = %e, "invalid CORS origin, allowing any");
                AllowOrigin::any()
            }
        },
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}
