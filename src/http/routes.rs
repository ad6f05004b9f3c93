//! Route table (spec §6).

use axum::middleware as axum_middleware;
use axum::routing::get;
use axum::Router;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::auth::middleware::{optional_auth, require_auth};
use crate::auth::{login_handler, login_page, logout_handler};
use crate::health::{health, health_live, health_ready};
use crate::http::handlers;
use crate::http::state::AppState;

/// Build the full Axum router. `static_dir` points at the directory of
/// static assets served under `/static/*` (spec §6, 24h `max-age`).
pub fn build(state: AppState, static_dir: &str) -> Router {
    let protected = Router::new()
        .route("/", get(handlers::own_detail))
        .route("/users", get(handlers::list_users))
        .route("/users/:user_dn", get(handlers::user_detail).post(handlers::update_user_groups))
        .route("/groups", get(handlers::list_groups))
        .route("/groups/:group_dn", get(handlers::group_detail).post(handlers::update_group_members))
        .route("/computers", get(handlers::list_computers))
        .route("/computers/:computer_dn", get(handlers::computer_detail))
        .route_layer(axum_middleware::from_fn_with_state(state.clone(), require_auth));

    let debug = Router::new()
        .route("/debug/cache", get(handlers::debug_cache))
        .route("/debug/ldap-pool", get(handlers::debug_ldap_pool))
        .route_layer(axum_middleware::from_fn_with_state(state.clone(), require_auth));

    let public = Router::new()
        .route("/login", get(login_page).post(login_handler))
        .route("/logout", get(logout_handler))
        .route("/health", get(health))
        .route("/health/ready", get(health_ready))
        .route("/health/live", get(health_live));

    let static_assets = Router::new().nest_service("/static", ServeDir::new(static_dir)).layer(
        SetResponseHeaderLayer::overriding(
            axum::http::header::CACHE_CONTROL,
            axum::http::HeaderValue::from_static("public, max-age=86400"),
        ),
    );

    Router::new()
        .merge(protected)
        .merge(debug)
        .merge(public)
        .merge(static_assets)
        .layer(axum_middleware::from_fn_with_state(state.clone(), optional_auth))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
