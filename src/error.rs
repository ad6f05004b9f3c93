//! Crate-wide error taxonomy and its mapping onto HTTP responses.
//!
//! Subsystems (`ldap::pool`, `cache::manager`, `auth::session`, ...) define
//! their own narrow error enums; this module only unifies them at the
//! boundary where a handler turns a `Result` into a response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::auth::session::SessionError;
use crate::cache::manager::CacheManagerError;
use crate::ldap::pool::PoolError;

/// Top-level error type returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The requested user/group/computer does not exist in the cache.
    #[error("not found")]
    NotFound,

    /// Bad credentials, expired/missing session, or CSRF mismatch.
    #[error("authentication failure")]
    AuthFailure,

    /// Caller exceeded the login rate limit.
    #[error("rate limited")]
    RateLimited,

    /// A directory bind/search/modify call failed.
    #[error("directory error")]
    Upstream(#[from] ldap3::LdapError),

    /// Connection pool could not hand out a connection in time.
    #[error("pool exhausted")]
    Pool(#[from] PoolError),

    /// Cache manager lookup/mutation error.
    #[error("cache error")]
    Cache(#[from] CacheManagerError),

    /// Session store I/O error.
    #[error("session error")]
    Session(#[from] SessionError),

    /// Anything else; never shown to the user in detail.
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Errors are logged with full detail server-side; the client only
        // ever sees the short, non-disclosing summary below.
        tracing::warn!(error = %self, "request failed");

        let (status, message) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "not found"),
            AppError::AuthFailure => (StatusCode::UNAUTHORIZED, "authentication required"),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "too many attempts"),
            AppError::Upstream(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "the directory server could not complete the request",
            ),
            AppError::Pool(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "the directory connection pool is busy, please retry",
            ),
            AppError::Cache(_) => (StatusCode::NOT_FOUND, "not found"),
            AppError::Session(_) => (StatusCode::UNAUTHORIZED, "authentication required"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal error"),
        };

        (status, axum::Json(json!({ "error": message }))).into_response()
    }
}
