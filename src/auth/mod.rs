//! Authentication, session, and rate-limiting layer (spec §4.4).

pub mod csrf;
pub mod middleware;
pub mod ratelimit;
pub mod session;

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Form, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect, Response};
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::json;
use zeroize::Zeroizing;

use crate::error::AppError;
use crate::http::state::AppState;
use crate::ldap::client::DirectoryClient;
use crate::ldap::pool::PoolHandle;
use session::Session;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("too many attempts")]
    RateLimited,
}

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub csrf_token: String,
}

/// An empty-`dn` session exists solely to anchor a CSRF token until the
/// caller authenticates (spec §4.4: "CSRF tokens bound to the session").
fn anonymous_session() -> Session {
    let now = Utc::now();
    Session {
        dn: String::new(),
        password: Zeroizing::new(String::new()),
        username: String::new(),
        created_at: now,
        expires_at: now + ChronoDuration::minutes(10),
        csrf_token: None,
        csrf_issued_at: None,
    }
}

/// `GET /login` (spec §6). Issues a fresh anonymous session carrying a
/// CSRF token, for the submitted form to echo back.
pub async fn login_page(State(state): State<AppState>) -> Result<Response, AppError> {
    let mut session = anonymous_session();
    let token = csrf::issue(&mut session);
    let cookie = state.sessions.create(session).await?;

    Ok((
        [(axum::http::header::SET_COOKIE, format_set_cookie(&cookie, state.config.cookie_secure))],
        axum::Json(json!({ "csrf_token": token })),
    )
        .into_response())
}

/// Derive `username@domain` from the configured Base DN, used to bind
/// directly when no service account is configured (spec §4.4).
pub fn username_at_domain(base_dn: &str, username: &str) -> String {
    let domain = base_dn
        .split(',')
        .filter_map(|rdn| rdn.trim().strip_prefix("dc="))
        .collect::<Vec<_>>()
        .join(".");
    if domain.is_empty() {
        username.to_string()
    } else {
        format!("{username}@{domain}")
    }
}

/// Validate `username`/`password` against the upstream directory,
/// returning the bound client and the DN it ended up bound as (spec
/// §4.4). Two modes:
///
/// - A read-only service account is configured (`Config::cache_enabled`):
///   bind as the service account, search for the submitted username to
///   resolve its DN, then bind again as that DN with the submitted
///   password. This is the only mode that works for directories (e.g.
///   plain OpenLDAP) where users aren't addressable as `user@domain`.
/// - No service account: bind directly as `username@domain`, since
///   there's no account available to search with first.
async fn authenticate(
    state: &AppState,
    username: &str,
    password: &str,
) -> Result<(DirectoryClient, String), ldap3::LdapError> {
    match (&state.config.ldap_readonly_user, &state.config.ldap_readonly_password) {
        (Some(service_dn), Some(service_password)) => {
            let mut service_client = DirectoryClient::user_bound_client(
                &state.config.ldap_server,
                &state.config.ldap_base_dn,
                service_dn,
                service_password,
                state.config.ldap_is_ad,
                state.config.pool.connection_timeout,
            )
            .await?;

            let resolved_dn = service_client
                .find_dn_by_username(username)
                .await?
                .ok_or(ldap3::LdapError::AdapterInit("no such user".to_string()))?;
            let _ = service_client.unbind().await;

            let user_client = DirectoryClient::user_bound_client(
                &state.config.ldap_server,
                &state.config.ldap_base_dn,
                &resolved_dn,
                password,
                state.config.ldap_is_ad,
                state.config.pool.connection_timeout,
            )
            .await?;
            Ok((user_client, resolved_dn))
        }
        _ => {
            let bind_dn = username_at_domain(&state.config.ldap_base_dn, username);
            let client = DirectoryClient::user_bound_client(
                &state.config.ldap_server,
                &state.config.ldap_base_dn,
                &bind_dn,
                password,
                state.config.ldap_is_ad,
                state.config.pool.connection_timeout,
            )
            .await?;
            Ok((client, bind_dn))
        }
    }
}

/// `POST /login` (spec §4.4, §6). Validates via the upstream directory
/// either by binding the service account and verifying the user's
/// password, or (if no service account) by binding directly as
/// `username@domain`.
pub async fn login_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    if !state.rate_limiter.check(addr.ip()) {
        return Err(AppError::RateLimited);
    }

    let pending_cookie = extract_cookie(&headers);
    let pending = match &pending_cookie {
        Some(cookie) => state.sessions.load(cookie).await?,
        None => None,
    };
    match &pending {
        Some(anon) if csrf::validate(anon, &form.csrf_token) => {}
        _ => return Err(AppError::AuthFailure),
    }

    let bind_result = authenticate(&state, &form.username, &form.password).await;

    match bind_result {
        Ok((client, bind_dn)) => {
            let _ = client.unbind().await;
            state.rate_limiter.record_success(addr.ip());
            if let Some(cookie) = &pending_cookie {
                let _ = state.sessions.destroy(cookie).await;
            }

            let now = Utc::now();
            let session = Session {
                dn: bind_dn,
                password: Zeroizing::new(form.password),
                username: form.username,
                created_at: now,
                expires_at: now + ChronoDuration::from_std(state.config.session_duration).unwrap_or(ChronoDuration::hours(8)),
                csrf_token: None,
                csrf_issued_at: None,
            };
            let cookie = state.sessions.create(session).await?;
            Ok((
                [(
                    axum::http::header::SET_COOKIE,
                    format_set_cookie(&cookie, state.config.cookie_secure),
                )],
                Redirect::to("/"),
            )
                .into_response())
        }
        Err(_) => {
            state.rate_limiter.record_failure(addr.ip());
            Ok(Redirect::to("/login?error=invalid_credentials").into_response())
        }
    }
}

/// `GET /logout` (spec §4.4). Destroys the session and redirects to
/// login. The session's password field is scrubbed on drop (it's a
/// `Zeroizing<String>`), satisfying the Design Notes' SHOULD.
pub async fn logout_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AppError> {
    if let Some(cookie) = extract_cookie(&headers) {
        state.sessions.destroy(&cookie).await?;
    }
    Ok((
        [(
            axum::http::header::SET_COOKIE,
            format!("{}=; Max-Age=0; Path=/", middleware::SESSION_COOKIE_NAME),
        )],
        Redirect::to("/login"),
    )
        .into_response())
}

fn extract_cookie(headers: &axum::http::HeaderMap) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    header.split(';').find_map(|pair| {
        let pair = pair.trim();
        let (key, value) = pair.split_once('=')?;
        (key == middleware::SESSION_COOKIE_NAME).then(|| value.to_string())
    })
}

fn format_set_cookie(cookie: &str, secure: bool) -> String {
    let secure_flag = if secure { "; Secure" } else { "" };
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Strict{}",
        middleware::SESSION_COOKIE_NAME,
        cookie,
        secure_flag
    )
}

/// Construct an LDAP client bound with the caller's own session
/// credentials, for use on a write path that must act as the logged-in
/// user rather than the service account. The caller is responsible for
/// releasing the returned handle back to the pool.
pub async fn get_user_ldap<'a>(state: &'a AppState, session: &Session) -> Result<PoolHandle<'a>, AppError> {
    state
        .pool
        .get_with_credentials(&session.dn, &session.password)
        .await
        .map_err(AppError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_at_domain_derives_from_base_dn() {
        assert_eq!(
            username_at_domain("dc=example,dc=org", "john.doe"),
            "john.doe@example.org"
        );
    }

    #[test]
    fn username_at_domain_falls_back_without_dc_components() {
        assert_eq!(username_at_domain("o=example", "john.doe"), "john.doe");
    }
}
