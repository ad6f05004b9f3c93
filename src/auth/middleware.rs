//! `RequireAuth` / `OptionalAuth` middleware (spec §4.4).
//!
//! Both load the session from the cookie; `RequireAuth` redirects to
//! `/login` on anything but a valid session, `OptionalAuth` never blocks
//! and simply leaves the caller DN empty.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};

use crate::http::state::AppState;

pub const SESSION_COOKIE_NAME: &str = "ldap_manager_session";

/// The authenticated caller's DN, attached to the request by the
/// middleware and pulled out by handlers via `Extension<CallerDn>`.
#[derive(Debug, Clone, Default)]
pub struct CallerDn(pub String);

fn cookie_value(request: &Request, name: &str) -> Option<String> {
    let header = request.headers().get(header::COOKIE)?.to_str().ok()?;
    header.split(';').find_map(|pair| {
        let pair = pair.trim();
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

/// Loads the session; if fresh or missing/empty `dn`, redirects to
/// `/login`; else places the caller DN in the request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(cookie) = cookie_value(&request, SESSION_COOKIE_NAME) else {
        return Redirect::to("/login").into_response();
    };

    match state.sessions.load(&cookie).await {
        Ok(Some(session)) if session.is_valid() => {
            request.extensions_mut().insert(CallerDn(session.dn));
            next.run(request).await
        }
        _ => Redirect::to("/login").into_response(),
    }
}

/// Same as [`require_auth`] but never blocks: an absent or invalid
/// session simply yields an empty caller DN.
pub async fn optional_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let caller_dn = match cookie_value(&request, SESSION_COOKIE_NAME) {
        Some(cookie) => match state.sessions.load(&cookie).await {
            Ok(Some(session)) if session.is_valid() => CallerDn(session.dn),
            _ => CallerDn::default(),
        },
        None => CallerDn::default(),
    };
    request.extensions_mut().insert(caller_dn);
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;

    #[test]
    fn cookie_value_parses_among_multiple_cookies() {
        let request = HttpRequest::builder()
            .header(header::COOKIE, "a=1; ldap_manager_session=abc123; b=2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(cookie_value(&request, SESSION_COOKIE_NAME), Some("abc123".to_string()));
    }

    #[test]
    fn cookie_value_absent_returns_none() {
        let request = HttpRequest::builder().body(Body::empty()).unwrap();
        assert_eq!(cookie_value(&request, SESSION_COOKIE_NAME), None);
    }
}
