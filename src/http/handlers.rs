//! Thin JSON handlers over the core subsystems (spec §6, SPEC_FULL.md §6:
//! the templating engine itself is out of scope, but every handler here
//! exercises the Cache Manager, Template Result Cache, and Connection
//! Pool contracts end to end).

use axum::extract::{Extension, Form, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::auth::middleware::{CallerDn, SESSION_COOKIE_NAME};
use crate::auth::session::Session;
use crate::auth::{csrf, get_user_ldap};
use crate::error::AppError;
use crate::http::state::AppState;
use crate::ldap::entity::{Computer, FullComputer, FullGroup, FullUser, Group, User};
use crate::template_cache::{invalidate_for_mutation, EntityKindPaths};

fn cookie_value(headers: &axum::http::HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    header.split(';').find_map(|pair| {
        let pair = pair.trim();
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

async fn current_session(state: &AppState, headers: &axum::http::HeaderMap) -> Result<Session, AppError> {
    let cookie = cookie_value(headers, SESSION_COOKIE_NAME).ok_or(AppError::AuthFailure)?;
    let session = state.sessions.load(&cookie).await?.ok_or(AppError::AuthFailure)?;
    if !session.is_valid() {
        return Err(AppError::AuthFailure);
    }
    Ok(session)
}

// -- GET / (own detail) ---------------------------------------------------

pub async fn own_detail(State(state): State<AppState>, Extension(caller): Extension<CallerDn>) -> Result<Response, AppError> {
    let user = lookup_user(&state, &caller.0)?;
    Ok(Json(user).into_response())
}

// -- Users ------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ShowDisabledQuery {
    #[serde(rename = "show-disabled", default)]
    show_disabled: Option<String>,
}

impl ShowDisabledQuery {
    fn as_bool(&self) -> bool {
        matches!(self.show_disabled.as_deref(), Some("1") | Some("true"))
    }
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerDn>,
    Query(query): Query<ShowDisabledQuery>,
) -> Result<Response, AppError> {
    let show_disabled = query.as_bool();
    let query_pairs = vec![("show-disabled".to_string(), show_disabled.to_string())];
    let cache = state.cache.clone();

    let body = state
        .template_cache
        .render_with_cache("GET", "/users", &query_pairs, &caller.0, &[], move || async move {
            let users = cache.map(|c| c.find_users(show_disabled)).unwrap_or_default();
            serde_json::to_vec(&users).unwrap_or_default()
        })
        .await;

    Ok((StatusCode::OK, body).into_response())
}

pub async fn user_detail(State(state): State<AppState>, Path(user_dn): Path<String>) -> Result<Response, AppError> {
    let user = lookup_user(&state, &user_dn)?;
    let full = match &state.cache {
        Some(cache) => cache.populate_groups_for_user(user),
        None => FullUser {
            user,
            resolved_groups: Vec::new(),
        },
    };
    Ok(Json(full).into_response())
}

#[derive(Deserialize)]
pub struct GroupMembershipForm {
    #[serde(default)]
    pub addgroup: Option<String>,
    #[serde(default)]
    pub removegroup: Option<String>,
    pub csrf_token: String,
}

/// `POST /users/:userDN` (spec §6): `addgroup` XOR `removegroup`.
pub async fn update_user_groups(
    State(state): State<AppState>,
    Path(user_dn): Path<String>,
    headers: axum::http::HeaderMap,
    Form(form): Form<GroupMembershipForm>,
) -> Result<Response, AppError> {
    let session = current_session(&state, &headers).await?;
    if !csrf::validate(&session, &form.csrf_token) {
        return Err(AppError::AuthFailure);
    }

    let (group_dn, adding) = match (form.addgroup, form.removegroup) {
        (Some(g), None) => (g, true),
        (None, Some(g)) => (g, false),
        _ => return Err(AppError::AuthFailure),
    };

    {
        let mut handle = get_user_ldap(&state, &session).await?;
        let client = handle.client_mut();
        if adding {
            client.add_user_to_group(&user_dn, &group_dn).await?;
        } else {
            client.remove_user_from_group(&user_dn, &group_dn).await?;
        }
    }

    if let Some(cache) = &state.cache {
        if adding {
            cache.on_add_user_to_group(&user_dn, &group_dn);
        } else {
            cache.on_remove_user_from_group(&user_dn, &group_dn);
        }
    }
    invalidate_for_mutation(&state.template_cache, EntityKindPaths::User);

    Ok((StatusCode::OK, Json(json!({ "status": "ok" }))).into_response())
}

// -- Groups -------------------------------------------------------------------

pub async fn list_groups(State(state): State<AppState>, Extension(caller): Extension<CallerDn>) -> Result<Response, AppError> {
    let cache = state.cache.clone();
    let body = state
        .template_cache
        .render_with_cache("GET", "/groups", &[], &caller.0, &[], move || async move {
            let groups = cache.map(|c| c.find_groups()).unwrap_or_default();
            serde_json::to_vec(&groups).unwrap_or_default()
        })
        .await;
    Ok((StatusCode::OK, body).into_response())
}

pub async fn group_detail(
    State(state): State<AppState>,
    Path(group_dn): Path<String>,
    Query(query): Query<ShowDisabledQuery>,
) -> Result<Response, AppError> {
    let group = lookup_group(&state, &group_dn)?;
    let full = match &state.cache {
        Some(cache) => cache.populate_users_for_group(group, query.as_bool()),
        None => FullGroup {
            group,
            resolved_members: Vec::new(),
        },
    };
    Ok(Json(full).into_response())
}

#[derive(Deserialize)]
pub struct GroupMemberForm {
    #[serde(default)]
    pub adduser: Option<String>,
    #[serde(default)]
    pub removeuser: Option<String>,
    pub csrf_token: String,
}

/// `POST /groups/:groupDN` (spec §6): dual of `update_user_groups`.
pub async fn update_group_members(
    State(state): State<AppState>,
    Path(group_dn): Path<String>,
    headers: axum::http::HeaderMap,
    Form(form): Form<GroupMemberForm>,
) -> Result<Response, AppError> {
    let session = current_session(&state, &headers).await?;
    if !csrf::validate(&session, &form.csrf_token) {
        return Err(AppError::AuthFailure);
    }

    let (user_dn, adding) = match (form.adduser, form.removeuser) {
        (Some(u), None) => (u, true),
        (None, Some(u)) => (u, false),
        _ => return Err(AppError::AuthFailure),
    };

    {
        let mut handle = get_user_ldap(&state, &session).await?;
        let client = handle.client_mut();
        if adding {
            client.add_user_to_group(&user_dn, &group_dn).await?;
        } else {
            client.remove_user_from_group(&user_dn, &group_dn).await?;
        }
    }

    if let Some(cache) = &state.cache {
        if adding {
            cache.on_add_user_to_group(&user_dn, &group_dn);
        } else {
            cache.on_remove_user_from_group(&user_dn, &group_dn);
        }
    }
    invalidate_for_mutation(&state.template_cache, EntityKindPaths::Group);

    Ok((StatusCode::OK, Json(json!({ "status": "ok" }))).into_response())
}

// -- Computers (read-only) -----------------------------------------------------

pub async fn list_computers(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerDn>,
    Query(query): Query<ShowDisabledQuery>,
) -> Result<Response, AppError> {
    let show_disabled = query.as_bool();
    let query_pairs = vec![("show-disabled".to_string(), show_disabled.to_string())];
    let cache = state.cache.clone();
    let body = state
        .template_cache
        .render_with_cache("GET", "/computers", &query_pairs, &caller.0, &[], move || async move {
            let computers = cache.map(|c| c.find_computers(show_disabled)).unwrap_or_default();
            serde_json::to_vec(&computers).unwrap_or_default()
        })
        .await;
    Ok((StatusCode::OK, body).into_response())
}

pub async fn computer_detail(State(state): State<AppState>, Path(computer_dn): Path<String>) -> Result<Response, AppError> {
    let computer = lookup_computer(&state, &computer_dn)?;
    let full = match &state.cache {
        Some(cache) => cache.populate_groups_for_computer(computer),
        None => FullComputer {
            computer,
            resolved_groups: Vec::new(),
        },
    };
    Ok(Json(full).into_response())
}

// -- Debug ----------------------------------------------------------------------

pub async fn debug_cache(State(state): State<AppState>) -> impl IntoResponse {
    match &state.cache {
        Some(cache) => Json(json!({
            "warmed_up": cache.warmed_up(),
            "health": cache.health(),
            "hits": cache.metrics().hits(),
            "misses": cache.metrics().misses(),
            "refresh_errors": cache.metrics().refresh_errors(),
        })),
        None => Json(json!({ "enabled": false })),
    }
}

pub async fn debug_ldap_pool(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.pool.stats())
}

// -- Lookup helpers -------------------------------------------------------------
//
// Served from the Entity Cache when enabled. In disabled mode (spec
// §4.2 "Disabled mode") there is no cache to index against, so detail
// lookups 404; list endpoints above already degrade to an empty list in
// that mode. Mutations still work in disabled mode since they bind
// directly as the caller via `get_user_ldap`.

fn lookup_user(state: &AppState, dn: &str) -> Result<User, AppError> {
    state
        .cache
        .as_ref()
        .ok_or(AppError::NotFound)
        .and_then(|cache| cache.find_user_by_dn(dn).map_err(AppError::from))
}

fn lookup_group(state: &AppState, dn: &str) -> Result<Group, AppError> {
    state
        .cache
        .as_ref()
        .ok_or(AppError::NotFound)
        .and_then(|cache| cache.find_group_by_dn(dn).map_err(AppError::from))
}

fn lookup_computer(state: &AppState, dn: &str) -> Result<Computer, AppError> {
    state
        .cache
        .as_ref()
        .ok_or(AppError::NotFound)
        .and_then(|cache| cache.find_computer_by_dn(dn).map_err(AppError::from))
}
