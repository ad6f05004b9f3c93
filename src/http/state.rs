//! Shared application state handed to every Axum handler.

use std::sync::Arc;

use crate::auth::ratelimit::LoginRateLimiter;
use crate::auth::session::SessionStore;
use crate::cache::manager::CacheManager;
use crate::config::Config;
use crate::ldap::pool::ConnectionPool;
use crate::template_cache::TemplateCache;

/// Cloned into every handler; everything behind an `Arc` so cloning is
/// cheap (spec §5: handlers never hold a cache lock across directory or
/// session I/O — they only hold `Arc`s to the subsystems that do their
/// own fine-grained locking).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: Arc<ConnectionPool>,
    /// `None` when no service account is configured (spec §4.2 "Disabled
    /// mode"): reads then fall through to per-request user-bound clients.
    pub cache: Option<Arc<CacheManager>>,
    pub sessions: Arc<dyn SessionStore>,
    pub rate_limiter: Arc<LoginRateLimiter>,
    pub template_cache: Arc<TemplateCache>,
}
