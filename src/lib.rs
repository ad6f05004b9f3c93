//! Core of a web-based LDAP directory manager: an Entity Cache kept warm
//! by a background Cache Manager, a credential-aware Connection Pool, an
//! Auth/Session Gate, and a Template Result Cache, wired behind a thin
//! Axum HTTP surface.

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod ldap;
pub mod shutdown;
pub mod template_cache;
