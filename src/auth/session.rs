//! Session store (spec §3 "Session", §4.4). Two back-ends are supported:
//! an ephemeral in-memory map and an embedded key-value file, selected by
//! `PERSIST_SESSIONS`. Both implement the same [`SessionStore`] trait so
//! the rest of the auth gate never needs to know which one is active.

use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session storage failure: {0}")]
    Storage(String),
    #[error("session not found")]
    NotFound,
}

/// Session data keyed by an opaque cookie (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub dn: String,
    /// Kept in memory so per-request user-bound LDAP binds don't require
    /// re-prompting (Design Notes); zeroized on drop.
    pub password: Zeroizing<String>,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// CSRF token issued for this session, and when it was issued
    /// (spec §4.4: one-hour lifetime, survives process restart when
    /// sessions persist).
    pub csrf_token: Option<String>,
    pub csrf_issued_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// A session is usable only if it's fresh and `dn` is non-empty
    /// (spec §4.4 `RequireAuth`: "if fresh or missing/empty dn, redirect").
    pub fn is_valid(&self) -> bool {
        !self.dn.is_empty() && !self.is_expired()
    }
}

/// Storage back-end for sessions. Implementations never hold an
/// Entity Cache lock across this I/O (spec §5).
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: Session) -> Result<String, SessionError>;
    async fn load(&self, cookie: &str) -> Result<Option<Session>, SessionError>;
    async fn store(&self, cookie: &str, session: Session) -> Result<(), SessionError>;
    async fn destroy(&self, cookie: &str) -> Result<(), SessionError>;
}

fn new_cookie() -> String {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes).expect("system RNG must be available");
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Ephemeral, process-local session store.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: Session) -> Result<String, SessionError> {
        let cookie = new_cookie();
        self.sessions.insert(cookie.clone(), session);
        Ok(cookie)
    }

    async fn load(&self, cookie: &str) -> Result<Option<Session>, SessionError> {
        Ok(self.sessions.get(cookie).map(|s| s.clone()))
    }

    async fn store(&self, cookie: &str, session: Session) -> Result<(), SessionError> {
        self.sessions.insert(cookie.to_string(), session);
        Ok(())
    }

    async fn destroy(&self, cookie: &str) -> Result<(), SessionError> {
        self.sessions.remove(cookie);
        Ok(())
    }
}

/// Embedded key-value backed session store ("persist sessions"), a
/// single `sled` tree named `sessions` (spec §6 "Persisted state").
pub struct SledSessionStore {
    tree: sled::Tree,
}

impl SledSessionStore {
    pub fn open(path: &str) -> Result<Self, SessionError> {
        let db = sled::open(path).map_err(|e| SessionError::Storage(e.to_string()))?;
        let tree = db
            .open_tree("sessions")
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(Self { tree })
    }
}

#[async_trait::async_trait]
impl SessionStore for SledSessionStore {
    async fn create(&self, session: Session) -> Result<String, SessionError> {
        let cookie = new_cookie();
        self.store(&cookie, session).await?;
        Ok(cookie)
    }

    async fn load(&self, cookie: &str) -> Result<Option<Session>, SessionError> {
        let bytes = self
            .tree
            .get(cookie)
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        match bytes {
            None => Ok(None),
            Some(ivec) => serde_json::from_slice(&ivec)
                .map(Some)
                .map_err(|e| SessionError::Storage(e.to_string())),
        }
    }

    async fn store(&self, cookie: &str, session: Session) -> Result<(), SessionError> {
        let bytes = serde_json::to_vec(&session).map_err(|e| SessionError::Storage(e.to_string()))?;
        self.tree
            .insert(cookie, bytes)
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn destroy(&self, cookie: &str) -> Result<(), SessionError> {
        self.tree
            .remove(cookie)
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(())
    }
}

/// Build the configured session store.
pub fn build_store(persist: bool, path: &str) -> Result<Arc<dyn SessionStore>, SessionError> {
    if persist {
        Ok(Arc::new(SledSessionStore::open(path)?))
    } else {
        Ok(Arc::new(InMemorySessionStore::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_session(dn: &str) -> Session {
        Session {
            dn: dn.to_string(),
            password: Zeroizing::new("secret".to_string()),
            username: "john.doe".to_string(),
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::hours(1),
            csrf_token: None,
            csrf_issued_at: None,
        }
    }

    #[tokio::test]
    async fn create_then_load_round_trips() {
        let store = InMemorySessionStore::default();
        let cookie = store.create(sample_session("cn=john")).await.unwrap();
        let loaded = store.load(&cookie).await.unwrap().unwrap();
        assert_eq!(loaded.dn, "cn=john");
    }

    #[tokio::test]
    async fn destroy_removes_the_session() {
        let store = InMemorySessionStore::default();
        let cookie = store.create(sample_session("cn=john")).await.unwrap();
        store.destroy(&cookie).await.unwrap();
        assert!(store.load(&cookie).await.unwrap().is_none());
    }

    #[test]
    fn expired_or_empty_dn_sessions_are_invalid() {
        let mut s = sample_session("cn=john");
        assert!(s.is_valid());

        s.expires_at = Utc::now() - Duration::seconds(1);
        assert!(!s.is_valid());

        let mut s2 = sample_session("");
        s2.expires_at = Utc::now() + Duration::hours(1);
        assert!(!s2.is_valid());
    }
}
