//! Credential-aware connection pool (spec §4.3).
//!
//! Grounded on the health-checked, background-reaped pool pattern the
//! corpus uses for its SQL connection pool, adapted to LDAP binds and to
//! the credential-isolation requirement: a connection is only ever handed
//! back to a caller who asked for the exact credentials it was bound
//! with (invariant 5 in spec §8).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use zeroize::Zeroizing;

use crate::config::PoolConfig;
use crate::ldap::client::DirectoryClient;

/// Credentials the reaper uses to keep at least `min_connections` warm
/// (spec §4.3 Lifecycle rules). Set via [`ConnectionPool::with_floor_credentials`];
/// there's no floor at all unless the deployment has a fixed identity to
/// replenish with, since the pool is otherwise keyed on arbitrary,
/// unknown-in-advance per-user credentials.
struct FloorCredentials {
    dn: String,
    password: Zeroizing<String>,
}

/// The credentials an LDAP connection is bound with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub dn: String,
    /// A non-reversible marker, not the plaintext password, so the pool's
    /// connection table never holds a secret at rest.
    password_marker: String,
}

impl Credentials {
    pub fn new(dn: impl Into<String>, password: &str) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        Self {
            dn: dn.into(),
            password_marker: format!("{:x}", hasher.finalize()),
        }
    }
}

struct PooledConnection {
    client: Option<DirectoryClient>,
    credentials: Credentials,
    created_at: Instant,
    last_used_at: Instant,
    healthy: bool,
    in_use: bool,
}

/// Snapshot of pool counters and gauges (spec §3/§4.3 `Stats`).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PoolStats {
    pub total: u64,
    pub active: u64,
    pub available: u64,
    pub acquired: u64,
    pub failed: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("connection pool is closed")]
    Closed,
    #[error("timed out waiting for an available connection")]
    AcquireTimeout,
    #[error("ldap bind failed: {0}")]
    BindFailed(#[from] ldap3::LdapError),
    #[error("connection health check failed")]
    HealthCheckFailed,
}

struct Table {
    connections: Vec<PooledConnection>,
    closed: bool,
}

/// A bounded pool of LDAP binds, keyed by the credentials each connection
/// was opened with.
pub struct ConnectionPool {
    server: String,
    base_dn: String,
    is_ad: bool,
    config: PoolConfig,
    table: Mutex<Table>,
    slots: Semaphore,
    acquired: AtomicU64,
    failed: AtomicU64,
    floor: Option<FloorCredentials>,
}

impl ConnectionPool {
    pub fn new(server: impl Into<String>, base_dn: impl Into<String>, is_ad: bool, config: PoolConfig) -> Self {
        Self {
            server: server.into(),
            base_dn: base_dn.into(),
            is_ad,
            config,
            table: Mutex::new(Table {
                connections: Vec::new(),
                closed: false,
            }),
            slots: Semaphore::new(config.max_connections),
            acquired: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            floor: None,
        }
    }

    /// Have the reaper keep at least `config.min_connections` idle
    /// connections open under `dn`/`password`, opening fresh ones on its
    /// tick whenever the count for that identity drops below the floor.
    pub fn with_floor_credentials(mut self, dn: impl Into<String>, password: impl Into<String>) -> Self {
        self.floor = Some(FloorCredentials {
            dn: dn.into(),
            password: Zeroizing::new(password.into()),
        });
        self
    }

    /// Acquire a connection bound with exactly `dn`/`password`. Reuses an
    /// idle, healthy, unexpired connection with matching credentials if
    /// one exists; otherwise opens a new one, subject to
    /// `max_connections` and `acquire_timeout`.
    pub async fn get_with_credentials(&self, dn: &str, password: &str) -> Result<PoolHandle<'_>, PoolError> {
        let creds = Credentials::new(dn, password);

        if self.table.lock().closed {
            return Err(PoolError::Closed);
        }

        // Fast path: an idle connection with matching credentials.
        if let Some(client) = self.take_matching(&creds) {
            self.acquired.fetch_add(1, Ordering::Relaxed);
            return Ok(PoolHandle {
                pool: self,
                client: Some(client),
                credentials: creds,
            });
        }

        let permit = timeout(self.config.acquire_timeout, self.slots.acquire())
            .await
            .map_err(|_| PoolError::AcquireTimeout)?
            .expect("semaphore never closed");
        permit.forget();

        // Another waiter may have released a matching connection while we
        // queued for a slot; check again before opening a fresh one.
        if let Some(client) = self.take_matching(&creds) {
            self.slots.add_permits(1);
            self.acquired.fetch_add(1, Ordering::Relaxed);
            return Ok(PoolHandle {
                pool: self,
                client: Some(client),
                credentials: creds,
            });
        }

        match DirectoryClient::connect(
            &self.server,
            &self.base_dn,
            dn,
            password,
            self.is_ad,
            self.config.connection_timeout,
        )
        .await
        {
            Ok(client) => {
                self.acquired.fetch_add(1, Ordering::Relaxed);
                self.table.lock().connections.push(PooledConnection {
                    client: None,
                    credentials: creds.clone(),
                    created_at: Instant::now(),
                    last_used_at: Instant::now(),
                    healthy: true,
                    in_use: true,
                });
                Ok(PoolHandle {
                    pool: self,
                    client: Some(client),
                    credentials: creds,
                })
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.slots.add_permits(1);
                Err(PoolError::BindFailed(err))
            }
        }
    }

    /// Acquire a connection bound with the configured service account.
    pub async fn get(&self, service_dn: &str, service_password: &str) -> Result<PoolHandle<'_>, PoolError> {
        self.get_with_credentials(service_dn, service_password).await
    }

    fn take_matching(&self, creds: &Credentials) -> Option<DirectoryClient> {
        let mut table = self.table.lock();
        let now = Instant::now();
        let idx = table.connections.iter().position(|c| {
            !c.in_use
                && c.healthy
                && c.credentials == *creds
                && now.duration_since(c.created_at) < self.config.max_lifetime
        })?;
        let conn = &mut table.connections[idx];
        conn.in_use = true;
        conn.last_used_at = now;
        conn.client.take()
    }

    fn release(&self, credentials: &Credentials, client: DirectoryClient, healthy: bool) {
        let mut table = self.table.lock();
        if table.closed {
            return;
        }
        let Some(pos) = table
            .connections
            .iter()
            .position(|c| c.in_use && c.credentials == *credentials && c.client.is_none())
        else {
            return;
        };

        let expired = {
            let slot = &table.connections[pos];
            Instant::now().duration_since(slot.created_at) >= self.config.max_lifetime
        };

        if healthy && !expired {
            let slot = &mut table.connections[pos];
            slot.client = Some(client);
            slot.in_use = false;
            slot.healthy = true;
            slot.last_used_at = Instant::now();
        } else {
            // Unhealthy or past its lifetime: drop the slot and release a
            // permit so a future acquire can open a replacement.
            table.connections.remove(pos);
            self.slots.add_permits(1);
        }
    }

    /// Close every connection; subsequent acquires fail with
    /// [`PoolError::Closed`].
    pub async fn close(&self) {
        let mut table = self.table.lock();
        table.closed = true;
        let conns: Vec<DirectoryClient> = table
            .connections
            .iter_mut()
            .filter_map(|c| c.client.take())
            .collect();
        table.connections.clear();
        drop(table);
        for client in conns {
            let _ = client.unbind().await;
        }
    }

    /// `true` unless [`Self::close`] has run; a closed pool fails every
    /// acquire, so it should never be reported as ready.
    pub fn is_healthy(&self) -> bool {
        !self.table.lock().closed
    }

    /// Snapshot of counters and gauges.
    pub fn stats(&self) -> PoolStats {
        let table = self.table.lock();
        let active = table.connections.iter().filter(|c| c.in_use).count() as u64;
        let available = table.connections.iter().filter(|c| !c.in_use).count() as u64;
        PoolStats {
            total: table.connections.len() as u64,
            active,
            available,
            acquired: self.acquired.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Close idle connections past `max_idle_time` or `max_lifetime`, mark
    /// unhealthy ones for removal, then replenish up to `min_connections`
    /// for the floor identity (if one is configured). Intended to be
    /// driven by a background reaper task on `health_check_interval`.
    pub async fn reap_idle(&self) {
        let removed = {
            let mut table = self.table.lock();
            let now = Instant::now();
            let before = table.connections.len();
            table.connections.retain(|c| {
                if c.in_use {
                    return true;
                }
                let idle_too_long = now.duration_since(c.last_used_at) > self.config.max_idle_time;
                let too_old = now.duration_since(c.created_at) > self.config.max_lifetime;
                !(idle_too_long || too_old || !c.healthy)
            });
            before - table.connections.len()
        };
        if removed > 0 {
            self.slots.add_permits(removed);
        }

        self.replenish_floor().await;
    }

    /// Open fresh connections under the floor identity until it has
    /// `min_connections` idle ones, or until a bind fails, or until the
    /// pool's `max_connections` cap leaves no slot free.
    async fn replenish_floor(&self) {
        let Some(floor) = &self.floor else { return };
        loop {
            {
                let table = self.table.lock();
                if table.closed {
                    return;
                }
                let have = table.connections.iter().filter(|c| c.credentials.dn == floor.dn).count();
                if have >= self.config.min_connections {
                    return;
                }
            }

            let Ok(permit) = self.slots.try_acquire() else {
                return;
            };
            permit.forget();

            match DirectoryClient::connect(&self.server, &self.base_dn, &floor.dn, &floor.password, self.is_ad, self.config.connection_timeout).await {
                Ok(client) => {
                    self.table.lock().connections.push(PooledConnection {
                        client: Some(client),
                        credentials: Credentials::new(&floor.dn, &floor.password),
                        created_at: Instant::now(),
                        last_used_at: Instant::now(),
                        healthy: true,
                        in_use: false,
                    });
                }
                Err(err) => {
                    tracing::warn!(%err, "failed to replenish pool floor connection");
                    self.slots.add_permits(1);
                    return;
                }
            }
        }
    }

    /// Spawn the background reaper loop under supervision; returns a
    /// `watch::Sender` the caller signals to stop it.
    pub fn spawn_reaper(self: std::sync::Arc<Self>) -> tokio::sync::watch::Sender<bool> {
        let (tx, rx) = tokio::sync::watch::channel(false);
        let interval_dur = self.config.health_check_interval;
        crate::shutdown::spawn_supervised("ldap-pool-reaper", move || {
            let pool = self.clone();
            let mut rx = rx.clone();
            async move {
                let mut ticker = tokio::time::interval(interval_dur);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => pool.reap_idle().await,
                        _ = rx.changed() => {
                            if *rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            }
        });
        tx
    }
}

/// An acquired connection. `Drop` panics-safely returns it to the pool
/// (marked healthy) unless [`PoolHandle::mark_unhealthy`] was called.
pub struct PoolHandle<'a> {
    pool: &'a ConnectionPool,
    client: Option<DirectoryClient>,
    credentials: Credentials,
}

impl<'a> PoolHandle<'a> {
    pub fn client_mut(&mut self) -> &mut DirectoryClient {
        self.client.as_mut().expect("client present until drop")
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Mark this connection as unhealthy so it is closed rather than
    /// returned to the pool on drop.
    pub fn mark_unhealthy(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.release(&self.credentials, client, false);
        }
    }
}

impl Drop for PoolHandle<'_> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.release(&self.credentials, client, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_never_store_the_plaintext_password() {
        let creds = Credentials::new("cn=alice", "hunter2");
        assert_ne!(creds.password_marker, "hunter2");
        assert_eq!(creds.password_marker.len(), 64); // sha256 hex
    }

    #[test]
    fn credentials_with_same_dn_differ_by_password() {
        let a = Credentials::new("cn=alice", "pw-a");
        let b = Credentials::new("cn=alice", "pw-b");
        assert_ne!(a, b);
    }

    #[test]
    fn pool_stats_start_empty() {
        let pool = ConnectionPool::new("ldap://localhost", "dc=example,dc=org", false, PoolConfig::default());
        let stats = pool.stats();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.acquired, 0);
    }

    #[test]
    fn pool_is_healthy_until_closed() {
        let pool = ConnectionPool::new("ldap://localhost", "dc=example,dc=org", false, PoolConfig::default());
        assert!(pool.is_healthy());
    }

    #[tokio::test]
    async fn pool_is_unhealthy_after_close() {
        let pool = ConnectionPool::new("ldap://localhost", "dc=example,dc=org", false, PoolConfig::default());
        pool.close().await;
        assert!(!pool.is_healthy());
    }

    #[tokio::test]
    async fn reap_idle_is_a_no_op_without_floor_credentials() {
        // No floor configured: replenish_floor must return immediately
        // rather than trying to dial out, since there's no identity to
        // dial as.
        let pool = ConnectionPool::new("ldap://localhost", "dc=example,dc=org", false, PoolConfig::default());
        pool.reap_idle().await;
        assert_eq!(pool.stats().total, 0);
    }
}
