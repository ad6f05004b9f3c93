//! Cache Manager (spec §4.2): owns the three Entity Caches, runs the
//! background refresh loop, and exposes the lookup, population, and
//! mutation-notification API that handlers use instead of talking to the
//! directory directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::entity::EntityCache;
use crate::cache::metrics::{CacheMetrics, Health};
use crate::ldap::client::DirectoryReader;
use crate::ldap::entity::{Computer, FullComputer, FullGroup, FullUser, Group, User};

#[derive(Debug, thiserror::Error)]
pub enum CacheManagerError {
    #[error("user not found")]
    UserNotFound,
    #[error("group not found")]
    GroupNotFound,
    #[error("computer not found")]
    ComputerNotFound,
}

/// Owns the three Entity Caches and the background refresh loop.
pub struct CacheManager {
    users: EntityCache<User>,
    groups: EntityCache<Group>,
    computers: EntityCache<Computer>,
    reader: Arc<dyn DirectoryReader>,
    metrics: CacheMetrics,
    warmed_up: AtomicBool,
    users_ever_populated: AtomicBool,
    groups_ever_populated: AtomicBool,
    computers_ever_populated: AtomicBool,
}

impl CacheManager {
    /// Construct an empty manager. `reader` is used only for read-only
    /// directory queries during refresh.
    pub fn new(reader: Arc<dyn DirectoryReader>) -> Self {
        Self {
            users: EntityCache::new(),
            groups: EntityCache::new(),
            computers: EntityCache::new(),
            reader,
            metrics: CacheMetrics::default(),
            warmed_up: AtomicBool::new(false),
            users_ever_populated: AtomicBool::new(false),
            groups_ever_populated: AtomicBool::new(false),
            computers_ever_populated: AtomicBool::new(false),
        }
    }

    pub fn warmed_up(&self) -> bool {
        self.warmed_up.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    pub fn health(&self) -> Health {
        // Health reflects only the most recent refresh pass (spec §4.2
        // step 3), not the lifetime-cumulative `refresh_errors` counter.
        let (errors, attempts) = self.metrics.last_refresh_error_rate();
        Health::from_error_rate(errors, attempts)
    }

    // -- Refresh protocol (spec §4.2) ---------------------------------

    /// Run one full refresh pass: each entity kind is attempted
    /// independently so one kind's failure never aborts the others.
    pub async fn refresh_once(&self) {
        self.metrics.begin_refresh();
        let mut errors = 0u32;

        match self.reader.find_users().await {
            Ok(users) => {
                self.users.set_all(users);
                self.users_ever_populated.store(true, Ordering::Release);
            }
            Err(err) => {
                tracing::warn!(%err, "user refresh failed");
                self.metrics.record_refresh_error();
                errors += 1;
            }
        }

        match self.reader.find_groups().await {
            Ok(groups) => {
                self.groups.set_all(groups);
                self.groups_ever_populated.store(true, Ordering::Release);
            }
            Err(err) => {
                tracing::warn!(%err, "group refresh failed");
                self.metrics.record_refresh_error();
                errors += 1;
            }
        }

        match self.reader.find_computers().await {
            Ok(computers) => {
                self.computers.set_all(computers);
                self.computers_ever_populated.store(true, Ordering::Release);
            }
            Err(err) => {
                tracing::warn!(%err, "computer refresh failed");
                self.metrics.record_refresh_error();
                errors += 1;
            }
        }

        self.metrics.end_refresh(errors, 3);

        if self.users_ever_populated.load(Ordering::Acquire)
            && self.groups_ever_populated.load(Ordering::Acquire)
            && self.computers_ever_populated.load(Ordering::Acquire)
        {
            // warmed_up transitions only false -> true, never back (spec
            // §3 invariant).
            self.warmed_up.store(true, Ordering::Release);
        }
    }

    /// Background refresh loop: an initial refresh, then one every
    /// `refresh_interval` until `stop` fires.
    pub async fn run(self: Arc<Self>, refresh_interval: Duration, mut stop: tokio::sync::watch::Receiver<bool>) {
        self.refresh_once().await;

        let mut ticker = tokio::time::interval(refresh_interval);
        ticker.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = ticker.tick() => self.refresh_once().await,
                _ = stop.changed() => {
                    if *stop.borrow() {
                        tracing::info!("cache manager refresh loop stopping");
                        break;
                    }
                }
            }
        }
    }

    // -- Lookups (spec §4.2) -------------------------------------------

    pub fn find_user_by_dn(&self, dn: &str) -> Result<User, CacheManagerError> {
        self.users.find_by_dn(dn).ok_or(CacheManagerError::UserNotFound)
    }

    pub fn find_user_by_sam_account_name(&self, name: &str) -> Result<User, CacheManagerError> {
        self.users
            .find_by_sam_account_name(name)
            .ok_or(CacheManagerError::UserNotFound)
    }

    pub fn find_group_by_dn(&self, dn: &str) -> Result<Group, CacheManagerError> {
        self.groups.find_by_dn(dn).ok_or(CacheManagerError::GroupNotFound)
    }

    pub fn find_computer_by_dn(&self, dn: &str) -> Result<Computer, CacheManagerError> {
        self.computers
            .find_by_dn(dn)
            .ok_or(CacheManagerError::ComputerNotFound)
    }

    pub fn find_users(&self, show_disabled: bool) -> Vec<User> {
        if show_disabled {
            self.users.get()
        } else {
            self.users.filter(|u| u.enabled)
        }
    }

    pub fn find_computers(&self, show_disabled: bool) -> Vec<Computer> {
        if show_disabled {
            self.computers.get()
        } else {
            self.computers.filter(|c| c.enabled)
        }
    }

    pub fn find_groups(&self) -> Vec<Group> {
        self.groups.get()
    }

    // -- Population helpers (spec §4.2, one-level expansion only) -----

    /// Resolve `user`'s parent groups. Unresolved DNs (stale relative to
    /// a Groups cache that hasn't refreshed yet) are dropped, never
    /// fatal (spec §5 "Ordering").
    pub fn populate_groups_for_user(&self, user: User) -> FullUser {
        let resolved_groups = user
            .groups
            .iter()
            .filter_map(|dn| self.groups.find_by_dn(dn))
            .collect();
        FullUser { user, resolved_groups }
    }

    pub fn populate_groups_for_computer(&self, computer: Computer) -> FullComputer {
        let resolved_groups = computer
            .groups
            .iter()
            .filter_map(|dn| self.groups.find_by_dn(dn))
            .collect();
        FullComputer { computer, resolved_groups }
    }

    pub fn populate_users_for_group(&self, group: Group, show_disabled: bool) -> FullGroup {
        let resolved_members = group
            .members
            .iter()
            .filter_map(|dn| self.users.find_by_dn(dn))
            .filter(|u| show_disabled || u.enabled)
            .collect();
        FullGroup { group, resolved_members }
    }

    // -- Mutation notifications (spec §4.2) ----------------------------

    /// Patch the affected User's `groups` and Group's `members` in place
    /// after a successful directory `add` modification. Each cache
    /// rebuilds its own indexes under its own lock (spec §5); an
    /// observer may briefly see one side updated before the other.
    pub fn on_add_user_to_group(&self, user_dn: &str, group_dn: &str) {
        self.users.update_one(user_dn, |u| {
            if !u.groups.iter().any(|g| g == group_dn) {
                u.groups.push(group_dn.to_string());
            }
        });
        self.groups.update_one(group_dn, |g| {
            if !g.members.iter().any(|m| m == user_dn) {
                g.members.push(user_dn.to_string());
            }
        });
    }

    /// Dual of [`Self::on_add_user_to_group`].
    pub fn on_remove_user_from_group(&self, user_dn: &str, group_dn: &str) {
        self.users.update_one(user_dn, |u| {
            u.groups.retain(|g| g != group_dn);
        });
        self.groups.update_one(group_dn, |g| {
            g.members.retain(|m| m != user_dn);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeReader {
        users: Vec<User>,
        groups: Mutex<Option<Vec<Group>>>, // None -> error once
        computers: Vec<Computer>,
    }

    #[async_trait]
    impl DirectoryReader for FakeReader {
        async fn find_users(&self) -> Result<Vec<User>, ldap3::LdapError> {
            Ok(self.users.clone())
        }
        async fn find_groups(&self) -> Result<Vec<Group>, ldap3::LdapError> {
            match self.groups.lock().unwrap().clone() {
                Some(groups) => Ok(groups),
                None => Err(ldap3::LdapError::from(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "simulated directory failure",
                ))),
            }
        }
        async fn find_computers(&self) -> Result<Vec<Computer>, ldap3::LdapError> {
            Ok(self.computers.clone())
        }
    }

    fn user(dn: &str, enabled: bool) -> User {
        User {
            dn: dn.into(),
            sam_account_name: Some(dn.trim_start_matches("cn=").to_string()),
            display_name: dn.into(),
            enabled,
            groups: vec![],
        }
    }

    #[tokio::test]
    async fn refresh_tolerates_partial_failure() {
        let reader = Arc::new(FakeReader {
            users: vec![user("cn=john", true)],
            groups: Mutex::new(None),
            computers: vec![Computer {
                dn: "cn=pc1".into(),
                sam_account_name: None,
                display_name: "pc1".into(),
                enabled: true,
                groups: vec![],
            }],
        });
        let manager = CacheManager::new(reader);
        manager.refresh_once().await;

        assert_eq!(manager.find_users(true).len(), 1);
        assert_eq!(manager.find_groups().len(), 0);
        assert_eq!(manager.find_computers(true).len(), 1);
        assert_eq!(manager.metrics().refresh_errors(), 1);
        // 1 of 3 kinds failing is a 33% error rate for this pass, above
        // the 10% degraded/unhealthy threshold.
        assert_eq!(manager.health(), Health::Unhealthy);
        assert!(!manager.warmed_up(), "groups never populated, so not warmed up yet");
    }

    #[tokio::test]
    async fn health_recovers_after_a_clean_refresh_following_a_failed_one() {
        let groups = Mutex::new(None);
        let reader = Arc::new(FakeReader {
            users: vec![user("cn=john", true)],
            groups,
            computers: vec![],
        });
        let manager = CacheManager::new(reader.clone());
        manager.refresh_once().await;
        assert_eq!(manager.health(), Health::Unhealthy);

        *reader.groups.lock().unwrap() = Some(vec![]);
        manager.refresh_once().await;

        assert_eq!(manager.health(), Health::Healthy, "a clean pass must clear health even though refresh_errors never resets");
        assert_eq!(manager.metrics().refresh_errors(), 1, "the lifetime counter still remembers the earlier failure");
    }

    #[tokio::test]
    async fn warmed_up_flips_once_all_three_kinds_succeed() {
        let reader = Arc::new(FakeReader {
            users: vec![user("cn=john", true)],
            groups: Mutex::new(Some(vec![])),
            computers: vec![],
        });
        let manager = CacheManager::new(reader);
        assert!(!manager.warmed_up());
        manager.refresh_once().await;
        assert!(manager.warmed_up());
        manager.refresh_once().await;
        assert!(manager.warmed_up(), "warmed_up never reverts to false");
    }

    #[tokio::test]
    async fn add_and_remove_user_from_group_round_trips() {
        let reader = Arc::new(FakeReader {
            users: vec![user("cn=john", true)],
            groups: Mutex::new(Some(vec![Group {
                dn: "cn=admins".into(),
                sam_account_name: None,
                display_name: "admins".into(),
                members: vec![],
            }])),
            computers: vec![],
        });
        let manager = CacheManager::new(reader);
        manager.refresh_once().await;

        manager.on_add_user_to_group("cn=john", "cn=admins");
        assert!(manager.find_user_by_dn("cn=john").unwrap().groups.contains(&"cn=admins".to_string()));
        assert!(manager.find_group_by_dn("cn=admins").unwrap().members.contains(&"cn=john".to_string()));

        manager.on_remove_user_from_group("cn=john", "cn=admins");
        assert!(manager.find_user_by_dn("cn=john").unwrap().groups.is_empty());
        assert!(manager.find_group_by_dn("cn=admins").unwrap().members.is_empty());
    }

    #[tokio::test]
    async fn populate_helpers_drop_unresolved_dns_without_recursing() {
        let reader = Arc::new(FakeReader {
            users: vec![user("cn=john", true)],
            groups: Mutex::new(Some(vec![])),
            computers: vec![],
        });
        let manager = CacheManager::new(reader);
        manager.refresh_once().await;

        let mut u = manager.find_user_by_dn("cn=john").unwrap();
        u.groups = vec!["cn=ghost".into()];
        let full = manager.populate_groups_for_user(u);
        assert!(full.resolved_groups.is_empty());
    }
}
