//! A thin wrapper over a bound `ldap3::Ldap` handle: binds, read-only
//! directory queries, and the single mutating operation the core exposes
//! (group membership add/remove). HTTP handlers and the Cache Manager
//! both go through this module rather than touching `ldap3` directly.

use std::time::Duration;

use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry};

use crate::ldap::entity::{Computer, Group, User};

/// Everything the Cache Manager needs to perform a read-only refresh.
/// Split out as a trait so refresh logic can be unit-tested against a
/// hand-written fake instead of a live directory.
#[async_trait]
pub trait DirectoryReader: Send + Sync {
    async fn find_users(&self) -> Result<Vec<User>, ldap3::LdapError>;
    async fn find_groups(&self) -> Result<Vec<Group>, ldap3::LdapError>;
    async fn find_computers(&self) -> Result<Vec<Computer>, ldap3::LdapError>;
}

/// A single LDAP connection, bound with one set of credentials.
pub struct DirectoryClient {
    ldap: ldap3::Ldap,
    base_dn: String,
    /// Active Directory's schema makes `computer` a subclass of `person`,
    /// so a plain `(objectClass=person)` filter would also return every
    /// computer account; OpenLDAP has no such overlap. Only matters for
    /// `find_users`' filter.
    is_ad: bool,
}

impl DirectoryClient {
    /// Open a new connection to `server` and bind as `dn`/`password`.
    /// The caller owns the returned client and is responsible for
    /// unbinding it (directly, or by returning it to a
    /// [`crate::ldap::pool::ConnectionPool`]).
    pub async fn connect(
        server: &str,
        base_dn: &str,
        dn: &str,
        password: &str,
        is_ad: bool,
        connect_timeout: Duration,
    ) -> Result<Self, ldap3::LdapError> {
        let settings = LdapConnSettings::new().set_conn_timeout(connect_timeout);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, server).await?;
        tokio::spawn(async move {
            if let Err(err) = conn.drive().await {
                tracing::warn!(%err, "ldap connection driver exited");
            }
        });

        ldap.simple_bind(dn, password).await?.success()?;

        Ok(Self {
            ldap,
            base_dn: base_dn.to_string(),
            is_ad,
        })
    }

    /// Open a short-lived, non-pooled connection bound as `dn`/`password`
    /// (spec §4.3 Open Question resolution): used where a caller needs a
    /// single bind-and-done round trip — e.g. validating login credentials
    /// — rather than a connection worth keeping warm in the pool.
    pub async fn user_bound_client(
        server: &str,
        base_dn: &str,
        dn: &str,
        password: &str,
        is_ad: bool,
        connect_timeout: Duration,
    ) -> Result<Self, ldap3::LdapError> {
        Self::connect(server, base_dn, dn, password, is_ad, connect_timeout).await
    }

    /// Close the underlying connection.
    pub async fn unbind(mut self) -> Result<(), ldap3::LdapError> {
        self.ldap.unbind().await
    }

    async fn search(&mut self, filter: &str, attrs: &[&str]) -> Result<Vec<SearchEntry>, ldap3::LdapError> {
        let (results, _) = self
            .ldap
            .search(&self.base_dn, Scope::Subtree, filter, attrs.to_vec())
            .await?
            .success()?;
        Ok(results.into_iter().map(SearchEntry::construct).collect())
    }

    fn first_attr(entry: &SearchEntry, name: &str) -> Option<String> {
        entry.attrs.get(name).and_then(|v| v.first()).cloned()
    }

    /// Resolve a submitted login name to its DN, for the bind-search-bind
    /// pattern (spec §4.4: service-account mode). `username` is taken
    /// verbatim from the request, so the filter must escape it rather
    /// than interpolate it raw.
    pub async fn find_dn_by_username(&mut self, username: &str) -> Result<Option<String>, ldap3::LdapError> {
        let filter = format!("(sAMAccountName={})", ldap3::ldap_escape(username));
        let entries = self.search(&filter, &["distinguishedName"]).await?;
        Ok(entries.into_iter().next().map(|e| e.dn))
    }

    /// "Enabled" as a single boolean, regardless of directory flavor.
    /// Active Directory packs it as the absence of bit 2 (0x2) in the
    /// integer `userAccountControl` (512 = enabled, 514 = disabled);
    /// OpenLDAP exposes it as a plain boolean-ish string attribute.
    fn bool_attr(entry: &SearchEntry, name: &str, is_ad: bool) -> bool {
        let Some(raw) = Self::first_attr(entry, name) else {
            return true;
        };
        if is_ad {
            raw.parse::<u32>().map(|uac| uac & 0x2 == 0).unwrap_or(true)
        } else {
            matches!(raw.as_str(), "TRUE" | "true" | "1")
        }
    }

    /// Add `user_dn` to `group_dn`'s member list.
    pub async fn add_user_to_group(&mut self, user_dn: &str, group_dn: &str) -> Result<(), ldap3::LdapError> {
        self.ldap
            .modify(group_dn, vec![Mod::Add("member", [user_dn].into())])
            .await?
            .success()?;
        Ok(())
    }

    /// Remove `user_dn` from `group_dn`'s member list.
    pub async fn remove_user_from_group(&mut self, user_dn: &str, group_dn: &str) -> Result<(), ldap3::LdapError> {
        self.ldap
            .modify(group_dn, vec![Mod::Delete("member", [user_dn].into())])
            .await?
            .success()?;
        Ok(())
    }
}

#[async_trait]
impl DirectoryReader for DirectoryClient {
    async fn find_users(&self) -> Result<Vec<User>, ldap3::LdapError> {
        // `search` takes `&mut self`; DirectoryReader is only ever called
        // through an owned client pulled fresh from the pool, so the
        // interior mutability here is local to that borrow.
        let mut this = self.clone_handle();
        let filter = if self.is_ad {
            "(&(objectClass=person)(!(objectClass=computer)))"
        } else {
            "(objectClass=person)"
        };
        let entries = this
            .search(filter, &["distinguishedName", "sAMAccountName", "displayName", "userAccountControl", "memberOf"])
            .await?;
        Ok(entries
            .into_iter()
            .map(|e| User {
                dn: e.dn.clone(),
                sam_account_name: Self::first_attr(&e, "sAMAccountName"),
                display_name: Self::first_attr(&e, "displayName").unwrap_or_else(|| e.dn.clone()),
                enabled: Self::bool_attr(&e, "userAccountControl", self.is_ad),
                groups: e.attrs.get("memberOf").cloned().unwrap_or_default(),
            })
            .collect())
    }

    async fn find_groups(&self) -> Result<Vec<Group>, ldap3::LdapError> {
        let mut this = self.clone_handle();
        let entries = this
            .search("(objectClass=group)", &["distinguishedName", "sAMAccountName", "displayName", "member"])
            .await?;
        Ok(entries
            .into_iter()
            .map(|e| Group {
                dn: e.dn.clone(),
                sam_account_name: Self::first_attr(&e, "sAMAccountName"),
                display_name: Self::first_attr(&e, "displayName").unwrap_or_else(|| e.dn.clone()),
                members: e.attrs.get("member").cloned().unwrap_or_default(),
            })
            .collect())
    }

    async fn find_computers(&self) -> Result<Vec<Computer>, ldap3::LdapError> {
        let mut this = self.clone_handle();
        let entries = this
            .search(
                "(objectClass=computer)",
                &["distinguishedName", "sAMAccountName", "displayName", "userAccountControl", "memberOf"],
            )
            .await?;
        Ok(entries
            .into_iter()
            .map(|e| Computer {
                dn: e.dn.clone(),
                sam_account_name: Self::first_attr(&e, "sAMAccountName"),
                display_name: Self::first_attr(&e, "displayName").unwrap_or_else(|| e.dn.clone()),
                enabled: Self::bool_attr(&e, "userAccountControl", self.is_ad),
                groups: e.attrs.get("memberOf").cloned().unwrap_or_default(),
            })
            .collect())
    }
}

impl DirectoryClient {
    /// `ldap3::Ldap` is itself a cheap, clonable handle onto the shared
    /// connection; `DirectoryReader`'s `&self` signature needs a mutable
    /// handle to call `search`, so we hand out a fresh clone per call.
    fn clone_handle(&self) -> Self {
        Self {
            ldap: self.ldap.clone(),
            base_dn: self.base_dn.clone(),
            is_ad: self.is_ad,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with(name: &str, value: &str) -> SearchEntry {
        let mut attrs = std::collections::HashMap::new();
        attrs.insert(name.to_string(), vec![value.to_string()]);
        SearchEntry {
            dn: "cn=test".to_string(),
            attrs,
            bin_attrs: Default::default(),
        }
    }

    #[test]
    fn bool_attr_defaults_to_true_when_missing() {
        let entry = SearchEntry {
            dn: "cn=test".to_string(),
            attrs: Default::default(),
            bin_attrs: Default::default(),
        };
        assert!(DirectoryClient::bool_attr(&entry, "userAccountControl", false));
        assert!(DirectoryClient::bool_attr(&entry, "userAccountControl", true));
    }

    #[test]
    fn bool_attr_recognizes_openldap_boolean_encodings() {
        let entry = entry_with("enabled", "FALSE");
        assert!(!DirectoryClient::bool_attr(&entry, "enabled", false));
    }

    #[test]
    fn bool_attr_decodes_active_directory_user_account_control() {
        let enabled = entry_with("userAccountControl", "512");
        let disabled = entry_with("userAccountControl", "514");
        assert!(DirectoryClient::bool_attr(&enabled, "userAccountControl", true));
        assert!(!DirectoryClient::bool_attr(&disabled, "userAccountControl", true));
    }

    #[test]
    fn bool_attr_ad_value_is_not_string_matched() {
        // "512"/"514" would both fail the OpenLDAP-style string match,
        // which is exactly the bug the AD branch exists to avoid.
        let entry = entry_with("userAccountControl", "512");
        assert!(!DirectoryClient::bool_attr(&entry, "userAccountControl", false));
    }
}
