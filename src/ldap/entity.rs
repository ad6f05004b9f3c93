//! The three directory entity kinds the cache understands, plus the
//! structural capability probe (spec §9) that lets `EntityCache<T>` stay
//! generic without reflection: each variant projects its own DN and
//! (optional) SAMAccountName through the [`CacheEntity`] trait.

use serde::{Deserialize, Serialize};

/// Anything an [`crate::cache::entity::EntityCache`] can index.
pub trait CacheEntity: Send + Sync + 'static {
    /// Distinguished Name; the stable identity key. Never empty for an
    /// entry that should be indexed — the cache simply skips indexing
    /// (but still stores) an entity whose DN is empty.
    fn dn(&self) -> &str;

    /// Short login name, where the directory entry carries one.
    fn sam_account_name(&self) -> Option<&str> {
        None
    }
}

/// A directory user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub dn: String,
    pub sam_account_name: Option<String>,
    pub display_name: String,
    pub enabled: bool,
    /// DNs of the groups this user belongs to.
    pub groups: Vec<String>,
}

impl CacheEntity for User {
    fn dn(&self) -> &str {
        &self.dn
    }
    fn sam_account_name(&self) -> Option<&str> {
        self.sam_account_name.as_deref()
    }
}

/// A directory group. Groups carry no `Enabled` flag and not all of them
/// have a SAMAccountName (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub dn: String,
    pub sam_account_name: Option<String>,
    pub display_name: String,
    /// DNs of members (users and/or nested groups).
    pub members: Vec<String>,
}

impl CacheEntity for Group {
    fn dn(&self) -> &str {
        &self.dn
    }
    fn sam_account_name(&self) -> Option<&str> {
        self.sam_account_name.as_deref()
    }
}

/// A directory computer account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Computer {
    pub dn: String,
    pub sam_account_name: Option<String>,
    pub display_name: String,
    pub enabled: bool,
    pub groups: Vec<String>,
}

impl CacheEntity for Computer {
    fn dn(&self) -> &str {
        &self.dn
    }
    fn sam_account_name(&self) -> Option<&str> {
        self.sam_account_name.as_deref()
    }
}

/// A user with its parent groups resolved (spec §4.2 `PopulateGroupsForUser`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullUser {
    pub user: User,
    pub resolved_groups: Vec<Group>,
}

/// A computer with its parent groups resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullComputer {
    pub computer: Computer,
    pub resolved_groups: Vec<Group>,
}

/// A group with its members resolved (spec §4.2 `PopulateUsersForGroup`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullGroup {
    pub group: Group,
    pub resolved_members: Vec<User>,
}
