//! Generic, thread-safe cache of one directory entity kind with DN and
//! SAMAccountName secondary indexes (spec §4.1).
//!
//! A single `RwLock` guards `items` and both indexes together so that a
//! reader never observes a partially rebuilt index (invariant I1-I3).
//! Indexes store integer offsets into `items`, not pointers, so they
//! survive the `Vec` reallocating on growth (Design Notes).

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::cache::metrics::CacheMetrics;
use crate::ldap::entity::CacheEntity;

struct CacheInner<T> {
    items: Vec<T>,
    dn_index: HashMap<String, usize>,
    sam_index: HashMap<String, usize>,
}

impl<T: CacheEntity> CacheInner<T> {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            dn_index: HashMap::new(),
            sam_index: HashMap::new(),
        }
    }

    fn rebuild_indexes(&mut self) {
        self.dn_index.clear();
        self.sam_index.clear();
        for (i, item) in self.items.iter().enumerate() {
            if !item.dn().is_empty() {
                self.dn_index.insert(item.dn().to_string(), i);
            }
            if let Some(sam) = item.sam_account_name() {
                if !sam.is_empty() {
                    self.sam_index.insert(sam.to_string(), i);
                }
            }
        }
    }
}

/// Thread-safe store of one LDAP entity kind.
pub struct EntityCache<T: CacheEntity + Clone> {
    inner: RwLock<CacheInner<T>>,
    metrics: CacheMetrics,
}

impl<T: CacheEntity + Clone> Default for EntityCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CacheEntity + Clone> EntityCache<T> {
    /// An empty cache, as created at manager construction (spec §3
    /// "Lifecycle").
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CacheInner::empty()),
            metrics: CacheMetrics::default(),
        }
    }

    /// Read-only snapshot of the cache's contents, in last-refresh order.
    pub fn get(&self) -> Vec<T> {
        self.inner.read().items.clone()
    }

    /// O(1) expected lookup by Distinguished Name.
    pub fn find_by_dn(&self, dn: &str) -> Option<T> {
        let guard = self.inner.read();
        let found = guard
            .dn_index
            .get(dn)
            .and_then(|&i| guard.items.get(i).cloned());
        if found.is_some() {
            self.metrics.record_hit();
        } else {
            self.metrics.record_miss();
        }
        found
    }

    /// O(1) expected lookup by SAMAccountName; misses for entities that
    /// never carried one.
    pub fn find_by_sam_account_name(&self, name: &str) -> Option<T> {
        let guard = self.inner.read();
        let found = guard
            .sam_index
            .get(name)
            .and_then(|&i| guard.items.get(i).cloned());
        if found.is_some() {
            self.metrics.record_hit();
        } else {
            self.metrics.record_miss();
        }
        found
    }

    /// O(n) scan for the first item matching `predicate`, in `items`
    /// order. Only used where no index applies.
    pub fn find<F: Fn(&T) -> bool>(&self, predicate: F) -> Option<T> {
        let guard = self.inner.read();
        let found = guard.items.iter().find(|i| predicate(i)).cloned();
        if found.is_some() {
            self.metrics.record_hit();
        } else {
            self.metrics.record_miss();
        }
        found
    }

    /// O(n) scan collecting every match into a fresh `Vec`.
    pub fn filter<F: Fn(&T) -> bool>(&self, predicate: F) -> Vec<T> {
        let guard = self.inner.read();
        let result: Vec<T> = guard.items.iter().filter(|i| predicate(i)).cloned().collect();
        if result.is_empty() {
            self.metrics.record_miss();
        } else {
            self.metrics.record_hit();
        }
        result
    }

    /// Number of items currently held.
    pub fn count(&self) -> usize {
        self.inner.read().items.len()
    }

    /// Replace the cache's contents atomically and rebuild both indexes.
    /// Readers never observe a mixture of the old and new `items`
    /// (invariant 4 in spec §8): the swap happens under a single write
    /// lock acquisition.
    pub fn set_all(&self, items: Vec<T>) {
        let mut guard = self.inner.write();
        guard.items = items;
        guard.rebuild_indexes();
    }

    /// Apply `mutator` to every element in place, then rebuild indexes.
    pub fn update<F: Fn(&mut T)>(&self, mutator: F) {
        let mut guard = self.inner.write();
        for item in guard.items.iter_mut() {
            mutator(item);
        }
        guard.rebuild_indexes();
    }

    /// Mutate a single element located by DN, then rebuild indexes. Used
    /// by the cache manager's mutation-notification handlers so a group
    /// membership change doesn't require rewriting the whole cache.
    pub fn update_one<F: FnOnce(&mut T)>(&self, dn: &str, mutator: F) -> bool {
        let mut guard = self.inner.write();
        let Some(&idx) = guard.dn_index.get(dn) else {
            return false;
        };
        if let Some(item) = guard.items.get_mut(idx) {
            mutator(item);
        }
        guard.rebuild_indexes();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Entry {
        dn: String,
        sam: Option<String>,
    }

    impl CacheEntity for Entry {
        fn dn(&self) -> &str {
            &self.dn
        }
        fn sam_account_name(&self) -> Option<&str> {
            self.sam.as_deref()
        }
    }

    fn entry(dn: &str, sam: Option<&str>) -> Entry {
        Entry {
            dn: dn.to_string(),
            sam: sam.map(str::to_string),
        }
    }

    #[test]
    fn empty_cache_misses_everything() {
        let cache: EntityCache<Entry> = EntityCache::new();
        assert!(cache.find_by_dn("cn=nobody").is_none());
        assert!(cache.find_by_sam_account_name("nobody").is_none());
        assert_eq!(cache.filter(|_| true).len(), 0);
        assert_eq!(cache.count(), 0);
    }

    #[test]
    fn single_item_hits_only_its_own_keys() {
        let cache: EntityCache<Entry> = EntityCache::new();
        cache.set_all(vec![entry("cn=john", Some("john.doe"))]);

        assert!(cache.find_by_dn("cn=john").is_some());
        assert!(cache.find_by_dn("cn=jane").is_none());
        assert!(cache.find_by_sam_account_name("john.doe").is_some());
        assert!(cache.find_by_sam_account_name("jane.doe").is_none());
    }

    #[test]
    fn set_all_rebuilds_both_indexes_each_time() {
        let cache: EntityCache<Entry> = EntityCache::new();
        cache.set_all(vec![entry("cn=a", None), entry("cn=b", None)]);
        assert_eq!(cache.count(), 2);

        cache.set_all(vec![entry("cn=c", None)]);
        assert_eq!(cache.count(), 1);
        assert!(cache.find_by_dn("cn=a").is_none());
        assert!(cache.find_by_dn("cn=c").is_some());
    }

    #[test]
    fn entities_without_sam_are_skipped_in_sam_index() {
        let cache: EntityCache<Entry> = EntityCache::new();
        cache.set_all(vec![entry("cn=group", None)]);
        assert!(cache.find_by_sam_account_name("").is_none());
        assert_eq!(cache.count(), 1);
    }

    #[test]
    fn update_one_mutates_a_single_entity_and_rebuilds_indexes() {
        #[derive(Clone)]
        struct Group {
            dn: String,
            members: Vec<String>,
        }
        impl CacheEntity for Group {
            fn dn(&self) -> &str {
                &self.dn
            }
        }

        let cache: EntityCache<Group> = EntityCache::new();
        cache.set_all(vec![Group {
            dn: "cn=admins".into(),
            members: vec![],
        }]);

        let ok = cache.update_one("cn=admins", |g| g.members.push("cn=alice".into()));
        assert!(ok);
        assert_eq!(cache.find_by_dn("cn=admins").unwrap().members, vec!["cn=alice"]);

        assert!(!cache.update_one("cn=missing", |_| {}));
    }

    #[test]
    fn arbitrary_unicode_dn_never_panics() {
        let cache: EntityCache<Entry> = EntityCache::new();
        cache.set_all(vec![entry("cn=日本語,dc=example", None)]);
        assert!(cache.find_by_dn("cn=🦀").is_none());
        assert!(cache.find_by_dn("cn=日本語,dc=example").is_some());
    }
}
