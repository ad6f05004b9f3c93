//! Template Result Cache (spec §4.5): a keyed cache of rendered response
//! bodies, invalidated on mutation. Grounded on the corpus's LRU/tag
//! invalidation cache primitives, specialized to the fingerprint and
//! invalidation policy the spec describes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

/// A rendered response body plus its insertion time and TTL.
#[derive(Clone)]
struct Entry {
    body: Vec<u8>,
    inserted_at: Instant,
    ttl: Duration,
    /// Path this entry was rendered for, so `invalidate_by_path` can find
    /// it without re-deriving the fingerprint.
    path: String,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

struct Inner {
    entries: HashMap<String, Entry>,
    /// Oldest-accessed-first ordering for LRU eviction.
    access_order: Vec<String>,
    max_entries: usize,
}

impl Inner {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.access_order.iter().position(|k| k == key) {
            self.access_order.remove(pos);
        }
        self.access_order.push(key.to_string());
    }

    fn evict_if_needed(&mut self) {
        while self.entries.len() > self.max_entries {
            if self.access_order.is_empty() {
                break;
            }
            let oldest = self.access_order.remove(0);
            self.entries.remove(&oldest);
        }
    }
}

/// Keyed cache of rendered response bodies (spec §4.5).
pub struct TemplateCache {
    inner: RwLock<Inner>,
    default_ttl: Duration,
}

impl TemplateCache {
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                access_order: Vec::new(),
                max_entries,
            }),
            default_ttl,
        }
    }

    /// Stable hash of method + path + sorted query + caller DN + extras
    /// (spec §4.5 "Fingerprint"). Different callers get different
    /// fingerprints, hence different cache entries.
    pub fn fingerprint(method: &str, path: &str, query: &[(String, String)], caller_dn: &str, extras: &[&str]) -> String {
        let mut sorted_query = query.to_vec();
        sorted_query.sort();

        let mut hasher = Sha256::new();
        hasher.update(method.as_bytes());
        hasher.update(b"|");
        hasher.update(path.as_bytes());
        hasher.update(b"|");
        for (k, v) in &sorted_query {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(b"&");
        }
        hasher.update(b"|");
        hasher.update(caller_dn.as_bytes());
        for extra in extras {
            hasher.update(b"|");
            hasher.update(extra.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Serve a stored body on hit; otherwise render via `render`, store
    /// the result with the default TTL, and return it.
    pub async fn render_with_cache<F, Fut>(
        &self,
        method: &str,
        path: &str,
        query: &[(String, String)],
        caller_dn: &str,
        extras: &[&str],
        render: F,
    ) -> Vec<u8>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Vec<u8>>,
    {
        let key = Self::fingerprint(method, path, query, caller_dn, extras);

        if let Some(body) = self.get(&key) {
            return body;
        }

        let body = render().await;
        self.set(key, path, body.clone(), self.default_ttl);
        body
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.write();
        let expired = match inner.entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => return None,
        };
        if expired {
            inner.entries.remove(key);
            return None;
        }
        inner.touch(key);
        inner.entries.get(key).map(|e| e.body.clone())
    }

    pub fn set(&self, key: String, path: &str, body: Vec<u8>, ttl: Duration) {
        let mut inner = self.inner.write();
        inner.entries.insert(
            key.clone(),
            Entry {
                body,
                inserted_at: Instant::now(),
                ttl,
                path: path.to_string(),
            },
        );
        inner.touch(&key);
        inner.evict_if_needed();
    }

    pub fn invalidate(&self, key: &str) {
        let mut inner = self.inner.write();
        inner.entries.remove(key);
        inner.access_order.retain(|k| k != key);
    }

    /// Remove every entry whose fingerprint was derived from `path`
    /// (spec §4.5 "InvalidateByPath").
    pub fn invalidate_by_path(&self, path: &str) {
        let mut inner = self.inner.write();
        let keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.path == path)
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            inner.entries.remove(&key);
            inner.access_order.retain(|k| k != &key);
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.access_order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired entry. Intended to be driven periodically by
    /// a background sweep task (spec §4.5 "A background sweep...").
    pub fn sweep_expired(&self) {
        let mut inner = self.inner.write();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            inner.entries.remove(&key);
            inner.access_order.retain(|k| k != &key);
        }
    }

    pub fn spawn_sweeper(
        self: std::sync::Arc<Self>,
        interval: Duration,
    ) -> tokio::sync::watch::Sender<bool> {
        let (tx, rx) = tokio::sync::watch::channel(false);
        crate::shutdown::spawn_supervised("template-cache-sweeper", move || {
            let cache = self.clone();
            let mut rx = rx.clone();
            async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => cache.sweep_expired(),
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

/// Invalidation policy helper (spec §4.5 "Invalidation policy"): a
/// mutation to one entity kind invalidates its own list/detail pages
/// plus a conservative sweep of related kinds.
pub fn invalidate_for_mutation(cache: &TemplateCache, kind: EntityKindPaths) {
    match kind {
        EntityKindPaths::User => {
            cache.invalidate_by_path("/users");
            cache.invalidate_by_path("/groups");
        }
        EntityKindPaths::Group => {
            cache.invalidate_by_path("/groups");
            cache.invalidate_by_path("/users");
        }
        EntityKindPaths::Computer => {
            cache.invalidate_by_path("/computers");
        }
    }
}

/// Which entity kind was mutated, for [`invalidate_for_mutation`].
pub enum EntityKindPaths {
    User,
    Group,
    Computer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_hits_until_invalidated() {
        let cache = TemplateCache::new(10, Duration::from_secs(60));
        cache.set("k1".into(), "/users", b"body".to_vec(), Duration::from_secs(60));
        assert_eq!(cache.get("k1"), Some(b"body".to_vec()));

        cache.invalidate("k1");
        assert_eq!(cache.get("k1"), None);
    }

    #[test]
    fn ttl_zero_expires_immediately() {
        let cache = TemplateCache::new(10, Duration::from_secs(60));
        cache.set("k1".into(), "/users", b"body".to_vec(), Duration::from_secs(0));
        // `is_expired` compares elapsed() > ttl; a zero TTL is expired as
        // soon as any time passes, which is effectively immediately.
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k1"), None);
    }

    #[test]
    fn invalidate_by_path_removes_only_matching_entries() {
        let cache = TemplateCache::new(10, Duration::from_secs(60));
        cache.set("users-list".into(), "/users", b"a".to_vec(), Duration::from_secs(60));
        cache.set("groups-list".into(), "/groups", b"b".to_vec(), Duration::from_secs(60));

        cache.invalidate_by_path("/users");
        assert_eq!(cache.get("users-list"), None);
        assert_eq!(cache.get("groups-list"), Some(b"b".to_vec()));
    }

    #[test]
    fn different_callers_get_different_fingerprints() {
        let fp_alice = TemplateCache::fingerprint("GET", "/users", &[], "cn=alice", &[]);
        let fp_bob = TemplateCache::fingerprint("GET", "/users", &[], "cn=bob", &[]);
        assert_ne!(fp_alice, fp_bob);
    }

    #[test]
    fn query_param_order_does_not_affect_fingerprint() {
        let a = vec![("b".to_string(), "2".to_string()), ("a".to_string(), "1".to_string())];
        let b = vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())];
        let fp_a = TemplateCache::fingerprint("GET", "/users", &a, "cn=alice", &[]);
        let fp_b = TemplateCache::fingerprint("GET", "/users", &b, "cn=alice", &[]);
        assert_eq!(fp_a, fp_b);
    }

    #[test]
    fn eviction_drops_oldest_accessed_entry_when_over_capacity() {
        let cache = TemplateCache::new(2, Duration::from_secs(60));
        cache.set("k1".into(), "/a", b"1".to_vec(), Duration::from_secs(60));
        cache.set("k2".into(), "/b", b"2".to_vec(), Duration::from_secs(60));
        // touch k1 so k2 becomes the oldest-accessed
        assert!(cache.get("k1").is_some());
        cache.set("k3".into(), "/c", b"3".to_vec(), Duration::from_secs(60));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("k2"), None);
        assert!(cache.get("k1").is_some());
        assert!(cache.get("k3").is_some());
    }
}
