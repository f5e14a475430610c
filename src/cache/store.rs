//! TTL-bounded storage for rendered responses.
//!
//! Entries are stamped with a monotonic instant when stored and stay servable
//! for the configured TTL, however stale the underlying data becomes in the
//! meantime. Expiry is checked on read; there is no background sweeper.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use lru::LruCache;
use tracing::warn;

use super::config::CacheConfig;

const SOURCE: &str = "cache::store";

/// Key for one cached page: request path plus a hash of the query string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub path: String,
    pub query_hash: u64,
}

impl PageKey {
    pub fn new(path: &str, query: &str) -> Self {
        Self {
            path: path.to_string(),
            query_hash: hash_query(query),
        }
    }
}

pub fn hash_query(query: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    query.hash(&mut hasher);
    hasher.finish()
}

/// Cached HTTP response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

struct Entry {
    response: CachedResponse,
    stored_at: Instant,
}

/// LRU store of rendered pages with per-entry TTL expiry.
pub struct PageStore {
    ttl: Duration,
    entries: RwLock<LruCache<PageKey, Entry>>,
}

impl PageStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            ttl: config.ttl(),
            entries: RwLock::new(LruCache::new(config.capacity_non_zero())),
        }
    }

    pub fn get(&self, key: &PageKey) -> Option<CachedResponse> {
        self.get_at(key, Instant::now())
    }

    /// Fetch with an explicit clock so expiry is testable without sleeping.
    pub fn get_at(&self, key: &PageKey, now: Instant) -> Option<CachedResponse> {
        let mut entries = rw_write(&self.entries, SOURCE, "get_at");
        match entries.get(key) {
            Some(entry) if now.duration_since(entry.stored_at) < self.ttl => {
                Some(entry.response.clone())
            }
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: PageKey, response: CachedResponse) {
        self.put_at(key, response, Instant::now());
    }

    pub fn put_at(&self, key: PageKey, response: CachedResponse, now: Instant) {
        rw_write(&self.entries, SOURCE, "put_at").put(
            key,
            Entry {
                response,
                stored_at: now,
            },
        );
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "rwlock.read",
                result = "poisoned_recovered",
                hint = "state may be stale after panic in another thread",
                "Recovered from poisoned cache lock"
            );
            poisoned.into_inner()
        }
    }
}

fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "rwlock.write",
                result = "poisoned_recovered",
                hint = "state may be stale after panic in another thread",
                "Recovered from poisoned cache lock"
            );
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response(body: &'static str) -> CachedResponse {
        CachedResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "text/html".to_string())],
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    fn store_with(ttl_seconds: u64, capacity: usize) -> PageStore {
        PageStore::new(&CacheConfig {
            enabled: true,
            ttl_seconds,
            capacity,
        })
    }

    #[test]
    fn serves_within_ttl() {
        let store = store_with(20, 8);
        let key = PageKey::new("/", "");
        let t0 = Instant::now();

        store.put_at(key.clone(), sample_response("feed"), t0);

        let cached = store
            .get_at(&key, t0 + Duration::from_secs(19))
            .expect("still fresh");
        assert_eq!(cached.body, Bytes::from_static(b"feed"));
    }

    #[test]
    fn expires_exactly_at_ttl() {
        let store = store_with(20, 8);
        let key = PageKey::new("/", "");
        let t0 = Instant::now();

        store.put_at(key.clone(), sample_response("feed"), t0);

        assert!(store.get_at(&key, t0 + Duration::from_secs(20)).is_none());
        assert!(store.is_empty(), "expired entry is dropped on read");
    }

    #[test]
    fn query_string_separates_pages() {
        let store = store_with(20, 8);
        let t0 = Instant::now();

        store.put_at(PageKey::new("/", ""), sample_response("page one"), t0);
        store.put_at(
            PageKey::new("/", "page=2"),
            sample_response("page two"),
            t0,
        );

        let one = store.get_at(&PageKey::new("/", ""), t0).unwrap();
        let two = store.get_at(&PageKey::new("/", "page=2"), t0).unwrap();
        assert_ne!(one.body, two.body);
    }

    #[test]
    fn lru_evicts_oldest_when_full() {
        let store = store_with(20, 2);
        let t0 = Instant::now();

        store.put_at(PageKey::new("/", "page=1"), sample_response("1"), t0);
        store.put_at(PageKey::new("/", "page=2"), sample_response("2"), t0);
        store.put_at(PageKey::new("/", "page=3"), sample_response("3"), t0);

        assert!(store.get_at(&PageKey::new("/", "page=1"), t0).is_none());
        assert!(store.get_at(&PageKey::new("/", "page=3"), t0).is_some());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn clear_empties_the_store() {
        let store = store_with(20, 8);
        store.put(PageKey::new("/", ""), sample_response("feed"));
        store.clear();
        assert!(store.is_empty());
    }
}
