use std::collections::HashMap;
use std::time::{Duration, Instant};

use mapnav_geometry::NormalizedPoint;
use parking_lot::RwLock;
use tracing::debug;

use crate::registry::MapId;

/// Identity of a single-route query against one committed version of a map.
///
/// Coordinates are compared bit for bit; two queries that differ only in the
/// last float digit are different queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    map_id: MapId,
    version: u64,
    start: (u64, u64),
    end: (u64, u64),
    fingerprint: String,
}

impl CacheKey {
    pub fn new(
        map_id: &MapId,
        version: u64,
        start: NormalizedPoint,
        end: NormalizedPoint,
        fingerprint: impl Into<String>,
    ) -> Self {
        CacheKey {
            map_id: map_id.clone(),
            version,
            start: (start.x.to_bits(), start.y.to_bits()),
            end: (end.x.to_bits(), end.y.to_bits()),
            fingerprint: fingerprint.into(),
        }
    }

    pub fn map_id(&self) -> &MapId {
        &self.map_id
    }
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    created: Instant,
}

/// Shared route result cache with a time-to-live and a size bound.
///
/// Readers share the lock; inserts and invalidations take it exclusively. When
/// full, expired entries are purged first, then the oldest entry is evicted.
#[derive(Debug)]
pub struct RouteCache<V> {
    entries: RwLock<HashMap<CacheKey, Entry<V>>>,
    capacity: usize,
    ttl: Duration,
}

impl<V: Clone> RouteCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        RouteCache {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Returns a clone of the value if present and younger than the TTL.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.created.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn insert(&self, key: CacheKey, value: V) {
        let mut entries = self.entries.write();
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            let ttl = self.ttl;
            entries.retain(|_, e| e.created.elapsed() < ttl);
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.created)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key,
            Entry {
                value,
                created: Instant::now(),
            },
        );
    }

    /// Drops every entry computed against `map_id`. Returns the number removed.
    pub fn invalidate_map(&self, map_id: &MapId) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|k, _| &k.map_id != map_id);
        let removed = before - entries.len();
        debug!(map_id = %map_id, removed, "route cache invalidated");
        removed
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(map: &str, x: f64) -> CacheKey {
        CacheKey::new(
            &MapId::from(map),
            1,
            NormalizedPoint::new(x, 0.5),
            NormalizedPoint::new(0.9, 0.9),
            "medium|diag",
        )
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = RouteCache::new(8, Duration::from_secs(60));
        cache.insert(key("a", 0.1), 1);
        assert_eq!(cache.get(&key("a", 0.1)), Some(1));
        assert_eq!(cache.get(&key("a", 0.2)), None);
        assert_eq!(cache.get(&key("b", 0.1)), None);
    }

    #[test]
    fn test_fingerprint_is_part_of_the_key() {
        let cache = RouteCache::new(8, Duration::from_secs(60));
        let map = MapId::from("a");
        let p = NormalizedPoint::new(0.1, 0.1);
        cache.insert(CacheKey::new(&map, 1, p, p, "high"), 1);
        assert_eq!(cache.get(&CacheKey::new(&map, 1, p, p, "low")), None);
    }

    #[test]
    fn test_map_version_is_part_of_the_key() {
        let cache = RouteCache::new(8, Duration::from_secs(60));
        let map = MapId::from("a");
        let p = NormalizedPoint::new(0.1, 0.1);
        cache.insert(CacheKey::new(&map, 1, p, p, "low"), 1);
        assert_eq!(cache.get(&CacheKey::new(&map, 2, p, p, "low")), None);
        assert_eq!(cache.get(&CacheKey::new(&map, 1, p, p, "low")), Some(1));
    }

    #[test]
    fn test_expired_entries_are_not_served() {
        let cache = RouteCache::new(8, Duration::ZERO);
        cache.insert(key("a", 0.1), 1);
        assert_eq!(cache.get(&key("a", 0.1)), None);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = RouteCache::new(2, Duration::from_secs(60));
        cache.insert(key("a", 0.1), 1);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(key("a", 0.2), 2);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(key("a", 0.3), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key("a", 0.1)), None);
        assert_eq!(cache.get(&key("a", 0.3)), Some(3));
    }

    #[test]
    fn test_invalidate_map_only_touches_that_map() {
        let cache = RouteCache::new(8, Duration::from_secs(60));
        cache.insert(key("a", 0.1), 1);
        cache.insert(key("a", 0.2), 2);
        cache.insert(key("b", 0.1), 3);
        assert_eq!(cache.invalidate_map(&MapId::from("a")), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key("b", 0.1)), Some(3));
    }
}
