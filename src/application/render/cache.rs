//! Content-addressed render cache.
//!
//! Entries are keyed by the SHA-256 digest of the input, bounded by capacity
//! (least-recently-used eviction) and by age (lazy expiry on lookup). Every
//! `clear` starts a new generation; values computed before it are refused.

use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use metrics::counter;
use sha2::{Digest, Sha256};

use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "application::render::cache";

pub(crate) const METRIC_HIT: &str = "threadline_render_cache_hit_total";
pub(crate) const METRIC_MISS: &str = "threadline_render_cache_miss_total";
pub(crate) const METRIC_EVICT: &str = "threadline_render_cache_evict_total";

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    inserted_at: Instant,
}

pub struct RenderCache {
    name: &'static str,
    ttl: Duration,
    generation: AtomicU64,
    entries: RwLock<LruCache<String, CacheEntry>>,
}

impl RenderCache {
    pub fn new(name: &'static str, capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            generation: AtomicU64::new(0),
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, input: &str) -> Option<String> {
        self.get_at(input, Instant::now())
    }

    pub fn set(&self, input: &str, value: String) {
        self.set_at(input, value, Instant::now(), None);
    }

    /// Read before computing a value, then hand to [`RenderCache::set_if_current`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Store `value` unless the cache was cleared after `generation` was read.
    /// Returns whether the value was kept.
    pub fn set_if_current(&self, input: &str, value: String, generation: u64) -> bool {
        self.set_at(input, value, Instant::now(), Some(generation))
    }

    /// Drop every entry and start a new generation.
    pub fn clear(&self) {
        let mut entries = rw_write(&self.entries, SOURCE, "clear");
        self.generation.fetch_add(1, Ordering::SeqCst);
        entries.clear();
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_at(&self, input: &str, now: Instant) -> Option<String> {
        let key = digest_key(input);
        // A hit promotes the entry, so even lookups need the write half.
        let mut entries = rw_write(&self.entries, SOURCE, "get");

        let expired = match entries.get(&key) {
            Some(entry) if now.saturating_duration_since(entry.inserted_at) <= self.ttl => {
                counter!(METRIC_HIT, "cache" => self.name).increment(1);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(&key);
        }
        counter!(METRIC_MISS, "cache" => self.name).increment(1);
        None
    }

    fn set_at(&self, input: &str, value: String, now: Instant, generation: Option<u64>) -> bool {
        let key = digest_key(input);
        let entry = CacheEntry {
            value,
            inserted_at: now,
        };

        let mut entries = rw_write(&self.entries, SOURCE, "set");
        // `clear` bumps the generation under this same lock.
        if generation.is_some_and(|seen| seen != self.generation.load(Ordering::SeqCst)) {
            return false;
        }
        let evicted = entries.push(key.clone(), entry);
        drop(entries);

        if let Some((evicted_key, _)) = evicted
            && evicted_key != key
        {
            counter!(METRIC_EVICT, "cache" => self.name).increment(1);
        }
        true
    }
}

fn digest_key(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize, ttl: Duration) -> RenderCache {
        RenderCache::new("test", NonZeroUsize::new(capacity).unwrap(), ttl)
    }

    #[test]
    fn get_returns_value_within_ttl() {
        let cache = cache(4, Duration::from_secs(60));
        let t0 = Instant::now();
        cache.set_at("hello", "<p>hello</p>".into(), t0, None);

        assert_eq!(
            cache.get_at("hello", t0 + Duration::from_secs(59)).as_deref(),
            Some("<p>hello</p>")
        );
    }

    #[test]
    fn expired_entries_miss_and_are_removed() {
        let cache = cache(4, Duration::from_secs(60));
        let t0 = Instant::now();
        cache.set_at("hello", "<p>hello</p>".into(), t0, None);

        assert!(cache.get_at("hello", t0 + Duration::from_secs(61)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn overflow_evicts_least_recently_used() {
        let cache = cache(2, Duration::from_secs(60));
        cache.set("a", "A".into());
        cache.set("b", "B".into());
        cache.set("c", "C".into());

        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b").as_deref(), Some("B"));
        assert_eq!(cache.get("c").as_deref(), Some("C"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn touching_protects_entry_from_eviction() {
        let cache = cache(2, Duration::from_secs(60));
        cache.set("a", "A".into());
        cache.set("b", "B".into());
        assert!(cache.get("a").is_some());
        cache.set("c", "C".into());

        assert_eq!(cache.get("a").as_deref(), Some("A"));
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn overwriting_same_key_keeps_single_entry() {
        let cache = cache(2, Duration::from_secs(60));
        cache.set("a", "first".into());
        cache.set("a", "second".into());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a").as_deref(), Some("second"));
    }

    #[test]
    fn value_computed_before_clear_is_refused() {
        let cache = cache(4, Duration::from_secs(60));
        let seen = cache.generation();
        cache.clear();

        assert!(!cache.set_if_current("a", "stale".into(), seen));
        assert!(cache.get("a").is_none());

        let current = cache.generation();
        assert!(cache.set_if_current("a", "fresh".into(), current));
        assert_eq!(cache.get("a").as_deref(), Some("fresh"));
    }

    #[test]
    fn clear_empties_cache() {
        let cache = cache(2, Duration::from_secs(60));
        cache.set("a", "A".into());
        cache.clear();
        assert!(cache.get("a").is_none());
    }
}
