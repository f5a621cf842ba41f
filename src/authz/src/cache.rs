//! TTL cache of resolved permission sets
//!
//! Entries are keyed by actor and context. An entry is served only while
//! `now - computed_at < ttl` and, when the actor holds temporary grants,
//! while `now` is before the earliest of their expiries.
//!
//! Invalidation bumps an epoch: a global one for `invalidate_all` and one per
//! actor. A resolver result is stored only if the epochs it was computed
//! under are still current, so a result computed before an invalidation can
//! never be written back after it.
//!
//! Actor epochs are drawn from one counter and never reused, so a token taken
//! against a slot that was later [`remove`](PermissionCache::remove)d can
//! never match the slot that replaces it.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;
use warden_core::ActorId;

/// Default cache TTL in milliseconds
pub const DEFAULT_TTL_MS: i64 = 5000;

/// Cached resolution for one (actor, context)
#[derive(Debug, Clone)]
struct CachedEntry {
    permissions: Arc<HashSet<String>>,
    computed_at: DateTime<Utc>,
    valid_until: Option<DateTime<Utc>>,
}

impl CachedEntry {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        if now - self.computed_at >= ttl {
            return true;
        }
        matches!(self.valid_until, Some(until) if now >= until)
    }
}

/// Per-actor cache slot
#[derive(Debug)]
struct ActorSlot {
    epoch: u64,
    entries: HashMap<String, CachedEntry>,
}

/// Epochs observed before a resolution began
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheToken {
    global: u64,
    actor: u64,
}

/// Statistics about cache performance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: usize,
    /// Number of cache misses
    pub misses: usize,
    /// Number of expired entries encountered
    pub expirations: usize,
    /// Total number of entries in cache
    pub entries: usize,
}

impl CacheStats {
    /// Calculates the cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Thread-safe cache of effective permission sets
#[derive(Debug)]
pub struct PermissionCache {
    slots: DashMap<ActorId, ActorSlot>,
    global_epoch: AtomicU64,
    epoch_seq: AtomicU64,
    ttl: Duration,
    hits: AtomicUsize,
    misses: AtomicUsize,
    expirations: AtomicUsize,
}

impl Default for PermissionCache {
    fn default() -> Self {
        Self::new(Duration::milliseconds(DEFAULT_TTL_MS))
    }
}

impl PermissionCache {
    /// Creates a cache whose entries live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            global_epoch: AtomicU64::new(0),
            epoch_seq: AtomicU64::new(0),
            ttl,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            expirations: AtomicUsize::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn next_epoch(&self) -> u64 {
        self.epoch_seq.fetch_add(1, Ordering::SeqCst)
    }

    fn fresh_slot(&self) -> ActorSlot {
        ActorSlot {
            epoch: self.next_epoch(),
            entries: HashMap::new(),
        }
    }

    /// Cached set for `(actor, context)` if still valid at `now`
    ///
    /// An expired entry is removed on the way out.
    pub fn get(
        &self,
        actor: ActorId,
        context: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<Arc<HashSet<String>>> {
        let key = context.unwrap_or_default();

        if let Some(mut slot) = self.slots.get_mut(&actor) {
            let found = slot
                .entries
                .get(key)
                .map(|entry| (entry.is_expired(now, self.ttl), Arc::clone(&entry.permissions)));

            match found {
                Some((false, permissions)) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(permissions);
                }
                Some((true, _)) => {
                    slot.entries.remove(key);
                    self.expirations.fetch_add(1, Ordering::Relaxed);
                    debug!("Cache expired for actor {}", actor);
                }
                None => {}
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Epochs to pass to [`put`](Self::put) once a resolution finishes
    ///
    /// Take the token before reading any state the resolution depends on.
    pub fn token(&self, actor: ActorId) -> CacheToken {
        let global = self.global_epoch.load(Ordering::SeqCst);
        let actor = self
            .slots
            .entry(actor)
            .or_insert_with(|| self.fresh_slot())
            .epoch;
        CacheToken { global, actor }
    }

    /// Store a resolution computed at `computed_at`
    ///
    /// Returns `false` without storing if an invalidation or removal touching
    /// `actor` happened after `token` was taken.
    pub fn put(
        &self,
        actor: ActorId,
        context: Option<&str>,
        token: CacheToken,
        permissions: Arc<HashSet<String>>,
        computed_at: DateTime<Utc>,
        valid_until: Option<DateTime<Utc>>,
    ) -> bool {
        let Some(mut slot) = self.slots.get_mut(&actor) else {
            debug!("Discarded resolution for removed actor {}", actor);
            return false;
        };

        if slot.epoch != token.actor || self.global_epoch.load(Ordering::SeqCst) != token.global {
            debug!("Discarded stale resolution for actor {}", actor);
            return false;
        }

        slot.entries.insert(
            context.unwrap_or_default().to_string(),
            CachedEntry {
                permissions,
                computed_at,
                valid_until,
            },
        );
        true
    }

    /// Drop every entry of one actor
    pub fn invalidate(&self, actor: ActorId) {
        if let Some(mut slot) = self.slots.get_mut(&actor) {
            slot.epoch = self.next_epoch();
            slot.entries.clear();
        }
        debug!("Invalidated cache for actor {}", actor);
    }

    /// Drop an actor's slot entirely, epoch included
    ///
    /// Used when the actor is unloaded. Returns whether a slot existed.
    pub fn remove(&self, actor: ActorId) -> bool {
        self.slots.remove(&actor).is_some()
    }

    /// Drop every entry of every actor
    pub fn invalidate_all(&self) {
        self.global_epoch.fetch_add(1, Ordering::SeqCst);
        for mut slot in self.slots.iter_mut() {
            slot.entries.clear();
        }
        debug!("Invalidated entire permission cache");
    }

    /// Remove entries expired at `now`, returning how many were removed
    pub fn cleanup_expired(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let mut removed = 0;

        for mut slot in self.slots.iter_mut() {
            let before = slot.entries.len();
            slot.entries.retain(|_, entry| !entry.is_expired(now, ttl));
            removed += before - slot.entries.len();
        }

        if removed > 0 {
            self.expirations.fetch_add(removed, Ordering::Relaxed);
        }
        removed
    }

    /// Number of cached (actor, context) entries
    pub fn len(&self) -> usize {
        self.slots.iter().map(|slot| slot.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of hit/miss counters and current size
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perms(nodes: &[&str]) -> Arc<HashSet<String>> {
        Arc::new(nodes.iter().map(|s| s.to_string()).collect())
    }

    fn store(cache: &PermissionCache, actor: ActorId, now: DateTime<Utc>) -> bool {
        let token = cache.token(actor);
        cache.put(actor, None, token, perms(&["a"]), now, None)
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = PermissionCache::default();
        let actor = ActorId::generate();
        let now = Utc::now();

        assert!(cache.get(actor, None, now).is_none());
        assert!(store(&cache, actor, now));
        assert_eq!(cache.get(actor, None, now).unwrap().len(), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_ttl_boundary() {
        let cache = PermissionCache::new(Duration::milliseconds(100));
        let actor = ActorId::generate();
        let now = Utc::now();
        store(&cache, actor, now);

        assert!(cache.get(actor, None, now + Duration::milliseconds(99)).is_some());
        assert!(cache.get(actor, None, now + Duration::milliseconds(100)).is_none());
        assert_eq!(cache.stats().expirations, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_valid_until_caps_entry() {
        let cache = PermissionCache::new(Duration::seconds(60));
        let actor = ActorId::generate();
        let now = Utc::now();
        let token = cache.token(actor);
        cache.put(actor, None, token, perms(&["x"]), now, Some(now + Duration::seconds(1)));

        assert!(cache.get(actor, None, now).is_some());
        assert!(cache.get(actor, None, now + Duration::seconds(1)).is_none());
    }

    #[test]
    fn test_contexts_are_separate() {
        let cache = PermissionCache::default();
        let actor = ActorId::generate();
        let now = Utc::now();
        let token = cache.token(actor);
        cache.put(actor, Some("nether"), token, perms(&["build"]), now, None);

        assert!(cache.get(actor, None, now).is_none());
        assert!(cache.get(actor, Some("nether"), now).is_some());
    }

    #[test]
    fn test_invalidate_actor_only() {
        let cache = PermissionCache::default();
        let (a, b) = (ActorId::generate(), ActorId::generate());
        let now = Utc::now();
        store(&cache, a, now);
        store(&cache, b, now);

        cache.invalidate(a);
        assert!(cache.get(a, None, now).is_none());
        assert!(cache.get(b, None, now).is_some());

        cache.invalidate_all();
        assert!(cache.get(b, None, now).is_none());
    }

    #[test]
    fn test_stale_put_is_rejected() {
        let cache = PermissionCache::default();
        let actor = ActorId::generate();
        let now = Utc::now();

        let token = cache.token(actor);
        cache.invalidate(actor);
        assert!(!cache.put(actor, None, token, perms(&["a"]), now, None));

        let token = cache.token(actor);
        cache.invalidate_all();
        assert!(!cache.put(actor, None, token, perms(&["a"]), now, None));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_rejects_outstanding_token() {
        let cache = PermissionCache::default();
        let actor = ActorId::generate();
        let now = Utc::now();
        assert!(store(&cache, actor, now));

        let token = cache.token(actor);
        assert!(cache.remove(actor));
        assert!(!cache.remove(actor));
        assert!(!cache.put(actor, None, token, perms(&["a"]), now, None));

        let _ = cache.token(actor);
        assert!(!cache.put(actor, None, token, perms(&["a"]), now, None));
        assert!(cache.get(actor, None, now).is_none());
        assert!(store(&cache, actor, now));
    }

    #[test]
    fn test_cleanup_expired() {
        let cache = PermissionCache::new(Duration::seconds(1));
        let now = Utc::now();
        for _ in 0..3 {
            store(&cache, ActorId::generate(), now);
        }
        assert_eq!(cache.cleanup_expired(now), 0);
        assert_eq!(cache.cleanup_expired(now + Duration::seconds(2)), 3);
        assert_eq!(cache.len(), 0);
    }
}
