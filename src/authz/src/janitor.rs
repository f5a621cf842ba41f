//! Expiry janitor
//!
//! Periodically reclaims lapsed temporary grants and memberships. Read paths
//! already ignore them; the janitor only bounds memory and keeps persisted
//! records tidy. A run that removes anything from an actor invalidates that
//! actor's cached resolutions.

use crate::actors::ActorTable;
use crate::cache::PermissionCache;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use warden_core::Clock;

/// Default run interval (60 seconds)
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Reaper of expired temporary entries
pub struct ExpiryJanitor {
    actors: Arc<ActorTable>,
    cache: Option<Arc<PermissionCache>>,
    clock: Arc<dyn Clock>,
    runs: AtomicU64,
    removed: AtomicUsize,
}

impl ExpiryJanitor {
    pub fn new(
        actors: Arc<ActorTable>,
        cache: Option<Arc<PermissionCache>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            actors,
            cache,
            clock,
            runs: AtomicU64::new(0),
            removed: AtomicUsize::new(0),
        }
    }

    /// Remove every temporary entry whose expiry is at or before now
    ///
    /// Returns the number of entries removed.
    pub fn run_once(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;

        let touched = self.actors.update_all(|actor| {
            let count = actor.purge_expired(now);
            removed += count;
            count > 0
        });

        if let Some(cache) = &self.cache {
            for actor in &touched {
                cache.invalidate(*actor);
            }
            let stale = cache.cleanup_expired(now);
            if stale > 0 {
                debug!("Dropped {} expired cache entries", stale);
            }
        }

        self.runs.fetch_add(1, Ordering::Relaxed);
        self.removed.fetch_add(removed, Ordering::Relaxed);

        if removed > 0 {
            info!(
                "Janitor removed {} expired temporary entries from {} actor(s)",
                removed,
                touched.len()
            );
        }
        removed
    }

    /// Spawn the periodic task on the current tokio runtime
    ///
    /// The first run happens one full `interval` after spawning.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.run_once();
            }
        })
    }

    /// Completed runs
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Entries removed across all runs
    pub fn total_removed(&self) -> usize {
        self.removed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ExpiryJanitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiryJanitor")
            .field("runs", &self.runs())
            .field("total_removed", &self.total_removed())
            .finish()
    }
}
