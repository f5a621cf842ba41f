//! Permission engine
//!
//! Owns the group graph, the loaded actors, the resolver, the cache and the
//! janitor, and exposes the query and mutation surface.
//!
//! # Architecture
//!
//! ```text
//! has_permission → PermissionCache ──hit──→ algebra::resolve
//!                        │ miss
//!                        ↓
//!                  EffectiveResolver ← GroupGraph
//!                        ↑
//!                   ActorTable ← Storage (first use)
//! ```
//!
//! The engine is an explicit context object: build it with
//! [`Engine::activate`], optionally [`start_janitor`](Engine::start_janitor),
//! and call [`shutdown`](Engine::shutdown) to flush and stop. An inactive
//! engine answers every query with `false` and rejects every mutation.

mod mutations;

use crate::actors::ActorTable;
use crate::algebra;
use crate::cache::{CacheStats, PermissionCache};
use crate::config::EngineConfig;
use crate::error::{AuthzError, Result};
use crate::graph::GroupGraph;
use crate::janitor::ExpiryJanitor;
use crate::model::{Actor, Group};
use crate::resolver::EffectiveResolver;
use crate::storage::{GroupKey, Storage, StorageRegistry};
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warden_core::{ActorId, Clock, GroupId};

/// The query contract an enforcement layer needs
pub trait PermissionCheck: Send + Sync {
    /// Whether `actor` may perform `permission` in `context`
    fn has_permission(&self, actor: ActorId, permission: &str, context: Option<&str>) -> bool;

    /// Drop cached results for one actor after an out-of-band change
    fn invalidate(&self, actor: ActorId);

    /// Drop every cached result after an out-of-band change
    fn invalidate_all(&self);
}

/// Point-in-time engine statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineStats {
    pub active: bool,
    pub loaded_actors: usize,
    pub groups: usize,
    pub cached_entries: usize,
    pub dirty_actors: usize,
    pub dirty_groups: usize,
    pub janitor_runs: u64,
    pub cache: Option<CacheStats>,
}

/// Permission resolution engine
pub struct Engine {
    config: EngineConfig,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    graph: Arc<GroupGraph>,
    actors: Arc<ActorTable>,
    resolver: EffectiveResolver,
    cache: Option<Arc<PermissionCache>>,
    janitor: Arc<ExpiryJanitor>,
    janitor_handle: Mutex<Option<JoinHandle<()>>>,
    dirty_groups: DashSet<GroupId>,
    deleted_groups: DashSet<GroupId>,
    active: AtomicBool,
}

impl Engine {
    /// Load every group from `storage`, verify the graph and start serving
    ///
    /// # Errors
    ///
    /// - `Config` if `config` fails validation
    /// - `InconsistentGraph` if the persisted groups contain a cycle or a
    ///   duplicate name or id; the engine refuses to serve in that case
    pub fn activate(
        config: EngineConfig,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let groups = storage.list_groups();
        let group_count = groups.len();
        let graph = GroupGraph::from_groups(groups)
            .map_err(|e| AuthzError::InconsistentGraph(e.to_string()))?;
        let graph = Arc::new(graph);

        let actors = Arc::new(ActorTable::new());
        let resolver = EffectiveResolver::new(Arc::clone(&graph), config.context.server.clone());

        let cache = if config.cache.enabled {
            Some(Arc::new(PermissionCache::new(config.cache_ttl())))
        } else {
            None
        };

        let janitor = Arc::new(ExpiryJanitor::new(
            Arc::clone(&actors),
            cache.clone(),
            Arc::clone(&clock),
        ));

        info!(
            "Permission engine activated: storage={}, groups={}, cache={}, janitor={}",
            storage.name(),
            group_count,
            config.cache.enabled,
            config.janitor.enabled
        );

        Ok(Self {
            config,
            storage,
            clock,
            graph,
            actors,
            resolver,
            cache,
            janitor,
            janitor_handle: Mutex::new(None),
            dirty_groups: DashSet::new(),
            deleted_groups: DashSet::new(),
            active: AtomicBool::new(true),
        })
    }

    /// Build the storage named in `config` from `registry`, then activate
    pub fn from_config(
        config: EngineConfig,
        registry: &StorageRegistry,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let storage = registry.create(&config.storage)?;
        Self::activate(config, storage, clock)
    }

    /// Spawn the expiry janitor on the current tokio runtime
    ///
    /// Returns `false` if the janitor is disabled, already running, the
    /// engine is inactive, or no runtime is available.
    pub fn start_janitor(&self) -> bool {
        if !self.is_active() || !self.config.janitor.enabled {
            return false;
        }

        let mut handle = self.janitor_handle.lock();
        if handle.is_some() {
            return false;
        }

        if tokio::runtime::Handle::try_current().is_err() {
            warn!("No tokio runtime available; expiry janitor not started");
            return false;
        }

        let interval = self.config.janitor_interval();
        *handle = Some(Arc::clone(&self.janitor).spawn(interval));
        info!("Expiry janitor started (every {:?})", interval);
        true
    }

    /// Run the janitor once, returning how many entries it removed
    pub fn run_janitor(&self) -> usize {
        if !self.is_active() {
            return 0;
        }
        self.janitor.run_once()
    }

    /// Stop the janitor, flush dirty state and stop serving
    ///
    /// Returns the number of records persisted. Later calls do nothing.
    pub fn shutdown(&self) -> usize {
        if self
            .active
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return 0;
        }

        if let Some(handle) = self.janitor_handle.lock().take() {
            handle.abort();
        }

        let flushed = self.flush_all();
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }

        info!("Permission engine shut down ({} records flushed)", flushed);
        flushed
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(AuthzError::NotActive)
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ---- actor loading ----

    /// Resident record for `id`, loading from storage or creating it
    ///
    /// New actors join every default group. The graph read lock is held
    /// until the record is resident, so a concurrent group deletion either
    /// sees the new member or runs before its groups are chosen.
    fn lookup_or_create(&self, id: ActorId) -> Actor {
        if let Some(actor) = self.load_actor(id) {
            return actor;
        }

        let now = self.clock.now();
        let mut actor = Actor::new(id, id.to_string(), now);
        let (resident, created) = {
            let graph = self.graph.read();
            actor.groups = graph.default_groups();
            self.actors.insert_if_absent(actor)
        };
        if created {
            self.actors.mark_dirty(id);
            debug!("Created actor {} with {} default group(s)", id, resident.groups.len());
        }
        resident
    }

    /// Resident record for `id`, loading from storage if needed; never creates
    fn load_actor(&self, id: ActorId) -> Option<Actor> {
        if let Some(actor) = self.actors.get(id) {
            return Some(actor);
        }

        let mut actor = self.storage.load_actor(id)?;
        let (resident, dropped) = {
            let graph = self.graph.read();
            let before = actor.groups.len();
            actor.groups.retain(|group| graph.contains(*group));
            actor.temporary_groups.retain(|group, _| graph.contains(*group));
            let dropped = before - actor.groups.len();
            (self.actors.insert_if_absent(actor).0, dropped)
        };
        if dropped > 0 {
            warn!(
                "Dropped {} membership(s) in unknown groups from actor {}",
                dropped, id
            );
            self.actors.mark_dirty(id);
        }
        Some(resident)
    }

    /// Make sure `id` is loaded; `false` if it exists nowhere
    fn ensure_loaded(&self, id: ActorId) -> bool {
        self.actors.contains(id) || self.load_actor(id).is_some()
    }

    /// Register an actor by name, creating it with default groups if unknown
    ///
    /// Updates the stored name when it changed. Returns the resident record.
    pub fn register_actor(&self, id: ActorId, name: &str) -> Result<Actor> {
        self.ensure_active()?;

        let actor = self.lookup_or_create(id);
        if actor.name == name {
            return Ok(actor);
        }

        let now = self.clock.now();
        self.actors.update(id, |a| {
            a.name = name.to_string();
            a.modified_at = now;
            true
        });
        Ok(self.actors.get(id).unwrap_or(actor))
    }

    /// Loaded record for `id`, if any; never loads or creates
    pub fn actor(&self, id: ActorId) -> Option<Actor> {
        self.actors.get(id)
    }

    /// Save `id` if it has unsaved changes, then drop it from memory
    ///
    /// The actor's cache slot goes with it; the next query reloads the
    /// record from storage. Returns `false` if the actor was not loaded, the
    /// save failed, or an edit landed while unloading. In the last two cases
    /// the record stays resident and dirty.
    pub fn unload_actor(&self, id: ActorId) -> bool {
        if !self.actors.contains(id) {
            return false;
        }
        if self.actors.is_dirty(id) && !self.save_actor(id) {
            return false;
        }

        if self.actors.remove_clean(id).is_none() {
            debug!("Actor {} changed while unloading; kept resident", id);
            return false;
        }
        if let Some(cache) = &self.cache {
            cache.remove(id);
        }
        debug!("Unloaded actor {}", id);
        true
    }

    // ---- queries ----

    /// Signed permission set for `(actor, context)`, served from cache when valid
    fn effective_set(&self, id: ActorId, context: Option<&str>) -> Arc<HashSet<String>> {
        let now = self.clock.now();

        let Some(cache) = &self.cache else {
            let actor = self.lookup_or_create(id);
            return Arc::new(self.resolver.compute_raw_set(&actor, context, now).permissions);
        };

        if let Some(hit) = cache.get(id, context, now) {
            debug!("Cache hit for actor {}", id);
            return hit;
        }

        let token = cache.token(id);
        let actor = self.lookup_or_create(id);
        let raw = self.resolver.compute_raw_set(&actor, context, now);
        let permissions = Arc::new(raw.permissions);
        cache.put(id, context, token, Arc::clone(&permissions), now, raw.expires_at);
        debug!("Cache miss for actor {}", id);
        permissions
    }

    /// Whether `actor` holds `permission` in `context`
    ///
    /// Fails closed: an inactive engine answers `false`.
    pub fn has_permission(&self, actor: ActorId, permission: &str, context: Option<&str>) -> bool {
        if !self.is_active() {
            return false;
        }
        let set = self.effective_set(actor, context);
        algebra::resolve(permission, &set)
    }

    /// Whether any grant or denial covers `permission` for `actor`
    pub fn is_permission_set(
        &self,
        actor: ActorId,
        permission: &str,
        context: Option<&str>,
    ) -> bool {
        if !self.is_active() {
            return false;
        }
        let set = self.effective_set(actor, context);
        algebra::is_set(permission, &set)
    }

    /// The resolved signed set for `actor` in `context`
    pub fn effective_permissions(&self, actor: ActorId, context: Option<&str>) -> HashSet<String> {
        if !self.is_active() {
            return HashSet::new();
        }
        self.effective_set(actor, context).as_ref().clone()
    }

    /// Active memberships ordered by priority, highest first
    pub fn groups_of(&self, actor: ActorId) -> Vec<GroupId> {
        if !self.is_active() {
            return Vec::new();
        }
        let actor = self.lookup_or_create(actor);
        let now = self.clock.now();
        self.graph.read().order_by_priority(&actor.active_groups(now))
    }

    /// Highest-priority active membership
    pub fn primary_group(&self, actor: ActorId) -> Option<GroupId> {
        self.groups_of(actor).into_iter().next()
    }

    /// Temporary grants still in force, with their expiry
    pub fn temporary_permissions(&self, actor: ActorId) -> HashMap<String, DateTime<Utc>> {
        if !self.is_active() {
            return HashMap::new();
        }
        let now = self.clock.now();
        self.load_actor(actor)
            .map(|a| {
                a.active_temporary_permissions(now)
                    .map(|(permission, expiry)| (permission.clone(), *expiry))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Temporary memberships still in force, with their expiry
    pub fn temporary_groups(&self, actor: ActorId) -> HashMap<GroupId, DateTime<Utc>> {
        if !self.is_active() {
            return HashMap::new();
        }
        let now = self.clock.now();
        self.load_actor(actor)
            .map(|a| {
                a.temporary_groups
                    .into_iter()
                    .filter(|(_, expiry)| *expiry > now)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Transitive inheritance over parent edges
    pub fn inherits_from(&self, group: GroupId, ancestor: GroupId) -> bool {
        self.is_active() && self.graph.read().inherits_from(group, ancestor)
    }

    /// A group's own and inherited permissions
    pub fn all_permissions(&self, group: GroupId) -> HashSet<String> {
        if !self.is_active() {
            return HashSet::new();
        }
        self.graph.read().all_permissions(group)
    }

    /// Algebra over a group's inherited permission set
    pub fn group_has_permission(&self, group: GroupId, permission: &str) -> bool {
        if !self.is_active() {
            return false;
        }
        let permissions = self.graph.read().all_permissions(group);
        algebra::resolve(permission, &permissions)
    }

    /// Groups listing `group` as a parent
    pub fn child_groups(&self, group: GroupId) -> Vec<GroupId> {
        if !self.is_active() {
            return Vec::new();
        }
        self.graph.read().children(group)
    }

    /// Direct parents of `group`
    pub fn parent_groups(&self, group: GroupId) -> Vec<GroupId> {
        if !self.is_active() {
            return Vec::new();
        }
        self.graph
            .read()
            .get(group)
            .map(|g| g.parents.clone())
            .unwrap_or_default()
    }

    pub fn group(&self, id: GroupId) -> Option<Group> {
        self.graph.read().get(id).cloned()
    }

    /// Id of the group called `name` (case-insensitive)
    pub fn group_id(&self, name: &str) -> Option<GroupId> {
        self.graph.read().id_of(name)
    }

    /// Every group, ordered by id
    pub fn groups(&self) -> Vec<Group> {
        self.graph.snapshot()
    }

    // ---- cache hooks ----

    /// Drop cached results for one actor
    pub fn invalidate(&self, actor: ActorId) {
        if let Some(cache) = &self.cache {
            cache.invalidate(actor);
        }
    }

    /// Drop every cached result
    pub fn invalidate_all(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    pub fn stats(&self) -> EngineStats {
        let cache = self.cache_stats();
        EngineStats {
            active: self.is_active(),
            loaded_actors: self.actors.len(),
            groups: self.graph.read().len(),
            cached_entries: cache.as_ref().map(|c| c.entries).unwrap_or(0),
            dirty_actors: self.actors.dirty_count(),
            dirty_groups: self.dirty_groups.len() + self.deleted_groups.len(),
            janitor_runs: self.janitor.runs(),
            cache,
        }
    }

    // ---- save points ----

    /// Persist one loaded actor
    ///
    /// The dirty flag is cleared before the snapshot is taken, so an edit
    /// made while the write is in flight stays dirty for the next flush.
    pub fn save_actor(&self, id: ActorId) -> bool {
        self.actors.clear_dirty(id);
        let Some(actor) = self.actors.get(id) else {
            return false;
        };

        if self.storage.save_actor(&actor) {
            true
        } else {
            warn!("Storage '{}' failed to save actor {}", self.storage.name(), id);
            self.actors.mark_dirty(id);
            false
        }
    }

    /// Persist one group by name
    ///
    /// Clears the dirty flag before the snapshot, as [`save_actor`](Self::save_actor) does.
    pub fn save_group(&self, name: &str) -> bool {
        let Some(id) = self.graph.read().id_of(name) else {
            return false;
        };
        self.dirty_groups.remove(&id);
        let group = self.graph.read().get(id).cloned();
        let Some(group) = group else {
            return false;
        };

        if self.storage.save_group(&group) {
            true
        } else {
            warn!(
                "Storage '{}' failed to save group '{}'",
                self.storage.name(),
                group.name
            );
            self.dirty_groups.insert(id);
            false
        }
    }

    /// Persist every dirty actor and group and every pending deletion
    ///
    /// Returns the number of records written. Failed records stay dirty.
    pub fn flush(&self) -> Result<usize> {
        self.ensure_active()?;
        Ok(self.flush_all())
    }

    fn flush_all(&self) -> usize {
        let mut written = 0;

        let deleted: Vec<GroupId> = self.deleted_groups.iter().map(|id| *id).collect();
        for id in deleted {
            self.deleted_groups.remove(&id);
            if self.storage.delete_group(id) {
                written += 1;
            } else if self.storage.load_group(GroupKey::Id(id)).is_some() {
                warn!("Storage '{}' failed to delete group {}", self.storage.name(), id);
                self.deleted_groups.insert(id);
            }
        }

        let dirty: Vec<GroupId> = self.dirty_groups.iter().map(|id| *id).collect();
        for id in dirty {
            self.dirty_groups.remove(&id);
            let Some(group) = self.graph.read().get(id).cloned() else {
                continue;
            };
            if self.storage.save_group(&group) {
                written += 1;
            } else {
                warn!(
                    "Storage '{}' failed to save group '{}'",
                    self.storage.name(),
                    group.name
                );
                self.dirty_groups.insert(id);
            }
        }

        for id in self.actors.take_dirty() {
            let Some(actor) = self.actors.get(id) else {
                continue;
            };
            if self.storage.save_actor(&actor) {
                written += 1;
            } else {
                warn!("Storage '{}' failed to save actor {}", self.storage.name(), id);
                self.actors.mark_dirty(id);
            }
        }

        debug!("Flushed {} record(s) to storage '{}'", written, self.storage.name());
        written
    }
}

impl PermissionCheck for Engine {
    fn has_permission(&self, actor: ActorId, permission: &str, context: Option<&str>) -> bool {
        Engine::has_permission(self, actor, permission, context)
    }

    fn invalidate(&self, actor: ActorId) {
        Engine::invalidate(self, actor)
    }

    fn invalidate_all(&self) {
        Engine::invalidate_all(self)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(handle) = self.janitor_handle.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("storage", &self.storage.name())
            .field("active", &self.is_active())
            .field("groups", &self.graph.read().len())
            .field("loaded_actors", &self.actors.len())
            .finish()
    }
}
