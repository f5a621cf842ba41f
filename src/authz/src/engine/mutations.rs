//! Administrative mutations
//!
//! Every mutation returns `Ok(true)` when it changed state, `Ok(false)` for
//! an unknown actor or group and for a no-op, and `Err` only when the
//! request is invalid. Actor-scoped changes invalidate that actor's cached
//! results; group-scoped changes invalidate every actor's.

use super::Engine;
use crate::algebra;
use crate::error::{Result, ValidationError};
use crate::model::{Actor, DisplayOverrides, GroupDisplay};
use chrono::Duration;
use tracing::{info, warn};
use warden_core::{ActorId, GroupId};

impl Engine {
    /// Apply `f` to a loaded or stored actor, invalidating it on change
    fn mutate_actor<F>(&self, id: ActorId, f: F) -> bool
    where
        F: FnOnce(&mut Actor) -> bool,
    {
        self.ensure_loaded(id) && self.mutate_loaded(id, f)
    }

    /// Apply `f` to an already loaded actor; never touches storage or the graph
    fn mutate_loaded<F>(&self, id: ActorId, f: F) -> bool
    where
        F: FnOnce(&mut Actor) -> bool,
    {
        let now = self.clock.now();
        let changed = self
            .actors
            .update(id, |actor| {
                let changed = f(actor);
                if changed {
                    actor.modified_at = now;
                }
                changed
            })
            .unwrap_or(false);

        if changed {
            self.invalidate(id);
        }
        changed
    }

    /// Record a group change that affects resolution for everyone
    fn group_changed(&self, id: GroupId) {
        self.dirty_groups.insert(id);
        self.invalidate_all();
    }

    // ---- actor permissions ----

    pub fn add_direct_permission(&self, actor: ActorId, permission: &str) -> Result<bool> {
        self.ensure_active()?;
        algebra::validate_node(permission)?;

        let changed = self.mutate_actor(actor, |a| a.permissions.insert(permission.to_string()));
        if changed {
            info!("Added permission '{}' to actor {}", permission, actor);
        }
        Ok(changed)
    }

    pub fn remove_direct_permission(&self, actor: ActorId, permission: &str) -> Result<bool> {
        self.ensure_active()?;

        let changed = self.mutate_actor(actor, |a| a.permissions.remove(permission));
        if changed {
            info!("Removed permission '{}' from actor {}", permission, actor);
        }
        Ok(changed)
    }

    /// Grant `permission` until `now + ttl`
    ///
    /// Re-adding an existing temporary permission replaces its expiry.
    ///
    /// # Errors
    ///
    /// `InvalidDuration` if `ttl` is zero or negative.
    pub fn add_temporary_permission(
        &self,
        actor: ActorId,
        permission: &str,
        ttl: Duration,
    ) -> Result<bool> {
        self.ensure_active()?;
        algebra::validate_node(permission)?;
        if ttl <= Duration::zero() {
            return Err(ValidationError::InvalidDuration(format!("{}", ttl)).into());
        }

        let expiry = self.clock.now() + ttl;
        let changed = self.mutate_actor(actor, |a| {
            a.temporary_permissions.insert(permission.to_string(), expiry) != Some(expiry)
        });
        if changed {
            info!(
                "Granted temporary permission '{}' to actor {} until {}",
                permission, actor, expiry
            );
        }
        Ok(changed)
    }

    pub fn remove_temporary_permission(&self, actor: ActorId, permission: &str) -> Result<bool> {
        self.ensure_active()?;

        let changed =
            self.mutate_actor(actor, |a| a.temporary_permissions.remove(permission).is_some());
        if changed {
            info!("Removed temporary permission '{}' from actor {}", permission, actor);
        }
        Ok(changed)
    }

    /// Grant `permission` only when resolving in `context`
    ///
    /// # Errors
    ///
    /// `InvalidContext` for an empty or blank key.
    pub fn add_context_permission(
        &self,
        actor: ActorId,
        context: &str,
        permission: &str,
    ) -> Result<bool> {
        self.ensure_active()?;
        let context = validate_context(context)?;
        algebra::validate_node(permission)?;

        let changed = self.mutate_actor(actor, |a| {
            a.context_permissions
                .entry(context.to_string())
                .or_default()
                .insert(permission.to_string())
        });
        if changed {
            info!(
                "Added permission '{}' to actor {} in context '{}'",
                permission, actor, context
            );
        }
        Ok(changed)
    }

    pub fn remove_context_permission(
        &self,
        actor: ActorId,
        context: &str,
        permission: &str,
    ) -> Result<bool> {
        self.ensure_active()?;
        let context = validate_context(context)?;

        let changed = self.mutate_actor(actor, |a| {
            let Some(scoped) = a.context_permissions.get_mut(context) else {
                return false;
            };
            let removed = scoped.remove(permission);
            if scoped.is_empty() {
                a.context_permissions.remove(context);
            }
            removed
        });
        if changed {
            info!(
                "Removed permission '{}' from actor {} in context '{}'",
                permission, actor, context
            );
        }
        Ok(changed)
    }

    /// Replace the actor's display overrides
    pub fn set_actor_display(&self, actor: ActorId, display: DisplayOverrides) -> Result<bool> {
        self.ensure_active()?;

        if !self.ensure_loaded(actor) {
            return Ok(false);
        }
        let now = self.clock.now();
        let changed = self
            .actors
            .update(actor, |a| {
                if a.display == display {
                    return false;
                }
                a.display = display;
                a.modified_at = now;
                true
            })
            .unwrap_or(false);
        Ok(changed)
    }

    // ---- memberships ----

    /// Add a permanent membership
    ///
    /// Converts a temporary membership in the same group into a permanent one.
    pub fn add_group_membership(&self, actor: ActorId, group: GroupId) -> Result<bool> {
        self.ensure_active()?;
        if !self.ensure_loaded(actor) {
            return Ok(false);
        }

        let graph = self.graph.read();
        if !graph.contains(group) {
            return Ok(false);
        }

        let changed = self.mutate_loaded(actor, |a| {
            let was_temporary = a.temporary_groups.remove(&group).is_some();
            if a.groups.contains(&group) {
                return was_temporary;
            }
            a.groups.push(group);
            true
        });
        drop(graph);

        if changed {
            info!("Added actor {} to group {}", actor, group);
        }
        Ok(changed)
    }

    /// Add a membership that lapses at `now + ttl`
    ///
    /// Returns `false` if the actor already holds `group` permanently.
    /// Re-adding a temporary membership replaces its expiry.
    ///
    /// # Errors
    ///
    /// `InvalidDuration` if `ttl` is zero or negative.
    pub fn add_temporary_group_membership(
        &self,
        actor: ActorId,
        group: GroupId,
        ttl: Duration,
    ) -> Result<bool> {
        self.ensure_active()?;
        if ttl <= Duration::zero() {
            return Err(ValidationError::InvalidDuration(format!("{}", ttl)).into());
        }
        if !self.ensure_loaded(actor) {
            return Ok(false);
        }

        let graph = self.graph.read();
        if !graph.contains(group) {
            return Ok(false);
        }

        let expiry = self.clock.now() + ttl;
        let changed = self.mutate_loaded(actor, |a| {
            let member = a.groups.contains(&group);
            let temporary = a.temporary_groups.contains_key(&group);
            if member && !temporary {
                return false;
            }
            if !member {
                a.groups.push(group);
            }
            a.temporary_groups.insert(group, expiry) != Some(expiry)
        });
        drop(graph);

        if changed {
            info!("Added actor {} to group {} until {}", actor, group, expiry);
        }
        Ok(changed)
    }

    pub fn remove_group_membership(&self, actor: ActorId, group: GroupId) -> Result<bool> {
        self.ensure_active()?;

        let changed = self.mutate_actor(actor, |a| a.drop_group(group));
        if changed {
            info!("Removed actor {} from group {}", actor, group);
        }
        Ok(changed)
    }

    /// Make `group` the actor's only membership
    pub fn set_primary_group(&self, actor: ActorId, group: GroupId) -> Result<bool> {
        self.ensure_active()?;
        if !self.ensure_loaded(actor) {
            return Ok(false);
        }

        let graph = self.graph.read();
        if !graph.contains(group) {
            return Ok(false);
        }

        let changed = self.mutate_loaded(actor, |a| {
            if a.groups == [group] && a.temporary_groups.is_empty() {
                return false;
            }
            a.groups = vec![group];
            a.temporary_groups.clear();
            true
        });
        drop(graph);

        if changed {
            info!("Set primary group of actor {} to {}", actor, group);
        }
        Ok(changed)
    }

    // ---- groups ----

    /// Create a group with the next unused id
    ///
    /// # Errors
    ///
    /// `DuplicateGroup` if the name is taken (case-insensitive),
    /// `InvalidGroupName` if it is empty or contains whitespace.
    pub fn create_group(&self, name: &str) -> Result<GroupId> {
        self.ensure_active()?;

        let group = self.graph.create_group(name, self.clock.now())?;
        if !self.storage.create_group(&group) {
            warn!(
                "Storage '{}' did not persist new group '{}'; kept for the next flush",
                self.storage.name(),
                group.name
            );
            self.dirty_groups.insert(group.id);
        }
        Ok(group.id)
    }

    /// Create `new_name` as a copy of `source`
    ///
    /// The copy gets a fresh id and the source's permissions, parents,
    /// priority and display properties. It is not a default group and has
    /// no members. Nothing is invalidated: no actor can hold it yet.
    ///
    /// # Errors
    ///
    /// - `UnknownGroup` if `source` does not exist
    /// - `DuplicateGroup` or `InvalidGroupName` as for [`create_group`](Self::create_group)
    pub fn copy_group(&self, source: GroupId, new_name: &str) -> Result<GroupId> {
        self.ensure_active()?;

        let group = self.graph.copy_group(source, new_name, self.clock.now())?;
        if !self.storage.create_group(&group) {
            warn!(
                "Storage '{}' did not persist copied group '{}'; kept for the next flush",
                self.storage.name(),
                group.name
            );
            self.dirty_groups.insert(group.id);
        }
        Ok(group.id)
    }

    /// Delete a group, removing it from every membership and parent list
    pub fn delete_group(&self, group: GroupId) -> Result<bool> {
        self.ensure_active()?;

        let now = self.clock.now();
        let mut members = 0;
        let mut children = Vec::new();
        let removed = self.graph.delete_group(group, now, |_, detached| {
            members = self.actors.remove_group_everywhere(group).len();
            children = detached.to_vec();
        });

        let Some(removed) = removed else {
            return Ok(false);
        };

        self.dirty_groups.remove(&group);
        self.deleted_groups.insert(group);
        for child in &children {
            self.dirty_groups.insert(*child);
        }
        self.invalidate_all();

        info!(
            "Deleted group '{}' ({} member(s), {} child group(s) detached)",
            removed.name,
            members,
            children.len()
        );
        Ok(true)
    }

    pub fn add_group_permission(&self, group: GroupId, permission: &str) -> Result<bool> {
        self.ensure_active()?;
        algebra::validate_node(permission)?;

        let changed = self.graph.add_permission(group, permission, self.clock.now());
        if changed {
            self.group_changed(group);
            info!("Added permission '{}' to group {}", permission, group);
        }
        Ok(changed)
    }

    pub fn remove_group_permission(&self, group: GroupId, permission: &str) -> Result<bool> {
        self.ensure_active()?;

        let changed = self.graph.remove_permission(group, permission, self.clock.now());
        if changed {
            self.group_changed(group);
            info!("Removed permission '{}' from group {}", permission, group);
        }
        Ok(changed)
    }

    /// Make `child` inherit from `parent`
    ///
    /// # Errors
    ///
    /// `CyclicInheritance` if `parent` is `child` or already inherits from it.
    pub fn add_group_parent(&self, child: GroupId, parent: GroupId) -> Result<bool> {
        self.ensure_active()?;

        let changed = self.graph.add_parent(child, parent, self.clock.now())?;
        if changed {
            self.group_changed(child);
            info!("Group {} now inherits from {}", child, parent);
        }
        Ok(changed)
    }

    pub fn remove_group_parent(&self, child: GroupId, parent: GroupId) -> Result<bool> {
        self.ensure_active()?;

        let changed = self.graph.remove_parent(child, parent, self.clock.now());
        if changed {
            self.group_changed(child);
            info!("Group {} no longer inherits from {}", child, parent);
        }
        Ok(changed)
    }

    pub fn set_group_priority(&self, group: GroupId, priority: i32) -> Result<bool> {
        self.ensure_active()?;

        let changed = self.graph.set_priority(group, priority, self.clock.now());
        if changed {
            self.group_changed(group);
            info!("Set priority of group {} to {}", group, priority);
        }
        Ok(changed)
    }

    /// Mark or unmark `group` as auto-assigned to new actors
    pub fn set_group_default(&self, group: GroupId, is_default: bool) -> Result<bool> {
        self.ensure_active()?;

        let changed = self.graph.set_default(group, is_default, self.clock.now());
        if changed {
            self.dirty_groups.insert(group);
            info!("Set default flag of group {} to {}", group, is_default);
        }
        Ok(changed)
    }

    pub fn set_group_display(&self, group: GroupId, display: GroupDisplay) -> Result<bool> {
        self.ensure_active()?;

        let changed = self.graph.set_display(group, display, self.clock.now());
        if changed {
            self.dirty_groups.insert(group);
        }
        Ok(changed)
    }
}

fn validate_context(context: &str) -> Result<&str> {
    let trimmed = context.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidContext(context.to_string()).into());
    }
    Ok(trimmed)
}
