//! Group inheritance graph
//!
//! Owns every group, its direct permissions and its parent edges. The
//! parent relation is kept acyclic at all times:
//!
//! 1. `add_parent` rejects any edge that would make a group its own ancestor
//! 2. `from_groups` verifies a loaded graph with Kahn's algorithm and reports
//!    the offending path found by DFS
//!
//! All state sits behind one `RwLock`. Structural edits take the write lock,
//! so cycle detection never races with another edge being added; queries
//! hold the read lock and always see a whole snapshot.

use crate::model::{normalize_name, Group, GroupDisplay};
use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;
use tracing::{debug, info, warn};
use warden_core::GroupId;

/// Graph-related errors
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    /// Edge or loaded data would close a cycle
    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    /// Group name (or id, on load) is duplicated
    #[error("Duplicate group: {0}")]
    DuplicateGroup(String),

    /// Invalid group definition
    #[error("Invalid group: {0}")]
    InvalidGroup(String),

    /// Referenced group does not exist
    #[error("Unknown group: {0}")]
    UnknownGroup(String),
}

/// Every group plus the name and id indices
#[derive(Debug, Default)]
pub struct GraphState {
    groups: HashMap<GroupId, Group>,
    names: HashMap<String, GroupId>,
    next_id: u32,
}

impl GraphState {
    /// Look up a group by id
    pub fn get(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    /// Look up a group by name (case-insensitive)
    pub fn find(&self, name: &str) -> Option<&Group> {
        self.names
            .get(&normalize_name(name))
            .and_then(|id| self.groups.get(id))
    }

    /// Resolve a name to its id
    pub fn id_of(&self, name: &str) -> Option<GroupId> {
        self.names.get(&normalize_name(name)).copied()
    }

    pub fn contains(&self, id: GroupId) -> bool {
        self.groups.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// All groups, ordered by id
    pub fn groups(&self) -> Vec<&Group> {
        let mut groups: Vec<&Group> = self.groups.values().collect();
        groups.sort_by_key(|g| g.id);
        groups
    }

    /// Id the next created group will receive
    pub fn next_id(&self) -> GroupId {
        GroupId(self.next_id)
    }

    /// Transitive reachability over parent edges
    pub fn inherits_from(&self, group: GroupId, ancestor: GroupId) -> bool {
        self.path_to(group, ancestor).is_some()
    }

    /// Parent-edge path from `from` up to `to`, both ends included
    fn path_to(&self, from: GroupId, to: GroupId) -> Option<Vec<GroupId>> {
        let mut came_from: HashMap<GroupId, GroupId> = HashMap::new();
        let mut visited: HashSet<GroupId> = HashSet::from([from]);
        let mut queue: VecDeque<GroupId> = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            let Some(group) = self.groups.get(&current) else {
                continue;
            };
            for parent in &group.parents {
                if !visited.insert(*parent) {
                    continue;
                }
                came_from.insert(*parent, current);

                if *parent == to {
                    let mut path = vec![to];
                    let mut step = to;
                    while let Some(prev) = came_from.get(&step) {
                        path.push(*prev);
                        step = *prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(*parent);
            }
        }

        None
    }

    /// Own permissions plus those of every ancestor
    ///
    /// Each ancestor is visited once, so diamond-shaped hierarchies cost no
    /// more than a tree. Unknown ids yield an empty set.
    pub fn all_permissions(&self, group: GroupId) -> HashSet<String> {
        let mut permissions = HashSet::new();
        self.collect_permissions(group, &mut permissions, &mut HashSet::new());
        permissions
    }

    /// Union `group`'s inherited permissions into `into`, skipping groups in `visited`
    pub(crate) fn collect_permissions(
        &self,
        group: GroupId,
        into: &mut HashSet<String>,
        visited: &mut HashSet<GroupId>,
    ) {
        let mut stack = vec![group];

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Some(node) = self.groups.get(&current) else {
                continue;
            };
            into.extend(node.permissions.iter().cloned());
            stack.extend(node.parents.iter().rev().copied());
        }
    }

    /// Sort ids by priority, highest first; equal priorities keep input order
    ///
    /// Unknown ids are dropped.
    pub fn order_by_priority(&self, ids: &[GroupId]) -> Vec<GroupId> {
        let mut known: Vec<(GroupId, i32)> = ids
            .iter()
            .filter_map(|id| self.groups.get(id).map(|g| (*id, g.priority)))
            .collect();
        known.sort_by(|a, b| b.1.cmp(&a.1));
        known.into_iter().map(|(id, _)| id).collect()
    }

    /// Groups that list `group` as a parent, ordered by id
    pub fn children(&self, group: GroupId) -> Vec<GroupId> {
        let mut children: Vec<GroupId> = self
            .groups
            .values()
            .filter(|g| g.parents.contains(&group))
            .map(|g| g.id)
            .collect();
        children.sort();
        children
    }

    /// Groups auto-assigned to new actors, ordered by id
    pub fn default_groups(&self) -> Vec<GroupId> {
        let mut defaults: Vec<GroupId> = self
            .groups
            .values()
            .filter(|g| g.is_default)
            .map(|g| g.id)
            .collect();
        defaults.sort();
        defaults
    }

    /// Topological order with parents ahead of their children (Kahn's algorithm)
    ///
    /// # Errors
    ///
    /// Returns `CircularDependency` with the cycle path if the graph is cyclic.
    pub fn topological_order(&self) -> Result<Vec<GroupId>, GraphError> {
        if self.groups.is_empty() {
            return Ok(Vec::new());
        }

        // child count of unresolved parents
        let mut in_degree: HashMap<GroupId, usize> = HashMap::new();
        let mut dependents: HashMap<GroupId, Vec<GroupId>> = HashMap::new();

        for (id, group) in &self.groups {
            in_degree.entry(*id).or_insert(0);
            for parent in &group.parents {
                if !self.groups.contains_key(parent) {
                    continue;
                }
                *in_degree.entry(*id).or_insert(0) += 1;
                dependents.entry(*parent).or_default().push(*id);
            }
        }

        let mut roots: Vec<GroupId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        roots.sort();
        let mut queue: VecDeque<GroupId> = roots.into();

        let mut sorted = Vec::with_capacity(self.groups.len());
        while let Some(current) = queue.pop_front() {
            sorted.push(current);

            if let Some(children) = dependents.get(&current) {
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(*child);
                        }
                    }
                }
            }
        }

        if sorted.len() != self.groups.len() {
            let cycle = self
                .find_cycle()
                .unwrap_or_else(|| "unknown cycle".to_string());
            return Err(GraphError::CircularDependency(cycle));
        }

        Ok(sorted)
    }

    /// DFS over parent edges; returns the first cycle as `a -> b -> a`
    fn find_cycle(&self) -> Option<String> {
        // 0 = unvisited, 1 = on the DFS stack, 2 = finished
        let mut state: HashMap<GroupId, u8> = HashMap::new();
        let mut ids: Vec<GroupId> = self.groups.keys().copied().collect();
        ids.sort();

        for start in ids {
            if state.get(&start).copied().unwrap_or(0) == 0 {
                let mut path = Vec::new();
                if let Some(cycle) = self.dfs_cycle(start, &mut state, &mut path) {
                    return Some(self.describe(&cycle));
                }
            }
        }
        None
    }

    fn dfs_cycle(
        &self,
        node: GroupId,
        state: &mut HashMap<GroupId, u8>,
        path: &mut Vec<GroupId>,
    ) -> Option<Vec<GroupId>> {
        match state.get(&node) {
            Some(1) => {
                let start = path.iter().position(|n| *n == node)?;
                let mut cycle = path[start..].to_vec();
                cycle.push(node);
                return Some(cycle);
            }
            Some(2) => return None,
            _ => {}
        }

        state.insert(node, 1);
        path.push(node);

        if let Some(group) = self.groups.get(&node) {
            for parent in &group.parents {
                if let Some(cycle) = self.dfs_cycle(*parent, state, path) {
                    return Some(cycle);
                }
            }
        }

        state.insert(node, 2);
        path.pop();
        None
    }

    /// Render a path of ids as group names
    fn describe(&self, path: &[GroupId]) -> String {
        path.iter()
            .map(|id| {
                self.groups
                    .get(id)
                    .map(|g| g.name.clone())
                    .unwrap_or_else(|| id.to_string())
            })
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    fn insert(&mut self, group: Group) -> Result<(), GraphError> {
        let key = group.key();
        if key.is_empty() {
            return Err(GraphError::InvalidGroup(format!(
                "group {} has an empty name",
                group.id
            )));
        }
        if self.names.contains_key(&key) {
            return Err(GraphError::DuplicateGroup(group.name.clone()));
        }
        if self.groups.contains_key(&group.id) {
            return Err(GraphError::DuplicateGroup(format!("id {}", group.id)));
        }

        self.next_id = self.next_id.max(group.id.value().saturating_add(1));
        self.names.insert(key, group.id);
        self.groups.insert(group.id, group);
        Ok(())
    }
}

/// Concurrent owner of the group hierarchy
#[derive(Debug, Default)]
pub struct GroupGraph {
    state: RwLock<GraphState>,
}

impl GroupGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from persisted groups, verifying every invariant
    ///
    /// Parent references to unknown groups are dropped with a warning.
    ///
    /// # Errors
    ///
    /// - `DuplicateGroup` if two groups share a name or id
    /// - `InvalidGroup` if a name is empty
    /// - `CircularDependency` if the parent relation is cyclic
    pub fn from_groups(groups: Vec<Group>) -> Result<Self, GraphError> {
        let mut state = GraphState::default();

        for group in groups {
            state.insert(group)?;
        }

        let known: HashSet<GroupId> = state.groups.keys().copied().collect();
        for group in state.groups.values_mut() {
            let before = group.parents.len();
            group.parents.retain(|parent| known.contains(parent));
            let mut seen = HashSet::new();
            group.parents.retain(|parent| seen.insert(*parent));
            if group.parents.len() != before {
                warn!(
                    "Dropped {} dangling or duplicate parent reference(s) from group '{}'",
                    before - group.parents.len(),
                    group.name
                );
            }
        }

        let order = state.topological_order()?;
        debug!("Group graph verified: {} groups in topological order", order.len());

        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Read-only snapshot; holds the read lock until dropped
    pub fn read(&self) -> RwLockReadGuard<'_, GraphState> {
        self.state.read()
    }

    /// Create a group with the next unused id
    ///
    /// # Errors
    ///
    /// - `InvalidGroup` for an empty or whitespace-containing name, or once
    ///   every id is taken
    /// - `DuplicateGroup` if the name exists (case-insensitive)
    pub fn create_group(&self, name: &str, now: DateTime<Utc>) -> Result<Group, GraphError> {
        let group = self.create_from(name, now, None)?;
        info!("Created group '{}' ({})", group.name, group.id);
        Ok(group)
    }

    /// Create `name` as a copy of `source` with the next unused id
    ///
    /// Permissions, parents, priority and display properties are copied;
    /// the display name override and the default flag are not. The copy
    /// has no children, so it cannot close a cycle.
    ///
    /// # Errors
    ///
    /// - `UnknownGroup` if `source` does not exist
    /// - otherwise as [`create_group`](Self::create_group)
    pub fn copy_group(
        &self,
        source: GroupId,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Group, GraphError> {
        let group = self.create_from(name, now, Some(source))?;
        info!("Copied group {} to '{}' ({})", source, group.name, group.id);
        Ok(group)
    }

    fn create_from(
        &self,
        name: &str,
        now: DateTime<Utc>,
        template: Option<GroupId>,
    ) -> Result<Group, GraphError> {
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(GraphError::InvalidGroup(name.to_string()));
        }

        let mut state = self.state.write();
        if state.names.contains_key(&normalize_name(trimmed)) {
            return Err(GraphError::DuplicateGroup(trimmed.to_string()));
        }
        // next_id saturates at u32::MAX; once that id is taken nothing is left
        let id = state.next_id();
        if state.contains(id) {
            return Err(GraphError::InvalidGroup(
                "group id space exhausted".to_string(),
            ));
        }

        let mut group = Group::new(id, trimmed, now);
        if let Some(source) = template {
            let source = state
                .get(source)
                .ok_or_else(|| GraphError::UnknownGroup(source.to_string()))?;
            group.priority = source.priority;
            group.permissions = source.permissions.clone();
            group.parents = source.parents.clone();
            group.display = GroupDisplay {
                display_name: None,
                ..source.display.clone()
            };
        }

        state.insert(group.clone())?;
        Ok(group)
    }

    /// Delete a group and detach it from every child
    ///
    /// `cascade` receives the removed group and the ids of the children it
    /// was detached from. It runs while the write lock is still held, so
    /// readers never see the group gone from the graph but still referenced
    /// elsewhere. The group's own permissions are not merged anywhere.
    pub fn delete_group<F>(&self, id: GroupId, now: DateTime<Utc>, cascade: F) -> Option<Group>
    where
        F: FnOnce(&Group, &[GroupId]),
    {
        let mut state = self.state.write();
        let removed = state.groups.remove(&id)?;
        state.names.remove(&removed.key());

        let mut detached = Vec::new();
        for group in state.groups.values_mut() {
            let before = group.parents.len();
            group.parents.retain(|parent| *parent != id);
            if group.parents.len() != before {
                group.modified_at = now;
                detached.push(group.id);
            }
        }
        detached.sort();

        cascade(&removed, &detached);

        info!("Deleted group '{}' ({})", removed.name, removed.id);
        Some(removed)
    }

    /// Add a parent edge `child -> parent`
    ///
    /// Returns `Ok(false)` without change if either group is unknown or the
    /// edge already exists.
    ///
    /// # Errors
    ///
    /// Returns `CircularDependency` if `parent == child` or `parent` already
    /// inherits from `child`.
    pub fn add_parent(
        &self,
        child: GroupId,
        parent: GroupId,
        now: DateTime<Utc>,
    ) -> Result<bool, GraphError> {
        let mut state = self.state.write();

        if !state.contains(child) || !state.contains(parent) {
            return Ok(false);
        }

        if child == parent {
            let name = state.describe(&[child]);
            return Err(GraphError::CircularDependency(format!("{} -> {}", name, name)));
        }

        if let Some(mut path) = state.path_to(parent, child) {
            path.insert(0, child);
            return Err(GraphError::CircularDependency(state.describe(&path)));
        }

        let Some(group) = state.groups.get_mut(&child) else {
            return Ok(false);
        };
        if group.parents.contains(&parent) {
            return Ok(false);
        }
        group.parents.push(parent);
        group.modified_at = now;

        debug!("Added parent edge {} -> {}", child, parent);
        Ok(true)
    }

    /// Remove a parent edge; `false` if it does not exist
    pub fn remove_parent(&self, child: GroupId, parent: GroupId, now: DateTime<Utc>) -> bool {
        self.update(child, now, |group| {
            let before = group.parents.len();
            group.parents.retain(|p| *p != parent);
            group.parents.len() != before
        })
    }

    /// Add a direct permission; `false` if already present or group unknown
    pub fn add_permission(&self, id: GroupId, permission: &str, now: DateTime<Utc>) -> bool {
        self.update(id, now, |group| group.permissions.insert(permission.to_string()))
    }

    /// Remove a direct permission; `false` if absent or group unknown
    pub fn remove_permission(&self, id: GroupId, permission: &str, now: DateTime<Utc>) -> bool {
        self.update(id, now, |group| group.permissions.remove(permission))
    }

    pub fn set_priority(&self, id: GroupId, priority: i32, now: DateTime<Utc>) -> bool {
        self.update(id, now, |group| {
            if group.priority == priority {
                return false;
            }
            group.priority = priority;
            true
        })
    }

    pub fn set_default(&self, id: GroupId, is_default: bool, now: DateTime<Utc>) -> bool {
        self.update(id, now, |group| {
            if group.is_default == is_default {
                return false;
            }
            group.is_default = is_default;
            true
        })
    }

    pub fn set_display(&self, id: GroupId, display: GroupDisplay, now: DateTime<Utc>) -> bool {
        self.update(id, now, |group| {
            if group.display == display {
                return false;
            }
            group.display = display;
            true
        })
    }

    /// Clone every group, ordered by id
    pub fn snapshot(&self) -> Vec<Group> {
        self.state.read().groups().into_iter().cloned().collect()
    }

    /// Apply `f` to one group under the write lock, stamping `modified_at` on change
    fn update<F>(&self, id: GroupId, now: DateTime<Utc>, f: F) -> bool
    where
        F: FnOnce(&mut Group) -> bool,
    {
        let mut state = self.state.write();
        let Some(group) = state.groups.get_mut(&id) else {
            return false;
        };
        let changed = f(group);
        if changed {
            group.modified_at = now;
        }
        changed
    }
}
