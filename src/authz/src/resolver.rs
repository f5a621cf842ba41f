//! Effective permission resolution
//!
//! Builds the signed permission set the algebra evaluates for one actor in
//! one context at one instant:
//!
//! 1. direct permissions
//! 2. inherited permissions of every active group, highest priority first
//! 3. temporary permissions whose expiry is still in the future
//! 4. permissions of the server context and of the requested context
//! 5. negation pass: a positive node whose exact string is also negated is
//!    dropped, and the `-` nodes are kept for wildcard-deny scanning

use crate::algebra::{self, NEGATION_PREFIX};
use crate::graph::GroupGraph;
use crate::model::Actor;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// A resolved permission set and the instant it stops being accurate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSet {
    /// Signed nodes after the negation pass
    pub permissions: HashSet<String>,

    /// Earliest future expiry of a temporary grant or membership
    pub expires_at: Option<DateTime<Utc>>,
}

/// Computes effective permission sets from actor records and the group graph
#[derive(Debug)]
pub struct EffectiveResolver {
    graph: Arc<GroupGraph>,
    server_context: Option<String>,
}

impl EffectiveResolver {
    /// Create a resolver over `graph`
    ///
    /// `server_context` is unioned into every resolution when set.
    pub fn new(graph: Arc<GroupGraph>, server_context: Option<String>) -> Self {
        let server_context = server_context
            .map(|ctx| ctx.trim().to_string())
            .filter(|ctx| !ctx.is_empty());
        Self {
            graph,
            server_context,
        }
    }

    pub fn server_context(&self) -> Option<&str> {
        self.server_context.as_deref()
    }

    /// The effective set for `actor` in `context` at `now`
    pub fn compute_raw_set(
        &self,
        actor: &Actor,
        context: Option<&str>,
        now: DateTime<Utc>,
    ) -> RawSet {
        let mut raw: HashSet<String> = actor.permissions.clone();

        {
            let graph = self.graph.read();
            let ordered = graph.order_by_priority(&actor.active_groups(now));
            let mut visited = HashSet::new();
            for group in ordered {
                graph.collect_permissions(group, &mut raw, &mut visited);
            }
        }

        raw.extend(
            actor
                .active_temporary_permissions(now)
                .map(|(permission, _)| permission.clone()),
        );

        for ctx in [self.server_context(), context].into_iter().flatten() {
            if ctx.is_empty() {
                continue;
            }
            if let Some(scoped) = actor.context_permissions.get(ctx) {
                raw.extend(scoped.iter().cloned());
            }
        }

        let permissions = apply_negations(raw);
        debug!(
            "Resolved {} permission node(s) for actor {} (context: {:?})",
            permissions.len(),
            actor.id,
            context
        );

        RawSet {
            permissions,
            expires_at: actor.next_expiry(now),
        }
    }

    /// Whether `actor` holds `permission` in `context` at `now`
    pub fn has_permission(
        &self,
        actor: &Actor,
        permission: &str,
        context: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        let raw = self.compute_raw_set(actor, context, now);
        algebra::resolve(permission, &raw.permissions)
    }
}

/// Drop every positive node whose exact string is also negated
///
/// Matching is by string equality only; wildcard coverage is left to the
/// algebra, which still sees every `-` node.
pub fn apply_negations(raw: HashSet<String>) -> HashSet<String> {
    let negated: HashSet<String> = raw
        .iter()
        .filter_map(|node| node.strip_prefix(NEGATION_PREFIX))
        .map(str::to_string)
        .collect();

    if negated.is_empty() {
        return raw;
    }

    raw.into_iter()
        .filter(|node| algebra::is_negated(node) || !negated.contains(node))
        .collect()
}
