//! Permission matching algebra
//!
//! Permission nodes are dot-separated hierarchical tokens
//! (`server.command.stop`). A grant set may contain:
//!
//! - exact nodes: `server.stop`
//! - wildcard nodes: `server.*` (every node under the `server` prefix)
//! - the universal wildcard: `*`
//! - negations of any of the above: `-server.stop`, `-server.*`, `-server`
//!
//! Evaluation walks the prefix chain of the queried node from the least
//! specific prefix to the most specific one. The first denial found on that
//! walk decides, even when a more specific positive grant exists:
//! `{"-a", "a.b"}` denies `a.b`.
//!
//! Everything here is pure and allocation-light; no synchronization needed.

use crate::error::ValidationError;
use std::collections::HashSet;
use std::fmt;

/// Universal wildcard node
pub const UNIVERSAL: &str = "*";

/// Prefix marking a denial
pub const NEGATION_PREFIX: char = '-';

/// Suffix marking a wildcard node
pub const WILDCARD_SUFFIX: &str = ".*";

/// Outcome of evaluating one permission against a grant set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Denied by the contained node
    Denied(String),
    /// Granted by the contained node
    Granted(String),
    /// Nothing in the grant set covers the permission
    Unset,
}

impl Verdict {
    /// Whether the permission is allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Granted(_))
    }

    /// Whether any grant or denial covers the permission
    pub fn is_set(&self) -> bool {
        !matches!(self, Verdict::Unset)
    }

    /// The grant-set node that decided, if any
    pub fn decided_by(&self) -> Option<&str> {
        match self {
            Verdict::Denied(node) | Verdict::Granted(node) => Some(node),
            Verdict::Unset => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Denied(node) => write!(f, "denied by '{}'", node),
            Verdict::Granted(node) => write!(f, "granted by '{}'", node),
            Verdict::Unset => write!(f, "unset"),
        }
    }
}

/// Whether `node` is a negation
pub fn is_negated(node: &str) -> bool {
    node.starts_with(NEGATION_PREFIX)
}

/// Strip a leading negation marker, if present
pub fn strip_negation(node: &str) -> &str {
    node.strip_prefix(NEGATION_PREFIX).unwrap_or(node)
}

/// Whether `node` (without negation) is a wildcard
pub fn is_wildcard(node: &str) -> bool {
    let node = strip_negation(node);
    node == UNIVERSAL || node.ends_with(WILDCARD_SUFFIX)
}

/// Validates a permission node as stored in a grant set
///
/// Accepted: non-empty dot-separated segments, no whitespace, an optional
/// leading `-`, and `*` only as the whole final segment (or on its own).
pub fn validate_node(node: &str) -> Result<(), ValidationError> {
    let body = strip_negation(node);

    if body.is_empty() || body.starts_with(NEGATION_PREFIX) {
        return Err(ValidationError::InvalidPermission(node.to_string()));
    }

    if body.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidPermission(node.to_string()));
    }

    let segments: Vec<&str> = body.split('.').collect();
    for (idx, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err(ValidationError::InvalidPermission(node.to_string()));
        }

        // Wildcards must be standalone and last
        if segment.contains('*') && (*segment != UNIVERSAL || idx + 1 != segments.len()) {
            return Err(ValidationError::InvalidPermission(node.to_string()));
        }
    }

    Ok(())
}

/// Builds the chain of increasingly specific prefixes of `permission`
///
/// `server.command.stop` → `[server, server.command, server.command.stop]`
pub fn prefix_chain(permission: &str) -> Vec<&str> {
    let mut chain: Vec<&str> = permission
        .match_indices('.')
        .map(|(idx, _)| &permission[..idx])
        .collect();
    chain.push(permission);
    chain
}

/// Evaluates `permission` against `grants` and reports which node decided
///
/// 1. Denial scan over the prefix chain: `-prefix` or `-prefix.*` denies.
/// 2. Exact grant.
/// 3. Universal wildcard.
/// 4. Wildcard scan over the prefix chain: `prefix.*` grants.
pub fn evaluate(permission: &str, grants: &HashSet<String>) -> Verdict {
    if permission.is_empty() {
        return Verdict::Unset;
    }

    let chain = prefix_chain(permission);
    let mut candidate = String::with_capacity(permission.len() + 3);

    for prefix in &chain {
        if let Some(node) = lookup_negated(grants, &mut candidate, prefix, "") {
            return Verdict::Denied(node);
        }
        if let Some(node) = lookup_negated(grants, &mut candidate, prefix, WILDCARD_SUFFIX) {
            return Verdict::Denied(node);
        }
    }

    if grants.contains(permission) {
        return Verdict::Granted(permission.to_string());
    }

    if grants.contains(UNIVERSAL) {
        return Verdict::Granted(UNIVERSAL.to_string());
    }

    // wildcard denials were already ruled out by the first scan
    for prefix in &chain {
        candidate.clear();
        candidate.push_str(prefix);
        candidate.push_str(WILDCARD_SUFFIX);
        if grants.contains(candidate.as_str()) {
            return Verdict::Granted(candidate.clone());
        }
    }

    Verdict::Unset
}

/// Whether `permission` is allowed by `grants`
pub fn resolve(permission: &str, grants: &HashSet<String>) -> bool {
    evaluate(permission, grants).is_allowed()
}

/// Whether any node in `grants` covers `permission`, positively or negatively
pub fn is_set(permission: &str, grants: &HashSet<String>) -> bool {
    evaluate(permission, grants).is_set()
}

fn lookup_negated(
    grants: &HashSet<String>,
    candidate: &mut String,
    prefix: &str,
    suffix: &str,
) -> Option<String> {
    candidate.clear();
    candidate.push(NEGATION_PREFIX);
    candidate.push_str(prefix);
    candidate.push_str(suffix);

    if grants.contains(candidate.as_str()) {
        Some(candidate.clone())
    } else {
        None
    }
}
