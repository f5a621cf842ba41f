//! Permission algebra precedence tests
//!
//! Covers the denial scan, exact and universal grants, the wildcard scan,
//! and the least-specific-denial rule.

use proptest::prelude::*;
use std::collections::HashSet;
use warden_authz::algebra::{evaluate, is_set, prefix_chain, resolve};
use warden_authz::Verdict;

fn grants(nodes: &[&str]) -> HashSet<String> {
    nodes.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_wildcard_grant_covers_descendants() {
    assert!(resolve("a.b.c", &grants(&["a.b.*"])));
}

#[test]
fn test_exact_deny_found_before_wildcard_grant() {
    let set = grants(&["a.b.*", "-a.b.c"]);
    assert!(!resolve("a.b.c", &set));
    assert_eq!(evaluate("a.b.c", &set), Verdict::Denied("-a.b.c".to_string()));
}

#[test]
fn test_broad_deny_overrides_narrow_exact_grant() {
    assert!(!resolve("a.b", &grants(&["-a", "a.b"])));
}

#[test]
fn test_first_denial_on_the_walk_decides() {
    let set = grants(&["-server.*", "-server.command"]);
    assert_eq!(
        evaluate("server.command.stop", &set),
        Verdict::Denied("-server.*".to_string())
    );
}

#[test]
fn test_exact_grant_before_universal() {
    let set = grants(&["*", "server.stop"]);
    assert_eq!(
        evaluate("server.stop", &set),
        Verdict::Granted("server.stop".to_string())
    );
    assert_eq!(evaluate("chat.send", &set), Verdict::Granted("*".to_string()));
}

#[test]
fn test_least_specific_wildcard_grant_reported() {
    let set = grants(&["a.*", "a.b.*"]);
    assert_eq!(evaluate("a.b.c", &set), Verdict::Granted("a.*".to_string()));
}

#[test]
fn test_nothing_matches() {
    let set = grants(&["a.b", "c.*"]);
    assert_eq!(evaluate("a.c", &set), Verdict::Unset);
    assert!(!resolve("a", &set));
    assert!(!resolve("a", &HashSet::new()));
}

#[test]
fn test_is_set_reports_denials() {
    let set = grants(&["-a.b"]);
    assert!(is_set("a.b", &set));
    assert!(is_set("a.b.c", &set));
    assert!(!resolve("a.b", &set));
    assert!(!is_set("a.c", &set));
}

fn node() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-c]{1,2}", 1..4).prop_map(|segments| segments.join("."))
}

fn signed_node() -> impl Strategy<Value = String> {
    (node(), any::<bool>(), any::<bool>()).prop_map(|(node, negated, wildcard)| {
        let node = if wildcard { format!("{}.*", node) } else { node };
        if negated {
            format!("-{}", node)
        } else {
            node
        }
    })
}

proptest! {
    #[test]
    fn test_resolution_is_deterministic(
        permission in node(),
        set in prop::collection::hash_set(signed_node(), 0..12)
    ) {
        let first = evaluate(&permission, &set);
        let second = evaluate(&permission, &set);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn test_denial_of_any_prefix_always_wins(
        permission in node(),
        mut set in prop::collection::hash_set(signed_node(), 0..12),
        pick in any::<prop::sample::Index>()
    ) {
        let chain = prefix_chain(&permission);
        let prefix = chain[pick.index(chain.len())];
        set.insert(format!("-{}", prefix));
        set.insert("*".to_string());
        set.insert(permission.clone());

        prop_assert!(!resolve(&permission, &set));
    }

    #[test]
    fn test_positive_only_sets_grant_exact_members(
        set in prop::collection::hash_set(node(), 1..8)
    ) {
        for permission in &set {
            prop_assert!(resolve(permission, &set));
        }
    }

    #[test]
    fn test_universal_without_denials_grants_everything(permission in node()) {
        prop_assert!(resolve(&permission, &grants(&["*"])));
    }
}
