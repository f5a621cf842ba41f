//! Group graph integration tests
//!
//! Deep and diamond hierarchies, concurrent edge insertion, and the
//! acyclicity property under arbitrary edge sequences.

use chrono::Utc;
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use warden_authz::{GraphError, Group, GroupGraph};
use warden_core::GroupId;

/// Guest ← member ← vip ← moderator ← admin, plus a side branch builder ← moderator
fn create_server_hierarchy() -> (GroupGraph, Vec<GroupId>) {
    let now = Utc::now();
    let groups = vec![
        Group::new(GroupId(0), "guest", now).with_permission("chat.read").as_default(),
        Group::new(GroupId(1), "member", now)
            .with_priority(10)
            .with_permission("chat.send")
            .with_parent(GroupId(0)),
        Group::new(GroupId(2), "vip", now)
            .with_priority(20)
            .with_permission("fly")
            .with_parent(GroupId(1)),
        Group::new(GroupId(3), "builder", now)
            .with_priority(20)
            .with_permission("world.edit.*"),
        Group::new(GroupId(4), "moderator", now)
            .with_priority(50)
            .with_permission("chat.mute")
            .with_parent(GroupId(2))
            .with_parent(GroupId(3)),
        Group::new(GroupId(5), "admin", now)
            .with_priority(100)
            .with_permission("*")
            .with_parent(GroupId(4)),
    ];
    let ids = groups.iter().map(|g| g.id).collect();
    (GroupGraph::from_groups(groups).unwrap(), ids)
}

#[test]
fn test_deep_inheritance() {
    let (graph, ids) = create_server_hierarchy();
    let state = graph.read();

    let admin = state.all_permissions(ids[5]);
    for perm in ["*", "chat.mute", "fly", "chat.send", "chat.read", "world.edit.*"] {
        assert!(admin.contains(perm), "admin should inherit {}", perm);
    }

    assert!(state.inherits_from(ids[5], ids[0]));
    assert!(state.inherits_from(ids[4], ids[3]));
    assert!(!state.inherits_from(ids[3], ids[0]));
}

#[test]
fn test_topological_order_puts_parents_first() {
    let (graph, ids) = create_server_hierarchy();
    let order = graph.read().topological_order().unwrap();
    let position = |id: GroupId| order.iter().position(|g| *g == id).unwrap();

    assert!(position(ids[0]) < position(ids[1]));
    assert!(position(ids[1]) < position(ids[2]));
    assert!(position(ids[2]) < position(ids[4]));
    assert!(position(ids[3]) < position(ids[4]));
    assert!(position(ids[4]) < position(ids[5]));
}

#[test]
fn test_closing_edge_reports_path() {
    let (graph, ids) = create_server_hierarchy();
    match graph.add_parent(ids[0], ids[5], Utc::now()) {
        Err(GraphError::CircularDependency(path)) => {
            assert!(path.starts_with("guest -> admin"));
            assert!(path.ends_with("-> guest"));
        }
        other => panic!("Expected CircularDependency error, got {:?}", other),
    }
    assert!(graph.read().get(ids[0]).unwrap().parents.is_empty());
}

#[test]
fn test_transitively_redundant_edge_is_allowed() {
    let (graph, ids) = create_server_hierarchy();
    // admin already reaches guest through moderator; a direct edge is still acyclic
    assert!(graph.add_parent(ids[5], ids[0], Utc::now()).unwrap());
    assert!(graph.read().topological_order().is_ok());
}

#[test]
fn test_delete_middle_of_chain() {
    let (graph, ids) = create_server_hierarchy();
    graph.delete_group(ids[2], Utc::now(), |_, _| {});

    let state = graph.read();
    let moderator = state.all_permissions(ids[4]);
    assert!(!moderator.contains("fly"));
    assert!(!moderator.contains("chat.send"));
    assert!(moderator.contains("world.edit.*"));
    assert!(!state.inherits_from(ids[5], ids[0]));
}

#[test]
fn test_concurrent_opposing_edges_never_form_cycle() {
    for _ in 0..50 {
        let graph = Arc::new(GroupGraph::new());
        let a = graph.create_group("a", Utc::now()).unwrap().id;
        let b = graph.create_group("b", Utc::now()).unwrap().id;

        let g1 = Arc::clone(&graph);
        let g2 = Arc::clone(&graph);
        let t1 = thread::spawn(move || g1.add_parent(a, b, Utc::now()));
        let t2 = thread::spawn(move || g2.add_parent(b, a, Utc::now()));
        let r1 = t1.join().unwrap();
        let r2 = t2.join().unwrap();

        assert!(r1.is_ok() != r2.is_ok(), "exactly one edge must be accepted");
        assert!(graph.read().topological_order().is_ok());
    }
}

#[derive(Debug, Clone)]
enum EdgeOp {
    Add(u32, u32),
    Remove(u32, u32),
}

fn edge_op(groups: u32) -> impl Strategy<Value = EdgeOp> {
    prop_oneof![
        3 => (0..groups, 0..groups).prop_map(|(c, p)| EdgeOp::Add(c, p)),
        1 => (0..groups, 0..groups).prop_map(|(c, p)| EdgeOp::Remove(c, p)),
    ]
}

proptest! {
    #[test]
    fn test_no_edge_sequence_creates_a_cycle(
        ops in prop::collection::vec(edge_op(8), 0..60)
    ) {
        let now = Utc::now();
        let graph = GroupGraph::new();
        for i in 0..8 {
            graph.create_group(&format!("g{}", i), now).unwrap();
        }

        for op in ops {
            match op {
                EdgeOp::Add(child, parent) => {
                    let before = graph.read().get(GroupId(child)).unwrap().parents.clone();
                    let result = graph.add_parent(GroupId(child), GroupId(parent), now);
                    if result.is_err() {
                        let after = graph.read().get(GroupId(child)).unwrap().parents.clone();
                        prop_assert_eq!(before, after);
                    }
                }
                EdgeOp::Remove(child, parent) => {
                    graph.remove_parent(GroupId(child), GroupId(parent), now);
                }
            }

            let state = graph.read();
            prop_assert!(state.topological_order().is_ok());
            for i in 0..8 {
                prop_assert!(!state.inherits_from(GroupId(i), GroupId(i)));
            }
        }
    }

    #[test]
    fn test_duplicate_edge_is_idempotent(child in 0u32..4, parent in 0u32..4) {
        prop_assume!(child != parent);
        let now = Utc::now();
        let graph = GroupGraph::new();
        for i in 0..4 {
            graph.create_group(&format!("g{}", i), now).unwrap();
        }

        prop_assert!(graph.add_parent(GroupId(child), GroupId(parent), now).unwrap());
        prop_assert!(!graph.add_parent(GroupId(child), GroupId(parent), now).unwrap());
        prop_assert_eq!(graph.read().get(GroupId(child)).unwrap().parents.len(), 1);
    }
}
