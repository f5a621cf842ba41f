//! Permission resolution benchmarks
//!
//! Cached vs uncached checks over group hierarchies of increasing depth, plus
//! the bare algebra over sets of increasing size.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::HashSet;
use std::sync::Arc;
use warden_authz::algebra;
use warden_authz::{Engine, EngineConfig, MemoryStorage};
use warden_core::{ActorId, SystemClock};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}

/// Chain of `depth` groups, each inheriting the previous, with 10 nodes apiece
fn create_engine(depth: usize, cache: bool) -> (Engine, ActorId) {
    init_tracing();
    let mut config = EngineConfig::default();
    config.cache.enabled = cache;
    config.cache.ttl_ms = 60_000;
    let engine = Engine::activate(config, Arc::new(MemoryStorage::new()), Arc::new(SystemClock))
        .unwrap();

    let mut previous = None;
    for level in 0..depth {
        let group = engine.create_group(&format!("level{}", level)).unwrap();
        for node in 0..10 {
            engine
                .add_group_permission(group, &format!("plugin{}.command{}", level, node))
                .unwrap();
        }
        if let Some(parent) = previous {
            engine.add_group_parent(group, parent).unwrap();
        }
        previous = Some(group);
    }

    let actor = ActorId::generate();
    engine.register_actor(actor, "bench").unwrap();
    if let Some(top) = previous {
        engine.add_group_membership(actor, top).unwrap();
    }
    engine.add_direct_permission(actor, "-plugin0.command3").unwrap();
    (engine, actor)
}

fn bench_has_permission(c: &mut Criterion) {
    let mut group = c.benchmark_group("has_permission");

    for depth in [1, 5, 20].iter() {
        for cached in [false, true] {
            let label = if cached { "cached" } else { "uncached" };
            group.bench_with_input(BenchmarkId::new(label, depth), depth, |b, &depth| {
                let (engine, actor) = create_engine(depth, cached);
                b.iter(|| {
                    let allowed =
                        engine.has_permission(black_box(actor), black_box("plugin0.command7"), None);
                    black_box(allowed);
                });
            });
        }
    }

    group.finish();
}

fn bench_algebra(c: &mut Criterion) {
    let mut group = c.benchmark_group("algebra_evaluate");

    for size in [10, 100, 1000].iter() {
        let mut set: HashSet<String> = (0..*size)
            .map(|i| format!("plugin{}.command{}", i % 50, i))
            .collect();
        set.insert("-plugin3.*".to_string());
        set.insert("plugin7.*".to_string());

        group.bench_with_input(BenchmarkId::new("nodes", size), &set, |b, set| {
            b.iter(|| {
                black_box(algebra::evaluate(black_box("plugin7.admin.reload"), set));
                black_box(algebra::evaluate(black_box("plugin3.command3"), set));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_has_permission, bench_algebra);
criterion_main!(benches);
