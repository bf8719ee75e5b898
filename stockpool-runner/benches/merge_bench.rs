//! Criterion benchmarks for the merge and fusion hot paths.
//!
//! Run with: `cargo bench -p stockpool-runner`
//!
//! - Merging one strategy's results into pools of increasing size
//! - Fusing a single entity with the offline scorer

use std::sync::Arc;

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stockpool_core::domain::{
    CycleKey, EntityId, EntityRecord, Namespace, PoolRecord, StrategyResult, StrategyValue,
};
use stockpool_core::scoring::HeuristicScorer;
use stockpool_core::RawResult;
use stockpool_runner::{MemoryPoolStore, PoolMergeEngine, PoolStore, SignalFusionEngine};

fn entity_ids(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{:06}", 600_000 + i)).collect()
}

fn engine_with_pool(count: usize) -> (PoolMergeEngine, CycleKey) {
    let cycle = CycleKey::new(2024, 23).unwrap();
    let store = MemoryPoolStore::new();
    let entities = entity_ids(count).iter().map(|id| EntityRecord::from(id.as_str())).collect();
    store.create(PoolRecord::new(cycle.clone(), entities, Utc::now())).unwrap();
    (PoolMergeEngine::new(Arc::new(store)), cycle)
}

/// Benchmark a full-pool merge into one namespace
fn bench_merge_namespace(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_namespace");

    for size in [10, 100, 1000].iter() {
        let (engine, cycle) = engine_with_pool(*size);
        let results: Vec<RawResult> = entity_ids(*size)
            .into_iter()
            .enumerate()
            .map(|(i, id)| {
                RawResult::new(EntityId::from(id), Some((i % 100) as f64), StrategyValue::text("bench"))
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let _ = engine.merge_namespace(&cycle, Namespace::Tech, "rsi", black_box(&results));
            });
        });
    }

    group.finish();
}

/// Benchmark fusing one entity with a dozen stored scores
fn bench_fuse_entity(c: &mut Criterion) {
    let mut record = EntityRecord::from("600519");
    for (i, ns) in Namespace::SCORED.iter().enumerate() {
        for j in 0..3 {
            record.namespace_mut(*ns).insert(
                format!("s{j}"),
                StrategyResult::new(0.1 + (i * 3 + j) as f64 * 0.05, StrategyValue::default()),
            );
        }
    }
    let engine = SignalFusionEngine::new(Arc::new(HeuristicScorer));

    c.bench_function("fuse_entity", |b| {
        b.iter(|| engine.fuse(black_box(&record), 12));
    });
}

criterion_group!(benches, bench_merge_namespace, bench_fuse_entity);

criterion_main!(benches);
