//! Benchmarks for stage-1 recall, stage-2 expansion and snapshot compaction.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use graphmem_store::{
    CommitRef, CompactionPolicy, Compactor, ConsumerIdentity, EdgeWrite, ExpansionParams, GraphStore,
    Hops, NodeType, NodeWrite, PreparedBatch, Snapshot, StoreConfig, Tier, SNAPSHOT_VERSION,
};

const NODES: usize = 2_000;
const DIM: usize = 64;
const SCOPE: &str = "bench/default";

fn vector(seed: usize) -> Vec<f32> {
    (0..DIM).map(|i| ((seed * 31 + i * 7) as f32).sin()).collect()
}

fn build_store() -> GraphStore {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = GraphStore::new(StoreConfig::in_memory()).unwrap();

    let tiers = [Tier::Hot, Tier::Warm, Tier::Cold, Tier::Archive];
    let mut batch = PreparedBatch::new();
    for i in 0..NODES {
        batch = batch.node(
            NodeWrite::new(SCOPE, format!("n{i}"), NodeType::Concept)
                .shared()
                .tier(tiers[i % tiers.len()])
                .title(format!("concept {i}"))
                .summary("x".repeat(256))
                .embedding(vector(i), "bench"),
        );
        if i > 0 {
            batch = batch.edge(
                EdgeWrite::new(SCOPE, "related", format!("n{}", i / 2), format!("n{i}"))
                    .weight((i % 10) as f32 / 10.0),
            );
        }
    }
    runtime
        .block_on(store.apply_write(batch, &CommitRef::new("bench", "0")))
        .unwrap();
    store
}

fn snapshot_of(store: &GraphStore) -> Snapshot {
    let nodes: Vec<_> = (0..NODES)
        .filter_map(|i| store.get_node(SCOPE, &format!("n{i}")))
        .collect();
    let edges: Vec<_> = (1..NODES)
        .filter_map(|i| store.get_edge(SCOPE, "related", &format!("n{}", i / 2), &format!("n{i}")))
        .collect();
    Snapshot {
        version: SNAPSHOT_VERSION,
        seq: store.seq(),
        nodes,
        edges,
        rule_defs: vec![],
        audit: vec![],
    }
}

fn bench_stage1(c: &mut Criterion) {
    let store = build_store();
    let query = vector(7);
    let consumer = ConsumerIdentity::anonymous();

    c.bench_function("stage1_2k_nodes", |bench| {
        bench.iter(|| black_box(store.stage1_candidates(&query, SCOPE, 64, 16, &consumer)))
    });
}

fn bench_stage2(c: &mut Criterion) {
    let store = build_store();
    let seeds: Vec<String> = (0..8).map(|i| format!("n{i}")).collect();
    let params = ExpansionParams {
        hops: Hops::Two,
        ..Default::default()
    };

    c.bench_function("stage2_two_hops", |bench| {
        bench.iter(|| black_box(store.stage2_edges(&seeds, SCOPE, &params)))
    });
}

fn bench_compaction(c: &mut Criterion) {
    let store = build_store();
    let snapshot = snapshot_of(&store);
    let policy = CompactionPolicy::default();
    let target = snapshot.encoded_len().unwrap() / 4;

    c.bench_function("compact_to_quarter", |bench| {
        bench.iter_batched(
            || snapshot.clone(),
            |mut snap| black_box(Compactor::new(&policy, target).compact(&mut snap).unwrap()),
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, bench_stage1, bench_stage2, bench_compaction);
criterion_main!(benches);
