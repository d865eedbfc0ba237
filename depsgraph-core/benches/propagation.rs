//! Rebuild, propagation and scheduling cost on a parenting chain with
//! collection instancing at the leaves.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use depsgraph_core::eval;
use depsgraph_core::pipeline;
use depsgraph_core::store::{DatablockId, DatablockStore, ObjectType};
use depsgraph_core::tag::{self, UpdateSource};
use depsgraph_core::{Depsgraph, EvaluationScope, GraphConfig, Recalc};

/// `depth` objects parented in a chain, each instancing a collection of
/// four meshes.
fn scene(depth: usize) -> (DatablockStore, DatablockId) {
    let mut store = DatablockStore::new();
    let root = store.add_object("Root", ObjectType::Empty);
    let mut parent = root;
    for i in 0..depth {
        let collection = store.add_collection(format!("Set{i}"));
        for j in 0..4 {
            let mesh = store.add_object(format!("Mesh{i}.{j}"), ObjectType::Mesh);
            store.link_object(collection, mesh).ok();
        }
        let empty = store.add_object(format!("Empty{i}"), ObjectType::Empty);
        store.set_parent(empty, Some(parent)).ok();
        store.set_instance_collection(empty, Some(collection)).ok();
        parent = empty;
    }
    (store, root)
}

fn bench_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebuild");
    for depth in [16, 128] {
        let (store, _) = scene(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &store, |b, store| {
            let mut graph = Depsgraph::new(EvaluationScope::AllObjects, GraphConfig::default());
            b.iter(|| pipeline::build(&mut graph, black_box(store)))
        });
    }
    group.finish();
}

fn bench_tag_and_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("tag_and_schedule");
    for depth in [16, 128] {
        let (store, root) = scene(depth);
        let mut graph = Depsgraph::new(EvaluationScope::AllObjects, GraphConfig::default());
        if pipeline::build(&mut graph, &store).is_err() {
            continue;
        }
        group.bench_function(BenchmarkId::from_parameter(depth), |b| {
            b.iter(|| {
                tag::clear_tags(&mut graph);
                tag::id_tag_update(&mut graph, root, Recalc::TRANSFORM, UpdateSource::UserEdit);
                eval::schedule(black_box(&graph)).len()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_rebuild, bench_tag_and_schedule);
criterion_main!(benches);
