//! Crew dispatch benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use sheen_core::{Engine, EngineConfig};
use sheen_crew::{Coordinator, Crew, Machine, SpecLibrary, SpecSource};
use std::sync::Arc;

fn library() -> Arc<SpecLibrary> {
    let library = SpecLibrary::new(".");
    library.insert(
        "counter",
        &json!({"nodes": {
            "start": {"branching": {"type": "message", "branches": [
                {"pattern": {"event": "bump"}, "target": "counting"}
            ]}},
            "counting": {
                "action": {"interpreter": "ecmascript", "source": "_.bindings.n = (_.bindings.n || 0) + 1; _.out({did: 'bumped', id: '${id}'});"},
                "branching": {"branches": [{"target": "start"}]}
            }
        }}),
    );
    Arc::new(library)
}

fn crew(size: usize) -> Crew {
    let mut crew = Crew::new("bench");
    for i in 0..size {
        crew.add_machine(format!("m{}", i), Machine::new("counter"));
    }
    crew
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("crew_dispatch");
    let coordinator = Coordinator::new(Arc::new(Engine::new(EngineConfig::default())), library());
    let message = json!({"event": "bump"});

    for size in [1usize, 16, 128] {
        let mut crew = crew(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("broadcast", size), &size, |b, _| {
            b.iter(|| black_box(coordinator.dispatch(&mut crew, &message)))
        });
    }

    let mut crew = crew(128);
    let targeted = json!({"event": "bump", "to": ["m3", "m64"]});
    group.throughput(Throughput::Elements(2));
    group.bench_function("targeted_of_128", |b| {
        b.iter(|| black_box(coordinator.dispatch(&mut crew, &targeted)))
    });

    group.finish();
}

fn bench_spec_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("spec_resolution");

    let cached = library();
    group.bench_function("cached", |b| {
        b.iter(|| black_box(cached.resolve("counter", "m1").unwrap()))
    });

    let uncached = SpecLibrary::new(".").without_cache();
    uncached.insert("counter", &json!({"nodes": {"start": {}}}));
    group.bench_function("uncached", |b| {
        b.iter(|| black_box(uncached.resolve("counter", "m1").unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_dispatch, bench_spec_resolution);
criterion_main!(benches);
