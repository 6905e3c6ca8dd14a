use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use dataflow_redist::prelude::*;
use dataflow_redist::redist::count::dest_counts;
use dataflow_redist::redist::round::round_segments;

// Particle-like container: positions, velocities and an id per item.
fn particles(n: usize, seed: u64) -> Container {
    let mut rng = SmallRng::seed_from_u64(seed);
    let pos: Vec<f32> = (0..3 * n).map(|_| rng.r#gen::<f32>()).collect();
    let vel: Vec<f64> = (0..3 * n).map(|_| rng.r#gen::<f64>()).collect();
    let ids: Vec<u64> = (0..n as u64).collect();
    let mut c = Container::new();
    c.append_data(
        "pos",
        Field::array(pos, 3),
        Flags::ZCURVEKEY,
        Scope::Private,
        SplitPolicy::Default,
        MergePolicy::AppendValues,
    )
    .unwrap();
    c.append_data(
        "vel",
        Field::vector(vel, 3),
        Flags::NOFLAG,
        Scope::Private,
        SplitPolicy::Default,
        MergePolicy::AppendValues,
    )
    .unwrap();
    c.append_data(
        "id",
        Field::vector(ids, 1),
        Flags::NOFLAG,
        Scope::Private,
        SplitPolicy::Default,
        MergePolicy::AppendValues,
    )
    .unwrap();
    c
}

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("split");

    for &(n, dests) in &[(10_000, 4), (100_000, 16)] {
        let data = particles(n, 42);
        let total = n as u64;

        group.bench_with_input(
            BenchmarkId::new("count", format!("n{n}_d{dests}")),
            &data,
            |b, data| {
                b.iter(|| {
                    let counts = dest_counts(0, total, total, dests);
                    data.split_counts(&counts).unwrap()
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("round", format!("n{n}_d{dests}")),
            &data,
            |b, data| {
                b.iter(|| {
                    let segments = round_segments(0, n, dests);
                    data.split_segments(&segments).unwrap()
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("merge", format!("n{n}_d{dests}")),
            &data,
            |b, data| {
                let counts = dest_counts(0, total, total, dests);
                let chunks = data.split_counts(&counts).unwrap();
                let bufs: Vec<_> = chunks.iter().map(|c| c.serialize().unwrap()).collect();
                b.iter(|| {
                    let mut merged = Container::new();
                    for buf in &bufs {
                        merged.merge_bytes(buf).unwrap();
                    }
                    merged
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_split);
criterion_main!(benches);
