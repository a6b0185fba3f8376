use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use orderline_pipeline::simulate::{Job, SimulatedInfer};
use orderline_pipeline::{AsyncPipeline, WorkerContext};

/// Overhead of the queues and reorder buffer with a trivial collaborator
fn bench_ordering_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("ordering_overhead");

    for workers in [1, 2, 4, 8].iter() {
        let pipeline = AsyncPipeline::with_workers(*workers, |_: &WorkerContext| {
            Ok(|x: u64| -> anyhow::Result<u64> { Ok(x.wrapping_mul(31)) })
        })
        .unwrap();

        group.bench_with_input(BenchmarkId::new("items_1000", workers), &pipeline, |b, pipeline| {
            b.iter(|| {
                let sum: u64 = pipeline
                    .map_ordered(0..1000u64)
                    .map(|r| r.unwrap())
                    .fold(0, u64::wrapping_add);
                black_box(sum)
            })
        });
    }

    group.finish();
}

/// Wall time for a batch of 1ms items as the pool grows
fn bench_parallel_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_latency");
    group.sample_size(10);

    for workers in [1, 4, 8].iter() {
        let pipeline = AsyncPipeline::with_workers(*workers, SimulatedInfer::factory).unwrap();

        group.bench_with_input(BenchmarkId::new("jobs_32x1ms", workers), &pipeline, |b, pipeline| {
            b.iter(|| {
                let jobs = (0..32).map(|id| Job::new(id, 1));
                let delivered = pipeline.map_ordered(jobs).filter(|r| r.is_ok()).count();
                black_box(delivered)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_ordering_overhead, bench_parallel_latency);
criterion_main!(benches);
