use criterion::{Criterion, black_box, criterion_group, criterion_main};

use redgraph_core::jobs::JobSystem;

// ---------------------------------------------------------------------------
// Job system
// ---------------------------------------------------------------------------

fn bench_schedule_and_wait(c: &mut Criterion) {
    let jobs = JobSystem::new(4);
    c.bench_function("jobs_schedule_wait_single", |b| {
        b.iter(|| jobs.schedule(|| black_box(1u64) + 1).wait());
    });
}

fn bench_fan_out_4(c: &mut Criterion) {
    let jobs = JobSystem::new(4);
    c.bench_function("jobs_fan_out_4", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4u64)
                .map(|i| jobs.schedule(move || (0..256u64).map(|x| x ^ i).sum::<u64>()))
                .collect();
            handles.into_iter().map(|h| h.wait()).sum::<u64>()
        });
    });
}

fn bench_wait_idle(c: &mut Criterion) {
    let jobs = JobSystem::new(4);
    c.bench_function("jobs_wait_idle_64", |b| {
        b.iter(|| {
            for i in 0..64u64 {
                let _ = jobs.schedule(move || black_box(i * 3));
            }
            jobs.wait_idle();
        });
    });
}

criterion_group!(
    benches,
    bench_schedule_and_wait,
    bench_fan_out_4,
    bench_wait_idle
);
criterion_main!(benches);
