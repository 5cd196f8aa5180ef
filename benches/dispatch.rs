use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ignition_batch::{BatchConfig, ReferenceKinetics, run};
use std::hint::black_box;

const N_POINTS: usize = 500;
const SPECIES: usize = 3;

/// Temperature sweep from 800 K to 1300 K at 200 atm, fuel/product 70/30.
fn sweep() -> Vec<f64> {
    let mut data = Vec::with_capacity(N_POINTS * (SPECIES + 2));
    for i in 0..N_POINTS {
        let frac = i as f64 / N_POINTS as f64;
        data.push(800.0 + 500.0 * frac);
        data.push(101_325.0 * 200.0 + 500.0 * frac);
        data.extend_from_slice(&[0.7, 0.0, 0.3]);
    }
    data
}

fn bench_dispatch(c: &mut Criterion) {
    let loader = ReferenceKinetics::default();
    let initial = sweep();
    let max_threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    let mut threads: Vec<usize> = [1, 2, 4, max_threads]
        .into_iter()
        .filter(|&n| n <= max_threads)
        .collect();
    threads.dedup();

    let mut group = c.benchmark_group("two_step_sweep");
    group.sample_size(10);
    for n in threads {
        let config = BatchConfig::new("two-step", 0.1)
            .with_threshold(300.0)
            .with_tolerances(1e-6, 1e-6)
            .with_threads(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &config, |b, config| {
            b.iter(|| {
                let mut data = initial.clone();
                let report = run(&loader, &mut data, N_POINTS, SPECIES, config).unwrap();
                black_box((data, report))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
