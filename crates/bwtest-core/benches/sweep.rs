//! Criterion benchmarks for the copy engine's control path.
//!
//! The simulated runtime does real host memcpys on a worker thread, so these
//! numbers track engine plus simulator overhead per transaction rather than
//! any hardware bandwidth.

use bwtest_common::BenchConfig;
use bwtest_core::{BenchmarkDriver, Progress, RequestKind, Transaction};
use bwtest_hsa::{SimRuntime, Topology};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

fn config(size: usize, validate: bool) -> BenchConfig {
    BenchConfig { sizes: Some(vec![size]), iterations: 10, validate, ..BenchConfig::default() }
}

// ---------------------------------------------------------------------------
// Unidirectional vs bidirectional
// ---------------------------------------------------------------------------

fn bench_direction(c: &mut Criterion) {
    let mut group = c.benchmark_group("transaction");
    let rt = SimRuntime::new(Topology::single_gpu()).expect("sim runtime");

    for size in [4 << 10, 256 << 10, 4 << 20] {
        for kind in [RequestKind::CopyUnidir, RequestKind::CopyBidir] {
            let label = format!("{kind}");
            group.bench_with_input(BenchmarkId::new(label, size), &size, |b, &size| {
                b.iter(|| {
                    let mut driver = BenchmarkDriver::new(&rt, config(size, false), Progress::disabled());
                    let mut list = vec![Transaction::new(kind, 0, 2, true)];
                    black_box(driver.run(&mut list).expect("run"));
                })
            });
        }
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Validation round trip
// ---------------------------------------------------------------------------

fn bench_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("validated");
    let rt = SimRuntime::new(Topology::single_gpu()).expect("sim runtime");

    for size in [4 << 10, 4 << 20] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut driver = BenchmarkDriver::new(&rt, config(size, true), Progress::disabled());
                let mut list = vec![Transaction::new(RequestKind::CopyUnidir, 0, 2, true)];
                black_box(driver.run(&mut list).expect("run"));
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_direction, bench_validation);
criterion_main!(benches);
