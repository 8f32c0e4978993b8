//! Append and read throughput for the segmented log.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use strata_log::{Config, Log};
use tempfile::TempDir;

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_append");

    for size in [64, 256, 1024, 4096, 16384] {
        group.throughput(Throughput::Bytes(size as u64));
        let payload = vec![0u8; size];

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter_batched(
                || {
                    let temp_dir = TempDir::new().unwrap();
                    let log = Log::open(temp_dir.path(), Config::default()).unwrap();
                    (log, temp_dir)
                },
                |(log, _temp_dir)| {
                    let offset = log.append(black_box(&payload)).unwrap();
                    black_box(offset);
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_read");

    for size in [64, 256, 1024, 4096, 16384] {
        group.throughput(Throughput::Bytes(size as u64));
        let payload = vec![0u8; size];

        let temp_dir = TempDir::new().unwrap();
        let log = Log::open(temp_dir.path(), Config::default()).unwrap();
        let offset = log.append(&payload).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let record = log.read(black_box(offset)).unwrap();
                black_box(record);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_append, bench_read);
criterion_main!(benches);
