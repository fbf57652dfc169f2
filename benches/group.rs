use std::sync::{Arc, Barrier};
use std::thread::{sleep, spawn};
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use singleflight::{Group, Options};

const GROUP_SIZE: usize = 10;

/// `total` callers over `total / GROUP_SIZE` keys, all released at once.
fn run_grouped(group: &Group<String, u32, ()>, total: usize) {
    let barrier = Arc::new(Barrier::new(total));
    let handles: Vec<_> = (0..total)
        .map(|i| {
            let group = group.clone();
            let barrier = barrier.clone();
            spawn(move || {
                let key = format!("key-{}", i / GROUP_SIZE);
                barrier.wait();
                let _ = group.work(&key, || {
                    sleep(Duration::from_millis(1));
                    Ok(42)
                });
            })
        })
        .collect();
    for handle in handles {
        let _ = handle.join();
    }
}

fn grouped(c: &mut Criterion) {
    let mut bench = c.benchmark_group("work_grouped");
    bench.sample_size(10);
    for total in [100, 1_000] {
        for recycle_calls in [true, false] {
            let group = Group::with_options(Options {
                recycle_calls,
                ..Options::default()
            });
            let name = if recycle_calls { "recycled" } else { "fresh" };
            bench.bench_with_input(BenchmarkId::new(name, total), &total, |b, &total| {
                b.iter(|| run_grouped(&group, total))
            });
        }
    }
    bench.finish();
}

fn uncontended(c: &mut Criterion) {
    let group = Group::<u64, u64, ()>::new();
    let mut key = 0u64;
    c.bench_function("work_uncontended", |b| {
        b.iter(|| {
            key = key.wrapping_add(1);
            group.work(&key, || Ok(key))
        })
    });
}

criterion_group!(benches, grouped, uncontended);
criterion_main!(benches);
