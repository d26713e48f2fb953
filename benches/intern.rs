//! Benchmarks of consing_map.

use std::hint::black_box;
use std::sync::Arc;
use std::thread;

use criterion::{criterion_group, criterion_main, Criterion};

use consing_map::{Config, ConsingMap, Interned};

criterion_main!(single_threaded, multi_threaded);

criterion_group!(single_threaded, intern_hit, intern_miss, intern_churn);

criterion_group!(multi_threaded, intern_contended);

const KEYS: u64 = 10_000;

fn detached() -> ConsingMap<u64> {
    let config = Config::builder().background_sweep(false).build().unwrap();
    ConsingMap::with_config(config)
}

//  Time to intern values which are all present: the lock-free read path.
fn intern_hit(c: &mut Criterion) {
    let map = detached();
    let held: Vec<_> = (0..KEYS).map(|i| map.intern(i)).collect();
    c.bench_function("intern hit", |b| {
        b.iter(|| {
            for i in 0..KEYS {
                black_box(map.intern(i));
            }
        })
    });
    drop(held);
}

//  Time to fill a fresh map, including every resize on the way.
fn intern_miss(c: &mut Criterion) {
    c.bench_function("intern miss", |b| {
        b.iter(|| {
            let map = detached();
            let held: Vec<Interned<u64>> = (0..KEYS).map(|i| map.intern(i)).collect();
            black_box(held);
        })
    });
}

//  Time to insert, drop and sweep: every value is evicted right away.
fn intern_churn(c: &mut Criterion) {
    let map = detached();
    c.bench_function("intern churn", |b| {
        b.iter(|| {
            for i in 0..KEYS {
                drop(map.intern(i));
            }
            black_box(map.sweep());
        })
    });
}

//  Time for 4 threads to intern the same values concurrently.
fn intern_contended(c: &mut Criterion) {
    c.bench_function("intern contended 4T", |b| {
        b.iter(|| {
            let map = Arc::new(detached());
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let map = Arc::clone(&map);
                    thread::spawn(move || (0..KEYS).map(|i| map.intern(i)).collect::<Vec<_>>())
                })
                .collect();
            for handle in handles {
                black_box(handle.join().unwrap());
            }
        })
    });
}
