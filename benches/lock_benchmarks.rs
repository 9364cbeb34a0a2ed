//! Lock benchmarks for warden

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use warden::warden_log::DiagnosticSink;
use warden::{DistributedLock, Locker, MemoryLeaseStore, Once, ReentrantLock, SpinLock};

fn spin_lock_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("spin_lock");
    group.throughput(Throughput::Elements(1));

    let lock = SpinLock::new();
    group.bench_function("lock_unlock", |b| {
        b.iter(|| {
            lock.lock();
            lock.unlock();
        });
    });

    group.bench_function("guard", |b| {
        b.iter(|| black_box(lock.acquire()));
    });

    let recorded = SpinLock::with_diagnostics(DiagnosticSink::disabled());
    group.bench_function("lock_unlock_recorded", |b| {
        b.iter(|| {
            recorded.lock();
            recorded.unlock();
        });
    });

    group.finish();
}

fn reentrant_lock_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("reentrant_lock");

    for depth in [1usize, 4, 16] {
        let lock = ReentrantLock::new();
        group.bench_with_input(BenchmarkId::new("nested", depth), &depth, |b, &depth| {
            b.iter(|| {
                for _ in 0..depth {
                    lock.lock();
                }
                for _ in 0..depth {
                    lock.unlock();
                }
            });
        });
    }

    group.finish();
}

fn contended_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended");

    for threads in [2usize, 4] {
        group.bench_with_input(BenchmarkId::new("spin", threads), &threads, |b, &threads| {
            b.iter(|| contend(Arc::new(SpinLock::new()), threads, 1_000));
        });
        group.bench_with_input(BenchmarkId::new("reentrant", threads), &threads, |b, &threads| {
            b.iter(|| contend(Arc::new(ReentrantLock::new()), threads, 1_000));
        });
    }

    group.finish();
}

fn contend<L: Locker + Send + Sync + 'static>(lock: Arc<L>, threads: usize, rounds: usize) {
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            std::thread::spawn(move || {
                for _ in 0..rounds {
                    lock.lock();
                    lock.unlock();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

fn once_benchmark(c: &mut Criterion) {
    let once = Once::new();
    once.call_once(|| {});

    c.bench_function("once_completed", |b| {
        b.iter(|| once.call_once(|| black_box(())));
    });
}

fn distributed_lock_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = MemoryLeaseStore::new();
    let lock = DistributedLock::new("bench", Duration::from_secs(30), store);

    let mut group = c.benchmark_group("distributed_lock");

    group.bench_function("memory_cycle", |b| {
        b.to_async(&rt).iter(|| async {
            assert!(lock.try_lock().await);
            lock.unlock().await;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    spin_lock_benchmark,
    reentrant_lock_benchmark,
    contended_benchmark,
    once_benchmark,
    distributed_lock_benchmark,
);

criterion_main!(benches);
