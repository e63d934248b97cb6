//! Allocator benchmarks
//!
//! Measures the bump fast path, temp-memory rollback and pool reuse.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vmarena::{Arena, ArenaFlags, ChunkPool, MemoryContext, TempMemory, TempOutcome, ZeroMem};

fn bench_bump_alloc(c: &mut Criterion) {
    let mut group = c.benchmark_group("bump_alloc");

    for size in [16usize, 256, 4096].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut arena =
                Arena::new(MemoryContext::new(), 256 << 20, 1 << 20, ArenaFlags::NO_POISON);
            let reset_every = (64 << 20) / size;
            let mut count = 0;

            b.iter(|| {
                black_box(arena.alloc(size, 16, ZeroMem::No));
                count += 1;
                if count == reset_every {
                    arena.reset();
                    count = 0;
                }
            });
        });
    }

    group.finish();
}

fn bench_temp_rollback(c: &mut Criterion) {
    let mut group = c.benchmark_group("temp_rollback");

    group.bench_function("in_block", |b| {
        let mut arena = Arena::new(MemoryContext::new(), 1 << 20, 1 << 20, ArenaFlags::NO_POISON);
        b.iter(|| {
            let temp = TempMemory::begin(&arena);
            for _ in 0..32 {
                black_box(arena.alloc(64, 8, ZeroMem::No));
            }
            temp.end(&mut arena, TempOutcome::Rollback);
        });
    });

    group.bench_function("with_growth", |b| {
        let mut arena = Arena::new(MemoryContext::new(), 64 << 10, 64 << 10, ArenaFlags::NO_POISON);
        b.iter(|| {
            let mut scope = arena.scope();
            black_box(scope.alloc(1 << 20, 64, ZeroMem::No));
        });
    });

    group.finish();
}

fn bench_pool_reuse(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_pool");

    group.bench_function("alloc_dealloc", |b| {
        let arena = Arena::new(MemoryContext::new(), 1 << 20, 1 << 16, ArenaFlags::empty());
        let mut pool = ChunkPool::new(arena, 16);
        b.iter(|| {
            let ptr = pool.alloc(black_box(200)).expect("pool slot");
            unsafe { pool.dealloc(ptr) };
        });
    });

    group.finish();
}

criterion_group!(benches, bench_bump_alloc, bench_temp_rollback, bench_pool_reuse);
criterion_main!(benches);
