//! Catalog registration under contention.

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use vmarena::config::PoolConfig;
use vmarena::{Arena, ArenaCatalog, ArenaFlags, MemoryContext, ZeroMem};

const THREADS: usize = 8;
const PER_THREAD: usize = 50;

#[test]
fn concurrent_adds_are_all_counted() {
    let ctx = MemoryContext::new();
    let catalog = Arc::new(ArenaCatalog::with_context(ctx.clone(), &PoolConfig::default()));

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let catalog = Arc::clone(&catalog);
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let arena = Arena::empty(ctx.clone(), ArenaFlags::empty());
                    let label = format!("t{t}-a{i}");
                    assert!(catalog.add_label_copy(Arc::new(Mutex::new(arena)), &label));
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker panicked");
    }

    assert_eq!(catalog.arena_count(), (THREADS * PER_THREAD) as u64);
    assert_eq!(catalog.entries().len(), THREADS * PER_THREAD);
    for t in 0..THREADS {
        for i in 0..PER_THREAD {
            assert!(catalog.find(&format!("t{t}-a{i}")).is_some());
        }
    }
}

#[test]
fn shared_arena_is_usable_across_threads() {
    let ctx = MemoryContext::new();
    let catalog = Arc::new(ArenaCatalog::with_context(ctx, &PoolConfig::default()));
    catalog
        .alloc_label_ref(1 << 20, 1 << 16, ArenaFlags::empty(), "shared")
        .expect("arena");

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let catalog = Arc::clone(&catalog);
            thread::spawn(move || {
                let entry = catalog.find("shared").expect("registered");
                for _ in 0..100 {
                    let ptr = entry.arena.lock().alloc(32, 8, ZeroMem::Yes).expect("alloc");
                    assert_eq!(ptr.as_ptr() as usize % 8, 0);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker panicked");
    }

    let arena = catalog.find("shared").expect("registered").arena;
    assert!(arena.lock().stats().used >= 4 * 100 * 32);
}

#[test]
fn removal_races_with_registration() {
    let catalog =
        Arc::new(ArenaCatalog::with_context(MemoryContext::new(), &PoolConfig::default()));
    for i in 0..100 {
        catalog
            .alloc_label_copy(4096, 4096, ArenaFlags::empty(), &format!("old-{i}"))
            .expect("arena");
    }

    let remover = {
        let catalog = Arc::clone(&catalog);
        thread::spawn(move || {
            (0..100)
                .filter(|i| catalog.remove(&format!("old-{i}")).is_some())
                .count()
        })
    };
    let adder = {
        let catalog = Arc::clone(&catalog);
        thread::spawn(move || {
            for i in 0..100 {
                catalog
                    .alloc_label_copy(4096, 4096, ArenaFlags::empty(), &format!("new-{i}"))
                    .expect("arena");
            }
        })
    };

    assert_eq!(remover.join().expect("remover"), 100);
    adder.join().expect("adder");
    assert_eq!(catalog.arena_count(), 100);
}
