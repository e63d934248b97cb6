use super::*;
use crate::arena::ArenaFlags;
use crate::context::MemoryContext;

fn pool(align: u8) -> ChunkPool {
    ChunkPool::new(Arena::new(MemoryContext::new(), 1 << 20, 1 << 16, ArenaFlags::empty()), align)
}

#[test]
fn class_table_spans_32_bytes_to_32_gib() {
    assert_eq!(class_size(0), Some(32));
    assert_eq!(class_size(1), Some(64));
    assert_eq!(class_size(NUM_SIZE_CLASSES), None);
    if cfg!(target_pointer_width = "64") {
        assert_eq!(class_size(NUM_SIZE_CLASSES - 1), Some(32 << 30));
    }
}

#[test]
fn class_for_picks_smallest_fit() {
    assert_eq!(class_for(0), Some(0));
    assert_eq!(class_for(1), Some(0));
    assert_eq!(class_for(32), Some(0));
    assert_eq!(class_for(33), Some(1));
    assert_eq!(class_for(4096), Some(7));
    assert_eq!(class_for(usize::MAX), None);
}

#[test]
fn dealloc_then_alloc_reuses_the_slot() {
    let mut pool = pool(16);
    let first = pool.alloc(100).expect("alloc");
    let blocks = pool.arena().block_count();
    let used = pool.arena().current_block().map(|b| b.used);

    unsafe { pool.dealloc(first) };
    assert_eq!(pool.free_slots(class_for(100).expect("class")), 1);

    // Same class, different request size.
    let again = pool.alloc(120).expect("realloc");
    assert_eq!(again, first);
    assert_eq!(pool.arena().block_count(), blocks);
    assert_eq!(pool.arena().current_block().map(|b| b.used), used);

    let stats = pool.stats();
    assert_eq!(stats.fresh_allocs, 1);
    assert_eq!(stats.reused, 1);
    assert_eq!(stats.deallocs, 1);
}

#[test]
fn free_lists_are_per_class() {
    let mut pool = pool(16);
    let small = pool.alloc(16).expect("small");
    unsafe { pool.dealloc(small) };

    let large = pool.alloc(1000).expect("large");
    assert_ne!(large, small);
    assert_eq!(pool.free_slots(0), 1);
    assert_eq!(pool.stats().fresh_allocs, 2);
}

#[test]
fn free_list_is_lifo() {
    let mut pool = pool(8);
    let a = pool.alloc(64).expect("a");
    let b = pool.alloc(64).expect("b");
    unsafe {
        pool.dealloc(a);
        pool.dealloc(b);
    }
    assert_eq!(pool.alloc(64), Some(b));
    assert_eq!(pool.alloc(64), Some(a));
}

#[test]
fn payloads_honour_pool_alignment() {
    for align in [8u8, 16, 32, 64, 128] {
        let mut pool = pool(align);
        for size in [1usize, 7, 33, 200, 5000] {
            let ptr = pool.alloc(size).expect("alloc");
            assert_eq!(ptr.as_ptr() as usize % align as usize, 0);
            assert!(unsafe { pool.class_size_of(ptr) } >= size.max(align as usize));
        }
    }
}

#[test]
fn alignment_raises_the_class_floor() {
    let mut pool = pool(128);
    let ptr = pool.alloc(1).expect("alloc");
    assert_eq!(unsafe { pool.class_size_of(ptr) }, 128);
}

#[test]
fn alloc_zeroed_clears_reused_slots() {
    let mut pool = pool(16);
    let ptr = pool.alloc(256).expect("alloc");
    unsafe {
        ptr::write_bytes(ptr.as_ptr(), 0xAB, 256);
        pool.dealloc(ptr);
    }
    let again = pool.alloc_zeroed(256).expect("zeroed");
    assert_eq!(again, ptr);
    let bytes = unsafe { core::slice::from_raw_parts(again.as_ptr(), 256) };
    assert!(bytes.iter().all(|&b| b == 0));
}

#[test]
fn copy_writes_payload() {
    let mut pool = pool(16);
    let ptr = pool.copy(b"chunk pool").expect("copy");
    let bytes = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), 10) };
    assert_eq!(bytes, b"chunk pool");
}

#[test]
fn oversized_requests_fail() {
    let mut pool = pool(16);
    assert!(pool.alloc(usize::MAX / 2).is_none());
    assert_eq!(pool.stats(), ChunkPoolStats::default());
}

#[test]
fn non_growable_arena_limits_the_pool() {
    let arena = Arena::new(MemoryContext::new(), 4096, 4096, ArenaFlags::NO_GROW);
    let mut pool = ChunkPool::new(arena, 16);
    assert!(pool.alloc(1 << 20).is_none());
    assert!(pool.alloc(64).is_some());
}

#[test]
#[should_panic(expected = "must be a power of two")]
fn bad_pool_alignment_is_fatal() {
    let _ = pool(24);
}

#[test]
fn into_arena_returns_backing_arena() {
    let mut pool = pool(16);
    pool.alloc(64).expect("alloc");
    let arena = pool.into_arena();
    assert_eq!(arena.block_count(), 1);
    assert!(arena.current_block().map_or(false, |b| b.used > 0));
}
