use super::*;
use crate::arena::{ArenaFlags, POISON_BYTE};
use crate::block::{BlockFlags, ZeroMem};
use crate::context::MemoryContext;

const FIVE_MB: usize = 5 * 1024 * 1024;

fn arena_with_used(used: usize) -> Arena {
    let mut arena = Arena::new(MemoryContext::new(), 1 << 20, 1 << 16, ArenaFlags::empty());
    arena.alloc(used, 1, ZeroMem::No).expect("prefill");
    arena
}

#[test]
fn rollback_restores_pre_scope_state() {
    let mut arena = arena_with_used(100);
    let before = arena.current_block().expect("curr");
    let tail_before = arena.tail_block().expect("tail");

    let temp = TempMemory::begin(&arena);
    assert_eq!(temp.blocks(), 1);
    assert_eq!(temp.curr_used(), 100);

    for _ in 0..3 {
        arena.alloc(100, 1, ZeroMem::No).expect("small");
    }
    assert_eq!(arena.block_count(), 1);
    arena.alloc(FIVE_MB, 8, ZeroMem::No).expect("large");
    assert_eq!(arena.block_count(), 2);

    temp.end(&mut arena, TempOutcome::Rollback);

    let after = arena.current_block().expect("curr");
    assert_eq!(arena.block_count(), 1);
    assert_eq!(after.id, before.id);
    assert_eq!(after.used, 100);
    assert_eq!(arena.tail_block().map(|b| b.id), Some(tail_before.id));
    assert_eq!(arena.context().tracker().outstanding(), 1);
}

#[test]
fn commit_keeps_scope_allocations() {
    let mut arena = arena_with_used(100);
    let before = arena.current_block().expect("curr");

    let temp = TempMemory::begin(&arena);
    for _ in 0..3 {
        arena.alloc(100, 1, ZeroMem::No).expect("small");
    }
    arena.alloc(FIVE_MB, 8, ZeroMem::No).expect("large");
    let grown = arena.tail_block().expect("tail");

    temp.end(&mut arena, TempOutcome::Commit);

    assert_eq!(arena.block_count(), 2);
    let curr = arena.current_block().expect("curr");
    assert_eq!(curr.id, grown.id);
    assert_ne!(curr.id, before.id);
    assert_eq!(arena.block_infos()[0].used, 400);
}

#[test]
fn rolled_back_blocks_are_reused_without_growth() {
    let mut arena = arena_with_used(100);
    let first = arena.current_block().expect("first");
    let second = arena.grow(1 << 20, 1 << 16, BlockFlags::empty()).expect("second");

    let temp = TempMemory::begin(&arena);
    arena.alloc(first.size - 100, 1, ZeroMem::No).expect("fill first");
    arena.alloc(4096, 8, ZeroMem::No).expect("into second");
    assert_eq!(arena.current_block().map(|b| b.id), Some(second.id));
    temp.end(&mut arena, TempOutcome::Rollback);

    // The second block is kept but emptied.
    let infos = arena.block_infos();
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].used, 100);
    assert_eq!(infos[1].used, 0);
    assert_eq!(arena.current_block().map(|b| b.id), Some(first.id));

    // Larger than what is left in the first block: served by the second.
    let ptr = arena.alloc(first.size, 8, ZeroMem::No).expect("reuse");
    assert_eq!(arena.block_count(), 2);
    assert_eq!(arena.current_block().map(|b| b.id), Some(second.id));
    assert!(arena.block_infos()[1].contains_committed(ptr.as_ptr() as usize, first.size));
}

#[test]
fn rollback_keeps_blocks_when_snapshot_saw_no_head() {
    let mut arena = Arena::empty(MemoryContext::new(), ArenaFlags::empty());
    let temp = TempMemory::begin(&arena);
    assert_eq!(temp.blocks(), 0);

    arena.alloc(100, 8, ZeroMem::No).expect("first");
    assert_eq!(arena.block_count(), 1);
    arena.alloc(FIVE_MB, 8, ZeroMem::No).expect("second");
    assert_eq!(arena.block_count(), 2);

    // The head appeared after begin, so the scope's allocations are retained.
    temp.end(&mut arena, TempOutcome::Rollback);
    assert_eq!(arena.block_count(), 2);
    assert_eq!(arena.block_infos()[0].used, 100);
    assert!(arena.current_block().is_some());
    assert_eq!(arena.context().tracker().outstanding(), 2);
}

#[test]
fn empty_scope_on_empty_arena_leaves_it_empty() {
    let mut arena = Arena::empty(MemoryContext::new(), ArenaFlags::empty());
    TempMemory::begin(&arena).end(&mut arena, TempOutcome::Rollback);
    assert!(arena.is_empty());
    assert!(arena.alloc(64, 8, ZeroMem::No).is_some());
}

#[test]
fn rollback_after_free_is_a_no_op() {
    let mut arena = arena_with_used(100);
    let temp = TempMemory::begin(&arena);

    arena.free();
    arena.alloc(256, 8, ZeroMem::No).expect("rebuilt");
    arena.alloc(FIVE_MB, 8, ZeroMem::No).expect("grown");

    temp.end(&mut arena, TempOutcome::Rollback);
    assert_eq!(arena.block_count(), 2);
    assert_eq!(arena.context().tracker().outstanding(), 2);
}

#[test]
fn rollback_after_reset_is_a_no_op() {
    let mut arena = arena_with_used(100);
    let temp = TempMemory::begin(&arena);

    arena.reset();
    arena.alloc(300, 1, ZeroMem::No).expect("after reset");

    temp.end(&mut arena, TempOutcome::Rollback);
    assert_eq!(arena.current_block().map(|b| b.used), Some(300));
}

#[test]
#[should_panic(expected = "different arena")]
fn ending_against_another_arena_panics() {
    let arena = arena_with_used(10);
    let mut other = arena_with_used(10);
    let temp = TempMemory::begin(&arena);
    temp.end(&mut other, TempOutcome::Rollback);
}

#[test]
fn rollback_poisons_returned_memory() {
    let mut arena = arena_with_used(64);
    let temp = TempMemory::begin(&arena);
    let ptr = arena.alloc(128, 8, ZeroMem::Yes).expect("alloc");
    temp.end(&mut arena, TempOutcome::Rollback);

    let bytes = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), 128) };
    let expected = if cfg!(debug_assertions) { POISON_BYTE } else { 0 };
    assert!(bytes.iter().all(|&b| b == expected));
}

#[test]
fn private_blocks_survive_rollback_untouched() {
    let mut arena = arena_with_used(100);
    arena.grow(4096, 4096, BlockFlags::ARENA_PRIVATE).expect("private");
    let private = arena.tail_block().expect("tail");
    assert!(private.flags.contains(BlockFlags::ARENA_PRIVATE));

    let temp = TempMemory::begin(&arena);
    let first = arena.current_block().expect("first");
    arena.alloc(first.size - 100, 1, ZeroMem::No).expect("fill");
    arena.alloc(64, 8, ZeroMem::No).expect("grow past private");
    assert_eq!(arena.block_count(), 3);

    temp.end(&mut arena, TempOutcome::Rollback);
    assert_eq!(arena.block_count(), 2);
    assert_eq!(arena.tail_block().map(|b| b.id), Some(private.id));
}

// ===== TempScope =====

#[test]
fn scope_rolls_back_on_drop() {
    let mut arena = arena_with_used(100);
    {
        let mut scope = arena.scope();
        scope.alloc(500, 8, ZeroMem::No).expect("alloc");
        scope.alloc(FIVE_MB, 8, ZeroMem::No).expect("grow");
        assert_eq!(scope.block_count(), 2);
    }
    assert_eq!(arena.block_count(), 1);
    assert_eq!(arena.current_block().map(|b| b.used), Some(100));
}

#[test]
fn scope_commit_keeps_allocations() {
    let mut arena = arena_with_used(100);
    let mut scope = arena.scope();
    scope.alloc(500, 1, ZeroMem::No).expect("alloc");
    scope.commit();
    assert_eq!(arena.current_block().map(|b| b.used), Some(600));
}

#[test]
fn nested_scopes_unwind_in_order() {
    let mut arena = arena_with_used(100);
    {
        let mut outer = arena.scope();
        outer.alloc(100, 1, ZeroMem::No).expect("outer");
        {
            let mut inner = outer.scope();
            inner.alloc(FIVE_MB, 8, ZeroMem::No).expect("inner");
            assert_eq!(inner.block_count(), 2);
        }
        assert_eq!(outer.block_count(), 1);
        assert_eq!(outer.current_block().map(|b| b.used), Some(200));

        let mut kept = outer.scope();
        kept.alloc(50, 1, ZeroMem::No).expect("kept");
        kept.commit();
        assert_eq!(outer.current_block().map(|b| b.used), Some(250));
    }
    assert_eq!(arena.current_block().map(|b| b.used), Some(100));
}
