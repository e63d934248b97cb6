//! Temp memory - transactional snapshots over an arena
//!
//! [`TempMemory::begin`] captures the arena's chain topology and the current
//! block's bump offset. [`TempMemory::end`] either keeps everything allocated
//! since (`Commit`) or restores the capture (`Rollback`):
//!
//! - blocks created inside the scope are released to the OS
//! - blocks that existed at `begin` but now sit past the restored cursor are
//!   rewound to empty and kept, so they are reused instead of re-reserved
//!
//! Snapshots must be ended in LIFO order. Misordered ends are a caller bug.

#[cfg(test)]
mod tests;

use core::ops::{Deref, DerefMut};

use tracing::debug;

use crate::arena::{Arena, ArenaId};
use crate::block::{BlockPtr, MemoryBlock};

/// How a temp-memory scope finishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TempOutcome {
    /// Keep every allocation made inside the scope.
    Commit,
    /// Restore the arena to its state at `begin`.
    Rollback,
}

/// Non-owning capture of an arena's state.
#[must_use = "a temp memory snapshot does nothing unless ended"]
#[derive(Debug)]
pub struct TempMemory {
    arena: ArenaId,
    generation: u64,
    head: Option<BlockPtr>,
    curr: Option<BlockPtr>,
    tail: Option<BlockPtr>,
    blocks: u64,
    curr_used: usize,
}

impl TempMemory {
    pub fn begin(arena: &Arena) -> Self {
        let curr_used = arena.curr.map_or(0, |block| unsafe { block.as_ref() }.used());
        Self {
            arena: arena.id(),
            generation: arena.generation,
            head: arena.head,
            curr: arena.curr,
            tail: arena.tail,
            blocks: arena.blocks,
            curr_used,
        }
    }

    /// Finish the scope.
    ///
    /// Does nothing when committing, when the arena was freed or reset since
    /// `begin`, or when its head block changed (including a first block
    /// reserved after a snapshot of an empty arena).
    ///
    /// # Panics
    ///
    /// Panics if `arena` is not the arena the snapshot was taken from, or if
    /// the snapshot's tail is no longer in the chain (scopes ended out of order).
    pub fn end(self, arena: &mut Arena, outcome: TempOutcome) {
        assert_eq!(self.arena, arena.id(), "temp memory ended against a different arena");

        if outcome == TempOutcome::Commit {
            debug!(target: "vmarena::temp", blocks = arena.blocks, "temp memory committed");
            return;
        }

        // A new head means the chain was rebuilt; everything since begin is kept.
        if arena.generation != self.generation || arena.head != self.head {
            debug!(target: "vmarena::temp", "arena was rebuilt since begin, rollback skipped");
            return;
        }

        self.rollback(arena);
    }

    fn rollback(&self, arena: &mut Arena) {
        let blocks_before = arena.blocks;

        arena.blocks = self.blocks;
        arena.curr = self.curr;
        if let Some(curr) = self.curr {
            let block = unsafe { &mut *curr.as_ptr() };
            arena.poison(block, self.curr_used);
            block.rewind(self.curr_used);
        }

        // Release blocks created inside the scope.
        while arena.tail != self.tail {
            let tail = arena.tail.expect(
                "temp memory tail is no longer in the arena chain; scopes ended out of order",
            );
            unsafe {
                arena.tail = tail.as_ref().prev;
                MemoryBlock::free(arena.context_ref(), tail);
            }
        }

        match arena.tail {
            Some(tail) => unsafe { (*tail.as_ptr()).next = None },
            None => arena.head = None,
        }

        // Blocks between the restored tail and curr are kept but emptied.
        let mut cursor = arena.tail;
        while let Some(block) = cursor {
            if Some(block) == arena.curr {
                break;
            }
            let b = unsafe { &mut *block.as_ptr() };
            cursor = b.prev;
            if !b.is_private() {
                arena.poison(b, 0);
                b.rewind(0);
            }
        }

        debug!(
            target: "vmarena::temp",
            released = blocks_before.saturating_sub(self.blocks),
            curr_used = self.curr_used,
            "temp memory rolled back"
        );
    }

    /// Block count captured at `begin`.
    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    /// Bump offset of the current block captured at `begin`.
    pub fn curr_used(&self) -> usize {
        self.curr_used
    }
}

/// RAII temp-memory scope. Rolls back on drop unless committed.
///
/// Usage:
/// ```ignore
/// let mut scope = arena.scope();
/// let scratch = scope.alloc(4096, 16, ZeroMem::No);
/// // scratch is released when `scope` drops
/// ```
pub struct TempScope<'a> {
    arena: &'a mut Arena,
    snapshot: Option<TempMemory>,
}

impl<'a> TempScope<'a> {
    pub fn new(arena: &'a mut Arena) -> Self {
        let snapshot = TempMemory::begin(arena);
        Self {
            arena,
            snapshot: Some(snapshot),
        }
    }

    /// Keep every allocation made inside the scope.
    pub fn commit(mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            snapshot.end(self.arena, TempOutcome::Commit);
        }
    }

    /// Explicit rollback; same as dropping the scope.
    pub fn rollback(self) {}
}

impl Deref for TempScope<'_> {
    type Target = Arena;

    fn deref(&self) -> &Arena {
        self.arena
    }
}

impl DerefMut for TempScope<'_> {
    fn deref_mut(&mut self) -> &mut Arena {
        self.arena
    }
}

impl Drop for TempScope<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            snapshot.end(self.arena, TempOutcome::Rollback);
        }
    }
}
