//! Arena - an ordered chain of memory blocks serving bump allocations
//!
//! Design: Two-layer allocation path:
//! 1. Bump allocation in the current block (fast path)
//! 2. Walk forward to later blocks with spare room, then grow (slow path)
//!
//! ```text
//! head -> [block] <-> [block] <-> [block] <- tail
//!                        ^ curr
//! ```
//!
//! `curr` is not necessarily `tail`: a temp-memory rollback can rewind it
//! behind blocks that are empty but still reserved. Growth is exact-fit
//! rather than geometric so address space is never over-reserved.


use core::alloc::Layout;
use core::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::block::{
    BlockFlags, BlockId, BlockInfo, BlockPtr, MemoryBlock, ZeroMem, BLOCK_HEADER_ALIGN,
};
use crate::config::ArenaConfig;
use crate::context::MemoryContext;
use crate::flags::bit_flags;
use crate::temp::TempScope;

/// Byte written over memory handed back by rollback or reset in debug builds.
pub const POISON_BYTE: u8 = 0xCD;

bit_flags! {
    pub struct ArenaFlags: u8 {
        /// Never reserve another block once the arena owns one.
        const NO_GROW = 1 << 0;
        /// Do not poison memory returned by rollback or reset.
        const NO_POISON = 1 << 1;
        /// Keep the arena's reservations out of the leak tracker.
        const NO_ALLOC_TRACK = 1 << 2;
        /// The arena's reservations may outlive context teardown.
        const ALLOC_CAN_LEAK = 1 << 3;
    }
}

static NEXT_ARENA_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique arena identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArenaId(u64);

impl ArenaId {
    fn next() -> Self {
        Self(NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub struct Arena {
    ctx: Arc<MemoryContext>,
    id: ArenaId,
    pub(crate) head: Option<BlockPtr>,
    pub(crate) curr: Option<BlockPtr>,
    pub(crate) tail: Option<BlockPtr>,
    pub(crate) blocks: u64,
    /// Bumped whenever the chain is torn down or rewound wholesale.
    pub(crate) generation: u64,
    label: String,
    flags: ArenaFlags,
    block_flags: BlockFlags,
}

// Safety: the arena exclusively owns every block in its chain; nothing else
// holds the raw block pointers, so moving the arena between threads is sound.
unsafe impl Send for Arena {}

impl Arena {
    /// Arena with no blocks; the first allocation reserves one.
    pub fn empty(ctx: Arc<MemoryContext>, flags: ArenaFlags) -> Self {
        Self {
            ctx,
            id: ArenaId::next(),
            head: None,
            curr: None,
            tail: None,
            blocks: 0,
            generation: 0,
            label: String::new(),
            flags,
            block_flags: Self::derived_block_flags(flags),
        }
    }

    /// Arena whose first block reserves `reserve` bytes with `commit` committed.
    ///
    /// A zero `reserve` yields an empty arena. If the OS refuses the first
    /// block the arena is returned empty as well; check [`Arena::block_count`].
    pub fn new(ctx: Arc<MemoryContext>, reserve: usize, commit: usize, flags: ArenaFlags) -> Self {
        Self::with_block_flags(ctx, reserve, commit, flags, BlockFlags::empty())
    }

    /// Like [`Arena::new`], with extra flags applied to every block the arena reserves.
    pub fn with_block_flags(
        ctx: Arc<MemoryContext>,
        reserve: usize,
        commit: usize,
        flags: ArenaFlags,
        block_flags: BlockFlags,
    ) -> Self {
        let mut arena = Self::empty(ctx, flags);
        arena.block_flags |= block_flags.difference(BlockFlags::ARENA_PRIVATE);
        if reserve > 0 && arena.grow(reserve, commit, BlockFlags::empty()).is_none() {
            tracing::warn!(
                target: "vmarena::arena",
                reserve,
                commit,
                "initial arena block could not be reserved"
            );
        }
        arena
    }

    pub fn from_config(ctx: Arc<MemoryContext>, config: &ArenaConfig) -> Self {
        Self::with_block_flags(
            ctx,
            config.reserve,
            config.commit,
            config.flags(),
            config.block_flags(),
        )
    }

    fn derived_block_flags(flags: ArenaFlags) -> BlockFlags {
        let mut block_flags = BlockFlags::empty();
        if flags.contains(ArenaFlags::ALLOC_CAN_LEAK) {
            block_flags |= BlockFlags::ALLOC_RECORD_LEAK_PERMITTED;
        }
        if flags.contains(ArenaFlags::NO_ALLOC_TRACK) {
            block_flags |= BlockFlags::NO_ALLOC_TRACK;
        }
        block_flags
    }

    /// Append a new block at the tail.
    ///
    /// The block becomes `curr` only when the arena has no current block.
    /// Fails when the OS refuses or when the arena is `NO_GROW` and already
    /// owns a block.
    pub fn grow(&mut self, reserve: usize, commit: usize, flags: BlockFlags) -> Option<BlockInfo> {
        let block = self.grow_block(reserve, commit, flags)?;
        Some(unsafe { block.as_ref() }.info())
    }

    fn grow_block(&mut self, reserve: usize, commit: usize, flags: BlockFlags) -> Option<BlockPtr> {
        if self.flags.contains(ArenaFlags::NO_GROW) && self.head.is_some() {
            debug!(
                target: "vmarena::arena",
                label = %self.label,
                reserve,
                "growth refused for non-growable arena"
            );
            return None;
        }

        let block = MemoryBlock::init(&self.ctx, reserve, commit, self.block_flags | flags)?;
        unsafe {
            (*block.as_ptr()).prev = self.tail;
            match self.tail {
                Some(tail) => (*tail.as_ptr()).next = Some(block),
                None => self.head = Some(block),
            }
        }
        self.tail = Some(block);
        if self.curr.is_none() {
            self.curr = Some(block);
        }
        self.blocks += 1;

        debug!(
            target: "vmarena::arena",
            label = %self.label,
            reserve,
            commit,
            blocks = self.blocks,
            "arena grew"
        );
        Some(block)
    }

    /// Allocate `size` bytes aligned to `align`.
    ///
    /// Walks forward from `curr`, skipping private blocks and moving on when
    /// a block is full, and reserves an exact-fit block once the chain is
    /// exhausted. On failure `curr` is left where it was.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    pub fn alloc(&mut self, size: usize, align: usize, zero: ZeroMem) -> Option<NonNull<u8>> {
        assert!(align.is_power_of_two(), "alignment {align} must be a power of two");

        let entry = self.curr;
        let mut grew = false;
        loop {
            self.skip_private();

            let block = match self.curr {
                Some(block) => block,
                None if grew => break,
                None => {
                    let padding = if align > BLOCK_HEADER_ALIGN { align - 1 } else { 0 };
                    let Some(reserve) = size.checked_add(padding) else { break };
                    // A zero-byte request still needs a block to point into.
                    let reserve = reserve.max(1);
                    match self.grow_block(reserve, reserve, BlockFlags::empty()) {
                        Some(block) => {
                            grew = true;
                            block
                        }
                        None => break,
                    }
                }
            };

            let result = unsafe { (*block.as_ptr()).alloc(&self.ctx, size, align, zero) };
            if let Some(ptr) = result {
                trace!(
                    target: "vmarena::arena",
                    size,
                    align,
                    address = ?ptr.as_ptr(),
                    "arena alloc"
                );
                return Some(ptr);
            }
            self.curr = unsafe { block.as_ref().next };
        }

        self.curr = entry;
        trace!(target: "vmarena::arena", size, align, label = %self.label, "arena alloc failed");
        None
    }

    fn skip_private(&mut self) {
        while let Some(block) = self.curr {
            let block = unsafe { block.as_ref() };
            if !block.is_private() {
                break;
            }
            self.curr = block.next;
        }
    }

    /// Allocate for a `Layout`.
    #[inline]
    pub fn alloc_layout(&mut self, layout: Layout, zero: ZeroMem) -> Option<NonNull<u8>> {
        self.alloc(layout.size(), layout.align(), zero)
    }

    /// Allocate and copy `src` into the arena.
    pub fn copy(&mut self, src: &[u8], align: usize) -> Option<NonNull<u8>> {
        let dst = self.alloc(src.len(), align, ZeroMem::No)?;
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), src.len()) };
        Some(dst)
    }

    /// Like [`Arena::copy`] with one extra byte holding a zero terminator.
    pub fn copy_zero_terminated(&mut self, src: &[u8], align: usize) -> Option<NonNull<u8>> {
        let dst = self.alloc(src.len().checked_add(1)?, align, ZeroMem::No)?;
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), src.len());
            *dst.as_ptr().add(src.len()) = 0;
        }
        Some(dst)
    }

    /// Release every block back to the OS. The arena stays usable and empty.
    pub fn free(&mut self) {
        if self.head.is_none() {
            return;
        }

        let released = self.blocks;
        let mut cursor = self.head;
        while let Some(block) = cursor {
            unsafe {
                cursor = block.as_ref().next;
                MemoryBlock::free(&self.ctx, block);
            }
        }

        self.head = None;
        self.curr = None;
        self.tail = None;
        self.blocks = 0;
        self.generation += 1;
        debug!(target: "vmarena::arena", label = %self.label, blocks = released, "arena freed");
    }

    /// Rewind every non-private block to empty, keeping all reservations.
    ///
    /// Open temp-memory snapshots become no-ops.
    pub fn reset(&mut self) {
        let mut cursor = self.head;
        while let Some(block) = cursor {
            let b = unsafe { &mut *block.as_ptr() };
            cursor = b.next;
            if !b.is_private() {
                self.poison(b, 0);
                b.rewind(0);
            }
        }
        self.curr = self.head;
        self.skip_private();
        self.generation += 1;
        debug!(target: "vmarena::arena", label = %self.label, blocks = self.blocks, "arena reset");
    }

    /// Decommit whole unused pages in every block. Returns the bytes given back.
    pub fn decommit_unused(&mut self) -> usize {
        let mut released = 0;
        let mut cursor = self.head;
        while let Some(block) = cursor {
            let b = unsafe { &mut *block.as_ptr() };
            cursor = b.next;
            released += b.decommit_unused(&self.ctx);
        }
        debug!(target: "vmarena::arena", label = %self.label, released, "decommitted unused pages");
        released
    }

    /// Overwrite `[from, used)` of `block` with [`POISON_BYTE`] in debug builds.
    pub(crate) fn poison(&self, block: &mut MemoryBlock, from: usize) {
        // Guarded blocks may hold never-allocated padding pages that still fault.
        if !cfg!(debug_assertions)
            || self.flags.contains(ArenaFlags::NO_POISON)
            || block.flags().contains(BlockFlags::PAGE_GUARD)
            || from >= block.used()
        {
            return;
        }
        unsafe {
            ptr::write_bytes(block.data().as_ptr().add(from), POISON_BYTE, block.used() - from);
        }
    }

    /// Open a rollback-on-drop temp-memory scope.
    pub fn scope(&mut self) -> TempScope<'_> {
        TempScope::new(self)
    }

    pub(crate) fn context_ref(&self) -> &MemoryContext {
        &self.ctx
    }

    pub fn context(&self) -> &Arc<MemoryContext> {
        &self.ctx
    }

    #[inline]
    pub fn id(&self) -> ArenaId {
        self.id
    }

    #[inline]
    pub fn flags(&self) -> ArenaFlags {
        self.flags
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    #[inline]
    pub fn block_count(&self) -> u64 {
        self.blocks
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Whether reservations may outlive teardown.
    #[inline]
    pub fn allow_leak(&self) -> bool {
        self.flags.contains(ArenaFlags::ALLOC_CAN_LEAK)
    }

    pub fn current_block(&self) -> Option<BlockInfo> {
        self.curr.map(|block| unsafe { block.as_ref() }.info())
    }

    pub fn tail_block(&self) -> Option<BlockInfo> {
        self.tail.map(|block| unsafe { block.as_ref() }.info())
    }

    pub(crate) fn current_id(&self) -> Option<BlockId> {
        self.curr.map(BlockId::of)
    }

    /// Bookkeeping for every block, head to tail.
    pub fn block_infos(&self) -> Vec<BlockInfo> {
        self.iter().map(|block| block.info()).collect()
    }

    fn iter(&self) -> BlockIter<'_> {
        BlockIter {
            cursor: self.head,
            _arena: self,
        }
    }

    /// Aggregate usage across the chain.
    pub fn stats(&self) -> ArenaStats {
        let mut stats = ArenaStats {
            blocks: self.blocks,
            ..ArenaStats::default()
        };
        let curr = self.current_id();
        let mut before_curr = curr.is_some();

        for block in self.iter() {
            let info = block.info();
            if Some(info.id) == curr {
                before_curr = false;
            }
            stats.reserved += info.size;
            stats.committed += info.commit;
            stats.used += info.used;
            if before_curr && !block.is_private() {
                stats.wasted += info.size - info.used;
            }
        }
        stats
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        self.free();
    }
}

impl core::fmt::Debug for Arena {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Arena")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("blocks", &self.blocks)
            .field("flags", &self.flags)
            .finish()
    }
}

struct BlockIter<'a> {
    cursor: Option<BlockPtr>,
    _arena: &'a Arena,
}

impl<'a> Iterator for BlockIter<'a> {
    type Item = &'a MemoryBlock;

    fn next(&mut self) -> Option<Self::Item> {
        let block = unsafe { self.cursor?.as_ref() };
        self.cursor = block.next;
        Some(block)
    }
}

/// Arena usage statistics for monitoring and debugging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub blocks: u64,
    /// Usable bytes reserved across all blocks.
    pub reserved: usize,
    pub committed: usize,
    pub used: usize,
    /// Free space stranded in blocks behind `curr`.
    pub wasted: usize,
}
