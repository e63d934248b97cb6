//! Chunk pool - size-classed free lists on top of an arena
//!
//! Design: every slot carries an 8-byte [`SlotHeader`] directly in front of
//! the payload, so `dealloc` recovers the size class from the pointer alone.
//!
//! ```text
//! | pad | SlotHeader | payload (class size) |
//!                    ^ returned pointer, aligned to the pool alignment
//! ```
//!
//! Freed payloads hold the free-list link in their first word. Slots are
//! never returned to the arena; they only cycle through their class list.

#[cfg(test)]
mod tests;

use core::mem::size_of;
use core::ptr::{self, NonNull};

use tracing::trace;

use std::sync::Arc;

use crate::arena::{Arena, ArenaFlags};
use crate::block::ZeroMem;
use crate::config::PoolConfig;
use crate::context::MemoryContext;

/// Power-of-two classes from 32 bytes to 32 GiB.
pub const NUM_SIZE_CLASSES: usize = 31;

const MIN_CLASS_SHIFT: u32 = 5;
const SLOT_MAGIC: u32 = 0xC4A1_7B10;

/// Smallest and largest accepted pool alignment.
pub const MIN_POOL_ALIGN: u8 = 8;
pub const MAX_POOL_ALIGN: u8 = 128;

/// Per-slot header (8 bytes) - sits immediately before the payload
#[repr(C, align(8))]
struct SlotHeader {
    magic: u32,
    class: u32,
}

impl SlotHeader {
    /// Header of a payload pointer handed out by a pool.
    #[inline]
    unsafe fn from_payload(payload: *mut u8) -> *mut Self {
        payload.sub(size_of::<SlotHeader>()) as *mut Self
    }
}

/// Link stored in the first word of a freed payload.
struct FreeSlot {
    next: Option<NonNull<FreeSlot>>,
}

/// Size in bytes of size class `class`, if it is addressable.
pub fn class_size(class: usize) -> Option<usize> {
    if class >= NUM_SIZE_CLASSES {
        return None;
    }
    1usize.checked_shl(MIN_CLASS_SHIFT + class as u32)
}

/// Smallest class whose size is at least `size`.
pub fn class_for(size: usize) -> Option<usize> {
    let rounded = size.max(1).checked_next_power_of_two()?;
    let class = rounded.trailing_zeros().saturating_sub(MIN_CLASS_SHIFT) as usize;
    class_size(class).map(|_| class)
}

/// Size-classed allocator with individual deallocation.
///
/// No internal locking; wrap it in a mutex for shared use.
pub struct ChunkPool {
    arena: Arena,
    slots: [Option<NonNull<FreeSlot>>; NUM_SIZE_CLASSES],
    align: u8,
    stats: ChunkPoolStats,
}

// Safety: free-list links point into memory owned by `arena`, which moves
// with the pool.
unsafe impl Send for ChunkPool {}

impl ChunkPool {
    /// Pool over `arena` whose payloads are aligned to `align`.
    ///
    /// # Panics
    ///
    /// Panics unless `align` is a power of two in `8..=128`.
    pub fn new(arena: Arena, align: u8) -> Self {
        assert!(
            align.is_power_of_two() && (MIN_POOL_ALIGN..=MAX_POOL_ALIGN).contains(&align),
            "pool alignment {align} must be a power of two between \
             {MIN_POOL_ALIGN} and {MAX_POOL_ALIGN}"
        );
        Self {
            arena,
            slots: [None; NUM_SIZE_CLASSES],
            align,
            stats: ChunkPoolStats::default(),
        }
    }

    /// Pool over a fresh arena sized by `config`.
    pub fn from_config(ctx: Arc<MemoryContext>, config: &PoolConfig) -> Self {
        let mut arena = Arena::new(ctx, config.reserve, config.commit, ArenaFlags::empty());
        arena.set_label("chunk-pool");
        Self::new(arena, config.align)
    }

    /// Bytes reserved in front of every payload.
    #[inline]
    fn header_space(&self) -> usize {
        size_of::<SlotHeader>().max(self.align as usize)
    }

    /// Allocate a slot of at least `size` bytes.
    ///
    /// Reuses a freed slot of the same class when one exists, otherwise
    /// carves a fresh slot from the arena. Returns `None` for requests
    /// above the largest class or when the arena cannot grow.
    pub fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        let class = class_for(size.max(self.align as usize))?;

        if let Some(slot) = self.slots[class] {
            self.slots[class] = unsafe { slot.as_ref().next };
            self.stats.reused += 1;
            trace!(target: "vmarena::pool", class, address = ?slot.as_ptr(), "slot reused");
            return Some(slot.cast());
        }

        let header_space = self.header_space();
        let total = header_space.checked_add(class_size(class)?)?;
        let base = self.arena.alloc(total, self.align as usize, ZeroMem::No)?;

        // SAFETY: the slot spans `total` bytes; the header ends where the payload starts.
        let payload = unsafe {
            let payload = base.as_ptr().add(header_space);
            SlotHeader::from_payload(payload).write(SlotHeader {
                magic: SLOT_MAGIC,
                class: class as u32,
            });
            NonNull::new_unchecked(payload)
        };

        self.stats.fresh_allocs += 1;
        trace!(target: "vmarena::pool", class, size, address = ?payload.as_ptr(), "fresh slot");
        Some(payload)
    }

    /// Like [`ChunkPool::alloc`] with the first `size` bytes cleared.
    pub fn alloc_zeroed(&mut self, size: usize) -> Option<NonNull<u8>> {
        let ptr = self.alloc(size)?;
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, size) };
        Some(ptr)
    }

    /// Allocate a slot and copy `src` into it.
    pub fn copy(&mut self, src: &[u8]) -> Option<NonNull<u8>> {
        let dst = self.alloc(src.len())?;
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), src.len()) };
        Some(dst)
    }

    /// Return a slot to its class free list.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this pool's `alloc` family and must not be
    /// deallocated twice or used afterwards.
    pub unsafe fn dealloc(&mut self, ptr: NonNull<u8>) {
        let class = Self::header_class(ptr);
        let slot = ptr.cast::<FreeSlot>();
        slot.as_ptr().write(FreeSlot {
            next: self.slots[class],
        });
        self.slots[class] = Some(slot);
        self.stats.deallocs += 1;
        trace!(target: "vmarena::pool", class, address = ?ptr.as_ptr(), "slot freed");
    }

    /// Capacity of the slot behind `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live slot from this pool.
    pub unsafe fn class_size_of(&self, ptr: NonNull<u8>) -> usize {
        class_size(Self::header_class(ptr)).unwrap_or(0)
    }

    unsafe fn header_class(ptr: NonNull<u8>) -> usize {
        let header = &*SlotHeader::from_payload(ptr.as_ptr());
        debug_assert_eq!(header.magic, SLOT_MAGIC, "pointer was not allocated by a chunk pool");
        debug_assert!((header.class as usize) < NUM_SIZE_CLASSES);
        header.class as usize
    }

    /// Number of slots waiting on the free list of `class`.
    pub fn free_slots(&self, class: usize) -> usize {
        let mut count = 0;
        let mut cursor = self.slots.get(class).copied().flatten();
        while let Some(slot) = cursor {
            count += 1;
            cursor = unsafe { slot.as_ref().next };
        }
        count
    }

    #[inline]
    pub fn align(&self) -> u8 {
        self.align
    }

    #[inline]
    pub fn stats(&self) -> ChunkPoolStats {
        self.stats
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Give the backing arena back; every outstanding slot stays valid
    /// until the arena itself is freed.
    pub fn into_arena(self) -> Arena {
        self.arena
    }
}

impl core::fmt::Debug for ChunkPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChunkPool")
            .field("align", &self.align)
            .field("stats", &self.stats)
            .field("arena", &self.arena)
            .finish()
    }
}

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkPoolStats {
    /// Slots carved from the arena.
    pub fresh_allocs: u64,
    /// Allocations served from a free list.
    pub reused: u64,
    pub deallocs: u64,
}

const _: () = assert!(size_of::<SlotHeader>() == MIN_POOL_ALIGN as usize);
