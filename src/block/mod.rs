//! Memory block - one OS reservation sub-allocated by bumping `used`
//!
//! Layout of a block's reservation:
//!
//! ```text
//! base                      data                                  base + reserve
//! | MemoryBlock header ... | allocations -> | committed | reserved only   |
//!                          |<--- used ---->|
//!                          |<------- commit ---------->|
//!                          |<------------------- size ------------------>|
//! ```
//!
//! The header prefix is [`BLOCK_HEADER_ALIGN`]-rounded, or one full page when
//! the block is page-guarded. Invariant: `used <= commit <= size`.


use core::mem::size_of;
use core::ptr::{self, NonNull};

use tracing::trace;

use crate::context::MemoryContext;
use crate::flags::bit_flags;
use crate::vm::{self, align_down, align_up, PageFlags};

/// Alignment of the data region in blocks without page guards.
pub const BLOCK_HEADER_ALIGN: usize = 64;

/// Handle to a block header living at the base of its own reservation.
pub type BlockPtr = NonNull<MemoryBlock>;

bit_flags! {
    pub struct BlockFlags: u8 {
        /// Skipped by the arena's allocation walk; owned by a specialised user.
        const ARENA_PRIVATE = 1 << 0;
        /// Alignment padding is disabled so successive allocations are adjacent.
        const ALLOCS_ARE_CONTIGUOUS = 1 << 1;
        /// The reservation may outlive context teardown.
        const ALLOC_RECORD_LEAK_PERMITTED = 1 << 2;
        /// Unallocated committed pages fault on touch.
        const PAGE_GUARD = 1 << 3;
        /// The reservation is not reported to the leak tracker.
        const NO_ALLOC_TRACK = 1 << 4;
    }
}

/// Whether an allocation must be returned zeroed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZeroMem {
    No,
    Yes,
}

/// Block header. Lives in the first bytes of the reservation it describes.
#[repr(C)]
pub struct MemoryBlock {
    data: NonNull<u8>,
    used: usize,
    size: usize,
    commit: usize,
    pub(crate) next: Option<BlockPtr>,
    pub(crate) prev: Option<BlockPtr>,
    flags: BlockFlags,
    reserve: usize,
}

/// Bytes in front of `data` for the given flags.
pub fn metadata_size(ctx: &MemoryContext, flags: BlockFlags) -> usize {
    if flags.contains(BlockFlags::PAGE_GUARD) {
        ctx.page_size()
    } else {
        // size_of is tiny; this cannot overflow.
        (size_of::<MemoryBlock>() + BLOCK_HEADER_ALIGN - 1) & !(BLOCK_HEADER_ALIGN - 1)
    }
}

impl MemoryBlock {
    /// Reserve a block able to hold `reserve` bytes with `commit` bytes ready.
    ///
    /// Both sizes are grown by the metadata prefix and rounded up to the page
    /// size. When the rounded commit covers the whole reservation it is
    /// committed by the reserve call itself. Returns `None` for a zero
    /// `reserve` or when the OS refuses.
    pub fn init(
        ctx: &MemoryContext,
        reserve: usize,
        commit: usize,
        flags: BlockFlags,
    ) -> Option<BlockPtr> {
        if reserve == 0 {
            return None;
        }

        let page = ctx.page_size();
        let metadata = metadata_size(ctx, flags);
        let reserve_aligned = align_up(metadata.checked_add(reserve)?, page)?;
        let commit_aligned = align_up(metadata.checked_add(commit)?, page)?.min(reserve_aligned);
        let commit_now = commit_aligned == reserve_aligned;

        let mut page_flags = PageFlags::READ_WRITE;
        if flags.contains(BlockFlags::ALLOC_RECORD_LEAK_PERMITTED) {
            page_flags |= PageFlags::LEAK_PERMITTED;
        }
        if flags.contains(BlockFlags::NO_ALLOC_TRACK) {
            page_flags |= PageFlags::NO_TRACK;
        }

        let base = vm::reserve(ctx, reserve_aligned, commit_now, page_flags)?;
        if !commit_now && !vm::commit(ctx, base, commit_aligned, PageFlags::READ_WRITE) {
            unsafe { vm::release(ctx, base, reserve_aligned) };
            return None;
        }

        let block = base.cast::<MemoryBlock>();
        // SAFETY: the header fits in the committed metadata prefix and the
        // reservation is page aligned, which satisfies MemoryBlock's alignment.
        let data = unsafe {
            let data = NonNull::new_unchecked(base.as_ptr().add(metadata));
            block.as_ptr().write(MemoryBlock {
                data,
                used: 0,
                size: reserve_aligned - metadata,
                commit: commit_aligned - metadata,
                next: None,
                prev: None,
                flags,
                reserve: reserve_aligned,
            });
            data
        };

        if flags.contains(BlockFlags::PAGE_GUARD) {
            let guard = PageFlags::READ_WRITE | PageFlags::GUARD;
            if !vm::protect(ctx, data, commit_aligned - metadata, guard) {
                unsafe { vm::release(ctx, base, reserve_aligned) };
                return None;
            }
        }

        trace!(
            target: "vmarena::block",
            reserve = reserve_aligned,
            commit = commit_aligned,
            flags = ?flags,
            address = ?base.as_ptr(),
            "block initialized"
        );
        Some(block)
    }

    /// Bump-allocate `size` bytes aligned to `align`.
    ///
    /// Never grows the reservation: returns `None` when the request does not
    /// fit in `size` or a guarded range cannot be made accessible, leaving
    /// `used` untouched. Pages past `commit` are committed on demand. With
    /// [`ZeroMem::Yes`] only bytes that were already committed are cleared;
    /// fresh OS pages are zero.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    pub fn alloc(
        &mut self,
        ctx: &MemoryContext,
        size: usize,
        align: usize,
        zero: ZeroMem,
    ) -> Option<NonNull<u8>> {
        assert!(align.is_power_of_two(), "alignment {align} must be a power of two");
        let align = if self.flags.contains(BlockFlags::ALLOCS_ARE_CONTIGUOUS) { 1 } else { align };

        let base = self.data.as_ptr() as usize;
        let aligned_used = align_up(base.checked_add(self.used)?, align)? - base;
        let new_used = aligned_used.checked_add(size)?;
        if new_used > self.size {
            return None;
        }

        let page = ctx.page_size();
        let guarded = self.flags.contains(BlockFlags::PAGE_GUARD);
        let previously_committed = self.commit;

        if new_used > self.commit {
            // data + commit always sits on a page boundary.
            let commit_size = align_up(new_used - self.commit, page)?;
            let commit_ptr = unsafe { NonNull::new_unchecked(self.data.as_ptr().add(self.commit)) };
            let page_flags = if guarded {
                PageFlags::READ_WRITE | PageFlags::GUARD
            } else {
                PageFlags::READ_WRITE
            };
            if !vm::commit(ctx, commit_ptr, commit_size, page_flags) {
                return None;
            }
            self.commit += commit_size;
            debug_assert!(self.commit <= self.size);
        }

        let result = unsafe { self.data.as_ptr().add(aligned_used) };

        if guarded && size > 0 {
            // Guard sentinels surround allocations, never sit inside them.
            let start = align_down(result as usize, page);
            let end = align_up(result as usize + size, page)?;
            let start_ptr = unsafe { NonNull::new_unchecked(start as *mut u8) };
            if !vm::protect(ctx, start_ptr, end - start, PageFlags::READ_WRITE) {
                return None;
            }
        }

        if zero == ZeroMem::Yes {
            let reused = previously_committed.saturating_sub(aligned_used).min(size);
            unsafe { ptr::write_bytes(result, 0, reused) };
        }

        self.used = new_used;
        NonNull::new(result)
    }

    /// Give whole pages between `round_up(used)` and `commit` back to the OS.
    ///
    /// Returns the number of bytes decommitted.
    pub fn decommit_unused(&mut self, ctx: &MemoryContext) -> usize {
        let page = ctx.page_size();
        let data = self.data.as_ptr() as usize;
        let commit_end = data + self.commit;
        let keep_end = match align_up(data + self.used, page) {
            Some(end) => end,
            None => return 0,
        };
        if keep_end >= commit_end {
            return 0;
        }

        let bytes = commit_end - keep_end;
        let ptr = unsafe { NonNull::new_unchecked(keep_end as *mut u8) };
        vm::decommit(ctx, ptr, bytes);
        self.commit = keep_end - data;
        bytes
    }

    /// Release the whole reservation, header included.
    ///
    /// # Safety
    ///
    /// `block` must come from [`MemoryBlock::init`] with the same context,
    /// must not be linked into a chain that is still used, and neither the
    /// handle nor pointers into the block may be used afterwards.
    pub unsafe fn free(ctx: &MemoryContext, block: BlockPtr) {
        let reserve = (*block.as_ptr()).reserve;
        trace!(target: "vmarena::block", reserve, address = ?block.as_ptr(), "block freed");
        vm::release(ctx, block.cast(), reserve);
    }

    #[inline]
    pub fn data(&self) -> NonNull<u8> {
        self.data
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    /// Usable bytes (reservation minus metadata).
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn commit(&self) -> usize {
        self.commit
    }

    #[inline]
    pub fn flags(&self) -> BlockFlags {
        self.flags
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.size - self.used
    }

    #[inline]
    pub fn is_private(&self) -> bool {
        self.flags.contains(BlockFlags::ARENA_PRIVATE)
    }

    /// Rewind the bump offset. Only ever moves backwards.
    #[inline]
    pub(crate) fn rewind(&mut self, used: usize) {
        debug_assert!(used <= self.used, "rewind must not move the cursor forward");
        self.used = used;
    }

    pub fn info(&self) -> BlockInfo {
        BlockInfo {
            id: BlockId(self as *const MemoryBlock as usize),
            data: self.data.as_ptr() as usize,
            used: self.used,
            size: self.size,
            commit: self.commit,
            flags: self.flags,
        }
    }
}

/// Identity of a block (its header address) for comparisons and logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(usize);

impl BlockId {
    pub(crate) fn of(block: BlockPtr) -> Self {
        Self(block.as_ptr() as usize)
    }
}

/// Read-only copy of a block's bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    pub id: BlockId,
    /// Address of the first data byte.
    pub data: usize,
    pub used: usize,
    pub size: usize,
    pub commit: usize,
    pub flags: BlockFlags,
}

impl BlockInfo {
    /// True if `[address, address + len)` lies inside the committed range.
    pub fn contains_committed(&self, address: usize, len: usize) -> bool {
        address >= self.data && address + len <= self.data + self.commit
    }
}
