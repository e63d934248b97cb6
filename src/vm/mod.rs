//! Virtual memory manager - reserve/commit/decommit/release/protect
//!
//! Design: Thin portable layer over the OS page primitives:
//! 1. Reserve address space (optionally committing it in the same call)
//! 2. Commit/decommit page ranges on demand
//! 3. Release whole reservations
//!
//! Every reservation is reported to the context's leak tracker unless the
//! caller passes [`PageFlags::NO_TRACK`].

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;


use core::ptr::NonNull;

use tracing::trace;

use crate::context::MemoryContext;
use crate::flags::bit_flags;

bit_flags! {
    /// Page permissions plus tracking modifiers.
    ///
    /// `GUARD` faults on first touch and then reverts to the underlying
    /// permission. Platforms without guard pages treat it as `NO_ACCESS`.
    pub struct PageFlags: u8 {
        const NO_ACCESS = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const GUARD = 1 << 3;
        const READ_WRITE = (1 << 1) | (1 << 2);
        /// The reservation may legitimately outlive context teardown.
        const LEAK_PERMITTED = 1 << 4;
        /// Do not report the reservation to the leak tracker.
        const NO_TRACK = 1 << 5;
    }
}

impl PageFlags {
    /// Only the permission bits, without tracking modifiers.
    #[inline]
    pub const fn permissions(self) -> Self {
        Self::from_bits_retain(self.bits() & 0b1111)
    }
}

/// Query the OS page size and allocation granularity.
pub fn os_page_info() -> (usize, usize) {
    os::page_info()
}

/// Reserve `size` bytes of address space.
///
/// With `commit_now` the whole range is also committed with `flags` in the
/// same call. Returns `None` on a zero size or OS failure.
pub fn reserve(
    ctx: &MemoryContext,
    size: usize,
    commit_now: bool,
    flags: PageFlags,
) -> Option<NonNull<u8>> {
    if size == 0 {
        return None;
    }

    let ptr = match os::reserve(size, commit_now, flags.permissions()) {
        Some(ptr) => ptr,
        None => {
            tracing::warn!(
                target: "vmarena::vm",
                size,
                commit_now,
                "address space reservation failed"
            );
            return None;
        }
    };

    if !flags.contains(PageFlags::NO_TRACK) {
        ctx.tracker()
            .track_alloc(ptr.as_ptr() as usize, size, flags.contains(PageFlags::LEAK_PERMITTED));
    }

    trace!(
        target: "vmarena::vm",
        size,
        commit_now,
        address = ?ptr.as_ptr(),
        "reserved address range"
    );
    Some(ptr)
}

/// Commit pages inside a reservation. `ptr` and `size` must be page aligned.
pub fn commit(ctx: &MemoryContext, ptr: NonNull<u8>, size: usize, flags: PageFlags) -> bool {
    assert_page_aligned(ctx, ptr, size, "commit");
    if size == 0 {
        return true;
    }

    let ok = os::commit(ptr, size, flags.permissions());
    trace!(target: "vmarena::vm", size, ok, address = ?ptr.as_ptr(), "committed pages");
    ok
}

/// Return physical pages to the OS while keeping the address range reserved.
///
/// Re-committed pages read back as zero.
pub fn decommit(ctx: &MemoryContext, ptr: NonNull<u8>, size: usize) {
    assert_page_aligned(ctx, ptr, size, "decommit");
    if size == 0 {
        return;
    }

    os::decommit(ptr, size);
    trace!(target: "vmarena::vm", size, address = ?ptr.as_ptr(), "decommitted pages");
}

/// Release an entire reservation made by [`reserve`].
///
/// # Safety
///
/// `ptr` must be the base of a live reservation of exactly `size` bytes and
/// no reference into the range may be used afterwards.
pub unsafe fn release(ctx: &MemoryContext, ptr: NonNull<u8>, size: usize) {
    ctx.tracker().track_dealloc(ptr.as_ptr() as usize);
    os::release(ptr, size);
    trace!(target: "vmarena::vm", size, address = ?ptr.as_ptr(), "released address range");
}

/// Change the protection of committed pages. `ptr` and `size` must be page aligned.
pub fn protect(ctx: &MemoryContext, ptr: NonNull<u8>, size: usize, flags: PageFlags) -> bool {
    assert_page_aligned(ctx, ptr, size, "protect");
    if size == 0 {
        return true;
    }

    let ok = os::protect(ptr, size, flags.permissions());
    trace!(
        target: "vmarena::vm",
        size,
        ok,
        flags = ?flags,
        address = ?ptr.as_ptr(),
        "protected pages"
    );
    ok
}

/// Partial-page operations cannot be expressed on the OS primitive.
#[inline]
fn assert_page_aligned(ctx: &MemoryContext, ptr: NonNull<u8>, size: usize, op: &str) {
    let page = ctx.page_size();
    assert!(
        ptr.as_ptr() as usize % page == 0 && size % page == 0,
        "vm {op}: address {:p} and size {size} must be multiples of the page size {page}",
        ptr.as_ptr()
    );
}

/// Round `value` up to the next multiple of `align` (a power of two).
///
/// Returns `None` on overflow.
#[inline]
pub const fn align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two(), "alignment must be power of 2");
    match value.checked_add(align - 1) {
        Some(sum) => Some(sum & !(align - 1)),
        None => None,
    }
}

/// Round `value` down to a multiple of `align` (a power of two).
#[inline]
pub const fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}
