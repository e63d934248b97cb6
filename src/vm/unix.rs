//! mmap/mprotect/madvise/munmap backend.

use core::ptr::{self, NonNull};

use libc::c_int;

use super::PageFlags;

#[cfg(any(target_os = "linux", target_os = "android"))]
const MAP_FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const MAP_FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANON;

pub(super) fn page_info() -> (usize, usize) {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let page = if page > 0 { page as usize } else { 4096 };
    (page, page)
}

/// No guard pages on POSIX: `GUARD` degrades to `PROT_NONE`.
fn prot(flags: PageFlags) -> c_int {
    if flags.intersects(PageFlags::NO_ACCESS | PageFlags::GUARD) {
        return libc::PROT_NONE;
    }

    let mut prot = libc::PROT_NONE;
    if flags.contains(PageFlags::READ) {
        prot |= libc::PROT_READ;
    }
    if flags.contains(PageFlags::WRITE) {
        prot |= libc::PROT_WRITE;
    }
    prot
}

pub(super) fn reserve(size: usize, commit_now: bool, flags: PageFlags) -> Option<NonNull<u8>> {
    let prot = if commit_now { prot(flags) } else { libc::PROT_NONE };

    let ptr = unsafe { libc::mmap(ptr::null_mut(), size, prot, MAP_FLAGS, -1, 0) };
    if ptr == libc::MAP_FAILED {
        return None;
    }
    NonNull::new(ptr.cast())
}

pub(super) fn commit(ptr: NonNull<u8>, size: usize, flags: PageFlags) -> bool {
    unsafe { libc::mprotect(ptr.as_ptr().cast(), size, prot(flags)) == 0 }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(super) fn decommit(ptr: NonNull<u8>, size: usize) {
    unsafe {
        // MADV_DONTNEED on private anonymous memory drops the pages; they refault as zero.
        libc::madvise(ptr.as_ptr().cast(), size, libc::MADV_DONTNEED);
        libc::mprotect(ptr.as_ptr().cast(), size, libc::PROT_NONE);
    }
}

/// Elsewhere MADV_DONTNEED may keep page contents, so map fresh pages over the range.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(super) fn decommit(ptr: NonNull<u8>, size: usize) {
    unsafe {
        libc::mmap(
            ptr.as_ptr().cast(),
            size,
            libc::PROT_NONE,
            MAP_FLAGS | libc::MAP_FIXED,
            -1,
            0,
        );
    }
}

pub(super) unsafe fn release(ptr: NonNull<u8>, size: usize) {
    libc::munmap(ptr.as_ptr().cast(), size);
}

pub(super) fn protect(ptr: NonNull<u8>, size: usize, flags: PageFlags) -> bool {
    unsafe { libc::mprotect(ptr.as_ptr().cast(), size, prot(flags)) == 0 }
}
