//! VirtualAlloc/VirtualFree/VirtualProtect backend.

use core::ptr::{self, NonNull};

use winapi::shared::minwindef::DWORD;
use winapi::um::memoryapi::{VirtualAlloc, VirtualFree, VirtualProtect};
use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};
use winapi::um::winnt::{
    MEM_COMMIT, MEM_DECOMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_GUARD, PAGE_NOACCESS, PAGE_READONLY,
    PAGE_READWRITE,
};

use super::PageFlags;

pub(super) fn page_info() -> (usize, usize) {
    let mut info: SYSTEM_INFO = unsafe { core::mem::zeroed() };
    unsafe { GetSystemInfo(&mut info) };
    (info.dwPageSize as usize, info.dwAllocationGranularity as usize)
}

fn protection(flags: PageFlags) -> DWORD {
    if flags.contains(PageFlags::NO_ACCESS) {
        return PAGE_NOACCESS;
    }

    let mut result = if flags.contains(PageFlags::WRITE) {
        if !flags.contains(PageFlags::READ) {
            tracing::warn!(
                target: "vmarena::vm",
                "write-only pages are not supported on Windows, promoting to read-write"
            );
        }
        PAGE_READWRITE
    } else if flags.contains(PageFlags::READ) {
        PAGE_READONLY
    } else {
        PAGE_NOACCESS
    };

    // PAGE_GUARD cannot be combined with PAGE_NOACCESS.
    if flags.contains(PageFlags::GUARD) && result != PAGE_NOACCESS {
        result |= PAGE_GUARD;
    }
    result
}

pub(super) fn reserve(size: usize, commit_now: bool, flags: PageFlags) -> Option<NonNull<u8>> {
    let (kind, protect) = if commit_now {
        (MEM_RESERVE | MEM_COMMIT, protection(flags))
    } else {
        (MEM_RESERVE, PAGE_NOACCESS)
    };

    let ptr = unsafe { VirtualAlloc(ptr::null_mut(), size, kind, protect) };
    NonNull::new(ptr.cast())
}

pub(super) fn commit(ptr: NonNull<u8>, size: usize, flags: PageFlags) -> bool {
    let result = unsafe { VirtualAlloc(ptr.as_ptr().cast(), size, MEM_COMMIT, protection(flags)) };
    !result.is_null()
}

pub(super) fn decommit(ptr: NonNull<u8>, size: usize) {
    unsafe {
        VirtualFree(ptr.as_ptr().cast(), size, MEM_DECOMMIT);
    }
}

pub(super) unsafe fn release(ptr: NonNull<u8>, _size: usize) {
    // MEM_RELEASE requires a zero size and frees the whole reservation.
    VirtualFree(ptr.as_ptr().cast(), 0, MEM_RELEASE);
}

pub(super) fn protect(ptr: NonNull<u8>, size: usize, flags: PageFlags) -> bool {
    let mut previous: DWORD = 0;
    unsafe { VirtualProtect(ptr.as_ptr().cast(), size, protection(flags), &mut previous) != 0 }
}
