//! Memory context - page geometry plus the leak tracker
//!
//! Replaces process-wide library state: the page size and allocation
//! granularity are queried once when the context is built and read-only
//! afterwards. Arenas hold an `Arc` to the context they were created from.

use std::sync::Arc;

use tracing::debug;

use crate::tracker::LeakTracker;
use crate::vm;

pub struct MemoryContext {
    page_size: usize,
    allocation_granularity: usize,
    tracker: LeakTracker,
}

impl MemoryContext {
    /// Build a context from the OS page geometry.
    pub fn new() -> Arc<Self> {
        let (page_size, allocation_granularity) = vm::os_page_info();
        Self::build(page_size, allocation_granularity)
    }

    /// Build a context with a coarser logical page size.
    ///
    /// # Panics
    ///
    /// Panics unless `page_size` is a power of two and a multiple of the OS
    /// page size, since every commit/protect is issued at this granularity.
    pub fn with_page_size(page_size: usize) -> Arc<Self> {
        let (os_page, allocation_granularity) = vm::os_page_info();
        assert!(
            page_size.is_power_of_two() && page_size % os_page == 0,
            "page size {page_size} must be a power of two multiple of the OS page size {os_page}"
        );
        Self::build(page_size, allocation_granularity.max(page_size))
    }

    fn build(page_size: usize, allocation_granularity: usize) -> Arc<Self> {
        debug!(
            target: "vmarena::context",
            page_size,
            allocation_granularity,
            "memory context initialized"
        );
        Arc::new(Self {
            page_size,
            allocation_granularity,
            tracker: LeakTracker::new(),
        })
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    #[inline]
    pub fn allocation_granularity(&self) -> usize {
        self.allocation_granularity
    }

    #[inline]
    pub fn tracker(&self) -> &LeakTracker {
        &self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_geometry_is_sane() {
        let ctx = MemoryContext::new();
        assert!(ctx.page_size().is_power_of_two());
        assert!(ctx.allocation_granularity() >= ctx.page_size());
        assert_eq!(ctx.tracker().outstanding(), 0);
    }

    #[test]
    fn coarser_page_size_is_accepted() {
        let os_page = MemoryContext::new().page_size();
        let ctx = MemoryContext::with_page_size(os_page * 4);
        assert_eq!(ctx.page_size(), os_page * 4);
    }

    #[test]
    #[should_panic(expected = "multiple of the OS page size")]
    fn finer_page_size_is_rejected() {
        let os_page = MemoryContext::new().page_size();
        MemoryContext::with_page_size(os_page / 2);
    }
}
