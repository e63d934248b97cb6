//! vmarena - arena allocators over OS virtual memory
//!
//! Layers, leaf first:
//! - [`vm`]: reserve / commit / decommit / release / protect page ranges
//! - [`block`]: one reservation, bump-allocated, committed on demand
//! - [`arena`]: a chain of blocks with exact-fit growth
//! - [`temp`]: transactional rollback/commit scopes over an arena
//! - [`pool`]: size-classed free lists for individually freed slots
//! - [`catalog`]: mutex-guarded registry of labelled arenas
//!
//! Page geometry and the leak tracker live in an explicit [`MemoryContext`]
//! that every arena holds.
//!
//! ```no_run
//! use vmarena::{Arena, ArenaFlags, TempOutcome, TempMemory, ZeroMem};
//!
//! let ctx = vmarena::init();
//! let mut arena = Arena::new(ctx.clone(), 1 << 20, 1 << 16, ArenaFlags::empty());
//!
//! let temp = TempMemory::begin(&arena);
//! let scratch = arena.alloc(4096, 16, ZeroMem::Yes);
//! assert!(scratch.is_some());
//! temp.end(&mut arena, TempOutcome::Rollback);
//!
//! drop(arena);
//! assert!(vmarena::cleanup(&ctx).is_clean());
//! ```

mod flags;

pub mod arena;
pub mod block;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod pool;
pub mod temp;
pub mod tracker;
pub mod vm;

use std::sync::Arc;

pub use arena::{Arena, ArenaFlags, ArenaId, ArenaStats, POISON_BYTE};
pub use block::{BlockFlags, BlockInfo, MemoryBlock, ZeroMem};
pub use catalog::{ArenaCatalog, ArenaHandle, CatalogEntry};
pub use config::Config;
pub use context::MemoryContext;
pub use error::{Error, Result};
pub use pool::{ChunkPool, ChunkPoolStats};
pub use temp::{TempMemory, TempOutcome, TempScope};
pub use tracker::{LeakReport, LeakTracker};
pub use vm::PageFlags;

/// Build a memory context from the OS page geometry.
pub fn init() -> Arc<MemoryContext> {
    let ctx = MemoryContext::new();
    logging::log_context_init(ctx.page_size(), ctx.allocation_granularity());
    ctx
}

/// Report every reservation still outstanding on `ctx`.
///
/// Records flagged leak-permitted are listed but not counted as leaks.
pub fn cleanup(ctx: &MemoryContext) -> LeakReport {
    let report = ctx.tracker().report();
    logging::log_leak_report(&report);
    report
}
