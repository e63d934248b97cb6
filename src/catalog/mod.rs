//! Arena catalog - process-wide registry of labelled arenas
//!
//! Items live in a circular doubly linked list closed by a heap sentinel.
//! Item nodes and copied labels are carved from the catalog's own chunk
//! pool; the catalog never owns arena memory, only shared handles to the
//! arenas it lists.
//!
//! Every operation takes the catalog mutex. Composite steps such as
//! "find, then add if missing" are not atomic and must be serialised by
//! the caller when it matters.


use core::mem::size_of;
use core::ptr::{self, NonNull};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::arena::{Arena, ArenaFlags};
use crate::config::PoolConfig;
use crate::context::MemoryContext;
use crate::pool::ChunkPool;

/// Shared arena. The mutex is the external synchronisation arenas require.
pub type ArenaHandle = Arc<Mutex<Arena>>;

struct CatalogItem {
    arena: Option<ArenaHandle>,
    label: NonNull<u8>,
    label_len: usize,
    /// The label bytes live in the pool and go back to it on removal.
    owned: bool,
    next: NonNull<CatalogItem>,
    prev: NonNull<CatalogItem>,
}

impl CatalogItem {
    fn label(&self) -> &str {
        // SAFETY: label bytes were copied from a `&str` or borrow a `&'static str`.
        unsafe {
            let bytes = core::slice::from_raw_parts(self.label.as_ptr(), self.label_len);
            core::str::from_utf8_unchecked(bytes)
        }
    }
}

struct CatalogState {
    pool: ChunkPool,
    sentinel: NonNull<CatalogItem>,
    arena_count: u64,
}

// Safety: item nodes are reachable only through the state, which the
// catalog mutex guards.
unsafe impl Send for CatalogState {}

impl CatalogState {
    fn items(&self) -> ItemIter<'_> {
        ItemIter {
            cursor: unsafe { self.sentinel.as_ref().next },
            sentinel: self.sentinel,
            _state: self,
        }
    }

    fn find_item(&self, label: &str) -> Option<NonNull<CatalogItem>> {
        self.items().find(|item| unsafe { item.as_ref() }.label() == label)
    }

    fn insert(&mut self, arena: ArenaHandle, label: &str, copy: bool) -> bool {
        let (label_ptr, owned) = if copy {
            match self.pool.copy(label.as_bytes()) {
                Some(ptr) => (ptr, true),
                None => return false,
            }
        } else {
            (NonNull::from(label.as_bytes()).cast::<u8>(), false)
        };

        let Some(node) = self.pool.alloc(size_of::<CatalogItem>()) else {
            if owned {
                unsafe { self.pool.dealloc(label_ptr) };
            }
            return false;
        };

        let node = node.cast::<CatalogItem>();
        unsafe {
            let sentinel = self.sentinel.as_ptr();
            let last = (*sentinel).prev;
            node.as_ptr().write(CatalogItem {
                arena: Some(arena),
                label: label_ptr,
                label_len: label.len(),
                owned,
                next: self.sentinel,
                prev: last,
            });
            (*last.as_ptr()).next = node;
            (*sentinel).prev = node;
        }
        self.arena_count += 1;
        true
    }

    /// Unlink `item`, hand its memory back to the pool and return its arena.
    unsafe fn unlink(&mut self, item: NonNull<CatalogItem>) -> Option<ArenaHandle> {
        let node = item.as_ptr();
        (*(*node).prev.as_ptr()).next = (*node).next;
        (*(*node).next.as_ptr()).prev = (*node).prev;

        let arena = (*node).arena.take();
        if (*node).owned {
            self.pool.dealloc((*node).label);
        }
        ptr::drop_in_place(node);
        self.pool.dealloc(item.cast());
        self.arena_count -= 1;
        arena
    }
}

struct ItemIter<'a> {
    cursor: NonNull<CatalogItem>,
    sentinel: NonNull<CatalogItem>,
    _state: &'a CatalogState,
}

impl Iterator for ItemIter<'_> {
    type Item = NonNull<CatalogItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == self.sentinel {
            return None;
        }
        let item = self.cursor;
        self.cursor = unsafe { item.as_ref().next };
        Some(item)
    }
}

/// A registered arena and its label.
#[derive(Clone)]
pub struct CatalogEntry {
    pub arena: ArenaHandle,
    pub label: String,
}

impl core::fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CatalogEntry").field("label", &self.label).finish_non_exhaustive()
    }
}

pub struct ArenaCatalog {
    state: Mutex<CatalogState>,
}

impl ArenaCatalog {
    /// Empty catalog whose nodes and label copies come from `pool`.
    pub fn new(pool: ChunkPool) -> Self {
        let sentinel = Box::leak(Box::new(CatalogItem {
            arena: None,
            label: NonNull::dangling(),
            label_len: 0,
            owned: false,
            next: NonNull::dangling(),
            prev: NonNull::dangling(),
        }));
        let sentinel_ptr = NonNull::from(&mut *sentinel);
        sentinel.next = sentinel_ptr;
        sentinel.prev = sentinel_ptr;

        Self {
            state: Mutex::new(CatalogState {
                pool,
                sentinel: sentinel_ptr,
                arena_count: 0,
            }),
        }
    }

    /// Catalog backed by a pool built from `config`.
    pub fn with_context(ctx: Arc<MemoryContext>, config: &PoolConfig) -> Self {
        Self::new(ChunkPool::from_config(ctx, config))
    }

    /// Register `arena` under a label borrowed for the program's lifetime.
    ///
    /// Returns `false` when the pool could not provide an item node.
    pub fn add_label_ref(&self, arena: ArenaHandle, label: &'static str) -> bool {
        let added = self.state.lock().insert(arena, label, false);
        debug!(target: "vmarena::catalog", label, added, "arena registered");
        added
    }

    /// Register `arena` under a pool-owned copy of `label`.
    pub fn add_label_copy(&self, arena: ArenaHandle, label: &str) -> bool {
        let added = self.state.lock().insert(arena, label, true);
        debug!(target: "vmarena::catalog", label, added, "arena registered");
        added
    }

    /// First arena registered under `label`.
    pub fn find(&self, label: &str) -> Option<CatalogEntry> {
        let state = self.state.lock();
        let item = state.find_item(label)?;
        let item = unsafe { item.as_ref() };
        Some(CatalogEntry {
            arena: item.arena.clone()?,
            label: item.label().to_owned(),
        })
    }

    /// Drop the first registration under `label`, returning its arena handle.
    pub fn remove(&self, label: &str) -> Option<ArenaHandle> {
        let mut state = self.state.lock();
        let item = state.find_item(label)?;
        let arena = unsafe { state.unlink(item) };
        debug!(
            target: "vmarena::catalog",
            label,
            remaining = state.arena_count,
            "arena unregistered"
        );
        arena
    }

    /// Create an arena on the catalog's context and register it by reference.
    ///
    /// Creation and registration are two separate steps; another thread may
    /// observe the catalog in between.
    pub fn alloc_label_ref(
        &self,
        reserve: usize,
        commit: usize,
        flags: ArenaFlags,
        label: &'static str,
    ) -> Option<ArenaHandle> {
        let handle = self.new_arena(reserve, commit, flags, label);
        self.add_label_ref(handle.clone(), label).then_some(handle)
    }

    /// Like [`ArenaCatalog::alloc_label_ref`] with a copied label.
    pub fn alloc_label_copy(
        &self,
        reserve: usize,
        commit: usize,
        flags: ArenaFlags,
        label: &str,
    ) -> Option<ArenaHandle> {
        let handle = self.new_arena(reserve, commit, flags, label);
        self.add_label_copy(handle.clone(), label).then_some(handle)
    }

    fn new_arena(
        &self,
        reserve: usize,
        commit: usize,
        flags: ArenaFlags,
        label: &str,
    ) -> ArenaHandle {
        let ctx = self.state.lock().pool.arena().context().clone();
        let mut arena = Arena::new(ctx, reserve, commit, flags);
        arena.set_label(label);
        Arc::new(Mutex::new(arena))
    }

    /// Snapshot of every registration, oldest first.
    pub fn entries(&self) -> Vec<CatalogEntry> {
        let state = self.state.lock();
        state
            .items()
            .filter_map(|item| {
                let item = unsafe { item.as_ref() };
                Some(CatalogEntry {
                    arena: item.arena.clone()?,
                    label: item.label().to_owned(),
                })
            })
            .collect()
    }

    pub fn arena_count(&self) -> u64 {
        self.state.lock().arena_count
    }

    pub fn pool_stats(&self) -> crate::pool::ChunkPoolStats {
        self.state.lock().pool.stats()
    }
}

impl Drop for ArenaCatalog {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let items: Vec<_> = state.items().collect();
        for item in items {
            // Handles drop here; node memory goes away with the pool's arena.
            unsafe { ptr::drop_in_place(item.as_ptr()) };
        }
        // SAFETY: the sentinel was leaked from a Box in `new` and is unlinked from nothing else.
        unsafe { drop(Box::from_raw(state.sentinel.as_ptr())) };
        debug!(target: "vmarena::catalog", arenas = state.arena_count, "catalog dropped");
    }
}

impl core::fmt::Debug for ArenaCatalog {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ArenaCatalog")
            .field("arena_count", &self.arena_count())
            .finish()
    }
}
