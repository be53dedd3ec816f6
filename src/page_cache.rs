//! Page Cache (back-end): owns every OS mapping and serves page-runs.
//!
//! Free runs live in two indexes kept in lockstep: a size-indexed store for
//! smallest-fit lookup and an address-indexed map for neighbor coalescing.
//! Coalescing is eager, so no two free runs are ever adjacent. A master
//! region map remembers every mapping ever obtained so teardown can return
//! them to the OS, and so a merge never joins runs from different mappings.

use crate::platform;
use crate::size_class::{ALIGNMENT, BATCH_PAGES, PAGE_SIZE};
use crate::span::MemorySpan;
use parking_lot::Mutex;
use std::alloc::{self, Layout};
use std::collections::{BTreeMap, BTreeSet};

pub struct PageCache {
    inner: Mutex<PageCacheInner>,
}

struct PageCacheInner {
    /// Page count -> base addresses of free runs of exactly that length.
    free_store: BTreeMap<usize, BTreeSet<usize>>,
    /// Base address -> free run, for neighbor lookup.
    free_map: BTreeMap<usize, MemorySpan>,
    /// Base address -> length of every region obtained from the OS.
    regions: BTreeMap<usize, usize>,
    stopped: bool,
}

impl PageCache {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(PageCacheInner {
                free_store: BTreeMap::new(),
                free_map: BTreeMap::new(),
                regions: BTreeMap::new(),
                stopped: false,
            }),
        }
    }

    /// Allocate a run of exactly `page_count` pages.
    ///
    /// Smallest-fit over the free store; on a miss, maps
    /// `max(page_count, BATCH_PAGES)` fresh pages and files the remainder.
    /// Returns `None` for a zero request or when the OS is out of memory.
    pub fn allocate_page(&self, page_count: usize) -> Option<MemorySpan> {
        if page_count == 0 {
            return None;
        }
        let mut inner = self.inner.lock();
        if let Some(run) = inner.take_smallest_fit(page_count) {
            return Some(inner.split_off(run, page_count));
        }

        let pages = page_count.max(BATCH_PAGES);
        let base = platform::map(pages * PAGE_SIZE)?;
        let region = MemorySpan::new(base.as_ptr(), pages * PAGE_SIZE);
        inner.regions.insert(base.as_ptr() as usize, region.size());
        Some(inner.split_off(region, page_count))
    }

    /// Return a run to the free pool, merging it with any adjacent free
    /// neighbor from the same OS mapping.
    ///
    /// # Safety
    ///
    /// `run` must be a whole-page run previously handed out by
    /// [`allocate_page`](Self::allocate_page), with no live blocks inside it,
    /// and must not already be tracked as free.
    pub unsafe fn deallocate_page(&self, run: MemorySpan) {
        debug_assert!(run.size() % PAGE_SIZE == 0);
        let mut inner = self.inner.lock();
        let mut run = run;
        debug_assert!(!inner.free_map.contains_key(&(run.data() as usize)));

        // Lower neighbor: the greatest free base below ours. Eager
        // coalescing means at most one merge on each side.
        let base = run.data() as usize;
        if let Some((&prev_base, &prev)) = inner.free_map.range(..base).next_back() {
            if prev_base + prev.size() == base && inner.same_region(prev_base, base) {
                inner.remove_free(prev);
                run = MemorySpan::new(prev.data(), prev.size() + run.size());
            }
        }

        // Upper neighbor: exact lookup at our end address.
        let end = run.data() as usize + run.size();
        if let Some(&next) = inner.free_map.get(&end) {
            if inner.same_region(run.data() as usize, end) {
                inner.remove_free(next);
                run = MemorySpan::new(run.data(), run.size() + next.size());
            }
        }

        inner.insert_free(run);
    }

    /// Bypass for blocks above the small-allocation ceiling: a single unit
    /// from the system allocator, not the OS mapper.
    pub fn allocate_unit(&self, bytes: usize) -> Option<MemorySpan> {
        debug_assert!(bytes > 0);
        let layout = Layout::from_size_align(bytes, ALIGNMENT).ok()?;
        let ptr = unsafe { alloc::alloc(layout) };
        if ptr.is_null() {
            None
        } else {
            Some(MemorySpan::new(ptr, bytes))
        }
    }

    /// Return a unit obtained from [`allocate_unit`](Self::allocate_unit).
    ///
    /// # Safety
    ///
    /// `region` must be exactly the span returned by `allocate_unit`.
    pub unsafe fn deallocate_unit(&self, region: MemorySpan) {
        let layout = unsafe { Layout::from_size_align_unchecked(region.size(), ALIGNMENT) };
        unsafe { alloc::dealloc(region.data(), layout) };
    }

    /// Release every region obtained from the OS. Idempotent; also invoked
    /// on drop. After shutdown no more page-runs can be served from the
    /// released regions, so this is only sound once no allocation is live.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        if inner.stopped {
            return;
        }
        inner.stopped = true;
        for (&base, &len) in &inner.regions {
            unsafe { platform::unmap(base as *mut u8, len) };
        }
        inner.free_store.clear();
        inner.free_map.clear();
    }
}

impl Drop for PageCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PageCacheInner {
    /// Remove and return the smallest free run of at least `page_count`
    /// pages, lowest base first within a length.
    fn take_smallest_fit(&mut self, page_count: usize) -> Option<MemorySpan> {
        let (&pages, bases) = self.free_store.range_mut(page_count..).next()?;
        let base = *bases.iter().next().expect("empty length bucket");
        bases.remove(&base);
        if bases.is_empty() {
            self.free_store.remove(&pages);
        }
        self.free_map.remove(&base);
        Some(MemorySpan::new(base as *mut u8, pages * PAGE_SIZE))
    }

    /// Split `page_count` pages off the front of `run`; the remainder, if
    /// any, goes back into both indexes.
    fn split_off(&mut self, run: MemorySpan, page_count: usize) -> MemorySpan {
        let used = page_count * PAGE_SIZE;
        let result = run.subspan_len(0, used);
        let rest = run.subspan(used);
        if rest.size() > 0 {
            self.insert_free(rest);
        }
        result
    }

    fn insert_free(&mut self, run: MemorySpan) {
        self.free_store
            .entry(run.size() / PAGE_SIZE)
            .or_default()
            .insert(run.data() as usize);
        self.free_map.insert(run.data() as usize, run);
    }

    fn remove_free(&mut self, run: MemorySpan) {
        let pages = run.size() / PAGE_SIZE;
        if let Some(bases) = self.free_store.get_mut(&pages) {
            bases.remove(&(run.data() as usize));
            if bases.is_empty() {
                self.free_store.remove(&pages);
            }
        }
        self.free_map.remove(&(run.data() as usize));
    }

    /// Whether address `b` falls inside the OS mapping that contains `a`.
    /// Used to keep merged runs from straddling a mapping boundary.
    fn same_region(&self, a: usize, b: usize) -> bool {
        match self.regions.range(..=a).next_back() {
            Some((&base, &len)) => b >= base && b < base + len,
            None => false,
        }
    }
}
