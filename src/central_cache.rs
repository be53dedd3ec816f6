//! Central Cache (middle-end): per-size-class shared free lists.
//!
//! Each class owns a free list, a count, and an address-ordered map of the
//! page-runs (spans) currently carved for it, all behind that class's own
//! spinlock. Threads touching different classes never contend. When a span's
//! last outstanding block comes home the whole run is stripped off the free
//! list and handed back to the page tier.

use crate::page_cache::PageCache;
#[cfg(not(debug_assertions))]
use crate::size_class::BUCKET_WATERMARK;
#[cfg(debug_assertions)]
use crate::size_class::MAX_UNIT_COUNT;
use crate::size_class::{
    round_up, size_to_class, ALIGNMENT, MAX_UNIT_SIZE, NUM_CLASSES, PAGE_SIZE,
};
use crate::span::{chain_length, FreeObject, MemorySpan, PageSpan};
use crate::sync::SpinMutex;
use core::ptr::{self, NonNull};
use std::collections::BTreeMap;

pub struct CentralCache {
    classes: [SpinMutex<ClassBucket>; NUM_CLASSES],
}

/// All shared state for one size class.
struct ClassBucket {
    free_head: *mut FreeObject,
    free_count: usize,
    /// Span base address -> accounting record, for routing a returned block
    /// to its owning run in O(log n).
    spans: BTreeMap<usize, PageSpan>,
    /// How many watermark-sized groups to request on the next refill.
    /// Grows by one per miss, halves when a span is reclaimed.
    #[cfg(not(debug_assertions))]
    next_group_count: usize,
}

// SAFETY: every ClassBucket is only reachable through its SpinMutex.
unsafe impl Send for ClassBucket {}

impl CentralCache {
    pub const fn new() -> Self {
        Self {
            classes: [const { SpinMutex::new(ClassBucket::new()) }; NUM_CLASSES],
        }
    }

    /// Hand out `block_count` blocks of `memory_size` bytes as a
    /// null-terminated embedded chain.
    ///
    /// `memory_size` must already be pointer-aligned. Sizes above
    /// `MAX_UNIT_SIZE` bypass the class tiers and come from the system
    /// allocator as a single unit. Returns `None` on a zero size or count,
    /// or when memory cannot be obtained.
    pub fn allocate(
        &self,
        memory_size: usize,
        block_count: usize,
        page_cache: &PageCache,
    ) -> Option<NonNull<u8>> {
        debug_assert!(memory_size % ALIGNMENT == 0);
        #[cfg(debug_assertions)]
        assert!(block_count <= MAX_UNIT_COUNT);

        if memory_size == 0 || block_count == 0 {
            return None;
        }
        if memory_size > MAX_UNIT_SIZE {
            return page_cache
                .allocate_unit(memory_size)
                .and_then(|unit| NonNull::new(unit.data()));
        }

        let index = size_to_class(memory_size);
        let mut bucket = self.classes[index].lock();
        let head = if bucket.free_count < block_count {
            // Residue below the requested count is left parked; the batch
            // is carved from a fresh page-run instead.
            bucket.refill_and_take(memory_size, block_count, page_cache)?
        } else {
            bucket.take_from_free_list(memory_size, block_count)
        };
        debug_assert_eq!(chain_length(head), block_count);
        NonNull::new(head as *mut u8)
    }

    /// Take back a null-terminated chain of `memory_size`-byte blocks.
    ///
    /// # Safety
    ///
    /// Every block in the chain must have been produced by
    /// [`allocate`](Self::allocate) with the same `memory_size`, and none may
    /// already be free.
    pub unsafe fn deallocate(
        &self,
        memory_list: NonNull<u8>,
        memory_size: usize,
        page_cache: &PageCache,
    ) {
        debug_assert!(memory_size % ALIGNMENT == 0);
        if memory_size > MAX_UNIT_SIZE {
            unsafe {
                page_cache.deallocate_unit(MemorySpan::new(memory_list.as_ptr(), memory_size))
            };
            return;
        }

        let index = size_to_class(memory_size);
        let mut bucket = self.classes[index].lock();
        let mut current = memory_list.as_ptr() as *mut FreeObject;
        while !current.is_null() {
            let next = unsafe { (*current).next };
            bucket.release_block(current, memory_size, page_cache);
            current = next;
        }
    }
}

impl Default for CentralCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl CentralCache {
    /// (free-list length, span count) for one class; test-only peek.
    pub(crate) fn class_state(&self, index: usize) -> (usize, usize) {
        let bucket = self.classes[index].lock();
        (bucket.free_count, bucket.spans.len())
    }
}

impl ClassBucket {
    const fn new() -> Self {
        Self {
            free_head: ptr::null_mut(),
            free_count: 0,
            spans: BTreeMap::new(),
            #[cfg(not(debug_assertions))]
            next_group_count: 0,
        }
    }

    /// Pages to request from the page tier for one refill of this class.
    ///
    /// Strict builds size the run to exactly the span bitmap capacity. Lean
    /// builds start at one watermark-sized group and add a group per miss,
    /// so hot classes amortize their trips to the page tier.
    #[cfg(debug_assertions)]
    fn page_allocate_count(&mut self, memory_size: usize) -> usize {
        round_up(memory_size * MAX_UNIT_COUNT, PAGE_SIZE) / PAGE_SIZE
    }

    #[cfg(not(debug_assertions))]
    fn page_allocate_count(&mut self, _memory_size: usize) -> usize {
        let groups = self.next_group_count.max(1);
        self.next_group_count = groups + 1;
        round_up(groups * BUCKET_WATERMARK, PAGE_SIZE) / PAGE_SIZE
    }

    /// Pull a fresh page-run, carve `block_count` blocks into the returned
    /// chain, and park the rest on the free list.
    fn refill_and_take(
        &mut self,
        memory_size: usize,
        block_count: usize,
        page_cache: &PageCache,
    ) -> Option<*mut FreeObject> {
        let pages = self.page_allocate_count(memory_size);
        let run = page_cache.allocate_page(pages)?;
        let mut span = PageSpan::new(run, memory_size);

        #[cfg(debug_assertions)]
        let unit_total = MAX_UNIT_COUNT;
        #[cfg(not(debug_assertions))]
        let unit_total = run.size() / memory_size;
        debug_assert!(block_count <= unit_total);

        let mut memory = run;
        let mut result: *mut FreeObject = ptr::null_mut();
        for _ in 0..block_count {
            let unit = memory.subspan_len(0, memory_size);
            memory = memory.subspan(memory_size);
            // Handed-out blocks are the only ones the span records; parked
            // leftovers exist solely as free-list members.
            span.allocate(unit);
            let obj = unit.data() as *mut FreeObject;
            unsafe { (*obj).next = result };
            result = obj;
        }
        for _ in 0..unit_total - block_count {
            let unit = memory.subspan_len(0, memory_size);
            memory = memory.subspan(memory_size);
            let obj = unit.data() as *mut FreeObject;
            unsafe { (*obj).next = self.free_head };
            self.free_head = obj;
            self.free_count += 1;
        }

        let previous = self.spans.insert(run.data() as usize, span);
        debug_assert!(previous.is_none());
        Some(result)
    }

    /// Detach `block_count` blocks from the free list as a chain, recording
    /// each with its owning span.
    fn take_from_free_list(&mut self, memory_size: usize, block_count: usize) -> *mut FreeObject {
        debug_assert!(self.free_count >= block_count);
        let mut result: *mut FreeObject = ptr::null_mut();
        for _ in 0..block_count {
            let node = self.free_head;
            debug_assert!(!node.is_null());
            self.free_head = unsafe { (*node).next };
            self.free_count -= 1;
            self.record_allocated(node as *mut u8, memory_size);
            unsafe { (*node).next = result };
            result = node;
        }
        result
    }

    fn record_allocated(&mut self, block: *mut u8, memory_size: usize) {
        let addr = block as usize;
        let (_, span) = self
            .spans
            .range_mut(..=addr)
            .next_back()
            .expect("block outside every span");
        span.allocate(MemorySpan::new(block, memory_size));
    }

    /// Return one block to the free list and its span; reclaim the span's
    /// run if this block was the last one outstanding.
    fn release_block(
        &mut self,
        block: *mut FreeObject,
        memory_size: usize,
        page_cache: &PageCache,
    ) {
        // Push first: during reclaim the block is already on the free list
        // and gets unlinked together with its span-mates.
        unsafe { (*block).next = self.free_head };
        self.free_head = block;
        self.free_count += 1;

        let addr = block as usize;
        let unit = MemorySpan::new(block as *mut u8, memory_size);
        let (span_base, emptied) = {
            let (&base, span) = self
                .spans
                .range_mut(..=addr)
                .next_back()
                .expect("block outside every span");
            debug_assert!(span.is_valid_unit_span(unit));
            span.deallocate(unit);
            (base, span.is_empty().then(|| span.memory_span()))
        };

        if let Some(run) = emptied {
            self.unlink_span_blocks(run);
            self.spans.remove(&span_base);
            #[cfg(not(debug_assertions))]
            {
                self.next_group_count /= 2;
            }
            unsafe { page_cache.deallocate_page(run) };
        }
    }

    /// Strip every free-list block that lives inside `run`.
    fn unlink_span_blocks(&mut self, run: MemorySpan) {
        let start = run.data() as usize;
        let end = start + run.size();
        let mut prev: *mut FreeObject = ptr::null_mut();
        let mut current = self.free_head;
        while !current.is_null() {
            let next = unsafe { (*current).next };
            let addr = current as usize;
            if addr >= start && addr < end {
                if prev.is_null() {
                    self.free_head = next;
                } else {
                    unsafe { (*prev).next = next };
                }
                self.free_count -= 1;
            } else {
                prev = current;
            }
            current = next;
        }
    }
}
