//! Thread Cache (front-end): per-thread free lists for lock-free allocation.
//!
//! Each thread gets its own `ThreadCache`. The fast path (bucket hit)
//! requires zero synchronization. On a miss the cache pulls an adaptively
//! sized batch from the central tier; when a bucket's byte count crosses the
//! watermark it flushes half of its blocks back. Batch sizes double on every
//! miss and halve on every flush, so hot classes settle at large batches and
//! cooling classes shed their working set.

use crate::central_cache::CentralCache;
use crate::page_cache::PageCache;
use crate::size_class::{
    align_up, class_to_size, size_to_class, BUCKET_WATERMARK, MAX_UNIT_SIZE, NUM_CLASSES,
};
#[cfg(debug_assertions)]
use crate::size_class::MAX_UNIT_COUNT;
use crate::span::{chain_length, FreeObject};
use core::ptr::{self, NonNull};

/// Smallest batch ever requested from the central tier.
const MIN_BATCH: usize = 4;

/// Per-class free list owned by one thread.
struct Bucket {
    /// Head of the singly-linked embedded free list.
    head: *mut FreeObject,
    /// Number of blocks currently on this list.
    len: usize,
    /// Adaptive hint: how many blocks to request on the next miss.
    next_batch: usize,
}

impl Bucket {
    const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            len: 0,
            next_batch: 0,
        }
    }

    #[inline]
    fn pop(&mut self) -> *mut FreeObject {
        let obj = self.head;
        if !obj.is_null() {
            self.head = unsafe { (*obj).next };
            self.len -= 1;
        }
        obj
    }

    #[inline]
    fn push(&mut self, obj: *mut FreeObject) {
        unsafe { (*obj).next = self.head };
        self.head = obj;
        self.len += 1;
    }
}

/// Per-thread cache holding one bucket per size class. Lives and dies with
/// its owning thread; dropping it flushes every bucket to the central tier.
pub struct ThreadCache<'a> {
    buckets: [Bucket; NUM_CLASSES],
    central: &'a CentralCache,
    pages: &'a PageCache,
}

impl<'a> ThreadCache<'a> {
    pub const fn new(central: &'a CentralCache, pages: &'a PageCache) -> Self {
        Self {
            buckets: [const { Bucket::new() }; NUM_CLASSES],
            central,
            pages,
        }
    }

    /// Allocate a block of at least `memory_size` bytes.
    ///
    /// Returns `None` for a zero size or when memory cannot be obtained.
    /// The returned pointer is aligned to the pointer width.
    #[inline]
    pub fn allocate(&mut self, memory_size: usize) -> Option<NonNull<u8>> {
        if memory_size == 0 {
            return None;
        }
        let memory_size = align_up(memory_size);
        if memory_size > MAX_UNIT_SIZE {
            // Large blocks never touch the buckets.
            return self.central.allocate(memory_size, 1, self.pages);
        }

        let index = size_to_class(memory_size);
        let obj = self.buckets[index].pop();
        if !obj.is_null() {
            return NonNull::new(obj as *mut u8);
        }
        self.refill(memory_size, index)
    }

    /// Return a block obtained from [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this same allocator stack with a
    /// size in the same class as `memory_size`, and must not already have
    /// been returned. Null `ptr` or zero size is a silent no-op.
    pub unsafe fn deallocate(&mut self, ptr: *mut u8, memory_size: usize) {
        if ptr.is_null() || memory_size == 0 {
            return;
        }
        let memory_size = align_up(memory_size);
        if memory_size > MAX_UNIT_SIZE {
            unsafe {
                self.central
                    .deallocate(NonNull::new_unchecked(ptr), memory_size, self.pages)
            };
            return;
        }

        let index = size_to_class(memory_size);
        self.buckets[index].push(ptr as *mut FreeObject);

        if self.buckets[index].len * memory_size > BUCKET_WATERMARK {
            self.flush_half(memory_size, index);
        }
    }

    /// Miss path: pull a batch from the central tier, keep the head for the
    /// caller, splice the rest onto the bucket.
    #[cold]
    fn refill(&mut self, memory_size: usize, index: usize) -> Option<NonNull<u8>> {
        let batch = self.compute_batch(memory_size, index);
        let head = self.central.allocate(memory_size, batch, self.pages)?;
        let head = head.as_ptr() as *mut FreeObject;
        debug_assert_eq!(chain_length(head), batch);

        if batch > 1 {
            let bucket = &mut self.buckets[index];
            let rest = unsafe { (*head).next };
            let mut tail = rest;
            unsafe {
                while !(*tail).next.is_null() {
                    tail = (*tail).next;
                }
                (*tail).next = bucket.head;
            }
            bucket.head = rest;
            bucket.len += batch - 1;
        }
        NonNull::new(head as *mut u8)
    }

    /// Unlink the first half of the bucket and hand it to the central tier,
    /// then halve the batch hint for this class.
    fn flush_half(&mut self, memory_size: usize, index: usize) {
        let bucket = &mut self.buckets[index];
        let flush_count = bucket.len / 2;
        if flush_count == 0 {
            return;
        }

        let flush_head = bucket.head;
        let mut tail = flush_head;
        for _ in 0..flush_count - 1 {
            let next = unsafe { (*tail).next };
            if next.is_null() {
                // The list is shorter than its recorded length. Abort the
                // flush: the count stays wrong but no memory is corrupted.
                debug_assert!(false, "bucket free list shorter than its length");
                return;
            }
            tail = next;
        }
        unsafe {
            bucket.head = (*tail).next;
            (*tail).next = ptr::null_mut();
        }
        bucket.len -= flush_count;
        bucket.next_batch /= 2;
        debug_assert_eq!(chain_length(bucket.head), bucket.len);
        debug_assert_eq!(chain_length(flush_head), flush_count);

        unsafe {
            self.central.deallocate(
                NonNull::new_unchecked(flush_head as *mut u8),
                memory_size,
                self.pages,
            );
        }
    }

    /// Batch to request on this miss, doubling the stored hint for the next
    /// one. The hint is clamped so a freshly refilled bucket sits at half
    /// the watermark at most, and (in strict builds) never exceeds the span
    /// bitmap capacity.
    fn compute_batch(&mut self, memory_size: usize, index: usize) -> usize {
        let bucket = &mut self.buckets[index];
        let result = bucket.next_batch.max(MIN_BATCH);

        let mut next_batch = result * 2;
        #[cfg(debug_assertions)]
        {
            next_batch = next_batch.min(MAX_UNIT_COUNT);
        }
        next_batch = next_batch.min(BUCKET_WATERMARK / memory_size / 2);
        bucket.next_batch = next_batch;
        result
    }
}

impl Drop for ThreadCache<'_> {
    fn drop(&mut self) {
        for index in 0..NUM_CLASSES {
            let head = {
                let bucket = &mut self.buckets[index];
                let head = bucket.head;
                bucket.head = ptr::null_mut();
                bucket.len = 0;
                head
            };
            if let Some(head) = NonNull::new(head as *mut u8) {
                unsafe {
                    self.central
                        .deallocate(head, class_to_size(index), self.pages)
                };
            }
        }
    }
}
