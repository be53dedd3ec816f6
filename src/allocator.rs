//! Façade: process-wide tier wiring and the two public entry points.
//!
//! The central and page tiers are process-lifetime statics; every thread
//! gets its own `ThreadCache` through `thread_local!`. The entry points do
//! nothing but route to the calling thread's cache, falling back to the
//! central tier directly when thread-local storage is not available (during
//! thread startup or teardown).

use crate::central_cache::CentralCache;
use crate::page_cache::PageCache;
use crate::size_class::align_up;
use crate::thread_cache::ThreadCache;
use core::ptr::NonNull;
use std::cell::UnsafeCell;

static PAGE_CACHE: PageCache = PageCache::new();
static CENTRAL_CACHE: CentralCache = CentralCache::new();

thread_local! {
    static THREAD_CACHE: UnsafeCell<ThreadCache<'static>> =
        UnsafeCell::new(ThreadCache::new(&CENTRAL_CACHE, &PAGE_CACHE));
}

/// Run `f` against this thread's cache. Returns `None` if TLS is gone
/// (thread teardown) or not yet usable.
#[inline]
fn with_thread_cache<R>(f: impl FnOnce(&mut ThreadCache<'static>) -> R) -> Option<R> {
    THREAD_CACHE
        .try_with(|cell| {
            // SAFETY: the cell is thread-local and nothing on the allocation
            // paths re-enters it on the same thread.
            unsafe { f(&mut *cell.get()) }
        })
        .ok()
}

/// Allocate a block of at least `memory_size` bytes.
///
/// Returns `None` for a zero size or when the OS is out of memory. The
/// pointer is aligned to the pointer width; the block's contents are
/// unspecified.
pub fn allocate(memory_size: usize) -> Option<NonNull<u8>> {
    if let Some(result) = with_thread_cache(|tc| tc.allocate(memory_size)) {
        return result;
    }
    // TLS unavailable: one block straight from the central tier.
    if memory_size == 0 {
        return None;
    }
    CENTRAL_CACHE.allocate(align_up(memory_size), 1, &PAGE_CACHE)
}

/// Return a block to the pool.
///
/// # Safety
///
/// `ptr` must be a value previously returned by [`allocate`] that has not
/// been returned since, and `memory_size` must round to the same size class
/// as the size it was allocated with. Null `ptr` or zero size is a silent
/// no-op.
pub unsafe fn deallocate(ptr: *mut u8, memory_size: usize) {
    if ptr.is_null() || memory_size == 0 {
        return;
    }
    if with_thread_cache(|tc| unsafe { tc.deallocate(ptr, memory_size) }).is_some() {
        return;
    }
    // TLS unavailable: hand the block to the central tier directly.
    unsafe {
        CENTRAL_CACHE.deallocate(
            NonNull::new_unchecked(ptr),
            align_up(memory_size),
            &PAGE_CACHE,
        );
    }
}
