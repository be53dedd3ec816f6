//! Size-class constants and index math.
//!
//! Block sizes are exact multiples of the pointer width, from one pointer up
//! to `MAX_UNIT_SIZE`. Class `i` serves blocks of exactly `(i + 1) * ALIGNMENT`
//! bytes, so the mapping between a request size and its class is pure
//! arithmetic, with no lookup table.

/// Alignment and minimum block size: one pointer width.
pub const ALIGNMENT: usize = size_of::<*mut u8>();

/// Fixed page size used by the page tier.
pub const PAGE_SIZE: usize = 4096;

/// Largest block served by the tiered caches. Anything above this bypasses
/// the thread and central free lists entirely.
pub const MAX_UNIT_SIZE: usize = 16 * 1024;

/// Number of size classes.
pub const NUM_CLASSES: usize = MAX_UNIT_SIZE / ALIGNMENT;

/// Per-thread, per-class byte threshold. When a thread bucket holds more
/// than this many bytes it flushes half of its blocks to the central tier.
pub const BUCKET_WATERMARK: usize = 256 * 1024;

/// Minimum page count requested from the OS in one mapping (8 MiB).
pub const BATCH_PAGES: usize = 2048;

/// Capacity of the strict span bitmap, and therefore the largest batch a
/// single central-cache call may hand out in strict builds.
pub const MAX_UNIT_COUNT: usize = PAGE_SIZE / ALIGNMENT;

/// Round `size` up to a multiple of `alignment` (a power of two).
#[inline]
pub const fn round_up(size: usize, alignment: usize) -> usize {
    (size + alignment - 1) & !(alignment - 1)
}

/// Round `size` up to a multiple of the pointer width.
#[inline]
pub const fn align_up(size: usize) -> usize {
    round_up(size, ALIGNMENT)
}

/// Map an allocation size to its size class index.
///
/// `size` must be non-zero; sizes above `MAX_UNIT_SIZE` have no class and
/// must be routed to the bypass path before calling this.
#[inline]
pub const fn size_to_class(size: usize) -> usize {
    debug_assert!(size > 0);
    align_up(size) / ALIGNMENT - 1
}

/// Exact block size served by a size class.
#[inline]
pub const fn class_to_size(class: usize) -> usize {
    (class + 1) * ALIGNMENT
}
