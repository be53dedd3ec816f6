//! rmempool: a three-tier memory pool allocator.
//!
//! Allocation flows through three tiers:
//! - Thread caches (fast path, no locks)
//! - Central cache (per-size-class spinlocks, span accounting)
//! - Page cache (OS mappings, page-run coalescing)
//!
//! Callers provide the block size on both sides; there is no per-allocation
//! header. Blocks up to 16 KiB are served from segregated free lists,
//! anything larger bypasses the tiers.
//!
//! # Usage
//!
//! ```
//! let ptr = rmempool::allocate(64).expect("out of memory");
//! unsafe { rmempool::deallocate(ptr.as_ptr(), 64) };
//! ```

pub mod size_class;
pub mod platform;
pub mod sync;
pub mod span;
pub mod page_cache;
pub mod central_cache;
pub mod thread_cache;
pub mod allocator;

// Re-export the façade at crate root for convenience
pub use allocator::{allocate, deallocate};
