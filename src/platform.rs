//! OS interface: anonymous memory mappings.
//!
//! The page tier sees the OS as two operations: map `n` bytes of
//! zero-initialized read/write memory, and unmap such a region. Anonymous
//! private mappings give both page alignment and zero fill for free.

use core::ptr::{self, NonNull};

/// Map `bytes` of anonymous read/write memory. Returns `None` if the OS
/// refuses. The returned region is page-aligned and zero-initialized.
pub fn map(bytes: usize) -> Option<NonNull<u8>> {
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            bytes,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        None
    } else {
        NonNull::new(ptr as *mut u8)
    }
}

/// Unmap a region previously returned by [`map`].
///
/// # Safety
///
/// `ptr` and `bytes` must describe exactly one region obtained from [`map`],
/// and no live allocation may point into it.
pub unsafe fn unmap(ptr: *mut u8, bytes: usize) {
    unsafe { libc::munmap(ptr.cast(), bytes) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size_class::PAGE_SIZE;

    #[test]
    fn test_map_is_zeroed_and_aligned() {
        let ptr = map(4 * PAGE_SIZE).expect("mmap failed");
        assert_eq!(ptr.as_ptr() as usize % PAGE_SIZE, 0);
        unsafe {
            let slice = core::slice::from_raw_parts(ptr.as_ptr(), 4 * PAGE_SIZE);
            assert!(slice.iter().all(|&b| b == 0));
            unmap(ptr.as_ptr(), 4 * PAGE_SIZE);
        }
    }
}
