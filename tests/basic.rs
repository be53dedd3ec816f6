//! Basic integration tests: exercise the pool façade from a single thread.

use rmempool::{allocate, deallocate};

const ALIGNMENT: usize = size_of::<*mut u8>();

#[test]
fn test_zero_size_yields_none() {
    assert!(allocate(0).is_none());
}

#[test]
fn test_pointers_are_aligned() {
    for size in [1, 3, 8, 9, 24, 63, 100, 1000, 4096, 10_000, 16 * 1024] {
        let ptr = allocate(size).unwrap();
        assert_eq!(
            ptr.as_ptr() as usize % ALIGNMENT,
            0,
            "allocate({}) returned a misaligned pointer",
            size
        );
        unsafe { deallocate(ptr.as_ptr(), size) };
    }
}

#[test]
fn test_live_blocks_never_overlap() {
    let sizes = [16usize, 24, 48, 64, 120, 256, 1024];
    let mut live: Vec<(usize, usize)> = Vec::new();
    for round in 0..40 {
        let size = sizes[round % sizes.len()];
        let ptr = allocate(size).unwrap().as_ptr() as usize;
        for &(base, len) in &live {
            assert!(
                ptr + size <= base || base + len <= ptr,
                "block {:#x}+{} overlaps live block {:#x}+{}",
                ptr,
                size,
                base,
                len
            );
        }
        live.push((ptr, size));
    }
    for (base, len) in live {
        unsafe { deallocate(base as *mut u8, len) };
    }
}

#[test]
fn test_payload_survives_until_free() {
    let mut blocks = Vec::new();
    for i in 0..200usize {
        let size = 32 + (i % 8) * 8;
        let ptr = allocate(size).unwrap().as_ptr();
        unsafe { core::ptr::write_bytes(ptr, (i % 251) as u8, size) };
        blocks.push((ptr, size, (i % 251) as u8));
    }
    for (ptr, size, fill) in blocks {
        unsafe {
            let slice = core::slice::from_raw_parts(ptr, size);
            assert!(slice.iter().all(|&b| b == fill), "payload clobbered");
            deallocate(ptr, size);
        }
    }
}

#[test]
fn test_hot_class_round_trip() {
    let first = allocate(24).unwrap();
    unsafe { deallocate(first.as_ptr(), 24) };
    for _ in 0..100_000 {
        let ptr = allocate(24).unwrap();
        unsafe { deallocate(ptr.as_ptr(), 24) };
    }
}

#[test]
fn test_same_class_sizes_interchange() {
    // 17..=24 all land in the 24-byte class; deallocation under any size in
    // the class is accepted.
    let ptr = allocate(17).unwrap();
    unsafe { deallocate(ptr.as_ptr(), 24) };
    let ptr = allocate(24).unwrap();
    unsafe { deallocate(ptr.as_ptr(), 18) };
}

#[test]
fn test_large_bypass_round_trip() {
    let size = 20 * 1024;
    let ptr = allocate(size).unwrap();
    unsafe {
        core::ptr::write_bytes(ptr.as_ptr(), 0xAB, size);
        deallocate(ptr.as_ptr(), size);
    }
    // Repeat to make sure the bypass path is reusable.
    let ptr = allocate(size).unwrap();
    unsafe { deallocate(ptr.as_ptr(), size) };
}

#[test]
fn test_growth_then_reclaim() {
    // Fill several spans worth of one class, then return everything in
    // reverse order; afterwards the class must still serve fresh requests.
    let mut ptrs = Vec::with_capacity(10_000);
    for _ in 0..10_000 {
        ptrs.push(allocate(64).unwrap());
    }
    let distinct: std::collections::BTreeSet<usize> =
        ptrs.iter().map(|p| p.as_ptr() as usize).collect();
    assert_eq!(distinct.len(), ptrs.len());

    for ptr in ptrs.into_iter().rev() {
        unsafe { deallocate(ptr.as_ptr(), 64) };
    }

    let again = allocate(64).unwrap();
    unsafe { deallocate(again.as_ptr(), 64) };
}

#[test]
fn test_mixed_size_churn() {
    let mut live: Vec<(*mut u8, usize)> = Vec::new();
    for i in 0..5_000usize {
        let size = 8 + (i * 13) % 2048;
        let ptr = allocate(size).unwrap().as_ptr();
        live.push((ptr, size));
        if live.len() > 64 {
            let (old, old_size) = live.remove(i % 32);
            unsafe { deallocate(old, old_size) };
        }
    }
    for (ptr, size) in live {
        unsafe { deallocate(ptr, size) };
    }
}
