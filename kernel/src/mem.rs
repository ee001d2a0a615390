// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Brings up the kernel's memory hierarchy.
//!
//! The order matters: the page-table pool is built and activated
//! first (replacing the bootstrap tables), then the frame and virtual
//! allocators take over the physical window discovered at boot. The
//! heap is registered by the crate root once this completes.

use memory::constants::{KERNEL_VIRTUAL_SIZE, PAGE_TABLE_POOL_START};
use memory::{KernelPageMap, PhysAddr, VirtAddr};

/// Builds the kernel page map, loads it, and hands it to the virtual
/// allocator together with the physical window.
///
/// # Safety
///
/// Must be called exactly once, before anything allocates, with a
/// window the kernel has sole ownership of.
///
pub unsafe fn init(window_base: PhysAddr, window_size: usize) {
    // The pool sits in the early identity-mapped window, so its
    // virtual base equals its physical base.
    let mut page_map = KernelPageMap::new(
        PAGE_TABLE_POOL_START,
        VirtAddr::new(PAGE_TABLE_POOL_START.as_usize()),
        KERNEL_VIRTUAL_SIZE,
    );

    page_map.init();
    page_map.activate();

    virtmem::init(window_base, window_size, page_map);
}

/// Prints debug information about the memory subsystems.
///
pub fn debug() {
    virtmem::debug();
}
