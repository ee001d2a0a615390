// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Contains types and functionality to represent physical and virtual
//! memory, plus the kernel's page tables.
//!
//! This crate provides the core types for representing physical and
//! virtual memory:
//!
//! - [`PhysAddr`]: An address in the 52-bit physical address space.
//! - [`VirtAddr`]: A canonical address in the 48-bit virtual address space.
//!
//! The [`KernelPageMap`] manages the kernel's four-level page map. All
//! of its page tables live in one statically placed pool, starting at
//! [`PAGE_TABLE_POOL_START`](constants::PAGE_TABLE_POOL_START), which the
//! init routine fully populates for the kernel's 2 GiB virtual window.
//! The pool is addressed through a fixed virtual base, so translating a
//! table's physical address to a usable pointer is a constant offset.
//! In the kernel that offset is zero (the pool lies inside the early
//! identity-mapped window); tests supply a host buffer instead.
//!
//! The [`PageMapper`] trait abstracts page mapping for the allocator
//! crates, so they can be exercised against a recording fake.

#![no_std]
#![deny(clippy::inline_asm_x86_att_syntax)]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]

pub mod constants;
mod addr;
mod page_table;

pub use addr::{InvalidPhysAddr, InvalidVirtAddr, PhysAddr, VirtAddr};
pub use page_table::{
    KernelPageMap, MappingChange, PageTableEntry, PageTableFlags, pool_pages_for_window,
};

use constants::PAGE_SIZE;

/// A trait for types that can install and remove page mappings.
///
/// The allocator crates use this seam so their logic can be tested
/// against a recording fake, while the kernel wires in the real
/// [`KernelPageMap`].
///
pub trait PageMapper {
    /// Maps `pages` consecutive pages starting at `virt` to the
    /// physical frames starting at `phys`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that the physical frames are unused and
    /// that the virtual range does not alias memory in use.
    ///
    unsafe fn map_pages(&mut self, virt: VirtAddr, phys: PhysAddr, pages: usize, flags: PageTableFlags);

    /// Removes the mappings for `pages` consecutive pages starting at
    /// `virt`, flushing the TLB for each.
    ///
    /// # Safety
    ///
    /// The caller must ensure that the virtual range is no longer in
    /// use.
    ///
    unsafe fn unmap_pages(&mut self, virt: VirtAddr, pages: usize);
}

impl PageMapper for KernelPageMap {
    unsafe fn map_pages(&mut self, virt: VirtAddr, phys: PhysAddr, pages: usize, flags: PageTableFlags) {
        KernelPageMap::map_pages(self, virt, phys, pages, flags);
    }

    unsafe fn unmap_pages(&mut self, virt: VirtAddr, pages: usize) {
        for i in 0..pages {
            if let Some(change) = self.unmap(VirtAddr::new(virt.as_usize() + i * PAGE_SIZE)) {
                change.flush();
            }
        }
    }
}
