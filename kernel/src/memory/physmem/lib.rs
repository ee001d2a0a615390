// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Physical memory management and allocation.
//!
//! The [`FrameAllocator`] trait is the seam between the physical memory
//! manager and its callers: implementations hand out contiguous runs of
//! physical page frames and take them back. Two implementations exist,
//! chosen statically at the site that constructs the memory subsystem:
//!
//! 1. [`BitmapAllocator`], a byte-per-page occupancy map with first-fit
//!    scans. Its storage is carved out of the managed window itself:
//!    the constructor reserves enough leading pages to hold one byte
//!    per page, maps them at a caller-chosen virtual address, and
//!    manages the remainder of the window. It therefore needs no heap
//!    and can run before one exists, which is why it is the boot-time
//!    allocator.
//! 2. [`BuddyAllocator`], a binary-tree buddy system with logarithmic
//!    split and merge. Its bookkeeping lives on the kernel heap, so it
//!    only fits once the heap is up.
//!
//! Misuse is fatal by contract: allocation with no free run left,
//! freeing outside the window, and double freeing all panic. Callers
//! own recovery for "disk full"-style conditions at a higher level;
//! physical memory exhaustion is not a recoverable state in this
//! kernel.

#![no_std]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]

extern crate alloc;

mod bitmap;
mod buddy;

pub use crate::bitmap::BitmapAllocator;
pub use crate::buddy::BuddyAllocator;

use memory::PhysAddr;

/// A trait for types that hand out contiguous runs of physical page
/// frames.
///
pub trait FrameAllocator {
    /// Returns the physical address of the first of `pages` contiguous,
    /// newly allocated page frames.
    ///
    /// # Panics
    ///
    /// `allocate` panics if no run of `pages` consecutive free frames
    /// exists.
    ///
    fn allocate(&mut self, pages: usize) -> PhysAddr;

    /// Returns `pages` frames starting at `base` to the allocator.
    ///
    /// # Panics
    ///
    /// `free` panics if `base` is not page-aligned, if any page of the
    /// run falls outside the managed window, or if any page is already
    /// free.
    ///
    /// # Safety
    ///
    /// The caller must ensure the freed frames are no longer in use.
    ///
    unsafe fn free(&mut self, base: PhysAddr, pages: usize);

    /// Returns the physical address of the first allocatable frame.
    ///
    fn mem_base(&self) -> PhysAddr;

    /// Returns the number of allocatable frames in the window.
    ///
    fn num_pages(&self) -> usize;

    /// Returns the number of leading pages the allocator reserved from
    /// its window for its own bookkeeping.
    ///
    fn bookkeeping_pages(&self) -> usize;
}
