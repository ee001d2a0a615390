// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Virtual memory management and allocation, plus the kernel heap.
//!
//! The [`VirtualAllocator`] hands out contiguous virtual pages backed
//! by physical frames. Its defining invariant is that the virtual
//! address it returns is always
//!
//! ```text
//! kernel_virtual_start + (physical_address - physical_window_base)
//! ```
//!
//! so translating any pointer it produced back to physical memory is a
//! constant subtraction, and the page tables mirror exactly that
//! layout. `kernel_virtual_start` sits directly after the physical
//! allocator's bookkeeping window.
//!
//! The [`heap`] module builds the kernel's general-purpose allocator on
//! top: small requests go to chunked arenas, page-sized and larger
//! requests are backed by whole pages from the virtual allocator.
//!
//! [`init`] wires the kernel's singleton together from the physical
//! window discovered at boot and the kernel page map; [`valloc`] and
//! [`vfree`] operate on that singleton.

#![no_std]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]

pub mod heap;

use memory::constants::{PAGE_SIZE, PHYSICAL_ALLOCATOR_VIRTUAL_START};
use memory::{KernelPageMap, PageMapper, PageTableFlags, PhysAddr, VirtAddr};
use physmem::{BitmapAllocator, FrameAllocator};
use spin::Mutex;

/// Hands out contiguous virtual pages backed by physical frames.
///
pub struct VirtualAllocator<A: FrameAllocator, M: PageMapper> {
    physical: A,
    mapper: M,

    // kernel_virtual_start is the virtual address corresponding to the
    // first allocatable physical frame.
    //
    kernel_virtual_start: VirtAddr,
}

impl<A: FrameAllocator, M: PageMapper> VirtualAllocator<A, M> {
    /// Creates a virtual allocator over the given physical allocator
    /// and page mapper.
    ///
    /// The virtual window starts where the physical allocator's
    /// bookkeeping mapping ends.
    ///
    pub fn new(physical: A, mapper: M) -> Self {
        let kernel_virtual_start =
            PHYSICAL_ALLOCATOR_VIRTUAL_START + physical.bookkeeping_pages() * PAGE_SIZE;

        VirtualAllocator {
            physical,
            mapper,
            kernel_virtual_start,
        }
    }

    /// Returns the virtual address corresponding to the first
    /// allocatable physical frame.
    ///
    pub fn kernel_virtual_start(&self) -> VirtAddr {
        self.kernel_virtual_start
    }

    /// Allocates `pages` contiguous virtual pages, backed by physical
    /// frames, and maps them writable.
    ///
    /// # Panics
    ///
    /// `valloc` panics if the physical allocator is exhausted.
    ///
    pub fn valloc(&mut self, pages: usize) -> VirtAddr {
        let phys = self.physical.allocate(pages);
        let virt = self.kernel_virtual_start + (phys - self.physical.mem_base());

        unsafe {
            self.mapper.map_pages(
                virt,
                phys,
                pages,
                PageTableFlags::PRESENT | PageTableFlags::WRITE,
            );
        }

        virt
    }

    /// Unmaps `pages` pages starting at `virt` and returns their
    /// frames to the physical allocator.
    ///
    /// # Safety
    ///
    /// `virt` must be the start of an allocation made by
    /// [`valloc`](Self::valloc) spanning exactly `pages` pages, and the
    /// memory must no longer be in use.
    ///
    pub unsafe fn vfree(&mut self, virt: VirtAddr, pages: usize) {
        let phys = self.physical.mem_base() + (virt - self.kernel_virtual_start);

        self.mapper.unmap_pages(virt, pages);
        self.physical.free(phys, pages);
    }

    /// Returns a reference to the underlying physical allocator.
    ///
    pub fn physical(&self) -> &A {
        &self.physical
    }
}

/// The kernel's virtual allocator.
///
/// Initialised once by [`init`]; [`valloc`] and [`vfree`] operate on
/// it.
///
static VIRTUAL_ALLOCATOR: Mutex<Option<VirtualAllocator<BitmapAllocator, KernelPageMap>>> =
    Mutex::new(None);

/// Sets up the kernel's virtual allocator over the physical window
/// `[mem_base, mem_base + mem_size)`.
///
/// The physical allocator's bookkeeping pages are mapped at
/// [`PHYSICAL_ALLOCATOR_VIRTUAL_START`], and the allocator takes
/// ownership of the kernel page map for all further mapping.
///
/// # Safety
///
/// The caller must guarantee sole ownership of the physical window,
/// that `page_map` is the active page map, and that `init` is called
/// exactly once.
///
pub unsafe fn init(mem_base: PhysAddr, mem_size: usize, mut page_map: KernelPageMap) {
    let physical = BitmapAllocator::new(
        mem_base,
        mem_size,
        PHYSICAL_ALLOCATOR_VIRTUAL_START,
        &mut page_map,
    );

    let allocator = VirtualAllocator::new(physical, page_map);
    *VIRTUAL_ALLOCATOR.lock() = Some(allocator);
}

/// Allocates `pages` contiguous virtual pages from the kernel's
/// virtual allocator.
///
/// # Panics
///
/// `valloc` panics if [`init`] has not run, or on physical memory
/// exhaustion.
///
pub fn valloc(pages: usize) -> VirtAddr {
    let mut allocator = VIRTUAL_ALLOCATOR.lock();
    allocator
        .as_mut()
        .expect("virtual allocator not initialised")
        .valloc(pages)
}

/// Returns `pages` pages starting at `virt` to the kernel's virtual
/// allocator.
///
/// # Safety
///
/// As for [`VirtualAllocator::vfree`].
///
pub unsafe fn vfree(virt: VirtAddr, pages: usize) {
    let mut allocator = VIRTUAL_ALLOCATOR.lock();
    allocator
        .as_mut()
        .expect("virtual allocator not initialised")
        .vfree(virt, pages);
}

/// Prints debug information about the physical memory manager.
///
pub fn debug() {
    let allocator = VIRTUAL_ALLOCATOR.lock();
    if let Some(allocator) = allocator.as_ref() {
        allocator.physical().debug();
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use std::boxed::Box;
    use std::vec;
    use std::vec::Vec;

    // Records mapping calls so the tests can check what the allocator
    // asked for, without touching real page tables.
    //
    struct FakeMapper {
        mapped: Vec<(usize, usize, usize)>,
        unmapped: Vec<(usize, usize)>,
    }

    impl FakeMapper {
        fn new() -> Self {
            FakeMapper {
                mapped: Vec::new(),
                unmapped: Vec::new(),
            }
        }
    }

    impl PageMapper for FakeMapper {
        unsafe fn map_pages(
            &mut self,
            virt: VirtAddr,
            phys: PhysAddr,
            pages: usize,
            _flags: PageTableFlags,
        ) {
            self.mapped.push((virt.as_usize(), phys.as_usize(), pages));
        }

        unsafe fn unmap_pages(&mut self, virt: VirtAddr, pages: usize) {
            self.unmapped.push((virt.as_usize(), pages));
        }
    }

    fn new_allocator() -> VirtualAllocator<BitmapAllocator, FakeMapper> {
        let storage = Box::leak(vec![0u8; 32].into_boxed_slice());
        let physical = BitmapAllocator::with_storage(PhysAddr::new(16 << 20), storage);
        VirtualAllocator::new(physical, FakeMapper::new())
    }

    #[test]
    fn test_valloc_offset_invariant() {
        let mut alloc = new_allocator();
        let kvs = alloc.kernel_virtual_start();
        let base = alloc.physical().mem_base();

        // With no bookkeeping reservation, the virtual window starts
        // at the allocator-structures window.
        assert_eq!(kvs, PHYSICAL_ALLOCATOR_VIRTUAL_START);

        let a = alloc.valloc(1);
        let b = alloc.valloc(2);
        assert_eq!(a, kvs);
        assert_eq!(b, kvs + PAGE_SIZE);

        // Each allocation was mapped at the constant offset from its
        // physical frames.
        assert_eq!(
            alloc.mapper.mapped,
            vec![
                (kvs.as_usize(), base.as_usize(), 1),
                (kvs.as_usize() + PAGE_SIZE, base.as_usize() + PAGE_SIZE, 2),
            ]
        );
    }

    #[test]
    fn test_vfree_returns_frames() {
        let mut alloc = new_allocator();
        let kvs = alloc.kernel_virtual_start();

        let a = alloc.valloc(1);
        let b = alloc.valloc(2);
        assert_eq!(b, kvs + PAGE_SIZE);

        unsafe { alloc.vfree(a, 1) };
        assert_eq!(alloc.mapper.unmapped, vec![(kvs.as_usize(), 1)]);

        // The freed page is handed out again, at the same virtual
        // address.
        let c = alloc.valloc(1);
        assert_eq!(c, a);

        unsafe { alloc.vfree(b, 2) };
        unsafe { alloc.vfree(c, 1) };
        assert_eq!(alloc.physical().allocated_pages(), 0);
    }

    #[test]
    fn test_kernel_virtual_start_skips_bookkeeping() {
        // A fake physical allocator that reports a bookkeeping
        // reservation: the virtual window must start past it.
        struct FixedAllocator;

        impl FrameAllocator for FixedAllocator {
            fn allocate(&mut self, _pages: usize) -> PhysAddr {
                PhysAddr::new(0x100_0000)
            }
            unsafe fn free(&mut self, _base: PhysAddr, _pages: usize) {}
            fn mem_base(&self) -> PhysAddr {
                PhysAddr::new(0x100_0000)
            }
            fn num_pages(&self) -> usize {
                1
            }
            fn bookkeeping_pages(&self) -> usize {
                3
            }
        }

        let alloc = VirtualAllocator::new(FixedAllocator, FakeMapper::new());
        assert_eq!(
            alloc.kernel_virtual_start(),
            PHYSICAL_ALLOCATOR_VIRTUAL_START + 3 * PAGE_SIZE
        );
    }
}
