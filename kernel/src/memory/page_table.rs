// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The kernel's four-level page map.
//!
//! All page tables live in one contiguous pool of physical frames,
//! fully laid out at construction time: one PML4, then every PDPT, PD
//! and PT needed to cover the kernel's virtual window. [`KernelPageMap::init`]
//! populates every internal entry up front, so mapping a page never
//! allocates; it only ever writes a leaf PT entry.

use crate::addr::{PhysAddr, VirtAddr};
use crate::constants::{IDENTITY_MAPPED_EARLY, PAGE_SIZE};
use bitflags::bitflags;

bitflags! {
    /// The flags in a page table entry.
    ///
    pub struct PageTableFlags: u64 {
        /// The referenced page table or frame is mapped and usable.
        const PRESENT = 1 << 0;

        /// The referenced memory is writable.
        const WRITE = 1 << 1;

        /// Accesses from ring 3 are allowed.
        const USER = 1 << 2;

        /// The caching behaviour for this memory is write-through.
        const WRITE_THROUGH = 1 << 3;

        /// The memory should not be cached.
        const CACHE_DISABLED = 1 << 4;

        /// The referenced memory has been read since this bit was
        /// last cleared.
        const ACCESSED = 1 << 5;
    }
}

// A frame address stored in a page table entry occupies bits 12 to 51.
// This mask recovers it, dropping the flag bits and the reserved high
// bits.
//
const ADDR_MASK: u64 = 0x000f_ffff_ffff_f000;

/// Represents a single entry in a page table.
///
#[derive(Clone, Copy, PartialEq)]
#[repr(transparent)]
pub struct PageTableEntry {
    entry: u64,
}

impl PageTableEntry {
    /// Returns a new, empty page table entry.
    ///
    #[inline]
    pub const fn new() -> Self {
        PageTableEntry { entry: 0 }
    }

    /// Clears this entry.
    ///
    #[inline]
    pub fn zero(&mut self) {
        self.entry = 0;
    }

    /// Returns whether the entry is marked as present.
    ///
    #[inline]
    pub const fn is_present(&self) -> bool {
        self.entry & PageTableFlags::PRESENT.bits() != 0
    }

    /// Returns the flags for this entry.
    ///
    #[inline]
    pub const fn flags(&self) -> PageTableFlags {
        PageTableFlags::from_bits_truncate(self.entry)
    }

    /// Returns the physical frame address in this entry. Reading the
    /// frame address always masks off the low 12 flag bits.
    ///
    #[inline]
    pub fn addr(&self) -> PhysAddr {
        PhysAddr::new((self.entry & ADDR_MASK) as usize)
    }

    /// Sets the entry to the given frame address and flags.
    ///
    /// # Panics
    ///
    /// `set` will panic if `addr` is not frame-aligned.
    ///
    #[inline]
    pub fn set(&mut self, addr: PhysAddr, flags: PageTableFlags) {
        assert!(addr.is_page_aligned(), "unaligned frame address {:p}", addr);
        self.entry = addr.as_usize() as u64 | flags.bits();
    }

    /// Returns the raw 64-bit value of the entry.
    ///
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.entry
    }
}

/// The number of entries in a page table.
///
const NUM_ENTRIES: usize = 512;

/// The mask for indices into a page table.
///
const ENTRY_MASK: usize = NUM_ENTRIES - 1;

/// Returns the index into the level 4 page table for the
/// given virtual address.
///
const fn level4_index(addr: VirtAddr) -> usize {
    (addr.as_usize() >> 39) & ENTRY_MASK
}

/// Returns the index into the level 3 page table for the
/// given virtual address.
///
const fn level3_index(addr: VirtAddr) -> usize {
    (addr.as_usize() >> 30) & ENTRY_MASK
}

/// Returns the index into the level 2 page table for the
/// given virtual address.
///
const fn level2_index(addr: VirtAddr) -> usize {
    (addr.as_usize() >> 21) & ENTRY_MASK
}

/// Returns the index into the level 1 page table for the
/// given virtual address.
///
const fn level1_index(addr: VirtAddr) -> usize {
    (addr.as_usize() >> 12) & ENTRY_MASK
}

/// Returns the number of entries needed to map `mem` bytes when each
/// entry spans `entry_size` bytes. Always at least one.
///
const fn entries(mem: usize, entry_size: usize) -> usize {
    let n = mem / entry_size + if mem % entry_size == 0 { 0 } else { 1 };
    if n == 0 {
        1
    } else {
        n
    }
}

/// The physical memory spanned by one PML4 entry.
///
const PML4E_SPAN: usize = 512 << 30;

/// The physical memory spanned by one PDPT entry.
///
const PDPTE_SPAN: usize = 1 << 30;

/// The physical memory spanned by one PD entry.
///
const PDE_SPAN: usize = 2 << 20;

/// Returns the number of pool pages needed to hold every page table
/// covering a virtual window of `window` bytes: the PML4, the PDPTs,
/// the PDs and the PTs.
///
pub const fn pool_pages_for_window(window: usize) -> usize {
    1 + entries(window, PML4E_SPAN) + entries(window, PDPTE_SPAN) + entries(window, PDE_SPAN)
}

// The kernel's pool (2 GiB window at 2 MiB) must fit below the early
// identity-mapped window.
const _: () = assert!(
    (crate::constants::PAGE_TABLE_POOL_START.as_usize()
        + pool_pages_for_window(crate::constants::KERNEL_VIRTUAL_SIZE) * PAGE_SIZE)
        < IDENTITY_MAPPED_EARLY
);

/// Describes a page mapping that has been changed. This must either be
/// flushed from the TLB, or ignored explicitly.
///
#[derive(Debug)]
#[must_use = "Page mapping changes must either flush the TLB or be ignored explicitly."]
pub struct MappingChange(VirtAddr);

impl MappingChange {
    fn new(addr: VirtAddr) -> Self {
        MappingChange(addr)
    }

    /// Flush the relevant portion of the TLB for this page mapping.
    ///
    #[inline]
    pub fn flush(self) {
        x86_64::instructions::tlb::flush(self.0.as_x86_64());
    }

    /// Ignore the page mapping change.
    ///
    /// This is correct for entries that transition from absent to
    /// present, which the TLB does not cache.
    ///
    #[inline]
    pub fn ignore(self) {}
}

/// The kernel's four-level page map, backed by a fixed pool of page
/// tables.
///
/// The pool lives at `pool_phys_base` and is addressed through
/// `pool_virt_base`, so a table at physical address `p` is read and
/// written at `pool_virt_base + (p - pool_phys_base)`. In the kernel,
/// the pool lies inside the early identity-mapped window and the two
/// bases are numerically equal.
///
pub struct KernelPageMap {
    pool_phys_base: PhysAddr,
    pool_virt_base: VirtAddr,
    window: usize,
}

impl KernelPageMap {
    /// Creates a view over a page-table pool at `pool_phys_base`,
    /// addressable at `pool_virt_base`, covering a virtual window of
    /// `window` bytes.
    ///
    /// The pool's contents are undefined until [`init`](Self::init)
    /// runs.
    ///
    /// # Panics
    ///
    /// `new` will panic if either base is not page-aligned.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `pool_pages_for_window(window)`
    /// pages at `pool_virt_base` are addressable and unused.
    ///
    pub unsafe fn new(pool_phys_base: PhysAddr, pool_virt_base: VirtAddr, window: usize) -> Self {
        assert!(pool_phys_base.is_page_aligned());
        assert!(pool_virt_base.is_page_aligned());

        KernelPageMap {
            pool_phys_base,
            pool_virt_base,
            window,
        }
    }

    /// Returns the physical address of the PML4, suitable for loading
    /// into CR3.
    ///
    pub fn pml4_addr(&self) -> PhysAddr {
        self.pool_phys_base
    }

    /// Returns a pointer to the table at the given physical address,
    /// via the pool's virtual base.
    ///
    fn table_ptr(&self, phys: PhysAddr) -> *mut PageTableEntry {
        let offset = phys - self.pool_phys_base;
        (self.pool_virt_base.as_usize() + offset) as *mut PageTableEntry
    }

    /// Returns the physical address of the `i`th PDPT in the pool.
    ///
    fn pdpt_addr(&self, i: usize) -> PhysAddr {
        self.pool_phys_base + (1 + i) * PAGE_SIZE
    }

    /// Returns the physical address of the `i`th PD in the pool.
    ///
    fn pd_addr(&self, i: usize) -> PhysAddr {
        self.pool_phys_base + (1 + entries(self.window, PML4E_SPAN) + i) * PAGE_SIZE
    }

    /// Returns the physical address of the `i`th PT in the pool.
    ///
    fn pt_addr(&self, i: usize) -> PhysAddr {
        let pdpts = entries(self.window, PML4E_SPAN);
        let pds = entries(self.window, PDPTE_SPAN);
        self.pool_phys_base + (1 + pdpts + pds + i) * PAGE_SIZE
    }

    fn zero_table(&mut self, phys: PhysAddr) {
        let table = self.table_ptr(phys);
        for i in 0..NUM_ENTRIES {
            unsafe { table.add(i).write(PageTableEntry::new()) };
        }
    }

    /// Populates the pool: every PML4, PDPT and PD entry covering the
    /// window is made present and pointed into the pool, every PT entry
    /// starts zero, and the early window is identity-mapped.
    ///
    /// # Safety
    ///
    /// `init` overwrites the entire pool. The caller must guarantee the
    /// pool is not live (for example, that CR3 still points at the
    /// boot page tables).
    ///
    pub unsafe fn init(&mut self) {
        let pdpts = entries(self.window, PML4E_SPAN);
        let pds = entries(self.window, PDPTE_SPAN);
        let pts = entries(self.window, PDE_SPAN);

        // Internal tables are PRESENT | WRITE | USER; the leaf entries
        // decide the effective permissions.
        let flags = PageTableFlags::PRESENT | PageTableFlags::WRITE | PageTableFlags::USER;

        // 1. The PML4 points at the PDPTs.
        self.zero_table(self.pool_phys_base);
        let pml4 = self.table_ptr(self.pool_phys_base);
        for i in 0..pdpts {
            let mut entry = PageTableEntry::new();
            entry.set(self.pdpt_addr(i), flags);
            pml4.add(i).write(entry);
        }

        // 2. The PDPTs point at the PDs.
        for i in 0..pdpts {
            self.zero_table(self.pdpt_addr(i));
        }
        for i in 0..pds {
            let table = self.table_ptr(self.pdpt_addr(i / NUM_ENTRIES));
            let mut entry = PageTableEntry::new();
            entry.set(self.pd_addr(i), flags);
            table.add(i % NUM_ENTRIES).write(entry);
        }

        // 3. The PDs point at the PTs.
        for i in 0..pds {
            self.zero_table(self.pd_addr(i));
        }
        for i in 0..pts {
            let table = self.table_ptr(self.pd_addr(i / NUM_ENTRIES));
            let mut entry = PageTableEntry::new();
            entry.set(self.pt_addr(i), flags);
            table.add(i % NUM_ENTRIES).write(entry);
        }

        // 4. The PTs start out empty.
        for i in 0..pts {
            self.zero_table(self.pt_addr(i));
        }

        // 5. Identity-map the early window.
        let early = if IDENTITY_MAPPED_EARLY < self.window {
            IDENTITY_MAPPED_EARLY
        } else {
            self.window
        };
        self.map_pages(
            VirtAddr::zero(),
            PhysAddr::zero(),
            early / PAGE_SIZE,
            PageTableFlags::PRESENT | PageTableFlags::WRITE,
        );
    }

    /// Loads the pool's PML4 into CR3, activating the page map.
    ///
    /// # Safety
    ///
    /// The pool must have been populated by [`init`](Self::init), and
    /// the identity mapping must cover all memory in active use.
    ///
    pub unsafe fn activate(&self) {
        use x86_64::registers::control::{Cr3, Cr3Flags};
        use x86_64::structures::paging::PhysFrame;

        let frame =
            PhysFrame::from_start_address(x86_64::PhysAddr::new(self.pml4_addr().as_usize() as u64))
                .expect("page-table pool is frame-aligned");
        Cr3::write(frame, Cr3Flags::empty());
    }

    /// Walks the three internal levels for `virt` and returns a pointer
    /// to its PT, panicking if any level is absent.
    ///
    fn leaf_table(&self, virt: VirtAddr) -> *mut PageTableEntry {
        let pml4 = self.table_ptr(self.pool_phys_base);
        let pml4e = unsafe { pml4.add(level4_index(virt)).read() };
        if !pml4e.is_present() {
            panic!("PML4 entry absent for {:p}: address outside the mapped window", virt);
        }

        let pdpt = self.table_ptr(pml4e.addr());
        let pdpte = unsafe { pdpt.add(level3_index(virt)).read() };
        if !pdpte.is_present() {
            panic!("PDPT entry absent for {:p}: address outside the mapped window", virt);
        }

        let pd = self.table_ptr(pdpte.addr());
        let pde = unsafe { pd.add(level2_index(virt)).read() };
        if !pde.is_present() {
            panic!("PD entry absent for {:p}: address outside the mapped window", virt);
        }

        self.table_ptr(pde.addr())
    }

    /// Creates a mapping from the page at `virt` to the frame at
    /// `phys`.
    ///
    /// Every internal table entry must already be present (the init
    /// routine populates all of them for the kernel window).
    ///
    /// # Panics
    ///
    /// `map` will panic if `virt` or `phys` is not page-aligned, if an
    /// internal table entry is absent, or if the leaf entry is already
    /// present with anything other than exactly `phys | flags`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `frame` is not in use through
    /// another mapping that is written concurrently.
    ///
    pub unsafe fn map(&mut self, virt: VirtAddr, phys: PhysAddr, flags: PageTableFlags) -> MappingChange {
        assert!(virt.is_page_aligned(), "cannot map unaligned page {:p}", virt);
        assert!(phys.is_page_aligned(), "cannot map unaligned frame {:p}", phys);

        let pt = self.leaf_table(virt);
        let index = level1_index(virt);
        let current = pt.add(index).read();

        let mut entry = PageTableEntry::new();
        entry.set(phys, flags);

        if current.is_present() {
            // Re-mapping is only tolerated if it is a no-op.
            if current != entry {
                panic!(
                    "page {:p} already mapped to {:#x}, refusing to remap to {:#x}",
                    virt,
                    current.raw(),
                    entry.raw()
                );
            }

            return MappingChange::new(virt);
        }

        pt.add(index).write(entry);
        MappingChange::new(virt)
    }

    /// Maps `pages` consecutive pages starting at `virt` to the frames
    /// starting at `phys`.
    ///
    /// # Safety
    ///
    /// As for [`map`](Self::map).
    ///
    pub unsafe fn map_pages(
        &mut self,
        virt: VirtAddr,
        phys: PhysAddr,
        pages: usize,
        flags: PageTableFlags,
    ) {
        for i in 0..pages {
            // Fresh present entries are not TLB-cached, so there is
            // nothing to flush.
            self.map(
                VirtAddr::new(virt.as_usize() + i * PAGE_SIZE),
                PhysAddr::new(phys.as_usize() + i * PAGE_SIZE),
                flags,
            )
            .ignore();
        }
    }

    /// Removes the mapping for the page at `virt`, if reachable.
    ///
    /// Returns the TLB flush token for the cleared entry, or `None`
    /// (quietly) if any level on the walk is absent.
    ///
    /// # Safety
    ///
    /// The caller must ensure that the page is no longer in use.
    ///
    pub unsafe fn unmap(&mut self, virt: VirtAddr) -> Option<MappingChange> {
        let pml4 = self.table_ptr(self.pool_phys_base);
        let pml4e = pml4.add(level4_index(virt)).read();
        if !pml4e.is_present() {
            return None;
        }

        let pdpt = self.table_ptr(pml4e.addr());
        let pdpte = pdpt.add(level3_index(virt)).read();
        if !pdpte.is_present() {
            return None;
        }

        let pd = self.table_ptr(pdpte.addr());
        let pde = pd.add(level2_index(virt)).read();
        if !pde.is_present() {
            return None;
        }

        let pt = self.table_ptr(pde.addr());
        let index = level1_index(virt);
        let mut entry = pt.add(index).read();
        entry.zero();
        pt.add(index).write(entry);

        Some(MappingChange::new(virt))
    }

    /// Translates a virtual address to the physical address it is
    /// mapped to, or `None` if any level on the walk is absent.
    ///
    pub fn translate(&self, virt: VirtAddr) -> Option<PhysAddr> {
        let pml4 = self.table_ptr(self.pool_phys_base);
        let pml4e = unsafe { pml4.add(level4_index(virt)).read() };
        if !pml4e.is_present() {
            return None;
        }

        let pdpt = self.table_ptr(pml4e.addr());
        let pdpte = unsafe { pdpt.add(level3_index(virt)).read() };
        if !pdpte.is_present() {
            return None;
        }

        let pd = self.table_ptr(pdpte.addr());
        let pde = unsafe { pd.add(level2_index(virt)).read() };
        if !pde.is_present() {
            return None;
        }

        let pt = self.table_ptr(pde.addr());
        let pte = unsafe { pt.add(level1_index(virt)).read() };
        if !pte.is_present() {
            return None;
        }

        Some(pte.addr() + virt.page_offset())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use std::boxed::Box;

    // A 16 MiB window keeps the fake pool small: one PML4, one PDPT,
    // one PD and eight PTs.
    const TEST_WINDOW: usize = 16 << 20;
    const TEST_POOL_PAGES: usize = pool_pages_for_window(TEST_WINDOW);

    // A frame-aligned buffer that stands in for the page-table pool.
    // Using the buffer's own address as both the physical and virtual
    // base makes the phys-to-virt translation the identity, so the
    // walker dereferences plain host memory.
    //
    #[repr(C)]
    #[repr(align(4096))]
    struct FakePool([u8; TEST_POOL_PAGES * PAGE_SIZE]);

    fn new_page_map(pool: &mut FakePool) -> KernelPageMap {
        let base = pool.0.as_ptr() as usize;
        let mut map = unsafe {
            KernelPageMap::new(PhysAddr::new(base), VirtAddr::new(base), TEST_WINDOW)
        };
        unsafe { map.init() };
        map
    }

    #[test]
    fn test_pool_sizing() {
        assert_eq!(pool_pages_for_window(16 << 20), 1 + 1 + 1 + 8);
        assert_eq!(pool_pages_for_window(2 << 30), 1 + 1 + 2 + 1024);
        assert_eq!(pool_pages_for_window(1), 1 + 1 + 1 + 1);
    }

    #[test]
    fn test_page_table_indices() {
        let addr = VirtAddr::new(0xffff_8234_5678_9abc);
        assert_eq!(level4_index(addr), 260);
        assert_eq!(level3_index(addr), 209);
        assert_eq!(level2_index(addr), 179);
        assert_eq!(level1_index(addr), 393);
    }

    #[test]
    fn test_init_identity_maps_early_window() {
        let mut pool = Box::new(FakePool([0; TEST_POOL_PAGES * PAGE_SIZE]));
        let map = new_page_map(&mut pool);

        // The early window is identity-mapped...
        assert_eq!(map.translate(VirtAddr::zero()), Some(PhysAddr::zero()));
        assert_eq!(
            map.translate(VirtAddr::new(0x1234)),
            Some(PhysAddr::new(0x1234))
        );
        assert_eq!(
            map.translate(VirtAddr::new(IDENTITY_MAPPED_EARLY - 1)),
            Some(PhysAddr::new(IDENTITY_MAPPED_EARLY - 1))
        );

        // ...and nothing past it is mapped.
        assert_eq!(map.translate(VirtAddr::new(IDENTITY_MAPPED_EARLY)), None);
        assert_eq!(map.translate(VirtAddr::new(TEST_WINDOW - 1)), None);
    }

    #[test]
    fn test_map_translate_round_trip() {
        let mut pool = Box::new(FakePool([0; TEST_POOL_PAGES * PAGE_SIZE]));
        let mut map = new_page_map(&mut pool);

        let virt = VirtAddr::new(10 << 20);
        let phys = PhysAddr::new(0x1234_5000);
        let flags = PageTableFlags::PRESENT | PageTableFlags::WRITE;
        unsafe { map.map(virt, phys, flags) }.ignore();

        // The whole page translates with the offset preserved.
        assert_eq!(map.translate(virt), Some(phys));
        for d in [1usize, 0x123, PAGE_SIZE - 1].iter().copied() {
            assert_eq!(map.translate(virt + d), Some(phys + d));
        }

        // The neighbouring pages stay unmapped.
        assert_eq!(map.translate(VirtAddr::new(virt.as_usize() - 1)), None);
        assert_eq!(map.translate(virt + PAGE_SIZE), None);

        // Re-mapping to the identical target is a no-op.
        unsafe { map.map(virt, phys, flags) }.ignore();
        assert_eq!(map.translate(virt), Some(phys));
    }

    #[test]
    fn test_map_pages() {
        let mut pool = Box::new(FakePool([0; TEST_POOL_PAGES * PAGE_SIZE]));
        let mut map = new_page_map(&mut pool);

        let virt = VirtAddr::new(12 << 20);
        let phys = PhysAddr::new(0x40_0000_0000);
        let flags = PageTableFlags::PRESENT | PageTableFlags::WRITE;
        unsafe { map.map_pages(virt, phys, 3, flags) };

        for i in 0..3 {
            assert_eq!(
                map.translate(virt + i * PAGE_SIZE),
                Some(phys + i * PAGE_SIZE)
            );
        }

        assert_eq!(map.translate(virt + 3 * PAGE_SIZE), None);
    }

    #[test]
    fn test_unmap() {
        let mut pool = Box::new(FakePool([0; TEST_POOL_PAGES * PAGE_SIZE]));
        let mut map = new_page_map(&mut pool);

        let virt = VirtAddr::new(10 << 20);
        let phys = PhysAddr::new(0x9000);
        unsafe { map.map(virt, phys, PageTableFlags::PRESENT) }.ignore();
        assert_eq!(map.translate(virt), Some(phys));

        let change = unsafe { map.unmap(virt) };
        assert!(change.is_some());
        change.unwrap().ignore();
        assert_eq!(map.translate(virt), None);

        // Unmapping an address whose walk fails returns quietly.
        let outside = VirtAddr::new(0xffff_8000_0000_0000);
        assert!(unsafe { map.unmap(outside) }.is_none());

        // The page can be mapped again, to a new frame.
        unsafe { map.map(virt, PhysAddr::new(0xa000), PageTableFlags::PRESENT) }.ignore();
        assert_eq!(map.translate(virt), Some(PhysAddr::new(0xa000)));
    }

    #[test]
    #[should_panic]
    fn test_remap_to_different_frame_panics() {
        let mut pool = Box::new(FakePool([0; TEST_POOL_PAGES * PAGE_SIZE]));
        let mut map = new_page_map(&mut pool);

        let virt = VirtAddr::new(10 << 20);
        unsafe {
            map.map(virt, PhysAddr::new(0x9000), PageTableFlags::PRESENT)
                .ignore();
            map.map(virt, PhysAddr::new(0xa000), PageTableFlags::PRESENT)
                .ignore();
        }
    }

    #[test]
    #[should_panic]
    fn test_map_unaligned_page_panics() {
        let mut pool = Box::new(FakePool([0; TEST_POOL_PAGES * PAGE_SIZE]));
        let mut map = new_page_map(&mut pool);

        unsafe {
            map.map(
                VirtAddr::new((10 << 20) + 1),
                PhysAddr::new(0x9000),
                PageTableFlags::PRESENT,
            )
            .ignore();
        }
    }

    #[test]
    #[should_panic]
    fn test_map_outside_window_panics() {
        let mut pool = Box::new(FakePool([0; TEST_POOL_PAGES * PAGE_SIZE]));
        let mut map = new_page_map(&mut pool);

        // The internal tables only cover the window, so mapping far
        // beyond it hits an absent PML4 entry.
        unsafe {
            map.map(
                VirtAddr::new(0xffff_8000_0000_0000),
                PhysAddr::new(0x9000),
                PageTableFlags::PRESENT,
            )
            .ignore();
        }
    }
}
