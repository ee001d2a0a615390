// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Parses the Multiboot2 boot information.
//!
//! The bootstrap assembly passes one 64-bit argument: the Multiboot2
//! magic in the upper half, the physical address of the boot
//! information structure in the lower half. Out of the memory map,
//! the kernel takes the largest available region above the 1 MiB
//! boundary as its physical allocator window, minus the first 8 MiB,
//! which the early identity map, the page-table pool and the boot
//! stack already occupy.

use memory::constants::{
    IDENTITY_MAPPED_EARLY, KERNEL_VIRTUAL_SIZE, PHYSICAL_ALLOCATOR_VIRTUAL_START,
};
use memory::PhysAddr;
use multiboot2::MemoryAreaType;

/// The value a Multiboot2 loader leaves in EAX.
///
pub const MULTIBOOT2_MAGIC: u32 = 0x36d7_6289;

/// Regions below this boundary are never considered for the allocator
/// window.
///
const LOW_MEMORY_BOUND: u64 = 1 << 20;

/// The physical window handed to the allocators.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BootWindow {
    pub base: PhysAddr,
    pub size: usize,
}

/// Splits the packed boot argument into the magic and the boot
/// information address.
///
pub fn split_boot_argument(arg: u64) -> (u32, usize) {
    ((arg >> 32) as u32, (arg & 0xffff_ffff) as usize)
}

/// Picks the largest available region above the 1 MiB boundary.
/// Regions straddling the boundary are clamped to it.
///
pub fn largest_available(areas: impl Iterator<Item = (u64, u64)>) -> Option<(u64, u64)> {
    let mut best: Option<(u64, u64)> = None;
    for (start, len) in areas {
        let end = start + len;
        let start = start.max(LOW_MEMORY_BOUND);
        if start >= end {
            continue;
        }

        let len = end - start;
        if best.map_or(true, |(_, best_len)| len > best_len) {
            best = Some((start, len));
        }
    }

    best
}

/// Excludes the early identity-mapped window from a region, and caps
/// the region to what the kernel's 2 GiB virtual window can mirror.
///
pub fn exclude_early_window(base: u64, len: u64) -> Option<(u64, u64)> {
    let end = base + len;
    let base = base.max(IDENTITY_MAPPED_EARLY as u64);
    if base >= end {
        return None;
    }

    // The virtual allocator mirrors the window starting just past the
    // bookkeeping mapping, so the whole window (plus slack for the
    // bookkeeping itself) must fit under the virtual size.
    let cap = (KERNEL_VIRTUAL_SIZE - 2 * PHYSICAL_ALLOCATOR_VIRTUAL_START.as_usize()) as u64;
    let len = (end - base).min(cap);

    Some((base, len))
}

/// Parses the packed boot argument into the physical allocator
/// window.
///
/// # Panics
///
/// `parse` panics if the magic is not the Multiboot2 one, if the boot
/// information cannot be read, or if no usable memory region exists.
///
/// # Safety
///
/// The boot-information address in `arg` must point at a valid
/// Multiboot2 structure, which the early identity map must cover.
///
pub unsafe fn parse(arg: u64) -> BootWindow {
    let (magic, mbi_addr) = split_boot_argument(arg);
    if magic != MULTIBOOT2_MAGIC {
        panic!("invalid Multiboot2 magic {:#010x}", magic);
    }

    let info = multiboot2::BootInformation::load(mbi_addr as *const multiboot2::BootInformationHeader)
        .expect("unreadable Multiboot2 information");
    let memory_map = info
        .memory_map_tag()
        .expect("boot information carries no memory map");

    let areas = memory_map
        .memory_areas()
        .iter()
        .filter(|area| area.typ() == MemoryAreaType::Available)
        .map(|area| (area.start_address(), area.size()));

    let (base, len) = largest_available(areas).expect("no available memory above 1 MiB");
    let (base, len) = exclude_early_window(base, len)
        .expect("no available memory past the early identity-mapped window");

    BootWindow {
        base: PhysAddr::new(base as usize),
        size: len as usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_boot_argument() {
        let arg = ((MULTIBOOT2_MAGIC as u64) << 32) | 0x0009_8000;
        assert_eq!(split_boot_argument(arg), (MULTIBOOT2_MAGIC, 0x0009_8000));
    }

    #[test]
    fn test_largest_available() {
        // The region below 1 MiB is ignored entirely.
        let areas = [(0u64, 0x9f000u64)];
        assert_eq!(largest_available(areas.iter().copied()), None);

        // A region straddling 1 MiB is clamped to it.
        let areas = [(0x80000, 0x100000)];
        assert_eq!(
            largest_available(areas.iter().copied()),
            Some((0x100000, 0x80000))
        );

        // The largest region wins.
        let areas = [
            (0x0, 0x9f000),
            (0x100000, 0x700000),
            (0x1000000, 0x3f000000),
        ];
        assert_eq!(
            largest_available(areas.iter().copied()),
            Some((0x1000000, 0x3f000000))
        );
    }

    #[test]
    fn test_exclude_early_window() {
        // A window entirely under 8 MiB disappears.
        assert_eq!(exclude_early_window(0x100000, 0x400000), None);

        // A window straddling 8 MiB is trimmed to start there.
        assert_eq!(
            exclude_early_window(0x100000, 0x40000000),
            Some((0x800000, 0x40000000 - 0x700000))
        );

        // A window past 8 MiB is untouched.
        assert_eq!(
            exclude_early_window(0x1000000, 0x1000000),
            Some((0x1000000, 0x1000000))
        );

        // Windows larger than the kernel's virtual reach are capped.
        let huge = 8u64 << 30;
        let (_, len) = exclude_early_window(0x800000, huge).unwrap();
        assert!(len < 2 << 30);
    }
}
