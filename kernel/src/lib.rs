// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The BOSS kernel.
//!
//! BOSS is a single-address-space x86_64 kernel booted via Multiboot2.
//! This crate ties the subsystem crates together: it parses the boot
//! information, brings up the memory hierarchy (page map, frame
//! allocator, virtual allocator, heap), installs the interrupt and
//! syscall tables, drives the VGA text console, and mounts SimpleFS
//! on the primary ATA drive behind the VFS.
//!
//! [`init`] runs the whole sequence in dependency order. Everything
//! after it communicates with the kernel through `INT 0x80` syscalls;
//! [`issue_syscall`] is the kernel-side helper for doing so.

#![no_std]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]

extern crate alloc;

pub mod boot_info;
pub mod console;
pub mod disk;
pub mod mem;
pub mod syscall;

use serial::println;

/// The kernel's heap. Only registered when building for bare metal;
/// host-side tests keep their platform's allocator.
///
#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: virtmem::heap::LockedHeap = virtmem::heap::LockedHeap::new();

/// init brings up the kernel's core subsystems, in dependency order:
/// serial logging, the interrupt tables, the memory hierarchy, the
/// syscall table, the console, and finally the disk and its file
/// system. Interrupts are enabled last.
///
/// # Panics
///
/// `init` panics if the Multiboot2 magic is wrong, the boot
/// information is unusable, or any subsystem fails to come up: there
/// is nothing to fall back to this early.
///
/// # Safety
///
/// Must be called exactly once, at boot, with the packed argument the
/// bootstrap assembly received from the Multiboot2 loader.
///
pub unsafe fn init(multiboot_and_magic: u64) {
    serial::init();
    println!("BOSS kernel booting...");

    let window = boot_info::parse(multiboot_and_magic);
    println!(
        "Physical window: {:#x} + {}.",
        window.base.as_usize(),
        pretty::Bytes::from_usize(window.size)
    );

    interrupts::init();
    mem::init(window.base, window.size);

    #[cfg(target_os = "none")]
    ALLOCATOR.init();

    syscall::init();
    console::init();
    disk::init();

    x86_64::instructions::interrupts::enable();
}

/// halt_loop halts the CPU using a loop of the hlt
/// instruction.
///
pub fn halt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

/// Returns the number of live heap arenas and mapped regions in use.
///
#[cfg(target_os = "none")]
pub fn heap_stats() -> (usize, usize) {
    ALLOCATOR.stats()
}

/// Issues a syscall through `INT 0x80`, using the fixed convention:
/// the syscall number in `rax`, arguments in `rdi`, `rsi`, `rdx` and
/// `r10`, the result back in `rax`.
///
/// # Safety
///
/// Pointer arguments must reference live memory for the duration of
/// the call; the kernel dereferences them directly.
///
#[cfg(target_arch = "x86_64")]
pub unsafe fn issue_syscall(num: u64, arg1: u64, arg2: u64, arg3: u64, arg4: u64) -> i64 {
    let result: u64;
    core::arch::asm!(
        "int 0x80",
        inout("rax") num => result,
        in("rdi") arg1,
        in("rsi") arg2,
        in("rdx") arg3,
        in("r10") arg4,
    );

    result as i64
}

/// Exercises the file system end to end through the syscall
/// interface: create a file, write it, read it back, list the root.
///
/// # Panics
///
/// Panics if any step misbehaves; a kernel that cannot round-trip a
/// file through its own syscalls should not pretend to have booted.
///
pub fn boot_self_test() {
    use syscalls::{Syscall, OPEN_CREATE};

    let path = b"/boot-test\0";
    let message = b"BOSS";

    unsafe {
        let fd = issue_syscall(
            Syscall::Open as u64,
            path.as_ptr() as u64,
            OPEN_CREATE,
            0,
            0,
        );
        if fd <= 0 {
            panic!("self test: open failed with {}", fd);
        }

        let written = issue_syscall(
            Syscall::Write as u64,
            fd as u64,
            message.as_ptr() as u64,
            message.len() as u64,
            0,
        );
        if written != message.len() as i64 {
            panic!("self test: write returned {}", written);
        }

        let mut readback = [0u8; 4];
        let read = issue_syscall(
            Syscall::Read as u64,
            fd as u64,
            readback.as_mut_ptr() as u64,
            readback.len() as u64,
            0,
        );
        if read != message.len() as i64 || readback != *message {
            panic!("self test: read back {} bytes: {:?}", read, readback);
        }

        issue_syscall(Syscall::Close as u64, fd as u64, 0, 0, 0);
        issue_syscall(Syscall::Ls as u64, 0, 0, 0, 0);
    }

    println!("File system self test passed.");
}
