// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

// This is the entry point for the kernel. The long-mode bootstrap
// assembly (which sets up the early identity map and the boot stack)
// jumps to kernel_main with one packed argument: the Multiboot2 magic
// in the upper 32 bits, the boot-information address in the lower 32.
//
// The bin only makes sense for the bare-metal target
// (x86_64-boss.json); a host build gets a stub main so the workspace
// still builds and tests everywhere.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod bare {
    use core::panic::PanicInfo;
    use serial::println;

    /// This function is called on panic: interrupts off, report over
    /// serial, halt.
    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        x86_64::instructions::interrupts::disable();
        println!("KERNEL PANIC: {}", info);
        kernel::halt_loop();
    }

    #[no_mangle]
    pub extern "C" fn kernel_main(multiboot_and_magic: u64) -> ! {
        unsafe { kernel::init(multiboot_and_magic) };

        println!("Kernel ready!");
        kernel::vga_println!("Kernel ready.");

        kernel::boot_self_test();
        kernel::mem::debug();
        let (arenas, regions) = kernel::heap_stats();
        println!("Heap: {} arenas, {} mapped regions.", arenas, regions);

        kernel::halt_loop();
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("boss-kernel only runs on bare metal; build it for x86_64-boss.json.");
}
