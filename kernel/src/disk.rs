// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Brings up the boot disk and its file system.
//!
//! The primary ATA master drive carries the kernel's SimpleFS. The
//! drive's IRQ handler is registered first (it only flags the ATA
//! driver's wait loop), then the drive is identified, formatted if it
//! carries no file system yet, and mounted at `/`.

use alloc::boxed::Box;
use filesystem::simple_fs::SimpleFs;
use filesystem::vfs;
use interrupts::Irq;
use serial::println;
use storage::ata;
use storage::ata::Ata;
use x86_64::structures::idt::InterruptStackFrame;

fn ata_irq_handler(_frame: InterruptStackFrame, _irq: Irq) {
    ata::handle_irq();
}

/// Identifies the boot drive, formats it on first use, and mounts it
/// at `/`.
///
/// # Panics
///
/// `init` panics if no drive answers on the primary channel or the
/// file system on it is corrupt.
///
pub fn init() {
    interrupts::set_irq_handler(Irq::new_unsafe(ata::PRIMARY_IRQ), ata_irq_handler);

    let mut drive = Ata::primary(true);
    drive.identify();

    let mut fs = SimpleFs::new(drive);
    if !fs.is_formatted() {
        println!("Disk carries no file system; formatting...");
        fs.format();
    }

    vfs::init(Box::new(fs));
    println!("Mounted SimpleFS at /.");
}
