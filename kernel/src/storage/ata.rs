// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! A PIO driver for the legacy ATA/IDE primary channel.
//!
//! The driver speaks 28-bit LBA over the standard register file at
//! base port 0x1F0 (data, error, sector count, the three LBA bytes,
//! device select, command/status) plus the control port at base +
//! 0x206. Transfers are one 512-byte sector at a time, moved by the
//! CPU through the data port.
//!
//! Completion is detected by polling the status register. The poll is
//! iteration-bounded; in practice the bound is tens of seconds of
//! spinning, and expiry means the hardware is gone, which is fatal.
//! The channel's IRQ (line 14, vector 0x2E) only sets a flag that
//! [`wait_for_irq`] can observe to cut a poll short.

use crate::{BlockDevice, BLOCK_SIZE};
use core::sync::atomic::{AtomicBool, Ordering};
use serial::println;
use x86_64::instructions::port::Port;

/// The base I/O port of the primary ATA channel.
///
pub const PRIMARY_BASE: u16 = 0x1f0;

/// The IRQ line of the primary ATA channel.
///
pub const PRIMARY_IRQ: u8 = 14;

// Status register bits.
const STATUS_ERR: u8 = 0x01;
const STATUS_DRQ: u8 = 0x08;
const STATUS_BSY: u8 = 0x80;

// Commands.
const CMD_READ_SECTORS: u8 = 0x20;
const CMD_WRITE_SECTORS: u8 = 0x30;
const CMD_FLUSH_CACHE: u8 = 0xe7;
const CMD_IDENTIFY: u8 = 0xec;

/// The poll bound for a single status wait. At bus speed this is on
/// the order of tens of seconds.
///
const MAX_WAIT_ITERATIONS: usize = 100_000_000;

/// Set by the channel's interrupt handler, consumed by the status
/// polls to cut their backoff short.
///
static IRQ_SEEN: AtomicBool = AtomicBool::new(false);

/// Called by the kernel's IRQ 14 handler to mark that the channel
/// raised an interrupt.
///
pub fn handle_irq() {
    IRQ_SEEN.store(true, Ordering::Release);
}

/// Consumes the IRQ flag if it is raised.
///
fn take_irq() -> bool {
    IRQ_SEEN.swap(false, Ordering::AcqRel)
}

/// An ATA drive on one channel, driven by PIO.
///
pub struct Ata {
    data: Port<u16>,
    error: Port<u8>,
    sector_count: Port<u8>,
    lba_low: Port<u8>,
    lba_mid: Port<u8>,
    lba_high: Port<u8>,
    device: Port<u8>,
    command: Port<u8>,
    control: Port<u8>,

    // Whether this is the master drive on its channel.
    master: bool,

    num_blocks: usize,
    mounts: u32,
}

impl Ata {
    /// Returns a driver for a drive on the channel at `base`.
    ///
    /// The capacity is unknown until [`identify`](Self::identify)
    /// runs.
    ///
    pub const fn new(base: u16, master: bool) -> Self {
        Ata {
            data: Port::new(base),
            error: Port::new(base + 1),
            sector_count: Port::new(base + 2),
            lba_low: Port::new(base + 3),
            lba_mid: Port::new(base + 4),
            lba_high: Port::new(base + 5),
            device: Port::new(base + 6),
            command: Port::new(base + 7),
            control: Port::new(base + 0x206),
            master,
            num_blocks: 0,
            mounts: 0,
        }
    }

    /// Returns a driver for the primary channel.
    ///
    pub const fn primary(master: bool) -> Self {
        Self::new(PRIMARY_BASE, master)
    }

    /// Polls the status register until the drive is no longer busy and
    /// the data-request bit is set.
    ///
    /// # Panics
    ///
    /// `wait_ready` panics if the drive reports an error or the poll
    /// bound expires.
    ///
    fn wait_ready(&mut self) {
        for _ in 0..MAX_WAIT_ITERATIONS {
            let status = unsafe { self.command.read() };
            if status & STATUS_ERR != 0 {
                let error = unsafe { self.error.read() };
                panic!("ATA drive reported error {:#04x}", error);
            }

            if status & STATUS_BSY == 0 && status & STATUS_DRQ != 0 {
                return;
            }

            // The drive's interrupt cuts the backoff short; otherwise
            // spin.
            if !take_irq() {
                core::hint::spin_loop();
            }
        }

        panic!("ATA drive stayed busy past the poll bound");
    }

    /// Selects this drive and programs a one-sector transfer at
    /// `lba`.
    ///
    fn setup_transfer(&mut self, lba: usize) {
        assert!(lba <= 0x0fff_ffff, "sector {:#x} exceeds 28-bit LBA", lba);

        let select = if self.master { 0xe0 } else { 0xf0 };
        unsafe {
            self.device.write(select | ((lba >> 24) & 0x0f) as u8);
            self.error.write(0);
            self.sector_count.write(1);
            self.lba_low.write((lba & 0xff) as u8);
            self.lba_mid.write(((lba >> 8) & 0xff) as u8);
            self.lba_high.write(((lba >> 16) & 0xff) as u8);
        }
    }

    /// Queries the drive's identity, recording its capacity.
    ///
    /// # Panics
    ///
    /// `identify` panics if no drive answers on the channel.
    ///
    pub fn identify(&mut self) {
        let select = if self.master { 0xa0 } else { 0xb0 };
        unsafe {
            self.device.write(select);
            self.control.write(0);
        }

        let status = unsafe { self.command.read() };
        if status == 0xff {
            panic!("no drive on the ATA channel (floating bus)");
        }

        unsafe {
            self.device.write(select);
            self.sector_count.write(0);
            self.lba_low.write(0);
            self.lba_mid.write(0);
            self.lba_high.write(0);
            self.command.write(CMD_IDENTIFY);
        }

        let status = unsafe { self.command.read() };
        if status == 0 {
            panic!("no drive answered IDENTIFY");
        }

        self.wait_ready();

        let mut identity = [0u16; 256];
        for word in identity.iter_mut() {
            *word = unsafe { self.data.read() };
        }

        // Words 60-61 hold the number of 28-bit addressable sectors.
        self.num_blocks = identity[60] as usize | ((identity[61] as usize) << 16);

        println!(
            "ATA drive: {} sectors of {} bytes.",
            self.num_blocks, BLOCK_SIZE
        );
    }

    /// Issues a cache flush and waits for it to complete.
    ///
    fn flush(&mut self) {
        unsafe { self.command.write(CMD_FLUSH_CACHE) };

        for _ in 0..MAX_WAIT_ITERATIONS {
            let status = unsafe { self.command.read() };
            if status & STATUS_BSY == 0 {
                return;
            }

            core::hint::spin_loop();
        }

        panic!("ATA drive stayed busy flushing past the poll bound");
    }
}

impl BlockDevice for Ata {
    fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    /// Reads the sector at `index` into `buf`.
    ///
    /// # Panics
    ///
    /// `read` panics if `index` exceeds the 28-bit LBA range or the
    /// drive fails.
    ///
    fn read(&mut self, index: usize, buf: &mut [u8; BLOCK_SIZE]) {
        self.setup_transfer(index);
        unsafe { self.command.write(CMD_READ_SECTORS) };

        self.wait_ready();

        for i in 0..BLOCK_SIZE / 2 {
            let word = unsafe { self.data.read() };
            buf[2 * i] = (word & 0xff) as u8;
            buf[2 * i + 1] = (word >> 8) as u8;
        }
    }

    /// Writes `buf` to the sector at `index`.
    ///
    /// # Panics
    ///
    /// `write` panics if `index` exceeds the 28-bit LBA range or the
    /// drive fails.
    ///
    fn write(&mut self, index: usize, buf: &[u8; BLOCK_SIZE]) {
        self.setup_transfer(index);
        unsafe { self.command.write(CMD_WRITE_SECTORS) };

        self.wait_ready();

        for i in 0..BLOCK_SIZE / 2 {
            let word = buf[2 * i] as u16 | ((buf[2 * i + 1] as u16) << 8);
            unsafe { self.data.write(word) };
        }

        self.flush();
    }

    fn mount(&mut self) {
        self.mounts += 1;
    }

    fn unmount(&mut self) {
        if self.mounts == 0 {
            panic!("unmount of a device with no mounts outstanding");
        }

        self.mounts -= 1;
    }

    fn is_mounted(&self) -> bool {
        self.mounts != 0
    }
}
