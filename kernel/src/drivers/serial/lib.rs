// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides access to the first serial port and implements the `print`
//! and `println` macros.
//!
//! The port is probed once at [`init`] with a loopback self-test: the
//! UART is put into loopback mode, the byte `0xAE` is written, and the
//! same byte must be read back. If the probe fails, the port is left
//! disabled and every print becomes a no-op; the kernel boots on
//! without logging rather than wedging on broken hardware.
//!
//! # Safety
//!
//! The [`print`] and [`println`] macros disable interrupts while
//! holding the port lock, to prevent deadlocks against handlers that
//! log.

#![no_std]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::inline_asm_x86_att_syntax)]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::panic)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![allow(unsafe_code)]
#![deny(unused_crate_dependencies)]

use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;
use uart_16550::SerialPort;
use x86_64::instructions::interrupts::without_interrupts;
use x86_64::instructions::port::Port;

/// The base I/O port of COM1.
///
const COM1_PORT: u16 = 0x3f8;

/// COM1 is the first serial port device.
///
pub static COM1: Mutex<SerialPort> = unsafe { Mutex::new(SerialPort::new(COM1_PORT)) };

/// Whether the loopback self-test passed and output is live.
///
static ENABLED: AtomicBool = AtomicBool::new(false);

/// Initialises COM1, running the loopback self-test.
///
/// On success, output is enabled and `init` returns `true`. On failure
/// the port stays disabled, prints become no-ops, and boot continues.
///
pub fn init() -> bool {
    let passed = without_interrupts(|| {
        let _guard = COM1.lock();

        // The UART is configured by hand here rather than through the
        // driver, because the self-test needs the modem-control
        // register, which the driver does not expose.
        unsafe {
            let mut interrupt_enable = Port::<u8>::new(COM1_PORT + 1);
            let mut fifo_control = Port::<u8>::new(COM1_PORT + 2);
            let mut line_control = Port::<u8>::new(COM1_PORT + 3);
            let mut modem_control = Port::<u8>::new(COM1_PORT + 4);
            let mut data = Port::<u8>::new(COM1_PORT);

            interrupt_enable.write(0x00); // No interrupts.
            line_control.write(0x80); // Divisor latch.
            data.write(0x03); // 38400 baud, low byte.
            interrupt_enable.write(0x00); // High byte.
            line_control.write(0x03); // 8 bits, no parity, one stop.
            fifo_control.write(0xc7); // FIFOs on, cleared, 14-byte threshold.
            modem_control.write(0x0b); // RTS/DSR set.

            // Loopback self-test: the byte must come straight back.
            modem_control.write(0x1e);
            data.write(0xae);
            if data.read() != 0xae {
                return false;
            }

            // Leave loopback, back to normal operation.
            modem_control.write(0x0f);
        }

        true
    });

    ENABLED.store(passed, Ordering::Release);
    passed
}

/// Returns whether serial output is live.
///
pub fn enabled() -> bool {
    ENABLED.load(Ordering::Acquire)
}

/// Write a string to the first serial port, COM1.
///
pub fn write_str(s: &str) -> core::fmt::Result {
    if !enabled() {
        return Ok(());
    }

    without_interrupts(|| COM1.lock().write_str(s))
}

/// _print writes text to the serial port by acquiring COM1 under a
/// spin lock.
///
#[doc(hidden)]
pub fn _print(args: ::core::fmt::Arguments) {
    if !enabled() {
        return;
    }

    without_interrupts(|| {
        // Writing to the UART cannot fail; ignore the fmt plumbing.
        let _ = COM1.lock().write_fmt(args);
    });
}

/// Print to the first serial port, COM1.
///
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::_print(format_args!($($arg)*)));
}

/// Print to the first serial port, COM1.
///
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
