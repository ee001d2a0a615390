// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Handles hardware and software interrupts and the [Programmable Interrupt Controller](https://en.wikipedia.org/wiki/Programmable_interrupt_controller) (PIC).
//!
//! [`init`] builds and loads the 256-entry interrupt descriptor table:
//!
//! - Vectors 0-31 get the CPU exception handlers. A breakpoint logs
//!   and resumes; everything else is fatal and panics with the
//!   exception's name.
//! - Vectors 0x20-0x2F get the IRQ stubs. The legacy PIC pair is
//!   remapped to this range so hardware interrupts stay clear of the
//!   CPU-reserved vectors.
//! - Vector 0x80 gets the syscall entry (see [`syscall`]).
//! - Every remaining vector gets a default handler that panics:
//!   an interrupt through an unset gate means the kernel is wrong
//!   about its own hardware.
//!
//! IRQ handlers are registered with [`set_irq_handler`], which also
//! unmasks the PIC line. The dispatcher acknowledges the PIC *before*
//! invoking the handler, so a long-running handler can be interrupted
//! by a later IRQ; handlers must tolerate that or mask interrupts.
//! An IRQ with no registered handler panics.

#![no_std]
#![feature(abi_x86_interrupt)]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]

mod irq;
pub mod syscall;

pub use crate::irq::{set_irq_handler, Irq, IrqHandler};
pub use crate::syscall::{set_syscall_dispatcher, SyscallRegisters};

use lazy_static::lazy_static;
use pic8259::ChainedPics;
use serial::println;
use x86_64::registers::control::Cr2;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

/// The first vector used by the primary PIC.
///
pub(crate) const PIC_1_OFFSET: usize = 0x20;

/// The first vector used by the secondary PIC.
///
pub(crate) const PIC_2_OFFSET: usize = PIC_1_OFFSET + 8;

/// The vector used for syscalls.
///
const SYSCALL_VECTOR: usize = 0x80;

/// PICS is the pair of chained programmable interrupt controllers.
///
pub(crate) static PICS: spin::Mutex<ChainedPics> =
    spin::Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET as u8, PIC_2_OFFSET as u8) });

/// Loads the IDT and remaps the PIC.
///
/// All IRQ lines start out masked; registering a handler with
/// [`set_irq_handler`] unmasks its line.
///
pub fn init() {
    IDT.load();
    unsafe {
        let mut pics = PICS.lock();
        pics.initialize();
        pics.disable();
    }
}

lazy_static! {
    /// IDT is our interrupt descriptor table.
    ///
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();

        // CPU exceptions.
        idt.divide_error.set_handler_fn(divide_error_handler);
        idt.debug.set_handler_fn(debug_handler);
        idt.non_maskable_interrupt.set_handler_fn(non_maskable_interrupt_handler);
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.overflow.set_handler_fn(overflow_handler);
        idt.bound_range_exceeded.set_handler_fn(bound_range_exceeded_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.device_not_available.set_handler_fn(device_not_available_handler);
        idt.double_fault.set_handler_fn(double_fault_handler);
        idt.invalid_tss.set_handler_fn(invalid_tss_handler);
        idt.segment_not_present.set_handler_fn(segment_not_present_handler);
        idt.stack_segment_fault.set_handler_fn(stack_segment_fault_handler);
        idt.general_protection_fault.set_handler_fn(general_protection_fault_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.x87_floating_point.set_handler_fn(x87_floating_point_handler);
        idt.alignment_check.set_handler_fn(alignment_check_handler);
        idt.machine_check.set_handler_fn(machine_check_handler);
        idt.simd_floating_point.set_handler_fn(simd_floating_point_handler);
        idt.virtualization.set_handler_fn(virtualization_handler);

        // Hardware IRQs, remapped to 0x20-0x2F.
        for (i, handler) in irq::IRQ_HANDLERS.iter().enumerate() {
            idt[PIC_1_OFFSET + i].set_handler_fn(*handler);
        }

        // Everything else lands on a panicking default.
        for i in (PIC_2_OFFSET + 8)..256 {
            idt[i].set_handler_fn(default_handler);
        }

        // The syscall gate overrides the default at 0x80. The entry
        // stub saves the full register frame before dispatching.
        unsafe {
            idt[SYSCALL_VECTOR]
                .set_handler_addr(x86_64::VirtAddr::from_ptr(syscall::syscall_entry as *const u8));
        }

        idt
    };
}

// CPU exception handlers.

extern "x86-interrupt" fn divide_error_handler(stack_frame: InterruptStackFrame) {
    panic!("EXCEPTION: DIVIDE ERROR\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn debug_handler(stack_frame: InterruptStackFrame) {
    println!("EXCEPTION: DEBUG\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn non_maskable_interrupt_handler(stack_frame: InterruptStackFrame) {
    panic!("EXCEPTION: NON-MASKABLE INTERRUPT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    println!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn overflow_handler(stack_frame: InterruptStackFrame) {
    panic!("EXCEPTION: OVERFLOW\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn bound_range_exceeded_handler(stack_frame: InterruptStackFrame) {
    panic!("EXCEPTION: BOUND RANGE EXCEEDED\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn invalid_opcode_handler(stack_frame: InterruptStackFrame) {
    panic!("EXCEPTION: INVALID OPCODE\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn device_not_available_handler(stack_frame: InterruptStackFrame) {
    panic!("EXCEPTION: DEVICE NOT AVAILABLE\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn invalid_tss_handler(stack_frame: InterruptStackFrame, error_code: u64) {
    panic!(
        "EXCEPTION: INVALID TSS: segment index {}\n{:#?}",
        error_code, stack_frame
    );
}

extern "x86-interrupt" fn segment_not_present_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    panic!(
        "EXCEPTION: SEGMENT NOT PRESENT: index {}\n{:#?}",
        error_code, stack_frame
    );
}

extern "x86-interrupt" fn stack_segment_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    panic!(
        "EXCEPTION: STACK SEGMENT FAULT: index {}\n{:#?}",
        error_code, stack_frame
    );
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    if error_code != 0 {
        panic!(
            "EXCEPTION: GENERAL PROTECTION FAULT: segment index {}\n{:#?}",
            error_code, stack_frame
        );
    } else {
        panic!("EXCEPTION: GENERAL PROTECTION FAULT:\n{:#?}", stack_frame);
    }
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    println!("EXCEPTION: PAGE FAULT");
    println!("Accessed Address: {:?}", Cr2::read());
    println!("Error Code: {:?}", error_code);
    panic!("{:#?}", stack_frame);
}

extern "x86-interrupt" fn x87_floating_point_handler(stack_frame: InterruptStackFrame) {
    panic!("EXCEPTION: x87 FLOATING POINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn alignment_check_handler(stack_frame: InterruptStackFrame, error_code: u64) {
    panic!(
        "EXCEPTION: ALIGNMENT CHECK: code {}\n{:#?}",
        error_code, stack_frame
    );
}

extern "x86-interrupt" fn machine_check_handler(stack_frame: InterruptStackFrame) -> ! {
    panic!("EXCEPTION: MACHINE CHECK\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn simd_floating_point_handler(stack_frame: InterruptStackFrame) {
    panic!("EXCEPTION: SIMD FLOATING POINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn virtualization_handler(stack_frame: InterruptStackFrame) {
    panic!("EXCEPTION: VIRTUALIZATION\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn default_handler(stack_frame: InterruptStackFrame) {
    panic!("interrupt on unset gate\n{:#?}", stack_frame);
}
