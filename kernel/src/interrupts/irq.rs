// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Dispatches hardware IRQs delivered through the PIC.
//!
//! The PIC's IRQs are registered with [`set_irq_handler`] rather than
//! by writing IDT entries directly, so drivers do not need to know
//! the remapping details. The dispatcher sends the end-of-interrupt
//! signal before invoking the registered handler, which permits
//! re-entry on another line while the handler runs.

use crate::{PICS, PIC_1_OFFSET};
use x86_64::instructions::interrupts::without_interrupts;
use x86_64::structures::idt::{HandlerFunc, InterruptStackFrame};

/// Irq represents an IRQ number in the range [0, 15].
///
#[derive(Clone, Copy, Debug)]
pub struct Irq(u8);

impl Irq {
    /// Returns an IRQ if within the range [0, 15], or None otherwise.
    ///
    pub const fn new(irq: u8) -> Option<Irq> {
        if irq <= 15 {
            Some(Irq(irq))
        } else {
            None
        }
    }

    /// Returns an IRQ if within the range [0, 15], or panics
    /// otherwise.
    ///
    pub const fn new_unsafe(irq: u8) -> Irq {
        if irq > 15 {
            panic!("invalid IRQ larger than 15");
        }

        Irq(irq)
    }

    /// Returns the IRQ in the range [0, 15].
    ///
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Returns the IRQ in the range [0, 15].
    ///
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    /// Returns the IRQ as its vector in the [Interrupt Descriptor Table](https://en.wikipedia.org/wiki/Interrupt_descriptor_table) (IDT).
    ///
    pub fn interrupt_id(&self) -> u8 {
        self.0 + PIC_1_OFFSET as u8
    }

    /// Informs the programmable interrupt controller that the
    /// IRQ has been handled.
    ///
    fn acknowledge(&self) {
        unsafe {
            PICS.lock().notify_end_of_interrupt(self.interrupt_id());
        }
    }
}

/// Represents an IRQ handler function.
///
pub type IrqHandler = fn(frame: InterruptStackFrame, irq: Irq);

/// The registered IRQ handlers.
///
static IRQS: spin::Mutex<[Option<IrqHandler>; 16]> = spin::Mutex::new([None; 16]);

/// Sets the handler for the given IRQ, overwriting any previous
/// handler, and unmasks its PIC line.
///
/// There is no way to remove a handler; interrupts the kernel has
/// stopped caring about keep their last handler.
///
pub fn set_irq_handler(irq: Irq, handler: IrqHandler) {
    without_interrupts(|| {
        let mut irqs = IRQS.lock();
        irqs[irq.as_usize()] = Some(handler);

        // Enable the PIC line.
        let mut pics = PICS.lock();
        let mut masks = unsafe { pics.read_masks() };
        let (pic, line) = if irq.as_u8() < 8 {
            (0, irq.as_u8())
        } else {
            (1, irq.as_u8() - 8)
        };

        masks[pic] &= !(1 << line);

        // We have to unmask the link between the
        // PICs to unmask the second PIC.
        if pic == 1 {
            masks[0] &= !(1 << 2);
        }

        unsafe { pics.write_masks(masks[0], masks[1]) };
    });
}

// IRQ handlers.

#[inline]
fn irq_handler_generic(frame: InterruptStackFrame, irq: Irq) {
    // EOI goes out first, so another line can preempt the handler.
    irq.acknowledge();

    let handler = IRQS.lock()[irq.as_usize()];
    match handler {
        Some(handler) => handler(frame, irq),
        None => panic!("IRQ {:?} arrived with no registered handler", irq),
    }
}

pub(super) const IRQ_HANDLERS: [HandlerFunc; 16] = [
    irq_handler_0,
    irq_handler_1,
    irq_handler_2,
    irq_handler_3,
    irq_handler_4,
    irq_handler_5,
    irq_handler_6,
    irq_handler_7,
    irq_handler_8,
    irq_handler_9,
    irq_handler_10,
    irq_handler_11,
    irq_handler_12,
    irq_handler_13,
    irq_handler_14,
    irq_handler_15,
];

extern "x86-interrupt" fn irq_handler_0(frame: InterruptStackFrame) {
    irq_handler_generic(frame, Irq(0u8));
}

extern "x86-interrupt" fn irq_handler_1(frame: InterruptStackFrame) {
    irq_handler_generic(frame, Irq(1u8));
}

extern "x86-interrupt" fn irq_handler_2(frame: InterruptStackFrame) {
    irq_handler_generic(frame, Irq(2u8));
}

extern "x86-interrupt" fn irq_handler_3(frame: InterruptStackFrame) {
    irq_handler_generic(frame, Irq(3u8));
}

extern "x86-interrupt" fn irq_handler_4(frame: InterruptStackFrame) {
    irq_handler_generic(frame, Irq(4u8));
}

extern "x86-interrupt" fn irq_handler_5(frame: InterruptStackFrame) {
    irq_handler_generic(frame, Irq(5u8));
}

extern "x86-interrupt" fn irq_handler_6(frame: InterruptStackFrame) {
    irq_handler_generic(frame, Irq(6u8));
}

extern "x86-interrupt" fn irq_handler_7(frame: InterruptStackFrame) {
    irq_handler_generic(frame, Irq(7u8));
}

extern "x86-interrupt" fn irq_handler_8(frame: InterruptStackFrame) {
    irq_handler_generic(frame, Irq(8u8));
}

extern "x86-interrupt" fn irq_handler_9(frame: InterruptStackFrame) {
    irq_handler_generic(frame, Irq(9u8));
}

extern "x86-interrupt" fn irq_handler_10(frame: InterruptStackFrame) {
    irq_handler_generic(frame, Irq(10u8));
}

extern "x86-interrupt" fn irq_handler_11(frame: InterruptStackFrame) {
    irq_handler_generic(frame, Irq(11u8));
}

extern "x86-interrupt" fn irq_handler_12(frame: InterruptStackFrame) {
    irq_handler_generic(frame, Irq(12u8));
}

extern "x86-interrupt" fn irq_handler_13(frame: InterruptStackFrame) {
    irq_handler_generic(frame, Irq(13u8));
}

extern "x86-interrupt" fn irq_handler_14(frame: InterruptStackFrame) {
    irq_handler_generic(frame, Irq(14u8));
}

extern "x86-interrupt" fn irq_handler_15(frame: InterruptStackFrame) {
    irq_handler_generic(frame, Irq(15u8));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_irq_numbering() {
        assert!(Irq::new(0).is_some());
        assert!(Irq::new(15).is_some());
        assert!(Irq::new(16).is_none());

        // IRQ 0 lands at the remapped base, IRQ 14 (the primary ATA
        // channel) at vector 0x2E.
        assert_eq!(Irq::new_unsafe(0).interrupt_id(), 0x20);
        assert_eq!(Irq::new_unsafe(14).interrupt_id(), 0x2e);
        assert_eq!(Irq::new_unsafe(15).interrupt_id(), 0x2f);
    }
}
