// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The syscall entry point, reached via `INT 0x80`.
//!
//! The assembly stub pushes every general-purpose register on top of
//! the CPU-pushed interrupt frame, forming a [`SyscallRegisters`]
//! record on the stack, and hands a pointer to it to the installed
//! dispatcher. The dispatcher reads the syscall number from `rax` and
//! the arguments from `rdi`, `rsi`, `rdx` and `r10`, and writes the
//! result back to the record's `rax`, which the stub restores before
//! `iretq`.
//!
//! The dispatcher itself lives in the kernel crate (it needs the VFS);
//! it is installed at boot with [`set_syscall_dispatcher`]. A syscall
//! arriving before that is fatal.

use core::arch::global_asm;
use spin::Mutex;

/// The register state captured at syscall entry, in stack order.
///
/// The layout is fixed by the assembly stub: the general registers
/// first, then the interrupt number and error code pushed by the
/// stub, then the frame the CPU pushed.
///
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct SyscallRegisters {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub int_no: u64,
    pub err_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

global_asm!(
    r#"
.global syscall_entry
syscall_entry:
    push 0
    push 0x80
    push r15
    push r14
    push r13
    push r12
    push r11
    push r10
    push r9
    push r8
    push rbp
    push rdi
    push rsi
    push rdx
    push rcx
    push rbx
    push rax

    mov rdi, rsp
    call syscall_trampoline

    pop rax
    pop rbx
    pop rcx
    pop rdx
    pop rsi
    pop rdi
    pop rbp
    pop r8
    pop r9
    pop r10
    pop r11
    pop r12
    pop r13
    pop r14
    pop r15
    add rsp, 16
    iretq
"#
);

extern "C" {
    /// The assembly entry stub installed at vector 0x80.
    ///
    pub fn syscall_entry();
}

/// A function that executes one syscall, given the captured register
/// state.
///
pub type SyscallDispatcher = fn(&mut SyscallRegisters);

/// The installed dispatcher.
///
static DISPATCHER: Mutex<Option<SyscallDispatcher>> = Mutex::new(None);

/// Installs the syscall dispatcher. Called once at boot, before
/// interrupts are enabled.
///
pub fn set_syscall_dispatcher(dispatcher: SyscallDispatcher) {
    *DISPATCHER.lock() = Some(dispatcher);
}

/// Called by the entry stub with a pointer to the register record on
/// the stack.
///
/// # Panics
///
/// Panics if no dispatcher has been installed.
///
#[no_mangle]
extern "sysv64" fn syscall_trampoline(registers: *mut SyscallRegisters) {
    let dispatcher = *DISPATCHER.lock();
    match dispatcher {
        Some(dispatcher) => dispatcher(unsafe { &mut *registers }),
        None => panic!("syscall before the dispatcher was installed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn test_register_frame_layout() {
        // 15 general registers, the interrupt number and error code,
        // and the five-word CPU frame: 22 values of 8 bytes.
        assert_eq!(size_of::<SyscallRegisters>(), 176);
    }
}
