// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The kernel's syscall implementations.
//!
//! Syscalls arrive through the `INT 0x80` entry in the interrupts
//! crate, which captures the caller's registers and invokes the
//! dispatcher installed here. The dispatcher indexes a 256-entry
//! table by the number in `rax`; arguments are read from `rdi`,
//! `rsi`, `rdx` and `r10`, and the result is written back to `rax`
//! as `ok(v) -> v`, `err(k) -> -k`.
//!
//! Pointer arguments are dereferenced directly: with a single address
//! space and no privilege separation at runtime, the caller's memory
//! is the kernel's memory. Paths are NUL-terminated strings with a
//! bounded length.

use filesystem::vfs;
use interrupts::SyscallRegisters;
use serial::println;
use spin::Mutex;
use syscalls::{return_value, Error, Syscall, SysResult};

/// The longest accepted path, including the terminator.
///
const MAX_PATH: usize = 1024;

/// A single syscall implementation.
///
type SyscallHandler = fn(&mut SyscallRegisters);

/// The syscall table, indexed by syscall number.
///
static SYSCALL_TABLE: Mutex<[Option<SyscallHandler>; 256]> = Mutex::new([None; 256]);

/// Populates the syscall table and installs the dispatcher.
///
pub fn init() {
    {
        let mut table = SYSCALL_TABLE.lock();
        table[Syscall::Read as usize] = Some(sc_read as SyscallHandler);
        table[Syscall::Write as usize] = Some(sc_write as SyscallHandler);
        table[Syscall::Open as usize] = Some(sc_open as SyscallHandler);
        table[Syscall::Close as usize] = Some(sc_close as SyscallHandler);
        table[Syscall::Pwd as usize] = Some(sc_pwd as SyscallHandler);
        table[Syscall::Cwd as usize] = Some(sc_cwd as SyscallHandler);
        table[Syscall::Mkdir as usize] = Some(sc_mkdir as SyscallHandler);
        table[Syscall::Rmdir as usize] = Some(sc_rmdir as SyscallHandler);
        table[Syscall::Rm as usize] = Some(sc_rm as SyscallHandler);
        table[Syscall::Ls as usize] = Some(sc_ls as SyscallHandler);
    }

    interrupts::set_syscall_dispatcher(dispatch);
}

/// Looks the syscall up in the table and runs it.
///
/// # Panics
///
/// An unknown syscall number is fatal.
///
fn dispatch(regs: &mut SyscallRegisters) {
    let num = regs.rax as usize;
    let handler = if num < 256 {
        SYSCALL_TABLE.lock()[num]
    } else {
        None
    };

    match handler {
        Some(handler) => handler(regs),
        None => panic!("unknown system call {:#x}", regs.rax),
    }
}

/// Reads a NUL-terminated path from the caller.
///
unsafe fn user_path<'path>(ptr: u64) -> Result<&'path str, Error> {
    if ptr == 0 {
        return Err(Error::InvalidRequest);
    }

    let base = ptr as *const u8;
    for len in 0..MAX_PATH {
        if *base.add(len) == 0 {
            let bytes = core::slice::from_raw_parts(base, len);
            return core::str::from_utf8(bytes).map_err(|_| Error::InvalidFilePath);
        }
    }

    Err(Error::InvalidFilePath)
}

fn unit(result: Result<(), Error>) -> SysResult {
    result.map(|_| 0)
}

// The handlers. Each reads the fixed argument registers and writes
// its mapped result to rax.

fn sc_read(regs: &mut SyscallRegisters) {
    let result = if regs.rsi == 0 {
        Err(Error::InvalidRequest)
    } else {
        let buf = unsafe { core::slice::from_raw_parts_mut(regs.rsi as *mut u8, regs.rdx as usize) };
        vfs::with_vfs(|vfs| vfs.read(regs.rdi, buf, regs.rdx as usize, regs.r10 as usize))
    };

    regs.rax = return_value(result) as u64;
}

fn sc_write(regs: &mut SyscallRegisters) {
    let result = if regs.rsi == 0 {
        Err(Error::InvalidRequest)
    } else {
        let buf = unsafe { core::slice::from_raw_parts(regs.rsi as *const u8, regs.rdx as usize) };
        vfs::with_vfs(|vfs| vfs.write(regs.rdi, buf, regs.rdx as usize, regs.r10 as usize))
    };

    regs.rax = return_value(result) as u64;
}

fn sc_open(regs: &mut SyscallRegisters) {
    let result = unsafe { user_path(regs.rdi) }
        .and_then(|path| vfs::with_vfs(|vfs| vfs.open(path, regs.rsi)));

    regs.rax = return_value(result) as u64;
}

fn sc_close(regs: &mut SyscallRegisters) {
    vfs::with_vfs(|vfs| vfs.close(regs.rdi));
    regs.rax = 0;
}

fn sc_pwd(regs: &mut SyscallRegisters) {
    let path = vfs::with_vfs(|vfs| vfs.pwd());

    // The caller's buffer receives the path plus a terminator; its
    // capacity is the caller's promise.
    let buf = regs.rdi as *mut u8;
    unsafe {
        for (i, byte) in path.bytes().enumerate() {
            *buf.add(i) = byte;
        }
        *buf.add(path.len()) = 0;
    }

    regs.rax = 0;
}

fn sc_cwd(regs: &mut SyscallRegisters) {
    let result = unsafe { user_path(regs.rdi) }
        .and_then(|path| vfs::with_vfs(|vfs| vfs.cd(path)));

    regs.rax = return_value(unit(result)) as u64;
}

fn sc_mkdir(regs: &mut SyscallRegisters) {
    let result = unsafe { user_path(regs.rdi) }
        .and_then(|path| vfs::with_vfs(|vfs| vfs.mkdir(path)));

    regs.rax = return_value(unit(result)) as u64;
}

fn sc_rmdir(regs: &mut SyscallRegisters) {
    let result = unsafe { user_path(regs.rdi) }
        .and_then(|path| vfs::with_vfs(|vfs| vfs.rmdir(path)));

    regs.rax = return_value(unit(result)) as u64;
}

fn sc_rm(regs: &mut SyscallRegisters) {
    let result = unsafe { user_path(regs.rdi) }
        .and_then(|path| vfs::with_vfs(|vfs| vfs.rm(path)));

    regs.rax = return_value(unit(result)) as u64;
}

fn sc_ls(regs: &mut SyscallRegisters) {
    let result = vfs::with_vfs(|vfs| vfs.ls()).map(|entries| {
        crate::vga_println!("   inum    |       name       | type");
        for entry in entries.iter() {
            let kind = if entry.is_file { "file" } else { "dir" };
            crate::vga_println!("{:<10} | {:<16} | {:<5}", entry.inum, entry.name, kind);
            println!("{:<10} | {:<16} | {:<5}", entry.inum, entry.name, kind);
        }

        0
    });

    regs.rax = return_value(result) as u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_population() {
        init();

        let table = SYSCALL_TABLE.lock();
        let expected = [
            Syscall::Read as usize,
            Syscall::Write as usize,
            Syscall::Open as usize,
            Syscall::Close as usize,
            Syscall::Pwd as usize,
            Syscall::Cwd as usize,
            Syscall::Mkdir as usize,
            Syscall::Rmdir as usize,
            Syscall::Rm as usize,
            Syscall::Ls as usize,
        ];

        for (i, slot) in table.iter().enumerate() {
            assert_eq!(slot.is_some(), expected.contains(&i), "slot {:#x}", i);
        }
    }

    #[test]
    fn test_user_path() {
        let path = b"/some/file\0";
        let parsed = unsafe { user_path(path.as_ptr() as u64) };
        assert_eq!(parsed, Ok("/some/file"));

        assert_eq!(
            unsafe { user_path(0) },
            Err(Error::InvalidRequest)
        );
    }
}
