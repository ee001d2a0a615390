// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides the list of syscalls implemented by the BOSS kernel, along
//! with the error codes they can return.
//!
//! Syscalls are issued via `INT 0x80` with the syscall number in `rax`
//! and up to four arguments in `rdi`, `rsi`, `rdx` and `r10`. The result
//! is written back to `rax`: a non-negative value is the success payload,
//! a negative value is the negation of an [`Error`] code.

#![no_std]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::inline_asm_x86_att_syntax)]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::panic)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]
#![forbid(unsafe_code)]

/// The interrupt vector used to issue syscalls.
///
pub const SYSCALL_VECTOR: u8 = 0x80;

/// When passed to [`Syscall::Open`], the file is created if it does not
/// exist yet.
///
pub const OPEN_CREATE: u64 = 0x1;

/// The set of syscalls implemented by the BOSS kernel.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Syscall {
    /// Read from a file descriptor at an offset.
    Read = 0x00,

    /// Write to a file descriptor at an offset.
    Write = 0x01,

    /// Open a file, returning a new file descriptor.
    Open = 0x02,

    /// Close a file descriptor.
    Close = 0x03,

    /// Copy the current working directory into a buffer.
    Pwd = 0x4a,

    /// Change the current working directory.
    Cwd = 0x4b,

    /// Create a directory.
    Mkdir = 0x4e,

    /// Remove a directory and its contents.
    Rmdir = 0x4f,

    /// Remove a file (or delegate to rmdir for a directory).
    Rm = 0xaa,

    /// List the current directory.
    Ls = 0xab,
    // Ensure new values are added to check_numerical_conversion below.
}

impl Syscall {
    /// Returns the syscall with the given numerical value
    /// or None.
    ///
    pub fn from_u64(num: u64) -> Option<Self> {
        match num {
            0x00 => Some(Self::Read),
            0x01 => Some(Self::Write),
            0x02 => Some(Self::Open),
            0x03 => Some(Self::Close),
            0x4a => Some(Self::Pwd),
            0x4b => Some(Self::Cwd),
            0x4e => Some(Self::Mkdir),
            0x4f => Some(Self::Rmdir),
            0xaa => Some(Self::Rm),
            0xab => Some(Self::Ls),
            _ => None,
        }
    }
}

/// The set of error codes a syscall can return.
///
/// Codes start at 1 so that the negated form is always a strictly
/// negative integer.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Error {
    /// The file does not exist.
    NotExists = 1,

    /// The file is not an executable.
    NotExecutable = 2,

    /// Execution failed.
    FailedExecution = 3,

    /// Nothing is mounted.
    NothingMounted = 4,

    /// The file path is not valid.
    InvalidFilePath = 5,

    /// The file is a directory.
    Directory = 6,

    /// Invalid file descriptor.
    InvalidFileDescriptor = 7,

    /// The operation failed.
    Failed = 8,

    /// The file exists.
    Exists = 9,

    /// The buffer is too small.
    BufferSmall = 10,

    /// Unknown file system.
    InvalidFileSystem = 11,

    /// The disk is full.
    DiskFull = 12,

    /// Permission denied.
    PermissionDenied = 13,

    /// The offset is not valid.
    InvalidOffset = 14,

    /// Unsupported operation.
    Unsupported = 15,

    /// The count is not valid.
    InvalidCount = 16,

    /// The request is not valid.
    InvalidRequest = 17,

    /// The device is not valid for this request.
    InvalidDevice = 18,

    /// Something is already mounted.
    AlreadyMounted = 19,

    /// Unknown error.
    Unknown = 20,
    // Ensure new values are added to check_numerical_conversion below.
}

impl Error {
    /// Returns the error with the given numerical value
    /// or None.
    ///
    pub fn from_u64(num: u64) -> Option<Self> {
        match num {
            1 => Some(Self::NotExists),
            2 => Some(Self::NotExecutable),
            3 => Some(Self::FailedExecution),
            4 => Some(Self::NothingMounted),
            5 => Some(Self::InvalidFilePath),
            6 => Some(Self::Directory),
            7 => Some(Self::InvalidFileDescriptor),
            8 => Some(Self::Failed),
            9 => Some(Self::Exists),
            10 => Some(Self::BufferSmall),
            11 => Some(Self::InvalidFileSystem),
            12 => Some(Self::DiskFull),
            13 => Some(Self::PermissionDenied),
            14 => Some(Self::InvalidOffset),
            15 => Some(Self::Unsupported),
            16 => Some(Self::InvalidCount),
            17 => Some(Self::InvalidRequest),
            18 => Some(Self::InvalidDevice),
            19 => Some(Self::AlreadyMounted),
            20 => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Returns a human-readable description of the error.
    ///
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotExists => "the file does not exist",
            Self::NotExecutable => "the file is not an executable",
            Self::FailedExecution => "execution failed",
            Self::NothingMounted => "nothing is mounted",
            Self::InvalidFilePath => "the file path is not valid",
            Self::Directory => "the file is a directory",
            Self::InvalidFileDescriptor => "invalid file descriptor",
            Self::Failed => "failed",
            Self::Exists => "the file exists",
            Self::BufferSmall => "the buffer is too small",
            Self::InvalidFileSystem => "unknown file system",
            Self::DiskFull => "the disk is full",
            Self::PermissionDenied => "permission denied",
            Self::InvalidOffset => "the offset is not valid",
            Self::Unsupported => "unsupported operation",
            Self::InvalidCount => "the count is not valid",
            Self::InvalidRequest => "the request is not valid",
            Self::InvalidDevice => "the device is not valid for this request",
            Self::AlreadyMounted => "something is already mounted",
            Self::Unknown => "unknown error occurred",
        }
    }
}

/// The result type produced by the kernel's syscall implementations.
///
pub type SysResult = Result<u64, Error>;

/// Maps a syscall result onto the single integer written back to the
/// caller's `rax`: `Ok(v)` becomes `v`, `Err(k)` becomes `-k`.
///
pub fn return_value(result: SysResult) -> i64 {
    match result {
        Ok(value) => value as i64,
        Err(error) => -(error as i64),
    }
}

/// Recovers a syscall result from the integer in `rax`.
///
pub fn from_return_value(value: i64) -> SysResult {
    if value >= 0 {
        Ok(value as u64)
    } else {
        Err(Error::from_u64((-value) as u64).unwrap_or(Error::Unknown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_numerical_conversion() {
        let syscalls = [
            Syscall::Read,
            Syscall::Write,
            Syscall::Open,
            Syscall::Close,
            Syscall::Pwd,
            Syscall::Cwd,
            Syscall::Mkdir,
            Syscall::Rmdir,
            Syscall::Rm,
            Syscall::Ls,
        ];

        for syscall in syscalls.iter().copied() {
            assert_eq!(Some(syscall), Syscall::from_u64(syscall as u64));
        }

        for num in 1..=20u64 {
            let error = Error::from_u64(num).unwrap();
            assert_eq!(error as u64, num);
        }

        assert_eq!(Error::from_u64(0), None);
        assert_eq!(Error::from_u64(21), None);
    }

    #[test]
    fn check_return_values() {
        assert_eq!(return_value(Ok(0)), 0);
        assert_eq!(return_value(Ok(1234)), 1234);
        assert_eq!(return_value(Err(Error::NotExists)), -1);
        assert_eq!(return_value(Err(Error::Unknown)), -20);

        assert_eq!(from_return_value(5), Ok(5));
        assert_eq!(from_return_value(-7), Err(Error::InvalidFileDescriptor));
        assert_eq!(from_return_value(-9999), Err(Error::Unknown));
    }
}
