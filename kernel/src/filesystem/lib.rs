// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the kernel's file systems: the on-disk SimpleFS format
//! and the virtual file system layer above it.
//!
//! [`simple_fs`] is a classical inode file system over a block device:
//! a superblock, a fixed region of inode blocks, data blocks, and
//! directory blocks laid out backwards from the end of the disk. Each
//! inode holds five direct block pointers and one indirect pointer.
//! There is no on-disk free-block map; an in-memory bitmap is
//! reconstructed on every mount.
//!
//! [`vfs`] is the POSIX-shaped façade the syscall layer talks to: a
//! mount table resolved by longest path prefix, a file-descriptor
//! table, and error normalisation onto the shared error enumeration.
//!
//! This crate performs no logging and no I/O beyond the
//! [`storage::BlockDevice`] contract, which keeps all of it testable
//! against a RAM-backed device.

#![no_std]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::inline_asm_x86_att_syntax)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]
#![forbid(unsafe_code)]

extern crate alloc;

pub mod path;
pub mod simple_fs;
pub mod vfs;
