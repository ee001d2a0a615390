// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! SimpleFS: an inode file system over a block device.
//!
//! Files are identified by inode number. An inode holds five direct
//! block pointers plus one indirect pointer, so the largest file is
//! `(5 + 128) * 512` bytes. Block pointer zero is the null pointer.
//!
//! Directories are fixed-size records packed into blocks allocated
//! backwards from the end of the disk; the root directory lives in the
//! last block at offset zero. A directory's `inum` encodes its
//! location, not an inode.
//!
//! There is no on-disk free-block map. [`SimpleFs::mount`] rebuilds an
//! in-memory occupancy bitmap by scanning the superblock, every valid
//! inode's pointers, and every indirect block, and counts the live
//! inodes and directory records per block while it is at it.
//!
//! The current directory is cached in memory, so directory operations
//! resolve names against it without a disk read.

pub mod layout;

use crate::vfs::{FileInfo, FileSystem};
use alloc::string::ToString;
use alloc::vec;
use alloc::vec::Vec;
use bitmap_index::Bitmap;
use core::cmp::min;
use layout::{
    encode_name, Block, Directory, Dirent, Inode, SuperBlock, DIR_PER_BLOCK, ENTRIES_PER_DIR,
    INODES_PER_BLOCK, MAGIC_NUMBER, MAX_FILE_SIZE, POINTERS_PER_BLOCK, POINTERS_PER_INODE,
};
use storage::{BlockDevice, BLOCK_SIZE};
use syscalls::Error;

/// A SimpleFS file system over a block device.
///
pub struct SimpleFs<D: BlockDevice> {
    disk: D,

    // meta mirrors the on-disk superblock once mounted.
    meta: SuperBlock,

    // occupied has one bit per disk block; set means in use.
    // Reconstructed on every mount, never persisted.
    occupied: Bitmap,

    // inode_counter[i] is the number of valid inodes in inode block
    // i + 1; dir_counter[i] the number of valid directory records in
    // the i'th directory block from the end of the disk.
    inode_counter: Vec<u32>,
    dir_counter: Vec<u32>,

    curr_dir: Directory,
    mounted: bool,
}

impl<D: BlockDevice> SimpleFs<D> {
    /// Returns an unmounted file system over `disk`.
    ///
    pub fn new(disk: D) -> Self {
        SimpleFs {
            disk,
            meta: SuperBlock::default(),
            occupied: Bitmap::new_unset(0),
            inode_counter: Vec::new(),
            dir_counter: Vec::new(),
            curr_dir: Directory::default(),
            mounted: false,
        }
    }

    fn check_mounted(&self) {
        if !self.mounted {
            panic!("file system operation before mount");
        }
    }

    fn read_block(&mut self, index: u32) -> Block {
        let mut block = Block::new();
        self.disk.read(index as usize, &mut block.data);
        block
    }

    fn write_block(&mut self, index: u32, block: &Block) {
        self.disk.write(index as usize, &block.data);
    }

    /// Returns the disk block holding the `block_idx`th directory
    /// block, counting backwards from the end of the disk.
    ///
    fn dir_block(&self, block_idx: u32) -> u32 {
        self.meta.blocks - 1 - block_idx
    }

    /// Writes a fresh, empty file system to the disk: superblock,
    /// zeroed inode, data and directory blocks, and a root directory
    /// `/` whose `.` and `..` entries both point at inode 0.
    ///
    /// # Panics
    ///
    /// `format` panics if the disk is mounted.
    ///
    pub fn format(&mut self) {
        if self.disk.is_mounted() {
            panic!("cannot format a mounted disk");
        }

        let sb = SuperBlock::for_disk(self.disk.num_blocks() as u32);

        let mut block = Block::new();
        block.set_super_block(&sb);
        self.write_block(0, &block);

        let empty = Block::new();
        for i in 1..=sb.inode_blocks {
            self.write_block(i, &empty);
        }
        for i in sb.data_start..sb.data_end {
            self.write_block(i, &empty);
        }
        for i in sb.dir_start..sb.blocks {
            self.write_block(i, &empty);
        }

        let mut root = Directory {
            valid: true,
            inum: 0,
            name: encode_name("/").expect("the root name fits"),
            table: [Dirent::default(); ENTRIES_PER_DIR],
        };
        root.table[0] = Dirent {
            is_file: false,
            valid: true,
            inum: 0,
            name: encode_name(".").expect("the dot name fits"),
        };
        root.table[1] = Dirent {
            is_file: false,
            valid: true,
            inum: 0,
            name: encode_name("..").expect("the dot-dot name fits"),
        };

        let mut block = Block::new();
        block.set_directory(0, &root);
        self.write_block(sb.blocks - 1, &block);
    }

    /// Returns whether the disk carries a SimpleFS superblock.
    ///
    pub fn is_formatted(&mut self) -> bool {
        self.read_block(0).super_block().magic == MAGIC_NUMBER
    }

    /// Mounts the file system: validates the superblock, rebuilds the
    /// occupancy bitmap and the inode and directory counters, and
    /// caches the root as the current directory.
    ///
    /// # Panics
    ///
    /// `mount` panics if the disk is already mounted, or if the
    /// superblock does not match a freshly computed one for the disk's
    /// size (a corrupt file system is not recoverable).
    ///
    pub fn mount(&mut self) {
        if self.disk.is_mounted() {
            panic!("disk is already mounted");
        }

        let sb = self.read_block(0).super_block();
        if sb.magic != MAGIC_NUMBER {
            panic!("invalid file system magic number {:#x}", sb.magic);
        }

        let expected = SuperBlock::for_disk(self.disk.num_blocks() as u32);
        if !sb.same_geometry(&expected) {
            panic!("corrupt superblock: geometry does not match the disk");
        }

        self.disk.mount();
        self.meta = sb;

        // Rebuild the occupancy bitmap from the inode table.
        self.occupied = Bitmap::new_unset(sb.blocks as usize);
        self.occupied.set(0);

        self.inode_counter = vec![0u32; sb.inode_blocks as usize];
        for i in 1..=sb.inode_blocks {
            let block = self.read_block(i);
            for j in 0..INODES_PER_BLOCK {
                let inode = block.inode(j);
                if !inode.valid {
                    continue;
                }

                self.inode_counter[(i - 1) as usize] += 1;
                self.occupied.set(i as usize);

                for ptr in inode.direct.iter() {
                    if *ptr != 0 {
                        if *ptr >= sb.data_end {
                            panic!("data pointer {} out of bounds", ptr);
                        }
                        self.occupied.set(*ptr as usize);
                    }
                }

                if inode.indirect != 0 {
                    if inode.indirect >= sb.data_end {
                        panic!("indirect pointer {} out of bounds", inode.indirect);
                    }
                    self.occupied.set(inode.indirect as usize);

                    let indirect = self.read_block(inode.indirect);
                    for k in 0..POINTERS_PER_BLOCK {
                        let ptr = indirect.pointer(k);
                        if ptr != 0 {
                            if ptr >= sb.data_end {
                                panic!("indirect target {} out of bounds", ptr);
                            }
                            self.occupied.set(ptr as usize);
                        }
                    }
                }
            }
        }

        // Count the live directory records and cache the root.
        self.dir_counter = vec![0u32; sb.dir_blocks as usize];
        for dirs in 0..sb.dir_blocks {
            let block = self.read_block(self.dir_block(dirs));
            for offset in 0..DIR_PER_BLOCK {
                if block.directory(offset).valid {
                    self.dir_counter[dirs as usize] += 1;
                }
            }

            if dirs == 0 {
                self.curr_dir = block.directory(0);
            }
        }

        self.mounted = true;
    }

    /// Returns the mounted superblock.
    ///
    pub fn metadata(&self) -> &SuperBlock {
        &self.meta
    }

    // Inode management.

    /// Allocates a fresh inode and returns its number, or `None` when
    /// the inode table is full.
    ///
    fn create_inode(&mut self) -> Option<u32> {
        self.check_mounted();

        for i in 1..=self.meta.inode_blocks {
            if self.inode_counter[(i - 1) as usize] == INODES_PER_BLOCK as u32 {
                continue;
            }

            let mut block = self.read_block(i);
            for j in 0..INODES_PER_BLOCK {
                if block.inode(j).valid {
                    continue;
                }

                let mut inode = Inode::default();
                inode.valid = true;
                block.set_inode(j, &inode);

                self.occupied.set(i as usize);
                self.inode_counter[(i - 1) as usize] += 1;
                self.write_block(i, &block);

                return Some((i - 1) * INODES_PER_BLOCK as u32 + j as u32);
            }
        }

        None
    }

    /// Loads the inode with the given number, or `None` if the number
    /// is out of range or the inode is not valid.
    ///
    fn load_inode(&mut self, inumber: u32) -> Option<Inode> {
        self.check_mounted();

        if inumber >= self.meta.inodes {
            return None;
        }

        let i = (inumber as usize) / INODES_PER_BLOCK;
        let j = (inumber as usize) % INODES_PER_BLOCK;

        if self.inode_counter[i] == 0 {
            return None;
        }

        let block = self.read_block(i as u32 + 1);
        let inode = block.inode(j);
        if inode.valid {
            Some(inode)
        } else {
            None
        }
    }

    /// Writes `inode` into its slot in the inode table.
    ///
    fn save_inode(&mut self, inumber: u32, inode: &Inode) {
        let i = (inumber as usize) / INODES_PER_BLOCK;
        let j = (inumber as usize) % INODES_PER_BLOCK;

        let mut block = self.read_block(i as u32 + 1);
        block.set_inode(j, inode);
        self.write_block(i as u32 + 1, &block);
    }

    /// Removes an inode: frees its direct blocks, its indirect block
    /// and every indirect target, and invalidates it on disk.
    ///
    fn remove_inode(&mut self, inumber: u32) -> bool {
        self.check_mounted();

        let mut node = match self.load_inode(inumber) {
            Some(node) => node,
            None => return false,
        };

        node.valid = false;
        node.size = 0;

        let inode_block = (inumber as usize) / INODES_PER_BLOCK;
        self.inode_counter[inode_block] -= 1;
        if self.inode_counter[inode_block] == 0 {
            self.occupied.unset(inode_block + 1);
        }

        for ptr in node.direct.iter_mut() {
            if *ptr != 0 {
                self.occupied.unset(*ptr as usize);
                *ptr = 0;
            }
        }

        if node.indirect != 0 {
            let indirect = self.read_block(node.indirect);
            self.occupied.unset(node.indirect as usize);
            node.indirect = 0;

            for k in 0..POINTERS_PER_BLOCK {
                let ptr = indirect.pointer(k);
                if ptr != 0 {
                    self.occupied.unset(ptr as usize);
                }
            }
        }

        self.save_inode(inumber, &node);
        true
    }

    /// Returns the logical size of the file with the given inode
    /// number.
    ///
    pub fn stat(&mut self, inumber: u32) -> Result<u32, Error> {
        self.check_mounted();

        match self.load_inode(inumber) {
            Some(node) => Ok(node.size),
            None => Err(Error::NotExists),
        }
    }

    /// Allocates the first free data block, marking it occupied.
    /// Returns 0 (the null pointer) when the disk is full.
    ///
    fn allocate_block(&mut self) -> u32 {
        self.check_mounted();

        match self
            .occupied
            .next_unset_in(self.meta.data_start as usize, self.meta.data_end as usize)
        {
            Some(block) => {
                self.occupied.set(block);
                block as u32
            }
            None => 0,
        }
    }

    // File data.

    /// Reads up to `length` bytes from the file at byte `offset` into
    /// `data`.
    ///
    /// The length is clamped to the file size. Streaming stops early
    /// at the first null block pointer; the number of bytes actually
    /// copied is returned.
    ///
    pub fn read(
        &mut self,
        inumber: u32,
        data: &mut [u8],
        length: usize,
        offset: usize,
    ) -> Result<usize, Error> {
        self.check_mounted();

        let node = self.load_inode(inumber).ok_or(Error::NotExists)?;

        let size = node.size as usize;
        if offset >= size {
            return Ok(0);
        }

        let length = min(min(length, size - offset), data.len());

        let mut copied = 0;
        let mut block_index = offset / BLOCK_SIZE;
        let mut block_offset = offset % BLOCK_SIZE;
        let mut indirect: Option<Block> = None;

        while copied < length {
            let ptr = if block_index < POINTERS_PER_INODE {
                node.direct[block_index]
            } else {
                if node.indirect == 0 {
                    break;
                }

                let idx = block_index - POINTERS_PER_INODE;
                if idx >= POINTERS_PER_BLOCK {
                    break;
                }

                if indirect.is_none() {
                    indirect = Some(self.read_block(node.indirect));
                }
                indirect.as_ref().expect("indirect block loaded").pointer(idx)
            };

            if ptr == 0 {
                break;
            }

            let block = self.read_block(ptr);
            let n = min(BLOCK_SIZE - block_offset, length - copied);
            data[copied..copied + n].copy_from_slice(&block.data[block_offset..block_offset + n]);

            copied += n;
            block_offset = 0;
            block_index += 1;
        }

        Ok(copied)
    }

    /// Writes up to `length` bytes from `data` to the file at byte
    /// `offset`, allocating data blocks (and the indirect block) on
    /// demand.
    ///
    /// If the inode is not valid yet, it is created in place. The file
    /// size grows to `max(size, offset + length)`. When the disk
    /// fills, the write is truncated: the inode is persisted with the
    /// bytes actually written and the short count is returned.
    ///
    pub fn write(
        &mut self,
        inumber: u32,
        data: &[u8],
        length: usize,
        offset: usize,
    ) -> Result<usize, Error> {
        self.check_mounted();

        let length = min(length, data.len());
        if length + offset > MAX_FILE_SIZE {
            return Err(Error::InvalidOffset);
        }

        if inumber >= self.meta.inodes {
            return Err(Error::NotExists);
        }

        let mut node = match self.load_inode(inumber) {
            Some(mut node) => {
                node.size = node.size.max((offset + length) as u32);
                node
            }
            None => {
                // Create the inode in place.
                let inode_block = (inumber as usize) / INODES_PER_BLOCK;
                self.inode_counter[inode_block] += 1;
                self.occupied.set(inode_block + 1);

                let mut node = Inode::default();
                node.valid = true;
                node.size = (offset + length) as u32;
                node
            }
        };

        let mut written = 0;
        let mut block_index = offset / BLOCK_SIZE;
        let mut block_offset = offset % BLOCK_SIZE;
        let mut indirect: Option<Block> = None;
        let mut indirect_dirty = false;

        while written < length {
            let ptr = if block_index < POINTERS_PER_INODE {
                if node.direct[block_index] == 0 {
                    let fresh = self.allocate_block();
                    if fresh == 0 {
                        return self.finish_short_write(
                            inumber,
                            node,
                            offset,
                            written,
                            indirect,
                            indirect_dirty,
                        );
                    }
                    node.direct[block_index] = fresh;
                }
                node.direct[block_index]
            } else {
                if node.indirect == 0 {
                    let fresh = self.allocate_block();
                    if fresh == 0 {
                        return self.finish_short_write(
                            inumber,
                            node,
                            offset,
                            written,
                            indirect,
                            indirect_dirty,
                        );
                    }
                    node.indirect = fresh;
                    indirect = Some(Block::new());
                    indirect_dirty = true;
                } else if indirect.is_none() {
                    indirect = Some(self.read_block(node.indirect));
                }

                let idx = block_index - POINTERS_PER_INODE;
                let current = indirect.as_ref().expect("indirect block loaded").pointer(idx);
                if current == 0 {
                    let fresh = self.allocate_block();
                    if fresh == 0 {
                        return self.finish_short_write(
                            inumber,
                            node,
                            offset,
                            written,
                            indirect,
                            indirect_dirty,
                        );
                    }
                    indirect
                        .as_mut()
                        .expect("indirect block loaded")
                        .set_pointer(idx, fresh);
                    indirect_dirty = true;
                }

                indirect.as_ref().expect("indirect block loaded").pointer(idx)
            };

            // Whole-block writes skip the read; partial writes keep
            // the surrounding bytes.
            let n = min(BLOCK_SIZE - block_offset, length - written);
            let mut block = if n == BLOCK_SIZE {
                Block::new()
            } else {
                self.read_block(ptr)
            };
            block.data[block_offset..block_offset + n].copy_from_slice(&data[written..written + n]);
            self.write_block(ptr, &block);

            written += n;
            block_offset = 0;
            block_index += 1;
        }

        if indirect_dirty {
            let block = indirect.take().expect("indirect block loaded");
            self.write_block(node.indirect, &block);
        }

        self.save_inode(inumber, &node);
        Ok(written)
    }

    /// Persists a truncated write: the inode's size becomes the bytes
    /// actually written past `offset`.
    ///
    fn finish_short_write(
        &mut self,
        inumber: u32,
        mut node: Inode,
        offset: usize,
        written: usize,
        indirect: Option<Block>,
        indirect_dirty: bool,
    ) -> Result<usize, Error> {
        node.size = (offset + written) as u32;

        if indirect_dirty {
            if let Some(block) = indirect {
                self.write_block(node.indirect, &block);
            }
        }

        self.save_inode(inumber, &node);
        Ok(written)
    }

    // Directories.

    /// Returns a copy of `dir` with a new entry added in its first
    /// free table slot, or `None` if the table is full or the name
    /// does not fit.
    ///
    fn add_dir_entry(dir: &Directory, inum: u32, is_file: bool, name: &str) -> Option<Directory> {
        let name = encode_name(name)?;

        let mut updated = *dir;
        for entry in updated.table.iter_mut() {
            if !entry.valid {
                *entry = Dirent {
                    is_file,
                    valid: true,
                    inum,
                    name,
                };
                return Some(updated);
            }
        }

        None
    }

    /// Looks `name` up in `dir`'s table, returning its offset.
    ///
    fn dir_lookup(dir: &Directory, name: &str) -> Option<usize> {
        dir.table
            .iter()
            .position(|entry| entry.valid && entry.name() == name)
    }

    /// Reads the directory record referenced by entry `offset` of the
    /// current directory.
    ///
    fn read_dir_from_offset(&mut self, offset: usize) -> Option<Directory> {
        if offset >= ENTRIES_PER_DIR {
            return None;
        }

        let entry = self.curr_dir.table[offset];
        if !entry.valid || entry.is_file {
            return None;
        }

        let block_idx = entry.inum / DIR_PER_BLOCK as u32;
        let block_offset = (entry.inum as usize) % DIR_PER_BLOCK;

        let block = self.read_block(self.dir_block(block_idx));
        let dir = block.directory(block_offset);
        if dir.valid {
            Some(dir)
        } else {
            None
        }
    }

    /// Writes `dir` back to its slot, located by its `inum`.
    ///
    fn write_dir_back(&mut self, dir: &Directory) {
        let block_idx = dir.inum / DIR_PER_BLOCK as u32;
        let block_offset = (dir.inum as usize) % DIR_PER_BLOCK;

        let disk_block = self.dir_block(block_idx);
        let mut block = self.read_block(disk_block);
        block.set_directory(block_offset, dir);
        self.write_block(disk_block, &block);
    }

    /// Creates a directory named `name` in the current directory.
    ///
    pub fn mkdir(&mut self, name: &str) -> Result<(), Error> {
        self.check_mounted();

        if Self::dir_lookup(&self.curr_dir, name).is_some() {
            return Err(Error::Exists);
        }

        let encoded = encode_name(name).ok_or(Error::InvalidFilePath)?;

        // Find a directory block with room for another record.
        let block_idx = (0..self.meta.dir_blocks)
            .find(|&i| self.dir_counter[i as usize] < DIR_PER_BLOCK as u32)
            .ok_or(Error::DiskFull)?;

        let block = self.read_block(self.dir_block(block_idx));
        let offset = (0..DIR_PER_BLOCK)
            .find(|&i| !block.directory(i).valid)
            .ok_or(Error::Failed)?;

        let mut new_dir = Directory {
            valid: true,
            inum: block_idx * DIR_PER_BLOCK as u32 + offset as u32,
            name: encoded,
            table: [Dirent::default(); ENTRIES_PER_DIR],
        };

        new_dir = Self::add_dir_entry(&new_dir, new_dir.inum, false, ".").ok_or(Error::Failed)?;
        new_dir =
            Self::add_dir_entry(&new_dir, self.curr_dir.inum, false, "..").ok_or(Error::Failed)?;

        let updated =
            Self::add_dir_entry(&self.curr_dir, new_dir.inum, false, name).ok_or(Error::DiskFull)?;
        self.curr_dir = updated;

        self.write_dir_back(&new_dir);
        let curr = self.curr_dir;
        self.write_dir_back(&curr);
        self.dir_counter[block_idx as usize] += 1;

        Ok(())
    }

    /// Removes the directory named `name` from `parent`, recursively
    /// removing its contents first. Returns the updated parent.
    ///
    fn rmdir_helper(&mut self, parent: Directory, name: &str) -> Result<Directory, Error> {
        self.check_mounted();

        let offset = Self::dir_lookup(&parent, name).ok_or(Error::NotExists)?;
        if parent.table[offset].is_file {
            return Err(Error::Failed);
        }

        let inum = parent.table[offset].inum;
        let block_idx = inum / DIR_PER_BLOCK as u32;
        let block_offset = (inum as usize) % DIR_PER_BLOCK;

        let disk_block = self.dir_block(block_idx);
        let block = self.read_block(disk_block);
        let mut dir = block.directory(block_offset);
        if !dir.valid {
            return Err(Error::Failed);
        }

        // The directory the file system is standing in must not
        // disappear underneath it.
        if dir.name() == self.curr_dir.name() {
            return Err(Error::Failed);
        }

        // Empty the directory, recursing into entries other than `.`
        // and `..`.
        for i in 0..ENTRIES_PER_DIR {
            if i > 1 && dir.table[i].valid {
                let name = dir.table[i].name().to_string();
                dir = self.rm_helper(dir, &name)?;
            }
            dir.table[i].valid = false;
        }

        // Re-read the block: removing entries may have rewritten it.
        let mut block = self.read_block(disk_block);
        dir.valid = false;
        block.set_directory(block_offset, &dir);
        self.write_block(disk_block, &block);

        let mut parent = parent;
        parent.table[offset].valid = false;
        self.write_dir_back(&parent);
        self.dir_counter[block_idx as usize] -= 1;

        Ok(parent)
    }

    /// Removes the entry `name` from `dir`: inodes for files,
    /// recursive removal for directories. Returns the updated `dir`.
    ///
    fn rm_helper(&mut self, dir: Directory, name: &str) -> Result<Directory, Error> {
        self.check_mounted();

        let offset = Self::dir_lookup(&dir, name).ok_or(Error::NotExists)?;

        if !dir.table[offset].is_file {
            return self.rmdir_helper(dir, name);
        }

        if !self.remove_inode(dir.table[offset].inum) {
            return Err(Error::Failed);
        }

        let mut dir = dir;
        dir.table[offset].valid = false;
        self.write_dir_back(&dir);
        Ok(dir)
    }

    /// Removes the directory named `name` from the current directory.
    ///
    pub fn rmdir(&mut self, name: &str) -> Result<(), Error> {
        let curr = self.curr_dir;
        let updated = self.rmdir_helper(curr, name)?;
        self.curr_dir = updated;
        Ok(())
    }

    /// Creates an empty file named `name` in the current directory.
    ///
    pub fn touch(&mut self, name: &str) -> Result<(), Error> {
        self.check_mounted();

        if Self::dir_lookup(&self.curr_dir, name).is_some() {
            return Err(Error::Exists);
        }
        if encode_name(name).is_none() {
            return Err(Error::InvalidFilePath);
        }

        let inum = self.create_inode().ok_or(Error::DiskFull)?;

        let updated = match Self::add_dir_entry(&self.curr_dir, inum, true, name) {
            Some(updated) => updated,
            None => {
                // The directory table is full; give the inode back.
                self.remove_inode(inum);
                return Err(Error::DiskFull);
            }
        };

        self.curr_dir = updated;
        let curr = self.curr_dir;
        self.write_dir_back(&curr);
        Ok(())
    }

    /// Removes the file (or, recursively, the directory) named `name`
    /// from the current directory.
    ///
    pub fn rm(&mut self, name: &str) -> Result<(), Error> {
        let curr = self.curr_dir;
        let updated = self.rm_helper(curr, name)?;
        self.curr_dir = updated;
        Ok(())
    }

    /// Returns the inode number of the file named `name` in the
    /// current directory. Directory entries are not files and yield
    /// [`Error::Directory`].
    ///
    pub fn inode_of(&mut self, name: &str) -> Result<u32, Error> {
        self.check_mounted();

        let entry = self
            .curr_dir
            .table
            .iter()
            .find(|entry| entry.valid && entry.name() == name)
            .ok_or(Error::NotExists)?;

        if !entry.is_file {
            return Err(Error::Directory);
        }

        Ok(entry.inum)
    }

    /// Enters the directory named `name` in the current directory.
    ///
    pub fn cd(&mut self, name: &str) -> Result<(), Error> {
        self.check_mounted();

        let offset = Self::dir_lookup(&self.curr_dir, name).ok_or(Error::NotExists)?;
        if self.curr_dir.table[offset].is_file {
            return Err(Error::NotExists);
        }

        let dir = self.read_dir_from_offset(offset).ok_or(Error::Failed)?;
        self.curr_dir = dir;
        Ok(())
    }

    /// Re-enters the root directory.
    ///
    pub fn cd_root(&mut self) {
        self.check_mounted();

        let root_block = self.meta.blocks - 1;
        let block = self.read_block(root_block);
        self.curr_dir = block.directory(0);
    }

    /// Lists the current directory.
    ///
    pub fn ls(&mut self) -> Result<Vec<FileInfo>, Error> {
        self.check_mounted();

        let offset = Self::dir_lookup(&self.curr_dir, ".").ok_or(Error::NotExists)?;
        let dir = self.read_dir_from_offset(offset).ok_or(Error::Failed)?;

        Ok(dir
            .table
            .iter()
            .filter(|entry| entry.valid)
            .map(|entry| FileInfo {
                name: entry.name().to_string(),
                is_file: entry.is_file,
                inum: entry.inum,
            })
            .collect())
    }
}

impl<D: BlockDevice> FileSystem for SimpleFs<D> {
    fn mount(&mut self) {
        SimpleFs::mount(self);
    }

    fn read(
        &mut self,
        inum: u32,
        data: &mut [u8],
        length: usize,
        offset: usize,
    ) -> Result<usize, Error> {
        SimpleFs::read(self, inum, data, length, offset)
    }

    fn write(&mut self, inum: u32, data: &[u8], length: usize, offset: usize) -> Result<usize, Error> {
        SimpleFs::write(self, inum, data, length, offset)
    }

    fn ls(&mut self) -> Result<Vec<FileInfo>, Error> {
        SimpleFs::ls(self)
    }

    fn touch(&mut self, name: &str) -> Result<(), Error> {
        SimpleFs::touch(self, name)
    }

    fn mkdir(&mut self, name: &str) -> Result<(), Error> {
        SimpleFs::mkdir(self, name)
    }

    fn rm(&mut self, name: &str) -> Result<(), Error> {
        SimpleFs::rm(self, name)
    }

    fn rmdir(&mut self, name: &str) -> Result<(), Error> {
        SimpleFs::rmdir(self, name)
    }

    fn cd(&mut self, name: &str) -> Result<(), Error> {
        SimpleFs::cd(self, name)
    }

    fn cd_root(&mut self) {
        SimpleFs::cd_root(self);
    }

    fn inode_of(&mut self, name: &str) -> Result<u32, Error> {
        SimpleFs::inode_of(self, name)
    }

    fn stat(&mut self, inum: u32) -> Result<u32, Error> {
        SimpleFs::stat(self, inum)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use storage::MemDisk;

    // 200 blocks: 20 inode blocks (320 inodes), 2 directory blocks,
    // data blocks 21..198.
    fn new_fs(blocks: usize) -> SimpleFs<MemDisk> {
        let mut fs = SimpleFs::new(MemDisk::new(blocks));
        fs.format();
        fs.mount();
        fs
    }

    #[test]
    fn test_format_and_mount_root() {
        let mut fs = new_fs(200);

        assert_eq!(fs.metadata().blocks, 200);
        assert_eq!(fs.metadata().inode_blocks, 20);
        assert_eq!(fs.metadata().dir_blocks, 2);

        // A fresh root holds exactly `.` and `..`, both at inode 0.
        let entries = fs.ls().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, ".");
        assert_eq!(entries[1].name, "..");
        assert!(entries.iter().all(|entry| !entry.is_file && entry.inum == 0));
    }

    #[test]
    #[should_panic]
    fn test_mount_rejects_unformatted_disk() {
        let mut fs = SimpleFs::new(MemDisk::new(200));
        fs.mount();
    }

    #[test]
    fn test_small_file_write_read() {
        let mut fs = new_fs(200);

        fs.touch("f").unwrap();
        let inum = fs.inode_of("f").unwrap();

        assert_eq!(fs.write(inum, &[1, 2, 3, 4, 5], 5, 0), Ok(5));
        assert_eq!(fs.stat(inum), Ok(5));

        let mut out = [0u8; 5];
        assert_eq!(fs.read(inum, &mut out, 5, 0), Ok(5));
        assert_eq!(out, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_block_boundary_write() {
        let mut fs = new_fs(200);

        fs.touch("f").unwrap();
        let inum = fs.inode_of("f").unwrap();

        let first = [0x11u8; BLOCK_SIZE];
        let second = [0x22u8; BLOCK_SIZE];
        assert_eq!(fs.write(inum, &first, BLOCK_SIZE, 0), Ok(BLOCK_SIZE));
        assert_eq!(fs.write(inum, &second, BLOCK_SIZE, BLOCK_SIZE), Ok(BLOCK_SIZE));
        assert_eq!(fs.stat(inum), Ok(1024));

        let mut out = [0u8; 1024];
        assert_eq!(fs.read(inum, &mut out, 1024, 0), Ok(1024));
        assert!(out[..512].iter().all(|&b| b == 0x11));
        assert!(out[512..].iter().all(|&b| b == 0x22));
    }

    #[test]
    fn test_unaligned_read_and_overwrite() {
        let mut fs = new_fs(200);

        fs.touch("f").unwrap();
        let inum = fs.inode_of("f").unwrap();

        let mut data = [0u8; 1000];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        assert_eq!(fs.write(inum, &data, 1000, 0), Ok(1000));

        // A read spanning the block boundary honours both offsets.
        let mut out = [0u8; 200];
        assert_eq!(fs.read(inum, &mut out, 200, 450), Ok(200));
        assert_eq!(&out[..], &data[450..650]);

        // An overwrite inside one block keeps the surrounding bytes.
        assert_eq!(fs.write(inum, &[0xff; 8], 8, 100), Ok(8));
        let mut out = [0u8; 1000];
        assert_eq!(fs.read(inum, &mut out, 1000, 0), Ok(1000));
        assert_eq!(&out[..100], &data[..100]);
        assert!(out[100..108].iter().all(|&b| b == 0xff));
        assert_eq!(&out[108..], &data[108..]);
    }

    #[test]
    fn test_indirect_region_write() {
        let mut fs = new_fs(200);

        fs.touch("f").unwrap();
        let inum = fs.inode_of("f").unwrap();

        // A write starting past the direct region allocates the
        // indirect block plus one pointer inside it.
        let data = [0x5au8; BLOCK_SIZE];
        let offset = POINTERS_PER_INODE * BLOCK_SIZE;
        assert_eq!(fs.write(inum, &data, BLOCK_SIZE, offset), Ok(BLOCK_SIZE));
        assert_eq!(fs.stat(inum), Ok((offset + BLOCK_SIZE) as u32));

        let mut out = [0u8; BLOCK_SIZE];
        assert_eq!(fs.read(inum, &mut out, BLOCK_SIZE, offset), Ok(BLOCK_SIZE));
        assert_eq!(&out[..], &data[..]);

        // The direct region was never written: the first direct
        // pointer is null, so a read from the start short-circuits.
        assert_eq!(fs.read(inum, &mut out, BLOCK_SIZE, 0), Ok(0));
    }

    #[test]
    fn test_max_file_round_trip() {
        let mut fs = new_fs(200);

        fs.touch("big").unwrap();
        let inum = fs.inode_of("big").unwrap();

        let mut data = std::vec![0u8; MAX_FILE_SIZE];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = (i % 239) as u8;
        }

        assert_eq!(fs.write(inum, &data, MAX_FILE_SIZE, 0), Ok(MAX_FILE_SIZE));
        assert_eq!(fs.stat(inum), Ok(MAX_FILE_SIZE as u32));

        let mut out = std::vec![0u8; MAX_FILE_SIZE];
        assert_eq!(fs.read(inum, &mut out, MAX_FILE_SIZE, 0), Ok(MAX_FILE_SIZE));
        assert_eq!(out, data);

        // One byte past the maximum is rejected.
        assert_eq!(
            fs.write(inum, &[0], 1, MAX_FILE_SIZE),
            Err(Error::InvalidOffset)
        );
    }

    #[test]
    fn test_size_monotonicity() {
        let mut fs = new_fs(200);

        fs.touch("f").unwrap();
        let inum = fs.inode_of("f").unwrap();

        fs.write(inum, &[7u8; 100], 100, 0).unwrap();
        assert_eq!(fs.stat(inum), Ok(100));

        // A write inside the file never shrinks it.
        fs.write(inum, &[8u8; 10], 10, 20).unwrap();
        assert_eq!(fs.stat(inum), Ok(100));

        // A write past the end grows it to offset + length.
        fs.write(inum, &[9u8; 50], 50, 90).unwrap();
        assert_eq!(fs.stat(inum), Ok(140));
    }

    #[test]
    fn test_read_clamps_to_file_size() {
        let mut fs = new_fs(200);

        fs.touch("f").unwrap();
        let inum = fs.inode_of("f").unwrap();
        fs.write(inum, &[1u8; 10], 10, 0).unwrap();

        let mut out = [0u8; 64];
        assert_eq!(fs.read(inum, &mut out, 64, 0), Ok(10));
        assert_eq!(fs.read(inum, &mut out, 64, 10), Ok(0));
        assert_eq!(fs.read(inum, &mut out, 64, 9999), Ok(0));
    }

    #[test]
    fn test_invalid_inode() {
        let mut fs = new_fs(200);

        assert_eq!(fs.stat(5), Err(Error::NotExists));
        let mut out = [0u8; 4];
        assert_eq!(fs.read(5, &mut out, 4, 0), Err(Error::NotExists));

        // Writes beyond the inode table are rejected outright.
        let inodes = fs.metadata().inodes;
        assert_eq!(fs.write(inodes, &[1], 1, 0), Err(Error::NotExists));
    }

    #[test]
    fn test_directory_uniqueness() {
        let mut fs = new_fs(200);

        // A directory claims the name for files too.
        fs.mkdir("x").unwrap();
        assert_eq!(fs.touch("x"), Err(Error::Exists));
        assert_eq!(fs.mkdir("x"), Err(Error::Exists));

        // Removing it frees the name.
        fs.rm("x").unwrap();
        fs.touch("x").unwrap();

        // And the same for a plain file.
        assert_eq!(fs.touch("x"), Err(Error::Exists));
        fs.rm("x").unwrap();
        fs.touch("x").unwrap();
    }

    #[test]
    fn test_mkdir_cd_touch_rmdir_cycle() {
        let mut fs = new_fs(200);

        fs.mkdir("d").unwrap();
        fs.cd("d").unwrap();
        fs.touch("g").unwrap();
        let g_inum = fs.inode_of("g").unwrap();
        fs.cd("..").unwrap();
        fs.rmdir("d").unwrap();

        // The root is empty again and the name can be reused.
        assert_eq!(fs.ls().unwrap().len(), 2);
        fs.mkdir("d").unwrap();

        // g's inode was freed with its directory.
        fs.touch("h").unwrap();
        assert_eq!(fs.inode_of("h").unwrap(), g_inum);
    }

    #[test]
    fn test_rmdir_missing_and_file() {
        let mut fs = new_fs(200);

        assert_eq!(fs.rmdir("nope"), Err(Error::NotExists));

        fs.touch("f").unwrap();
        assert_eq!(fs.rmdir("f"), Err(Error::Failed));
    }

    #[test]
    fn test_rmdir_of_current_directory_is_forbidden() {
        let mut fs = new_fs(200);

        // Standing inside d, a subdirectory with the same name cannot
        // be removed (the name collides with the current directory).
        fs.mkdir("d").unwrap();
        fs.cd("d").unwrap();
        fs.mkdir("d").unwrap();
        assert_eq!(fs.rmdir("d"), Err(Error::Failed));
    }

    #[test]
    fn test_cd_and_cd_root() {
        let mut fs = new_fs(200);

        fs.mkdir("a").unwrap();
        fs.cd("a").unwrap();
        fs.mkdir("b").unwrap();
        fs.cd("b").unwrap();
        fs.touch("deep").unwrap();

        fs.cd_root();
        let entries = fs.ls().unwrap();
        assert!(entries.iter().any(|entry| entry.name == "a"));

        // cd into a file fails.
        fs.cd("a").unwrap();
        fs.cd("b").unwrap();
        assert_eq!(fs.cd("deep"), Err(Error::NotExists));
        assert_eq!(fs.cd("nope"), Err(Error::NotExists));
    }

    #[test]
    fn test_rm_frees_inode_and_blocks() {
        let mut fs = new_fs(200);

        let baseline = fs.occupied.num_set();

        fs.touch("f").unwrap();
        let inum = fs.inode_of("f").unwrap();
        fs.write(inum, &[3u8; 4000], 4000, 0).unwrap();
        assert!(fs.occupied.num_set() > baseline);

        fs.rm("f").unwrap();
        assert_eq!(fs.occupied.num_set(), baseline);
    }

    #[test]
    fn test_disk_full_truncates_write() {
        // A 120-block disk: 12 inode blocks, 1 directory block, and
        // data blocks 13..119, so 106 data blocks. A maximum-size file
        // needs 134 of them: the write must truncate at 105 data
        // blocks (one of the 106 is the indirect block itself).
        let mut fs = new_fs(120);

        fs.touch("big").unwrap();
        let inum = fs.inode_of("big").unwrap();

        let data = std::vec![0xabu8; MAX_FILE_SIZE];
        let written = fs.write(inum, &data, MAX_FILE_SIZE, 0).unwrap();
        assert_eq!(written, 105 * BLOCK_SIZE);
        assert_eq!(fs.stat(inum), Ok(written as u32));

        // What was written survives intact.
        let mut out = std::vec![0u8; written];
        assert_eq!(fs.read(inum, &mut out, written, 0), Ok(written));
        assert!(out.iter().all(|&b| b == 0xab));
    }

    #[test]
    fn test_remount_reconstructs_state() {
        let mut fs = new_fs(200);

        fs.touch("keep").unwrap();
        let inum = fs.inode_of("keep").unwrap();
        let data = [0x77u8; 3000];
        fs.write(inum, &data, 3000, 0).unwrap();
        fs.mkdir("d").unwrap();

        let occupied_before = fs.occupied.num_set();

        // Tear the in-memory state down, keeping only the disk.
        let SimpleFs { mut disk, .. } = fs;
        disk.unmount();

        let mut fs = SimpleFs::new(disk);
        fs.mount();

        // The occupancy map, counters and directory tree come back.
        assert_eq!(fs.occupied.num_set(), occupied_before);
        assert_eq!(fs.inode_of("keep"), Ok(inum));

        let mut out = [0u8; 3000];
        assert_eq!(fs.read(inum, &mut out, 3000, 0), Ok(3000));
        assert_eq!(&out[..], &data[..]);

        // New allocations do not trample the existing file.
        fs.touch("new").unwrap();
        let new_inum = fs.inode_of("new").unwrap();
        assert_ne!(new_inum, inum);
        fs.write(new_inum, &[0x55u8; 2000], 2000, 0).unwrap();

        let mut out = [0u8; 3000];
        fs.read(inum, &mut out, 3000, 0).unwrap();
        assert_eq!(&out[..], &data[..]);
    }

    #[test]
    #[should_panic]
    fn test_operation_before_mount_panics() {
        let mut fs = SimpleFs::new(MemDisk::new(200));
        fs.format();
        fs.touch("f").unwrap();
    }
}
