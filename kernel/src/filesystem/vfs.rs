// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The virtual file system: mount points, file descriptors, and the
//! error-normalised interface the syscall layer consumes.
//!
//! Mounted file systems are recorded in a mount table; a path resolves
//! to the mount whose mount point is its longest component-prefix.
//! Open files live in a descriptor table whose slots pair the 32-bit
//! inode number with the mount it was resolved against, so later
//! reads and writes land on the same file system the open did. The
//! descriptor handed to callers is the slot index plus one; released
//! slots hold a sentinel inode number and are reused before the table
//! grows.
//!
//! Directory-changing operations are resolved here: the working
//! directory is tracked as an absolute [`Path`], `.` and `..` are
//! normalised before dispatch, and the underlying file system is
//! walked from its root, so it only ever sees single-component names.

use crate::path::Path;
use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use spin::Mutex;
use syscalls::{Error, OPEN_CREATE};

/// Describes one entry of a directory listing.
///
#[derive(Clone, Debug, PartialEq)]
pub struct FileInfo {
    /// The entry's name.
    pub name: String,

    /// Whether the entry is a regular file (directories otherwise).
    pub is_file: bool,

    /// The entry's inode number (for directories, the directory
    /// record number).
    pub inum: u32,
}

/// The interface a concrete file system offers to the VFS.
///
/// Names passed in are always single components; path resolution
/// happens above this interface.
///
pub trait FileSystem {
    /// Mounts the file system, rebuilding any in-memory state.
    ///
    fn mount(&mut self);

    /// Reads from the file with the given inode number.
    ///
    fn read(&mut self, inum: u32, data: &mut [u8], length: usize, offset: usize)
        -> Result<usize, Error>;

    /// Writes to the file with the given inode number.
    ///
    fn write(&mut self, inum: u32, data: &[u8], length: usize, offset: usize)
        -> Result<usize, Error>;

    /// Lists the current directory.
    ///
    fn ls(&mut self) -> Result<Vec<FileInfo>, Error>;

    /// Creates an empty file in the current directory.
    ///
    fn touch(&mut self, name: &str) -> Result<(), Error>;

    /// Creates a directory in the current directory.
    ///
    fn mkdir(&mut self, name: &str) -> Result<(), Error>;

    /// Removes a file (or, recursively, a directory) from the current
    /// directory.
    ///
    fn rm(&mut self, name: &str) -> Result<(), Error>;

    /// Recursively removes a directory from the current directory.
    ///
    fn rmdir(&mut self, name: &str) -> Result<(), Error>;

    /// Enters a directory of the current directory.
    ///
    fn cd(&mut self, name: &str) -> Result<(), Error>;

    /// Returns to the file system's root directory.
    ///
    fn cd_root(&mut self);

    /// Returns the inode number of a file in the current directory.
    ///
    fn inode_of(&mut self, name: &str) -> Result<u32, Error>;

    /// Returns the logical size of a file.
    ///
    fn stat(&mut self, inum: u32) -> Result<u32, Error>;
}

/// The known partition types.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PartitionType {
    /// SimpleFS.
    SimpleFs = 1,

    /// An unrecognised file system.
    Unknown = 100,
}

/// One entry of the mount table.
///
pub struct MountedFs {
    pub fs_type: PartitionType,
    pub mount_point: Path,
    pub fs: Box<dyn FileSystem + Send>,
}

/// Marks a released file-descriptor slot.
///
const INVALID_HANDLE: u32 = 0xffff_ffff;

/// One slot of the descriptor table: the inode number and the mount
/// it belongs to. A slot whose inode number is the sentinel is free.
///
#[derive(Clone, Copy, Debug, PartialEq)]
struct Handle {
    mount: usize,
    inum: u32,
}

/// The virtual file system: mount table, descriptor table, and the
/// tracked working directory.
///
pub struct Vfs {
    mounts: Vec<MountedFs>,
    handles: Vec<Handle>,
    cwd: Path,
}

impl Vfs {
    /// Returns an empty VFS with no mounts and the root as working
    /// directory.
    ///
    pub fn new() -> Self {
        Vfs {
            mounts: Vec::new(),
            handles: Vec::new(),
            cwd: Path::root(),
        }
    }

    /// Mounts `fs` at `mount_point`, calling its mount routine.
    ///
    pub fn mount(
        &mut self,
        fs_type: PartitionType,
        mount_point: &str,
        mut fs: Box<dyn FileSystem + Send>,
    ) -> Result<(), Error> {
        let mount_point = Path::parse(mount_point)?;

        fs.mount();
        self.mounts.push(MountedFs {
            fs_type,
            mount_point,
            fs,
        });

        Ok(())
    }

    /// Returns the index of the mount whose mount point is the longest
    /// prefix of `path`.
    ///
    fn resolve_mount(&self, path: &Path) -> Result<usize, Error> {
        if self.mounts.is_empty() {
            return Err(Error::NothingMounted);
        }

        let mut best = 0;
        let mut best_len = 0;
        for (i, mount) in self.mounts.iter().enumerate() {
            if mount.mount_point.is_prefix_of(path) && mount.mount_point.len() >= best_len {
                best = i;
                best_len = mount.mount_point.len();
            }
        }

        Ok(best)
    }

    /// Finds a descriptor slot for an inode on the given mount,
    /// reusing a released slot before growing the table, and returns
    /// the descriptor.
    ///
    fn register_handle(&mut self, mount: usize, inum: u32) -> u64 {
        let handle = Handle { mount, inum };
        for (i, slot) in self.handles.iter_mut().enumerate() {
            if slot.inum == INVALID_HANDLE {
                *slot = handle;
                return (i + 1) as u64;
            }
        }

        self.handles.push(handle);
        self.handles.len() as u64
    }

    /// Returns the mount and inode behind a descriptor.
    ///
    fn handle(&self, fd: u64) -> Result<Handle, Error> {
        if fd == 0 || fd > self.handles.len() as u64 {
            return Err(Error::InvalidFileDescriptor);
        }

        let handle = self.handles[(fd - 1) as usize];
        if handle.inum == INVALID_HANDLE {
            return Err(Error::InvalidFileDescriptor);
        }

        Ok(handle)
    }

    /// Opens `path`, returning a new file descriptor.
    ///
    /// With [`OPEN_CREATE`] in `flags`, the file is created first; a
    /// file that already exists is not an error.
    ///
    pub fn open(&mut self, path: &str, flags: u64) -> Result<u64, Error> {
        let path = Path::parse(path)?;
        let name = match path.base_name() {
            Some(name) => name.to_string(),
            None => return Err(Error::InvalidFilePath),
        };

        let idx = self.resolve_mount(&path)?;
        let mount = &mut self.mounts[idx];

        if flags & OPEN_CREATE != 0 {
            match mount.fs.touch(&name) {
                Ok(()) | Err(Error::Exists) => {}
                Err(error) => return Err(error),
            }
        }

        let inum = mount.fs.inode_of(&name)?;
        Ok(self.register_handle(idx, inum))
    }

    /// Releases a descriptor. Closing an invalid descriptor is a
    /// no-op; on-disk state is untouched either way.
    ///
    pub fn close(&mut self, fd: u64) {
        if self.handle(fd).is_ok() {
            self.handles[(fd - 1) as usize].inum = INVALID_HANDLE;
        }
    }

    /// Reads up to `count` bytes at `offset` from the file behind
    /// `fd`. A read short of `count` (end of file) is not an error.
    ///
    pub fn read(&mut self, fd: u64, buf: &mut [u8], count: usize, offset: usize) -> Result<u64, Error> {
        let handle = self.handle(fd)?;
        let read = self.mounts[handle.mount]
            .fs
            .read(handle.inum, buf, count, offset)?;
        Ok(read as u64)
    }

    /// Writes up to `count` bytes at `offset` to the file behind
    /// `fd`.
    ///
    pub fn write(&mut self, fd: u64, buf: &[u8], count: usize, offset: usize) -> Result<u64, Error> {
        let handle = self.handle(fd)?;
        let written = self.mounts[handle.mount]
            .fs
            .write(handle.inum, buf, count, offset)?;
        Ok(written as u64)
    }

    /// Returns the size of the file behind `fd`.
    ///
    pub fn stat(&mut self, fd: u64) -> Result<u64, Error> {
        let handle = self.handle(fd)?;
        let size = self.mounts[handle.mount].fs.stat(handle.inum)?;
        Ok(size as u64)
    }

    /// Creates the directory at `path`.
    ///
    pub fn mkdir(&mut self, path: &str) -> Result<(), Error> {
        let (idx, name) = self.resolve_leaf(path)?;
        self.mounts[idx].fs.mkdir(&name)
    }

    /// Removes the file or directory at `path`.
    ///
    pub fn rm(&mut self, path: &str) -> Result<(), Error> {
        let (idx, name) = self.resolve_leaf(path)?;
        self.mounts[idx].fs.rm(&name)
    }

    /// Recursively removes the directory at `path`.
    ///
    pub fn rmdir(&mut self, path: &str) -> Result<(), Error> {
        let (idx, name) = self.resolve_leaf(path)?;
        self.mounts[idx].fs.rmdir(&name)
    }

    fn resolve_leaf(&mut self, path: &str) -> Result<(usize, String), Error> {
        let path = Path::parse(path)?;
        let name = match path.base_name() {
            Some(name) => name.to_string(),
            None => return Err(Error::InvalidFilePath),
        };

        let idx = self.resolve_mount(&path)?;
        Ok((idx, name))
    }

    /// Changes the working directory. `path` may be relative; `.` and
    /// `..` are resolved here, and the file system is walked from its
    /// root.
    ///
    pub fn cd(&mut self, path: &str) -> Result<(), Error> {
        let target = Path::resolve(&self.cwd, path)?;
        let idx = self.resolve_mount(&target)?;

        match Self::walk(&mut self.mounts[idx], &target) {
            Ok(()) => {
                self.cwd = target;
                Ok(())
            }
            Err(error) => {
                // Put the file system back on the old working
                // directory before reporting the failure.
                let old = self.cwd.clone();
                if let Ok(old_idx) = self.resolve_mount(&old) {
                    let _ = Self::walk(&mut self.mounts[old_idx], &old);
                }
                Err(error)
            }
        }
    }

    fn walk(mount: &mut MountedFs, target: &Path) -> Result<(), Error> {
        mount.fs.cd_root();
        for component in target.components().iter().skip(mount.mount_point.len()) {
            mount.fs.cd(component)?;
        }

        Ok(())
    }

    /// Returns the working directory as an absolute path string.
    ///
    pub fn pwd(&self) -> String {
        self.cwd.to_string()
    }

    /// Lists the working directory.
    ///
    pub fn ls(&mut self) -> Result<Vec<FileInfo>, Error> {
        let idx = self.resolve_mount(&self.cwd)?;
        self.mounts[idx].fs.ls()
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Vfs::new()
    }
}

/// The kernel's VFS, initialised once by [`init`].
///
static VFS: Mutex<Option<Vfs>> = Mutex::new(None);

/// Installs the kernel's VFS with `fs` mounted at `/`.
///
/// # Panics
///
/// `init` panics if called twice.
///
pub fn init(fs: Box<dyn FileSystem + Send>) {
    let mut vfs = Vfs::new();
    vfs.mount(PartitionType::SimpleFs, "/", fs)
        .expect("the root mount point is a valid path");

    let mut global = VFS.lock();
    if global.is_some() {
        panic!("the VFS is already initialised");
    }
    *global = Some(vfs);
}

/// Runs `f` against the kernel's VFS.
///
/// # Panics
///
/// `with_vfs` panics if [`init`] has not run.
///
pub fn with_vfs<R>(f: impl FnOnce(&mut Vfs) -> R) -> R {
    let mut vfs = VFS.lock();
    f(vfs.as_mut().expect("VFS not initialised"))
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use crate::simple_fs::SimpleFs;
    use storage::MemDisk;

    fn new_vfs(blocks: usize) -> Vfs {
        let mut fs = SimpleFs::new(MemDisk::new(blocks));
        fs.format();

        let mut vfs = Vfs::new();
        vfs.mount(PartitionType::SimpleFs, "/", Box::new(fs)).unwrap();
        vfs
    }

    #[test]
    fn test_fresh_root_lists_dot_and_dotdot() {
        let mut vfs = new_vfs(200);

        let entries = vfs.ls().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, ".");
        assert_eq!(entries[1].name, "..");
        assert!(entries.iter().all(|entry| !entry.is_file && entry.inum == 0));
    }

    #[test]
    fn test_fd_lifecycle() {
        let mut vfs = new_vfs(200);

        // Write through one descriptor...
        let fd = vfs.open("/f", OPEN_CREATE).unwrap();
        assert_eq!(fd, 1);
        assert_eq!(vfs.write(fd, &[1, 2, 3, 4, 5], 5, 0), Ok(5));
        assert_eq!(vfs.stat(fd), Ok(5));
        vfs.close(fd);

        // ...and read the same bytes back through a fresh one.
        let fd = vfs.open("/f", 0).unwrap();
        let mut out = [0u8; 5];
        assert_eq!(vfs.read(fd, &mut out, 5, 0), Ok(5));
        assert_eq!(out, [1, 2, 3, 4, 5]);
        vfs.close(fd);

        // Operations on the released descriptor fail.
        let mut out = [0u8; 5];
        assert_eq!(
            vfs.read(fd, &mut out, 5, 0),
            Err(Error::InvalidFileDescriptor)
        );

        // The released slot is reused before the table grows.
        assert_eq!(vfs.open("/f", 0).unwrap(), fd);
    }

    #[test]
    fn test_open_missing_file() {
        let mut vfs = new_vfs(200);
        assert_eq!(vfs.open("/missing", 0), Err(Error::NotExists));
        assert_eq!(vfs.open("relative", 0), Err(Error::InvalidFilePath));
        assert_eq!(vfs.open("/", 0), Err(Error::InvalidFilePath));
    }

    #[test]
    fn test_open_directory_fails() {
        let mut vfs = new_vfs(200);
        vfs.mkdir("/d").unwrap();
        assert_eq!(vfs.open("/d", 0), Err(Error::Directory));

        // OPEN_CREATE on an existing directory is tolerated at the
        // touch stage, but the open itself still fails.
        assert_eq!(vfs.open("/d", OPEN_CREATE), Err(Error::Directory));
    }

    #[test]
    fn test_short_read_is_not_an_error() {
        let mut vfs = new_vfs(200);

        let fd = vfs.open("/f", OPEN_CREATE).unwrap();
        vfs.write(fd, &[9u8; 10], 10, 0).unwrap();

        let mut out = [0u8; 100];
        assert_eq!(vfs.read(fd, &mut out, 100, 0), Ok(10));
        assert_eq!(vfs.read(fd, &mut out, 100, 10), Ok(0));
    }

    #[test]
    fn test_cd_and_pwd() {
        let mut vfs = new_vfs(200);
        assert_eq!(vfs.pwd(), "/");

        vfs.mkdir("/d").unwrap();
        vfs.cd("/d").unwrap();
        assert_eq!(vfs.pwd(), "/d");

        // Relative components resolve against the working directory.
        vfs.cd("..").unwrap();
        assert_eq!(vfs.pwd(), "/");
        vfs.cd("d").unwrap();
        assert_eq!(vfs.pwd(), "/d");
        vfs.cd(".").unwrap();
        assert_eq!(vfs.pwd(), "/d");

        // A failed cd leaves the working directory unchanged.
        assert_eq!(vfs.cd("/nope"), Err(Error::NotExists));
        assert_eq!(vfs.pwd(), "/d");
        assert_eq!(vfs.ls().unwrap().len(), 2);
    }

    #[test]
    fn test_mkdir_rm_cycle() {
        let mut vfs = new_vfs(200);

        vfs.mkdir("/d").unwrap();
        vfs.cd("/d").unwrap();

        let fd = vfs.open("/g", OPEN_CREATE).unwrap();
        vfs.write(fd, b"data", 4, 0).unwrap();
        vfs.close(fd);

        vfs.cd("/").unwrap();
        vfs.rmdir("/d").unwrap();

        // The root is empty again, and the name can be reused.
        assert_eq!(vfs.ls().unwrap().len(), 2);
        vfs.mkdir("/d").unwrap();
    }

    #[test]
    fn test_mount_longest_prefix() {
        let mut vfs = new_vfs(200);

        let mut inner = SimpleFs::new(MemDisk::new(200));
        inner.format();
        vfs.mount(PartitionType::SimpleFs, "/a", Box::new(inner))
            .unwrap();

        // Files under /a land on the inner mount...
        let fd = vfs.open("/a/g", OPEN_CREATE).unwrap();
        assert_eq!(vfs.write(fd, b"inner", 5, 0), Ok(5));
        assert_eq!(vfs.stat(fd), Ok(5));

        vfs.cd("/a").unwrap();
        let names: Vec<_> = vfs.ls().unwrap().into_iter().map(|e| e.name).collect();
        assert!(names.contains(&String::from("g")));

        // ...and are invisible at the outer root.
        vfs.cd("/").unwrap();
        let names: Vec<_> = vfs.ls().unwrap().into_iter().map(|e| e.name).collect();
        assert!(!names.contains(&String::from("g")));

        // Both files are each mount's first inode, so descriptor I/O
        // only stays apart if it is routed by the stored mount.
        let root_fd = vfs.open("/f", OPEN_CREATE).unwrap();
        assert_eq!(vfs.write(root_fd, b"outer", 5, 0), Ok(5));

        let mut out = [0u8; 5];
        assert_eq!(vfs.read(fd, &mut out, 5, 0), Ok(5));
        assert_eq!(&out, b"inner");
        assert_eq!(vfs.read(root_fd, &mut out, 5, 0), Ok(5));
        assert_eq!(&out, b"outer");

        vfs.close(fd);
        vfs.close(root_fd);
    }

    #[test]
    fn test_nothing_mounted() {
        let mut vfs = Vfs::new();
        assert_eq!(vfs.open("/f", 0), Err(Error::NothingMounted));
    }
}
