// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Absolute file-system paths.
//!
//! A [`Path`] is a normalised sequence of components: `.` segments
//! disappear and `..` segments pop their predecessor (stopping at the
//! root, like POSIX). Relative paths are rejected at parse time; the
//! VFS resolves them against its tracked working directory before
//! anything else sees them.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;
use syscalls::Error;

/// The separator used in file paths.
///
pub const SEPARATOR: char = '/';

/// An absolute, normalised file-system path.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Path {
    components: Vec<String>,
}

impl Path {
    /// Returns the root path `/`.
    ///
    pub fn root() -> Self {
        Path {
            components: Vec::new(),
        }
    }

    /// Parses an absolute path, normalising `.` and `..` segments.
    ///
    /// Empty and relative paths are rejected with
    /// [`Error::InvalidFilePath`].
    ///
    pub fn parse(path: &str) -> Result<Self, Error> {
        if !path.starts_with(SEPARATOR) {
            return Err(Error::InvalidFilePath);
        }

        let mut components = Vec::new();
        Self::push_all(&mut components, path);
        Ok(Path { components })
    }

    /// Resolves `path` against `base`: absolute paths stand alone,
    /// relative paths extend `base`.
    ///
    pub fn resolve(base: &Path, path: &str) -> Result<Self, Error> {
        if path.starts_with(SEPARATOR) {
            return Self::parse(path);
        }
        if path.is_empty() {
            return Err(Error::InvalidFilePath);
        }

        let mut components = base.components.clone();
        Self::push_all(&mut components, path);
        Ok(Path { components })
    }

    fn push_all(components: &mut Vec<String>, path: &str) {
        for segment in path.split(SEPARATOR) {
            match segment {
                "" | "." => {}
                ".." => {
                    // Past the root, `..` stays at the root.
                    components.pop();
                }
                name => components.push(name.to_string()),
            }
        }
    }

    /// Returns whether this is the root path.
    ///
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Returns the number of components.
    ///
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Returns whether the path has no components.
    ///
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Returns the path's components.
    ///
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Returns the final component, or `None` for the root.
    ///
    pub fn base_name(&self) -> Option<&str> {
        self.components.last().map(|name| name.as_str())
    }

    /// Returns whether every component of `self` prefixes `other`, in
    /// order.
    ///
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        if self.components.len() > other.components.len() {
            return false;
        }

        self.components
            .iter()
            .zip(other.components.iter())
            .all(|(ours, theirs)| ours == theirs)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }

        for component in self.components.iter() {
            write!(f, "/{}", component)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use std::format;

    #[test]
    fn test_parse() {
        assert_eq!(Path::parse("/").unwrap(), Path::root());
        assert_eq!(
            Path::parse("/a/b/c").unwrap().components(),
            &["a", "b", "c"]
        );

        // Repeated separators and `.` segments collapse.
        assert_eq!(Path::parse("//a//.//b/").unwrap().components(), &["a", "b"]);

        // `..` pops, clamped at the root.
        assert_eq!(Path::parse("/a/b/..").unwrap().components(), &["a"]);
        assert_eq!(Path::parse("/../..").unwrap(), Path::root());

        // Relative and empty paths are invalid.
        assert_eq!(Path::parse("a/b"), Err(Error::InvalidFilePath));
        assert_eq!(Path::parse(""), Err(Error::InvalidFilePath));
    }

    #[test]
    fn test_resolve() {
        let base = Path::parse("/a/b").unwrap();

        assert_eq!(Path::resolve(&base, "/x").unwrap().components(), &["x"]);
        assert_eq!(
            Path::resolve(&base, "c").unwrap().components(),
            &["a", "b", "c"]
        );
        assert_eq!(Path::resolve(&base, "..").unwrap().components(), &["a"]);
        assert_eq!(
            Path::resolve(&base, "../c/./d").unwrap().components(),
            &["a", "c", "d"]
        );
        assert_eq!(Path::resolve(&base, ""), Err(Error::InvalidFilePath));
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Path::root()), "/");
        assert_eq!(format!("{}", Path::parse("/a/b").unwrap()), "/a/b");
    }

    #[test]
    fn test_prefix() {
        let root = Path::root();
        let a = Path::parse("/a").unwrap();
        let ab = Path::parse("/a/b").unwrap();
        let ax = Path::parse("/ax").unwrap();

        assert!(root.is_prefix_of(&ab));
        assert!(a.is_prefix_of(&ab));
        assert!(a.is_prefix_of(&a));
        assert!(!ab.is_prefix_of(&a));
        assert!(!a.is_prefix_of(&ax));
    }
}
