// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Pretty printing for byte quantities, using [powers of 2 for larger units](https://en.wikipedia.org/wiki/Byte#Units_based_on_powers_of_2).
//!
//! # Examples
//!
//! ```
//! use pretty::Bytes;
//!
//! println!("{}", Bytes::from_usize(2)); // Prints "2 B"
//! println!("{}", Bytes::from_usize(4096)); // Prints "4 KiB"
//! ```

#![no_std]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![forbid(unsafe_code)]
#![deny(unused_crate_dependencies)]

use core::fmt;

/// Contains a number of bytes.
///
pub struct Bytes(usize);

impl Bytes {
    /// Wraps a number of bytes.
    ///
    pub fn from_u64(n: u64) -> Self {
        Bytes(n as usize)
    }

    /// Wraps a number of bytes.
    ///
    pub fn from_usize(n: usize) -> Self {
        Bytes(n)
    }
}

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let units = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
        let mut b = self.0;
        let width = f.width();
        for unit in units.iter() {
            if b >= 1024 {
                b >>= 10;
                continue;
            }

            return match width {
                None => write!(f, "{} {}", b, unit),
                Some(width) => write!(
                    f,
                    "{:width$} {}",
                    b,
                    unit,
                    width = width.saturating_sub(1 + unit.len())
                ),
            };
        }

        match width {
            None => write!(f, "{} ZiB", b),
            Some(width) => write!(f, "{:width$} ZiB", b, width = width.saturating_sub(4)),
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use std::format;

    #[test]
    fn test_bytes_display() {
        assert_eq!(format!("{}", Bytes::from_usize(0)), "0 B");
        assert_eq!(format!("{}", Bytes::from_usize(1023)), "1023 B");
        assert_eq!(format!("{}", Bytes::from_usize(1024)), "1 KiB");
        assert_eq!(format!("{}", Bytes::from_usize(4096)), "4 KiB");
        assert_eq!(format!("{}", Bytes::from_u64(2 << 20)), "2 MiB");
        assert_eq!(format!("{}", Bytes::from_u64(2 << 30)), "2 GiB");
    }

    #[test]
    fn test_bytes_display_width() {
        assert_eq!(format!("{:7}", Bytes::from_usize(4096)), "  4 KiB");
        assert_eq!(format!("{:7}", Bytes::from_usize(2)), "    2 B");
    }
}
