// Copyright 2024 The BOSS Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The VGA text console: 80x25 cells at physical 0xB8000.
//!
//! Each cell is a character byte and an attribute byte. The writer
//! keeps a row/column cursor, wraps long lines, and scrolls by
//! copying rows up when the cursor falls off the bottom.
//!
//! The console is kernel-facing output only; keyboard input is out of
//! scope here.

use core::fmt;
use lazy_static::lazy_static;
use spin::Mutex;
use volatile::Volatile;
use x86_64::instructions::interrupts::without_interrupts;

/// The standard color palette in VGA text mode.
///
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    Black = 0,
    Blue = 1,
    Green = 2,
    Cyan = 3,
    Red = 4,
    Magenta = 5,
    Brown = 6,
    LightGray = 7,
    DarkGray = 8,
    LightBlue = 9,
    LightGreen = 10,
    LightCyan = 11,
    LightRed = 12,
    Pink = 13,
    Yellow = 14,
    White = 15,
}

/// A combined foreground and background color attribute.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
struct ColorCode(u8);

impl ColorCode {
    const fn new(foreground: Color, background: Color) -> ColorCode {
        ColorCode((background as u8) << 4 | (foreground as u8))
    }
}

/// One cell of the text buffer.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
struct ScreenChar {
    ascii_character: u8,
    color_code: ColorCode,
}

/// The height of the text buffer, in rows.
///
const BUFFER_HEIGHT: usize = 25;

/// The width of the text buffer, in columns.
///
const BUFFER_WIDTH: usize = 80;

/// The physical (and, under the identity map, virtual) address of the
/// text buffer.
///
const BUFFER_ADDRESS: usize = 0xb8000;

type Buffer = [[ScreenChar; BUFFER_WIDTH]; BUFFER_HEIGHT];

/// Writes characters into the VGA text buffer, tracking the cursor.
///
pub struct Writer {
    row: usize,
    column: usize,
    color_code: ColorCode,
    buffer: &'static mut Buffer,
}

impl Writer {
    fn cell(&mut self, row: usize, column: usize) -> Volatile<&mut ScreenChar> {
        Volatile::new(&mut self.buffer[row][column])
    }

    /// Writes one byte at the cursor, handling newlines and wrapping.
    ///
    pub fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.new_line(),
            byte => {
                if self.column >= BUFFER_WIDTH {
                    self.new_line();
                }

                let color_code = self.color_code;
                let (row, column) = (self.row, self.column);
                self.cell(row, column).write(ScreenChar {
                    ascii_character: byte,
                    color_code,
                });
                self.column += 1;
            }
        }
    }

    /// Writes a string at the cursor. Bytes outside the printable
    /// range show as a filled block.
    ///
    pub fn write_string(&mut self, s: &str) {
        for byte in s.bytes() {
            match byte {
                0x20..=0x7e | b'\n' => self.write_byte(byte),
                _ => self.write_byte(0xfe),
            }
        }
    }

    /// Changes the colors used for subsequent output.
    ///
    pub fn set_color(&mut self, foreground: Color, background: Color) {
        self.color_code = ColorCode::new(foreground, background);
    }

    fn new_line(&mut self) {
        self.column = 0;
        if self.row + 1 < BUFFER_HEIGHT {
            self.row += 1;
            return;
        }

        // Scroll: copy every row up one line, then clear the last.
        for row in 1..BUFFER_HEIGHT {
            for column in 0..BUFFER_WIDTH {
                let cell = self.cell(row, column).read();
                self.cell(row - 1, column).write(cell);
            }
        }

        self.clear_row(BUFFER_HEIGHT - 1);
    }

    fn clear_row(&mut self, row: usize) {
        let blank = ScreenChar {
            ascii_character: b' ',
            color_code: self.color_code,
        };
        for column in 0..BUFFER_WIDTH {
            self.cell(row, column).write(blank);
        }
    }

    /// Clears the whole screen and homes the cursor.
    ///
    pub fn clear(&mut self) {
        for row in 0..BUFFER_HEIGHT {
            self.clear_row(row);
        }

        self.row = 0;
        self.column = 0;
    }
}

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_string(s);
        Ok(())
    }
}

lazy_static! {
    /// WRITER is the console writer over the VGA text buffer.
    ///
    pub static ref WRITER: Mutex<Writer> = Mutex::new(Writer {
        row: 0,
        column: 0,
        color_code: ColorCode::new(Color::LightGray, Color::Black),
        buffer: unsafe { &mut *(BUFFER_ADDRESS as *mut Buffer) },
    });
}

/// Clears the screen and prints the boot banner.
///
pub fn init() {
    without_interrupts(|| {
        let mut writer = WRITER.lock();
        writer.clear();
        writer.set_color(Color::Yellow, Color::Black);
        let _ = fmt::Write::write_str(&mut *writer, "BOSS kernel\n");
        writer.set_color(Color::LightGray, Color::Black);
    });
}

/// _print writes text to the console, taking the writer lock with
/// interrupts disabled.
///
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    without_interrupts(|| {
        let _ = fmt::Write::write_fmt(&mut *WRITER.lock(), args);
    });
}

/// Print to the VGA text console.
///
#[macro_export]
macro_rules! vga_print {
    ($($arg:tt)*) => ($crate::console::_print(format_args!($($arg)*)));
}

/// Print to the VGA text console, with a newline.
///
#[macro_export]
macro_rules! vga_println {
    () => ($crate::vga_print!("\n"));
    ($($arg:tt)*) => ($crate::vga_print!("{}\n", format_args!($($arg)*)));
}
