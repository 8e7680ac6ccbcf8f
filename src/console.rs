//! # Diagnostic Console
//!
//! Text output on top of the framebuffer. This is the `printk` surface of the
//! kernel: `kprint!`/`kprintln!` for formatted text in the default colors and
//! [`write_colored`] for explicitly colored text.
//!
//! The console must be initialized with [`init`] before anything writes to it;
//! until then output is dropped.
//!
//! Cells are `FONT_8X13` glyphs on a line pitch of `glyph_height` pixels. `\n`
//! starts a new line, `\t` advances to the next multiple of eight columns, and
//! writing past the last row scrolls the screen up by one line.

use core::fmt::{self, Write};

use embedded_graphics::mono_font::{ascii::FONT_8X13, MonoFont, MonoTextStyle};
use spin::Mutex;

use crate::config::{BootError, FramebufferHandle};
use crate::framebuffer::{Color, FramebufferWriter};

const FONT: &MonoFont<'static> = &FONT_8X13;
const TAB_WIDTH: usize = 8;

/// What the trap path needs from a text console.
pub trait ConsoleSink: Write {
    fn write_colored(&mut self, fg: Color, bg: Color, text: &str);

    /// Number of text columns per line.
    fn columns(&self) -> usize;
}

pub struct Console<'a> {
    fb: FramebufferWriter<'a>,
    col: usize,
    row: usize,
    cols: usize,
    rows: usize,
    glyph_width: usize,
    glyph_height: usize,
    fg: Color,
    bg: Color,
}

impl<'a> Console<'a> {
    pub fn new(fb: FramebufferWriter<'a>, glyph_height: usize) -> Self {
        let glyph_width = FONT.character_size.width as usize;
        let cols = (fb.width / glyph_width).max(1);
        let rows = (fb.height / glyph_height.max(1)).max(1);
        Self {
            fb,
            col: 0,
            row: 0,
            cols,
            rows,
            glyph_width,
            glyph_height,
            fg: Color::WHITE,
            bg: Color::BLACK,
        }
    }

    pub fn clear(&mut self) {
        self.fb.clear(self.bg);
        self.col = 0;
        self.row = 0;
    }

    /// Cursor position as `(column, row)`.
    pub fn position(&self) -> (usize, usize) {
        (self.col, self.row)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn framebuffer(&self) -> &FramebufferWriter<'a> {
        &self.fb
    }

    fn put_char(&mut self, ch: char, fg: Color, bg: Color) {
        match ch {
            '\n' => self.new_line(),
            '\t' => {
                let next = (self.col / TAB_WIDTH + 1) * TAB_WIDTH;
                if next >= self.cols {
                    self.new_line();
                } else {
                    while self.col < next {
                        self.draw_cell(' ', fg, bg);
                    }
                }
            }
            '\x08' => {
                if self.col > 0 {
                    self.col -= 1;
                    self.draw_cell(' ', fg, bg);
                    self.col -= 1;
                }
            }
            ch => {
                if self.col >= self.cols {
                    self.new_line();
                }
                self.draw_cell(ch, fg, bg);
            }
        }
    }

    fn draw_cell(&mut self, ch: char, fg: Color, bg: Color) {
        let x = (self.col * self.glyph_width) as i32;
        let y = (self.row * self.glyph_height) as i32;
        self.fb
            .fill_rect(x, y, self.glyph_width as u32, self.glyph_height as u32, bg);
        if ch != ' ' {
            let ch = if ch.is_ascii() { ch } else { '?' };
            let style = MonoTextStyle::new(FONT, fg.to_rgb888());
            self.fb.draw_char(ch, x, y, &style);
        }
        self.col += 1;
    }

    fn new_line(&mut self) {
        self.col = 0;
        if self.row + 1 < self.rows {
            self.row += 1;
        } else {
            self.fb.scroll_up(self.glyph_height, self.bg);
        }
    }
}

impl Write for Console<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let (fg, bg) = (self.fg, self.bg);
        self.write_colored(fg, bg, s);
        Ok(())
    }
}

impl ConsoleSink for Console<'_> {
    fn write_colored(&mut self, fg: Color, bg: Color, text: &str) {
        for ch in text.chars() {
            self.put_char(ch, fg, bg);
        }
    }

    fn columns(&self) -> usize {
        self.cols
    }
}

pub static CONSOLE: Mutex<Option<Console<'static>>> = Mutex::new(None);

/// Takes ownership of the framebuffer described by `handle` and clears it.
pub fn init(handle: &FramebufferHandle) -> Result<(), BootError> {
    handle.validate()?;
    // SAFETY: the handle was validated and the bootloader keeps the framebuffer
    // mapped; from here on the console is its only user.
    let buffer = unsafe { handle.buffer() };
    let mut console = Console::new(FramebufferWriter::new(buffer, handle), handle.glyph_height);
    console.clear();
    *CONSOLE.lock() = Some(console);
    Ok(())
}

/// Runs `f` on the console, waiting for the lock. Returns `None` before [`init`].
pub fn with_console<R>(f: impl FnOnce(&mut Console<'static>) -> R) -> Option<R> {
    CONSOLE.lock().as_mut().map(f)
}

/// Like [`with_console`] but gives up if the lock is held.
///
/// Trap handlers use this: the interrupted code may own the lock.
pub fn try_with_console<R>(f: impl FnOnce(&mut Console<'static>) -> R) -> Option<R> {
    CONSOLE.try_lock()?.as_mut().map(f)
}

pub fn write_colored(fg: Color, bg: Color, text: &str) {
    with_console(|c| c.write_colored(fg, bg, text));
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    with_console(|c| {
        let _ = c.write_fmt(args);
    });
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::console::_print(core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kprintln {
    () => {
        $crate::kprint!("\n")
    };
    ($($arg:tt)*) => {
        $crate::console::_print(core::format_args!("{}\n", core::format_args!($($arg)*)))
    };
}
