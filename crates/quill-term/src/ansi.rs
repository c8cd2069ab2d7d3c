// SPDX-License-Identifier: MIT
//
// ANSI escape sequence generation.
//
// Pure functions that write escape sequences to any `impl Write`. No state,
// no decisions about when to emit; the renderer owns that. This module
// just knows the byte-level encoding of every terminal command the runtime
// sends: cursor addressing, scroll regions, autowrap, synchronized output.
//
// All cursor positions are 0-indexed in our API and converted to 1-indexed
// for the terminal (ANSI standard uses 1-based coordinates).
//
// All functions return `io::Result` propagated from the underlying writer.
// In practice they never fail when writing to `OutputBuffer` (backed by a Vec).
use std::io::{self, Write};

// ─── Cursor ──────────────────────────────────────────────────────────────────

/// Move the cursor to `(x, y)` using the CUP (Cursor Position) sequence.
///
/// Our coordinates are 0-indexed; ANSI CUP is 1-indexed.
#[inline]
pub fn cursor_to(w: &mut impl Write, x: u16, y: u16) -> io::Result<()> {
    write!(w, "\x1b[{};{}H", u32::from(y) + 1, u32::from(x) + 1)
}

/// Hide the cursor (DECTCEM reset).
#[inline]
pub fn cursor_hide(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[?25l")
}

/// Show the cursor (DECTCEM set).
#[inline]
pub fn cursor_show(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[?25h")
}

/// Save the cursor position (SCOSC).
#[inline]
pub fn save_cursor(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[s")
}

/// Restore the cursor position saved by [`save_cursor`] (SCORC).
#[inline]
pub fn restore_cursor(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[u")
}

// ─── Screen ──────────────────────────────────────────────────────────────────

/// Reset all SGR attributes to terminal defaults (SGR 0).
#[inline]
pub fn reset(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[0m")
}

/// Disable autowrap (DECAWM reset).
///
/// Rows are written at exactly the screen width; with autowrap on, the
/// last column of the last row would scroll the whole screen.
#[inline]
pub fn disable_autowrap(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[?7l")
}

/// Re-enable autowrap (DECAWM set).
#[inline]
pub fn enable_autowrap(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[?7h")
}

/// Set the window title (OSC 0).
pub fn set_title(w: &mut impl Write, title: &str) -> io::Result<()> {
    write!(w, "\x1b]0;{title}\x07")
}

// ─── Scrolling ───────────────────────────────────────────────────────────────

/// Restrict scrolling to rows `top..=bottom` (DECSTBM).
///
/// Rows are 0-indexed and inclusive. The terminal homes the cursor as a
/// side effect, so callers must position it again before writing text.
#[inline]
pub fn set_scroll_region(w: &mut impl Write, top: u16, bottom: u16) -> io::Result<()> {
    write!(w, "\x1b[{};{}r", u32::from(top) + 1, u32::from(bottom) + 1)
}

/// Reset the scroll region to the full screen.
#[inline]
pub fn reset_scroll_region(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[r")
}

/// Scroll the active region up by `n` lines (SU). Content moves toward row 0;
/// blank lines appear at the bottom.
#[inline]
pub fn scroll_up(w: &mut impl Write, n: u16) -> io::Result<()> {
    write!(w, "\x1b[{n}S")
}

/// Scroll the active region down by `n` lines (SD). Content moves toward the
/// bottom; blank lines appear at the top.
#[inline]
pub fn scroll_down(w: &mut impl Write, n: u16) -> io::Result<()> {
    write!(w, "\x1b[{n}T")
}

// ─── Synchronized Output ─────────────────────────────────────────────────────

/// Begin synchronized output (DEC Private Mode 2026).
///
/// Tells the terminal to buffer all subsequent output until [`end_sync`].
/// This prevents partial frame updates from causing visible flicker.
#[inline]
pub fn begin_sync(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[?2026h")
}

/// End synchronized output. The terminal renders the buffered frame.
#[inline]
pub fn end_sync(w: &mut impl Write) -> io::Result<()> {
    w.write_all(b"\x1b[?2026l")
}

// ─── Exit ────────────────────────────────────────────────────────────────────

/// Undo everything the renderer may have left behind: attributes, disabled
/// autowrap and a scroll region. The cursor position is preserved.
///
/// Call once before handing the terminal back to the shell.
pub fn restore_output(w: &mut impl Write) -> io::Result<()> {
    save_cursor(w)?;
    reset(w)?;
    enable_autowrap(w)?;
    reset_scroll_region(w)?;
    restore_cursor(w)?;
    cursor_show(w)?;
    w.write_all(b"\r\n")
}

// ─── Tests ───────────────────────────────────────────────────────────────────
