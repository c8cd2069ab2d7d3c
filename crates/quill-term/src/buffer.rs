// SPDX-License-Identifier: MIT
//
// ScreenBuffer: the rows a view paints before each frame.
//
// A view writes whole lines, splices overlays into lines, and sets where the
// cursor should end up, then calls draw() once per frame. The buffer keeps
// every row at exactly the screen width (escapes count zero) so the renderer
// can compare rows as plain strings and write them without wrapping.
//
// Lifetime: one buffer per view and terminal size. On resize, build a new
// one; its first draw paints every row.

use std::io::{self, Write};

use tracing::{debug, warn};

use crate::config::ScreenConfig;
use crate::diff::{DiffRenderer, RenderStats};
use crate::error::Result;
use crate::terminal;
use crate::text::{overlay, pad_truncate_right_preserve_escapes};

/// A fixed-size frame of styled text rows with differential drawing.
///
/// # Usage
///
/// ```no_run
/// use quill_term::buffer::ScreenBuffer;
///
/// let mut screen = ScreenBuffer::from_terminal()?;
/// screen.set_line(0, "\x1b[1mtitle\x1b[0m");
/// screen.set_at(0, 70, "[1/20]");
/// screen.set_cursor(1, 0);
/// screen.draw();
/// # Ok::<(), quill_term::Error>(())
/// ```
pub struct ScreenBuffer {
    width: u16,
    height: u16,
    lines: Vec<String>,
    cursor: Option<(u16, u16)>,
    cacheable: bool,
    renderer: DiffRenderer,
}

impl ScreenBuffer {
    /// A blank `width × height` buffer with default settings.
    #[must_use]
    pub fn new(width: u16, height: u16) -> Self {
        Self::with_config(width, height, ScreenConfig::default())
    }

    /// A blank `width × height` buffer.
    #[must_use]
    pub fn with_config(width: u16, height: u16, config: ScreenConfig) -> Self {
        Self {
            width,
            height,
            lines: vec![blank(width); usize::from(height)],
            cursor: None,
            cacheable: false,
            renderer: DiffRenderer::new(config),
        }
    }

    /// A blank buffer the size of the terminal on stdout.
    ///
    /// # Errors
    ///
    /// [`Error::Geometry`](crate::Error::Geometry) if the size query fails.
    pub fn from_terminal() -> Result<Self> {
        Self::from_terminal_with_config(ScreenConfig::default())
    }

    /// As [`from_terminal`](Self::from_terminal) with explicit settings.
    ///
    /// # Errors
    ///
    /// [`Error::Geometry`](crate::Error::Geometry) if the size query fails.
    pub fn from_terminal_with_config(config: ScreenConfig) -> Result<Self> {
        let size = terminal::size()?;
        Ok(Self::with_config(size.cols, size.rows, config))
    }

    #[inline]
    #[must_use]
    pub const fn width(&self) -> u16 {
        self.width
    }

    #[inline]
    #[must_use]
    pub const fn height(&self) -> u16 {
        self.height
    }

    /// Row `y` as it will be drawn, or `None` if out of range.
    #[must_use]
    pub fn line(&self, y: u16) -> Option<&str> {
        self.lines.get(usize::from(y)).map(String::as_str)
    }

    /// Replace row `y`. The text is padded or truncated to the width.
    /// Out-of-range rows are ignored.
    pub fn set_line(&mut self, y: u16, text: &str) {
        let width = usize::from(self.width);
        let Some(row) = self.row_mut(y) else {
            return;
        };
        *row = pad_truncate_right_preserve_escapes(text, width);
    }

    /// Splice `text` into row `y` starting at visible column `x`.
    ///
    /// Content before `x` is kept (padded with spaces if the row is short),
    /// content after the inserted span is kept with its styling. A wide
    /// character cut by either edge becomes spaces.
    pub fn set_at(&mut self, y: u16, x: u16, text: &str) {
        let width = usize::from(self.width);
        let Some(row) = self.row_mut(y) else {
            return;
        };
        let spliced = overlay(row, usize::from(x), text);
        *row = pad_truncate_right_preserve_escapes(&spliced, width);
    }

    /// Place the cursor at `(y, x)` after the next draw.
    pub const fn set_cursor(&mut self, y: u16, x: u16) {
        self.cursor = Some((y, x));
    }

    /// Let the next draw look for a vertical scroll between frames. Only
    /// worth it when the content moved as a block (line-wise scrolling).
    pub const fn mark_cacheable(&mut self) {
        self.cacheable = true;
    }

    /// Blank every row.
    pub fn clear(&mut self) {
        let row = blank(self.width);
        for line in &mut self.lines {
            line.clone_from(&row);
        }
    }

    /// Forget what is on the terminal so the next draw repaints every row.
    /// Use after something else wrote to the screen.
    pub fn invalidate(&mut self) {
        self.renderer.force_redraw();
    }

    /// Draw the frame to stdout. Write errors are logged and dropped; the
    /// next draw still diffs against this frame.
    pub fn draw(&mut self) {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        if let Err(e) = self.draw_to(&mut lock) {
            debug!(error = %e, "frame write failed");
        }
    }

    /// Draw the frame to `w`.
    ///
    /// Clears the pending cursor and the cacheable flag, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `w` fails.
    pub fn draw_to(&mut self, w: &mut impl Write) -> io::Result<RenderStats> {
        let cursor = self.cursor.take();
        let detect_scroll = std::mem::take(&mut self.cacheable);

        let stats = self.renderer.render(&self.lines, cursor, detect_scroll);
        debug!(
            rewritten = stats.rows_rewritten,
            saved = stats.rows_skipped,
            scrolled = stats.scrolled_by,
            bytes = stats.bytes_written,
            "frame"
        );
        self.renderer.flush_to(w)?;
        Ok(stats)
    }

    fn row_mut(&mut self, y: u16) -> Option<&mut String> {
        let height = self.height;
        let row = self.lines.get_mut(usize::from(y));
        if row.is_none() {
            warn!(y, height, "row out of range");
        }
        row
    }
}

fn blank(width: u16) -> String {
    " ".repeat(usize::from(width))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style;
    use crate::text::visible_width;
    use pretty_assertions::assert_eq;

    fn screen(width: u16, height: u16) -> ScreenBuffer {
        ScreenBuffer::with_config(
            width,
            height,
            ScreenConfig::default().with_synchronized_updates(false),
        )
    }

    /// Draw into memory and return (stats, output).
    fn draw(screen: &mut ScreenBuffer) -> (RenderStats, String) {
        let mut out = Vec::new();
        let stats = screen.draw_to(&mut out).unwrap();
        (stats, String::from_utf8(out).unwrap())
    }

    fn assert_rows_fit(screen: &ScreenBuffer) {
        for y in 0..screen.height() {
            let line = screen.line(y).unwrap();
            assert_eq!(visible_width(line), usize::from(screen.width()), "row {y}: {line:?}");
        }
    }

    // ── Construction ────────────────────────────────────────────────

    #[test]
    fn new_is_blank() {
        let s = screen(4, 2);
        assert_eq!(s.line(0), Some("    "));
        assert_eq!(s.line(1), Some("    "));
        assert_eq!(s.line(2), None);
    }

    #[test]
    fn dimensions() {
        let s = screen(80, 24);
        assert_eq!((s.width(), s.height()), (80, 24));
    }

    // ── Writes ──────────────────────────────────────────────────────

    #[test]
    fn set_line_pads_and_truncates() {
        let mut s = screen(5, 2);
        s.set_line(0, "ab");
        s.set_line(1, "abcdefgh");
        assert_eq!(s.line(0), Some("ab   "));
        assert_eq!(s.line(1), Some("abcde"));
    }

    #[test]
    fn set_line_keeps_escapes() {
        let mut s = screen(4, 1);
        let text = format!("{}ab{}", style::BOLD, style::RESET);
        s.set_line(0, &text);
        assert_eq!(s.line(0), Some(format!("{text}  ").as_str()));
        assert_rows_fit(&s);
    }

    #[test]
    fn set_line_out_of_range_is_noop() {
        let mut s = screen(3, 1);
        s.set_line(5, "xyz");
        assert_eq!(s.line(0), Some("   "));
    }

    #[test]
    fn set_at_splices() {
        let mut s = screen(8, 1);
        s.set_line(0, "abcdefgh");
        s.set_at(0, 2, "XY");
        assert_eq!(s.line(0), Some("abXYefgh"));
    }

    #[test]
    fn set_at_past_end_is_clipped() {
        let mut s = screen(6, 1);
        s.set_at(0, 4, "XYZ");
        assert_eq!(s.line(0), Some("    XY"));
        assert_rows_fit(&s);
    }

    #[test]
    fn set_at_over_wide_char_keeps_width() {
        let mut s = screen(6, 1);
        s.set_line(0, "中文字");
        s.set_at(0, 1, "x");
        assert_rows_fit(&s);
    }

    #[test]
    fn clear_blanks_rows() {
        let mut s = screen(3, 2);
        s.set_line(0, "abc");
        s.clear();
        assert_eq!(s.line(0), Some("   "));
    }

    // ── Drawing ─────────────────────────────────────────────────────

    #[test]
    fn first_draw_paints_every_row() {
        let mut s = screen(3, 3);
        let (stats, _) = draw(&mut s);
        assert_eq!(stats.rows_rewritten, 3);
    }

    #[test]
    fn redraw_without_writes_is_idle() {
        let mut s = screen(3, 2);
        s.set_line(0, "abc");
        draw(&mut s);
        let (stats, out) = draw(&mut s);
        assert_eq!(stats.rows_rewritten, 0);
        assert!(!out.contains("abc"));
    }

    #[test]
    fn only_changed_rows_are_written() {
        let mut s = screen(3, 3);
        draw(&mut s);
        s.set_line(1, "new");
        let (stats, out) = draw(&mut s);
        assert_eq!(stats.rows_rewritten, 1);
        assert!(out.contains("\x1b[2;1H\x1b[?7lnew\x1b[0m"));
    }

    #[test]
    fn scrolling_by_one_line_uses_scroll_region() {
        let mut s = screen(1, 4);
        for (y, t) in (0..).zip(["A", "B", "C", "D"]) {
            s.set_line(y, t);
        }
        draw(&mut s);

        for (y, t) in (0..).zip(["B", "C", "D", "E"]) {
            s.set_line(y, t);
        }
        s.mark_cacheable();
        let (stats, out) = draw(&mut s);

        assert_eq!(stats.scrolled_by, 1);
        assert_eq!(stats.rows_rewritten, 1);
        assert!(out.contains("\x1b[1;4r\x1b[1S"));
        assert!(out.contains("\x1b[4;1H\x1b[?7lE\x1b[0m"));
    }

    #[test]
    fn cacheable_is_one_shot() {
        let mut s = screen(1, 3);
        for (y, t) in (0..).zip(["A", "B", "C"]) {
            s.set_line(y, t);
        }
        s.mark_cacheable();
        draw(&mut s);

        for (y, t) in (0..).zip(["B", "C", "D"]) {
            s.set_line(y, t);
        }
        let (stats, _) = draw(&mut s);
        assert_eq!(stats.scrolled_by, 0);
        assert_eq!(stats.rows_rewritten, 3);
    }

    #[test]
    fn cursor_is_applied_once() {
        let mut s = screen(5, 3);
        s.set_cursor(1, 2);
        let (_, out) = draw(&mut s);
        assert!(out.ends_with("\x1b[3;1H\x1b[2;3H\x1b[?25h"));

        let (_, out) = draw(&mut s);
        assert!(out.ends_with("\x1b[3;1H\x1b[?25h"));
    }

    #[test]
    fn invalidate_forces_full_repaint() {
        let mut s = screen(2, 2);
        draw(&mut s);
        s.invalidate();
        let (stats, _) = draw(&mut s);
        assert_eq!(stats.rows_rewritten, 2);
    }

    #[test]
    fn synchronized_updates_by_default() {
        let mut s = ScreenBuffer::new(2, 1);
        let (_, out) = draw(&mut s);
        assert!(out.starts_with("\x1b[?2026h\x1b[?25l"));
        assert!(out.ends_with("\x1b[?25h\x1b[?2026l"));
    }
}
