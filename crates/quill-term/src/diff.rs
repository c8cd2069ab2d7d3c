// SPDX-License-Identifier: MIT
//
// Differential line renderer.
//
// Instead of repainting the whole screen every frame, we compare the rows of
// the current frame against the rows the terminal is known to show and emit
// only the rows that differ. A viewer that scrolls by one line would still
// change every row, so before diffing we look for a vertical offset that
// lines the previous frame up with the current one and let the terminal move
// the rows itself with a scroll region. Afterwards only the newly exposed
// rows need text.
//
// The pipeline per frame:
//
//   1. ScreenBuffer hands its rows to DiffRenderer::render().
//   2. Optionally: plan_scroll() finds the best offset, the scroll sequence is
//      emitted and the stored previous frame is shifted to match.
//   3. Changed rows are written whole: position, autowrap off, text, reset.
//   4. All output is accumulated in OutputBuffer, written with one syscall.
//
// The previous frame uses the empty string for "unknown". Rows are always
// padded to the screen width, so an unknown row never compares equal to real
// content and is always rewritten.

use std::io::{self, Write};

use crate::ansi;
use crate::config::ScreenConfig;
use crate::output::OutputBuffer;

// ─── RenderStats ─────────────────────────────────────────────────────────────

/// Statistics from a render pass, for profiling and debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderStats {
    /// Rows that differed from the previous frame and were written.
    pub rows_rewritten: usize,
    /// Rows that matched the previous frame and were skipped.
    pub rows_skipped: usize,
    /// Vertical offset applied with a scroll region, 0 if none.
    pub scrolled_by: isize,
    /// Total bytes of ANSI output generated.
    pub bytes_written: usize,
}

// ─── Scroll detection ────────────────────────────────────────────────────────

/// A vertical alignment between two frames: `current[i] == previous[i + offset]`
/// for `matches` rows, the first of which is `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollPlan {
    pub offset: isize,
    pub start: usize,
    pub matches: usize,
}

/// Find the offset `k` in `[-h, h)` that maximizes the number of rows with
/// `previous[i + k] == current[i]`.
///
/// Ties go to the smallest `|k|`, then the smallest signed `k`. Returns `None`
/// when the best alignment is no shift at all or nothing matches. Unknown
/// (empty) previous rows never match.
#[must_use]
pub fn plan_scroll(previous: &[String], current: &[String]) -> Option<ScrollPlan> {
    let h = current.len().min(previous.len());
    let span = isize::try_from(h).ok()?;
    let mut best: Option<ScrollPlan> = None;

    for k in -span..span {
        let mut matches = 0;
        let mut start = None;
        for (i, row) in current.iter().enumerate().take(h) {
            let Some(prev) = i.checked_add_signed(k).and_then(|j| previous.get(j)) else {
                continue;
            };
            if !prev.is_empty() && prev == row {
                matches += 1;
                start.get_or_insert(i);
            }
        }
        let Some(start) = start else {
            continue;
        };

        let better = best.is_none_or(|b| {
            matches > b.matches
                || (matches == b.matches
                    && (k.unsigned_abs(), k) < (b.offset.unsigned_abs(), b.offset))
        });
        if better {
            best = Some(ScrollPlan {
                offset: k,
                start,
                matches,
            });
        }
    }

    best.filter(|plan| plan.offset != 0)
}

/// Rows `top..=bottom` of the scroll region a plan needs on a screen of
/// `height` rows.
const fn scroll_region(plan: ScrollPlan, height: usize) -> (usize, usize) {
    let top = if plan.offset > 0 {
        plan.start
    } else {
        plan.start - plan.offset.unsigned_abs()
    };
    (top, height - 1)
}

/// Emit the scroll-region and scroll sequences for `plan`.
fn emit_scroll(w: &mut impl Write, plan: ScrollPlan, height: usize) -> io::Result<()> {
    let (top, bottom) = scroll_region(plan, height);
    let top = u16::try_from(top).unwrap_or(u16::MAX);
    let bottom = u16::try_from(bottom).unwrap_or(u16::MAX);
    let lines = u16::try_from(plan.offset.unsigned_abs()).unwrap_or(u16::MAX);

    ansi::set_scroll_region(w, top, bottom)?;
    if plan.offset > 0 {
        ansi::scroll_up(w, lines)
    } else {
        ansi::scroll_down(w, lines)
    }
}

/// Shift `previous` to what the terminal shows after `plan` was emitted.
/// Rows the scroll exposed become unknown.
fn apply_scroll(previous: &mut [String], plan: ScrollPlan) {
    let (top, _) = scroll_region(plan, previous.len());
    let lines = plan.offset.unsigned_abs();
    let region = &mut previous[top..];

    if plan.offset > 0 {
        region.rotate_left(lines);
        let len = region.len();
        for row in &mut region[len - lines..] {
            row.clear();
        }
    } else {
        region.rotate_right(lines);
        for row in &mut region[..lines] {
            row.clear();
        }
    }
}

// ─── DiffRenderer ────────────────────────────────────────────────────────────

/// Line renderer that emits ANSI only for changed rows.
///
/// Keeps the last rendered frame for comparison. All output is buffered for
/// a single `write()` per frame.
pub struct DiffRenderer {
    output: OutputBuffer,
    previous: Vec<String>,
    config: ScreenConfig,
}

impl DiffRenderer {
    /// Create a renderer whose first frame draws every row.
    #[must_use]
    pub fn new(config: ScreenConfig) -> Self {
        Self {
            output: OutputBuffer::new(),
            previous: Vec::new(),
            config,
        }
    }

    /// Diff `current` against the previous frame and generate ANSI output.
    ///
    /// `cursor` is a 0-based `(y, x)` placement applied after all rows.
    /// `detect_scroll` enables the scroll-region step for this frame.
    pub fn render(
        &mut self,
        current: &[String],
        cursor: Option<(u16, u16)>,
        detect_scroll: bool,
    ) -> RenderStats {
        self.output.clear();
        let mut stats = RenderStats::default();

        let height = current.len();
        if height == 0 {
            self.previous.clear();
            return stats;
        }
        if self.previous.len() != height {
            self.previous = vec![String::new(); height];
        }

        let out = &mut self.output;
        if self.config.synchronized_updates {
            ansi::begin_sync(out).ok();
        }
        ansi::cursor_hide(out).ok();

        if detect_scroll {
            if let Some(plan) = plan_scroll(&self.previous, current) {
                emit_scroll(out, plan, height).ok();
                apply_scroll(&mut self.previous, plan);
                stats.scrolled_by = plan.offset;
            }
        }

        // ── Row diff ──
        for ((y, row), prev) in (0u16..).zip(current).zip(&self.previous) {
            if row == prev {
                stats.rows_skipped += 1;
                continue;
            }
            ansi::cursor_to(out, 0, y).ok();
            ansi::disable_autowrap(out).ok();
            out.push_str(row);
            ansi::reset(out).ok();
            stats.rows_rewritten += 1;
        }

        ansi::reset_scroll_region(out).ok();
        let last = u16::try_from(height - 1).unwrap_or(u16::MAX);
        ansi::cursor_to(out, 0, last).ok();
        if let Some((y, x)) = cursor {
            ansi::cursor_to(out, x, y).ok();
        }
        ansi::cursor_show(out).ok();
        if self.config.synchronized_updates {
            ansi::end_sync(out).ok();
        }

        stats.bytes_written = out.len();
        self.previous.clone_from_slice(current);
        stats
    }

    /// The raw ANSI bytes from the last render (for testing and debugging).
    #[must_use]
    pub fn output_bytes(&self) -> &[u8] {
        self.output.as_bytes()
    }

    /// Write accumulated output to `w` and clear the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `w` fails.
    pub fn flush_to(&mut self, w: &mut impl Write) -> io::Result<()> {
        self.output.flush_to(w)
    }

    /// Forget what the terminal shows so the next render draws everything.
    pub fn force_redraw(&mut self) {
        for row in &mut self.previous {
            row.clear();
        }
    }

    /// The frame the terminal is believed to show. Unknown rows are empty.
    #[must_use]
    pub fn previous(&self) -> &[String] {
        &self.previous
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
