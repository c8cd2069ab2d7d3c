// SPDX-License-Identifier: MIT
//
// Text measurement for rows with embedded escape sequences.
//
// Screen rows are strings that carry their own styling inline. Everything
// that sizes a row therefore has to agree on one question: which bytes are
// escape sequences (zero columns) and which are text (their Unicode width)?
//
// The answer is a single grammar, used both by the regex in
// `strip_escapes` and by the hand-written scanner in `escape_len`:
//
//     ESC                          bare escape
//     ESC '[' <non-letters>* <letter>?   CSI-style sequence
//
// Widths come from `unicode-width`, summed per character: wide CJK counts
// 2, combining marks and control characters 0. Truncation works on
// grapheme clusters so a base character never loses its combining marks.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use tracing::error;
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthChar;

const ESC: char = '\x1b';

/// Retry bound for [`pad_truncate_right_preserve_escapes`].
const MAX_FIT_ATTEMPTS: usize = 4;

static ESCAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b(?:\[[^a-zA-Z]*[a-zA-Z]?)?").expect("escape pattern is valid")
});

// ─── Measuring ──────────────────────────────────────────────────────────────

/// Remove every embedded escape sequence.
///
/// Borrows when there is nothing to strip.
#[must_use]
pub fn strip_escapes(s: &str) -> Cow<'_, str> {
    if s.contains(ESC) {
        ESCAPE_RE.replace_all(s, "")
    } else {
        Cow::Borrowed(s)
    }
}

/// Rendered width of `s` in terminal columns, escape sequences excluded.
#[must_use]
pub fn visible_width(s: &str) -> usize {
    raw_width(&strip_escapes(s))
}

/// Length in bytes of the escape sequence at the start of `s`, or `None`
/// if `s` does not start with ESC.
///
/// An unterminated CSI sequence runs to the end of `s`.
#[must_use]
pub fn escape_len(s: &str) -> Option<usize> {
    let rest = s.strip_prefix(ESC)?;
    let Some(params) = rest.strip_prefix('[') else {
        return Some(ESC.len_utf8());
    };
    let body = params
        .find(|c: char| c.is_ascii_alphabetic())
        .map_or(params.len(), |i| i + 1);
    Some(ESC.len_utf8() + 1 + body)
}

/// Width counting every character, escape bytes included (ESC itself is a
/// control character and counts 0).
fn raw_width(s: &str) -> usize {
    s.chars().map(|c| c.width().unwrap_or(0)).sum()
}

// ─── Tokens ─────────────────────────────────────────────────────────────────

/// A piece of a styled string: a whole escape sequence or one grapheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Escape(&'a str),
    Text(&'a str),
}

impl Token<'_> {
    const fn as_str(&self) -> &str {
        match self {
            Self::Escape(s) | Self::Text(s) => s,
        }
    }

    fn width(&self) -> usize {
        match self {
            Self::Escape(_) => 0,
            Self::Text(g) => raw_width(g),
        }
    }
}

/// Splits a string into [`Token`]s, yielding each with its byte offset.
struct Tokens<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Tokens<'a> {
    const fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = (usize, Token<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.src[self.pos..];
        let start = self.pos;
        if let Some(len) = escape_len(rest) {
            self.pos += len;
            return Some((start, Token::Escape(&rest[..len])));
        }
        let grapheme = rest.graphemes(true).next()?;
        self.pos += grapheme.len();
        Some((start, Token::Text(grapheme)))
    }
}

/// Keep whole tokens of `s` while the visible width stays within `w`.
///
/// Escapes before the cut are kept; a grapheme that would cross `w` ends
/// the scan. Returns the kept prefix and its visible width.
fn truncate_tokens(s: &str, w: usize) -> (&str, usize) {
    let mut used = 0;
    let mut end = 0;
    for (start, token) in Tokens::new(s) {
        let tw = token.width();
        if used + tw > w {
            break;
        }
        used += tw;
        end = start + token.as_str().len();
    }
    (&s[..end], used)
}

// ─── Fixed Width ────────────────────────────────────────────────────────────

/// Truncate on the right, then pad on the left, to exactly `w` columns.
///
/// Escape sequences count zero columns.
#[must_use]
pub fn pad_truncate_left(s: &str, w: usize) -> String {
    let (kept, used) = truncate_tokens(s, w);
    let mut out = String::with_capacity(kept.len() + w - used);
    out.extend(std::iter::repeat_n(' ', w - used));
    out.push_str(kept);
    out
}

/// Truncate and pad on the right to exactly `w` visible columns, keeping
/// the escape sequences embedded in the kept text.
///
/// The first cut is made on raw width with a budget of `w` plus the width
/// the escape bytes take up. That is exact when every escape survives the
/// cut; when escapes fall after the cut, or the cut lands inside one, the
/// result is too wide and the cut is retried on the shortened text. After
/// [`MAX_FIT_ATTEMPTS`] the result is taken from a token-exact scan and the
/// miss is logged.
#[must_use]
pub fn pad_truncate_right_preserve_escapes(s: &str, w: usize) -> String {
    let mut candidate = s;
    for _ in 0..MAX_FIT_ATTEMPTS {
        let visible = visible_width(candidate);
        let budget = w + raw_width(candidate) - visible;
        let cut = drop_severed_escape(candidate, truncate_raw(candidate, budget));
        let cut_width = visible_width(cut);
        if cut_width <= w {
            return pad_right(cut, w - cut_width);
        }
        candidate = cut;
    }

    error!(
        input = ?s,
        width = w,
        "escape-preserving truncation did not converge, using token scan"
    );
    let (kept, used) = truncate_tokens(candidate, w);
    pad_right(kept, w - used)
}

/// Cut `s` at the last grapheme boundary whose raw width fits `budget`.
fn truncate_raw(s: &str, budget: usize) -> &str {
    let mut used = 0;
    for (i, g) in s.grapheme_indices(true) {
        used += raw_width(g);
        if used > budget {
            return &s[..i];
        }
    }
    s
}

/// If `cut` (a prefix of `full`) ends inside an escape sequence, drop the
/// partial sequence.
fn drop_severed_escape<'a>(full: &str, cut: &'a str) -> &'a str {
    for (start, token) in Tokens::new(full) {
        let end = start + token.as_str().len();
        if end >= cut.len() {
            return match token {
                Token::Escape(_) if start < cut.len() && end > cut.len() => &cut[..start],
                _ => cut,
            };
        }
    }
    cut
}

fn pad_right(s: &str, pad: usize) -> String {
    let mut out = String::with_capacity(s.len() + pad);
    out.push_str(s);
    out.extend(std::iter::repeat_n(' ', pad));
    out
}

// ─── Overlay ────────────────────────────────────────────────────────────────

/// Write `text` over `row` starting at visible column `x`.
///
/// Content before `x` is kept (padded with spaces if the row is shorter);
/// content after the overwritten span is kept too. A wide character cut by
/// either edge of the span becomes spaces. Escape sequences from the
/// overwritten span are re-emitted after `text`, so the rest of the row
/// keeps the styling it had.
#[must_use]
pub fn overlay(row: &str, x: usize, text: &str) -> String {
    let mut out = String::with_capacity(row.len() + text.len() + x);
    let mut tokens = Tokens::new(row).peekable();
    let mut col = 0;

    // Prefix: everything left of `x`.
    while col < x {
        let Some(&(_, token)) = tokens.peek() else { break };
        let tw = token.width();
        if col + tw > x {
            break;
        }
        out.push_str(token.as_str());
        col += tw;
        tokens.next();
    }
    out.extend(std::iter::repeat_n(' ', x - col));
    out.push_str(text);

    // Overwritten span.
    let end = x + visible_width(text);
    let mut hidden_styles = String::new();
    while col < end {
        let Some((_, token)) = tokens.next() else { break };
        match token {
            Token::Escape(e) => hidden_styles.push_str(e),
            Token::Text(_) => col += token.width(),
        }
    }
    if col > end {
        out.extend(std::iter::repeat_n(' ', col - end));
    }
    out.push_str(&hidden_styles);

    for (_, token) in tokens {
        out.push_str(token.as_str());
    }
    out
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // ── strip_escapes ───────────────────────────────────────────────────

    #[test]
    fn strip_plain_text_borrows() {
        assert!(matches!(strip_escapes("hello"), Cow::Borrowed("hello")));
    }

    #[test]
    fn strip_cases() {
        for (input, want) in [
            ("", ""),
            ("hello", "hello"),
            ("\x1bhello", "hello"),
            ("\x1bhell\x1bo på dig", "hello på dig"),
            ("\x1b[1mbold\x1b[0m", "bold"),
            ("\x1b[38;5;15m\x1b[48;5;232mx", "x"),
            ("a\x1b[12", "a"),
        ] {
            assert_eq!(strip_escapes(input), want, "input {input:?}");
        }
    }

    // ── visible_width ───────────────────────────────────────────────────

    #[test]
    fn width_cases() {
        for (input, want) in [
            ("", 0),
            ("hello", 5),
            ("\x1bhello", 5),
            ("\x1bhell\x1bo", 5),
            ("för räksmörgås", 14),
            ("ಠ_ಠ", 3),
            ("中文", 4),
            ("\x1b[31m中\x1b[0m", 2),
            ("e\u{301}", 1),
        ] {
            assert_eq!(visible_width(input), want, "input {input:?}");
        }
    }

    // ── escape_len ──────────────────────────────────────────────────────

    #[test]
    fn escape_len_cases() {
        assert_eq!(escape_len("abc"), None);
        assert_eq!(escape_len("\x1b"), Some(1));
        assert_eq!(escape_len("\x1bx"), Some(1));
        assert_eq!(escape_len("\x1b[0mrest"), Some(4));
        assert_eq!(escape_len("\x1b[38;5;1mX"), Some(9));
        assert_eq!(escape_len("\x1b[12"), Some(4));
    }

    #[test]
    fn escape_len_agrees_with_regex() {
        for s in ["\x1b", "\x1bq", "\x1b[", "\x1b[1;2H", "\x1b[?25l", "\x1b[4:3m", "\x1b[ö1m"] {
            let m = ESCAPE_RE.find(s).unwrap();
            assert_eq!(Some(m.end()), escape_len(s), "{s:?}");
        }
    }

    // ── pad_truncate_left ───────────────────────────────────────────────

    #[test]
    fn left_cases() {
        for (input, w, want) in [
            ("", 0, ""),
            ("", 2, "  "),
            ("hello", 5, "hello"),
            ("hello", 2, "he"),
            ("hello", 10, "     hello"),
            ("\x1bhello", 5, "\x1bhello"),
            ("för räksmörgås", 14, "för räksmörgås"),
            ("för \x1bräksmörgås", 15, " för \x1bräksmörgås"),
            ("ಠ_ಠ", 3, "ಠ_ಠ"),
            ("ಠ_ಠ", 4, " ಠ_ಠ"),
            ("ಠ_ಠ", 2, "ಠ_"),
            ("\x1b[1mhi", 4, "  \x1b[1mhi"),
        ] {
            assert_eq!(pad_truncate_left(input, w), want, "input {input:?} w {w}");
        }
    }

    #[test]
    fn left_wide_char_at_boundary_becomes_padding() {
        let out = pad_truncate_left("中文", 3);
        assert_eq!(out, " 中");
        assert_eq!(visible_width(&out), 3);
    }

    // ── pad_truncate_right_preserve_escapes ─────────────────────────────

    #[test]
    fn right_cases() {
        for (input, w, want) in [
            ("", 0, ""),
            ("", 2, "  "),
            ("hello", 5, "hello"),
            ("hello", 2, "he"),
            ("hello", 10, "hello     "),
            // Escape width taken into account.
            ("\x1b[2mhello", 5, "\x1b[2mhello"),
            // Trailing escape cut off.
            ("\x1b[2mhello world\x1b[2m", 5, "\x1b[2mhello"),
            // Escape at the end of the kept text survives.
            ("\x1b[2mhello\x1b[2m world", 5, "\x1b[2mhello\x1b[2m"),
            // Escape cut off along with some text.
            ("\x1b[2mhello", 3, "\x1b[2mhel"),
            ("för räksmörgås", 14, "för räksmörgås"),
            ("för \x1b[1mräksmörgås", 15, "för \x1b[1mräksmörgås "),
            ("ಠ_ಠ", 3, "ಠ_ಠ"),
            ("ಠ_ಠ", 4, "ಠ_ಠ "),
            ("ಠ_ಠ", 2, "ಠ_"),
        ] {
            assert_eq!(
                pad_truncate_right_preserve_escapes(input, w),
                want,
                "input {input:?} w {w}"
            );
        }
    }

    #[test]
    fn right_escape_severed_at_boundary() {
        // The raw-width budget lands inside the trailing sequence.
        let out = pad_truncate_right_preserve_escapes("abcde\x1b[1;2;3m", 4);
        assert_eq!(out, "abcd");
        assert_eq!(visible_width(&out), 4);
    }

    #[test]
    fn right_never_emits_partial_sequence() {
        let out = pad_truncate_right_preserve_escapes("abcdef\x1b[38;5;100mXYZ", 7);
        assert_eq!(visible_width(&out), 7);
        assert!(!out.contains("\x1b[38;5;1\x1b"));
        for (_, token) in Tokens::new(&out) {
            if let Token::Escape(e) = token {
                assert!(e.ends_with(|c: char| c.is_ascii_alphabetic()), "{e:?}");
            }
        }
    }

    #[test]
    fn right_many_trailing_escapes_still_exact() {
        // Enough escapes after the cut that the raw-width retries give up
        // and the token scan supplies the answer.
        let s = "a\x1b[1mb\x1b[1mc\x1b[1md\x1b[1me\x1b[1mf";
        let out = pad_truncate_right_preserve_escapes(s, 1);
        assert_eq!(visible_width(&out), 1);
        assert!(out.starts_with('a'));
    }

    #[test]
    fn right_wide_char_straddling_width() {
        let out = pad_truncate_right_preserve_escapes("ab中", 3);
        assert_eq!(out, "ab ");
    }

    // ── overlay ─────────────────────────────────────────────────────────

    #[test]
    fn overlay_in_middle() {
        assert_eq!(overlay("0123456789", 3, "abc"), "012abc6789");
    }

    #[test]
    fn overlay_past_end_pads() {
        assert_eq!(overlay("ab", 4, "X"), "ab  X");
    }

    #[test]
    fn overlay_at_start() {
        assert_eq!(overlay("hello", 0, "J"), "Jello");
    }

    #[test]
    fn overlay_longer_than_row() {
        assert_eq!(overlay("abc", 1, "WXYZ"), "aWXYZ");
    }

    #[test]
    fn overlay_keeps_styles_before_and_after() {
        let row = "\x1b[1mab\x1b[0mcdef";
        let out = overlay(row, 1, "XY");
        assert_eq!(out, "\x1b[1maXY\x1b[0mdef");
        assert_eq!(visible_width(&out), 6);
    }

    #[test]
    fn overlay_wide_char_split_at_start() {
        // '中' covers columns 2-3; writing at 3 splits it.
        let out = overlay("ab中cd", 3, "X");
        assert_eq!(out, "ab Xcd");
        assert_eq!(visible_width(&out), 6);
    }

    #[test]
    fn overlay_wide_char_split_at_end() {
        let out = overlay("中b", 0, "X");
        assert_eq!(out, "X b");
        assert_eq!(visible_width(&out), 3);
    }

    #[test]
    fn overlay_styled_text() {
        let out = overlay("..........", 2, "\x1b[7mLoading…\x1b[0m");
        assert_eq!(strip_escapes(&out), "..Loading…");
    }
}
