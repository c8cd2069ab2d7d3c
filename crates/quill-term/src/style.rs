// SPDX-License-Identifier: MIT
//
// SGR style strings for composing styled rows.
//
// Screen rows are plain `String`s with escape sequences embedded inline, so
// callers style text by concatenation:
//
//     format!("{}{subject}{}", style::BOLD, style::RESET)
//
// The renderer measures rows with escapes excluded (see `text`) and appends
// a reset after every row it writes, so an unterminated style never leaks
// into the next line.

// ─── 8 / 16 Color ────────────────────────────────────────────────────────────

pub const RED8: &str = "\x1b[31m";
pub const BG_RED8: &str = "\x1b[41m";
pub const WHITE8: &str = "\x1b[37m";

pub const BRIGHT_RED: &str = "\x1b[31;1m";
pub const BG_BRIGHT_RED: &str = "\x1b[41;1m";

// ─── 256 Color ───────────────────────────────────────────────────────────────

pub const BLACK: &str = "\x1b[38;5;0m";
pub const RED: &str = "\x1b[38;5;1m";
pub const GREEN: &str = "\x1b[38;5;2m";
pub const YELLOW: &str = "\x1b[38;5;3m";
pub const BLUE: &str = "\x1b[38;5;4m";
pub const MAGENTA: &str = "\x1b[38;5;5m";
pub const CYAN: &str = "\x1b[38;5;6m";
pub const GREY: &str = "\x1b[38;5;7m";
pub const WHITE: &str = "\x1b[38;5;15m";

pub const BG_BLACK: &str = "\x1b[48;5;232m";
pub const BG_RED: &str = "\x1b[48;5;1m";
pub const BG_GREY: &str = "\x1b[48;5;7m";

// ─── Attributes ──────────────────────────────────────────────────────────────

pub const BOLD: &str = "\x1b[1m";
pub const UNDERLINE: &str = "\x1b[4m";
pub const REVERSE: &str = "\x1b[7m";
pub const RESET: &str = "\x1b[0m";

/// White on near-black. Unlike [`RESET`] this pins the colors instead of
/// falling back to the terminal's defaults, and leaves attributes alone.
pub const NORMAL: &str = "\x1b[38;5;15m\x1b[48;5;232m";

/// Foreground from the 256-color palette.
#[must_use]
pub fn fg256(index: u8) -> String {
    format!("\x1b[38;5;{index}m")
}

/// Background from the 256-color palette.
#[must_use]
pub fn bg256(index: u8) -> String {
    format!("\x1b[48;5;{index}m")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::visible_width;

    #[test]
    fn palette_helpers_match_constants() {
        assert_eq!(fg256(1), RED);
        assert_eq!(fg256(15), WHITE);
        assert_eq!(bg256(7), BG_GREY);
    }

    #[test]
    fn normal_is_white_on_black() {
        assert_eq!(NORMAL, format!("{WHITE}{BG_BLACK}"));
    }

    #[test]
    fn styles_have_no_visible_width() {
        for s in [RED8, BRIGHT_RED, BLACK, BG_BLACK, BOLD, REVERSE, RESET, NORMAL] {
            assert_eq!(visible_width(s), 0, "{s:?}");
        }
    }
}
