// SPDX-License-Identifier: MIT
//
// Key decoding.
//
// Turns raw terminal bytes into complete keys: single characters, control
// codes, UTF-8 code points, and the named CSI / SS3 sequences that arrow,
// editing and function keys produce.
//
// # Design
//
// The decoder pulls bytes one at a time from a ByteSource. Only the first
// byte of a key waits for the caller's timeout; every byte after that waits
// at most the sequence timeout. A lone ESC is therefore the Escape key once
// the sequence timeout passes without a follow byte, and a sequence that
// stalls halfway is discarded rather than delivered as fragments.
//
// Anomalies (unknown sequences, stalls, invalid UTF-8) are logged and
// dropped. A byte that cannot belong to the sequence being read is pushed
// back and becomes the start of the next key, so no keystroke is lost to a
// neighbouring garbage sequence.

use std::fmt;
use std::io;
use std::time::Duration;

use bitflags::bitflags;
use tracing::warn;

use crate::reader::ByteSource;

// ─── Key Types ──────────────────────────────────────────────────────────────

/// A complete key: identity plus modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    /// Which key was pressed.
    pub code: KeyCode,
    /// Active modifier keys.
    pub modifiers: Modifiers,
}

/// Identity of a key.
///
/// Named keys have dedicated variants; characters use
/// [`Char`](KeyCode::Char). Function keys use [`F`](KeyCode::F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    /// A Unicode character. With [`Modifiers::CTRL`] this is a control code
    /// (`Ctrl-C` is `Char('c')`).
    Char(char),
    // ── Named keys ──────────────────────────────────────────────
    Enter,
    Tab,
    Backspace,
    Escape,
    Delete,
    Insert,
    // ── Navigation ──────────────────────────────────────────────
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    // ── Function keys ───────────────────────────────────────────
    /// F1 through F12.
    F(u8),
}

bitflags! {
    /// Keyboard modifier flags.
    ///
    /// Matches the xterm CSI modifier encoding, where `param = 1 + bitmask`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0000_0001;
        const ALT   = 0b0000_0010;
        const CTRL  = 0b0000_0100;
    }
}

impl Key {
    /// A key with no modifiers.
    #[must_use]
    pub const fn new(code: KeyCode) -> Self {
        Self {
            code,
            modifiers: Modifiers::empty(),
        }
    }

    /// A key with the given modifiers.
    #[must_use]
    pub const fn with(code: KeyCode, modifiers: Modifiers) -> Self {
        Self { code, modifiers }
    }

    /// A plain character.
    #[must_use]
    pub const fn char(c: char) -> Self {
        Self::new(KeyCode::Char(c))
    }

    /// `Ctrl-<c>`; `c` should be lowercase.
    #[must_use]
    pub const fn ctrl(c: char) -> Self {
        Self::with(KeyCode::Char(c), Modifiers::CTRL)
    }

    /// `Meta-<c>` (ESC followed by a letter).
    #[must_use]
    pub const fn meta(c: char) -> Self {
        Self::with(KeyCode::Char(c), Modifiers::ALT)
    }

    /// Whether this is the unmodified character `c`.
    #[must_use]
    pub fn is_char(&self, c: char) -> bool {
        self.modifiers.is_empty() && self.code == KeyCode::Char(c)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.modifiers.contains(Modifiers::CTRL) {
            f.write_str("Ctrl-")?;
        }
        if self.modifiers.contains(Modifiers::ALT) {
            f.write_str("Meta-")?;
        }
        if self.modifiers.contains(Modifiers::SHIFT) {
            f.write_str("Shift-")?;
        }
        match self.code {
            KeyCode::Char(c) if self.modifiers.contains(Modifiers::CTRL) => {
                write!(f, "{}", c.to_ascii_uppercase())
            }
            KeyCode::Char(c) => write!(f, "{c}"),
            KeyCode::F(n) => write!(f, "F{n}"),
            KeyCode::Enter => f.write_str("Enter"),
            KeyCode::Tab => f.write_str("Tab"),
            KeyCode::Backspace => f.write_str("Backspace"),
            KeyCode::Escape => f.write_str("Escape"),
            KeyCode::Delete => f.write_str("Delete"),
            KeyCode::Insert => f.write_str("Insert"),
            KeyCode::Up => f.write_str("Up"),
            KeyCode::Down => f.write_str("Down"),
            KeyCode::Left => f.write_str("Left"),
            KeyCode::Right => f.write_str("Right"),
            KeyCode::Home => f.write_str("Home"),
            KeyCode::End => f.write_str("End"),
            KeyCode::PageUp => f.write_str("PageUp"),
            KeyCode::PageDown => f.write_str("PageDown"),
        }
    }
}

// ─── Decoder ────────────────────────────────────────────────────────────────

/// Longest CSI parameter run we accept before giving up on a sequence.
const MAX_SEQUENCE_LEN: usize = 16;

/// Pull-based key decoder over a [`ByteSource`].
pub struct KeyDecoder<S> {
    source: S,
    /// A byte read but not consumed; decoded before touching the source.
    pending: Option<u8>,
    sequence_timeout: Duration,
}

impl<S: ByteSource> KeyDecoder<S> {
    /// Create a decoder. `sequence_timeout` bounds every read after the
    /// first byte of a key.
    pub const fn new(source: S, sequence_timeout: Duration) -> Self {
        Self {
            source,
            pending: None,
            sequence_timeout,
        }
    }

    /// Decode the next key, waiting at most `wait` for its first byte.
    ///
    /// `Ok(None)` means no key: either nothing arrived in time or the bytes
    /// that did were discarded as malformed.
    ///
    /// # Errors
    ///
    /// Propagates source errors on the first byte, and end-of-input at any
    /// point. A failed read in the middle of a sequence is logged and the
    /// sequence discarded.
    pub fn next_key(&mut self, wait: Duration) -> io::Result<Option<Key>> {
        let first = match self.pending.take() {
            Some(b) => b,
            None => match self.source.read_byte(wait)? {
                Some(b) => b,
                None => return Ok(None),
            },
        };
        self.decode(first)
    }

    /// Read a byte that continues the current key.
    fn follow(&mut self) -> io::Result<Option<u8>> {
        if let Some(b) = self.pending.take() {
            return Ok(Some(b));
        }
        match self.source.read_byte(self.sequence_timeout) {
            Ok(b) => Ok(b),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(e),
            Err(e) => {
                warn!(error = %e, "read failed mid-sequence");
                Ok(None)
            }
        }
    }

    fn decode(&mut self, first: u8) -> io::Result<Option<Key>> {
        let key = match first {
            0x1B => return self.escape(),
            0x09 => Key::new(KeyCode::Tab),
            0x0A | 0x0D => Key::new(KeyCode::Enter),
            0x7F => Key::new(KeyCode::Backspace),
            // Control codes: Ctrl-@, Ctrl-A..Ctrl-Z, Ctrl-\ ] ^ _
            b @ 0x00..=0x1F => Key::ctrl(char::from(b | 0x40).to_ascii_lowercase()),
            b @ 0x20..=0x7E => Key::char(char::from(b)),
            lead => return self.utf8(lead),
        };
        Ok(Some(key))
    }

    // ── Escape sequences ────────────────────────────────────────────

    fn escape(&mut self) -> io::Result<Option<Key>> {
        let Some(next) = self.follow()? else {
            return Ok(Some(Key::new(KeyCode::Escape)));
        };
        match next {
            b'[' => self.csi(),
            b'O' => self.ss3(),
            b if b.is_ascii_alphabetic() => Ok(Some(Key::meta(char::from(b)))),
            other => {
                self.pending = Some(other);
                Ok(Some(Key::new(KeyCode::Escape)))
            }
        }
    }

    /// Read parameter bytes up to the final byte. A sequence that outgrows
    /// [`MAX_SEQUENCE_LEN`] is still read to its end, then discarded whole.
    fn csi(&mut self) -> io::Result<Option<Key>> {
        let mut params = Vec::with_capacity(MAX_SEQUENCE_LEN);
        let mut overflow = false;
        let final_byte = loop {
            let Some(b) = self.follow()? else {
                warn!(params = %String::from_utf8_lossy(&params), "CSI sequence timed out");
                return Ok(None);
            };
            match b {
                b'[' if params.is_empty() && !overflow => return self.console_fkey(),
                0x40..=0x7E => break b,
                0x20..=0x3F if params.len() < MAX_SEQUENCE_LEN => params.push(b),
                0x20..=0x3F => overflow = true,
                other => {
                    warn!(byte = other, "invalid byte inside CSI sequence");
                    self.pending = Some(other);
                    return Ok(None);
                }
            }
        };
        if overflow {
            warn!(params = %String::from_utf8_lossy(&params), "CSI sequence too long");
            return Ok(None);
        }

        let key = csi_key(&params, final_byte);
        if key.is_none() {
            warn!(
                params = %String::from_utf8_lossy(&params),
                final_byte = %char::from(final_byte),
                "unknown CSI sequence"
            );
        }
        Ok(key)
    }

    /// Linux console F1–F5: `ESC [ [` plus one letter.
    fn console_fkey(&mut self) -> io::Result<Option<Key>> {
        match self.follow()? {
            Some(b @ b'A'..=b'E') => Ok(Some(Key::new(KeyCode::F(b - b'A' + 1)))),
            Some(other) => {
                warn!(final_byte = %char::from(other), "unknown console function key");
                Ok(None)
            }
            None => {
                warn!("console function key timed out");
                Ok(None)
            }
        }
    }

    /// SS3 with optional digit/`;` parameters; the last number is an
    /// xterm modifier (`ESC O 2 P` is Shift-F1).
    fn ss3(&mut self) -> io::Result<Option<Key>> {
        let mut params = Vec::with_capacity(MAX_SEQUENCE_LEN);
        let mut overflow = false;
        let final_byte = loop {
            let Some(b) = self.follow()? else {
                warn!(params = %String::from_utf8_lossy(&params), "SS3 sequence timed out");
                return Ok(None);
            };
            match b {
                b'0'..=b'9' | b';' if params.len() < MAX_SEQUENCE_LEN => params.push(b),
                b'0'..=b'9' | b';' => overflow = true,
                0x40..=0x7E => break b,
                other => {
                    warn!(byte = other, "invalid byte inside SS3 sequence");
                    self.pending = Some(other);
                    return Ok(None);
                }
            }
        };
        if overflow {
            warn!(params = %String::from_utf8_lossy(&params), "SS3 sequence too long");
            return Ok(None);
        }

        let modifiers = params
            .split(|&b| b == b';')
            .filter_map(parse_u16)
            .next_back()
            .map_or(Modifiers::empty(), decode_modifiers);
        let code = match final_byte {
            b'P' => KeyCode::F(1),
            b'Q' => KeyCode::F(2),
            b'R' => KeyCode::F(3),
            b'S' => KeyCode::F(4),
            b'A' => KeyCode::Up,
            b'B' => KeyCode::Down,
            b'C' => KeyCode::Right,
            b'D' => KeyCode::Left,
            b'H' => KeyCode::Home,
            b'F' => KeyCode::End,
            other => {
                warn!(final_byte = %char::from(other), "unknown SS3 sequence");
                return Ok(None);
            }
        };
        Ok(Some(Key::with(code, modifiers)))
    }

    // ── UTF-8 ───────────────────────────────────────────────────────

    fn utf8(&mut self, lead: u8) -> io::Result<Option<Key>> {
        let len = utf8_char_len(lead);
        if len == 0 {
            warn!(byte = lead, "invalid UTF-8 lead byte");
            return Ok(None);
        }

        let mut buf = [lead, 0, 0, 0];
        for slot in &mut buf[1..len] {
            match self.follow()? {
                Some(b @ 0x80..=0xBF) => *slot = b,
                Some(other) => {
                    warn!(lead, byte = other, "invalid UTF-8 continuation byte");
                    self.pending = Some(other);
                    return Ok(None);
                }
                None => {
                    warn!(lead, "UTF-8 character timed out");
                    return Ok(None);
                }
            }
        }

        match std::str::from_utf8(&buf[..len]).ok().and_then(|s| s.chars().next()) {
            Some(c) => Ok(Some(Key::char(c))),
            None => {
                warn!(bytes = ?&buf[..len], "invalid UTF-8 sequence");
                Ok(None)
            }
        }
    }
}

/// Map a complete CSI sequence (parameter bytes plus final byte) to a key.
fn csi_key(params: &[u8], final_byte: u8) -> Option<Key> {
    let mut fields = params.split(|&b| b == b';').map(parse_u16);
    let first = fields.next().flatten();
    let modifiers = fields.next().flatten().map_or(Modifiers::empty(), decode_modifiers);

    let code = match final_byte {
        b'~' => match first? {
            1 | 7 => KeyCode::Home,
            2 => KeyCode::Insert,
            3 => KeyCode::Delete,
            4 | 8 => KeyCode::End,
            5 => KeyCode::PageUp,
            6 => KeyCode::PageDown,
            n @ 11..=15 => KeyCode::F(fkey(n - 10)),
            n @ 17..=21 => KeyCode::F(fkey(n - 11)),
            n @ 23..=24 => KeyCode::F(fkey(n - 12)),
            _ => return None,
        },
        b'A' => KeyCode::Up,
        b'B' => KeyCode::Down,
        b'C' => KeyCode::Right,
        b'D' => KeyCode::Left,
        b'H' => KeyCode::Home,
        b'F' => KeyCode::End,
        b'Z' => return Some(Key::with(KeyCode::Tab, Modifiers::SHIFT)),
        _ => return None,
    };
    Some(Key::with(code, modifiers))
}

/// Parse a decimal CSI parameter. Empty or non-numeric yields `None`.
fn parse_u16(raw: &[u8]) -> Option<u16> {
    if raw.is_empty() || !raw.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(raw.iter().fold(0u16, |acc, &d| {
        acc.saturating_mul(10).saturating_add(u16::from(d - b'0'))
    }))
}

/// Function key numbers are at most 12, so the truncation is lossless.
#[allow(clippy::cast_possible_truncation)]
const fn fkey(n: u16) -> u8 {
    n as u8
}

/// Decode a CSI modifier parameter into `Modifiers` bitflags.
///
/// The encoding is `1 + bitmask`. A parameter of 0 or 1 means no modifiers.
#[allow(clippy::cast_possible_truncation)]
const fn decode_modifiers(param: u16) -> Modifiers {
    let val = if param > 0 { param - 1 } else { 0 };
    Modifiers::from_bits_truncate(val as u8)
}

/// Expected byte length of a UTF-8 character from its lead byte.
/// Returns 0 for bytes that cannot start a multi-byte character.
const fn utf8_char_len(lead: u8) -> usize {
    match lead {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => 0,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
