// SPDX-License-Identifier: MIT
//
// Terminal control: geometry, raw mode, resize signals, and panic cleanup.
//
// Safety: This module necessarily uses `unsafe` for termios (tcgetattr,
// tcsetattr), ioctl (TIOCGWINSZ), isatty, and raw fd writes. These are
// the standard POSIX interfaces for terminal control; there is no safe
// alternative. Each unsafe block is minimal.
#![allow(unsafe_code)]
//
// Raw mode is process-wide state, so at most one RawModeGuard exists at a
// time. The guard belongs to the input thread: whichever way that thread
// ends, dropping the guard puts the original termios back.
//
// The panic hook bypasses Rust's stdout lock and writes a pre-built restore
// sequence directly to fd 1. A panic mid-frame would otherwise deadlock on
// the lock or leave autowrap off and a scroll region active.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Once};

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::error::{Error, Result};

// ─── Size ───────────────────────────────────────────────────────────────────

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    /// Number of columns (width in character cells).
    pub cols: u16,
    /// Number of rows (height in character cells).
    pub rows: u16,
}

// ─── Terminal Queries ───────────────────────────────────────────────────────

/// Query the current terminal size via `ioctl(TIOCGWINSZ)` on stdout.
///
/// # Errors
///
/// Returns [`Error::Geometry`] if stdout is not a terminal, the ioctl fails,
/// or the terminal reports a zero dimension.
#[cfg(unix)]
pub fn size() -> Result<Size> {
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &raw mut ws) };

    if result != 0 {
        return Err(Error::Geometry(io::Error::last_os_error()));
    }
    if ws.ws_col == 0 || ws.ws_row == 0 {
        return Err(Error::Geometry(io::Error::other(format!(
            "terminal reported {}x{}",
            ws.ws_col, ws.ws_row
        ))));
    }
    Ok(Size {
        cols: ws.ws_col,
        rows: ws.ws_row,
    })
}

#[cfg(not(unix))]
pub fn size() -> Result<Size> {
    Err(Error::Geometry(io::Error::new(
        io::ErrorKind::Unsupported,
        "terminal size query is unix-only",
    )))
}

/// Check whether stdin is connected to a terminal (TTY).
#[cfg(unix)]
#[must_use]
pub fn is_tty() -> bool {
    unsafe { libc::isatty(libc::STDIN_FILENO) != 0 }
}

#[cfg(not(unix))]
#[must_use]
pub fn is_tty() -> bool {
    false
}

// ─── Panic-Safe Terminal Restore ────────────────────────────────────────────

/// Global backup of the original termios for panic recovery.
#[cfg(unix)]
static TERMIOS_BACKUP: Mutex<Option<libc::termios>> = Mutex::new(None);

/// Restore termios from the global backup. Best-effort, ignores errors.
#[cfg(unix)]
fn restore_termios_from_backup() {
    if let Ok(guard) = TERMIOS_BACKUP.lock() {
        if let Some(ref original) = *guard {
            unsafe {
                let _ = libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, original);
            }
        }
    }
}

/// Terminal restore sequence for emergency use.
///
/// End synchronized output, reset SGR attributes, re-enable autowrap, drop
/// any scroll region (this homes the cursor, so it is saved around it),
/// show the cursor, and start a fresh line for the panic message.
#[rustfmt::skip]
const EMERGENCY_RESTORE: &[u8] = b"\
    \x1b[?2026l\
    \x1b[0m\
    \x1b[?7h\
    \x1b[s\x1b[r\x1b[u\
    \x1b[?25h\
    \r\n";

/// Panic hook guard: the hook is installed at most once per process.
static PANIC_HOOK_INSTALLED: Once = Once::new();

/// Install a panic hook that restores the terminal before printing the error.
///
/// Without this, a panic in raw mode leaves the user's terminal broken:
/// no echo, no line editing, no way to read the error message.
fn install_panic_hook() {
    PANIC_HOOK_INSTALLED.call_once(|| {
        let original = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if RAW_MODE_HELD.load(Ordering::Acquire) {
                emergency_restore();
                #[cfg(unix)]
                restore_termios_from_backup();
            }
            original(info);
        }));
    });
}

/// Write the restore sequence directly to stdout's file descriptor.
fn emergency_restore() {
    #[cfg(unix)]
    unsafe {
        let _ = libc::write(
            libc::STDOUT_FILENO,
            EMERGENCY_RESTORE.as_ptr().cast::<libc::c_void>(),
            EMERGENCY_RESTORE.len(),
        );
    }

    #[cfg(not(unix))]
    {
        use std::io::Write;
        let _ = io::stdout().write_all(EMERGENCY_RESTORE);
        let _ = io::stdout().flush();
    }
}

// ─── Raw Mode ───────────────────────────────────────────────────────────────

/// Set while a [`RawModeGuard`] is alive.
static RAW_MODE_HELD: AtomicBool = AtomicBool::new(false);

/// Whether some [`RawModeGuard`] currently owns raw mode.
#[must_use]
pub fn raw_mode_active() -> bool {
    RAW_MODE_HELD.load(Ordering::Acquire)
}

/// Exclusive ownership of the terminal's raw mode.
///
/// Acquiring puts stdin into raw mode (when it is a terminal) and records
/// the original settings; dropping restores them. Only one guard can exist
/// at a time.
#[derive(Debug)]
pub struct RawModeGuard {
    #[cfg(unix)]
    original: Option<libc::termios>,
}

impl RawModeGuard {
    /// Take ownership of raw mode.
    ///
    /// When stdin is not a terminal the termios step is skipped but the
    /// ownership rules still apply, so piped input behaves the same.
    ///
    /// # Errors
    ///
    /// [`Error::RawModeBusy`] if another guard is alive, [`Error::RawMode`]
    /// if termios could not be read or written.
    pub fn acquire() -> Result<Self> {
        if RAW_MODE_HELD
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::RawModeBusy);
        }

        install_panic_hook();

        match Self::enable() {
            Ok(guard) => {
                debug!("raw mode acquired");
                Ok(guard)
            }
            Err(e) => {
                RAW_MODE_HELD.store(false, Ordering::Release);
                Err(Error::RawMode(e))
            }
        }
    }

    #[cfg(unix)]
    fn enable() -> io::Result<Self> {
        if !is_tty() {
            return Ok(Self { original: None });
        }

        let fd = libc::STDIN_FILENO;

        unsafe {
            let mut termios: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &raw mut termios) != 0 {
                return Err(io::Error::last_os_error());
            }

            let original = termios;
            if let Ok(mut guard) = TERMIOS_BACKUP.lock() {
                *guard = Some(original);
            }

            // cfmakeraw equivalent: disable all line processing.
            termios.c_iflag &= !(libc::IGNBRK
                | libc::BRKINT
                | libc::PARMRK
                | libc::ISTRIP
                | libc::INLCR
                | libc::IGNCR
                | libc::ICRNL
                | libc::IXON);
            termios.c_oflag &= !libc::OPOST;
            termios.c_lflag &=
                !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);
            termios.c_cflag &= !(libc::CSIZE | libc::PARENB);
            termios.c_cflag |= libc::CS8;

            // Reads are gated by poll(), so VMIN=1 never blocks unexpectedly.
            termios.c_cc[libc::VMIN] = 1;
            termios.c_cc[libc::VTIME] = 0;

            if libc::tcsetattr(fd, libc::TCSAFLUSH, &raw const termios) != 0 {
                return Err(io::Error::last_os_error());
            }

            Ok(Self {
                original: Some(original),
            })
        }
    }

    #[cfg(not(unix))]
    fn enable() -> io::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    fn restore(&mut self) {
        if let Some(ref original) = self.original.take() {
            let rc = unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSAFLUSH, original) };
            if rc != 0 {
                warn!(error = %io::Error::last_os_error(), "failed to restore termios");
            }
            if let Ok(mut guard) = TERMIOS_BACKUP.lock() {
                *guard = None;
            }
        }
    }

    #[cfg(not(unix))]
    fn restore(&mut self) {}
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.restore();
        RAW_MODE_HELD.store(false, Ordering::Release);
        debug!("raw mode released");
    }
}

// ─── Resize Signals ─────────────────────────────────────────────────────────

/// Forwards SIGWINCH to a channel from a dedicated signal thread.
///
/// Storms are coalesced: with a bounded(1) channel at most one notification
/// is pending, and the receiver re-queries [`size`] anyway.
#[cfg(unix)]
#[derive(Debug)]
pub struct ResizeWatcher {
    handle: signal_hook::iterator::Handle,
    thread: Option<std::thread::JoinHandle<()>>,
}

#[cfg(unix)]
impl ResizeWatcher {
    /// Start watching for window size changes.
    ///
    /// # Errors
    ///
    /// [`Error::Signal`] if the handler cannot be registered,
    /// [`Error::Spawn`] if the signal thread cannot be started.
    pub fn new(tx: Sender<()>) -> Result<Self> {
        use signal_hook::consts::signal::SIGWINCH;
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGWINCH]).map_err(Error::Signal)?;
        let handle = signals.handle();
        let thread = std::thread::Builder::new()
            .name("quill-resize".into())
            .spawn(move || {
                for _ in signals.forever() {
                    let _ = tx.try_send(());
                }
            })
            .map_err(Error::Spawn)?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }
}

#[cfg(unix)]
impl Drop for ResizeWatcher {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(not(unix))]
#[derive(Debug)]
pub struct ResizeWatcher;

#[cfg(not(unix))]
impl ResizeWatcher {
    /// No resize signal exists off unix; the channel simply never fires.
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn new(_tx: Sender<()>) -> Result<Self> {
        Ok(Self)
    }
}

/// Serializes tests that take raw mode, which is process-global.
#[cfg(test)]
pub(crate) static RAW_MODE_TEST_LOCK: Mutex<()> = Mutex::new(());

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn lock() -> std::sync::MutexGuard<'static, ()> {
        RAW_MODE_TEST_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    // ── Terminal queries ─────────────────────────────────────────────

    #[test]
    fn size_query_reports_or_errors() {
        match size() {
            Ok(s) => assert!(s.cols > 0 && s.rows > 0),
            Err(e) => assert!(matches!(e, Error::Geometry(_))),
        }
    }

    #[test]
    fn is_tty_does_not_panic() {
        let _ = is_tty();
    }

    // ── Emergency restore sequence ──────────────────────────────────

    #[test]
    fn emergency_restore_is_valid_utf8() {
        std::str::from_utf8(EMERGENCY_RESTORE).unwrap();
    }

    #[test]
    fn emergency_restore_undoes_renderer_state() {
        let s = std::str::from_utf8(EMERGENCY_RESTORE).unwrap();
        assert!(s.contains("\x1b[?2026l"), "must end sync output");
        assert!(s.contains("\x1b[0m"), "must reset SGR attributes");
        assert!(s.contains("\x1b[?7h"), "must re-enable autowrap");
        assert!(s.contains("\x1b[r"), "must reset the scroll region");
        assert!(s.contains("\x1b[?25h"), "must show cursor");
    }

    // ── Raw mode ownership ──────────────────────────────────────────

    #[test]
    fn guard_sets_and_clears_flag() {
        let _serial = lock();
        assert!(!raw_mode_active());
        let guard = RawModeGuard::acquire().unwrap();
        assert!(raw_mode_active());
        drop(guard);
        assert!(!raw_mode_active());
    }

    #[test]
    fn second_guard_is_busy() {
        let _serial = lock();
        let _first = RawModeGuard::acquire().unwrap();
        assert!(matches!(RawModeGuard::acquire(), Err(Error::RawModeBusy)));
    }

    #[test]
    fn guard_can_be_reacquired() {
        let _serial = lock();
        for _ in 0..3 {
            let guard = RawModeGuard::acquire().unwrap();
            drop(guard);
        }
        assert!(!raw_mode_active());
    }

    // ── Resize watcher ──────────────────────────────────────────────

    #[test]
    fn resize_watcher_starts_and_stops() {
        let (tx, _rx) = crossbeam_channel::bounded(1);
        let watcher = ResizeWatcher::new(tx).unwrap();
        drop(watcher);
    }
}
