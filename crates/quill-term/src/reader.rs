// SPDX-License-Identifier: MIT
#![allow(unsafe_code)]
//
// Byte sources for the key decoder.
//
// The decoder pulls one byte at a time, each pull bounded by a timeout: the
// poll timeout while idle, the much shorter sequence timeout while in the
// middle of an escape sequence or a UTF-8 character. A source therefore
// has to be able to say "nothing arrived in time" without blocking forever,
// which is what poll() gives us on a terminal fd. Elsewhere a reader thread
// feeds a channel and the timeout applies to the channel.
//
// Every read has a deadline, so the input thread can always get back to its
// stop flag and shutdown latency is bounded by the longest timeout.

use std::io;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

/// A source of raw input bytes with per-read timeouts.
pub trait ByteSource: Send {
    /// Read one byte, waiting at most `timeout`.
    ///
    /// `Ok(None)` means the timeout elapsed with nothing to read.
    ///
    /// # Errors
    ///
    /// [`io::ErrorKind::UnexpectedEof`] once the source is exhausted; any
    /// other error is a failed read.
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>>;
}

impl<B: ByteSource + ?Sized> ByteSource for &mut B {
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        (**self).read_byte(timeout)
    }
}

impl<B: ByteSource + ?Sized> ByteSource for Box<B> {
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        (**self).read_byte(timeout)
    }
}

fn eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "input closed")
}

// ─── StdinSource ─────────────────────────────────────────────────────────────

/// Reads stdin one byte at a time, gated by `poll()`.
#[derive(Debug, Default)]
pub struct StdinSource {
    _private: (),
}

impl StdinSource {
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

#[cfg(unix)]
impl ByteSource for StdinSource {
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        let fd = libc::STDIN_FILENO;
        let millis = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

        // Poll stdin for readability with a timeout.
        let ready = loop {
            let rc = unsafe {
                let mut pfd = libc::pollfd {
                    fd,
                    events: libc::POLLIN,
                    revents: 0,
                };
                libc::poll(&raw mut pfd, 1, millis)
            };
            if rc >= 0 {
                break rc;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        };

        if ready == 0 {
            return Ok(None);
        }

        let mut byte = 0u8;
        let n = unsafe { libc::read(fd, (&raw mut byte).cast(), 1) };
        match n {
            1 => Ok(Some(byte)),
            0 => Err(eof()),
            _ => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }
}

/// Bytes from the blocking stdin reader thread. Started once per process:
/// a thread parked in `read` cannot be interrupted, so it is shared by every
/// runtime rather than joined.
#[cfg(not(unix))]
static STDIN_BYTES: std::sync::OnceLock<Receiver<u8>> = std::sync::OnceLock::new();

#[cfg(not(unix))]
fn stdin_bytes() -> io::Result<&'static Receiver<u8>> {
    if let Some(rx) = STDIN_BYTES.get() {
        return Ok(rx);
    }
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::Builder::new()
        .name("quill-stdin".into())
        .spawn(move || {
            use std::io::Read;

            let mut stdin = io::stdin().lock();
            let mut byte = [0u8; 1];
            while let Ok(1) = stdin.read(&mut byte) {
                if tx.send(byte[0]).is_err() {
                    break;
                }
            }
        })?;
    Ok(STDIN_BYTES.get_or_init(|| rx))
}

/// Non-unix: no `poll()` on the console, so a helper thread does the
/// blocking reads and this side waits on its channel with the timeout.
#[cfg(not(unix))]
impl ByteSource for StdinSource {
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        recv_byte(stdin_bytes()?, timeout)
    }
}

// ─── ChannelSource ───────────────────────────────────────────────────────────

/// Bytes fed through a channel, for tests and for driving the runtime from
/// something other than a terminal. Dropping every sender is end-of-input.
#[derive(Debug)]
pub struct ChannelSource {
    rx: Receiver<u8>,
}

impl ChannelSource {
    #[must_use]
    pub const fn new(rx: Receiver<u8>) -> Self {
        Self { rx }
    }
}

impl ByteSource for ChannelSource {
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        recv_byte(&self.rx, timeout)
    }
}

fn recv_byte(rx: &Receiver<u8>, timeout: Duration) -> io::Result<Option<u8>> {
    match rx.recv_timeout(timeout) {
        Ok(byte) => Ok(Some(byte)),
        Err(RecvTimeoutError::Timeout) => Ok(None),
        Err(RecvTimeoutError::Disconnected) => Err(eof()),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn channel_source_delivers_bytes_in_order() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut src = ChannelSource::new(rx);
        tx.send(b'a').unwrap();
        tx.send(b'b').unwrap();

        let t = Duration::from_millis(10);
        assert_eq!(src.read_byte(t).unwrap(), Some(b'a'));
        assert_eq!(src.read_byte(t).unwrap(), Some(b'b'));
    }

    #[test]
    fn channel_source_times_out() {
        let (_tx, rx) = crossbeam_channel::unbounded::<u8>();
        let mut src = ChannelSource::new(rx);

        let start = Instant::now();
        assert_eq!(src.read_byte(Duration::from_millis(20)).unwrap(), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn channel_source_disconnect_is_eof() {
        let (tx, rx) = crossbeam_channel::unbounded::<u8>();
        let mut src = ChannelSource::new(rx);
        drop(tx);

        let err = src.read_byte(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn channel_source_drains_before_eof() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut src = ChannelSource::new(rx);
        tx.send(b'z').unwrap();
        drop(tx);

        assert_eq!(src.read_byte(Duration::ZERO).unwrap(), Some(b'z'));
        assert!(src.read_byte(Duration::ZERO).is_err());
    }

    #[test]
    fn byte_source_is_object_safe() {
        let (_tx, rx) = crossbeam_channel::unbounded::<u8>();
        let mut boxed: Box<dyn ByteSource> = Box::new(ChannelSource::new(rx));
        assert_eq!(boxed.read_byte(Duration::ZERO).unwrap(), None);
    }
}
