// SPDX-License-Identifier: MIT
//
// Error types for the terminal runtime.
//
// Only setup failures surface as errors. Decoding anomalies are logged and
// recovered inside the input thread, and rendering is best-effort, so
// neither `KeyDecoder` nor `ScreenBuffer::draw` ever return one of these.

use std::io;

use thiserror::Error;

/// Runtime error type.
#[derive(Error, Debug)]
pub enum Error {
    /// The terminal size could not be queried (stdout is not a terminal,
    /// or the ioctl failed). Fatal to callers: no screen can be sized.
    #[error("cannot query terminal size: {0}")]
    Geometry(#[source] io::Error),

    /// Entering raw mode failed. The input runtime stays stopped.
    #[error("failed to enter raw mode: {0}")]
    RawMode(#[source] io::Error),

    /// Another input runtime currently owns the terminal's raw mode.
    #[error("raw mode is already owned by another input runtime")]
    RawModeBusy,

    /// The background input thread could not be spawned.
    #[error("failed to spawn input thread: {0}")]
    Spawn(#[source] io::Error),

    /// The window-resize signal handler could not be installed.
    #[error("failed to install resize handler: {0}")]
    Signal(#[source] io::Error),
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;
