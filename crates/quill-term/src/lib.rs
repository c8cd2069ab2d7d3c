// SPDX-License-Identifier: MIT
//
// quill-term: terminal runtime for quill.
//
// Two halves that share nothing but the terminal:
//
//   - Output: ScreenBuffer holds the rows of a frame as styled strings and
//     draws only the rows that changed, using a scroll region when the
//     content moved as a block.
//   - Input: InputRuntime owns raw mode and a background thread that decodes
//     terminal bytes into complete keys, with paste protection, and delivers
//     them on a channel next to a resize channel.
//
// Direct terminal control via ANSI escape sequences and raw termios; no TUI
// framework in between.

pub mod ansi;
pub mod buffer;
pub mod config;
pub mod diff;
pub mod error;
pub mod input;
pub mod output;
pub mod reader;
pub mod runtime;
pub mod style;
pub mod terminal;
pub mod text;

pub use buffer::ScreenBuffer;
pub use config::{InputConfig, ScreenConfig};
pub use error::{Error, Result};
pub use input::{Key, KeyCode, Modifiers};
pub use runtime::InputRuntime;
