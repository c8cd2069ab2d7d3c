// SPDX-License-Identifier: MIT
//
// quill-term demo: a live key viewer.
//
// Wires both halves together: InputRuntime decodes keys on its thread,
// this loop receives them next to resize notifications and appends them to
// a log that ScreenBuffer draws. New entries push the log up a line, so
// each key costs one scroll plus a row or two of output.
//
// Press keys, paste text, resize the terminal. `p` toggles paste
// protection, Ctrl-Q quits.
//
// Usage:
//   cargo run -p quill-term --example demo

use std::collections::VecDeque;
use std::io::{self, Write};

use crossbeam_channel::select;
use quill_term::{InputRuntime, KeyCode, Modifiers, ScreenBuffer, ansi, style};

/// Maximum number of keys kept in the scrolling log.
const MAX_LOG_ENTRIES: usize = 100;

struct Demo {
    log: VecDeque<String>,
    protected: bool,
    count: usize,
}

impl Demo {
    fn paint(&self, screen: &mut ScreenBuffer) {
        let height = screen.height();
        let Some(status) = height.checked_sub(1) else {
            return;
        };

        let rows = usize::from(status);
        let skip = self.log.len().saturating_sub(rows);
        let pad = rows.saturating_sub(self.log.len());
        for y in 0..status {
            let entry = usize::from(y)
                .checked_sub(pad)
                .and_then(|i| self.log.get(skip + i));
            screen.set_line(y, entry.map_or("", String::as_str));
        }

        let protection = if self.protected { "on" } else { "off" };
        screen.set_line(
            status,
            &format!(
                "{} quill-term demo  keys: {}  paste protection: {protection}  (p toggles, Ctrl-Q quits)",
                style::REVERSE,
                self.count
            ),
        );
        screen.set_cursor(status, 0);
    }
}

fn main() -> Result<(), quill_term::Error> {
    let mut screen = ScreenBuffer::from_terminal()?;
    let mut input = InputRuntime::new();
    input.start()?;

    let keys = input.keys();
    let resizes = input.resizes();
    let mut demo = Demo {
        log: VecDeque::with_capacity(MAX_LOG_ENTRIES),
        protected: true,
        count: 0,
    };
    demo.paint(&mut screen);
    screen.draw();

    loop {
        select! {
            recv(keys) -> key => {
                let Ok(key) = key else { break };
                if key.code == KeyCode::Char('q') && key.modifiers == Modifiers::CTRL {
                    break;
                }
                if key.is_char('p') {
                    demo.protected = !demo.protected;
                    if demo.protected {
                        input.paste_pop();
                    } else {
                        input.paste_push(false);
                    }
                }

                demo.count += 1;
                let name = key.to_string();
                if demo.log.len() == MAX_LOG_ENTRIES {
                    demo.log.pop_front();
                }
                demo.log.push_back(format!(
                    "{}{:>5}{}  {name:<16} {:?}",
                    style::GREY,
                    demo.count,
                    style::RESET,
                    key.code
                ));
                screen.mark_cacheable();
            }
            recv(resizes) -> _ => {
                if let Ok(resized) = ScreenBuffer::from_terminal() {
                    screen = resized;
                }
            }
        }
        demo.paint(&mut screen);
        screen.draw();
    }

    input.stop();
    let mut stdout = io::stdout();
    let _ = ansi::restore_output(&mut stdout);
    let _ = stdout.flush();
    Ok(())
}
