// SPDX-License-Identifier: MIT
//
// quill: a terminal line viewer built on quill-term.
//
// Shows a text file one screen at a time. Moving by single lines lets the
// renderer shift the screen with a scroll region instead of repainting
// every row; a filter prompt narrows the view to matching lines.
//
// Layout:
//
//   ┌──────────────────────────────┐
//   │ gutter │ text                │  ← h - 1 rows
//   ├──────────────────────────────┤
//   │ status line / filter prompt  │  ← 1 row
//   └──────────────────────────────┘
//
// Keys: j/k/arrows/Enter move by a line, Space/b/PageDown/PageUp by a page,
// g/G/Home/End jump, / filters, Escape clears the filter, Ctrl-L repaints,
// q or Ctrl-C quits.

use std::env;
use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossbeam_channel::select;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use quill_term::text::{pad_truncate_left, visible_width};
use quill_term::{
    InputConfig, InputRuntime, Key, KeyCode, Modifiers, ScreenBuffer, ScreenConfig, ansi, style,
};

/// Width of the line-number column, not counting the separator.
const GUTTER: usize = 6;

/// Spaces a tab expands to.
const TAB_WIDTH: usize = 4;

/// How long a status message stays up.
const MESSAGE_TTL: Duration = Duration::from_secs(3);

/// How often expired status messages are checked.
const TICK: Duration = Duration::from_millis(250);

// ─── Arguments ──────────────────────────────────────────────────────────────

const USAGE: &str = "usage: quill [--no-sync] [--repeat-ms N] [--log PATH] FILE";

#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    path: PathBuf,
    no_sync: bool,
    repeat_ms: Option<u64>,
    log: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut path = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--no-sync" => parsed.no_sync = true,
            "--repeat-ms" => {
                let value = args.next().ok_or("--repeat-ms needs a value")?;
                let ms = value
                    .parse()
                    .map_err(|_| format!("--repeat-ms: not a number: {value}"))?;
                parsed.repeat_ms = Some(ms);
            }
            "--log" => {
                let value = args.next().ok_or("--log needs a path")?;
                parsed.log = Some(PathBuf::from(value));
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            flag if flag.starts_with("--") => return Err(format!("unknown option: {flag}")),
            _ if path.is_some() => return Err("only one file can be viewed".to_string()),
            _ => path = Some(PathBuf::from(&arg)),
        }
    }

    parsed.path = path.ok_or(USAGE)?;
    Ok(parsed)
}

impl Args {
    fn input_config(&self) -> InputConfig {
        let config = InputConfig::default();
        match self.repeat_ms {
            Some(ms) => config.with_repeat_protection(Duration::from_millis(ms)),
            None => config,
        }
    }

    fn screen_config(&self) -> ScreenConfig {
        ScreenConfig::default().with_synchronized_updates(!self.no_sync)
    }
}

// ─── Logging ────────────────────────────────────────────────────────────────

/// Log to `path` if given. Stdout belongs to the renderer, so without a log
/// file nothing is logged at all.
fn init_logging(path: Option<&PathBuf>) -> io::Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    let filter = EnvFilter::try_from_env("QUILL_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}

// ─── Viewer ─────────────────────────────────────────────────────────────────

/// What the main loop has to do after a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    /// Nothing changed.
    None,
    /// The view moved by whole lines; the renderer may scroll.
    Scrolled,
    /// Something else changed.
    Changed,
    /// Forget the screen contents and repaint.
    Repaint,
    /// The filter prompt opened; typed text should not be throttled.
    PromptOpened,
    /// The filter prompt closed.
    PromptClosed,
    Quit,
}

struct Viewer {
    name: String,
    lines: Vec<String>,
    /// Indices into `lines` that pass the filter.
    visible: Vec<usize>,
    filter: Option<String>,
    /// First visible entry shown on screen.
    top: usize,
    /// Filter text being typed, while the prompt is open.
    prompt: Option<String>,
    /// Transient status message and when it was posted.
    message: Option<(String, Instant)>,
}

impl Viewer {
    fn new(name: String, text: &str) -> Self {
        let lines: Vec<String> = text.lines().map(sanitize).collect();
        let visible = (0..lines.len()).collect();
        Self {
            name,
            lines,
            visible,
            filter: None,
            top: 0,
            prompt: None,
            message: None,
        }
    }

    fn set_filter(&mut self, filter: Option<String>) {
        self.visible = match &filter {
            Some(f) => (0..self.lines.len())
                .filter(|&i| self.lines[i].contains(f.as_str()))
                .collect(),
            None => (0..self.lines.len()).collect(),
        };
        info!(filter = ?filter, matches = self.visible.len(), "filter applied");
        if filter.is_some() {
            let text = match self.visible.len() {
                0 => "no matches".to_string(),
                1 => "1 matching line".to_string(),
                n => format!("{n} matching lines"),
            };
            self.message = Some((text, Instant::now()));
        }
        self.filter = filter;
        self.top = 0;
    }

    /// Drop the status message once it is older than [`MESSAGE_TTL`].
    /// Returns whether anything changed.
    fn expire_message(&mut self, now: Instant) -> bool {
        let expired = self
            .message
            .as_ref()
            .is_some_and(|(_, posted)| now.saturating_duration_since(*posted) >= MESSAGE_TTL);
        if expired {
            self.message = None;
        }
        expired
    }

    /// Largest `top` that still fills a page of `rows`.
    fn max_top(&self, rows: usize) -> usize {
        self.visible.len().saturating_sub(rows)
    }

    fn move_to(&mut self, top: usize, rows: usize) -> Effect {
        let top = top.min(self.max_top(rows));
        if top == self.top {
            return Effect::None;
        }
        let by_line = top.abs_diff(self.top) < rows;
        self.top = top;
        if by_line { Effect::Scrolled } else { Effect::Changed }
    }

    /// Apply `key` with `rows` text rows on screen.
    fn handle_key(&mut self, key: Key, rows: usize) -> Effect {
        if self.prompt.is_some() {
            return self.handle_prompt_key(key);
        }

        let page = rows.max(1);
        let ctrl = key.modifiers == Modifiers::CTRL;
        match key.code {
            KeyCode::Char('q') if key.modifiers.is_empty() => Effect::Quit,
            KeyCode::Char('c') if ctrl => Effect::Quit,
            KeyCode::Char('l') if ctrl => Effect::Repaint,
            KeyCode::Char('j') | KeyCode::Down | KeyCode::Enter => {
                self.move_to(self.top + 1, rows)
            }
            KeyCode::Char('k') | KeyCode::Up => self.move_to(self.top.saturating_sub(1), rows),
            KeyCode::Char(' ') | KeyCode::PageDown => self.move_to(self.top + page, rows),
            KeyCode::Char('f') if ctrl => self.move_to(self.top + page, rows),
            KeyCode::Char('b') | KeyCode::PageUp => {
                self.move_to(self.top.saturating_sub(page), rows)
            }
            KeyCode::Char('g') | KeyCode::Home => self.move_to(0, rows),
            KeyCode::Char('G') | KeyCode::End => self.move_to(usize::MAX, rows),
            KeyCode::Char('/') => {
                self.prompt = Some(String::new());
                Effect::PromptOpened
            }
            KeyCode::Escape if self.filter.is_some() => {
                self.set_filter(None);
                Effect::Changed
            }
            _ => {
                debug!(%key, "unbound key");
                Effect::None
            }
        }
    }

    fn handle_prompt_key(&mut self, key: Key) -> Effect {
        let Some(prompt) = self.prompt.as_mut() else {
            return Effect::None;
        };
        match key.code {
            KeyCode::Enter => {
                let text = std::mem::take(prompt);
                self.prompt = None;
                self.set_filter((!text.is_empty()).then_some(text));
                Effect::PromptClosed
            }
            KeyCode::Escape => {
                self.prompt = None;
                Effect::PromptClosed
            }
            KeyCode::Char('c') if key.modifiers == Modifiers::CTRL => {
                self.prompt = None;
                Effect::PromptClosed
            }
            KeyCode::Backspace => {
                prompt.pop();
                Effect::Changed
            }
            KeyCode::Char(c) if !key.modifiers.contains(Modifiers::CTRL) => {
                prompt.push(c);
                Effect::Changed
            }
            _ => Effect::None,
        }
    }

    /// Paint the view into `screen`.
    fn paint(&self, screen: &mut ScreenBuffer) {
        let height = screen.height();
        let Some(status_row) = height.checked_sub(1) else {
            return;
        };

        for (y, entry) in (0..status_row).zip(self.top..) {
            match self.visible.get(entry) {
                Some(&i) => {
                    let number = pad_truncate_left(&(i + 1).to_string(), GUTTER - 1);
                    screen.set_line(
                        y,
                        &format!("{}{number}{} {}", style::GREY, style::RESET, self.lines[i]),
                    );
                }
                None => screen.set_line(y, &format!("{}~{}", style::BLUE, style::RESET)),
            }
        }

        if let Some(prompt) = &self.prompt {
            screen.set_line(status_row, &format!("/{prompt}"));
            let x = u16::try_from(1 + visible_width(prompt)).unwrap_or(u16::MAX);
            screen.set_cursor(status_row, x.min(screen.width().saturating_sub(1)));
            return;
        }

        let filter = self
            .filter
            .as_ref()
            .map(|f| format!("  [/{f}]"))
            .unwrap_or_default();
        let message = self
            .message
            .as_ref()
            .map(|(m, _)| format!("  {}{m}{}", style::BOLD, style::RESET))
            .unwrap_or_default();
        screen.set_line(
            status_row,
            &format!("{} {}{filter}{message}{}", style::REVERSE, self.name, style::REVERSE),
        );
        let position = self.position(usize::from(status_row));
        let x = usize::from(screen.width()).saturating_sub(visible_width(&position));
        screen.set_at(status_row, u16::try_from(x).unwrap_or(0), &position);
        screen.set_cursor(status_row, 0);
    }

    /// " first-last/total " for a page of `rows`.
    fn position(&self, rows: usize) -> String {
        let total = self.visible.len();
        if total == 0 {
            return " 0/0 ".to_string();
        }
        let last = (self.top + rows).min(total);
        format!(" {}-{last}/{total} ", self.top + 1)
    }
}

/// Expand tabs and replace other control characters so every character has
/// a well-defined width.
fn sanitize(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for c in line.chars() {
        match c {
            '\t' => out.extend(std::iter::repeat_n(' ', TAB_WIDTH)),
            c if c.is_control() => out.push('?'),
            c => out.push(c),
        }
    }
    out
}

// ─── Main loop ──────────────────────────────────────────────────────────────

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let bytes = fs::read(&args.path).map_err(|e| format!("{}: {e}", args.path.display()))?;
    let name = args.path.display().to_string();
    let mut viewer = Viewer::new(name, &String::from_utf8_lossy(&bytes));
    info!(path = %args.path.display(), lines = viewer.lines.len(), "file loaded");

    let mut screen = ScreenBuffer::from_terminal_with_config(args.screen_config())?;
    let mut input = InputRuntime::with_config(args.input_config());
    input.start()?;

    let keys = input.keys();
    let resizes = input.resizes();
    let ticks = crossbeam_channel::tick(TICK);
    viewer.paint(&mut screen);
    screen.draw();

    loop {
        select! {
            recv(keys) -> key => {
                let Ok(key) = key else {
                    info!("input ended");
                    break;
                };
                let rows = usize::from(screen.height().saturating_sub(1));
                match viewer.handle_key(key, rows) {
                    Effect::Quit => break,
                    Effect::None => continue,
                    Effect::Scrolled => screen.mark_cacheable(),
                    Effect::Repaint => screen.invalidate(),
                    Effect::PromptOpened => input.paste_push(false),
                    Effect::PromptClosed => {
                        input.paste_pop();
                    }
                    Effect::Changed => {}
                }
            }
            recv(resizes) -> _ => {
                match ScreenBuffer::from_terminal_with_config(args.screen_config()) {
                    Ok(resized) => {
                        info!(width = resized.width(), height = resized.height(), "terminal resized");
                        screen = resized;
                        let rows = usize::from(screen.height().saturating_sub(1));
                        viewer.top = viewer.top.min(viewer.max_top(rows));
                    }
                    Err(e) => {
                        warn!(error = %e, "resize ignored");
                        continue;
                    }
                }
            }
            recv(ticks) -> tick => {
                let now = tick.unwrap_or_else(|_| Instant::now());
                if !viewer.expire_message(now) {
                    continue;
                }
            }
        }
        viewer.paint(&mut screen);
        screen.draw();
    }

    input.stop();
    Ok(())
}

fn main() {
    let args = parse_args(env::args().skip(1)).unwrap_or_else(|e| {
        eprintln!("quill: {e}");
        process::exit(2);
    });

    if let Err(e) = init_logging(args.log.as_ref()) {
        eprintln!("quill: cannot open log file: {e}");
        process::exit(1);
    }

    let result = run(&args);

    let mut stdout = io::stdout();
    let _ = ansi::restore_output(&mut stdout);
    let _ = stdout.flush();

    if let Err(e) = result {
        eprintln!("quill: {e}");
        process::exit(1);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
