// SPDX-License-Identifier: MIT
//
// Input runtime: one background thread turning terminal bytes into keys.
//
// Lifecycle:
//
//   Stopped --start()--> Running --stop()--> Stopped
//
// start() takes the process-wide raw-mode guard, installs the resize
// watcher, and spawns the input thread. The guard moves into the thread,
// so raw mode lasts exactly as long as the thread does, however it ends.
//
// The thread loop:
//
//   1. Decode one key, waiting at most the poll timeout for it. On timeout,
//      go back and check the stop flag.
//   2. Repeat/paste protection: a key arriving within the protection
//      threshold of the previous one is dropped while protection is on.
//   3. Hand the key over on a rendezvous channel. The send blocks until
//      the application takes the key.
//
// stop() raises the flag and then drains the key channel until the thread
// drops its sender. Draining is what unblocks a thread parked in send()
// with nobody listening, so stop() always returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::config::InputConfig;
use crate::error::{Error, Result};
use crate::input::{Key, KeyCode, KeyDecoder};
use crate::reader::{ByteSource, StdinSource};
use crate::terminal::{RawModeGuard, ResizeWatcher};

type SharedSource = Arc<Mutex<Box<dyn ByteSource>>>;

// ─── Repeat protection ──────────────────────────────────────────────────────

/// Drops keys that arrive implausibly fast for a human: pasted text and
/// runaway auto-repeat. A key right after Enter is dropped even when
/// protection is off, so a paste cannot confirm a prompt and keep typing.
#[derive(Debug)]
struct RepeatGuard {
    threshold: Duration,
    last: Option<Instant>,
    last_enter: Option<Instant>,
}

fn within(earlier: Option<Instant>, now: Instant, threshold: Duration) -> bool {
    earlier.is_some_and(|t| now.saturating_duration_since(t) < threshold)
}

impl RepeatGuard {
    const fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            last: None,
            last_enter: None,
        }
    }

    /// Whether `key`, decoded at `now`, should be delivered. Dropped keys
    /// still count as the previous key for the next check.
    fn admit(&mut self, key: Key, now: Instant, protected: bool) -> bool {
        if protected && within(self.last, now, self.threshold) {
            warn!(%key, threshold = ?self.threshold, "paste protection dropped key");
            self.last = Some(now);
            return false;
        }
        if within(self.last_enter, now, self.threshold) {
            warn!(%key, threshold = ?self.threshold, "post-Enter paste protection dropped key");
            self.last = Some(now);
            return false;
        }
        if key.code == KeyCode::Enter {
            self.last_enter = Some(now);
        }
        self.last = Some(now);
        true
    }
}

// ─── Worker ─────────────────────────────────────────────────────────────────

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Everything the input thread owns.
struct WorkerContext {
    source: SharedSource,
    paste: Arc<RwLock<Vec<bool>>>,
    stop: Arc<AtomicBool>,
    keys: Sender<Key>,
    config: InputConfig,
    raw_mode: RawModeGuard,
}

impl WorkerContext {
    fn run(self) {
        let Self {
            source,
            paste,
            stop,
            keys,
            config,
            raw_mode,
        } = self;

        {
            let mut source = source.lock().unwrap_or_else(PoisonError::into_inner);
            let mut decoder = KeyDecoder::new(&mut **source, config.sequence_timeout);
            let mut repeat = RepeatGuard::new(config.repeat_protection);
            debug!("input thread started");

            while !stop.load(Ordering::Acquire) {
                let key = match decoder.next_key(config.poll_timeout) {
                    Ok(Some(key)) => key,
                    Ok(None) => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        info!("input closed");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "input read failed");
                        break;
                    }
                };

                let protected = paste
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .last()
                    .copied()
                    .unwrap_or(true);
                if !repeat.admit(key, Instant::now(), protected) {
                    continue;
                }

                if keys.send(key).is_err() {
                    break;
                }
            }
        }

        // Raw mode is released before the key channel closes, so anyone who
        // sees end-of-input also sees a restored terminal.
        drop(raw_mode);
        drop(keys);
        debug!("input thread finished");
    }
}

// ─── InputRuntime ───────────────────────────────────────────────────────────

/// Background key reader with paste protection and resize notifications.
///
/// # Example
///
/// ```no_run
/// use quill_term::runtime::InputRuntime;
///
/// let mut input = InputRuntime::new();
/// input.start()?;
/// let keys = input.keys();
/// while let Ok(key) = keys.recv() {
///     if key.is_char('q') {
///         break;
///     }
/// }
/// input.stop();
/// # Ok::<(), quill_term::Error>(())
/// ```
pub struct InputRuntime {
    config: InputConfig,
    source: SharedSource,
    paste: Arc<RwLock<Vec<bool>>>,
    worker: Option<Worker>,
    keys: Receiver<Key>,
    resize_tx: Sender<()>,
    resizes: Receiver<()>,
    resize_watcher: Option<ResizeWatcher>,
}

impl InputRuntime {
    /// A stopped runtime reading the terminal on stdin.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(InputConfig::default())
    }

    /// A stopped runtime reading stdin with custom timeouts.
    #[must_use]
    pub fn with_config(config: InputConfig) -> Self {
        Self::with_source(StdinSource::new(), config)
    }

    /// A stopped runtime reading from any byte source.
    #[must_use]
    pub fn with_source(source: impl ByteSource + 'static, config: InputConfig) -> Self {
        let (resize_tx, resizes) = crossbeam_channel::bounded(1);
        let source: Box<dyn ByteSource> = Box::new(source);
        Self {
            config,
            source: Arc::new(Mutex::new(source)),
            paste: Arc::new(RwLock::new(Vec::new())),
            worker: None,
            keys: crossbeam_channel::never(),
            resize_tx,
            resizes,
            resize_watcher: None,
        }
    }

    /// Enter raw mode and start the input thread.
    ///
    /// Starting a running runtime is logged and ignored.
    ///
    /// # Errors
    ///
    /// [`Error::RawModeBusy`] if another runtime is running,
    /// [`Error::RawMode`] if the terminal could not be switched,
    /// [`Error::Signal`] or [`Error::Spawn`] if the resize watcher or the
    /// input thread could not be set up. The runtime stays stopped and raw
    /// mode is not held on any error.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            warn!("input runtime already running");
            return Ok(());
        }
        // A thread that ended on its own (end of input) is reaped first.
        self.stop();

        let raw_mode = RawModeGuard::acquire()?;
        let watcher = ResizeWatcher::new(self.resize_tx.clone())?;

        let (tx, rx) = crossbeam_channel::bounded(0);
        let stop = Arc::new(AtomicBool::new(false));
        let ctx = WorkerContext {
            source: Arc::clone(&self.source),
            paste: Arc::clone(&self.paste),
            stop: Arc::clone(&stop),
            keys: tx,
            config: self.config,
            raw_mode,
        };

        let handle = thread::Builder::new()
            .name("quill-input".into())
            .spawn(move || ctx.run())
            .map_err(Error::Spawn)?;

        self.worker = Some(Worker { stop, handle });
        self.keys = rx;
        self.resize_watcher = Some(watcher);
        info!(config = ?self.config, "input runtime started");
        Ok(())
    }

    /// Stop the input thread and restore the terminal. Idempotent.
    ///
    /// Keys the application has not taken yet are discarded. Returns within
    /// the poll timeout plus the drain, since every source read is bounded.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        worker.stop.store(true, Ordering::Release);
        let mut drained = 0usize;
        while self.keys.recv().is_ok() {
            drained += 1;
        }
        if worker.handle.join().is_err() {
            error!("input thread panicked");
        }

        self.keys = crossbeam_channel::never();
        self.resize_watcher = None;
        debug!(drained, "input runtime stopped");
    }

    /// Whether the input thread is alive. Turns false on its own when the
    /// input reaches end-of-file.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// The key queue. Keys arrive in input order; the queue disconnects when
    /// the input ends or the runtime stops. Before `start` it never fires.
    #[must_use]
    pub fn keys(&self) -> Receiver<Key> {
        self.keys.clone()
    }

    /// Window-resize notifications, coalesced to at most one pending.
    #[must_use]
    pub fn resizes(&self) -> Receiver<()> {
        self.resizes.clone()
    }

    /// Push a paste-protection setting. The top of the stack applies; an
    /// empty stack means protected.
    pub fn paste_push(&self, protect: bool) {
        self.paste
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(protect);
    }

    /// Pop the last paste-protection setting.
    pub fn paste_pop(&self) -> Option<bool> {
        let popped = self
            .paste
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        if popped.is_none() {
            warn!("paste protection stack is already empty");
        }
        popped
    }
}

impl Default for InputRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InputRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ChannelSource;
    use crate::terminal::{RAW_MODE_TEST_LOCK, raw_mode_active};
    use std::sync::MutexGuard;

    const RECV: Duration = Duration::from_millis(500);

    fn serial() -> MutexGuard<'static, ()> {
        RAW_MODE_TEST_LOCK
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn config() -> InputConfig {
        InputConfig::default()
            .with_poll_timeout(Duration::from_millis(10))
            .with_sequence_timeout(Duration::from_millis(5))
            // Wide enough that a busy machine cannot stretch a paste past it.
            .with_repeat_protection(Duration::from_millis(200))
    }

    fn runtime() -> (InputRuntime, Sender<u8>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (
            InputRuntime::with_source(ChannelSource::new(rx), config()),
            tx,
        )
    }

    fn feed(tx: &Sender<u8>, bytes: &[u8]) {
        for &b in bytes {
            tx.send(b).unwrap();
        }
    }

    // ── RepeatGuard ─────────────────────────────────────────────────

    #[test]
    fn repeat_guard_first_key_passes() {
        let mut guard = RepeatGuard::new(Duration::from_millis(5));
        assert!(guard.admit(Key::char('a'), Instant::now(), true));
    }

    #[test]
    fn repeat_guard_drops_fast_key_when_protected() {
        let mut guard = RepeatGuard::new(Duration::from_millis(5));
        let t0 = Instant::now();
        assert!(guard.admit(Key::char('a'), t0, true));
        assert!(!guard.admit(Key::char('b'), t0 + Duration::from_millis(1), true));
    }

    #[test]
    fn repeat_guard_dropped_key_extends_window() {
        let mut guard = RepeatGuard::new(Duration::from_millis(5));
        let t0 = Instant::now();
        assert!(guard.admit(Key::char('a'), t0, true));
        assert!(!guard.admit(Key::char('b'), t0 + Duration::from_millis(4), true));
        assert!(!guard.admit(Key::char('c'), t0 + Duration::from_millis(8), true));
        assert!(guard.admit(Key::char('d'), t0 + Duration::from_millis(20), true));
    }

    #[test]
    fn repeat_guard_unprotected_passes_everything() {
        let mut guard = RepeatGuard::new(Duration::from_millis(5));
        let t0 = Instant::now();
        assert!(guard.admit(Key::char('a'), t0, false));
        assert!(guard.admit(Key::char('b'), t0, false));
        assert!(guard.admit(Key::char('c'), t0, false));
    }

    #[test]
    fn repeat_guard_drops_key_right_after_enter_when_unprotected() {
        let mut guard = RepeatGuard::new(Duration::from_millis(5));
        let t0 = Instant::now();
        assert!(guard.admit(Key::new(KeyCode::Enter), t0, false));
        assert!(!guard.admit(Key::char('x'), t0 + Duration::from_millis(1), false));
        assert!(guard.admit(Key::char('y'), t0 + Duration::from_millis(6), false));
    }

    #[test]
    fn pasted_enter_does_not_carry_on_typing() {
        let _serial = serial();
        let (mut rt, tx) = runtime();
        rt.paste_push(false);
        feed(&tx, b"a\rb");
        rt.start().unwrap();

        let keys = rt.keys();
        assert_eq!(keys.recv_timeout(RECV).unwrap(), Key::char('a'));
        assert_eq!(keys.recv_timeout(RECV).unwrap(), Key::new(KeyCode::Enter));
        assert!(keys.recv_timeout(Duration::from_millis(100)).is_err());
        rt.stop();
    }

    #[test]
    fn repeat_guard_slow_keys_pass() {
        let mut guard = RepeatGuard::new(Duration::from_millis(5));
        let t0 = Instant::now();
        assert!(guard.admit(Key::char('a'), t0, true));
        assert!(guard.admit(Key::char('b'), t0 + Duration::from_millis(6), true));
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    #[test]
    fn delivers_keys_in_order_when_unprotected() {
        let _serial = serial();
        let (mut rt, tx) = runtime();
        rt.paste_push(false);
        feed(&tx, b"ab\x1b[A");
        rt.start().unwrap();

        let keys = rt.keys();
        assert_eq!(keys.recv_timeout(RECV).unwrap(), Key::char('a'));
        assert_eq!(keys.recv_timeout(RECV).unwrap(), Key::char('b'));
        assert_eq!(
            keys.recv_timeout(RECV).unwrap(),
            Key::new(KeyCode::Up)
        );
        rt.stop();
    }

    #[test]
    fn pasted_keys_are_dropped_when_protected() {
        let _serial = serial();
        let (mut rt, tx) = runtime();
        feed(&tx, b"ab");
        rt.start().unwrap();

        let keys = rt.keys();
        assert_eq!(keys.recv_timeout(RECV).unwrap(), Key::char('a'));
        assert!(keys.recv_timeout(Duration::from_millis(100)).is_err());
        rt.stop();
    }

    #[test]
    fn paste_stack_push_pop() {
        let (rt, _tx) = runtime();
        assert_eq!(rt.paste_pop(), None);
        rt.paste_push(false);
        rt.paste_push(true);
        assert_eq!(rt.paste_pop(), Some(true));
        assert_eq!(rt.paste_pop(), Some(false));
        assert_eq!(rt.paste_pop(), None);
    }

    #[test]
    fn start_holds_raw_mode_until_stop() {
        let _serial = serial();
        let (mut rt, _tx) = runtime();
        rt.start().unwrap();
        assert!(rt.is_running());
        assert!(raw_mode_active());
        rt.stop();
        assert!(!rt.is_running());
        assert!(!raw_mode_active());
    }

    #[test]
    fn second_runtime_is_busy() {
        let _serial = serial();
        let (mut first, _tx1) = runtime();
        let (mut second, _tx2) = runtime();
        first.start().unwrap();
        assert!(matches!(second.start(), Err(Error::RawModeBusy)));
        assert!(!second.is_running());
        first.stop();
    }

    #[test]
    fn start_while_running_is_ignored() {
        let _serial = serial();
        let (mut rt, _tx) = runtime();
        rt.start().unwrap();
        rt.start().unwrap();
        assert!(rt.is_running());
        rt.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let _serial = serial();
        let (mut rt, _tx) = runtime();
        rt.stop();
        rt.start().unwrap();
        rt.stop();
        rt.stop();
        assert!(!raw_mode_active());
    }

    #[test]
    fn stop_without_consumer_returns() {
        let _serial = serial();
        let (mut rt, tx) = runtime();
        rt.paste_push(false);
        feed(&tx, &[b'x'; 64]);
        rt.start().unwrap();

        let start = Instant::now();
        rt.stop();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!raw_mode_active());
    }

    #[test]
    fn end_of_input_closes_key_queue() {
        let _serial = serial();
        let (mut rt, tx) = runtime();
        rt.paste_push(false);
        feed(&tx, b"z");
        drop(tx);
        rt.start().unwrap();

        let keys = rt.keys();
        assert_eq!(keys.recv_timeout(RECV).unwrap(), Key::char('z'));
        assert!(keys.recv_timeout(RECV).is_err());
        assert!(!raw_mode_active());
        rt.stop();
    }

    #[test]
    fn restart_reuses_source() {
        let _serial = serial();
        let (mut rt, tx) = runtime();
        rt.paste_push(false);
        rt.start().unwrap();
        rt.stop();

        feed(&tx, b"r");
        rt.start().unwrap();
        assert_eq!(rt.keys().recv_timeout(RECV).unwrap(), Key::char('r'));
        rt.stop();
    }

    #[test]
    fn keys_before_start_never_fire() {
        let (rt, _tx) = runtime();
        assert!(rt.keys().recv_timeout(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn drop_stops_thread() {
        let _serial = serial();
        let (mut rt, _tx) = runtime();
        rt.start().unwrap();
        drop(rt);
        assert!(!raw_mode_active());
    }
}
