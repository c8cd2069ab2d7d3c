// SPDX-License-Identifier: MIT
//
// Runtime configuration.
//
// Two small plain-data structs: one for the input thread's timing, one for
// the renderer. Defaults are the values the runtime is tuned for; callers
// override individual fields with the `with_*` builders.

use std::time::Duration;

/// Timing knobs for the input decoder and its background thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputConfig {
    /// How long the input thread waits for the first byte of a key before
    /// checking for a stop request. Bounds `stop()` latency.
    pub poll_timeout: Duration,
    /// How long to wait for each follow byte of an escape sequence or
    /// UTF-8 character. A lone ESC is reported as Escape after this.
    pub sequence_timeout: Duration,
    /// Keys arriving closer together than this are treated as pasted or
    /// auto-repeated and dropped while paste protection is on.
    pub repeat_protection: Duration,
}

impl InputConfig {
    /// Override the stop-check poll interval.
    #[must_use]
    pub const fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Override the escape/UTF-8 continuation timeout.
    #[must_use]
    pub const fn with_sequence_timeout(mut self, timeout: Duration) -> Self {
        self.sequence_timeout = timeout;
        self
    }

    /// Override the paste/repeat protection threshold.
    #[must_use]
    pub const fn with_repeat_protection(mut self, threshold: Duration) -> Self {
        self.repeat_protection = threshold;
        self
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(50),
            sequence_timeout: Duration::from_millis(10),
            repeat_protection: Duration::from_millis(5),
        }
    }
}

/// Renderer options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenConfig {
    /// Bracket every frame in synchronized-update markers (DEC 2026).
    /// Terminals without support ignore the markers, but some multiplexers
    /// print them; turn off for those.
    pub synchronized_updates: bool,
}

impl ScreenConfig {
    /// Enable or disable synchronized-update markers.
    #[must_use]
    pub const fn with_synchronized_updates(mut self, enabled: bool) -> Self {
        self.synchronized_updates = enabled;
        self
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            synchronized_updates: true,
        }
    }
}
