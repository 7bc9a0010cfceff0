//! Rate limit for unprompted speech.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::dispatch::reply::ReplyPolicy;
use crate::dispatch::types::{Master, Message};

/// Outcome of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    /// The message addresses the bot directly.
    pub direct_reply: bool,
    /// The unprompted window was open and has now been consumed.
    pub window_opened: bool,
}

impl GateDecision {
    pub fn allowed(&self) -> bool {
        self.direct_reply || self.window_opened
    }
}

/// Lets the bot speak unprompted at most once per interval.
///
/// A successful check consumes the window: `last_spoken` is reset to the
/// checked instant whether or not anything is posted afterwards. The
/// read-modify-write happens under one lock, so two concurrent checks can
/// never both open the same window.
#[derive(Debug)]
pub struct ActivityGate {
    interval: chrono::Duration,
    last_spoken: Mutex<DateTime<Utc>>,
}

impl ActivityGate {
    /// Create a gate whose window starts at `started_at`.
    pub fn new(interval: std::time::Duration, started_at: DateTime<Utc>) -> Self {
        let interval = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::MAX);
        Self {
            interval,
            last_spoken: Mutex::new(started_at),
        }
    }

    pub fn interval(&self) -> chrono::Duration {
        self.interval
    }

    /// When the gate was last consumed (or constructed).
    pub fn last_spoken(&self) -> DateTime<Utc> {
        *self.lock()
    }

    /// Reset the window, e.g. after posting through another path.
    pub fn mark_spoken(&self, now: DateTime<Utc>) {
        *self.lock() = now;
    }

    /// True iff more than `interval` has passed since the last reset.
    /// Resets the window to `now` when it returns true.
    pub fn should_speak_unprompted(&self, now: DateTime<Utc>) -> bool {
        let mut last = self.lock();
        let elapsed = now.signed_duration_since(*last);
        if elapsed > self.interval {
            debug!(
                elapsed_secs = elapsed.num_seconds(),
                "Unprompted window elapsed, resetting gate"
            );
            *last = now;
            true
        } else {
            false
        }
    }

    /// Whether the bot may respond to `message` at `now`.
    ///
    /// The time check always runs first and always resets the window when
    /// its own condition holds, even if the message is a direct reply and
    /// would have been answered anyway.
    pub fn may_respond(&self, message: &Message, master: &Master, now: DateTime<Utc>) -> bool {
        self.evaluate(message, master, now).allowed()
    }

    /// Same check as [`ActivityGate::may_respond`], reporting both inputs.
    pub fn evaluate(&self, message: &Message, master: &Master, now: DateTime<Utc>) -> GateDecision {
        let window_opened = self.should_speak_unprompted(now);
        GateDecision {
            direct_reply: ReplyPolicy.is_reply_needed(message, master),
            window_opened,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        // The guarded value is a plain timestamp; a poisoned lock still holds a valid one.
        self.last_spoken.lock().unwrap_or_else(|e| e.into_inner())
    }
}
