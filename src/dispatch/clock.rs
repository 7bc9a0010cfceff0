//! Time sources for the activity gate.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::error::ClockError;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Result<DateTime<Utc>, ClockError>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Result<DateTime<Utc>, ClockError> {
        Ok(Utc::now())
    }
}

/// Manually driven clock for tests and replaying recorded timelines.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Option<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(Some(start)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(t) = now.as_mut() {
            *t += by;
        }
    }

    /// Jump to an absolute instant. Also clears a simulated fault.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
    }

    /// Make every subsequent read fail until [`ManualClock::set`] is called.
    pub fn fail(&self) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Result<DateTime<Utc>, ClockError> {
        self.now
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .ok_or_else(|| ClockError::Unavailable("manual clock is in a failed state".into()))
    }
}
