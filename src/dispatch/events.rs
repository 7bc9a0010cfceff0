//! Structured dispatcher events and the sinks that receive them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Something observable that happened inside the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// An answer module was added to the registry.
    ModuleRegistered { module: String, position: usize },
    /// The unprompted-speech window elapsed and was reset.
    GateOpened { at: DateTime<Utc> },
    /// The clock could not be read; the gate stayed closed.
    ClockFault { error: String },
    /// Preprocessing failed; the original text was used instead.
    PreprocessFailed { message_id: String, error: String },
    /// An answer module failed or timed out and contributed nothing.
    ModuleFailed {
        module: String,
        message_id: String,
        kind: String,
        error: String,
    },
}

impl DispatchEvent {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ModuleRegistered { .. } => "module_registered",
            Self::GateOpened { .. } => "gate_opened",
            Self::ClockFault { .. } => "clock_fault",
            Self::PreprocessFailed { .. } => "preprocess_failed",
            Self::ModuleFailed { .. } => "module_failed",
        }
    }
}

/// Receives dispatcher events. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DispatchEvent);
}

/// Writes events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: DispatchEvent) {
        match &event {
            DispatchEvent::ModuleRegistered { module, position } => {
                info!(module = %module, position, "Answer module registered");
            }
            DispatchEvent::GateOpened { at } => {
                debug!(at = %at, "Unprompted window opened");
            }
            DispatchEvent::ClockFault { error } => {
                warn!(error = %error, "Clock unavailable, gate held closed");
            }
            DispatchEvent::PreprocessFailed { message_id, error } => {
                warn!(id = %message_id, error = %error, "Preprocessing failed, using original text");
            }
            DispatchEvent::ModuleFailed {
                module,
                message_id,
                kind,
                error,
            } => {
                warn!(
                    module = %module,
                    id = %message_id,
                    kind = %kind,
                    error = %error,
                    "Answer module failed"
                );
            }
        }
    }
}

/// Fans events out to any number of subscribers over a broadcast channel.
pub struct BroadcastSink {
    tx: broadcast::Sender<DispatchEvent>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BROADCAST_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: DispatchEvent) {
        // Ok if nobody is listening
        let _ = self.tx.send(event);
    }
}
