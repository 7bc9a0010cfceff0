//! Shared types for the dispatch pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata key stamped on answers that reply to the triggering message.
pub const IN_REPLY_TO_ID: &str = "in_reply_to_id";

// ── Inbound message ─────────────────────────────────────────────────

/// Author of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Human-readable name shown by the platform.
    pub display_name: String,
    /// Account handle without the leading `@`.
    pub handle: String,
}

/// An inbound post from the platform.
///
/// Treated as immutable: the dispatcher derives a sanitized copy for the
/// answer modules and keeps the original for reply detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Platform-native identifier.
    pub id: String,
    /// Raw post text.
    pub text: String,
    pub author: Author,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        display_name: impl Into<String>,
        handle: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            author: Author {
                display_name: display_name.into(),
                handle: handle.into(),
            },
        }
    }

    /// Copy of this message with different text, same id and author.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            id: self.id.clone(),
            text: text.into(),
            author: self.author.clone(),
        }
    }
}

/// Identity of the bot account itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Master {
    /// Bot handle without the leading `@`.
    pub handle: String,
}

impl Master {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
        }
    }

    /// The mention token that addresses this account, e.g. `"@bot"`.
    pub fn mention(&self) -> String {
        format!("@{}", self.handle)
    }
}

// ── Candidate answer ────────────────────────────────────────────────

/// A proposed response produced by an answer module.
///
/// `probability` is a ranking score. Modules may emit values outside
/// `[0, 1]`; jitter clamps the lower bound only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub probability: f64,
    pub text: String,
    /// Name of the module that produced this answer.
    pub source: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Candidate {
    pub fn new(probability: f64, text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            probability,
            text: text.into(),
            source: source.into(),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The id this answer replies to, if it was rewritten into a reply.
    pub fn in_reply_to(&self) -> Option<&str> {
        self.metadata.get(IN_REPLY_TO_ID).and_then(Value::as_str)
    }
}
