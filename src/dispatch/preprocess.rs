//! Text normalization applied before answer modules see a message.
//!
//! Real platform rules (URL stripping, emoji handling, ...) live outside this
//! crate behind [`TextPreprocessor`]. The implementations here are the
//! passthrough and a conservative whitespace/control-character cleanup.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::PreprocessError;

/// Normalizes raw message text.
///
/// Implementations must not panic on arbitrary input. Returning an error is
/// fine: the dispatcher falls back to the original text.
pub trait TextPreprocessor: Send + Sync {
    fn sanitize(&self, text: &str) -> Result<String, PreprocessError>;
}

/// Returns text unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughPreprocessor;

impl TextPreprocessor for PassthroughPreprocessor {
    fn sanitize(&self, text: &str) -> Result<String, PreprocessError> {
        Ok(text.to_string())
    }
}

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Best-effort cleanup: drops control characters, collapses whitespace runs
/// to a single space and trims both ends.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicPreprocessor;

impl TextPreprocessor for BasicPreprocessor {
    fn sanitize(&self, text: &str) -> Result<String, PreprocessError> {
        let visible: String = text
            .chars()
            .filter(|c| !c.is_control() || c.is_whitespace())
            .collect();
        Ok(WHITESPACE_RUN.replace_all(&visible, " ").trim().to_string())
    }
}
