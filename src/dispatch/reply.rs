//! Reply detection and reply rewriting.

use serde_json::Value;

use crate::dispatch::types::{Candidate, IN_REPLY_TO_ID, Master, Message};

/// Decides whether a message addresses the bot and turns answers into replies.
///
/// Detection is a strict prefix match on `"@<handle> "`: case-sensitive,
/// anchored at the first byte, exactly one trailing space. Mentions anywhere
/// else in the text do not count.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplyPolicy;

impl ReplyPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Whether `message` starts with the mention token for `master`.
    pub fn is_reply_needed(&self, message: &Message, master: &Master) -> bool {
        message
            .text
            .strip_prefix('@')
            .and_then(|rest| rest.strip_prefix(master.handle.as_str()))
            .is_some_and(|rest| rest.starts_with(' '))
    }

    /// Prefix `text` with a mention of the message author.
    ///
    /// Leading whitespace in `text` is dropped so the mention and the body
    /// are always separated by exactly one space.
    pub fn render_reply(&self, message: &Message, text: &str) -> String {
        format!("@{} {}", message.author.handle, text.trim_start())
    }

    /// Rewrite `candidate` into reply form when `message` addresses the bot.
    ///
    /// Outside the reply branch the candidate is returned untouched.
    pub fn postprocess(&self, message: &Message, mut candidate: Candidate, master: &Master) -> Candidate {
        if self.is_reply_needed(message, master) {
            candidate.text = self.render_reply(message, &candidate.text);
            candidate
                .metadata
                .insert(IN_REPLY_TO_ID.to_string(), Value::String(message.id.clone()));
        }
        candidate
    }
}
