//! The answer module capability.

use async_trait::async_trait;

use crate::dispatch::types::{Candidate, Master, Message};
use crate::error::ModuleError;

/// A source of candidate answers.
///
/// Modules receive the sanitized message and the bot identity and return
/// zero or more candidates. They are invoked once per dispatch, possibly
/// concurrently with other modules, and are bounded by the dispatcher's
/// module timeout.
#[async_trait]
pub trait AnswerModule: Send + Sync {
    /// Name used for logging and failure events.
    fn name(&self) -> &str;

    async fn produce(&self, message: &Message, master: &Master)
    -> Result<Vec<Candidate>, ModuleError>;
}
