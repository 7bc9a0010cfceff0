//! Trivial answer modules for local runs and wiring checks.

use async_trait::async_trait;

use crate::answer::AnswerModule;
use crate::dispatch::types::{Candidate, Master, Message};
use crate::error::ModuleError;

/// Repeats the sanitized text back, minus any leading mention of the bot.
#[derive(Debug, Clone)]
pub struct EchoModule {
    probability: f64,
}

impl EchoModule {
    pub fn new(probability: f64) -> Self {
        Self { probability }
    }
}

impl Default for EchoModule {
    fn default() -> Self {
        Self::new(0.5)
    }
}

#[async_trait]
impl AnswerModule for EchoModule {
    fn name(&self) -> &str {
        "echo"
    }

    async fn produce(
        &self,
        message: &Message,
        master: &Master,
    ) -> Result<Vec<Candidate>, ModuleError> {
        let body = message
            .text
            .strip_prefix(master.mention().as_str())
            .unwrap_or(&message.text)
            .trim();
        if body.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![Candidate::new(self.probability, body, self.name())])
    }
}

/// Always answers with the same fixed set of texts.
#[derive(Debug, Clone)]
pub struct StaticModule {
    name: String,
    answers: Vec<(f64, String)>,
}

impl StaticModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            answers: Vec::new(),
        }
    }

    pub fn with_answer(mut self, probability: f64, text: impl Into<String>) -> Self {
        self.answers.push((probability, text.into()));
        self
    }
}

#[async_trait]
impl AnswerModule for StaticModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn produce(
        &self,
        _message: &Message,
        _master: &Master,
    ) -> Result<Vec<Candidate>, ModuleError> {
        Ok(self
            .answers
            .iter()
            .map(|(p, text)| Candidate::new(*p, text.clone(), self.name.clone()))
            .collect())
    }
}
