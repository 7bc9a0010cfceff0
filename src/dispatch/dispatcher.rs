//! Dispatcher: fans a message out to answer modules and post-processes
//! every candidate.
//!
//! Flow for one message:
//! 1. `TextPreprocessor::sanitize()`: falls back to the raw text on error
//! 2. Every registered `AnswerModule`, in registration order, each bounded by
//!    the module timeout; failures are isolated and recorded
//! 3. `ReplyPolicy::postprocess()` against the **original** message
//! 4. `Jitter::apply()` per candidate
//!
//! Gating is a separate call (`may_respond`); `dispatch` never gates.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use futures::FutureExt;
use futures::future::join_all;
use tracing::{debug, info};

use crate::answer::AnswerModule;
use crate::config::DispatcherConfig;
use crate::dispatch::clock::{Clock, SystemClock};
use crate::dispatch::events::{DispatchEvent, EventSink, TracingSink};
use crate::dispatch::gate::ActivityGate;
use crate::dispatch::jitter::Jitter;
use crate::dispatch::preprocess::{BasicPreprocessor, TextPreprocessor};
use crate::dispatch::reply::ReplyPolicy;
use crate::dispatch::types::{Candidate, Master, Message};
use crate::error::{DispatchError, Error, ModuleError};

/// Aggregation root of the answer pipeline.
pub struct Dispatcher {
    config: DispatcherConfig,
    modules: RwLock<Vec<Arc<dyn AnswerModule>>>,
    preprocessor: Arc<dyn TextPreprocessor>,
    reply: ReplyPolicy,
    gate: ActivityGate,
    jitter: Jitter,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

/// Builder for [`Dispatcher`]. Every collaborator has a default.
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    preprocessor: Arc<dyn TextPreprocessor>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    jitter_seed: Option<u64>,
}

impl DispatcherBuilder {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            preprocessor: Arc::new(BasicPreprocessor),
            clock: Arc::new(SystemClock),
            events: Arc::new(TracingSink),
            jitter_seed: None,
        }
    }

    pub fn preprocessor(mut self, preprocessor: Arc<dyn TextPreprocessor>) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Seed the jitter random source for reproducible runs.
    pub fn jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }

    /// Validate the config and start the unprompted window at the clock's
    /// current time.
    pub fn build(self) -> Result<Dispatcher, Error> {
        self.config.validate()?;

        let jitter = match self.jitter_seed {
            Some(seed) => Jitter::seeded(&self.config.jitter_alpha, seed)?,
            None => Jitter::new(&self.config.jitter_alpha)?,
        };
        let started_at = self.clock.now()?;
        let gate = ActivityGate::new(self.config.unprompted_interval, started_at);

        Ok(Dispatcher {
            config: self.config,
            modules: RwLock::new(Vec::new()),
            preprocessor: self.preprocessor,
            reply: ReplyPolicy::new(),
            gate,
            jitter,
            clock: self.clock,
            events: self.events,
        })
    }
}

impl Dispatcher {
    /// Dispatcher with default collaborators.
    pub fn new(config: DispatcherConfig) -> Result<Self, Error> {
        DispatcherBuilder::new(config).build()
    }

    pub fn builder(config: DispatcherConfig) -> DispatcherBuilder {
        DispatcherBuilder::new(config)
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn gate(&self) -> &ActivityGate {
        &self.gate
    }

    /// Append a module. Modules are invoked in registration order.
    pub fn register_module(&self, module: Arc<dyn AnswerModule>) {
        let name = module.name().to_string();
        let position = {
            let mut modules = self.modules.write().unwrap_or_else(|e| e.into_inner());
            modules.push(module);
            modules.len() - 1
        };
        self.events.emit(DispatchEvent::ModuleRegistered {
            module: name,
            position,
        });
    }

    /// Names of registered modules, in invocation order.
    pub fn module_names(&self) -> Vec<String> {
        self.modules_snapshot()
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    pub fn module_count(&self) -> usize {
        self.modules.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the bot should respond to `message` right now.
    ///
    /// Direct replies are always allowed. Otherwise the unprompted window
    /// must have elapsed, and checking it consumes it. Fails closed when the
    /// clock cannot be read.
    pub fn may_respond(&self, message: &Message, master: &Master) -> bool {
        let now = match self.clock.now() {
            Ok(now) => now,
            Err(e) => {
                self.events.emit(DispatchEvent::ClockFault {
                    error: e.to_string(),
                });
                return false;
            }
        };

        let decision = self.gate.evaluate(message, master, now);
        if decision.window_opened {
            self.events.emit(DispatchEvent::GateOpened { at: now });
        }
        debug!(
            id = %message.id,
            direct_reply = decision.direct_reply,
            window_opened = decision.window_opened,
            "Gate evaluated"
        );
        decision.allowed()
    }

    /// Run `message` through every module and return the post-processed
    /// candidates in registration order.
    ///
    /// Module failures contribute nothing and do not abort the call. A
    /// malformed candidate does.
    pub async fn dispatch(
        &self,
        message: &Message,
        master: &Master,
    ) -> Result<Vec<Candidate>, DispatchError> {
        let sanitized = self.sanitize(message);
        let modules = self.modules_snapshot();

        let results = if self.config.parallel_modules {
            join_all(
                modules
                    .iter()
                    .map(|module| self.invoke(module.as_ref(), &sanitized, master)),
            )
            .await
        } else {
            let mut results = Vec::with_capacity(modules.len());
            for module in &modules {
                results.push(self.invoke(module.as_ref(), &sanitized, master).await);
            }
            results
        };

        let mut candidates = Vec::new();
        for result in results {
            match result {
                Ok(batch) => candidates.extend(batch),
                Err(e) => self.events.emit(DispatchEvent::ModuleFailed {
                    module: e.module_name().to_string(),
                    message_id: message.id.clone(),
                    kind: e.kind().to_string(),
                    error: e.to_string(),
                }),
            }
        }

        let answers = candidates
            .into_iter()
            .map(|candidate| {
                validate_candidate(&candidate)?;
                let candidate = self.reply.postprocess(message, candidate, master);
                Ok(self.jitter.apply(candidate))
            })
            .collect::<Result<Vec<_>, DispatchError>>()?;

        info!(
            id = %message.id,
            modules = modules.len(),
            answers = answers.len(),
            "Dispatch complete"
        );
        Ok(answers)
    }

    fn sanitize(&self, message: &Message) -> Message {
        match self.preprocessor.sanitize(&message.text) {
            Ok(text) => message.with_text(text),
            Err(e) => {
                self.events.emit(DispatchEvent::PreprocessFailed {
                    message_id: message.id.clone(),
                    error: e.to_string(),
                });
                message.clone()
            }
        }
    }

    async fn invoke(
        &self,
        module: &dyn AnswerModule,
        message: &Message,
        master: &Master,
    ) -> Result<Vec<Candidate>, ModuleError> {
        let timeout = self.config.module_timeout;
        let call = AssertUnwindSafe(module.produce(message, master)).catch_unwind();

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(ModuleError::Panicked {
                name: module.name().to_string(),
                reason: panic_reason(panic.as_ref()),
            }),
            Err(_) => Err(ModuleError::Timeout {
                name: module.name().to_string(),
                timeout,
            }),
        }
    }

    fn modules_snapshot(&self) -> Vec<Arc<dyn AnswerModule>> {
        self.modules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl fmt::Display for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dispatcher")?;
        for name in self.module_names() {
            write!(f, "\n        - {name}")?;
        }
        Ok(())
    }
}

/// Highest-scoring answer, for callers that post a single reply.
pub fn best(answers: &[Candidate]) -> Option<&Candidate> {
    answers
        .iter()
        .max_by(|a, b| a.probability.total_cmp(&b.probability))
}

fn validate_candidate(candidate: &Candidate) -> Result<(), DispatchError> {
    if candidate.source.is_empty() {
        return Err(DispatchError::MalformedCandidate {
            source_module: "<unnamed>".to_string(),
            reason: "missing source".to_string(),
        });
    }
    if !candidate.probability.is_finite() {
        return Err(DispatchError::MalformedCandidate {
            source_module: candidate.source.clone(),
            reason: format!("probability is not finite: {}", candidate.probability),
        });
    }
    Ok(())
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::answer::builtin::StaticModule;
    use crate::dispatch::clock::ManualClock;
    use crate::dispatch::preprocess::PassthroughPreprocessor;
    use crate::dispatch::types::IN_REPLY_TO_ID;
    use crate::error::PreprocessError;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<DispatchEvent>>,
    }

    impl RecordingSink {
        fn labels(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().iter().map(|e| e.label()).collect()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: DispatchEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    /// Records the text it was shown.
    #[derive(Default)]
    struct SpyModule {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AnswerModule for SpyModule {
        fn name(&self) -> &str {
            "spy"
        }
        async fn produce(
            &self,
            message: &Message,
            _master: &Master,
        ) -> Result<Vec<Candidate>, ModuleError> {
            self.seen.lock().unwrap().push(message.text.clone());
            Ok(vec![Candidate::new(0.5, "seen", "spy")])
        }
    }

    struct FailingModule;

    #[async_trait]
    impl AnswerModule for FailingModule {
        fn name(&self) -> &str {
            "failing"
        }
        async fn produce(
            &self,
            _message: &Message,
            _master: &Master,
        ) -> Result<Vec<Candidate>, ModuleError> {
            Err(ModuleError::Failed {
                name: "failing".into(),
                reason: "backend down".into(),
            })
        }
    }

    struct PanickingModule;

    #[async_trait]
    impl AnswerModule for PanickingModule {
        fn name(&self) -> &str {
            "panicking"
        }
        async fn produce(
            &self,
            _message: &Message,
            _master: &Master,
        ) -> Result<Vec<Candidate>, ModuleError> {
            panic!("module blew up");
        }
    }

    struct SlowModule;

    #[async_trait]
    impl AnswerModule for SlowModule {
        fn name(&self) -> &str {
            "slow"
        }
        async fn produce(
            &self,
            _message: &Message,
            _master: &Master,
        ) -> Result<Vec<Candidate>, ModuleError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![Candidate::new(1.0, "too late", "slow")])
        }
    }

    struct BrokenPreprocessor;

    impl TextPreprocessor for BrokenPreprocessor {
        fn sanitize(&self, _text: &str) -> Result<String, PreprocessError> {
            Err(PreprocessError::Normalization("bad input".into()))
        }
    }

    struct UpperPreprocessor;

    impl TextPreprocessor for UpperPreprocessor {
        fn sanitize(&self, text: &str) -> Result<String, PreprocessError> {
            Ok(text.to_uppercase())
        }
    }

    fn dispatcher_with(sink: Arc<RecordingSink>) -> Dispatcher {
        Dispatcher::builder(DispatcherConfig::default())
            .preprocessor(Arc::new(PassthroughPreprocessor))
            .events(sink)
            .jitter_seed(1)
            .build()
            .unwrap()
    }

    fn ambient() -> Message {
        Message::new("m1", "what a day", "Alice", "alice")
    }

    fn direct() -> Message {
        Message::new("m2", "@bot hello", "Alice", "alice")
    }

    #[tokio::test]
    async fn no_modules_no_answers() {
        let d = dispatcher_with(Arc::default());
        let out = d.dispatch(&ambient(), &Master::new("bot")).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn answers_concatenated_in_registration_order() {
        let d = dispatcher_with(Arc::default());
        d.register_module(Arc::new(
            StaticModule::new("a").with_answer(0.9, "a1").with_answer(0.8, "a2"),
        ));
        d.register_module(Arc::new(StaticModule::new("empty")));
        d.register_module(Arc::new(StaticModule::new("b").with_answer(0.7, "b1")));

        let out = d.dispatch(&ambient(), &Master::new("bot")).await.unwrap();

        let texts: Vec<_> = out.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a1", "a2", "b1"]);
        let sources: Vec<_> = out.iter().map(|c| c.source.as_str()).collect();
        assert_eq!(sources, vec!["a", "a", "b"]);
    }

    #[tokio::test]
    async fn direct_message_answers_become_replies() {
        let d = dispatcher_with(Arc::default());
        d.register_module(Arc::new(StaticModule::new("a").with_answer(0.9, "hi!")));

        let out = d.dispatch(&direct(), &Master::new("bot")).await.unwrap();

        assert_eq!(out[0].text, "@alice hi!");
        assert_eq!(out[0].in_reply_to(), Some("m2"));
    }

    #[tokio::test]
    async fn ambient_message_answers_untouched() {
        let d = dispatcher_with(Arc::default());
        d.register_module(Arc::new(StaticModule::new("a").with_answer(0.9, "hi!")));

        let out = d.dispatch(&ambient(), &Master::new("bot")).await.unwrap();

        assert_eq!(out[0].text, "hi!");
        assert!(!out[0].metadata.contains_key(IN_REPLY_TO_ID));
    }

    #[tokio::test]
    async fn answers_are_jittered_down() {
        let d = dispatcher_with(Arc::default());
        d.register_module(Arc::new(
            StaticModule::new("a")
                .with_answer(0.9, "x")
                .with_answer(0.05, "y")
                .with_answer(1.0, "z"),
        ));

        let out = d.dispatch(&ambient(), &Master::new("bot")).await.unwrap();

        for (answer, original) in out.iter().zip([0.9, 0.05, 1.0]) {
            assert!(answer.probability < original);
            assert!(answer.probability >= 0.0);
        }
    }

    #[tokio::test]
    async fn modules_see_sanitized_text_but_reply_uses_original() {
        let spy = Arc::new(SpyModule::default());
        let d = Dispatcher::builder(DispatcherConfig::default())
            .preprocessor(Arc::new(UpperPreprocessor))
            .jitter_seed(1)
            .build()
            .unwrap();
        d.register_module(spy.clone());

        // Uppercasing would break the case-sensitive mention match.
        let out = d.dispatch(&direct(), &Master::new("bot")).await.unwrap();

        assert_eq!(spy.seen.lock().unwrap().as_slice(), ["@BOT HELLO"]);
        assert_eq!(out[0].text, "@alice seen");
    }

    #[tokio::test]
    async fn preprocess_failure_falls_back_to_original_text() {
        let sink = Arc::new(RecordingSink::default());
        let spy = Arc::new(SpyModule::default());
        let d = Dispatcher::builder(DispatcherConfig::default())
            .preprocessor(Arc::new(BrokenPreprocessor))
            .events(sink.clone())
            .build()
            .unwrap();
        d.register_module(spy.clone());

        let out = d.dispatch(&ambient(), &Master::new("bot")).await.unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(spy.seen.lock().unwrap().as_slice(), ["what a day"]);
        assert!(sink.labels().contains(&"preprocess_failed"));
    }

    #[tokio::test]
    async fn failing_module_is_isolated_and_recorded_once() {
        let sink = Arc::new(RecordingSink::default());
        let d = dispatcher_with(sink.clone());
        d.register_module(Arc::new(StaticModule::new("a").with_answer(0.5, "a1")));
        d.register_module(Arc::new(FailingModule));
        d.register_module(Arc::new(StaticModule::new("b").with_answer(0.5, "b1")));

        let out = d.dispatch(&ambient(), &Master::new("bot")).await.unwrap();

        let texts: Vec<_> = out.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a1", "b1"]);
        let failures: Vec<_> = sink
            .events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                DispatchEvent::ModuleFailed { module, kind, .. } => {
                    Some((module.clone(), kind.clone()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(failures, vec![("failing".to_string(), "failed".to_string())]);
    }

    #[tokio::test]
    async fn panicking_module_is_isolated() {
        let sink = Arc::new(RecordingSink::default());
        let d = dispatcher_with(sink.clone());
        d.register_module(Arc::new(PanickingModule));
        d.register_module(Arc::new(StaticModule::new("b").with_answer(0.5, "b1")));

        let out = d.dispatch(&ambient(), &Master::new("bot")).await.unwrap();

        assert_eq!(out.len(), 1);
        let events = sink.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            DispatchEvent::ModuleFailed { module, kind, error, .. }
                if module == "panicking" && kind == "panicked" && error.contains("module blew up")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_module_times_out() {
        let sink = Arc::new(RecordingSink::default());
        let config = DispatcherConfig {
            module_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let d = Dispatcher::builder(config)
            .events(sink.clone())
            .jitter_seed(1)
            .build()
            .unwrap();
        d.register_module(Arc::new(SlowModule));
        d.register_module(Arc::new(StaticModule::new("b").with_answer(0.5, "b1")));

        let out = d.dispatch(&ambient(), &Master::new("bot")).await.unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source, "b");
        assert_eq!(
            sink.labels().iter().filter(|l| **l == "module_failed").count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_mode_preserves_order() {
        let config = DispatcherConfig {
            parallel_modules: true,
            module_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let d = Dispatcher::builder(config).jitter_seed(1).build().unwrap();
        d.register_module(Arc::new(SlowModule));
        d.register_module(Arc::new(StaticModule::new("a").with_answer(0.5, "a1")));
        d.register_module(Arc::new(FailingModule));
        d.register_module(Arc::new(StaticModule::new("b").with_answer(0.5, "b1")));

        let out = d.dispatch(&ambient(), &Master::new("bot")).await.unwrap();

        let texts: Vec<_> = out.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a1", "b1"]);
    }

    #[tokio::test]
    async fn non_finite_probability_fails_dispatch() {
        let d = dispatcher_with(Arc::default());
        d.register_module(Arc::new(StaticModule::new("a").with_answer(f64::NAN, "nan")));

        let err = d.dispatch(&ambient(), &Master::new("bot")).await.unwrap_err();

        assert!(matches!(err, DispatchError::MalformedCandidate { ref source_module, .. } if source_module == "a"));
    }

    #[test]
    fn registration_emits_event_with_position() {
        let sink = Arc::new(RecordingSink::default());
        let d = dispatcher_with(sink.clone());
        d.register_module(Arc::new(StaticModule::new("a")));
        d.register_module(Arc::new(StaticModule::new("b")));

        assert_eq!(d.module_count(), 2);
        assert_eq!(d.module_names(), vec!["a", "b"]);
        let events = sink.events.lock().unwrap();
        assert_eq!(
            events[1],
            DispatchEvent::ModuleRegistered {
                module: "b".into(),
                position: 1
            }
        );
    }

    #[test]
    fn display_lists_modules() {
        let d = dispatcher_with(Arc::default());
        d.register_module(Arc::new(StaticModule::new("a")));
        d.register_module(Arc::new(StaticModule::new("b")));
        assert_eq!(d.to_string(), "Dispatcher\n        - a\n        - b");
    }

    #[test]
    fn may_respond_follows_gate_and_clock() {
        let sink = Arc::new(RecordingSink::default());
        let t0 = Utc::now();
        let clock = Arc::new(ManualClock::new(t0));
        let d = Dispatcher::builder(DispatcherConfig::default())
            .clock(clock.clone())
            .events(sink.clone())
            .build()
            .unwrap();
        let master = Master::new("bot");

        assert!(!d.may_respond(&ambient(), &master));
        assert!(d.may_respond(&direct(), &master));

        clock.advance(chrono::Duration::seconds(901));
        assert!(d.may_respond(&ambient(), &master));
        assert!(!d.may_respond(&ambient(), &master));
        assert_eq!(d.gate().last_spoken(), t0 + chrono::Duration::seconds(901));
        assert!(sink.labels().contains(&"gate_opened"));
    }

    #[test]
    fn may_respond_fails_closed_on_clock_fault() {
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let d = Dispatcher::builder(DispatcherConfig::default())
            .clock(clock.clone())
            .events(sink.clone())
            .build()
            .unwrap();

        clock.fail();

        assert!(!d.may_respond(&direct(), &Master::new("bot")));
        assert_eq!(sink.labels(), vec!["clock_fault"]);
    }

    #[test]
    fn build_rejects_invalid_config() {
        let config = DispatcherConfig {
            jitter_alpha: vec![1.0],
            ..Default::default()
        };
        assert!(matches!(Dispatcher::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn best_picks_highest_probability() {
        let answers = vec![
            Candidate::new(0.2, "low", "a"),
            Candidate::new(0.8, "high", "b"),
            Candidate::new(0.5, "mid", "c"),
        ];
        assert_eq!(best(&answers).map(|c| c.text.as_str()), Some("high"));
        assert!(best(&[]).is_none());
    }
}
