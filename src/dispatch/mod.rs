//! Answer dispatch pipeline.
//!
//! An inbound message flows through:
//! 1. `Dispatcher::may_respond()`: reply detection + unprompted-speech gate
//! 2. `TextPreprocessor::sanitize()`: canonical text for the modules
//! 3. Fan-out to every registered `AnswerModule`
//! 4. `ReplyPolicy::postprocess()` and `Jitter::apply()` per candidate
//!
//! The caller decides whether to call `dispatch` based on step 1.

pub mod clock;
pub mod dispatcher;
pub mod events;
pub mod gate;
pub mod jitter;
pub mod preprocess;
pub mod reply;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{Dispatcher, DispatcherBuilder, best};
pub use events::{BroadcastSink, DispatchEvent, EventSink, TracingSink};
pub use gate::{ActivityGate, GateDecision};
pub use jitter::Jitter;
pub use preprocess::{BasicPreprocessor, PassthroughPreprocessor, TextPreprocessor};
pub use reply::ReplyPolicy;
pub use types::{Author, Candidate, IN_REPLY_TO_ID, Master, Message};
