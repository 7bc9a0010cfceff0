//! Answer modules: pluggable sources of candidate responses.

pub mod builtin;
pub mod module;

pub use module::AnswerModule;
