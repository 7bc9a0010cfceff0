//! Error types for the dispatcher.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    #[error("Preprocess error: {0}")]
    Preprocess(#[from] PreprocessError),

    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Answer module failures. Each one is isolated to the module that raised it.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("Module {name} failed: {reason}")]
    Failed { name: String, reason: String },

    #[error("Module {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Module {name} panicked: {reason}")]
    Panicked { name: String, reason: String },
}

impl ModuleError {
    /// Name of the module that failed.
    pub fn module_name(&self) -> &str {
        match self {
            Self::Failed { name, .. } | Self::Timeout { name, .. } | Self::Panicked { name, .. } => {
                name
            }
        }
    }

    /// Short label for logging and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "failed",
            Self::Timeout { .. } => "timeout",
            Self::Panicked { .. } => "panicked",
        }
    }
}

/// Text preprocessing errors. The dispatcher recovers from all of these.
#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("Normalization failed: {0}")]
    Normalization(String),
}

/// Clock source errors.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    #[error("Clock source unavailable: {0}")]
    Unavailable(String),
}

/// Errors that abort a whole dispatch call.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Malformed candidate from {source_module}: {reason}")]
    MalformedCandidate {
        source_module: String,
        reason: String,
    },
}

/// Result type alias for the dispatcher.
pub type Result<T> = std::result::Result<T, Error>;
