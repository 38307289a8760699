//! Error taxonomy for the heal cycle.
//!
//! Only conditions that end a session abnormally are errors. An unparseable
//! failure, a guardrail refusal, or a file with no safe fix are ordinary
//! session outcomes and live in [`crate::session`].

/// Mender errors.
#[derive(Debug, thiserror::Error)]
pub enum MenderError {
    #[error("failed to launch test runner `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("test run interrupted")]
    Interrupted,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("path escapes project root: {0}")]
    PathEscape(String),

    #[error("invalid rewrite rule {rule}: {message}")]
    Rule { rule: String, message: String },

    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MenderError {
    /// Whether this error came from an operator cancellation.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

/// Result type for mender operations.
pub type Result<T> = std::result::Result<T, MenderError>;
