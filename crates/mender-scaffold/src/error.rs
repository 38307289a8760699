//! Error types for mender-scaffold

use thiserror::Error;

/// Errors raised while saving plans or generated sources.
#[derive(Error, Debug)]
pub enum ScaffoldError {
    /// A required argument was blank
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// Target resolves outside the allowed directory
    #[error("{path} is outside {allowed}")]
    OutsideAllowed { path: String, allowed: String },

    /// Generator refuses to overwrite
    #[error("file already exists: {0}; reuse or extend existing code")]
    AlreadyExists(String),

    /// A file with the same name already exists in the same category
    #[error("{category} file already exists: {name}; reuse the existing one")]
    Duplicate { category: String, name: String },

    /// Directory walk failed
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
