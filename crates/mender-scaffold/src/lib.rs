//! Mender Scaffold - guarded plan and source writers
//!
//! Helpers used while authoring a test project: saving manual test plans and
//! writing generated page objects, tests, and utilities without clobbering or
//! duplicating existing code. Nothing here takes part in the heal cycle.

mod error;
pub mod generate;
mod paths;
pub mod plan;

use std::path::PathBuf;

use serde::Serialize;

pub use error::ScaffoldError;
pub use generate::{scan_sources, write_generated_file, SourceCategory, SourceIndex};
pub use paths::join_within;
pub use plan::{save_plan, PLANS_DIR};

/// Result type for scaffold operations
pub type Result<T> = std::result::Result<T, ScaffoldError>;

/// Confirmation of a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedFile {
    pub path: PathBuf,
    pub message: String,
}
