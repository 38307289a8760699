//! Manual test plans saved as Markdown.

use std::path::Path;

use tracing::info;

use crate::error::ScaffoldError;
use crate::paths::join_within;
use crate::{Result, SavedFile};

/// Default plans directory, relative to the project root.
pub const PLANS_DIR: &str = "instructions/test-plans";

/// Save `content` as `<plans_dir>/<plan_name>.md`, creating the directory.
///
/// Blank names, blank content, and names resolving outside `plans_dir` are
/// rejected. An existing plan with the same name is replaced.
pub fn save_plan(plans_dir: &Path, plan_name: &str, content: &str) -> Result<SavedFile> {
    let plan_name = plan_name.trim();
    if plan_name.is_empty() {
        return Err(ScaffoldError::Empty("plan_name"));
    }
    if content.trim().is_empty() {
        return Err(ScaffoldError::Empty("content"));
    }

    let path = join_within(plans_dir, Path::new(&format!("{plan_name}.md")))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, content)?;
    info!(path = %path.display(), "Test plan saved");

    Ok(SavedFile {
        path,
        message: "Test plan saved successfully".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_inputs_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            save_plan(dir.path(), "  ", "# plan"),
            Err(ScaffoldError::Empty("plan_name"))
        ));
        assert!(matches!(
            save_plan(dir.path(), "login", "\n\t"),
            Err(ScaffoldError::Empty("content"))
        ));
    }
}
