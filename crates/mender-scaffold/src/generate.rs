//! Guarded writes of generated Python sources under `src/`.
//!
//! Generated code must reuse what exists: an existing file is never
//! overwritten, and a page object, utility, or constants module may not be
//! added twice under the same file name.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;
use walkdir::WalkDir;

use crate::error::ScaffoldError;
use crate::paths::join_within;
use crate::{Result, SavedFile};

/// Source tree subdirectories of `src/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    Pages,
    Tests,
    Utils,
    Constants,
}

impl SourceCategory {
    pub const ALL: [SourceCategory; 4] = [
        SourceCategory::Pages,
        SourceCategory::Tests,
        SourceCategory::Utils,
        SourceCategory::Constants,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            SourceCategory::Pages => "pages",
            SourceCategory::Tests => "tests",
            SourceCategory::Utils => "utils",
            SourceCategory::Constants => "constants",
        }
    }

    /// Categories whose file names must be unique.
    fn requires_unique_names(self) -> bool {
        !matches!(self, SourceCategory::Tests)
    }

    fn of(src_dir: &Path, path: &Path) -> Option<Self> {
        let relative = path.strip_prefix(src_dir).ok()?;
        let first = relative.components().next()?.as_os_str().to_str()?;
        Self::ALL.into_iter().find(|c| c.dir_name() == first)
    }
}

impl fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Existing `.py` files under `src/`, grouped by category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceIndex {
    pub files: BTreeMap<SourceCategory, Vec<PathBuf>>,
}

impl SourceIndex {
    pub fn get(&self, category: SourceCategory) -> &[PathBuf] {
        self.files.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    fn has_file_named(&self, category: SourceCategory, name: &std::ffi::OsStr) -> bool {
        self.get(category)
            .iter()
            .any(|p| p.file_name() == Some(name))
    }
}

/// Index every `.py` file under `src_dir`. A missing directory is empty.
pub fn scan_sources(src_dir: &Path) -> Result<SourceIndex> {
    let mut index = SourceIndex::default();
    if !src_dir.is_dir() {
        return Ok(index);
    }

    for entry in WalkDir::new(src_dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("py")
        {
            continue;
        }
        if let Some(category) = SourceCategory::of(src_dir, path) {
            index
                .files
                .entry(category)
                .or_default()
                .push(path.to_path_buf());
        }
    }

    Ok(index)
}

/// Write a generated file at `relative_path` (relative to `project_root`).
///
/// The target must live under `<project_root>/src`, must not exist yet, and
/// must not duplicate the name of an existing page, utility, or constants
/// module.
pub fn write_generated_file(
    project_root: &Path,
    relative_path: &str,
    content: &str,
) -> Result<SavedFile> {
    if relative_path.trim().is_empty() {
        return Err(ScaffoldError::Empty("relative_path"));
    }
    if content.trim().is_empty() {
        return Err(ScaffoldError::Empty("content"));
    }

    let src_dir = project_root.join("src");
    let target = join_within(project_root, Path::new(relative_path))?;
    if !target.starts_with(&src_dir) || target == src_dir {
        return Err(ScaffoldError::OutsideAllowed {
            path: relative_path.to_string(),
            allowed: src_dir.display().to_string(),
        });
    }

    if target.exists() {
        return Err(ScaffoldError::AlreadyExists(relative_path.to_string()));
    }

    if let (Some(category), Some(name)) = (SourceCategory::of(&src_dir, &target), target.file_name()) {
        if category.requires_unique_names() {
            let index = scan_sources(&src_dir)?;
            if index.has_file_named(category, name) {
                return Err(ScaffoldError::Duplicate {
                    category: category.to_string(),
                    name: name.to_string_lossy().into_owned(),
                });
            }
        }
    }

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&target, content)?;
    info!(path = %target.display(), "Generated file written");

    Ok(SavedFile {
        path: target,
        message: "File generated successfully".to_string(),
    })
}
