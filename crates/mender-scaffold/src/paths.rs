//! Lexical containment checks for paths that may not exist yet.

use std::path::{Component, Path, PathBuf};

use crate::error::ScaffoldError;
use crate::Result;

/// Join `relative` onto `base`, refusing absolute paths and `..` components
/// that climb above `base`. Does not touch the filesystem.
pub fn join_within(base: &Path, relative: &Path) -> Result<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(outside(relative, base));
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(outside(relative, base)),
        }
    }
    if parts.is_empty() {
        return Err(outside(relative, base));
    }

    let mut joined = base.to_path_buf();
    joined.extend(parts);
    Ok(joined)
}

fn outside(path: &Path, base: &Path) -> ScaffoldError {
    ScaffoldError::OutsideAllowed {
        path: path.display().to_string(),
        allowed: base.display().to_string(),
    }
}
